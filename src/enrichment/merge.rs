//! Deterministic field merge
//!
//! Every attribute is chosen by a total order over signals (confidence, then
//! capture time, then source id, then the value itself), so the merged
//! record does not depend on the order in which providers answered. A stored
//! record keeps the source of each attribute, so merging into it ranks the
//! stored values exactly as a fold over every signal seen would.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::models::{
    EngagementSignals, FieldSource, OrganizationRecord, Signal, SignalFields, clamp_confidence,
};

/// Source id for stored values whose supplying signal is unknown.
/// Sorts after every provider id, so providers win exact ties.
pub const PERSISTED_SOURCE: &str = "~persisted";

/// Fold signals for one normalized domain into a fresh record.
///
/// The record is not scored. Its confidence is the mean confidence of the
/// signals that supplied at least one attribute, or 0 if none did.
pub fn fold_signals(domain: &str, signals: &[Signal], now: DateTime<Utc>) -> OrganizationRecord {
    let mut record = OrganizationRecord::new(domain, now);
    fold_into(&mut record, signals, now);
    set_confidence(&mut record, tally(signals.iter()));
    record
}

/// Merge new signals into a persisted record.
///
/// Stored attributes compete with the new signals under the rank of the
/// signal that supplied them. The id, `first_seen`, score and accumulated
/// tags survive. The record is not re-scored here.
pub fn merge_into(
    existing: &OrganizationRecord,
    signals: &[Signal],
    now: DateTime<Utc>,
) -> OrganizationRecord {
    let mut all = record_signals(existing, PERSISTED_SOURCE);
    all.extend(signals.iter().cloned());

    let (sum, count) = contribution(existing);
    let (added_sum, added_count) = tally(signals.iter());
    merge_with(existing, &all, (sum + added_sum, count + added_count), now)
}

/// Merge a separately folded record into a persisted one. Attributes of
/// `incoming` without a recorded source are attributed to `source_id`.
pub fn merge_records(
    existing: &OrganizationRecord,
    incoming: &OrganizationRecord,
    source_id: &str,
    now: DateTime<Utc>,
) -> OrganizationRecord {
    let mut all = record_signals(existing, PERSISTED_SOURCE);
    all.extend(record_signals(incoming, source_id));

    let (sum, count) = contribution(existing);
    let (incoming_sum, incoming_count) = contribution(incoming);
    let mut merged = merge_with(existing, &all, (sum + incoming_sum, count + incoming_count), now);
    merged.first_seen = merged.first_seen.min(incoming.first_seen);
    merged
}

/// Express a record as signals.
///
/// Each attribute with a recorded source becomes a signal ranked as that
/// source was. History (visits, engagement, last sighting, tags) and any
/// unsourced attribute ride on one signal from `fallback_source`, carrying
/// the record's confidence and captured at its `last_seen`.
pub fn record_signals(record: &OrganizationRecord, fallback_source: &str) -> Vec<Signal> {
    let provenance = &record.provenance;
    let mut signals = Vec::new();
    let mut history = SignalFields {
        total_visits: Some(record.total_visits),
        engagement: Some(record.engagement),
        last_seen: Some(record.last_seen),
        tags: record.tags.clone(),
        ..SignalFields::default()
    };

    match (&record.name, &provenance.name) {
        (Some(name), Some(source)) => signals.push(sourced(
            record,
            source,
            SignalFields {
                name: Some(name.clone()),
                ..SignalFields::default()
            },
        )),
        (name, _) => history.name = name.clone(),
    }
    match (&record.industry, &provenance.industry) {
        (Some(industry), Some(source)) => signals.push(sourced(
            record,
            source,
            SignalFields {
                industry: Some(industry.clone()),
                ..SignalFields::default()
            },
        )),
        (industry, _) => history.industry = industry.clone(),
    }
    match (&record.size, &provenance.size) {
        (Some(size), Some(source)) => signals.push(sourced(
            record,
            source,
            SignalFields {
                size: Some(size.clone()),
                ..SignalFields::default()
            },
        )),
        (size, _) => history.size = size.clone(),
    }
    match (&record.location, &provenance.location) {
        (Some(location), Some(source)) => signals.push(sourced(
            record,
            source,
            SignalFields {
                location: Some(location.clone()),
                ..SignalFields::default()
            },
        )),
        (location, _) => history.location = location.clone(),
    }

    signals.push(Signal {
        source_id: fallback_source.to_string(),
        domain: record.domain.clone(),
        fields: history,
        confidence: clamp_confidence(record.confidence),
        captured_at: record.last_seen,
    });
    signals
}

fn sourced(record: &OrganizationRecord, source: &FieldSource, fields: SignalFields) -> Signal {
    Signal {
        source_id: source.source_id.clone(),
        domain: record.domain.clone(),
        fields,
        confidence: source.confidence,
        captured_at: source.captured_at,
    }
}

fn merge_with(
    existing: &OrganizationRecord,
    signals: &[Signal],
    contributions: (f64, u32),
    now: DateTime<Utc>,
) -> OrganizationRecord {
    let mut merged = OrganizationRecord::new(existing.domain.clone(), now);
    fold_into(&mut merged, signals, now);

    merged.id = existing.id;
    merged.first_seen = existing.first_seen.min(merged.first_seen);
    merged.last_seen = existing.last_seen.max(merged.last_seen);
    merged.score = existing.score;
    merged.status = existing.status;
    set_confidence(&mut merged, contributions);
    merged
}

fn fold_into(record: &mut OrganizationRecord, signals: &[Signal], now: DateTime<Utc>) {
    (record.name, record.provenance.name) = pick(signals, |f| non_blank(&f.name)).unzip();
    (record.industry, record.provenance.industry) =
        pick(signals, |f| non_blank(&f.industry)).unzip();
    (record.size, record.provenance.size) = pick(signals, |f| non_blank(&f.size)).unzip();
    (record.location, record.provenance.location) = pick(signals, |f| {
        f.location.clone().filter(|location| !location.is_empty())
    })
    .unzip();

    record.total_visits = signals
        .iter()
        .filter_map(|s| s.fields.total_visits)
        .max()
        .unwrap_or(0);

    let mut engagement = EngagementSignals::default();
    for signal in signals {
        if let Some(observed) = &signal.fields.engagement {
            engagement.absorb(observed);
        }
    }
    record.engagement = engagement;

    let sightings = signals.iter().filter_map(|s| s.fields.last_seen);
    record.last_seen = sightings.clone().max().unwrap_or(now);
    record.first_seen = sightings.min().unwrap_or(now);

    for signal in signals {
        record.tags.extend(signal.fields.tags.iter().cloned());
    }
}

/// Highest-ranked value among the signals that supplied one, with the
/// signal it came from.
fn pick<T, F>(signals: &[Signal], extract: F) -> Option<(T, FieldSource)>
where
    T: Ord,
    F: Fn(&SignalFields) -> Option<T>,
{
    signals
        .iter()
        .filter_map(|signal| extract(&signal.fields).map(|value| (signal, value)))
        .max_by(|(a, value_a), (b, value_b)| {
            rank(a, b).then_with(|| value_b.cmp(value_a))
        })
        .map(|(signal, value)| {
            let source = FieldSource {
                source_id: signal.source_id.clone(),
                confidence: signal.confidence,
                captured_at: signal.captured_at,
            };
            (value, source)
        })
}

/// Greater means "wins".
fn rank(a: &Signal, b: &Signal) -> Ordering {
    a.confidence
        .total_cmp(&b.confidence)
        .then_with(|| a.captured_at.cmp(&b.captured_at))
        .then_with(|| b.source_id.cmp(&a.source_id))
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Confidence sum and count over signals that supplied anything.
fn tally<'a>(signals: impl Iterator<Item = &'a Signal>) -> (f64, u32) {
    signals
        .filter(|s| s.fields.supplies_any())
        .fold((0.0, 0u32), |(sum, count), s| (sum + s.confidence, count + 1))
}

/// What a stored record contributes to the mean. Records without a tally
/// count once at their own confidence; a zero-confidence placeholder counts
/// not at all.
fn contribution(record: &OrganizationRecord) -> (f64, u32) {
    let provenance = &record.provenance;
    if provenance.signal_count > 0 {
        (provenance.confidence_sum, provenance.signal_count)
    } else if record.confidence > 0.0 {
        (clamp_confidence(record.confidence), 1)
    } else {
        (0.0, 0)
    }
}

fn set_confidence(record: &mut OrganizationRecord, (sum, count): (f64, u32)) {
    record.provenance.confidence_sum = sum;
    record.provenance.signal_count = count;
    record.confidence = if count == 0 {
        0.0
    } else {
        clamp_confidence(sum / f64::from(count))
    };
}
