//! # Data Models
//!
//! Domain types shared across the engine, plus the SeaORM entities for the
//! tables that back them.

pub mod discovery_event;
pub mod organization;
pub mod signal;
pub mod sync_job;
pub mod sync_schedule;

pub use discovery_event::{DiscoveryEvent, DiscoveryEventType};
pub use organization::{
    EngagementSignals, FieldSource, LeadStatus, Location, OrganizationRecord, Provenance,
};
pub use signal::{Signal, SignalFields, SignalQuery, clamp_confidence};
pub use sync_job::{JobError, JobErrorKind, JobStatus, SyncJob, SyncTrigger};
pub use sync_schedule::SyncSchedule;

pub use organization::Entity as Organization;
pub use sync_schedule::Entity as SyncScheduleEntity;
