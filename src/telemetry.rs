//! Telemetry: global subscriber setup and task-scoped trace context.
//!
//! Sync jobs and discovery ticks run inside a [`TraceContext`] so every log
//! line and every outbound provider request can be correlated with the unit
//! of work that caused it.

use std::any::type_name_of_val;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use log::LevelFilter;
use thiserror::Error;
use tokio::task_local;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::Layer,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

use crate::config::AppConfig;

/// Correlation metadata for one unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    /// What kind of work is running (`sync_job`, `discovery_tick`, ...).
    pub scope: &'static str,
}

impl TraceContext {
    pub fn new(scope: &'static str, trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            scope,
        }
    }
}

task_local! {
    static ACTIVE_TRACE_CONTEXT: TraceContext;
}

/// Errors that can occur while initializing global telemetry.
#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("failed to install log tracer bridge: {0}")]
    LogTracer(#[from] log::SetLoggerError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static TELEMETRY_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Install the global subscriber once; later calls are no-ops.
///
/// `RUST_LOG` wins over the configured `log_level`. `log_format` selects
/// `pretty` or (default) `json` output.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if TELEMETRY_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }

    // sea-orm/sqlx still log through the `log` facade.
    if let Err(err) = LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()
    {
        let logger_type = type_name_of_val(log::logger());
        if !logger_type.contains("LogTracer") {
            eprintln!("Warning: failed to install log tracer bridge: {err}");
        }
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = match config.log_format.as_str() {
        "pretty" => fmt::layer().pretty().boxed(),
        "compact" => fmt::layer().compact().boxed(),
        _ => fmt::layer().json().with_current_span(true).boxed(),
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        TELEMETRY_INITIALIZED.store(false, Ordering::SeqCst);
        eprintln!("Warning: failed to set global tracing subscriber: {err}");
    }

    Ok(())
}

/// Run `future` with `context` as the task's active trace context.
pub async fn with_trace_context<Fut, R>(context: TraceContext, future: Fut) -> R
where
    Fut: Future<Output = R>,
{
    ACTIVE_TRACE_CONTEXT.scope(context, future).await
}

/// Trace id of the running task's context, if any.
pub fn current_trace_id() -> Option<String> {
    ACTIVE_TRACE_CONTEXT
        .try_with(|ctx| ctx.trace_id.clone())
        .ok()
}

pub fn current_scope() -> Option<&'static str> {
    ACTIVE_TRACE_CONTEXT.try_with(|ctx| ctx.scope).ok()
}

/// Snapshot of the active context, for carrying it into spawned tasks.
pub fn current_context() -> Option<TraceContext> {
    ACTIVE_TRACE_CONTEXT.try_with(TraceContext::clone).ok()
}

/// Run `future` under `context` when one is given, plainly otherwise.
pub async fn with_optional_trace_context<Fut, R>(context: Option<TraceContext>, future: Fut) -> R
where
    Fut: Future<Output = R>,
{
    match context {
        Some(context) => with_trace_context(context, future).await,
        None => future.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trace_context_is_scoped_to_the_future() {
        assert_eq!(current_trace_id(), None);

        let seen = with_trace_context(TraceContext::new("sync_job", "job-42"), async {
            (current_trace_id(), current_scope())
        })
        .await;

        assert_eq!(seen, (Some("job-42".to_string()), Some("sync_job")));
        assert_eq!(current_trace_id(), None);
    }

    #[test]
    fn init_is_idempotent() {
        let config = AppConfig::default();
        init_tracing(&config).unwrap();
        init_tracing(&config).unwrap();
    }
}
