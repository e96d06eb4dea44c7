//! Logging setup and structured job lifecycle events.
//!
//! Every job run gets a fresh run id and reports its lifecycle through
//! [`log_job_event`], so one run can be followed through the log:
//!
//! ```text
//! INFO job_event{event=started job=faucet-claim-stats run_id=...}: Job event occurred
//! INFO job_event{event=completed job=faucet-claim-stats run_id=...}: Job event occurred details=processed 42
//! ```

use tracing::{error, info, info_span, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::config::LoggingConfig;

/// Install the global fmt subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Calling this twice
/// is harmless; the second call keeps the first subscriber.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi)
        .with_target(false)
        .try_init();
}

/// Job lifecycle event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Started,
    /// Guard refused the run
    Skipped,
    Completed,
    Failed,
}

impl std::fmt::Display for JobEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobEvent::Started => "started",
            JobEvent::Skipped => "skipped",
            JobEvent::Completed => "completed",
            JobEvent::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Generate a new run id.
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Log one job lifecycle event.
///
/// # Arguments
///
/// * `event` - What happened to the run
/// * `job` - Command name of the job
/// * `run_id` - Id shared by every event of one run
/// * `details` - Optional detail (outcome, skip reason or error)
pub fn log_job_event(event: JobEvent, job: &str, run_id: &str, details: Option<&str>) {
    let span = info_span!(
        "job_event",
        event = %event,
        job = %job,
        run_id = %run_id,
    );
    let _enter = span.enter();

    match (event, details) {
        (JobEvent::Failed, Some(d)) => error!(reason = %d, "Job event occurred"),
        (JobEvent::Failed, None) => error!("Job event occurred"),
        (JobEvent::Skipped, Some(d)) => warn!(reason = %d, "Job event occurred"),
        (JobEvent::Skipped, None) => warn!("Job event occurred"),
        (_, Some(d)) => info!(details = %d, "Job event occurred"),
        (_, None) => info!("Job event occurred"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_is_valid_uuid() {
        let id = generate_run_id();
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn event_names() {
        assert_eq!(JobEvent::Started.to_string(), "started");
        assert_eq!(JobEvent::Skipped.to_string(), "skipped");
        assert_eq!(JobEvent::Completed.to_string(), "completed");
        assert_eq!(JobEvent::Failed.to_string(), "failed");
    }

    #[test]
    fn init_twice_is_harmless() {
        let config = LoggingConfig::default();
        init_logging(&config);
        init_logging(&config);
        log_job_event(JobEvent::Started, "test", &generate_run_id(), None);
    }
}
