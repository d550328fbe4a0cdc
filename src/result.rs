//! Execution result and engine-status → result-status mapping.

use bytes::Bytes;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Created,
    Running,
    Done,
    Failed,
}

/// Maps a container-engine status string to a result status.
///
/// `created -> created`, `running -> running`, `exited -> done`,
/// `dead -> failed`; any other string maps to `done`.
pub fn map_engine_status(engine_status: &str) -> ExecutionStatus {
    match engine_status {
        "created" => ExecutionStatus::Created,
        "running" => ExecutionStatus::Running,
        "exited" => ExecutionStatus::Done,
        "dead" => ExecutionStatus::Failed,
        _ => ExecutionStatus::Done,
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub exit_code: i64,
    pub error: String,
    pub started_at: DateTime<Utc>,
    /// Present iff `status` is `Done` or `Failed`.
    pub finished_at: Option<DateTime<Utc>>,
    /// Present iff `status` is `Done` or `Failed`.
    pub log: Option<Bytes>,
}

impl ExecutionResult {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, ExecutionStatus::Done | ExecutionStatus::Failed)
    }
}

/// Parses the ISO-8601 timestamps the engine hands back for `StartedAt`/
/// `FinishedAt`.
pub fn parse_iso8601(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    chrono::DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_is_total() {
        assert_eq!(map_engine_status("created"), ExecutionStatus::Created);
        assert_eq!(map_engine_status("running"), ExecutionStatus::Running);
        assert_eq!(map_engine_status("exited"), ExecutionStatus::Done);
        assert_eq!(map_engine_status("dead"), ExecutionStatus::Failed);
        assert_eq!(map_engine_status("restarting"), ExecutionStatus::Done);
        assert_eq!(map_engine_status("paused"), ExecutionStatus::Done);
        assert_eq!(map_engine_status("removing"), ExecutionStatus::Done);
    }

    #[test]
    fn parses_iso8601_timestamps() {
        let dt = parse_iso8601("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn terminal_statuses() {
        let base = ExecutionResult {
            status: ExecutionStatus::Running,
            exit_code: 0,
            error: String::new(),
            started_at: Utc::now(),
            finished_at: None,
            log: None,
        };
        assert!(!base.is_terminal());
        let done = ExecutionResult { status: ExecutionStatus::Done, ..base.clone() };
        assert!(done.is_terminal());
        let failed = ExecutionResult { status: ExecutionStatus::Failed, ..base };
        assert!(failed.is_terminal());
    }
}
