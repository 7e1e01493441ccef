//! Session bookkeeping: metadata, operation log and export records.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Identity and timestamps of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// `ProblemType::name()` of the owning problem.
    pub problem_type: String,
    pub schema_version: u32,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
    /// Seconds since the Unix epoch.
    pub last_modified: u64,
    pub description: Option<String>,
}

impl SessionMetadata {
    pub fn new(problem_type: impl Into<String>, schema_version: u32) -> Self {
        let now = current_timestamp();
        Self {
            problem_type: problem_type.into(),
            schema_version,
            created_at: now,
            last_modified: now,
            description: None,
        }
    }

    pub fn with_description(
        problem_type: impl Into<String>,
        schema_version: u32,
        description: impl Into<String>,
    ) -> Self {
        Self {
            description: Some(description.into()),
            ..Self::new(problem_type, schema_version)
        }
    }

    /// Mark the session as modified now.
    pub fn touch(&mut self) {
        self.last_modified = current_timestamp();
    }
}

/// One entry of the operation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: u64,
    /// Step name, e.g. `"rotation_init"`.
    pub operation: String,
    pub success: bool,
    /// Summary line or error message.
    pub notes: Option<String>,
}

impl LogEntry {
    pub fn success_with_notes(operation: impl Into<String>, notes: impl Into<String>) -> Self {
        Self::entry(operation, true, Some(notes.into()))
    }

    pub fn failure(operation: impl Into<String>, error: impl Into<String>) -> Self {
        Self::entry(operation, false, Some(error.into()))
    }

    fn entry(operation: impl Into<String>, success: bool, notes: Option<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            operation: operation.into(),
            success,
            notes,
        }
    }
}

/// Export produced by [`CalibrationSession::export`](super::CalibrationSession::export).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRecord<E> {
    pub timestamp: u64,
    pub export: E,
}

impl<E> ExportRecord<E> {
    pub fn new(export: E) -> Self {
        Self {
            timestamp: current_timestamp(),
            export,
        }
    }
}

/// Seconds since the Unix epoch, or 0 if the clock is before it.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_starts_unmodified() {
        let meta = SessionMetadata::with_description("lidar_imu", 2, "bench run");
        assert_eq!(meta.problem_type, "lidar_imu");
        assert_eq!(meta.schema_version, 2);
        assert_eq!(meta.created_at, meta.last_modified);
        assert_eq!(meta.description.as_deref(), Some("bench run"));
    }

    #[test]
    fn log_entries_carry_outcome() {
        let ok = LogEntry::success_with_notes("refine", "cost 1.0e-3");
        assert!(ok.success);
        assert_eq!(ok.notes.as_deref(), Some("cost 1.0e-3"));

        let failed = LogEntry::failure("rotation_init", "no gyro samples");
        assert!(!failed.success);
        assert_eq!(failed.operation, "rotation_init");
    }

    #[test]
    fn export_record_survives_json() {
        let record = ExportRecord::new(vec![0.1, 0.2]);
        let json = serde_json::to_string(&record).unwrap();
        let restored: ExportRecord<Vec<f64>> = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.export, vec![0.1, 0.2]);
        assert_eq!(restored.timestamp, record.timestamp);
    }
}
