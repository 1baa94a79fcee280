/// Audit logging for security-critical operations
///
/// This module provides structured logging of all privileged operations:
/// forward installation, table clearing, ruleset persistence, and kernel
/// parameter changes. Events are JSON-lines in the XDG state directory.
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;

/// Types of auditable events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AddForward,
    ClearTable,
    PersistRuleset,
    SysctlUpdate,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Type of event
    pub event_type: EventType,

    /// Whether the operation succeeded
    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    /// Creates a new audit event
    pub fn new(
        event_type: EventType,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            success,
            details,
            error,
        }
    }
}

/// Audit log writer
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    /// Creates a new audit log instance
    ///
    /// # Errors
    ///
    /// Returns `Err` if state directory cannot be determined
    pub fn new() -> std::io::Result<Self> {
        let mut log_path = crate::utils::get_state_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
        })?;
        crate::utils::ensure_dirs()?;
        log_path.push("audit.log");

        Ok(Self { log_path })
    }

    /// Appends an event to the audit log
    ///
    /// Events are written as JSON-lines format (one JSON object per line)
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be opened or written
    pub fn log(&self, event: &AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(event)?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;

        Ok(())
    }

    /// Reads the most recent events from the log, newest first
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be read
    pub fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = std::fs::read_to_string(&self.log_path)?;

        let events: Vec<AuditEvent> = content
            .lines()
            .rev()
            .take(count)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        Ok(events)
    }

    /// Returns the path to the audit log file
    pub fn path(&self) -> &PathBuf {
        &self.log_path
    }
}

fn write_event(enabled: bool, event: AuditEvent) {
    if !enabled {
        return;
    }
    if let Ok(audit) = AuditLog::new() {
        if let Err(e) = audit.log(&event) {
            tracing::warn!("Failed to write audit log: {}", e);
        }
    }
}

/// Logs a forward installation
pub fn log_forward(
    enabled: bool,
    family: &str,
    local_port: u16,
    target: &str,
    success: bool,
    error: Option<String>,
) {
    write_event(
        enabled,
        AuditEvent::new(
            EventType::AddForward,
            success,
            serde_json::json!({
                "family": family,
                "local_port": local_port,
                "target": target,
            }),
            error,
        ),
    );
}

/// Logs a clear-all operation
pub fn log_clear(enabled: bool, cleared: bool, success: bool, error: Option<String>) {
    write_event(
        enabled,
        AuditEvent::new(
            EventType::ClearTable,
            success,
            serde_json::json!({ "cleared": cleared }),
            error,
        ),
    );
}

/// Logs a persistence pass
pub fn log_persist(enabled: bool, checksum: Option<&str>, success: bool, error: Option<String>) {
    write_event(
        enabled,
        AuditEvent::new(
            EventType::PersistRuleset,
            success,
            serde_json::json!({ "checksum": checksum }),
            error,
        ),
    );
}

/// Logs a kernel-parameter update
pub fn log_sysctl(enabled: bool, appended: &[String], reloaded: bool) {
    write_event(
        enabled,
        AuditEvent::new(
            EventType::SysctlUpdate,
            true,
            serde_json::json!({
                "appended": appended,
                "reloaded": reloaded,
            }),
            None,
        ),
    );
}
