//! Log sinks installed by `main`: a fan-out logger and a JSON lines file log.

use serde::{Deserialize, Serialize};

pub(super) mod background_log;
pub(super) mod multilog;

/// One line of the background log.
#[derive(Debug, Serialize, Deserialize)]
struct LogEntry {
    pub level: Level,
    pub message: String,
    pub target: String,
    pub module: String,
    pub file: String,
    pub line: u32,

    /// Process that emitted the entry; the log accumulates across runs.
    pub pid: u32,
}

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl From<log::Level> for Level {
    fn from(value: log::Level) -> Self {
        match value {
            log::Level::Error => Level::Error,
            log::Level::Warn => Level::Warn,
            log::Level::Info => Level::Info,
            log::Level::Debug => Level::Debug,
            log::Level::Trace => Level::Trace,
        }
    }
}

impl From<&log::Record<'_>> for LogEntry {
    fn from(record: &log::Record) -> Self {
        Self {
            level: record.level().into(),
            message: record.args().to_string(),
            target: record.target().to_string(),
            module: record.module_path().unwrap_or_default().to_string(),
            file: record.file().unwrap_or_default().to_string(),
            line: record.line().unwrap_or_default(),
            pid: std::process::id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry() {
        let entry = LogEntry::from(
            &log::Record::builder()
                .args(format_args!("Provisioning state: Scanning"))
                .level(log::Level::Info)
                .target("autodisk::engine")
                .module_path(Some("autodisk::engine"))
                .file(Some("src/engine/mod.rs"))
                .line(Some(112))
                .build(),
        );

        assert_eq!(entry.level, Level::Info);
        assert_eq!(entry.message, "Provisioning state: Scanning");
        assert_eq!(entry.target, "autodisk::engine");
        assert_eq!(entry.module, "autodisk::engine");
        assert_eq!(entry.file, "src/engine/mod.rs");
        assert_eq!(entry.line, 112);
        assert_eq!(entry.pid, std::process::id());

        let serialized = serde_json::to_string(&entry).unwrap();
        assert!(
            serialized.starts_with(r#"{"level":"info","message":"Provisioning state: Scanning""#)
        );
    }
}
