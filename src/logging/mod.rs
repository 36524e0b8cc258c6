use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub(super) mod background_log;
pub(super) mod multilog;
pub(super) mod phase_trace;

#[derive(Debug, Serialize, Deserialize)]
struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub message: String,
    pub target: String,
    pub module: String,
    pub file: String,
    pub line: u32,
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
    fn from(value: &log::Record) -> Self {
        Self {
            timestamp: Utc::now(),
            level: value.level().into(),
            message: value.args().to_string(),
            target: value.target().to_string(),
            module: value.module_path().unwrap_or_default().to_string(),
            file: value.file().unwrap_or_default().to_string(),
            line: value.line().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry() {
        let before = Utc::now();
        let entry = LogEntry::from(
            &log::Record::builder()
                .args(format_args!("Copying live image"))
                .level(log::Level::Warn)
                .target("sabayon_installer::engine")
                .module_path(Some("sabayon_installer::engine::livecopy"))
                .file(Some("src/engine/livecopy.rs"))
                .line(Some(7))
                .build(),
        );

        assert!(entry.timestamp >= before);
        assert_eq!(entry.level, Level::Warn);
        assert_eq!(entry.message, "Copying live image");
        assert_eq!(entry.target, "sabayon_installer::engine");
        assert_eq!(entry.module, "sabayon_installer::engine::livecopy");
        assert_eq!(entry.file, "src/engine/livecopy.rs");
        assert_eq!(entry.line, 7);
    }

    #[test]
    fn test_record_without_location() {
        let entry = LogEntry::from(
            &log::Record::builder()
                .args(format_args!("bare"))
                .level(log::Level::Trace)
                .build(),
        );
        assert_eq!(entry.level, Level::Trace);
        assert_eq!(entry.module, "");
        assert_eq!(entry.line, 0);
    }
}
