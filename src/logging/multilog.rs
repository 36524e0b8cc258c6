use log::{LevelFilter, Log, Metadata};

/// Caps the verbosity of every log whose target starts with `prefix`.
struct TargetFilter {
    prefix: String,
    max_level: LevelFilter,
}

impl TargetFilter {
    fn drops(&self, metadata: &Metadata) -> bool {
        metadata.target().starts_with(&self.prefix) && metadata.level() > self.max_level
    }
}

/// Fans log records out to several loggers.
pub struct MultiLogger {
    loggers: Vec<Box<dyn Log>>,
    max_level: LevelFilter,
    filters: Vec<TargetFilter>,
}

impl Default for MultiLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiLogger {
    pub fn new() -> Self {
        Self {
            loggers: Vec::new(),
            max_level: LevelFilter::Trace,
            filters: Vec::new(),
        }
    }

    pub fn with_logger(mut self, logger: Box<dyn Log>) -> Self {
        self.loggers.push(logger);
        self
    }

    pub fn with_max_level(mut self, max_level: LevelFilter) -> Self {
        self.max_level = max_level;
        self
    }

    /// Drop logs from targets starting with `target` that are more verbose
    /// than `max_level`, whatever logger they would go to.
    pub fn with_global_filter(mut self, target: impl Into<String>, max_level: LevelFilter) -> Self {
        self.filters.push(TargetFilter {
            prefix: target.into(),
            max_level,
        });
        self
    }

    pub fn add_logger(&mut self, logger: Box<dyn Log>) {
        self.loggers.push(logger);
    }

    /// Register as the global logger.
    pub fn init(self) -> Result<(), log::SetLoggerError> {
        log::set_max_level(self.max_level);
        log::set_boxed_logger(Box::new(self))
    }

    fn filtered(&self, metadata: &Metadata) -> bool {
        self.filters.iter().any(|filter| filter.drops(metadata))
    }
}

impl Log for MultiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        !self.filtered(metadata) && self.loggers.iter().any(|l| l.enabled(metadata))
    }

    fn log(&self, record: &log::Record) {
        if self.filtered(record.metadata()) {
            return;
        }
        self.loggers
            .iter()
            .filter(|l| l.enabled(record.metadata()))
            .for_each(|l| l.log(record));
    }

    fn flush(&self) {
        self.loggers.iter().for_each(|l| l.flush());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    use log::{Level, Record};

    #[derive(Clone, Default)]
    struct RecordingLogger {
        max_level: Option<Level>,
        records: Arc<Mutex<Vec<String>>>,
    }

    impl Log for RecordingLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            self.max_level.is_some_and(|max| metadata.level() <= max)
        }

        fn log(&self, record: &Record) {
            self.records
                .lock()
                .unwrap()
                .push(format!("{} {}", record.target(), record.args()));
        }

        fn flush(&self) {}
    }

    fn record(level: Level, target: &'static str) -> Metadata<'static> {
        Metadata::builder().level(level).target(target).build()
    }

    #[test]
    fn test_enabled() {
        let quiet = RecordingLogger::default();
        let multi_logger = MultiLogger::new()
            .with_logger(Box::new(quiet.clone()))
            .with_logger(Box::new(quiet));
        assert!(!multi_logger.enabled(&record(Level::Error, "sabayon_installer")));

        let verbose = RecordingLogger {
            max_level: Some(Level::Info),
            ..Default::default()
        };
        let multi_logger = MultiLogger::new()
            .with_logger(Box::new(RecordingLogger::default()))
            .with_logger(Box::new(verbose));
        assert!(multi_logger.enabled(&record(Level::Info, "sabayon_installer")));
        assert!(!multi_logger.enabled(&record(Level::Debug, "sabayon_installer")));
    }

    #[test]
    fn test_fan_out() {
        let stderr = RecordingLogger {
            max_level: Some(Level::Warn),
            ..Default::default()
        };
        let background = RecordingLogger {
            max_level: Some(Level::Trace),
            ..Default::default()
        };
        let multi_logger = MultiLogger::new()
            .with_logger(Box::new(stderr.clone()))
            .with_logger(Box::new(background.clone()));

        multi_logger.log(
            &Record::builder()
                .args(format_args!("copied 300 files"))
                .level(Level::Info)
                .target("copy")
                .build(),
        );

        assert!(stderr.records.lock().unwrap().is_empty());
        assert_eq!(
            *background.records.lock().unwrap(),
            vec!["copy copied 300 files".to_string()]
        );
    }

    #[test]
    fn test_global_filter() {
        let background = RecordingLogger {
            max_level: Some(Level::Trace),
            ..Default::default()
        };
        let multi_logger = MultiLogger::new()
            .with_logger(Box::new(background.clone()))
            .with_global_filter("sabayon_installer::engine::livecopy", LevelFilter::Debug);

        assert!(!multi_logger.enabled(&record(
            Level::Trace,
            "sabayon_installer::engine::livecopy"
        )));
        assert!(multi_logger.enabled(&record(
            Level::Debug,
            "sabayon_installer::engine::livecopy"
        )));
        assert!(multi_logger.enabled(&record(Level::Trace, "sabayon_installer::engine")));

        multi_logger.log(
            &Record::builder()
                .args(format_args!("/usr/bin/equo"))
                .level(Level::Trace)
                .target("sabayon_installer::engine::livecopy")
                .build(),
        );
        assert!(background.records.lock().unwrap().is_empty());
    }
}
