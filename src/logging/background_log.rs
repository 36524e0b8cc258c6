use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use log::{LevelFilter, Log, Record};

use osutils::files;

use super::LogEntry;

/// Writes every record as one JSON line to a file on the live system. The
/// file is copied into the installed system when the installation ends.
pub struct BackgroundLog {
    path: PathBuf,
    target: Option<Mutex<File>>,
    max_level: LevelFilter,
}

impl BackgroundLog {
    /// Truncates or creates `path`. A file that cannot be created disables
    /// the logger instead of failing the installation.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let target = files::create_file(path.as_ref())
            .map(Mutex::new)
            .map_err(|err| {
                eprintln!("Logging setup error: failed to create background log file: {err:?}")
            })
            .ok();

        Self {
            path: path.as_ref().to_owned(),
            target,
            max_level: LevelFilter::Trace,
        }
    }

    pub fn with_max_level(self, max_level: LevelFilter) -> Self {
        Self { max_level, ..self }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_logger(self) -> Box<dyn Log> {
        Box::new(self)
    }

    fn write_entry(&self, record: &Record) -> Result<(), Box<dyn std::error::Error + '_>> {
        let Some(file) = self.target.as_ref() else {
            return Ok(());
        };

        let mut line = serde_json::to_string(&LogEntry::from(record))?;
        line.push('\n');

        let mut file = file.lock()?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

impl Log for BackgroundLog {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.target.is_some() && metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        // Best effort, a failing log file must not stop the installation.
        let _ = self.write_entry(record);
    }

    fn flush(&self) {
        if let Some(Ok(mut file)) = self.target.as_ref().map(|f| f.lock()) {
            let _ = file.flush();
        }
    }
}
