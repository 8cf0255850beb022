use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::Mutex,
};

use log::{LevelFilter, Log, Metadata, Record};

use osutils::files;

use super::LogEntry;

/// Appends every record as one JSON line to a log file that persists across
/// runs.
///
/// Logging must never stop a run: if the file cannot be opened the logger
/// disables itself, and write errors are ignored.
pub struct BackgroundLog {
    target: Option<Mutex<File>>,
    max_level: LevelFilter,
}

impl BackgroundLog {
    pub fn new(target: impl AsRef<Path>) -> Self {
        let target = match open_append(target.as_ref()) {
            Ok(file) => Some(Mutex::new(file)),
            Err(e) => {
                eprintln!("Logging setup error: failed to open background log file: {e:?}");
                None
            }
        };

        Self {
            target,
            max_level: LevelFilter::Trace,
        }
    }

    pub fn with_max_level(self, max_level: LevelFilter) -> Self {
        Self { max_level, ..self }
    }

    pub fn into_logger(self) -> Box<dyn Log> {
        Box::new(self)
    }

    fn write_entry(&self, record: &Record) -> Result<(), Box<dyn std::error::Error + '_>> {
        if let Some(file) = self.target.as_ref() {
            let mut line = serde_json::to_string(&LogEntry::from(record))?;
            line.push('\n');

            let mut file = file.lock()?;
            file.write_all(line.as_bytes())?;
        }

        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File, anyhow::Error> {
    if let Some(parent) = path.parent() {
        files::create_dirs(parent)?;
    }

    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

impl Log for BackgroundLog {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.target.is_some() && metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        let _ = self.write_entry(record);
    }

    fn flush(&self) {
        if let Some(Ok(mut file)) = self.target.as_ref().map(Mutex::lock) {
            let _ = file.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use log::Level;
    use tempfile::tempdir;

    use crate::logging::Level as EntryLevel;

    #[test]
    fn test_filter() {
        let dir = tempdir().unwrap();
        let logger = BackgroundLog::new(dir.path().join("autodisk.log"))
            .with_max_level(LevelFilter::Info)
            .into_logger();

        assert!(logger.enabled(&Metadata::builder().level(Level::Info).build()));
        assert!(!logger.enabled(&Metadata::builder().level(Level::Debug).build()));
    }

    #[test]
    fn test_disabled() {
        let dir = tempdir().unwrap();

        // A directory cannot be opened as the log file
        let log = BackgroundLog::new(dir.path());
        assert!(log.target.is_none());
        assert!(!log
            .into_logger()
            .enabled(&Metadata::builder().level(Level::Error).build()));

        let log = BackgroundLog::new("/proc/autodisk/should/not/exist.log");
        assert!(log.target.is_none());
    }

    #[test]
    fn test_background_log_appends() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("log").join("autodisk.log");

        for message in ["first run", "second run"] {
            let logger = BackgroundLog::new(&target).into_logger();
            logger.log(
                &Record::builder()
                    .args(format_args!("{message}"))
                    .level(Level::Warn)
                    .target("autodisk::engine")
                    .module_path(Some("autodisk::engine"))
                    .file(Some(file!()))
                    .line(Some(7))
                    .build(),
            );
            logger.flush();
        }

        let contents = fs::read_to_string(&target).unwrap();
        let entries = contents
            .lines()
            .map(|line| serde_json::from_str::<LogEntry>(line).unwrap())
            .collect::<Vec<_>>();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "first run");
        assert_eq!(entries[1].message, "second run");
        assert_eq!(entries[1].level, EntryLevel::Warn);
        assert_eq!(entries[1].target, "autodisk::engine");
        assert_eq!(entries[1].file, file!());
        assert_eq!(entries[1].line, 7);
    }
}
