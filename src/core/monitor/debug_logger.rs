// Structured JSONL debug logging with size-based rotation.
//
// Enabled by NETPULSE_DEBUG=true; otherwise every call is a cheap no-op.
// Entries are one JSON object per line so external tooling can tail and
// filter without a parser state machine.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use chrono::Local;
use flate2::{write::GzEncoder, Compression};
use fs2::FileExt;
use serde::Serialize;

const LOG_ROTATION_SIZE_MB: u64 = 8;
const MAX_ARCHIVES: usize = 5;
const ROTATION_CHECK_INTERVAL: u32 = 200;

#[derive(Serialize, Debug)]
struct LogEntry<'a> {
    timestamp: String,
    level: &'a str,
    component: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    fields: HashMap<&'a str, serde_json::Value>,
}

/// Process-wide debug logger. Obtain via [`get_debug_logger`].
pub struct DebugLogger {
    enabled: bool,
    log_path: PathBuf,
    write_count: AtomicU32,
}

impl DebugLogger {
    fn new() -> Self {
        let enabled = std::env::var("NETPULSE_DEBUG")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let log_path = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("netpulse")
            .join("netpulse-debug.jsonl");

        if enabled {
            if let Some(parent) = log_path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
        }

        Self {
            enabled,
            log_path,
            write_count: AtomicU32::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn debug(&self, component: &str, message: &str) {
        self.write("DEBUG", component, message, HashMap::new());
    }

    pub fn info(&self, component: &str, message: &str) {
        self.write("INFO", component, message, HashMap::new());
    }

    pub fn warn(&self, component: &str, message: &str) {
        self.write("WARN", component, message, HashMap::new());
    }

    pub fn error(&self, component: &str, message: &str) {
        self.write("ERROR", component, message, HashMap::new());
    }

    /// Structured variant for probe lifecycle events
    pub fn event(
        &self,
        level: &str,
        component: &str,
        message: &str,
        fields: HashMap<&str, serde_json::Value>,
    ) {
        self.write(level, component, message, fields);
    }

    fn write(
        &self,
        level: &str,
        component: &str,
        message: &str,
        fields: HashMap<&str, serde_json::Value>,
    ) {
        if !self.enabled {
            return;
        }
        let entry = LogEntry {
            timestamp: Local::now().to_rfc3339(),
            level,
            component,
            message,
            fields,
        };
        if let Ok(line) = serde_json::to_string(&entry) {
            let _ = self.write_with_rotation(&line);
        }
    }

    fn write_with_rotation(&self, json_line: &str) -> Result<(), std::io::Error> {
        // Check for rotation every ROTATION_CHECK_INTERVAL writes
        if self.write_count.fetch_add(1, Ordering::Relaxed) % ROTATION_CHECK_INTERVAL == 0 {
            let _ = self.rotate_if_needed();
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(file, "{}", json_line)?;
        Ok(())
    }

    fn rotate_if_needed(&self) -> Result<(), std::io::Error> {
        if !self.needs_rotation()? {
            return Ok(());
        }

        // File locking so two processes never rotate concurrently
        let lock_path = self.log_path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => {
                // Re-check after acquiring the lock
                if self.needs_rotation()? {
                    self.perform_rotation()?;
                }
                let _ = std::fs::remove_file(&lock_path);
                Ok(())
            }
            Err(_) => Ok(()),
        }
    }

    fn needs_rotation(&self) -> Result<bool, std::io::Error> {
        if !self.log_path.exists() {
            return Ok(false);
        }
        let metadata = std::fs::metadata(&self.log_path)?;
        Ok(metadata.len() >= LOG_ROTATION_SIZE_MB * 1024 * 1024)
    }

    fn perform_rotation(&self) -> Result<(), std::io::Error> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let filename = self
            .log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("netpulse-debug.jsonl");
        let parent = self
            .log_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        let archive_path = parent.join(format!("{}.{}.gz", filename, timestamp));

        // Move aside, compress, clean up
        let temp_path = self.log_path.with_extension("rotating");
        std::fs::rename(&self.log_path, &temp_path)?;

        let source_file = File::open(&temp_path)?;
        let target_file = File::create(&archive_path)?;
        let mut encoder = GzEncoder::new(target_file, Compression::default());
        std::io::copy(&mut BufReader::new(source_file), &mut encoder)?;
        encoder.finish()?;
        std::fs::remove_file(&temp_path)?;

        self.prune_archives(&parent, filename);
        Ok(())
    }

    fn prune_archives(&self, parent: &PathBuf, filename: &str) {
        let Ok(entries) = std::fs::read_dir(parent) else {
            return;
        };
        let mut archives: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(filename) && n.ends_with(".gz"))
                    .unwrap_or(false)
            })
            .collect();
        archives.sort();
        while archives.len() > MAX_ARCHIVES {
            let oldest = archives.remove(0);
            let _ = std::fs::remove_file(oldest);
        }
    }
}

static LOGGER: OnceLock<DebugLogger> = OnceLock::new();

/// Shared logger instance. Construction reads NETPULSE_DEBUG exactly once.
pub fn get_debug_logger() -> &'static DebugLogger {
    LOGGER.get_or_init(DebugLogger::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_logger_is_noop() {
        let logger = DebugLogger {
            enabled: false,
            log_path: std::env::temp_dir().join("netpulse-test-never-written.jsonl"),
            write_count: AtomicU32::new(0),
        };
        logger.debug("Test", "should not be written");
        assert!(!logger.log_path.exists());
    }

    #[test]
    fn enabled_logger_writes_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debug.jsonl");
        let logger = DebugLogger {
            enabled: true,
            log_path: path.clone(),
            write_count: AtomicU32::new(0),
        };
        logger.info("PingWorker", "sample committed");
        logger.warn("Repository", "counter clamped");

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["level"], "INFO");
        assert_eq!(first["component"], "PingWorker");
    }
}
