use crate::clock::format_millis;
use crate::error::Error;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One line of the upload log: a file that was uploaded and verified.
///
/// Field order is the on-disk column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub path: String,
    pub hash: String,
    pub size: u64,
    pub uploaded: i64,
    pub last_modification: i64,
}

/// Dedup index of previously uploaded files, keyed on absolute local path.
///
/// Shared by every worker of a cycle. Entries are only ever added or
/// replaced; the optional log writer persists each `record` as it happens.
pub struct Ledger {
    entries: DashMap<String, LedgerEntry>,
    log: Mutex<Option<csv::Writer<File>>>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            log: Mutex::new(None),
        }
    }

    /// Seed a ledger from a previously written upload log.
    ///
    /// A missing file yields an empty ledger. Lines that do not parse are
    /// skipped with a warning; later lines replace earlier ones for the same path.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let ledger = Ledger::new();
        if !path.exists() {
            info!("Upload log {} does not exist yet, starting empty", path.display());
            return Ok(ledger);
        }

        let start = Instant::now();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)?;

        let mut skipped = 0usize;
        for (line, result) in reader.records().enumerate() {
            let record = match result {
                Ok(record) => record,
                Err(err) if err.is_io_error() => return Err(err.into()),
                Err(err) => {
                    warn!("Failed to read upload log line {}: {}", line + 1, err);
                    skipped += 1;
                    continue;
                }
            };
            match record.deserialize::<LedgerEntry>(None) {
                Ok(entry) => {
                    ledger.entries.insert(entry.path.clone(), entry);
                }
                Err(err) => {
                    warn!(
                        "Failed to parse upload log line {} {:?}: {}",
                        line + 1,
                        record.iter().collect::<Vec<_>>(),
                        err
                    );
                    skipped += 1;
                }
            }
        }

        info!(
            "Read {} upload log items from {} in {} ms ({} malformed lines skipped)",
            ledger.len(),
            path.display(),
            start.elapsed().as_millis(),
            skipped
        );
        Ok(ledger)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<LedgerEntry> {
        self.entries.get(path).map(|e| e.value().clone())
    }

    /// Whether the file at `path` is known to be uploaded already.
    ///
    /// With a hash the comparison is content-based (hash and size); without
    /// one it falls back to size and modification time.
    pub fn was_uploaded(&self, path: &str, size: u64, mtime: i64, hash: Option<&str>) -> bool {
        let Some(entry) = self.entries.get(path) else {
            return false;
        };

        let matched = match hash.filter(|h| !h.trim().is_empty()) {
            Some(hash) => entry.hash.eq_ignore_ascii_case(hash) && entry.size == size,
            None => entry.last_modification == mtime && entry.size == size,
        };

        if matched {
            debug!(
                "File {} has been already uploaded on {}",
                path,
                format_millis(entry.uploaded)
            );
        }
        matched
    }

    /// Upsert the entry for `path` and append it to the attached upload log.
    pub fn record(&self, path: &str, size: u64, hash: &str, uploaded: i64, mtime: i64) {
        let entry = LedgerEntry {
            path: path.to_string(),
            hash: hash.to_string(),
            size,
            uploaded,
            last_modification: mtime,
        };

        match self.log.lock() {
            Ok(mut guard) => {
                if let Some(writer) = guard.as_mut() {
                    let written = writer.serialize(&entry).and_then(|_| {
                        writer.flush()?;
                        Ok(())
                    });
                    if let Err(err) = written {
                        warn!("Failed to save upload log item for file {}: {}", path, err);
                    }
                }
            }
            Err(err) => warn!("Upload log writer is unusable, not persisting {}: {}", path, err),
        }

        self.entries.insert(entry.path.clone(), entry);
    }

    /// Open `path` for appending and route subsequent `record` calls to it.
    ///
    /// On failure the ledger keeps working in memory only and the error is
    /// returned for the caller to log.
    pub fn attach_log(&self, path: &Path) -> Result<(), Error> {
        if path.exists() {
            info!("Upload log file {} already exists, appending it", path.display());
        } else if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        let mut guard = self
            .log
            .lock()
            .map_err(|e| Error::Other(format!("upload log lock poisoned: {}", e)))?;
        *guard = Some(writer);
        Ok(())
    }

    /// Flush and close the upload log, if one is attached.
    pub fn detach_log(&self) {
        let writer = match self.log.lock() {
            Ok(mut guard) => guard.take(),
            Err(err) => {
                warn!("Upload log lock poisoned while closing: {}", err);
                return;
            }
        };
        if let Some(mut writer) = writer {
            if let Err(err) = writer.flush() {
                warn!("Failed to flush upload log: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn ledger_with(path: &str, size: u64, hash: &str, mtime: i64) -> Ledger {
        let ledger = Ledger::new();
        ledger.record(path, size, hash, 1_000, mtime);
        ledger
    }

    #[test]
    fn test_unknown_path_is_not_uploaded() {
        let ledger = ledger_with("/data/a.txt", 10, "abc", 5);
        assert!(!ledger.was_uploaded("/data/b.txt", 10, 5, None));
        assert!(!ledger.was_uploaded("/data/b.txt", 10, 5, Some("abc")));
    }

    #[test]
    fn test_metadata_check_needs_size_and_mtime() {
        let ledger = ledger_with("/data/a.txt", 10, "abc", 5);
        assert!(ledger.was_uploaded("/data/a.txt", 10, 5, None));
        assert!(!ledger.was_uploaded("/data/a.txt", 11, 5, None));
        assert!(!ledger.was_uploaded("/data/a.txt", 10, 6, None));
    }

    #[test]
    fn test_hash_check_ignores_mtime_but_not_size() {
        let ledger = ledger_with("/data/a.txt", 10, "abc", 5);
        assert!(ledger.was_uploaded("/data/a.txt", 10, 999, Some("abc")));
        assert!(ledger.was_uploaded("/data/a.txt", 10, 999, Some("ABC")));
        assert!(!ledger.was_uploaded("/data/a.txt", 10, 5, Some("abd")));
        assert!(!ledger.was_uploaded("/data/a.txt", 12, 5, Some("abc")));
    }

    #[test]
    fn test_blank_hash_falls_back_to_metadata() {
        let ledger = ledger_with("/data/a.txt", 10, "abc", 5);
        assert!(ledger.was_uploaded("/data/a.txt", 10, 5, Some("")));
        assert!(!ledger.was_uploaded("/data/a.txt", 10, 6, Some("  ")));
    }

    #[test]
    fn test_record_overwrites_previous_entry() {
        let ledger = ledger_with("/data/a.txt", 10, "abc", 5);
        ledger.record("/data/a.txt", 20, "def", 2_000, 6);
        assert_eq!(ledger.len(), 1);
        let entry = ledger.get("/data/a.txt").unwrap();
        assert_eq!(entry.size, 20);
        assert_eq!(entry.hash, "def");
        assert_eq!(entry.uploaded, 2_000);
    }

    #[test]
    fn test_log_round_trip_through_file() {
        let tmp = tempdir().unwrap();
        let log_path = tmp.path().join("logs/upload.csv");

        let ledger = Ledger::new();
        ledger.attach_log(&log_path).unwrap();
        ledger.record("/data/with,comma.txt", 3, "aa11", 100, 50);
        ledger.record("/data/b.txt", 4, "bb22", 101, 51);
        ledger.detach_log();

        let reloaded = Ledger::load(&log_path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(
            reloaded.get("/data/with,comma.txt").unwrap(),
            LedgerEntry {
                path: "/data/with,comma.txt".to_string(),
                hash: "aa11".to_string(),
                size: 3,
                uploaded: 100,
                last_modification: 50,
            }
        );
    }

    #[test]
    fn test_log_is_appended_across_attachments() {
        let tmp = tempdir().unwrap();
        let log_path = tmp.path().join("upload.csv");

        let ledger = Ledger::new();
        ledger.attach_log(&log_path).unwrap();
        ledger.record("/a", 1, "01", 1, 1);
        ledger.detach_log();
        ledger.attach_log(&log_path).unwrap();
        ledger.record("/b", 2, "02", 2, 2);
        ledger.detach_log();

        let contents = fs::read_to_string(&log_path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert_eq!(contents.lines().next().unwrap(), "/a,01,1,1,1");
    }

    #[test]
    fn test_load_skips_malformed_lines_and_keeps_latest() {
        let tmp = tempdir().unwrap();
        let log_path = tmp.path().join("upload.csv");
        fs::write(
            &log_path,
            "/a,01,1,10,5\nthis is not a log line\n/b,02,not-a-size,10,5\n/a,03,2,20,6\n",
        )
        .unwrap();

        let ledger = Ledger::load(&log_path).unwrap();
        assert_eq!(ledger.len(), 1);
        let entry = ledger.get("/a").unwrap();
        assert_eq!(entry.hash, "03");
        assert_eq!(entry.size, 2);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let tmp = tempdir().unwrap();
        let ledger = Ledger::load(&tmp.path().join("absent.csv")).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_record_without_log_only_updates_memory() {
        let ledger = Ledger::new();
        ledger.record("/a", 1, "01", 1, 1);
        assert!(ledger.contains("/a"));
    }
}
