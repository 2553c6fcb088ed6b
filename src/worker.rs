use crate::clock::{to_millis, Clock};
use crate::content::ContentSource;
use crate::error::Error;
use crate::ledger::Ledger;
use crate::queue::{Lane, WorkQueue};
use crate::scanner::CandidateFile;
use crate::stats::{CycleReport, CycleStats};
use crate::store::ObjectStore;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

const QUEUE_REPORT_EVERY: u64 = 1000;

/// Everything a worker needs besides the queue: where files come from,
/// where they go, and what has been uploaded before.
pub struct UploadContext<'a> {
    pub store: &'a dyn ObjectStore,
    pub ledger: &'a Ledger,
    pub clock: &'a dyn Clock,
    /// Canonical source root; object keys are relative to it.
    pub root: &'a Path,
    pub target_folder: Option<&'a str>,
    pub in_memory: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    Deferred,
    Skipped,
    Uploaded(u64),
}

struct Worker<'a, 'c> {
    ctx: &'a UploadContext<'c>,
    queue: &'a WorkQueue,
    stats: &'a CycleStats,
    total: usize,
}

/// Upload `candidates` with `threads` workers and wait for all of them.
///
/// The thread pool lives for this call only. Per-file failures are counted
/// in the report; the only error returned is failing to build the pool.
pub fn run_upload_pool(
    ctx: &UploadContext,
    candidates: Vec<CandidateFile>,
    threads: usize,
) -> Result<CycleReport, Error> {
    let start = Instant::now();
    let total = candidates.len();
    let queue = WorkQueue::new(candidates);
    let stats = CycleStats::default();
    let threads = threads.max(1);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("upload-{}", i))
        .build()?;

    info!(
        "Starting uploading {} files from {} using {} threads",
        total,
        ctx.root.display(),
        threads
    );

    let worker = Worker {
        ctx,
        queue: &queue,
        stats: &stats,
        total,
    };
    pool.scope(|scope| {
        for id in 0..threads {
            let worker = &worker;
            scope.spawn(move |_| worker.run(id));
        }
    });

    Ok(stats.snapshot(total, start.elapsed()))
}

impl Worker<'_, '_> {
    fn run(&self, id: usize) {
        let mut uploaded = 0u64;
        let mut uploaded_bytes = 0u64;

        while let Some((candidate, lane)) = self.queue.pop() {
            let path = candidate.path.clone();
            let result = panic::catch_unwind(AssertUnwindSafe(|| self.process(candidate, lane)));
            match result {
                Ok(Ok(FileOutcome::Uploaded(bytes))) => {
                    uploaded += 1;
                    uploaded_bytes += bytes;
                }
                Ok(Ok(FileOutcome::Skipped)) | Ok(Ok(FileOutcome::Deferred)) => {}
                Ok(Err(err)) => {
                    self.stats.add_failed();
                    warn!("Failed to upload file {}: {}", path.display(), err);
                }
                Err(_) => {
                    self.stats.add_failed();
                    error!("Worker {} panicked while processing {}", id, path.display());
                }
            }
        }

        info!(
            "Worker {} uploaded {} files of total size {}",
            id, uploaded, uploaded_bytes
        );
    }

    fn process(&self, candidate: CandidateFile, lane: Lane) -> Result<FileOutcome, Error> {
        let ledger = self.ctx.ledger;
        let key = candidate.path.to_string_lossy().into_owned();

        // known paths wait until every unknown file has been handled
        if lane == Lane::Primary && ledger.contains(&key) {
            trace!("Deferring {}", key);
            self.queue.defer(candidate);
            return Ok(FileOutcome::Deferred);
        }

        let metadata = fs::metadata(&candidate.path)?;
        let size = metadata.len();
        let modified = to_millis(metadata.modified()?);

        if ledger.was_uploaded(&key, size, modified, None) {
            let skipped = self.stats.add_skipped();
            info!(
                "Skipping file {}, it has been already uploaded ({} skipped)",
                key, skipped
            );
            return Ok(FileOutcome::Skipped);
        }

        let content = ContentSource::load(&candidate.path, self.ctx.in_memory)?;
        let digest = content.digest()?;

        if ledger.was_uploaded(&key, size, modified, Some(&digest)) {
            let skipped = self.stats.add_skipped();
            info!(
                "Skipping file {}, it has been already uploaded ({} skipped), checked by hash",
                key, skipped
            );
            return Ok(FileOutcome::Skipped);
        }

        let object_key = object_key(self.ctx.root, &candidate.path, self.ctx.target_folder)?;
        let store = self.ctx.store;
        let upload_start = Instant::now();

        let mut reader = content.open()?;
        let remote_digest = store.put(&object_key, reader.as_mut(), size)?;
        drop(reader);

        if !remote_digest.eq_ignore_ascii_case(&digest) {
            if let Err(err) = store.delete_if_exists(&object_key) {
                info!(
                    "Failed to delete broken object {}: {}",
                    store.object_uri(&object_key),
                    err
                );
            }
            return Err(Error::Integrity {
                key: store.object_uri(&object_key),
                expected: digest,
                actual: remote_digest,
            });
        }

        let uploaded = self.stats.add_uploaded(size);
        ledger.record(&key, size, &digest, self.ctx.clock.now_millis(), modified);

        let report = self.stats.snapshot(self.total, upload_start.elapsed());
        info!(
            "Uploaded file {} to {} in {} ms, {} of {} files done ({} skipped), {} bytes total",
            key,
            store.object_uri(&object_key),
            upload_start.elapsed().as_millis(),
            uploaded,
            self.total,
            report.skipped,
            report.uploaded_bytes
        );
        if uploaded % QUEUE_REPORT_EVERY == 0 {
            info!(
                "Files queue contains {} elements, deferred files queue contains {} elements",
                self.queue.primary_len(),
                self.queue.deferred_len()
            );
        }

        Ok(FileOutcome::Uploaded(size))
    }
}

/// Object key for `file`: its path relative to `root` with '/' separators,
/// joined under `target_folder` when one is set.
pub fn object_key(
    root: &Path,
    file: &Path,
    target_folder: Option<&str>,
) -> Result<String, Error> {
    let relative = file.strip_prefix(root).map_err(|_| {
        Error::Other(format!(
            "{} is not under source root {}",
            file.display(),
            root.display()
        ))
    })?;
    let relative = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    let raw = match target_folder.map(str::trim).filter(|t| !t.is_empty()) {
        Some(prefix) => format!("{}/{}", prefix, relative),
        None => relative,
    };

    match normalize_key(&raw) {
        Some(key) if !key.is_empty() => {
            debug!("Object key for {} is {}", file.display(), key);
            Ok(key)
        }
        _ => Err(Error::Other(format!("Cannot derive object key from '{}'", raw))),
    }
}

/// Collapse repeated separators and resolve `.` and `..`.
/// Returns `None` when `..` would climb above the top level.
fn normalize_key(raw: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for part in raw.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            part => parts.push(part),
        }
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_object_key_without_target() {
        let root = PathBuf::from("/data/src");
        let file = root.join("a").join("b.txt");
        assert_eq!(object_key(&root, &file, None).unwrap(), "a/b.txt");
        assert_eq!(object_key(&root, &file, Some("  ")).unwrap(), "a/b.txt");
    }

    #[test]
    fn test_object_key_with_target_folder() {
        let root = PathBuf::from("/data/src");
        let file = root.join("a").join("b.txt");
        assert_eq!(
            object_key(&root, &file, Some("backups/2024")).unwrap(),
            "backups/2024/a/b.txt"
        );
        assert_eq!(
            object_key(&root, &file, Some("/backups//nightly/./")).unwrap(),
            "backups/nightly/a/b.txt"
        );
        assert_eq!(
            object_key(&root, &file, Some("backups/old/../new")).unwrap(),
            "backups/new/a/b.txt"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_backslash_in_file_name_is_not_a_separator() {
        let root = PathBuf::from("/data/src");
        let odd = root.join("a\\b.txt");
        let nested = root.join("a").join("b.txt");
        assert_eq!(object_key(&root, &odd, None).unwrap(), "a\\b.txt");
        assert_eq!(
            object_key(&root, &odd, Some("mirror")).unwrap(),
            "mirror/a\\b.txt"
        );
        assert_ne!(
            object_key(&root, &odd, None).unwrap(),
            object_key(&root, &nested, None).unwrap()
        );
    }

    #[test]
    fn test_object_key_outside_root_fails() {
        let root = PathBuf::from("/data/src");
        assert!(object_key(&root, Path::new("/elsewhere/x"), None).is_err());
        assert!(object_key(&root, &root, None).is_err());
    }

    #[test]
    fn test_normalize_key_rejects_escape() {
        assert_eq!(normalize_key("../x"), None);
        assert_eq!(normalize_key("a/../../x"), None);
        assert_eq!(normalize_key("a/./b//c"), Some("a/b/c".to_string()));
    }
}
