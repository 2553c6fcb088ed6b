use indicatif::{HumanBytes, HumanDuration};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters shared by all workers of one upload phase.
#[derive(Debug, Default)]
pub struct CycleStats {
    uploaded: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    uploaded_bytes: AtomicU64,
}

impl CycleStats {
    /// Returns the new uploaded count.
    pub fn add_uploaded(&self, bytes: u64) -> u64 {
        self.uploaded_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.uploaded.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the new skipped count.
    pub fn add_skipped(&self) -> u64 {
        self.skipped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add_failed(&self) -> u64 {
        self.failed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self, candidates: usize, elapsed: Duration) -> CycleReport {
        CycleReport {
            candidates,
            uploaded: self.uploaded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            uploaded_bytes: self.uploaded_bytes.load(Ordering::Relaxed),
            elapsed,
        }
    }
}

/// Outcome of one scan/upload pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub candidates: usize,
    pub uploaded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub uploaded_bytes: u64,
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn accumulate(&mut self, other: &CycleReport) {
        self.candidates += other.candidates;
        self.uploaded += other.uploaded;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.uploaded_bytes += other.uploaded_bytes;
        self.elapsed += other.elapsed;
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} files uploaded (+ {} skipped, {} failed) of {} candidates, ",
            self.uploaded, self.skipped, self.failed, self.candidates
        )?;
        write!(
            f,
            "{} ({} bytes) in {} ({} s)",
            HumanBytes(self.uploaded_bytes),
            self.uploaded_bytes,
            HumanDuration(self.elapsed),
            self.elapsed.as_secs()
        )
    }
}
