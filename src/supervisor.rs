use crate::clock::Clock;
use crate::config::Settings;
use crate::error::Error;
use crate::ledger::Ledger;
use crate::scanner;
use crate::stats::CycleReport;
use crate::store::ObjectStore;
use crate::worker::{run_upload_pool, UploadContext};
use colored::*;
use indicatif::HumanDuration;
use std::path::Path;
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// The cycle failed and the failure backoff has already been slept.
    Abandoned,
}

/// Outer scan/upload loop.
///
/// Each cycle scans the source, uploads what is new, and logs totals. Cycles
/// are throttled to one per scan interval, and a failed cycle is retried
/// after the failure backoff. Only fatal errors end the loop.
pub struct Supervisor {
    settings: Settings,
    store: Arc<dyn ObjectStore>,
    ledger: Ledger,
    clock: Arc<dyn Clock>,
    last_scan_finished: Option<SystemTime>,
    totals: CycleReport,
    cycles: u64,
}

impl Supervisor {
    pub fn new(
        settings: Settings,
        store: Arc<dyn ObjectStore>,
        ledger: Ledger,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            store,
            ledger,
            clock,
            last_scan_finished: None,
            totals: CycleReport::default(),
            cycles: 0,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Totals across every completed cycle of this process.
    pub fn totals(&self) -> &CycleReport {
        &self.totals
    }

    /// Run cycles until a fatal error occurs.
    pub fn run(&mut self) -> Result<(), Error> {
        loop {
            self.tick()?;
        }
    }

    /// One supervised cycle: throttle, run, and absorb non-fatal failures.
    pub fn tick(&mut self) -> Result<CycleOutcome, Error> {
        self.wait_for_next_scan();
        self.cycles += 1;

        match self.run_cycle() {
            Ok(report) => {
                self.totals.accumulate(&report);
                info!(
                    "Cycle {} finished: {}",
                    self.cycles,
                    report.to_string().green()
                );
                info!(
                    "Finished uploading {} files (+ {} skipped) of total size {} bytes since start",
                    self.totals.uploaded.to_string().cyan(),
                    self.totals.skipped,
                    self.totals.uploaded_bytes
                );
                Ok(CycleOutcome::Completed(report))
            }
            Err(err) if err.is_fatal() => {
                error!("Cycle {} failed and cannot be retried: {}", self.cycles, err);
                Err(err)
            }
            Err(err) => {
                let backoff = self.settings.failure_backoff();
                warn!(
                    "Something bad happened in cycle {}, retrying in {}: {}",
                    self.cycles,
                    HumanDuration(backoff),
                    err.to_string().red()
                );
                self.clock.sleep(backoff);
                Ok(CycleOutcome::Abandoned)
            }
        }
    }

    fn wait_for_next_scan(&self) {
        let Some(finished) = self.last_scan_finished else {
            return;
        };
        let interval = self.settings.scan_interval();
        let since = self
            .clock
            .now()
            .duration_since(finished)
            .unwrap_or_default();
        if since < interval {
            let remaining = interval - since;
            info!("Sleeping {} before next scan...", HumanDuration(remaining));
            self.clock.sleep(remaining);
        }
    }

    /// Scan, enqueue, upload. Errors are returned untouched for `tick` to classify.
    pub fn run_cycle(&mut self) -> Result<CycleReport, Error> {
        let start = Instant::now();
        let scan = scanner::scan_ready_files(
            Path::new(&self.settings.source),
            &self.settings.scan_options(),
            self.clock.now(),
        )?;
        self.last_scan_finished = Some(self.clock.now());

        if scan.files.is_empty() {
            info!(
                "Specified source folder {} doesn't contain any files ready for upload",
                scan.root.display()
            );
            return Ok(CycleReport {
                elapsed: start.elapsed(),
                ..Default::default()
            });
        }

        if let Some(log_path) = self.settings.upload_log.as_deref() {
            if let Err(err) = self.ledger.attach_log(log_path) {
                warn!(
                    "Failed to open upload log {}, continuing without it: {}",
                    log_path.display(),
                    err
                );
            }
        }

        let result = self.upload(&scan.root, scan.files);
        self.ledger.detach_log();

        let mut report = result?;
        report.elapsed = start.elapsed();
        Ok(report)
    }

    fn upload(
        &self,
        root: &Path,
        files: Vec<scanner::CandidateFile>,
    ) -> Result<CycleReport, Error> {
        self.store.ensure_container()?;

        let ctx = UploadContext {
            store: self.store.as_ref(),
            ledger: &self.ledger,
            clock: self.clock.as_ref(),
            root,
            target_folder: self.settings.target_folder(),
            in_memory: self.settings.in_memory,
        };
        run_upload_pool(&ctx, files, self.settings.thread_count())
    }
}
