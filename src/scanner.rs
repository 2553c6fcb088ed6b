use crate::clock::to_millis;
use crate::error::Error;
use glob::Pattern;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

pub const DEFAULT_QUARANTINE: Duration = Duration::from_secs(60 * 60);

/// A file found eligible for upload in the current cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub size: u64,
    /// Modification time, milliseconds since the Unix epoch.
    pub modified: i64,
}

/// Files with one of these extensions that changed within `quarantine` of
/// now are assumed to still be written and are held back.
#[derive(Debug, Clone)]
pub struct FreshnessRule {
    pub extensions: Vec<String>,
    pub quarantine: Duration,
}

impl Default for FreshnessRule {
    fn default() -> Self {
        Self {
            extensions: vec!["xml".to_string()],
            quarantine: DEFAULT_QUARANTINE,
        }
    }
}

impl FreshnessRule {
    pub fn new(extensions: &[String], quarantine: Duration) -> Self {
        let extensions = extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Self {
            extensions,
            quarantine,
        }
    }

    pub fn is_hot(&self, file_name: &str, modified: SystemTime, now: SystemTime) -> bool {
        let lower = file_name.to_ascii_lowercase();
        let watched = self
            .extensions
            .iter()
            .any(|ext| lower.ends_with(&format!(".{}", ext)));
        if !watched {
            return false;
        }
        match now.duration_since(modified) {
            Ok(age) => age < self.quarantine,
            // modified in the future: certainly not settled yet
            Err(_) => true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub marker_file: Option<String>,
    pub freshness: FreshnessRule,
    pub ignore_patterns: Vec<String>,
}

#[derive(Debug)]
pub struct ScanResult {
    /// Canonical form of the scanned root; candidate paths live under it.
    pub root: PathBuf,
    pub files: Vec<CandidateFile>,
    pub skipped: usize,
    pub duration: Duration,
}

/// Walk `root` and collect every regular file that is ready for upload.
///
/// Symlinks are not followed. Entries that cannot be read are logged and
/// skipped; only an unreadable root is an error.
pub fn scan_ready_files(
    root: &Path,
    options: &ScanOptions,
    now: SystemTime,
) -> Result<ScanResult, Error> {
    let start = Instant::now();
    let root = fs::canonicalize(root)?;
    if !root.is_dir() {
        return Err(Error::Other(format!(
            "Source {} is not a directory",
            root.display()
        )));
    }
    info!("Going to scan source folder {}", root.display());

    let ignore_patterns = compile_patterns(&options.ignore_patterns);
    let marker = options
        .marker_file
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty());
    let mut marker_dirs: HashMap<PathBuf, bool> = HashMap::new();

    let mut files = Vec::new();
    let mut skipped = 0usize;

    let walker = WalkDir::new(&root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !ignore_patterns
                    .iter()
                    .any(|pattern| pattern.matches_path(entry.path()))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable entry during scan: {}", err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let file_name = entry.file_name().to_string_lossy();

        if marker.is_some_and(|m| file_name == m) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!("Skipping {}: {}", path.display(), err);
                skipped += 1;
                continue;
            }
        };
        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(err) => {
                warn!("Skipping {}, no modification time: {}", path.display(), err);
                skipped += 1;
                continue;
            }
        };

        if options.freshness.is_hot(&file_name, modified, now) {
            info!(
                "Skipped uploading {}, it was modified less than {:?} ago",
                path.display(),
                options.freshness.quarantine
            );
            skipped += 1;
            continue;
        }

        if let Some(marker) = marker {
            if !has_marker_ancestor(path, &root, marker, &mut marker_dirs) {
                debug!("Skipping {}, no {} marker above it", path.display(), marker);
                skipped += 1;
                continue;
            }
        }

        files.push(CandidateFile {
            path: path.to_path_buf(),
            size: metadata.len(),
            modified: to_millis(modified),
        });
    }

    let duration = start.elapsed();
    info!(
        "Found {} files in folder {} using marker file {:?} (skipped {} files), it took {} ms",
        files.len(),
        root.display(),
        marker,
        skipped,
        duration.as_millis()
    );

    Ok(ScanResult {
        root,
        files,
        skipped,
        duration,
    })
}

fn compile_patterns(globs: &[String]) -> Vec<Pattern> {
    globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect()
}

/// True when any directory from the file's parent up to `root` holds `marker`.
fn has_marker_ancestor(
    file: &Path,
    root: &Path,
    marker: &str,
    cache: &mut HashMap<PathBuf, bool>,
) -> bool {
    for dir in file.ancestors().skip(1) {
        let present = *cache
            .entry(dir.to_path_buf())
            .or_insert_with(|| dir.join(marker).is_file());
        if present {
            return true;
        }
        if dir == root {
            break;
        }
    }
    false
}
