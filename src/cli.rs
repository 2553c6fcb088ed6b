use blob_mirror::config::Overrides;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "blob-mirror")]
#[command(
    about = "Continuously mirror a local folder into an object store container",
    long_about = None
)]
pub struct Cli {
    /// Settings file location, otherwise app.* in the current folder is used
    #[arg(long)]
    pub config: Option<String>,

    /// Upload threads count
    #[arg(long)]
    pub threads: Option<i64>,

    /// Source folder to upload
    #[arg(long)]
    pub source: Option<String>,

    /// Target container
    #[arg(long)]
    pub container: Option<String>,

    /// Target folder inside the container
    #[arg(long)]
    pub target: Option<String>,

    /// Read each file into memory once instead of re-reading it for upload
    #[arg(long)]
    pub in_memory: bool,

    /// Append uploaded file info (path, hash, size, ...) to this log
    #[arg(long)]
    pub upload_log: Option<String>,

    /// Previously written upload log used to skip already uploaded files,
    /// may be the same file as --upload-log
    #[arg(long)]
    pub skip_uploaded: Option<String>,

    /// Marker file name; a folder holding it is ready for upload
    #[arg(long)]
    pub folder_ready_marker_file: Option<String>,
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            threads: self.threads,
            source: self.source.clone(),
            container: self.container.clone(),
            target_folder: self.target.clone(),
            in_memory: self.in_memory,
            upload_log: self.upload_log.clone(),
            skip_uploaded: self.skip_uploaded.clone(),
            folder_ready_marker_file: self.folder_ready_marker_file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_command_line() {
        let cli = Cli::parse_from([
            "blob-mirror",
            "--threads",
            "8",
            "--source",
            "/data/export",
            "--container",
            "exports",
            "--target",
            "daily",
            "--in-memory",
            "--upload-log",
            "upload.csv",
            "--skip-uploaded",
            "upload.csv",
            "--folder-ready-marker-file",
            "_READY",
        ]);
        let overrides = cli.overrides();
        assert_eq!(overrides.threads, Some(8));
        assert_eq!(overrides.target_folder.as_deref(), Some("daily"));
        assert!(overrides.in_memory);
        assert_eq!(overrides.folder_ready_marker_file.as_deref(), Some("_READY"));
    }

    #[test]
    fn test_omitted_flags_leave_overrides_empty() {
        let cli = Cli::parse_from(["blob-mirror"]);
        let overrides = cli.overrides();
        assert!(overrides.threads.is_none());
        assert!(!overrides.in_memory);
        assert!(cli.config.is_none());
    }
}
