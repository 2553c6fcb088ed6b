use std::io::{self, Read};
use std::path::PathBuf;
use thiserror::Error;

mod fs;
mod memory;

pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid object store address '{0}'")]
    Addressing(String),

    #[error("Access to container '{0}' denied")]
    Unauthorized(String),

    #[error("Invalid object key '{0}'")]
    InvalidKey(String),

    #[error("Upload of '{key}' wrote {written} bytes, expected {expected}")]
    ShortWrite {
        key: String,
        written: u64,
        expected: u64,
    },

    #[error("{0}")]
    Unavailable(String),
}

impl StoreError {
    /// Authentication and addressing problems will not fix themselves by waiting.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Addressing(_) | StoreError::Unauthorized(_))
    }
}

/// Minimal client surface the upload engine needs from a remote object store.
///
/// Keys are '/'-separated hierarchical paths inside one container. The engine
/// never retries a call; implementations that want retries do them internally.
pub trait ObjectStore: Send + Sync {
    /// Create the target container if it does not exist yet.
    fn ensure_container(&self) -> Result<(), StoreError>;

    /// Write `len` bytes from `content` under `key`, replacing any existing
    /// object. Returns the hex content digest as computed by the store.
    fn put(&self, key: &str, content: &mut dyn Read, len: u64) -> Result<String, StoreError>;

    /// Remove the object if present, returning whether anything was deleted.
    fn delete_if_exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Printable address of an object, for log messages.
    fn object_uri(&self, key: &str) -> String;
}

/// Build a store from a connection string.
///
/// Supported forms are `file://<directory>` and `memory://`.
pub fn connect(
    connection_string: &str,
    container: &str,
) -> Result<Box<dyn ObjectStore>, StoreError> {
    let connection_string = connection_string.trim();
    if let Some(dir) = connection_string.strip_prefix("file://") {
        if dir.is_empty() {
            return Err(StoreError::Addressing(connection_string.to_string()));
        }
        return Ok(Box::new(FsObjectStore::new(PathBuf::from(dir), container)?));
    }
    if connection_string == "memory://" {
        return Ok(Box::new(MemoryObjectStore::new(container)));
    }
    Err(StoreError::Addressing(connection_string.to_string()))
}

/// Container names follow the strictest common rules: lowercase letters,
/// digits and single dashes, 3 to 63 characters.
pub(crate) fn validate_container_name(name: &str) -> Result<(), StoreError> {
    let valid = (3..=63).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--");
    if valid {
        Ok(())
    } else {
        Err(StoreError::Addressing(format!("container name '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_rejects_unknown_scheme() {
        let err = connect("DefaultEndpointsProtocol=https;AccountName=x", "backups")
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_connect_rejects_empty_file_root() {
        assert!(matches!(
            connect("file://", "backups"),
            Err(StoreError::Addressing(_))
        ));
    }

    #[test]
    fn test_connect_memory() {
        let store = connect("memory://", "backups").unwrap();
        assert_eq!(store.object_uri("a/b.txt"), "memory://backups/a/b.txt");
    }

    #[test]
    fn test_container_name_rules() {
        assert!(validate_container_name("nightly-backups").is_ok());
        assert!(validate_container_name("ab").is_err());
        assert!(validate_container_name("Upper").is_err());
        assert!(validate_container_name("double--dash").is_err());
        assert!(validate_container_name("-leading").is_err());
    }
}
