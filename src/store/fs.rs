use super::{validate_container_name, ObjectStore, StoreError};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Object store backed by a local directory: the connection root plays the
/// account, the container is a subdirectory, and keys map to relative paths.
pub struct FsObjectStore {
    root: PathBuf,
    container: String,
    temp_counter: AtomicU64,
}

impl FsObjectStore {
    pub fn new(root: PathBuf, container: &str) -> Result<Self, StoreError> {
        validate_container_name(container)?;
        Ok(Self {
            root,
            container: container.to_string(),
            temp_counter: AtomicU64::new(0),
        })
    }

    pub fn container_dir(&self) -> PathBuf {
        self.root.join(&self.container)
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let well_formed = !key.is_empty()
            && !key.ends_with('/')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !well_formed {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.container_dir().join(relative))
    }

    fn temp_path(&self, target: &Path) -> PathBuf {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let mut name = target
            .file_name()
            .map(|f| f.to_os_string())
            .unwrap_or_default();
        name.push(format!(".partial-{}-{}", std::process::id(), n));
        target.with_file_name(name)
    }
}

impl ObjectStore for FsObjectStore {
    fn ensure_container(&self) -> Result<(), StoreError> {
        let dir = self.container_dir();
        match fs::create_dir_all(&dir) {
            Ok(()) => {
                debug!("Container directory {} is ready", dir.display());
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                Err(StoreError::Unauthorized(self.container.clone()))
            }
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    fn put(&self, key: &str, content: &mut dyn Read, len: u64) -> Result<String, StoreError> {
        let target = self.object_path(key)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp = self.temp_path(&target);
        let result = write_and_hash(&temp, content);
        let (written, digest) = match result {
            Ok(v) => v,
            Err(err) => {
                let _ = fs::remove_file(&temp);
                return Err(StoreError::Io(err));
            }
        };

        if written != len {
            let _ = fs::remove_file(&temp);
            return Err(StoreError::ShortWrite {
                key: key.to_string(),
                written,
                expected: len,
            });
        }

        if let Err(err) = fs::rename(&temp, &target) {
            let _ = fs::remove_file(&temp);
            return Err(StoreError::Io(err));
        }
        trace!("Stored {} bytes at {}", written, target.display());
        Ok(digest)
    }

    fn delete_if_exists(&self, key: &str) -> Result<bool, StoreError> {
        let target = self.object_path(key)?;
        match fs::remove_file(&target) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    fn object_uri(&self, key: &str) -> String {
        format!("file://{}/{}", self.container_dir().display(), key)
    }
}

fn write_and_hash(path: &Path, content: &mut dyn Read) -> io::Result<(u64, String)> {
    let mut out = BufWriter::new(File::create(path)?);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut written = 0u64;

    loop {
        let n = match content.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        out.write_all(&buffer[..n])?;
        hasher.update(&buffer[..n]);
        written += n as u64;
    }

    out.flush()?;
    out.get_ref().sync_all()?;
    Ok((written, hasher.finalize().to_hex().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_put_returns_content_digest() {
        let tmp = tempdir().unwrap();
        let store = FsObjectStore::new(tmp.path().to_path_buf(), "backups").unwrap();
        store.ensure_container().unwrap();

        let data = b"hello object store";
        let digest = store.put("a/b/c.txt", &mut &data[..], data.len() as u64).unwrap();

        assert_eq!(digest, blake3::hash(data).to_hex().to_string());
        let stored = fs::read(tmp.path().join("backups/a/b/c.txt")).unwrap();
        assert_eq!(stored, data);
    }

    #[test]
    fn test_put_rejects_length_mismatch_and_leaves_nothing_behind() {
        let tmp = tempdir().unwrap();
        let store = FsObjectStore::new(tmp.path().to_path_buf(), "backups").unwrap();
        store.ensure_container().unwrap();

        let data = b"short";
        let err = store.put("x.bin", &mut &data[..], 99).unwrap_err();
        assert!(matches!(err, StoreError::ShortWrite { written: 5, .. }));

        let leftovers: Vec<_> = fs::read_dir(store.container_dir()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_failed_rename_removes_partial_file() {
        let tmp = tempdir().unwrap();
        let store = FsObjectStore::new(tmp.path().to_path_buf(), "backups").unwrap();
        store.ensure_container().unwrap();
        // a non-empty directory already sits where the object should go
        let occupied = store.container_dir().join("reports/q1");
        fs::create_dir_all(&occupied).unwrap();
        fs::write(occupied.join("keep.txt"), "keep").unwrap();

        let data = b"payload";
        let err = store.put("reports/q1", &mut &data[..], data.len() as u64).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));

        let names: Vec<String> = fs::read_dir(store.container_dir().join("reports"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["q1"]);
    }

    #[test]
    fn test_keys_cannot_escape_container() {
        let tmp = tempdir().unwrap();
        let store = FsObjectStore::new(tmp.path().to_path_buf(), "backups").unwrap();
        for key in ["../evil", "/abs", "", "a/../../b", "dir/"] {
            assert!(
                matches!(store.put(key, &mut &b""[..], 0), Err(StoreError::InvalidKey(_))),
                "key {:?} should be rejected",
                key
            );
        }
    }

    #[test]
    fn test_delete_if_exists() {
        let tmp = tempdir().unwrap();
        let store = FsObjectStore::new(tmp.path().to_path_buf(), "backups").unwrap();
        store.ensure_container().unwrap();
        store.put("k", &mut &b"v"[..], 1).unwrap();

        assert!(store.delete_if_exists("k").unwrap());
        assert!(!store.delete_if_exists("k").unwrap());
    }
}
