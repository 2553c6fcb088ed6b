use super::{validate_container_name, ObjectStore, StoreError};
use dashmap::DashMap;
use std::collections::HashSet;
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Process-local object store. Used for dry runs (`memory://`) and by tests,
/// which can make it misreport digests or refuse writes for chosen keys.
pub struct MemoryObjectStore {
    container: String,
    objects: DashMap<String, Vec<u8>>,
    puts: AtomicUsize,
    deletes: AtomicUsize,
    container_ready: AtomicBool,
    unreachable: AtomicBool,
    corrupt_keys: Mutex<HashSet<String>>,
    failing_keys: Mutex<HashSet<String>>,
}

impl MemoryObjectStore {
    pub fn new(container: &str) -> Self {
        Self {
            container: container.to_string(),
            objects: DashMap::new(),
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            container_ready: AtomicBool::new(false),
            unreachable: AtomicBool::new(false),
            corrupt_keys: Mutex::new(HashSet::new()),
            failing_keys: Mutex::new(HashSet::new()),
        }
    }

    /// Report a wrong digest for every future write of `key`.
    pub fn corrupt_digest_for(&self, key: &str) {
        if let Ok(mut keys) = self.corrupt_keys.lock() {
            keys.insert(key.to_string());
        }
    }

    /// Fail every future write of `key`.
    pub fn fail_writes_for(&self, key: &str) {
        if let Ok(mut keys) = self.failing_keys.lock() {
            keys.insert(key.to_string());
        }
    }

    /// Make `ensure_container` fail as if the service could not be reached.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.get(key).map(|v| v.value().clone())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    fn key_in(set: &Mutex<HashSet<String>>, key: &str) -> bool {
        set.lock().map(|keys| keys.contains(key)).unwrap_or(false)
    }
}

impl ObjectStore for MemoryObjectStore {
    fn ensure_container(&self) -> Result<(), StoreError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!(
                "memory://{} is unreachable",
                self.container
            )));
        }
        validate_container_name(&self.container)?;
        self.container_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn put(&self, key: &str, content: &mut dyn Read, len: u64) -> Result<String, StoreError> {
        if !self.container_ready.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!(
                "container '{}' does not exist",
                self.container
            )));
        }
        if Self::key_in(&self.failing_keys, key) {
            return Err(StoreError::Unavailable(format!("write of '{}' refused", key)));
        }

        let mut data = Vec::with_capacity(len as usize);
        content.read_to_end(&mut data)?;
        if data.len() as u64 != len {
            return Err(StoreError::ShortWrite {
                key: key.to_string(),
                written: data.len() as u64,
                expected: len,
            });
        }

        let mut hasher = blake3::Hasher::new();
        hasher.update(&data);
        if Self::key_in(&self.corrupt_keys, key) {
            hasher.update(b"corrupted in transit");
        }

        self.puts.fetch_add(1, Ordering::SeqCst);
        self.objects.insert(key.to_string(), data);
        Ok(hasher.finalize().to_hex().to_string())
    }

    fn delete_if_exists(&self, key: &str) -> Result<bool, StoreError> {
        let removed = self.objects.remove(key).is_some();
        if removed {
            self.deletes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed)
    }

    fn object_uri(&self, key: &str) -> String {
        format!("memory://{}/{}", self.container, key)
    }
}
