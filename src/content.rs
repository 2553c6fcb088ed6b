use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

/// Where a worker reads file content from for hashing and upload.
///
/// `InMemory` reads the file once and serves both passes from the buffer;
/// `OnDisk` reopens the file for each pass and keeps memory flat for large files.
pub enum ContentSource {
    InMemory(Vec<u8>),
    OnDisk(PathBuf),
}

impl ContentSource {
    pub fn load(path: &Path, in_memory: bool) -> io::Result<Self> {
        if in_memory {
            let mut buffer = Vec::new();
            File::open(path)?.read_to_end(&mut buffer)?;
            Ok(ContentSource::InMemory(buffer))
        } else {
            Ok(ContentSource::OnDisk(path.to_path_buf()))
        }
    }

    pub fn open(&self) -> io::Result<Box<dyn Read + '_>> {
        match self {
            ContentSource::InMemory(buffer) => Ok(Box::new(buffer.as_slice())),
            ContentSource::OnDisk(path) => Ok(Box::new(BufReader::new(File::open(path)?))),
        }
    }

    /// Hex blake3 digest of the whole content.
    pub fn digest(&self) -> io::Result<String> {
        match self {
            ContentSource::InMemory(buffer) => Ok(blake3::hash(buffer).to_hex().to_string()),
            ContentSource::OnDisk(_) => {
                let mut hasher = blake3::Hasher::new();
                io::copy(&mut self.open()?, &mut hasher)?;
                Ok(hasher.finalize().to_hex().to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_memory_and_disk_digests_agree() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("payload.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &data).unwrap();

        let on_disk = ContentSource::load(&path, false).unwrap();
        let in_memory = ContentSource::load(&path, true).unwrap();

        let expected = blake3::hash(&data).to_hex().to_string();
        assert_eq!(on_disk.digest().unwrap(), expected);
        assert_eq!(in_memory.digest().unwrap(), expected);
    }

    #[test]
    fn test_open_can_be_repeated() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("f.txt");
        fs::write(&path, "abc").unwrap();
        let source = ContentSource::load(&path, false).unwrap();

        for _ in 0..2 {
            let mut s = String::new();
            source.open().unwrap().read_to_string(&mut s).unwrap();
            assert_eq!(s, "abc");
        }
    }

    #[test]
    fn test_load_in_memory_missing_file_errors() {
        let tmp = tempdir().unwrap();
        assert!(ContentSource::load(&tmp.path().join("nope"), true).is_err());
    }
}
