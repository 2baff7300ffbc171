use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A durable collection stored as one JSON document.
///
/// Every write replaces the whole document: the new content goes to a
/// sibling temp file, is fsynced, then renamed over the live file, so a
/// crash leaves either the previous or the new snapshot on disk, never a mix.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }

    /// Read the collection. A missing or empty file is an empty collection;
    /// unparseable content is an error.
    pub fn load<T: DeserializeOwned>(&self) -> io::Result<Vec<T>> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Serialize the collection. Cheap enough to run under the caller's lock.
    pub fn encode<T: Serialize>(items: &[T]) -> io::Result<Vec<u8>> {
        serde_json::to_vec_pretty(items).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Write pre-encoded bytes and atomically swap them in. Blocking.
    pub fn write_bytes(&self, bytes: &[u8]) -> io::Result<()> {
        let tmp = self.tmp_path();
        let result = (|| {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(bytes)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            fs::rename(&tmp, &self.path)
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    /// Encode and write on the blocking pool.
    pub async fn store<T: Serialize>(&self, items: &[T]) -> io::Result<()> {
        let bytes = Self::encode(items)?;
        let this = self.clone();
        let start = Instant::now();
        let result = tokio::task::spawn_blocking(move || this.write_bytes(&bytes))
            .await
            .map_err(|e| io::Error::other(format!("snapshot writer panicked: {e}")))?;
        metrics::histogram!(crate::observability::SNAPSHOT_WRITE_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: u32,
        name: String,
    }

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_snapshot");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn items(n: u32) -> Vec<Item> {
        (0..n).map(|id| Item { id, name: format!("item {id}") }).collect()
    }

    #[tokio::test]
    async fn store_and_load() {
        let file = SnapshotFile::new(tmp_path("store_and_load.json"));
        file.store(&items(3)).await.unwrap();
        let loaded: Vec<Item> = file.load().unwrap();
        assert_eq!(loaded, items(3));
        let _ = fs::remove_file(file.path());
    }

    #[test]
    fn load_missing_file_is_empty() {
        let file = SnapshotFile::new(tmp_path("missing.json"));
        let loaded: Vec<Item> = file.load().unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn load_blank_file_is_empty() {
        let path = tmp_path("blank.json");
        fs::write(&path, "  \n").unwrap();
        let loaded: Vec<Item> = SnapshotFile::new(&path).load().unwrap();
        assert!(loaded.is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn load_corrupt_file_fails() {
        let path = tmp_path("corrupt.json");
        fs::write(&path, "[{\"id\": 1, \"name\":").unwrap();
        let result: io::Result<Vec<Item>> = SnapshotFile::new(&path).load();
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rewrite_replaces_whole_collection() {
        let file = SnapshotFile::new(tmp_path("rewrite.json"));
        file.write_bytes(&SnapshotFile::encode(&items(10)).unwrap()).unwrap();
        file.write_bytes(&SnapshotFile::encode(&items(2)).unwrap()).unwrap();
        let loaded: Vec<Item> = file.load().unwrap();
        assert_eq!(loaded, items(2));
        assert!(!file.tmp_path().exists(), "temp file must not outlive the swap");
        let _ = fs::remove_file(file.path());
    }

    #[test]
    fn failed_write_keeps_previous_snapshot() {
        let path = tmp_path("keep_previous.json");
        let file = SnapshotFile::new(&path);
        file.write_bytes(&SnapshotFile::encode(&items(1)).unwrap()).unwrap();

        // Renaming onto a path whose parent does not exist fails.
        let broken = SnapshotFile::new(path.join("nested").join("x.json"));
        assert!(broken.write_bytes(b"[]").is_err());

        let loaded: Vec<Item> = file.load().unwrap();
        assert_eq!(loaded, items(1));
        let _ = fs::remove_file(&path);
    }
}
