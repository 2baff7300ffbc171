use std::cmp::Reverse;
use std::io;
use std::path::PathBuf;

use tokio::sync::Mutex;
use tracing::info;

use crate::model::AuditEntry;
use crate::snapshot::SnapshotFile;

/// Append-only, capped history of booking lifecycle events.
///
/// Lives in its own snapshot so entries outlive the reservations they
/// describe. Only the most recent `capacity` entries are kept.
pub struct AuditLog {
    entries: Mutex<Vec<AuditEntry>>,
    file: SnapshotFile,
    capacity: usize,
}

impl AuditLog {
    pub fn open(path: PathBuf, capacity: usize) -> io::Result<Self> {
        let file = SnapshotFile::new(path);
        let mut entries: Vec<AuditEntry> = file.load()?;
        trim_oldest(&mut entries, capacity);
        info!("audit log loaded: {} entries from {}", entries.len(), file.path().display());
        Ok(Self {
            entries: Mutex::new(entries),
            file,
            capacity,
        })
    }

    /// Append and persist the trimmed collection. On write failure the
    /// in-memory log is left unchanged.
    pub async fn append(&self, entry: AuditEntry) -> io::Result<()> {
        let mut guard = self.entries.lock().await;
        let mut next = guard.clone();
        next.push(entry);
        trim_oldest(&mut next, self.capacity);
        self.file.store(&next).await?;
        *guard = next;
        Ok(())
    }

    /// Entries newest first. Ties keep the later append first.
    pub async fn list(&self) -> Vec<AuditEntry> {
        let mut out: Vec<AuditEntry> = self.entries.lock().await.iter().rev().cloned().collect();
        out.sort_by_key(|e| Reverse(e.timestamp_epoch_millis));
        out
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn trim_oldest(entries: &mut Vec<AuditEntry>, capacity: usize) {
    if entries.len() > capacity {
        let excess = entries.len() - capacity;
        entries.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Actor, AuditAction};

    fn test_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_audit");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn entry(n: i64) -> AuditEntry {
        let actor = Actor { identity: "ana@school.test".into(), name: "Ana".into() };
        AuditEntry::new(AuditAction::Created, &actor, n, format!("entry {n}"))
    }

    #[tokio::test]
    async fn cap_drops_oldest_first() {
        let path = test_path("cap.json");
        let log = AuditLog::open(path.clone(), 1000).unwrap();
        for n in 0..1005 {
            log.append(entry(n)).await.unwrap();
        }
        assert_eq!(log.len().await, 1000);

        let listed = log.list().await;
        assert_eq!(listed.first().unwrap().timestamp_epoch_millis, 1004);
        assert_eq!(listed.last().unwrap().timestamp_epoch_millis, 5);

        // Persisted snapshot is trimmed as well
        let reopened = AuditLog::open(path.clone(), 1000).unwrap();
        assert_eq!(reopened.len().await, 1000);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let path = test_path("order.json");
        let log = AuditLog::open(path.clone(), 10).unwrap();
        log.append(entry(20)).await.unwrap();
        log.append(entry(10)).await.unwrap();
        log.append(entry(30)).await.unwrap();
        let ts: Vec<i64> = log.list().await.iter().map(|e| e.timestamp_epoch_millis).collect();
        assert_eq!(ts, vec![30, 20, 10]);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn same_timestamp_keeps_append_order_reversed() {
        let path = test_path("ties.json");
        let log = AuditLog::open(path.clone(), 10).unwrap();
        let mut a = entry(5);
        a.details = "first".into();
        let mut b = entry(5);
        b.details = "second".into();
        log.append(a).await.unwrap();
        log.append(b).await.unwrap();
        let listed = log.list().await;
        assert_eq!(listed[0].details, "second");
        assert_eq!(listed[1].details, "first");
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn oversized_snapshot_is_trimmed_on_open() {
        let path = test_path("oversized.json");
        let entries: Vec<AuditEntry> = (0..15).map(entry).collect();
        SnapshotFile::new(&path)
            .write_bytes(&SnapshotFile::encode(&entries).unwrap())
            .unwrap();
        let log = AuditLog::open(path.clone(), 10).unwrap();
        assert_eq!(log.len().await, 10);
        assert_eq!(log.list().await.last().unwrap().timestamp_epoch_millis, 5);
        let _ = std::fs::remove_file(&path);
    }
}
