pub mod normalize;

use std::io;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::model::{ClassGroup, RosterEntry, StudentEntry};
use crate::notify::{NotifyHub, ServerEvent};
use crate::snapshot::SnapshotFile;

use self::normalize::{normalize_classes, normalize_users};

pub const USERS_CACHE_FILE: &str = "users_cache.json";
pub const STUDENTS_CACHE_FILE: &str = "students_cache.json";
pub const CLASSES_CACHE_FILE: &str = "classes_cache.json";

/// One consistent view of the three cache partitions. Never mutated in
/// place; a push builds the next value and swaps it in.
#[derive(Debug, Clone)]
pub struct RosterSnapshot {
    pub staff: Arc<[RosterEntry]>,
    pub students: Arc<[StudentEntry]>,
    pub classes: Arc<[ClassGroup]>,
}

/// What a push changed. `None` means the partition was empty in the push
/// and the cached contents were kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub staff: Option<usize>,
    pub students: Option<usize>,
    pub classes: Option<usize>,
    pub skipped: usize,
}

/// Normalized staff, student and class caches fed by upstream pushes.
pub struct RosterCache {
    current: RwLock<Arc<RosterSnapshot>>,
    writer: Mutex<()>,
    users_file: SnapshotFile,
    students_file: SnapshotFile,
    classes_file: SnapshotFile,
    domain: String,
    notify: Arc<NotifyHub>,
}

impl RosterCache {
    pub fn open(data_dir: &Path, domain: impl Into<String>, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let users_file = SnapshotFile::new(data_dir.join(USERS_CACHE_FILE));
        let students_file = SnapshotFile::new(data_dir.join(STUDENTS_CACHE_FILE));
        let classes_file = SnapshotFile::new(data_dir.join(CLASSES_CACHE_FILE));

        let staff: Vec<RosterEntry> = users_file.load()?;
        let students: Vec<StudentEntry> = students_file.load()?;
        let classes: Vec<ClassGroup> = classes_file.load()?;
        info!(
            "roster cache loaded: {} staff, {} students, {} classes",
            staff.len(),
            students.len(),
            classes.len()
        );

        Ok(Self {
            current: RwLock::new(Arc::new(RosterSnapshot {
                staff: staff.into(),
                students: students.into(),
                classes: classes.into(),
            })),
            writer: Mutex::new(()),
            users_file,
            students_file,
            classes_file,
            domain: domain.into(),
            notify,
        })
    }

    pub async fn snapshot(&self) -> Arc<RosterSnapshot> {
        self.current.read().await.clone()
    }

    pub async fn teachers(&self) -> Arc<[RosterEntry]> {
        self.snapshot().await.staff.clone()
    }

    pub async fn students(&self) -> Arc<[StudentEntry]> {
        self.snapshot().await.students.clone()
    }

    pub async fn classes(&self) -> Arc<[ClassGroup]> {
        self.snapshot().await.classes.clone()
    }

    /// Staff member with the given identity, compared case-insensitively.
    pub async fn find_staff(&self, identity: &str) -> Option<RosterEntry> {
        let identity = identity.trim().to_lowercase();
        self.snapshot()
            .await
            .staff
            .iter()
            .find(|e| e.identity == identity)
            .cloned()
    }

    /// Normalize a user push and replace every non-empty partition.
    ///
    /// Each replaced partition is persisted before the swap; if a write fails
    /// the in-memory caches stay as they were. Staff is written first, and a
    /// failed students write puts the previous staff file back.
    pub async fn ingest_users(&self, raw: &[Value]) -> io::Result<SyncOutcome> {
        let parts = normalize_users(raw, &self.domain);
        let mut outcome = SyncOutcome {
            skipped: parts.skipped,
            ..SyncOutcome::default()
        };

        let _writer = self.writer.lock().await;
        let previous = self.snapshot().await;
        let mut next = previous.as_ref().clone();
        if !parts.staff.is_empty() {
            self.users_file.store(&parts.staff).await?;
            outcome.staff = Some(parts.staff.len());
            next.staff = parts.staff.into();
        }
        if !parts.students.is_empty() {
            if let Err(e) = self.students_file.store(&parts.students).await {
                if outcome.staff.is_some() {
                    if let Err(restore) = self.users_file.store(&previous.staff[..]).await {
                        error!("staff cache rollback failed, disk is ahead of memory: {restore}");
                    }
                }
                return Err(e);
            }
            outcome.students = Some(parts.students.len());
            next.students = parts.students.into();
        }

        if outcome.staff.is_none() && outcome.students.is_none() {
            warn!("user push of {} records had no admissible entries, caches kept", raw.len());
            metrics::counter!(crate::observability::ROSTER_SYNC_TOTAL, "kind" => "users", "outcome" => "kept")
                .increment(1);
            return Ok(outcome);
        }

        let next = Arc::new(next);
        *self.current.write().await = next.clone();
        if outcome.staff.is_some() {
            self.notify.send(ServerEvent::TeachersUpdated(next.staff.clone()));
        }
        if outcome.students.is_some() {
            self.notify.send(ServerEvent::StudentsUpdated(next.students.clone()));
        }

        metrics::counter!(crate::observability::ROSTER_SYNC_TOTAL, "kind" => "users", "outcome" => "replaced")
            .increment(1);
        info!(
            "user push applied: staff {:?}, students {:?}, {} skipped",
            outcome.staff, outcome.students, outcome.skipped
        );
        Ok(outcome)
    }

    /// Same replace-if-non-empty rule for class groups.
    pub async fn ingest_classes(&self, raw: &[Value]) -> io::Result<SyncOutcome> {
        let (classes, skipped) = normalize_classes(raw);
        let mut outcome = SyncOutcome {
            skipped,
            ..SyncOutcome::default()
        };
        if classes.is_empty() {
            warn!("class push of {} records had no usable entries, cache kept", raw.len());
            metrics::counter!(crate::observability::ROSTER_SYNC_TOTAL, "kind" => "classes", "outcome" => "kept")
                .increment(1);
            return Ok(outcome);
        }

        let _writer = self.writer.lock().await;
        self.classes_file.store(&classes).await?;
        outcome.classes = Some(classes.len());

        let mut next = self.snapshot().await.as_ref().clone();
        next.classes = classes.into();
        let next = Arc::new(next);
        *self.current.write().await = next.clone();
        self.notify.send(ServerEvent::ClassesUpdated(next.classes.clone()));

        metrics::counter!(crate::observability::ROSTER_SYNC_TOTAL, "kind" => "classes", "outcome" => "replaced")
            .increment(1);
        info!("class push applied: {} classes, {skipped} skipped", next.classes.len());
        Ok(outcome)
    }
}
