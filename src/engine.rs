mod conflict;
mod error;
mod mutations;
mod queries;
mod recurrence;
mod store;
#[cfg(test)]
mod tests;

pub(crate) use conflict::now_ms;
pub use error::EngineError;
pub use recurrence::expand_weekly;
pub use store::BookingTable;

use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{error, info};

use crate::audit::AuditLog;
use crate::calendar::CalendarPredicate;
use crate::limits::AUDIT_CAPACITY;
use crate::model::*;
use crate::notify::{NotifyHub, ServerEvent};
use crate::snapshot::SnapshotFile;

pub const BOOKINGS_FILE: &str = "bookings.json";
pub const HISTORY_FILE: &str = "history.json";

/// Which reservations a cascading delete removes besides the target.
///
/// Both scopes match on requester, slot, stage, resource, course and block
/// flag; `Future` additionally ignores reservations dated before the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SeriesCascade {
    #[default]
    All,
    Future,
}

impl FromStr for SeriesCascade {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(SeriesCascade::All),
            "future" => Ok(SeriesCascade::Future),
            other => Err(format!("unknown series cascade scope: {other}")),
        }
    }
}

pub struct EngineOptions {
    pub data_dir: PathBuf,
    pub calendar: Arc<dyn CalendarPredicate>,
    pub notify: Arc<NotifyHub>,
    pub series_cascade: SeriesCascade,
}

/// The authoritative reservation store.
///
/// All mutations take the table's write lock for the whole
/// check → persist → apply → audit → broadcast sequence, so two requests
/// for the same key can never both pass the conflict check.
pub struct Engine {
    pub(super) bookings: RwLock<BookingTable>,
    pub(super) snapshot: SnapshotFile,
    pub(super) audit: AuditLog,
    pub(super) calendar: Arc<dyn CalendarPredicate>,
    pub notify: Arc<NotifyHub>,
    pub(super) series_cascade: SeriesCascade,
}

impl Engine {
    pub fn open(options: EngineOptions) -> io::Result<Self> {
        let snapshot = SnapshotFile::new(options.data_dir.join(BOOKINGS_FILE));
        let records: Vec<Reservation> = snapshot.load()?;
        let loaded = records.len();
        let table = BookingTable::from_records(records);
        let audit = AuditLog::open(options.data_dir.join(HISTORY_FILE), AUDIT_CAPACITY)?;

        info!(
            "booking store loaded: {} reservations ({} dropped) from {}",
            table.len(),
            loaded - table.len(),
            snapshot.path().display()
        );
        metrics::gauge!(crate::observability::RESERVATIONS_ACTIVE).set(table.len() as f64);

        Ok(Self {
            bookings: RwLock::new(table),
            snapshot,
            audit,
            calendar: options.calendar,
            notify: options.notify,
            series_cascade: options.series_cascade,
        })
    }

    /// Persist `next`, swap it in, record the audit entry and push the new
    /// state. The caller holds the write guard; nothing is applied unless the
    /// snapshot write succeeds.
    pub(super) async fn commit(
        &self,
        guard: &mut RwLockWriteGuard<'_, BookingTable>,
        next: BookingTable,
        audit: Option<AuditEntry>,
    ) -> Result<(), EngineError> {
        self.snapshot.store(next.records()).await?;
        **guard = next;
        metrics::gauge!(crate::observability::RESERVATIONS_ACTIVE).set(guard.len() as f64);

        if let Some(entry) = audit
            && let Err(e) = self.audit.append(entry).await
        {
            error!("audit append failed after committed booking change: {e}");
        }

        self.notify
            .send(ServerEvent::BookingsUpdated(guard.records().into()));
        Ok(())
    }
}
