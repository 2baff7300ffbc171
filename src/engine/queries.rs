use std::sync::Arc;

use crate::model::*;

use super::Engine;

impl Engine {
    /// Full collection in store order. Filtering is left to clients.
    pub async fn list(&self) -> Vec<Reservation> {
        self.bookings.read().await.records().to_vec()
    }

    /// Shared copy of the collection, as pushed to live subscribers.
    pub async fn snapshot(&self) -> Arc<[Reservation]> {
        self.bookings.read().await.records().into()
    }

    pub async fn get(&self, id: &ReservationId) -> Option<Reservation> {
        self.bookings.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.bookings.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Audit history, newest first.
    pub async fn history(&self) -> Vec<AuditEntry> {
        self.audit.list().await
    }
}
