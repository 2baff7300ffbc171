use std::collections::HashMap;

use tracing::warn;

use crate::model::*;

/// Ordered reservation collection with a natural-key index.
///
/// Records keep insertion order, which is also the order of the persisted
/// snapshot and of every broadcast.
#[derive(Debug, Clone, Default)]
pub struct BookingTable {
    records: Vec<Reservation>,
    by_key: HashMap<SlotKey, ReservationId>,
}

impl BookingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a loaded snapshot. If the snapshot holds two records for
    /// one key the first one wins and the rest are dropped.
    pub fn from_records(records: Vec<Reservation>) -> Self {
        let mut table = Self::new();
        for r in records {
            let key = r.key();
            if let Some(holder) = table.by_key.get(&key) {
                warn!("dropping reservation {} on load: {key} already held by {holder}", r.id);
                continue;
            }
            table.insert(r);
        }
        table
    }

    // ── Reads ────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Reservation] {
        &self.records
    }

    pub fn holder(&self, key: &SlotKey) -> Option<&ReservationId> {
        self.by_key.get(key)
    }

    pub fn get(&self, id: &ReservationId) -> Option<&Reservation> {
        self.position(id).map(|pos| &self.records[pos])
    }

    fn position(&self, id: &ReservationId) -> Option<usize> {
        self.records.iter().position(|r| &r.id == id)
    }

    // ── Writes (caller has already checked the key) ──────────

    pub fn insert(&mut self, reservation: Reservation) {
        debug_assert!(!self.by_key.contains_key(&reservation.key()));
        self.by_key.insert(reservation.key(), reservation.id.clone());
        self.records.push(reservation);
    }

    /// Run `f` on the record with `id`. Returns `None` if absent.
    pub fn modify<R>(&mut self, id: &ReservationId, f: impl FnOnce(&mut Reservation) -> R) -> Option<R> {
        let pos = self.position(id)?;
        Some(f(&mut self.records[pos]))
    }

    /// Remove every record matching `pred`, returning them in table order.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&Reservation) -> bool) -> Vec<Reservation> {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.records.len());
        for r in self.records.drain(..) {
            if pred(&r) {
                removed.push(r);
            } else {
                kept.push(r);
            }
        }
        self.records = kept;
        for r in &removed {
            self.by_key.remove(&r.key());
        }
        removed
    }
}
