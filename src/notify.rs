use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::{ClassGroup, Incident, Reservation, RosterEntry, StudentEntry};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Incident register state pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentState {
    pub incidents: Arc<[Incident]>,
    pub active_count: usize,
}

/// Server → client push. Every variant carries the complete collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    BookingsUpdated(Arc<[Reservation]>),
    IncidentsUpdated(IncidentState),
    TeachersUpdated(Arc<[RosterEntry]>),
    StudentsUpdated(Arc<[StudentEntry]>),
    ClassesUpdated(Arc<[ClassGroup]>),
}

impl ServerEvent {
    pub fn label(&self) -> &'static str {
        match self {
            ServerEvent::BookingsUpdated(_) => "bookings_updated",
            ServerEvent::IncidentsUpdated(_) => "incidents_updated",
            ServerEvent::TeachersUpdated(_) => "teachers_updated",
            ServerEvent::StudentsUpdated(_) => "students_updated",
            ServerEvent::ClassesUpdated(_) => "classes_updated",
        }
    }
}

/// Fan-out hub for live subscribers.
///
/// Each subscriber reads from its own bounded position in a broadcast ring.
/// Publishing never waits: a subscriber that falls more than `capacity`
/// messages behind loses the oldest ones and observes a lag, after which it
/// only needs the next full-state push.
pub struct NotifyHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl NotifyHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Publish to every subscriber. No-op if nobody is listening.
    pub fn send(&self, event: ServerEvent) {
        let label = event.label();
        match self.sender.send(event) {
            Ok(n) => tracing::debug!("broadcast {label} to {n} subscribers"),
            Err(_) => tracing::trace!("broadcast {label}: no subscribers"),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
