use std::cmp::Reverse;
use std::io;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::info;
use ulid::Ulid;

use crate::engine::{EngineError, now_ms};
use crate::limits::*;
use crate::model::{Actor, Incident, opt_station};
use crate::notify::{IncidentState, NotifyHub, ServerEvent};
use crate::snapshot::SnapshotFile;

pub const INCIDENTS_FILE: &str = "incidents.json";

/// An equipment problem as reported by a staff member.
///
/// The reporter comes either as a nested `reporter` object or as the flat
/// `teacherEmail`/`teacherName` pair older clients send.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "ReportBody")]
pub struct IncidentReport {
    pub resource: String,
    pub station: Option<u32>,
    pub description: String,
    pub reporter: Actor,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportBody {
    resource: String,
    #[serde(default, alias = "pcNumber", deserialize_with = "opt_station")]
    station: Option<u32>,
    description: String,
    #[serde(default)]
    reporter: Option<Actor>,
    #[serde(default)]
    teacher_email: Option<String>,
    #[serde(default)]
    teacher_name: Option<String>,
}

impl TryFrom<ReportBody> for IncidentReport {
    type Error = String;

    fn try_from(body: ReportBody) -> Result<Self, String> {
        let reporter = match (body.reporter, body.teacher_email) {
            (Some(actor), _) => actor,
            (None, Some(identity)) => Actor {
                name: body.teacher_name.unwrap_or_else(|| identity.clone()),
                identity,
            },
            (None, None) => return Err("missing field `reporter`".into()),
        };
        Ok(Self {
            resource: body.resource,
            station: body.station,
            description: body.description,
            reporter,
        })
    }
}

/// Register of reported equipment incidents, kept in its own snapshot.
pub struct IncidentLog {
    incidents: Mutex<Vec<Incident>>,
    file: SnapshotFile,
    notify: Arc<NotifyHub>,
}

fn active_count(incidents: &[Incident]) -> usize {
    incidents.iter().filter(|i| !i.is_resolved).count()
}

fn newest_first(incidents: &[Incident]) -> Vec<Incident> {
    let mut out: Vec<Incident> = incidents.iter().rev().cloned().collect();
    out.sort_by_key(|i| Reverse(i.timestamp_epoch_millis));
    out
}

impl IncidentLog {
    pub fn open(data_dir: &Path, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let file = SnapshotFile::new(data_dir.join(INCIDENTS_FILE));
        let incidents: Vec<Incident> = file.load()?;
        let active = active_count(&incidents);
        info!("incident register loaded: {} incidents, {active} active", incidents.len());
        metrics::gauge!(crate::observability::INCIDENTS_ACTIVE).set(active as f64);
        Ok(Self {
            incidents: Mutex::new(incidents),
            file,
            notify,
        })
    }

    pub async fn list(&self) -> Vec<Incident> {
        newest_first(&self.incidents.lock().await)
    }

    pub async fn active_count(&self) -> usize {
        active_count(&self.incidents.lock().await)
    }

    pub async fn state(&self) -> IncidentState {
        let guard = self.incidents.lock().await;
        IncidentState {
            incidents: newest_first(&guard).into(),
            active_count: active_count(&guard),
        }
    }

    pub async fn report(&self, report: IncidentReport) -> Result<Incident, EngineError> {
        let resource = report.resource.trim();
        let description = report.description.trim();
        if resource.is_empty() || description.is_empty() {
            return Err(EngineError::validation("incident needs a resource and a description"));
        }
        if resource.len() > MAX_NAME_LEN || description.len() > MAX_TEXT_LEN {
            return Err(EngineError::LimitExceeded("incident text too long"));
        }
        if report.reporter.identity.trim().is_empty() {
            return Err(EngineError::validation("incident reporter is required"));
        }
        if let Some(station) = report.station
            && !(1..=MAX_STATION_ID).contains(&station)
        {
            return Err(EngineError::validation(format!("station {station} out of range")));
        }

        let incident = Incident {
            id: Ulid::new().to_string(),
            resource: resource.to_string(),
            station: report.station,
            description: description.to_string(),
            reporter_identity: report.reporter.identity,
            reporter_name: report.reporter.name,
            is_resolved: false,
            timestamp_epoch_millis: now_ms(),
        };

        let mut guard = self.incidents.lock().await;
        if guard.len() >= MAX_INCIDENTS {
            return Err(EngineError::LimitExceeded("too many incidents"));
        }
        let mut next = guard.clone();
        next.push(incident.clone());
        self.commit(&mut guard, next).await?;

        info!("incident {} reported on {}", incident.id, incident.resource);
        Ok(incident)
    }

    pub async fn set_resolved(&self, id: &str, resolved: bool) -> Result<Incident, EngineError> {
        let mut guard = self.incidents.lock().await;
        let mut next = guard.clone();
        let incident = next
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        incident.is_resolved = resolved;
        let updated = incident.clone();
        self.commit(&mut guard, next).await?;

        info!("incident {id} marked {}", if resolved { "resolved" } else { "open" });
        Ok(updated)
    }

    async fn commit(
        &self,
        guard: &mut tokio::sync::MutexGuard<'_, Vec<Incident>>,
        next: Vec<Incident>,
    ) -> Result<(), EngineError> {
        self.file.store(&next).await?;
        **guard = next;
        let active = active_count(guard.as_slice());
        metrics::gauge!(crate::observability::INCIDENTS_ACTIVE).set(active as f64);
        self.notify.send(ServerEvent::IncidentsUpdated(IncidentState {
            incidents: newest_first(guard.as_slice()).into(),
            active_count: active,
        }));
        Ok(())
    }
}
