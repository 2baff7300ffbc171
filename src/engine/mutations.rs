use tracing::{debug, info};

use crate::limits::*;
use crate::model::*;

use super::conflict::{
    check_batch, check_no_conflict, now_ms, validate_draft, validate_seating,
    validate_station_incidents,
};
use super::recurrence::expand_weekly;
use super::{Engine, EngineError, SeriesCascade};

fn creation_entry(template: &ReservationTemplate, actor: &Actor, now: Ms, count: usize) -> AuditEntry {
    let (action, mut details) = if template.is_blocked {
        let reason = template.block_reason.clone().unwrap_or_else(|| "blocked".into());
        (AuditAction::Blocked, reason)
    } else {
        let course = template.course_name.as_deref().unwrap_or_default();
        let subject = template.subject_label.as_deref().unwrap_or_default();
        (AuditAction::Created, format!("{course} - {subject}"))
    };
    if count > 1 {
        details.push_str(&format!(" ({count} reservations)"));
    }
    AuditEntry::new(action, actor, now, details)
}

fn deletion_details(target: &Reservation, removed: usize) -> String {
    if removed == 1 {
        format!(
            "Deleted reservation of {} on {} {}",
            target.requester_name, target.date, target.slot_id
        )
    } else {
        format!(
            "Deleted {removed} reservations of {} series {} {} {}",
            target.requester_name, target.slot_id, target.stage, target.resource
        )
    }
}

impl Engine {
    pub async fn create_one(&self, draft: ReservationDraft) -> Result<Reservation, EngineError> {
        validate_draft(&draft, self.calendar.as_ref())?;
        let key = draft.key();

        let mut guard = self.bookings.write().await;
        if guard.len() >= MAX_RESERVATIONS {
            return Err(EngineError::LimitExceeded("too many reservations"));
        }
        if let Err(e) = check_no_conflict(&guard, &key) {
            metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
            debug!("create rejected: {e}");
            return Err(e);
        }

        let now = now_ms();
        let entry = creation_entry(&draft.template, &draft.actor(), now, 1);
        let reservation = Reservation::from_draft(draft, now, entry.clone());

        let mut next = guard.clone();
        next.insert(reservation.clone());
        self.commit(&mut guard, next, Some(entry)).await?;

        info!("reservation {} created on {key}", reservation.id);
        Ok(reservation)
    }

    /// All-or-nothing create. Every candidate is checked against the store
    /// and against the rest of the batch before anything is written.
    pub async fn create_batch(
        &self,
        drafts: Vec<ReservationDraft>,
    ) -> Result<Vec<Reservation>, EngineError> {
        if drafts.is_empty() {
            return Ok(Vec::new());
        }
        if drafts.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        for draft in &drafts {
            validate_draft(draft, self.calendar.as_ref())?;
        }

        let mut guard = self.bookings.write().await;
        if guard.len() + drafts.len() > MAX_RESERVATIONS {
            return Err(EngineError::LimitExceeded("too many reservations"));
        }
        if let Err(e) = check_batch(&guard, &drafts) {
            metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
            debug!("batch of {} rejected: {e}", drafts.len());
            return Err(e);
        }

        let now = now_ms();
        let count = drafts.len();
        let entry = creation_entry(&drafts[0].template, &drafts[0].actor(), now, count);

        let mut next = guard.clone();
        let mut created = Vec::with_capacity(count);
        for draft in drafts {
            let own = creation_entry(&draft.template, &draft.actor(), now, 1);
            let reservation = Reservation::from_draft(draft, now, own);
            next.insert(reservation.clone());
            created.push(reservation);
        }
        self.commit(&mut guard, next, Some(entry)).await?;

        info!("batch of {count} reservations created");
        Ok(created)
    }

    /// Expand a weekly series and submit it as one batch.
    pub async fn create_recurring(
        &self,
        template: ReservationTemplate,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
        actor: Option<Actor>,
    ) -> Result<Vec<Reservation>, EngineError> {
        let mut drafts = expand_weekly(&template, start, end, self.calendar.as_ref())?;
        for draft in &mut drafts {
            draft.actor = actor.clone();
        }
        debug!("recurrence {start}..={end} expanded to {} dates", drafts.len());
        self.create_batch(drafts).await
    }

    /// Attach or replace the seating map and station incidents. Core fields
    /// are never touched. No audit entry is written.
    pub async fn update(
        &self,
        id: &ReservationId,
        patch: ReservationPatch,
    ) -> Result<Reservation, EngineError> {
        if let Some(seating) = &patch.seating_assignment {
            validate_seating(seating)?;
        }
        if let Some(incidents) = &patch.station_incidents {
            validate_station_incidents(incidents)?;
        }

        let mut guard = self.bookings.write().await;
        let mut next = guard.clone();
        let updated = next
            .modify(id, |r| {
                if let Some(seating) = patch.seating_assignment {
                    r.seating_assignment = Some(seating);
                }
                if let Some(incidents) = patch.station_incidents {
                    r.station_incidents = incidents;
                }
                r.clone()
            })
            .ok_or_else(|| EngineError::not_found(id))?;
        self.commit(&mut guard, next, None).await?;

        debug!("reservation {id} updated");
        Ok(updated)
    }

    /// Remove a reservation, and with `cascade_series` the rest of its series.
    /// A single DELETED entry is audited when an actor is given.
    pub async fn delete(
        &self,
        id: &ReservationId,
        actor: Option<Actor>,
        cascade_series: bool,
    ) -> Result<Vec<Reservation>, EngineError> {
        let mut guard = self.bookings.write().await;
        let target = guard.get(id).cloned().ok_or_else(|| EngineError::not_found(id))?;

        let scope = self.series_cascade;
        let mut next = guard.clone();
        let removed = next.remove_where(|r| {
            if r.id == target.id {
                return true;
            }
            cascade_series
                && r.same_series(&target)
                && (scope == SeriesCascade::All || r.date >= target.date)
        });

        let entry = actor.map(|a| {
            AuditEntry::new(AuditAction::Deleted, &a, now_ms(), deletion_details(&target, removed.len()))
        });
        self.commit(&mut guard, next, entry).await?;

        info!("deleted {} reservations starting from {id}", removed.len());
        Ok(removed)
    }
}
