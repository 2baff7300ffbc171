use std::collections::HashSet;

use crate::calendar::CalendarPredicate;
use crate::limits::*;
use crate::model::*;

use super::store::BookingTable;
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or_default()
}

fn non_empty(field: &'static str, value: Option<&str>) -> Result<(), EngineError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(()),
        _ => Err(EngineError::validation(format!("{field} is required"))),
    }
}

fn bounded(value: Option<&str>, max: usize, what: &'static str) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > max => Err(EngineError::LimitExceeded(what)),
        _ => Ok(()),
    }
}

/// Field-level checks of a single candidate, independent of stored state.
pub(crate) fn validate_draft(
    draft: &ReservationDraft,
    calendar: &dyn CalendarPredicate,
) -> Result<(), EngineError> {
    let t = &draft.template;
    if !calendar.is_bookable(draft.date) {
        return Err(EngineError::validation(format!("{} is not a bookable day", draft.date)));
    }
    if t.stage.slot(&t.slot_id).is_none() {
        return Err(EngineError::validation(format!(
            "slot {} does not exist for stage {}",
            t.slot_id, t.stage
        )));
    }
    if t.resource == Resource::Cart && t.stage != Stage::Secondary {
        return Err(EngineError::validation("the cart can only be reserved by secondary"));
    }
    non_empty("requesterIdentity", Some(t.requester_identity.as_str()))?;
    non_empty("requesterName", Some(t.requester_name.as_str()))?;
    bounded(Some(t.requester_identity.as_str()), MAX_NAME_LEN, "requester identity too long")?;
    bounded(Some(t.requester_name.as_str()), MAX_NAME_LEN, "requester name too long")?;

    if t.is_blocked {
        bounded(t.block_reason.as_deref(), MAX_TEXT_LEN, "block reason too long")?;
    } else {
        non_empty("courseName", t.course_name.as_deref())?;
        non_empty("subjectLabel", t.subject_label.as_deref())?;
        bounded(t.course_name.as_deref(), MAX_TEXT_LEN, "course name too long")?;
        bounded(t.subject_label.as_deref(), MAX_TEXT_LEN, "subject too long")?;
        bounded(t.activity_note.as_deref(), MAX_TEXT_LEN, "activity note too long")?;
    }
    if let Some(seating) = &t.seating_assignment {
        validate_seating(seating)?;
    }
    validate_station_incidents(&t.station_incidents)
}

pub(crate) fn validate_seating(seating: &SeatingAssignment) -> Result<(), EngineError> {
    for (station, students) in seating {
        if *station == 0 || *station > MAX_STATION_ID {
            return Err(EngineError::validation(format!("station {station} out of range")));
        }
        if students.is_empty() || students.len() > MAX_STUDENTS_PER_STATION {
            return Err(EngineError::validation(format!(
                "station {station} must seat 1 to {MAX_STUDENTS_PER_STATION} students"
            )));
        }
        if students.iter().any(|s| s.trim().is_empty()) {
            return Err(EngineError::validation(format!("station {station} has a blank student")));
        }
    }
    Ok(())
}

pub(crate) fn validate_station_incidents(incidents: &StationIncidents) -> Result<(), EngineError> {
    for (station, note) in incidents {
        if *station == 0 || *station > MAX_STATION_ID {
            return Err(EngineError::validation(format!("station {station} out of range")));
        }
        bounded(Some(note.as_str()), MAX_TEXT_LEN, "incident note too long")?;
    }
    Ok(())
}

pub(crate) fn check_no_conflict(table: &BookingTable, key: &SlotKey) -> Result<(), EngineError> {
    match table.holder(key) {
        Some(_) => Err(EngineError::Conflict(key.clone())),
        None => Ok(()),
    }
}

/// Every candidate must be free in the table and distinct from every other
/// candidate of the same batch.
pub(crate) fn check_batch(table: &BookingTable, drafts: &[ReservationDraft]) -> Result<(), EngineError> {
    let mut seen = HashSet::with_capacity(drafts.len());
    for draft in drafts {
        let key = draft.key();
        check_no_conflict(table, &key)?;
        if !seen.insert(key.clone()) {
            return Err(EngineError::Conflict(key));
        }
    }
    Ok(())
}
