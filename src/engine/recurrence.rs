use chrono::{Days, NaiveDate};

use crate::calendar::CalendarPredicate;
use crate::limits::MAX_RECURRENCE_SPAN_DAYS;
use crate::model::{ReservationDraft, ReservationTemplate};

use super::EngineError;

/// Expand a weekly series from `start` through `end` (inclusive).
///
/// Dates the calendar rejects are skipped. `end < start` yields an empty
/// series.
pub fn expand_weekly(
    template: &ReservationTemplate,
    start: NaiveDate,
    end: NaiveDate,
    calendar: &dyn CalendarPredicate,
) -> Result<Vec<ReservationDraft>, EngineError> {
    if end < start {
        return Ok(Vec::new());
    }
    if (end - start).num_days() > MAX_RECURRENCE_SPAN_DAYS {
        return Err(EngineError::LimitExceeded("recurrence span too long"));
    }

    let mut drafts = Vec::new();
    let mut date = start;
    while date <= end {
        if calendar.is_bookable(date) {
            drafts.push(template.on(date));
        }
        date = match date.checked_add_days(Days::new(7)) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(drafts)
}
