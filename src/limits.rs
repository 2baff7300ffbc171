/// Max candidates accepted in one batch create.
pub const MAX_BATCH_SIZE: usize = 512;

/// Max span of a weekly recurrence (53 weeks, one school year plus slack).
pub const MAX_RECURRENCE_SPAN_DAYS: i64 = 371;

/// Max reservations held by one store.
pub const MAX_RESERVATIONS: usize = 100_000;

/// Audit log keeps only the most recent entries.
pub const AUDIT_CAPACITY: usize = 1000;

/// Max length of identities and display names.
pub const MAX_NAME_LEN: usize = 256;

/// Max length of descriptive fields (course, subject, note, block reason, incidents).
pub const MAX_TEXT_LEN: usize = 2048;

/// Highest station number in a seating map.
pub const MAX_STATION_ID: u32 = 64;

/// Students sharing a single station.
pub const MAX_STUDENTS_PER_STATION: usize = 2;

/// Max incidents retained by the incident register.
pub const MAX_INCIDENTS: usize = 10_000;
