use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use ulid::Ulid;

/// Unix milliseconds.
pub type Ms = i64;

/// Station number → students sharing it (1–2 identities, in seat order).
pub type SeatingAssignment = BTreeMap<u32, Vec<String>>;

/// Station number → free-text incident note.
pub type StationIncidents = BTreeMap<u32, String>;

/// Station number parsed from either a JSON object key (`"12"`) or a bare
/// integer. Buffered input (`#[serde(flatten)]`) only offers the former.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct StationKey(u32);

impl<'de> Deserialize<'de> for StationKey {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl serde::de::Visitor<'_> for Visitor {
            type Value = StationKey;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a station number")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<StationKey, E> {
                u32::try_from(v).map(StationKey).map_err(E::custom)
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<StationKey, E> {
                u32::try_from(v).map(StationKey).map_err(E::custom)
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<StationKey, E> {
                v.trim().parse().map(StationKey).map_err(E::custom)
            }
        }

        d.deserialize_any(Visitor)
    }
}

fn station_map<'de, D, V>(d: D) -> Result<BTreeMap<u32, V>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    let raw = BTreeMap::<StationKey, V>::deserialize(d)?;
    Ok(raw.into_iter().map(|(k, v)| (k.0, v)).collect())
}

fn opt_station_map<'de, D, V>(d: D) -> Result<Option<BTreeMap<u32, V>>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    let raw = Option::<BTreeMap<StationKey, V>>::deserialize(d)?;
    Ok(raw.map(|m| m.into_iter().map(|(k, v)| (k.0, v)).collect()))
}

/// Single station number, as an integer or a numeric string.
pub(crate) fn opt_station<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    Ok(Option::<StationKey>::deserialize(d)?.map(|k| k.0))
}

/// Upstream record id: the provider sends strings or bare integers, both
/// are kept as text. `null` reads as absent.
struct IdText(String);

impl<'de> Deserialize<'de> for IdText {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl serde::de::Visitor<'_> for Visitor {
            type Value = IdText;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a string or integer id")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<IdText, E> {
                Ok(IdText(v.to_string()))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<IdText, E> {
                Ok(IdText(v.to_string()))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<IdText, E> {
                Ok(IdText(v.to_string()))
            }
        }

        d.deserialize_any(Visitor)
    }
}

fn id_text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<IdText>::deserialize(d)?.map(|t| t.0).unwrap_or_default())
}

fn opt_id_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<IdText>::deserialize(d)?.map(|t| t.0))
}

/// Opaque reservation identifier. New ids are ULIDs; ids loaded from older
/// snapshots are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(String);

impl ReservationId {
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ReservationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ReservationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    #[serde(alias = "PRIMARIA")]
    Primary,
    #[serde(alias = "SECUNDARIA")]
    Secondary,
}

impl Stage {
    /// Ordered slot list of this stage.
    pub fn slots(self) -> &'static [TimeSlot] {
        match self {
            Stage::Primary => SLOTS_PRIMARY,
            Stage::Secondary => SLOTS_SECONDARY,
        }
    }

    pub fn slot(self, slot_id: &str) -> Option<&'static TimeSlot> {
        self.slots().iter().find(|s| s.id == slot_id)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Primary => f.write_str("PRIMARY"),
            Stage::Secondary => f.write_str("SECONDARY"),
        }
    }
}

/// Physical asset being reserved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resource {
    #[default]
    Room,
    Cart,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Room => f.write_str("ROOM"),
            Resource::Cart => f.write_str("CART"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeSlot {
    pub id: &'static str,
    pub label: &'static str,
    pub start: &'static str,
    pub end: &'static str,
}

pub const SLOTS_PRIMARY: &[TimeSlot] = &[
    TimeSlot { id: "p1", label: "9:00 - 10:00", start: "09:00", end: "10:00" },
    TimeSlot { id: "p2", label: "10:00 - 11:00", start: "10:00", end: "11:00" },
    TimeSlot { id: "p3", label: "11:30 - 12:30", start: "11:30", end: "12:30" },
    TimeSlot { id: "p4", label: "12:30 - 14:00", start: "12:30", end: "14:00" },
];

pub const SLOTS_SECONDARY: &[TimeSlot] = &[
    TimeSlot { id: "s1", label: "8:00 - 9:00", start: "08:00", end: "09:00" },
    TimeSlot { id: "s2", label: "9:00 - 10:00", start: "09:00", end: "10:00" },
    TimeSlot { id: "s3", label: "10:00 - 11:00", start: "10:00", end: "11:00" },
    TimeSlot { id: "s4", label: "11:30 - 12:30", start: "11:30", end: "12:30" },
    TimeSlot { id: "s5", label: "12:30 - 13:30", start: "12:30", end: "13:30" },
    TimeSlot { id: "s6", label: "13:30 - 14:30", start: "13:30", end: "14:30" },
];

/// Natural key of a reservation. At most one stored reservation per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub date: NaiveDate,
    pub slot_id: String,
    pub stage: Stage,
    pub resource: Resource,
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.date, self.slot_id, self.stage, self.resource)
    }
}

/// Who performed an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    #[serde(alias = "email")]
    pub identity: String,
    #[serde(alias = "displayName")]
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Created,
    Blocked,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub action: AuditAction,
    #[serde(alias = "user")]
    pub actor_identity: String,
    #[serde(alias = "userName")]
    pub actor_name: String,
    #[serde(alias = "timestamp")]
    pub timestamp_epoch_millis: Ms,
    #[serde(default)]
    pub details: String,
}

impl AuditEntry {
    pub fn new(action: AuditAction, actor: &Actor, timestamp: Ms, details: String) -> Self {
        Self {
            action,
            actor_identity: actor.identity.clone(),
            actor_name: actor.name.clone(),
            timestamp_epoch_millis: timestamp,
            details,
        }
    }
}

/// Every caller-supplied field of a reservation except its date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationTemplate {
    pub slot_id: String,
    pub stage: Stage,
    #[serde(default)]
    pub resource: Resource,
    #[serde(alias = "teacherEmail")]
    pub requester_identity: String,
    #[serde(alias = "teacherName")]
    pub requester_name: String,
    #[serde(default, alias = "course")]
    pub course_name: Option<String>,
    #[serde(default, alias = "subject")]
    pub subject_label: Option<String>,
    #[serde(default)]
    pub activity_note: Option<String>,
    #[serde(default)]
    pub is_blocked: bool,
    #[serde(default, alias = "justification")]
    pub block_reason: Option<String>,
    #[serde(default, deserialize_with = "opt_station_map")]
    pub seating_assignment: Option<SeatingAssignment>,
    #[serde(default, deserialize_with = "station_map")]
    pub station_incidents: StationIncidents,
}

impl ReservationTemplate {
    pub fn on(&self, date: NaiveDate) -> ReservationDraft {
        ReservationDraft {
            date,
            template: self.clone(),
            actor: None,
        }
    }

    /// Actor defaults to the requester when the caller does not name one.
    pub fn requester(&self) -> Actor {
        Actor {
            identity: self.requester_identity.clone(),
            name: self.requester_name.clone(),
        }
    }
}

/// A reservation candidate as submitted by a client. Unknown fields (ids,
/// client-side logs) are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationDraft {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub template: ReservationTemplate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<Actor>,
}

impl ReservationDraft {
    pub fn key(&self) -> SlotKey {
        SlotKey {
            date: self.date,
            slot_id: self.template.slot_id.clone(),
            stage: self.template.stage,
            resource: self.template.resource,
        }
    }

    pub fn actor(&self) -> Actor {
        self.actor.clone().unwrap_or_else(|| self.template.requester())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: ReservationId,
    pub date: NaiveDate,
    pub slot_id: String,
    pub stage: Stage,
    #[serde(default)]
    pub resource: Resource,
    #[serde(alias = "teacherEmail")]
    pub requester_identity: String,
    #[serde(alias = "teacherName")]
    pub requester_name: String,
    #[serde(default, alias = "course", skip_serializing_if = "Option::is_none")]
    pub course_name: Option<String>,
    #[serde(default, alias = "subject", skip_serializing_if = "Option::is_none")]
    pub subject_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_note: Option<String>,
    #[serde(default)]
    pub is_blocked: bool,
    #[serde(default, alias = "justification", skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
    #[serde(
        default,
        deserialize_with = "opt_station_map",
        skip_serializing_if = "Option::is_none"
    )]
    pub seating_assignment: Option<SeatingAssignment>,
    #[serde(default, deserialize_with = "station_map")]
    pub station_incidents: StationIncidents,
    #[serde(default, alias = "createdAt")]
    pub created_at_epoch_millis: Ms,
    #[serde(default, alias = "logs")]
    pub lifecycle_events: Vec<AuditEntry>,
}

impl Reservation {
    /// Materialize a validated draft. Blocks carry no teaching payload.
    pub fn from_draft(draft: ReservationDraft, created_at: Ms, event: AuditEntry) -> Self {
        let t = draft.template;
        let (course_name, subject_label, activity_note, block_reason) = if t.is_blocked {
            (None, None, None, t.block_reason)
        } else {
            (t.course_name, t.subject_label, t.activity_note, None)
        };
        Self {
            id: ReservationId::generate(),
            date: draft.date,
            slot_id: t.slot_id,
            stage: t.stage,
            resource: t.resource,
            requester_identity: t.requester_identity,
            requester_name: t.requester_name,
            course_name,
            subject_label,
            activity_note,
            is_blocked: t.is_blocked,
            block_reason,
            seating_assignment: t.seating_assignment,
            station_incidents: t.station_incidents,
            created_at_epoch_millis: created_at,
            lifecycle_events: vec![event],
        }
    }

    pub fn key(&self) -> SlotKey {
        SlotKey {
            date: self.date,
            slot_id: self.slot_id.clone(),
            stage: self.stage,
            resource: self.resource,
        }
    }

    /// Same requester, slot, stage, resource, course and block flag.
    pub fn same_series(&self, other: &Reservation) -> bool {
        self.requester_identity == other.requester_identity
            && self.slot_id == other.slot_id
            && self.stage == other.stage
            && self.resource == other.resource
            && self.course_name == other.course_name
            && self.is_blocked == other.is_blocked
    }
}

/// Partial update accepted for an existing reservation. Any other field sent
/// by a client is dropped during deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationPatch {
    #[serde(default, deserialize_with = "opt_station_map")]
    pub seating_assignment: Option<SeatingAssignment>,
    #[serde(default, deserialize_with = "opt_station_map")]
    pub station_incidents: Option<StationIncidents>,
}

// ── Roster ───────────────────────────────────────────────────

/// Role after normalization of an upstream identity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppRole {
    Admin,
    Teacher,
    Student,
}

/// Role of a staff member allowed to reserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StaffRole {
    Teacher,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    #[serde(default, alias = "id", deserialize_with = "id_text")]
    pub external_id: String,
    #[serde(alias = "email")]
    pub identity: String,
    #[serde(alias = "name")]
    pub display_name: String,
    pub role: StaffRole,
    #[serde(
        default,
        alias = "classId",
        deserialize_with = "opt_id_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub class_group_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentEntry {
    #[serde(default, alias = "id", deserialize_with = "id_text")]
    pub external_id: String,
    #[serde(alias = "email")]
    pub identity: String,
    #[serde(alias = "name")]
    pub display_name: String,
    #[serde(default, alias = "classId", deserialize_with = "opt_id_text")]
    pub class_group_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassGroup {
    pub id: String,
    pub name: String,
}

/// The `{identity, displayName, role}` triple handed to clients after login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub identity: String,
    pub display_name: String,
    pub role: StaffRole,
}

// ── Incidents ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: String,
    pub resource: String,
    #[serde(
        default,
        alias = "pcNumber",
        deserialize_with = "opt_station",
        skip_serializing_if = "Option::is_none"
    )]
    pub station: Option<u32>,
    pub description: String,
    #[serde(alias = "teacherEmail")]
    pub reporter_identity: String,
    #[serde(alias = "teacherName")]
    pub reporter_name: String,
    #[serde(default)]
    pub is_resolved: bool,
    #[serde(alias = "timestamp")]
    pub timestamp_epoch_millis: Ms,
}
