use serde_json::Value;

use crate::model::{AppRole, ClassGroup, RosterEntry, StaffRole, StudentEntry};

/// Literal role designations accepted from the upstream provider, after
/// trimming and uppercasing. Anything not listed here goes through
/// [`fallback_role`]; anything that still has no role is discarded.
pub const ROLE_TABLE: &[(&str, AppRole)] = &[
    ("ADMIN", AppRole::Admin),
    ("ADMINISTRADOR", AppRole::Admin),
    ("DIRECCION", AppRole::Admin),
    ("DIRECTOR", AppRole::Admin),
    ("JEFATURA", AppRole::Admin),
    ("TUTOR", AppRole::Teacher),
    ("PROFESOR", AppRole::Teacher),
    ("DOCENTE", AppRole::Teacher),
    ("MAESTRO", AppRole::Teacher),
    ("USER", AppRole::Teacher),
    ("ORIENTADOR", AppRole::Teacher),
    ("ALUMNO", AppRole::Student),
    ("ESTUDIANTE", AppRole::Student),
    ("STUDENT", AppRole::Student),
];

pub(crate) const ROLE_FIELDS: &[&str] = &["role", "rol"];
pub(crate) const EMAIL_FIELDS: &[&str] = &["email", "correo", "mail"];
pub(crate) const NAME_FIELDS: &[&str] = &["name", "nombre", "full_name", "nombre_completo"];
const CLASS_FIELDS: &[&str] = &["classId", "id_clase"];
const CLASS_NAME_FIELDS: &[&str] = &["name", "nombre"];

/// Exact lookup in [`ROLE_TABLE`]. `raw` must already be trimmed and
/// uppercased.
pub fn table_role(raw: &str) -> Option<AppRole> {
    ROLE_TABLE
        .iter()
        .find(|(literal, _)| *literal == raw)
        .map(|(_, role)| *role)
}

/// Substring rules for designations missing from the table. Only these three
/// shapes are recognised.
pub fn fallback_role(raw: &str) -> Option<AppRole> {
    if raw.contains("ADMIN") || raw.contains("DIRECTOR") {
        Some(AppRole::Admin)
    } else if raw == "TUTOR" {
        Some(AppRole::Teacher)
    } else if raw.contains("ALUMNO") {
        Some(AppRole::Student)
    } else {
        None
    }
}

/// Resolve a raw role designation. `None` means the record must be dropped.
pub fn infer_role(raw: &str) -> Option<AppRole> {
    let raw = raw.trim().to_uppercase();
    if raw.is_empty() {
        return None;
    }
    table_role(&raw).or_else(|| fallback_role(&raw))
}

/// One normalized upstream user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    Staff(RosterEntry),
    Student(StudentEntry),
}

/// Result of normalizing one user push, split by partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPartitions {
    pub staff: Vec<RosterEntry>,
    pub students: Vec<StudentEntry>,
    pub skipped: usize,
}

/// First non-blank value among `keys`, as a trimmed string. Numbers are
/// accepted since upstream ids are often numeric.
pub(crate) fn field(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        let text = match raw.get(key)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    })
}

/// Identity for a user record: an email-shaped field when one exists,
/// otherwise `<id>@<domain>`.
fn identity(raw: &Value, domain: &str) -> Option<String> {
    let email = EMAIL_FIELDS
        .iter()
        .filter_map(|key| field(raw, &[*key]))
        .find(|value| value.contains('@'));
    let identity = match email {
        Some(email) => email,
        None => format!("{}@{}", field(raw, &["id"])?, domain.trim_start_matches('@')),
    };
    Some(identity.trim().to_lowercase())
}

pub fn normalize_user(raw: &Value, domain: &str) -> Option<Normalized> {
    let role = infer_role(&field(raw, ROLE_FIELDS)?)?;
    let identity = identity(raw, domain)?;
    let external_id = field(raw, &["id"]).unwrap_or_else(|| identity.clone());
    let display_name = field(raw, NAME_FIELDS).unwrap_or_else(|| identity.clone());
    let class_group_id = field(raw, CLASS_FIELDS);

    Some(match role {
        AppRole::Student => Normalized::Student(StudentEntry {
            external_id,
            identity,
            display_name,
            class_group_id,
        }),
        AppRole::Admin | AppRole::Teacher => Normalized::Staff(RosterEntry {
            external_id,
            identity,
            display_name,
            role: if role == AppRole::Admin { StaffRole::Admin } else { StaffRole::Teacher },
            class_group_id,
        }),
    })
}

/// Normalize a whole push. Both partitions come back sorted by display name;
/// a repeated identity keeps its first occurrence.
pub fn normalize_users(raw: &[Value], domain: &str) -> UserPartitions {
    let mut out = UserPartitions::default();
    let mut seen = std::collections::HashSet::new();
    for record in raw {
        match normalize_user(record, domain) {
            Some(Normalized::Staff(entry)) if seen.insert(entry.identity.clone()) => {
                out.staff.push(entry)
            }
            Some(Normalized::Student(entry)) if seen.insert(entry.identity.clone()) => {
                out.students.push(entry)
            }
            _ => out.skipped += 1,
        }
    }
    out.staff.sort_by_key(|e| e.display_name.to_lowercase());
    out.students.sort_by_key(|e| e.display_name.to_lowercase());
    out
}

pub fn normalize_class(raw: &Value) -> Option<ClassGroup> {
    Some(ClassGroup {
        id: field(raw, &["id"])?,
        name: field(raw, CLASS_NAME_FIELDS)?,
    })
}

/// Classes keep upstream order; records without an id or name are dropped.
pub fn normalize_classes(raw: &[Value]) -> (Vec<ClassGroup>, usize) {
    let classes: Vec<ClassGroup> = raw.iter().filter_map(normalize_class).collect();
    let skipped = raw.len() - classes.len();
    (classes, skipped)
}
