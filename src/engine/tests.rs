use super::*;
use chrono::{Datelike, NaiveDate, Weekday};

use crate::calendar::SchoolCalendar;
use crate::notify::ServerEvent;

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn test_data_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotbook_test_engine").join(name);
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn weekdays(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

fn open_with(dir: &PathBuf, calendar: Arc<dyn CalendarPredicate>, cascade: SeriesCascade) -> Engine {
    Engine::open(EngineOptions {
        data_dir: dir.clone(),
        calendar,
        notify: Arc::new(NotifyHub::default()),
        series_cascade: cascade,
    })
    .unwrap()
}

fn open(name: &str) -> Engine {
    open_with(&test_data_dir(name), Arc::new(weekdays), SeriesCascade::All)
}

fn template(slot: &str, resource: Resource) -> ReservationTemplate {
    ReservationTemplate {
        slot_id: slot.into(),
        stage: Stage::Secondary,
        resource,
        requester_identity: "ana@school.test".into(),
        requester_name: "Ana".into(),
        course_name: Some("1ºA Secundaria".into()),
        subject_label: Some("ICT".into()),
        activity_note: Some("Spreadsheets".into()),
        is_blocked: false,
        block_reason: None,
        seating_assignment: None,
        station_incidents: StationIncidents::new(),
    }
}

fn draft(date: &str, slot: &str, resource: Resource) -> ReservationDraft {
    template(slot, resource).on(d(date))
}

fn admin() -> Actor {
    Actor { identity: "head@school.test".into(), name: "Head".into() }
}

// ── Create ───────────────────────────────────────────────

#[tokio::test]
async fn create_and_list() {
    let engine = open("create_and_list");
    let r = engine.create_one(draft("2025-09-08", "s2", Resource::Room)).await.unwrap();

    let all = engine.list().await;
    assert_eq!(all, vec![r.clone()]);
    assert_eq!(r.lifecycle_events.len(), 1);
    assert_eq!(r.lifecycle_events[0].action, AuditAction::Created);
    assert_eq!(r.lifecycle_events[0].actor_identity, "ana@school.test");
    assert!(r.created_at_epoch_millis > 0);
}

#[tokio::test]
async fn same_key_conflicts_other_resource_does_not() {
    let engine = open("same_key_conflicts");
    engine.create_one(draft("2025-09-08", "s2", Resource::Room)).await.unwrap();

    let dup = engine.create_one(draft("2025-09-08", "s2", Resource::Room)).await;
    assert!(matches!(dup, Err(EngineError::Conflict(_))));

    engine.create_one(draft("2025-09-08", "s2", Resource::Cart)).await.unwrap();
    assert_eq!(engine.len().await, 2);
}

#[tokio::test]
async fn conflict_ignores_requester_and_course() {
    let engine = open("conflict_ignores_requester");
    engine.create_one(draft("2025-09-08", "s4", Resource::Room)).await.unwrap();

    let mut other = draft("2025-09-08", "s4", Resource::Room);
    other.template.requester_identity = "luis@school.test".into();
    other.template.course_name = Some("3ºB Secundaria".into());
    assert!(matches!(engine.create_one(other).await, Err(EngineError::Conflict(_))));
}

#[tokio::test]
async fn concurrent_creates_for_one_key_have_one_winner() {
    let engine = Arc::new(open("concurrent_creates"));
    let mut handles = Vec::new();
    for i in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let mut candidate = draft("2025-09-09", "s1", Resource::Room);
            candidate.template.requester_identity = format!("t{i}@school.test");
            engine.create_one(candidate).await
        }));
    }

    let mut ok = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::Conflict(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(conflicts, 15);
    assert_eq!(engine.len().await, 1);
}

#[tokio::test]
async fn validation_errors_write_nothing() {
    let engine = open("validation_errors");

    let mut no_course = draft("2025-09-08", "s1", Resource::Room);
    no_course.template.course_name = None;
    assert!(matches!(engine.create_one(no_course).await, Err(EngineError::Validation(_))));

    // Saturday
    let weekend = draft("2025-09-13", "s1", Resource::Room);
    assert!(matches!(engine.create_one(weekend).await, Err(EngineError::Validation(_))));

    let mut primary_cart = draft("2025-09-08", "p1", Resource::Cart);
    primary_cart.template.stage = Stage::Primary;
    assert!(matches!(engine.create_one(primary_cart).await, Err(EngineError::Validation(_))));

    assert!(engine.is_empty().await);
    assert!(engine.history().await.is_empty());
}

#[tokio::test]
async fn block_is_audited_as_blocked() {
    let engine = open("block_audited");
    let mut block = draft("2025-09-10", "s3", Resource::Room);
    block.template.is_blocked = true;
    block.template.block_reason = Some("Evaluation board".into());
    block.template.course_name = None;
    block.template.subject_label = None;
    block.actor = Some(admin());

    let r = engine.create_one(block).await.unwrap();
    assert!(r.is_blocked);
    assert_eq!(r.activity_note, None);

    let history = engine.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, AuditAction::Blocked);
    assert_eq!(history[0].actor_identity, "head@school.test");
    assert_eq!(history[0].details, "Evaluation board");
}

// ── Batch ────────────────────────────────────────────────

#[tokio::test]
async fn batch_with_one_collision_inserts_nothing() {
    let engine = open("batch_atomic");
    engine.create_one(draft("2025-09-22", "s2", Resource::Room)).await.unwrap();
    let history_before = engine.history().await.len();

    let batch = vec![
        draft("2025-09-08", "s2", Resource::Room),
        draft("2025-09-15", "s2", Resource::Room),
        draft("2025-09-22", "s2", Resource::Room), // collides
        draft("2025-09-29", "s2", Resource::Room),
        draft("2025-10-06", "s2", Resource::Room),
    ];
    let result = engine.create_batch(batch).await;
    assert!(matches!(result, Err(EngineError::Conflict(_))));
    assert_eq!(engine.len().await, 1);
    assert_eq!(engine.history().await.len(), history_before);

    // Nothing reached disk either
    let dir = test_data_dir_path("batch_atomic");
    let reopened = open_with(&dir, Arc::new(weekdays), SeriesCascade::All);
    assert_eq!(reopened.len().await, 1);
}

fn test_data_dir_path(name: &str) -> PathBuf {
    std::env::temp_dir().join("slotbook_test_engine").join(name)
}

#[tokio::test]
async fn batch_rejects_internal_duplicate() {
    let engine = open("batch_internal_dup");
    let batch = vec![
        draft("2025-09-08", "s5", Resource::Room),
        draft("2025-09-08", "s5", Resource::Room),
    ];
    assert!(matches!(engine.create_batch(batch).await, Err(EngineError::Conflict(_))));
    assert!(engine.is_empty().await);
}

#[tokio::test]
async fn batch_appends_one_audit_entry() {
    let engine = open("batch_one_audit");
    let batch = vec![
        draft("2025-09-08", "s6", Resource::Room),
        draft("2025-09-15", "s6", Resource::Room),
        draft("2025-09-22", "s6", Resource::Room),
    ];
    let created = engine.create_batch(batch).await.unwrap();
    assert_eq!(created.len(), 3);
    assert!(created.iter().all(|r| r.lifecycle_events.len() == 1));

    let history = engine.history().await;
    assert_eq!(history.len(), 1);
    assert!(history[0].details.contains("3 reservations"));
}

#[tokio::test]
async fn empty_batch_is_noop() {
    let engine = open("empty_batch");
    let mut rx = engine.notify.subscribe();
    assert!(engine.create_batch(Vec::new()).await.unwrap().is_empty());
    assert!(rx.try_recv().is_err());
}

// ── Recurrence ───────────────────────────────────────────

#[tokio::test]
async fn recurring_skips_non_bookable_week() {
    let dir = test_data_dir("recurring_skip");
    let week3 = d("2025-09-22");
    let calendar = move |date: NaiveDate| weekdays(date) && date != week3;
    let engine = open_with(&dir, Arc::new(calendar), SeriesCascade::All);

    // Monday 2025-09-08 through five weeks
    let created = engine
        .create_recurring(template("s2", Resource::Room), d("2025-09-08"), d("2025-10-06"), None)
        .await
        .unwrap();
    assert_eq!(created.len(), 4);
    assert!(created.iter().all(|r| r.date != week3));
    assert!(created.iter().all(|r| r.date.weekday() == Weekday::Mon));
}

#[tokio::test]
async fn recurring_end_before_start_creates_nothing() {
    let engine = open("recurring_reversed");
    let created = engine
        .create_recurring(template("s2", Resource::Room), d("2025-09-08"), d("2025-09-01"), None)
        .await
        .unwrap();
    assert!(created.is_empty());
    assert!(engine.is_empty().await);
}

#[tokio::test]
async fn recurring_with_builtin_calendar_skips_holidays() {
    let dir = test_data_dir("recurring_builtin");
    let engine = open_with(&dir, Arc::new(SchoolCalendar::builtin()), SeriesCascade::All);
    // Mondays 2025-09-29 .. 2025-10-20; 2025-10-13 is a holiday
    let created = engine
        .create_recurring(template("s1", Resource::Cart), d("2025-09-29"), d("2025-10-20"), Some(admin()))
        .await
        .unwrap();
    let dates: Vec<NaiveDate> = created.iter().map(|r| r.date).collect();
    assert_eq!(dates, vec![d("2025-09-29"), d("2025-10-06"), d("2025-10-20")]);
    assert_eq!(engine.history().await[0].actor_identity, "head@school.test");
}

// ── Update ───────────────────────────────────────────────

#[tokio::test]
async fn update_seating_keeps_core_fields() {
    let engine = open("update_seating");
    let before = engine.create_one(draft("2025-09-08", "s2", Resource::Room)).await.unwrap();

    let mut seating = SeatingAssignment::new();
    seating.insert(1, vec!["s1@school.test".into()]);
    seating.insert(7, vec!["s2@school.test".into(), "s3@school.test".into()]);
    let patch = ReservationPatch { seating_assignment: Some(seating.clone()), station_incidents: None };
    engine.update(&before.id, patch).await.unwrap();

    let after = engine.get(&before.id).await.unwrap();
    assert_eq!(after.seating_assignment, Some(seating));
    let mut expected = before.clone();
    expected.seating_assignment = after.seating_assignment.clone();
    assert_eq!(after, expected);

    // Updates are not audited
    assert_eq!(engine.history().await.len(), 1);
}

#[tokio::test]
async fn update_patch_ignores_other_fields() {
    let engine = open("update_ignores");
    let before = engine.create_one(draft("2025-09-08", "s3", Resource::Room)).await.unwrap();

    let patch: ReservationPatch = serde_json::from_str(
        r#"{"date": "2030-01-01", "slotId": "s6", "requesterName": "Mallory",
            "stationIncidents": {"4": "Broken keyboard"}}"#,
    )
    .unwrap();
    let after = engine.update(&before.id, patch).await.unwrap();
    assert_eq!(after.date, before.date);
    assert_eq!(after.slot_id, before.slot_id);
    assert_eq!(after.requester_name, before.requester_name);
    assert_eq!(after.station_incidents.get(&4).map(String::as_str), Some("Broken keyboard"));
}

#[tokio::test]
async fn update_unknown_id_is_not_found() {
    let engine = open("update_missing");
    let result = engine.update(&ReservationId::from("missing"), ReservationPatch::default()).await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn update_rejects_overfull_station() {
    let engine = open("update_overfull");
    let r = engine.create_one(draft("2025-09-08", "s2", Resource::Room)).await.unwrap();
    let mut seating = SeatingAssignment::new();
    seating.insert(2, vec!["a".into(), "b".into(), "c".into()]);
    let patch = ReservationPatch { seating_assignment: Some(seating), station_incidents: None };
    assert!(matches!(engine.update(&r.id, patch).await, Err(EngineError::Validation(_))));
    assert_eq!(engine.get(&r.id).await.unwrap().seating_assignment, None);
}

// ── Delete ───────────────────────────────────────────────

#[tokio::test]
async fn delete_with_actor_is_audited() {
    let engine = open("delete_audited");
    let r = engine.create_one(draft("2025-09-08", "s2", Resource::Room)).await.unwrap();
    let removed = engine.delete(&r.id, Some(admin()), false).await.unwrap();
    assert_eq!(removed.len(), 1);
    assert!(engine.is_empty().await);

    let history = engine.history().await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].action, AuditAction::Deleted);
    assert!(history[0].details.contains("Ana"));
}

#[tokio::test]
async fn delete_without_actor_is_not_audited() {
    let engine = open("delete_silent");
    let r = engine.create_one(draft("2025-09-08", "s2", Resource::Room)).await.unwrap();
    engine.delete(&r.id, None, false).await.unwrap();
    assert_eq!(engine.history().await.len(), 1);
}

#[tokio::test]
async fn delete_unknown_id_is_not_found() {
    let engine = open("delete_missing");
    let result = engine.delete(&ReservationId::from("missing"), Some(admin()), true).await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
    assert!(engine.history().await.is_empty());
}

#[tokio::test]
async fn cascade_removes_whole_series_with_one_audit_entry() {
    let engine = open("cascade_all");
    let series = engine
        .create_recurring(template("s2", Resource::Room), d("2025-09-08"), d("2025-09-29"), None)
        .await
        .unwrap();
    assert_eq!(series.len(), 4);

    // Same slot, different course: not part of the series
    let mut other = template("s2", Resource::Room);
    other.course_name = Some("2ºB Secundaria".into());
    let outsider = engine.create_one(other.on(d("2025-10-06"))).await.unwrap();

    let removed = engine.delete(&series[1].id, Some(admin()), true).await.unwrap();
    assert_eq!(removed.len(), 4);
    assert_eq!(engine.list().await, vec![outsider]);

    let deletions: Vec<_> = engine
        .history()
        .await
        .into_iter()
        .filter(|e| e.action == AuditAction::Deleted)
        .collect();
    assert_eq!(deletions.len(), 1);
    assert!(deletions[0].details.contains("4 reservations"));
}

#[tokio::test]
async fn cascade_future_scope_keeps_earlier_weeks() {
    let dir = test_data_dir("cascade_future");
    let engine = open_with(&dir, Arc::new(weekdays), SeriesCascade::Future);
    let series = engine
        .create_recurring(template("s4", Resource::Cart), d("2025-09-08"), d("2025-09-29"), None)
        .await
        .unwrap();

    let removed = engine.delete(&series[2].id, None, true).await.unwrap();
    assert_eq!(removed.len(), 2);
    let left: Vec<NaiveDate> = engine.list().await.iter().map(|r| r.date).collect();
    assert_eq!(left, vec![d("2025-09-08"), d("2025-09-15")]);
}

// ── Persistence & broadcast ──────────────────────────────

#[tokio::test]
async fn state_survives_reopen() {
    let dir = test_data_dir("reopen");
    let created = {
        let engine = open_with(&dir, Arc::new(weekdays), SeriesCascade::All);
        let a = engine.create_one(draft("2025-09-08", "s1", Resource::Room)).await.unwrap();
        let b = engine.create_one(draft("2025-09-08", "s2", Resource::Room)).await.unwrap();
        engine.delete(&a.id, Some(admin()), false).await.unwrap();
        b
    };

    let engine = open_with(&dir, Arc::new(weekdays), SeriesCascade::All);
    assert_eq!(engine.list().await, vec![created.clone()]);
    assert_eq!(engine.history().await.len(), 3);

    // The reloaded index still enforces the key
    let dup = engine.create_one(draft("2025-09-08", "s2", Resource::Room)).await;
    assert!(matches!(dup, Err(EngineError::Conflict(_))));
}

#[tokio::test]
async fn every_mutation_broadcasts_full_state() {
    let engine = open("broadcast");
    let mut rx = engine.notify.subscribe();

    let a = engine.create_one(draft("2025-09-08", "s1", Resource::Room)).await.unwrap();
    let b = engine.create_one(draft("2025-09-08", "s2", Resource::Room)).await.unwrap();

    match rx.recv().await.unwrap() {
        ServerEvent::BookingsUpdated(all) => assert_eq!(all.len(), 1),
        other => panic!("unexpected event {other:?}"),
    }
    match rx.recv().await.unwrap() {
        ServerEvent::BookingsUpdated(all) => assert_eq!(&all[..], &[a.clone(), b.clone()]),
        other => panic!("unexpected event {other:?}"),
    }

    engine.update(&a.id, ReservationPatch::default()).await.unwrap();
    assert!(matches!(rx.recv().await.unwrap(), ServerEvent::BookingsUpdated(all) if all.len() == 2));

    engine.delete(&a.id, None, false).await.unwrap();
    match rx.recv().await.unwrap() {
        ServerEvent::BookingsUpdated(all) => assert_eq!(&all[..], &[b]),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn conflict_does_not_broadcast() {
    let engine = open("conflict_silent");
    engine.create_one(draft("2025-09-08", "s1", Resource::Room)).await.unwrap();
    let mut rx = engine.notify.subscribe();
    let _ = engine.create_one(draft("2025-09-08", "s1", Resource::Room)).await;
    assert!(rx.try_recv().is_err());
}

#[test]
fn series_cascade_parses() {
    assert_eq!("all".parse::<SeriesCascade>().unwrap(), SeriesCascade::All);
    assert_eq!(" Future ".parse::<SeriesCascade>().unwrap(), SeriesCascade::Future);
    assert!("weekly".parse::<SeriesCascade>().is_err());
}
