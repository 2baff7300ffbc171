use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::auth::Authenticator;
use crate::engine::{Engine, EngineError};
use crate::identity::SECRET_HEADER;
use crate::incidents::{IncidentLog, IncidentReport};
use crate::model::*;
use crate::notify::{NotifyHub, ServerEvent};
use crate::observability::{REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
use crate::roster::{RosterCache, SyncOutcome};

/// Everything a request handler can reach.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub roster: Arc<RosterCache>,
    pub incidents: Arc<IncidentLog>,
    pub auth: Arc<Authenticator>,
    pub notify: Arc<NotifyHub>,
    /// Shared secret required on roster pushes. `None` disables them.
    pub sync_secret: Option<Arc<str>>,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/bookings", get(list_bookings).post(create_bookings))
        .route("/bookings/recurring", post(create_recurring))
        .route("/bookings/:id", put(update_booking).delete(delete_booking))
        .route("/history", get(history))
        .route("/teachers", get(teachers))
        .route("/students", get(students))
        .route("/classes", get(classes))
        .route("/slots", get(slots))
        .route("/incidents", get(list_incidents).post(report_incident))
        .route("/incidents/:id", put(update_incident).patch(update_incident))
        .route("/auth/login", post(login))
        .route("/auth/token", post(token_login))
        .route("/sync/state", post(sync_state))
        .route("/sync/users", post(sync_users))
        .route("/sync/classes", post(sync_classes))
        .route("/live", get(live));
    Router::new().nest("/api", api).with_state(state)
}

// ── Errors & metrics ─────────────────────────────────────────────

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::LimitExceeded(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Unauthorized => StatusCode::UNAUTHORIZED,
            EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
            EngineError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match &self {
            EngineError::Persistence(e) => {
                error!("request failed on storage: {e}");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": self.kind(), "message": message }))).into_response()
    }
}

/// Record the outcome of one request and turn it into a response.
fn respond<T: IntoResponse>(op: &'static str, started: Instant, result: Result<T, EngineError>) -> Response {
    let status = match &result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());
    match result {
        Ok(body) => body.into_response(),
        Err(e) => {
            debug!("{op} failed: {e}");
            e.into_response()
        }
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<ReservationDraft>),
    One(Box<ReservationDraft>),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecurringRequest {
    template: ReservationTemplate,
    start_date: NaiveDate,
    end_date: NaiveDate,
    #[serde(default)]
    actor: Option<Actor>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DeleteRequest {
    #[serde(default, alias = "user")]
    actor: Option<Actor>,
    #[serde(default, alias = "deleteSeries")]
    cascade_series: bool,
}

async fn list_bookings(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    let all = state.engine.snapshot().await;
    respond("list_bookings", started, Ok(Json(all)))
}

async fn create_bookings(State(state): State<AppState>, Json(body): Json<OneOrMany>) -> Response {
    let started = Instant::now();
    let result = match body {
        OneOrMany::One(draft) => state
            .engine
            .create_one(*draft)
            .await
            .map(|r| (StatusCode::CREATED, Json(r)).into_response()),
        OneOrMany::Many(drafts) => state
            .engine
            .create_batch(drafts)
            .await
            .map(|rs| (StatusCode::CREATED, Json(rs)).into_response()),
    };
    respond("create_bookings", started, result)
}

async fn create_recurring(State(state): State<AppState>, Json(body): Json<RecurringRequest>) -> Response {
    let started = Instant::now();
    let result = state
        .engine
        .create_recurring(body.template, body.start_date, body.end_date, body.actor)
        .await
        .map(|rs| (StatusCode::CREATED, Json(rs)));
    respond("create_recurring", started, result)
}

async fn update_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<ReservationPatch>,
) -> Response {
    let started = Instant::now();
    let result = state.engine.update(&ReservationId::from(id), patch).await.map(Json);
    respond("update_booking", started, result)
}

async fn delete_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let result = async {
        let body = parse_delete_request(&body)?;
        let removed = state
            .engine
            .delete(&ReservationId::from(id), body.actor, body.cascade_series)
            .await?;
        Ok::<_, EngineError>(Json(json!({ "removed": removed.len() })))
    }
    .await;
    respond("delete_booking", started, result)
}

/// An absent body is a plain delete. Anything else must parse in full.
fn parse_delete_request(body: &[u8]) -> Result<DeleteRequest, EngineError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(DeleteRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| EngineError::validation(format!("invalid delete body: {e}")))
}

async fn history(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    respond("history", started, Ok(Json(state.engine.history().await)))
}

// ── Roster & catalogue ───────────────────────────────────────────

async fn teachers(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    respond("teachers", started, Ok(Json(state.roster.teachers().await)))
}

async fn students(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    respond("students", started, Ok(Json(state.roster.students().await)))
}

async fn classes(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    respond("classes", started, Ok(Json(state.roster.classes().await)))
}

async fn slots() -> Json<Value> {
    Json(json!({
        "PRIMARY": Stage::Primary.slots(),
        "SECONDARY": Stage::Secondary.slots(),
    }))
}

// ── Incidents ────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncidentUpdate {
    is_resolved: bool,
}

async fn list_incidents(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    respond("list_incidents", started, Ok(Json(state.incidents.list().await)))
}

async fn report_incident(State(state): State<AppState>, Json(report): Json<IncidentReport>) -> Response {
    let started = Instant::now();
    let result = state
        .incidents
        .report(report)
        .await
        .map(|i| (StatusCode::CREATED, Json(i)));
    respond("report_incident", started, result)
}

async fn update_incident(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<IncidentUpdate>,
) -> Response {
    let started = Instant::now();
    let result = state.incidents.set_resolved(&id, body.is_resolved).await.map(Json);
    respond("update_incident", started, result)
}

// ── Auth ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
struct TokenRequest {
    #[serde(default)]
    token: String,
}

async fn login(State(state): State<AppState>, Json(body): Json<LoginRequest>) -> Response {
    let started = Instant::now();
    let result = state.auth.login_with_password(&body.email, &body.password).await.map(Json);
    respond("login", started, result)
}

async fn token_login(State(state): State<AppState>, Json(body): Json<TokenRequest>) -> Response {
    let started = Instant::now();
    let result = state.auth.login_with_token(&body.token).await.map(Json);
    respond("token_login", started, result)
}

// ── Roster push ──────────────────────────────────────────────────

#[derive(Deserialize)]
struct SyncStateRequest {
    #[serde(default)]
    users: Option<Vec<Value>>,
    #[serde(default)]
    classes: Option<Vec<Value>>,
}

fn require_secret(state: &AppState, headers: &HeaderMap) -> Result<(), EngineError> {
    let Some(expected) = &state.sync_secret else {
        return Err(EngineError::Forbidden("roster push is not enabled".into()));
    };
    match headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok()) {
        Some(given) if given == expected.as_ref() => Ok(()),
        _ => {
            warn!("roster push rejected: bad or missing {SECRET_HEADER}");
            Err(EngineError::Unauthorized)
        }
    }
}

async fn sync_state(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<SyncStateRequest>) -> Response {
    let started = Instant::now();
    let result = async {
        require_secret(&state, &headers)?;
        let mut outcome = SyncOutcome::default();
        if let Some(users) = body.users {
            outcome = state.roster.ingest_users(&users).await?;
        }
        if let Some(classes) = body.classes {
            let class_outcome = state.roster.ingest_classes(&classes).await?;
            outcome.classes = class_outcome.classes;
            outcome.skipped += class_outcome.skipped;
        }
        Ok::<_, EngineError>(Json(outcome))
    }
    .await;
    respond("sync_state", started, result)
}

async fn sync_users(State(state): State<AppState>, headers: HeaderMap, Json(users): Json<Vec<Value>>) -> Response {
    let started = Instant::now();
    let result = async {
        require_secret(&state, &headers)?;
        Ok::<_, EngineError>(Json(state.roster.ingest_users(&users).await?))
    }
    .await;
    respond("sync_users", started, result)
}

async fn sync_classes(State(state): State<AppState>, headers: HeaderMap, Json(classes): Json<Vec<Value>>) -> Response {
    let started = Instant::now();
    let result = async {
        require_secret(&state, &headers)?;
        Ok::<_, EngineError>(Json(state.roster.ingest_classes(&classes).await?))
    }
    .await;
    respond("sync_classes", started, result)
}

// ── Live channel ─────────────────────────────────────────────────

async fn live(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| live_session(socket, state))
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).map_err(axum::Error::new)?;
    socket.send(Message::Text(text)).await
}

/// Complete booking and incident state, sent when a subscriber connects.
async fn initial_events(state: &AppState) -> Vec<ServerEvent> {
    vec![
        ServerEvent::BookingsUpdated(state.engine.snapshot().await),
        ServerEvent::IncidentsUpdated(state.incidents.state().await),
    ]
}

/// Everything a lagged subscriber may have missed: the initial state plus the
/// three roster partitions.
async fn resync_events(state: &AppState) -> Vec<ServerEvent> {
    let mut events = initial_events(state).await;
    let roster = state.roster.snapshot().await;
    events.push(ServerEvent::TeachersUpdated(roster.staff.clone()));
    events.push(ServerEvent::StudentsUpdated(roster.students.clone()));
    events.push(ServerEvent::ClassesUpdated(roster.classes.clone()));
    events
}

/// Events to push for one receive result. `None` once the hub is gone.
async fn outgoing(received: Result<ServerEvent, RecvError>, state: &AppState) -> Option<Vec<ServerEvent>> {
    match received {
        Ok(event) => Some(vec![event]),
        Err(RecvError::Lagged(missed)) => {
            warn!("live subscriber lagged by {missed} events, resending full state");
            metrics::counter!(crate::observability::LIVE_LAGGED_TOTAL).increment(1);
            Some(resync_events(state).await)
        }
        Err(RecvError::Closed) => None,
    }
}

async fn send_all(socket: &mut WebSocket, events: &[ServerEvent]) -> Result<(), axum::Error> {
    for event in events {
        send_event(socket, event).await?;
    }
    Ok(())
}

async fn live_session(mut socket: WebSocket, state: AppState) {
    // Subscribe first so nothing committed after the initial push is missed.
    let mut rx = state.notify.subscribe();
    metrics::gauge!(crate::observability::LIVE_SUBSCRIBERS).increment(1.0);
    info!("live subscriber connected ({} total)", state.notify.subscriber_count());

    if let Err(e) = send_all(&mut socket, &initial_events(&state).await).await {
        debug!("live subscriber dropped before initial state: {e}");
    } else {
        loop {
            tokio::select! {
                received = rx.recv() => {
                    let Some(events) = outgoing(received, &state).await else {
                        break;
                    };
                    if let Err(e) = send_all(&mut socket, &events).await {
                        debug!("live send failed: {e}");
                        break;
                    }
                }
                incoming = socket.recv() => match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    metrics::gauge!(crate::observability::LIVE_SUBSCRIBERS).decrement(1.0);
    info!("live subscriber disconnected");
}
