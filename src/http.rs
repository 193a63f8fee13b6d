//! HTTP API and realtime subscription surface.
//!
//! All mutations go through the ticket engine; this layer only resolves
//! identities, shapes requests/responses and bridges the broadcast channel to
//! WebSocket/SSE subscribers.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive};
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::protocol::{
    ClientFrame, EngineStats, EventPayload, QueueEvent, QueueSummary, ServerFrame, Topic,
};
use crate::registry::{QueueConfig, QueueRegistry};
use crate::session::{Principal, PrincipalKind, SessionGateway};
use crate::ticket::types::now_ms;
use crate::ticket::{Ticket, TicketEngine, TicketError, TicketStatus};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<TicketEngine>,
    pub registry: Arc<QueueRegistry>,
    pub sessions: Arc<SessionGateway>,
}

// ============== Request / response shapes ==============

#[derive(Deserialize, Default)]
pub struct JoinRequest {
    #[serde(default)]
    pub service_id: Option<String>,
}

#[derive(Deserialize)]
pub struct AdvanceRequest {
    pub status: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct ActiveTicketQuery {
    pub business_id: String,
}

#[derive(Deserialize)]
pub struct UpsertQueueRequest {
    pub name: String,
    pub max_size: u32,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub avg_service_time_minutes: Option<u32>,
}

fn default_active() -> bool {
    true
}

#[derive(Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// Operator board entry: queue configuration, live summary, next customers.
#[derive(Serialize)]
pub struct QueueBoard {
    pub queue: QueueConfig,
    pub summary: QueueSummary,
    pub next_waiting: Vec<Ticket>,
}

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Json<Self> {
        Json(Self {
            ok: true,
            data: Some(data),
            error: None,
            code: None,
        })
    }
}

fn ok_json<T: Serialize>(data: T) -> Response {
    ApiResponse::success(data).into_response()
}

fn error_code(err: &TicketError) -> &'static str {
    match err {
        TicketError::AlreadyQueued => "ALREADY_QUEUED",
        TicketError::QueueClosed => "QUEUE_CLOSED",
        TicketError::QueueFull => "QUEUE_FULL",
        TicketError::EmptyQueue => "EMPTY_QUEUE",
        TicketError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
        TicketError::NotFound => "NOT_FOUND",
        TicketError::Forbidden => "FORBIDDEN",
        TicketError::InvalidInput(_) => "INVALID_INPUT",
    }
}

fn error_status(err: &TicketError) -> StatusCode {
    match err {
        TicketError::AlreadyQueued
        | TicketError::QueueClosed
        | TicketError::QueueFull
        | TicketError::EmptyQueue
        | TicketError::IllegalTransition { .. } => StatusCode::CONFLICT,
        TicketError::NotFound => StatusCode::NOT_FOUND,
        TicketError::Forbidden => StatusCode::FORBIDDEN,
        TicketError::InvalidInput(_) => StatusCode::BAD_REQUEST,
    }
}

fn err_json(err: TicketError) -> Response {
    let body: ApiResponse<()> = ApiResponse {
        ok: false,
        data: None,
        error: Some(err.to_string()),
        code: Some(error_code(&err)),
    };
    (error_status(&err), Json(body)).into_response()
}

fn unauthorized() -> Response {
    let body: ApiResponse<()> = ApiResponse {
        ok: false,
        data: None,
        error: Some("missing or invalid credentials".to_string()),
        code: Some("UNAUTHENTICATED"),
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

// ============== Identity resolution ==============

fn bearer_token(headers: &HeaderMap) -> &str {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("")
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Principal, Response> {
    state
        .sessions
        .resolve(bearer_token(headers))
        .map_err(|_| unauthorized())
}

// ============== Router ==============

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Queue operations
        .route("/queues/{queue}/join", post(join_queue))
        .route("/queues/{queue}/call-next", post(call_next))
        .route("/queues/{queue}/summary", get(queue_summary))
        .route("/queues/{queue}", put(upsert_queue))
        // Ticket operations
        .route("/tickets/active", get(active_ticket))
        .route("/tickets/{id}", get(get_ticket))
        .route("/tickets/{id}/cancel", post(cancel_ticket))
        .route("/tickets/{id}/status", post(advance_ticket))
        // Operator board
        .route("/businesses/{business}/queues", get(business_queues))
        // Observability
        .route("/stats", get(get_stats))
        .route("/health", get(health_check))
        // Realtime
        .route("/events/queues/{queue}", get(sse_queue_events))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(cors)
}

// ============== Queue handlers ==============

async fn join_queue(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    headers: HeaderMap,
    body: Option<Json<JoinRequest>>,
) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    if principal.kind != PrincipalKind::Customer {
        return err_json(TicketError::Forbidden);
    }
    let req = body.map(|Json(r)| r).unwrap_or_default();
    match state.engine.join(&queue, &principal.id, req.service_id).await {
        Ok(ticket) => ok_json(ticket),
        Err(e) => err_json(e),
    }
}

async fn call_next(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    headers: HeaderMap,
) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match state.engine.call_next(&queue, &principal).await {
        Ok(ticket) => ok_json(ticket),
        Err(e) => err_json(e),
    }
}

async fn queue_summary(State(state): State<AppState>, Path(queue): Path<String>) -> Response {
    match state.engine.summary(&queue) {
        Some(summary) => ok_json(summary),
        None => err_json(TicketError::NotFound),
    }
}

async fn upsert_queue(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpsertQueueRequest>,
) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let Some(business_id) = principal.business_id.clone() else {
        return err_json(TicketError::Forbidden);
    };
    if let Some(existing) = state.registry.queue(&queue) {
        if existing.business_id != business_id {
            return err_json(TicketError::Forbidden);
        }
    }
    let config = QueueConfig {
        id: queue,
        business_id,
        name: req.name,
        max_size: req.max_size,
        is_active: req.is_active,
        avg_service_time_minutes: req.avg_service_time_minutes,
    };
    state.registry.upsert_queue(config.clone());
    ok_json(config)
}

// ============== Ticket handlers ==============

async fn get_ticket(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let Some(ticket) = state.engine.ticket(id) else {
        return err_json(TicketError::NotFound);
    };
    let allowed = match principal.kind {
        PrincipalKind::Customer => principal.id == ticket.customer_id,
        PrincipalKind::Business => principal.operates(&ticket.business_id),
    };
    if !allowed {
        return err_json(TicketError::Forbidden);
    }
    ok_json(ticket)
}

async fn cancel_ticket(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match state.engine.cancel(id, &principal).await {
        Ok(ticket) => ok_json(ticket),
        Err(e) => err_json(e),
    }
}

async fn advance_ticket(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    Json(req): Json<AdvanceRequest>,
) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    // Reject malformed status values before touching the store.
    let Some(status) = TicketStatus::parse(&req.status) else {
        return err_json(TicketError::InvalidInput(format!(
            "unknown status '{}'",
            req.status
        )));
    };
    match state
        .engine
        .advance_status(id, status, req.notes, &principal)
        .await
    {
        Ok(ticket) => ok_json(ticket),
        Err(e) => err_json(e),
    }
}

async fn active_ticket(
    State(state): State<AppState>,
    Query(query): Query<ActiveTicketQuery>,
    headers: HeaderMap,
) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    if principal.kind != PrincipalKind::Customer {
        return err_json(TicketError::Forbidden);
    }
    ok_json(
        state
            .engine
            .active_ticket_for(&principal.id, &query.business_id),
    )
}

// ============== Operator board ==============

async fn business_queues(
    State(state): State<AppState>,
    Path(business): Path<String>,
    headers: HeaderMap,
) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    if !principal.operates(&business) {
        return err_json(TicketError::Forbidden);
    }
    let board: Vec<QueueBoard> = state
        .registry
        .queues_for_business(&business)
        .into_iter()
        .filter_map(|queue| {
            let summary = state.engine.summary(&queue.id)?;
            let next_waiting = state.engine.next_waiting(&queue.id, 5);
            Some(QueueBoard {
                queue,
                summary,
                next_waiting,
            })
        })
        .collect();
    ok_json(board)
}

// ============== Observability ==============

async fn get_stats(State(state): State<AppState>) -> Json<ApiResponse<EngineStats>> {
    ApiResponse::success(state.engine.stats())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============== SSE ==============

fn event_name(payload: &EventPayload) -> &'static str {
    match payload {
        EventPayload::TicketUpdate { .. } => "ticket-update",
        EventPayload::QueueSummary { .. } => "queue-summary",
    }
}

async fn sse_queue_events(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let channel = Topic::Queue(queue).as_channel();
    let rx = state.engine.subscribe_events();
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(
        move |result: Result<QueueEvent, _>| {
            let channel = channel.clone();
            async move {
                result.ok().and_then(|event| {
                    if event.topic == channel {
                        Some(Ok(Event::default()
                            .event(event_name(&event.payload))
                            .json_data(&event)
                            .unwrap_or_default()))
                    } else {
                        None
                    }
                })
            }
        },
    );
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ============== WebSocket subscription protocol ==============

async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params.token.as_deref().unwrap_or("");
    let principal = match state.sessions.resolve(token) {
        Ok(p) => p,
        Err(_) => return (StatusCode::UNAUTHORIZED, "invalid or missing token").into_response(),
    };
    ws.on_upgrade(move |socket| handle_websocket(socket, state, principal))
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> Result<(), axum::Error> {
    match serde_json::to_string(frame) {
        Ok(json) => socket.send(Message::Text(json.into())).await,
        Err(_) => Ok(()),
    }
}

fn authorize_topics(
    state: &AppState,
    principal: &Principal,
    requested: &[String],
) -> (Vec<String>, Vec<String>) {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    for channel in requested {
        match Topic::parse(channel) {
            Some(topic) if state.sessions.authorizes(principal, &topic) => {
                accepted.push(channel.clone())
            }
            _ => rejected.push(channel.clone()),
        }
    }
    (accepted, rejected)
}

/// Resync snapshot for freshly subscribed topics: the events a live mutation
/// would have produced, computed from current authoritative state.
pub fn resync_events(state: &AppState, channels: &[String]) -> Vec<QueueEvent> {
    let mut events = Vec::new();
    for channel in channels {
        match Topic::parse(channel) {
            Some(Topic::Queue(queue_id)) => {
                if let Some(summary) = state.engine.summary(&queue_id) {
                    events.push(QueueEvent {
                        topic: channel.clone(),
                        at: summary.updated_at,
                        payload: EventPayload::QueueSummary { summary },
                    });
                }
            }
            Some(Topic::Business(business_id)) => {
                for config in state.registry.queues_for_business(&business_id) {
                    if let Some(summary) = state.engine.summary(&config.id) {
                        events.push(QueueEvent {
                            topic: channel.clone(),
                            at: summary.updated_at,
                            payload: EventPayload::QueueSummary { summary },
                        });
                    }
                }
            }
            Some(Topic::Customer(customer_id)) => {
                for ticket in state.engine.active_tickets_for_customer(&customer_id) {
                    events.push(QueueEvent {
                        topic: channel.clone(),
                        at: now_ms(),
                        payload: EventPayload::TicketUpdate { ticket },
                    });
                }
            }
            None => {}
        }
    }
    events
}

async fn handle_websocket(mut socket: WebSocket, state: AppState, principal: Principal) {
    let mut rx = state.engine.subscribe_events();
    let mut topics: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !topics.contains(&event.topic) {
                            continue;
                        }
                        if send_frame(&mut socket, &ServerFrame::Event(event)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        // Dropped events are healed by the periodic sweep and
                        // by a client-initiated resubscribe.
                        warn!(missed, "websocket subscriber lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame::Subscribe { topics: requested }) => {
                                let (accepted, rejected) =
                                    authorize_topics(&state, &principal, &requested);
                                for channel in &accepted {
                                    topics.insert(channel.clone());
                                }
                                let snapshot = resync_events(&state, &accepted);
                                if send_frame(&mut socket, &ServerFrame::Subscribed {
                                    topics: accepted,
                                    rejected,
                                })
                                .await
                                .is_err()
                                {
                                    break;
                                }
                                if send_frame(&mut socket, &ServerFrame::Snapshot {
                                    events: snapshot,
                                })
                                .await
                                .is_err()
                                {
                                    break;
                                }
                            }
                            Ok(ClientFrame::Unsubscribe { topics: removed }) => {
                                for channel in &removed {
                                    topics.remove(channel);
                                }
                            }
                            Ok(ClientFrame::Ping) => {
                                if send_frame(&mut socket, &ServerFrame::Pong).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                let frame = ServerFrame::Error {
                                    message: format!("invalid frame: {e}"),
                                };
                                if send_frame(&mut socket, &frame).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Binary(_))) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
}
