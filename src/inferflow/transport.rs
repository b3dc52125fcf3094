//! Observer Transport
//!
//! The wire surface of the orchestration: a WebSocket endpoint carrying the
//! framed event stream to each observer, plus the request/response run API.
//!
//! # WebSocket protocol (`GET /events`)
//!
//! A freshly accepted connection receives one synthetic
//! `connection:established` frame before anything else, then every bus event
//! as `{"type": ..., "data": ...}` frames (optionally filtered by `run_id` or
//! a `kind` prefix query parameter). Commands accepted from the client:
//!
//! - `ping` → replied with `pong` on the same socket
//! - `input:submit {request_id, answer}` → forwarded to the rendezvous
//! - `input:cancel {request_id}` → forwarded to the rendezvous
//! - `run:cancel {run_id}` → forwarded to the facade
//!
//! A disconnecting observer merely releases its bus subscription; pending
//! input requests stay open and can be answered by any other observer.
//!
//! # Run API
//!
//! - `POST /runs`: start a run, returns `{run_id, ...}`
//! - `GET /runs/{run_id}/status`
//! - `GET /runs/{run_id}/events?since=`: page of journaled events
//! - `POST /runs/{run_id}/cancel`
//! - `GET /inputs/pending`, `POST /inputs/{request_id}/submit`,
//!   `POST /inputs/{request_id}/cancel`
//! - `GET /agents`, `GET /history?limit=`, `GET /mappings`

use crate::inferflow::event::{Event, Frame};
use crate::inferflow::facade::{FacadeError, OrchestrationFacade, RunOverrides};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::error::Error;
use std::net::SocketAddr;

/// Body of `POST /runs`.
#[derive(Debug, Deserialize)]
struct RunRequest {
    sequence_name: String,
    #[serde(default)]
    input_data: serde_json::Value,
    #[serde(default)]
    flow_index: Option<String>,
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    concept_name: Option<String>,
}

/// Query parameters of the WebSocket endpoint.
#[derive(Debug, Default, Clone, Deserialize)]
struct EventFilter {
    /// Only forward events belonging to this run.
    run_id: Option<String>,
    /// Only forward frames whose type starts with this prefix.
    kind: Option<String>,
}

impl EventFilter {
    /// Whether an event passes the filter. Events that carry no run id (bus
    /// housekeeping, tool events correlated by flow index) pass a run filter,
    /// so observers never lose the surrounding context.
    fn passes(&self, event: &Event, frame_type: &str) -> bool {
        if let Some(kind) = &self.kind {
            if !frame_type.starts_with(kind.as_str()) {
                return false;
            }
        }
        if let Some(run_id) = &self.run_id {
            if let Some(event_run) = event.run_id() {
                return event_run == run_id;
            }
        }
        true
    }
}

/// Decode and dispatch one inbound observer command. Returns the frame to
/// send back on the same socket, if any.
fn handle_command(facade: &OrchestrationFacade, text: &str) -> Option<Frame> {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(_) => {
            log::warn!("observer sent invalid JSON");
            return None;
        }
    };
    match frame.frame_type.as_str() {
        "ping" => Some(Event::Pong.to_frame()),
        "input:submit" => {
            let request_id = frame.data["request_id"].as_str().unwrap_or("");
            let accepted = facade.submit_input(request_id, frame.data["answer"].clone());
            if !accepted {
                log::warn!("input:submit rejected for request {}", request_id);
            }
            None
        }
        "input:cancel" => {
            let request_id = frame.data["request_id"].as_str().unwrap_or("");
            facade.cancel_input(request_id);
            None
        }
        "run:cancel" => {
            let run_id = frame.data["run_id"].as_str().unwrap_or("");
            facade.cancel(run_id);
            None
        }
        other => {
            log::warn!("observer sent unknown command type '{}'", other);
            None
        }
    }
}

async fn observer_session(socket: WebSocket, facade: OrchestrationFacade, filter: EventFilter) {
    let (mut sink, mut stream) = socket.split();

    // The synthetic hello frame precedes any event.
    let hello = Event::ConnectionEstablished {
        message: "Connected to the orchestration event stream".to_string(),
    }
    .to_frame();
    if send_frame(&mut sink, &hello).await.is_err() {
        return;
    }

    let mut subscription = facade.bus().subscribe();
    log::info!("observer connected");

    loop {
        tokio::select! {
            event = subscription.recv() => {
                match event {
                    None => break,
                    Some(event) => {
                        let frame = event.to_frame();
                        if filter.passes(&event, &frame.frame_type)
                            && send_frame(&mut sink, &frame).await.is_err()
                        {
                            break;
                        }
                    }
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_command(&facade, text.as_str()) {
                            if send_frame(&mut sink, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    // Dropping the subscription releases this observer's buffer; pending
    // input requests stay answerable by other observers.
    log::info!("observer disconnected");
}

async fn send_frame<S>(sink: &mut S, frame: &Frame) -> Result<(), ()>
where
    S: futures_util::Sink<Message> + Unpin,
{
    let payload = match serde_json::to_string(frame) {
        Ok(payload) => payload,
        Err(_) => return Err(()),
    };
    sink.send(Message::Text(payload.into())).await.map_err(|_| ())
}

async fn events_endpoint(
    ws: WebSocketUpgrade,
    Query(filter): Query<EventFilter>,
    State(facade): State<OrchestrationFacade>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| observer_session(socket, facade, filter))
}

async fn run_endpoint(
    State(facade): State<OrchestrationFacade>,
    Json(request): Json<RunRequest>,
) -> impl IntoResponse {
    let overrides = RunOverrides {
        flow_index: request.flow_index,
        agent_id: request.agent_id,
        concept_name: request.concept_name,
    };
    match facade.run(&request.sequence_name, request.input_data, overrides) {
        Ok(handle) => (StatusCode::OK, Json(json!(handle))).into_response(),
        Err(error @ FacadeError::UnknownSequence(_))
        | Err(error @ FacadeError::UnknownAgent(_)) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": error.to_string()})),
        )
            .into_response(),
        Err(error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": error.to_string()})),
        )
            .into_response(),
    }
}

async fn status_endpoint(
    State(facade): State<OrchestrationFacade>,
    Path(run_id): Path<String>,
) -> impl IntoResponse {
    match facade.status(&run_id) {
        Some(report) => (StatusCode::OK, Json(json!(report))).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("unknown run {}", run_id)})),
        )
            .into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct EventsQuery {
    since: Option<u64>,
}

async fn run_events_endpoint(
    State(facade): State<OrchestrationFacade>,
    Path(run_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    match facade.events(&run_id, query.since) {
        Some(records) => (StatusCode::OK, Json(json!({ "events": records }))).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("unknown run {}", run_id)})),
        )
            .into_response(),
    }
}

async fn cancel_endpoint(
    State(facade): State<OrchestrationFacade>,
    Path(run_id): Path<String>,
) -> impl IntoResponse {
    let cancelled = facade.cancel(&run_id);
    (StatusCode::OK, Json(json!({ "cancelled": cancelled })))
}

async fn pending_inputs_endpoint(State(facade): State<OrchestrationFacade>) -> impl IntoResponse {
    let pending: Vec<serde_json::Value> = facade
        .pending_inputs()
        .into_iter()
        .map(|request| {
            let mut entry = json!({
                "request_id": request.id,
                "prompt": request.prompt,
                "options": request.options,
                "flow_index": request.flow_index,
                "created_at": request.created_at,
            });
            // The interaction kind's fields sit directly in the entry, the
            // same shape `input:request` frames use.
            if let (Some(fields), Ok(serde_json::Value::Object(kind))) =
                (entry.as_object_mut(), serde_json::to_value(&request.kind))
            {
                for (key, value) in kind {
                    fields.insert(key, value);
                }
            }
            entry
        })
        .collect();
    (StatusCode::OK, Json(json!({ "pending": pending })))
}

#[derive(Debug, Deserialize)]
struct SubmitBody {
    #[serde(default)]
    answer: serde_json::Value,
}

async fn submit_input_endpoint(
    State(facade): State<OrchestrationFacade>,
    Path(request_id): Path<String>,
    Json(body): Json<SubmitBody>,
) -> impl IntoResponse {
    let accepted = facade.submit_input(&request_id, body.answer);
    (StatusCode::OK, Json(json!({ "accepted": accepted })))
}

async fn cancel_input_endpoint(
    State(facade): State<OrchestrationFacade>,
    Path(request_id): Path<String>,
) -> impl IntoResponse {
    let cancelled = facade.cancel_input(&request_id);
    (StatusCode::OK, Json(json!({ "cancelled": cancelled })))
}

async fn agents_endpoint(State(facade): State<OrchestrationFacade>) -> impl IntoResponse {
    let agents: Vec<serde_json::Value> = facade
        .registry()
        .list_agents()
        .into_iter()
        .map(|config| {
            json!({
                "id": config.id,
                "name": config.name,
                "llm_model": config.llm_model,
                "enabled_tools": config.enabled_tools,
            })
        })
        .collect();
    (StatusCode::OK, Json(json!({ "agents": agents })))
}

#[derive(Debug, Default, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn history_endpoint(
    State(facade): State<OrchestrationFacade>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let history = facade.registry().history(query.limit.unwrap_or(100));
    (StatusCode::OK, Json(json!({ "history": history })))
}

async fn mappings_endpoint(State(facade): State<OrchestrationFacade>) -> impl IntoResponse {
    (StatusCode::OK, Json(facade.mapping().snapshot()))
}

/// The transport's route table over one facade.
pub fn router(facade: OrchestrationFacade) -> Router {
    Router::new()
        .route("/events", get(events_endpoint))
        .route("/runs", post(run_endpoint))
        .route("/runs/{run_id}/status", get(status_endpoint))
        .route("/runs/{run_id}/events", get(run_events_endpoint))
        .route("/runs/{run_id}/cancel", post(cancel_endpoint))
        .route("/inputs/pending", get(pending_inputs_endpoint))
        .route("/inputs/{request_id}/submit", post(submit_input_endpoint))
        .route("/inputs/{request_id}/cancel", post(cancel_input_endpoint))
        .route("/agents", get(agents_endpoint))
        .route("/history", get(history_endpoint))
        .route("/mappings", get(mappings_endpoint))
        .with_state(facade)
}

/// A running observer server.
pub struct ObserverServer {
    addr: SocketAddr,
    handle: tokio::task::JoinHandle<std::io::Result<()>>,
}

impl ObserverServer {
    /// Address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections.
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

/// Bind and serve the transport for `facade` on `addr` (use port 0 for an
/// ephemeral port).
pub async fn serve(
    facade: OrchestrationFacade,
    addr: SocketAddr,
) -> Result<ObserverServer, Box<dyn Error + Send + Sync>> {
    let app = router(facade);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    log::info!("observer transport listening on {}", addr);
    let handle = tokio::spawn(async move { axum::serve(listener, app).await });
    Ok(ObserverServer { addr, handle })
}
