use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::Method,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use textpilot_shared::constants::routes;
use textpilot_shared::protocol::{ProfilePicture, SSE_EVENT_MESSAGE, SSE_EVENT_QR, SSE_EVENT_READY};
use textpilot_shared::{
    BrokerEvent, ChatId, ChatInfo, Contact, Message, MessageId, SendMessageRequest,
    StatusSnapshot,
};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::service::ChatService;
use crate::streams;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ChatService>,
    pub config: Arc<ServerConfig>,
    pub started_at: Instant,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route(routes::HEALTH, get(health_check))
        .route(routes::INFO, get(server_info))
        .route(routes::STATUS, get(connection_status))
        .route(routes::DISCONNECT, post(disconnect))
        .route(routes::STREAM_QR, get(qr_code_sse))
        .route(routes::STREAM_READY, get(is_ready_sse))
        .route(routes::STREAM_MESSAGES, get(messages_sse))
        .route(routes::STREAM_EVENTS, get(events_sse))
        .route(routes::MESSAGES, post(send_message))
        .route(routes::MESSAGE_BY_ID, get(get_message))
        .route(routes::CHATS, get(list_chats))
        .route(routes::CHAT_BY_ID, get(get_chat))
        .route(routes::CONTACT, get(get_contact))
        .route(routes::CONTACT_PICTURE, get(get_profile_picture))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    ready: bool,
    subscribers: usize,
    uptime_secs: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContactResponse {
    #[serde(flatten)]
    contact: Contact,
    display_name: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    let broker = state.service.broker();
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        ready: broker.snapshot().ready,
        subscribers: broker.subscriber_count(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

async fn connection_status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.service.broker().snapshot())
}

async fn disconnect(State(state): State<AppState>) -> Result<Json<StatusSnapshot>, ServerError> {
    let snapshot = state.service.disconnect().await?;
    info!("Session closed on request");
    Ok(Json(snapshot))
}

// ─── Streams ───

fn sse_event<T: Serialize>(name: &'static str, data: &T) -> Option<Event> {
    match serde_json::to_string(data) {
        Ok(json) => Some(Event::default().event(name).data(json)),
        Err(e) => {
            warn!(event = name, error = %e, "Dropping unserializable SSE frame");
            None
        }
    }
}

/// Frames carry the event payload only, so each SSE event name has one
/// data shape whichever stream it arrives on.
fn event_frame(event: &BrokerEvent) -> Option<Event> {
    let name = event.sse_name();
    match event {
        BrokerEvent::QrUpdated(code) => sse_event(name, code),
        BrokerEvent::StatusChanged(status) => sse_event(name, status),
        BrokerEvent::MessageReceived(message) => sse_event(name, message),
    }
}

fn into_sse<S>(stream: S, config: &ServerConfig) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = Event> + Send + 'static,
{
    Sse::new(stream.map(Ok)).keep_alive(KeepAlive::new().interval(config.sse_keepalive))
}

async fn qr_code_sse(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("QR stream opened");
    let frames = streams::qr_code_stream(
        state.service.broker().watch_snapshot(),
        state.config.qr_poll_interval,
    )
    .filter_map(|code| async move { sse_event(SSE_EVENT_QR, &code) });
    into_sse(frames, &state.config)
}

async fn is_ready_sse(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("Readiness stream opened");
    let frames = streams::ready_stream(
        state.service.broker().watch_snapshot(),
        state.config.ready_poll_interval,
    )
    .filter_map(|ready| async move { sse_event(SSE_EVENT_READY, &ready) });
    into_sse(frames, &state.config)
}

async fn messages_sse(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let frames = streams::message_stream(state.service.broker())
        .filter_map(|message| async move { sse_event(SSE_EVENT_MESSAGE, &message) });
    into_sse(frames, &state.config)
}

async fn events_sse(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let frames = streams::event_stream(state.service.broker())
        .filter_map(|event| async move { event_frame(&event) });
    into_sse(frames, &state.config)
}

// ─── Commands and lookups ───

async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<Message>, ServerError> {
    let message = state.service.send_message(request).await?;
    info!(msg_id = %message.id, "Send request completed");
    Ok(Json(message))
}

async fn get_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Message>, ServerError> {
    let message = state.service.lookups().message(&MessageId(id)).await?;
    Ok(Json(message))
}

async fn list_chats(State(state): State<AppState>) -> Result<Json<Vec<ChatInfo>>, ServerError> {
    Ok(Json(state.service.chats().await?))
}

async fn get_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ChatInfo>, ServerError> {
    Ok(Json(state.service.chat(&ChatId(id)).await?))
}

async fn get_contact(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ContactResponse>, ServerError> {
    let contact = state.service.lookups().contact(&ChatId(id)).await?;
    Ok(Json(ContactResponse {
        display_name: contact.display_name().to_string(),
        contact,
    }))
}

async fn get_profile_picture(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProfilePicture>, ServerError> {
    let url = state.service.lookups().profile_pic_url(&ChatId(id)).await?;
    Ok(Json(ProfilePicture { url }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
