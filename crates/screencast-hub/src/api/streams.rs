//! Server-sent status stream.

use std::collections::VecDeque;
use std::time::Instant;

use actix_web::http::header;
use actix_web::web::Bytes;
use actix_web::{Error, HttpResponse, Responder, get, web};
use futures_util::{Stream, stream::unfold};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Duration, Interval, MissedTickBehavior};

use crate::events::HubEvent;
use crate::state::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(15);

struct StatusStreamState {
    state: web::Data<AppState>,
    receiver: broadcast::Receiver<HubEvent>,
    interval: Interval,
    pending: VecDeque<Bytes>,
    last_status: Option<String>,
    last_ping: Instant,
}

pub(crate) fn sse_event(event: &str, data: &str) -> Bytes {
    let mut payload = String::new();
    payload.push_str("event: ");
    payload.push_str(event);
    payload.push('\n');
    for line in data.lines() {
        payload.push_str("data: ");
        payload.push_str(line);
        payload.push('\n');
    }
    payload.push('\n');
    Bytes::from(payload)
}

fn push_ping_if_needed(pending: &mut VecDeque<Bytes>, last_ping: &mut Instant) {
    if pending.is_empty() && last_ping.elapsed() >= PING_INTERVAL {
        *last_ping = Instant::now();
        pending.push_back(Bytes::from(": ping\n\n"));
    }
}

fn sse_response<S>(stream: S) -> HttpResponse
where
    S: Stream<Item = Result<Bytes, Error>> + 'static,
{
    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header((header::CONNECTION, "keep-alive"))
        .streaming(stream)
}

fn snapshot_json(state: &AppState) -> String {
    serde_json::to_string(&state.registry.snapshot()).unwrap_or_else(|_| "null".to_string())
}

/// Named event for one bus event; `DevicesChanged` is covered by the status snapshot.
pub(crate) fn hub_event(state: &AppState, event: &HubEvent) -> Option<Bytes> {
    let (name, payload) = match event {
        HubEvent::DeviceStatus { host, status } => {
            ("device_status", json!({ "host": host, "status": status }))
        }
        HubEvent::PlayerStatus { host, status } => {
            ("player_status", json!({ "host": host, "status": status }))
        }
        HubEvent::PipelineChanged { screen } => {
            let snapshot = state
                .registry
                .screen_snapshots()
                .into_iter()
                .find(|s| &s.name == screen)?;
            ("pipeline", json!(snapshot))
        }
        HubEvent::DevicesChanged => return None,
    };
    Some(sse_event(name, &payload.to_string()))
}

#[utoipa::path(
    get,
    path = "/status/stream",
    responses(
        (status = 200, description = "Status event stream")
    )
)]
#[get("/status/stream")]
/// Stream raw device/player status and pipeline changes, plus registry snapshots
/// whenever a screen or device changes.
pub async fn status_stream(state: web::Data<AppState>) -> impl Responder {
    let initial_json = snapshot_json(&state);
    let mut pending = VecDeque::new();
    pending.push_back(sse_event("status", &initial_json));

    let mut interval = tokio::time::interval(Duration::from_secs(5));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let receiver = state.events.subscribe();

    let stream = unfold(
        StatusStreamState {
            state: state.clone(),
            receiver,
            interval,
            pending,
            last_status: Some(initial_json),
            last_ping: Instant::now(),
        },
        |mut ctx| async move {
            loop {
                if let Some(bytes) = ctx.pending.pop_front() {
                    return Some((Ok::<Bytes, Error>(bytes), ctx));
                }

                // Heartbeats land in the registry without an event; ticks pick them up.
                tokio::select! {
                    _ = ctx.interval.tick() => {}
                    result = ctx.receiver.recv() => match result {
                        Ok(event) => {
                            if let Some(bytes) = hub_event(&ctx.state, &event) {
                                ctx.pending.push_back(bytes);
                            }
                        }
                        Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => return None,
                    },
                }

                let json = snapshot_json(&ctx.state);
                if ctx.last_status.as_deref() != Some(json.as_str()) {
                    ctx.last_status = Some(json.clone());
                    ctx.pending.push_back(sse_event("status", &json));
                }

                push_ping_if_needed(&mut ctx.pending, &mut ctx.last_ping);
            }
        },
    );

    sse_response(stream)
}
