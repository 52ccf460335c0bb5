use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use quizduel_shared::protocol::{
    ClientMsg, ErrorCode, Outcome, ReplyMsg, ServerMsg, SnapshotMsg, WelcomeMsg, PROTOCOL_VERSION,
};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, OwnedSemaphorePermit, Semaphore};

use crate::config::origin_allowed;
use crate::store::{validate_key, Write};
use crate::store_loop::{StoreBroadcast, StoreCommand};

/// Shared app state passed to each WebSocket handler
#[derive(Clone)]
pub struct AppState {
    pub store_tx: mpsc::Sender<StoreCommand>,
    pub broadcast_tx: broadcast::Sender<StoreBroadcast>,
    pub connections: Arc<Semaphore>,
    pub allowed_origins: Arc<Vec<String>>,
    /// Frames larger than this close the connection
    pub max_message_bytes: usize,
}

/// Malformed frames tolerated before the connection is closed
pub const MAX_PARSE_ERRORS: u32 = 5;

/// HTTP handler for WebSocket upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(app_state): State<AppState>,
) -> Response {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !origin_allowed(&app_state.allowed_origins, origin) {
        tracing::warn!("Rejected connection from origin {:?}", origin);
        return StatusCode::FORBIDDEN.into_response();
    }

    let permit = match app_state.connections.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            tracing::warn!("Connection limit reached");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, app_state, permit))
}

type Sink = SplitSink<WebSocket, Message>;

async fn send(sink: &mut Sink, msg: &ServerMsg) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sink.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!("Failed to encode server message: {}", e);
            true
        }
    }
}

async fn handle_socket(socket: WebSocket, app_state: AppState, _permit: OwnedSemaphorePermit) {
    let (mut sink, mut stream) = socket.split();

    let welcome = ServerMsg::Welcome(WelcomeMsg {
        protocol_version: PROTOCOL_VERSION,
        server_version: env!("CARGO_PKG_VERSION").to_string(),
    });
    if !send(&mut sink, &welcome).await {
        return;
    }
    tracing::info!("Client connected");

    // Subscribe before any snapshot is read so no commit falls in between.
    let mut broadcast_rx = app_state.broadcast_tx.subscribe();
    // Subscribed key -> last version sent on this socket
    let mut subscriptions: HashMap<String, u64> = HashMap::new();
    let mut parse_errors = 0u32;

    loop {
        tokio::select! {
            // Client -> Server
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > app_state.max_message_bytes {
                            tracing::warn!("Oversized frame ({} bytes), closing", text.len());
                            break;
                        }
                        let out = match serde_json::from_str::<ClientMsg>(&text) {
                            Ok(msg) => handle_msg(msg, &app_state, &mut subscriptions).await,
                            Err(e) => {
                                parse_errors += 1;
                                tracing::warn!("Malformed client message: {}", e);
                                if parse_errors >= MAX_PARSE_ERRORS {
                                    tracing::warn!("Too many malformed messages, closing");
                                    break;
                                }
                                malformed_reply(&text, &e)
                            }
                        };
                        let Some(out) = out else { continue };
                        if !send(&mut sink, &out).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::warn!("Socket error: {}", e);
                        break;
                    }
                    _ => {} // Ignore ping/pong/binary
                }
            }

            // Server -> Client (changes on subscribed keys)
            result = broadcast_rx.recv() => {
                match result {
                    Ok(StoreBroadcast::Changed(snapshot)) => {
                        let Some(last) = subscriptions.get_mut(&snapshot.key) else {
                            continue; // Not subscribed
                        };
                        if snapshot.version <= *last {
                            continue; // Already covered by the initial snapshot
                        }
                        *last = snapshot.version;
                        if !send(&mut sink, &ServerMsg::Snapshot(snapshot)).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Missed commits cannot be replayed; drop the client so it resyncs.
                        tracing::warn!("Client lagged by {} changes, closing", n);
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::info!("Client disconnected ({} subscriptions)", subscriptions.len());
}

/// A request that names a `reqId` still gets a reply when it fails to parse.
fn malformed_reply(text: &str, e: &serde_json::Error) -> Option<ServerMsg> {
    let req_id = serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v.get("reqId").and_then(Value::as_u64))?;
    Some(reply(
        req_id,
        Outcome::err(ErrorCode::Internal, format!("malformed request: {e}")),
    ))
}

/// Handle one request. Returns the message to send back, if any.
async fn handle_msg(
    msg: ClientMsg,
    app_state: &AppState,
    subscriptions: &mut HashMap<String, u64>,
) -> Option<ServerMsg> {
    if let Err(e) = validate_key(msg.key()) {
        tracing::warn!("{}", e);
        return msg
            .req_id()
            .map(|id| reply(id, Outcome::err(e.code(), e.to_string())));
    }

    match msg {
        ClientMsg::Get { req_id, key } => {
            let outcome = match get_snapshot(app_state, key).await {
                Some(snapshot) => Outcome::Ok { doc: snapshot.doc },
                None => store_gone(),
            };
            Some(reply(req_id, outcome))
        }
        ClientMsg::Set { req_id, key, ops } => {
            Some(reply(req_id, write(app_state, key, Write::Set { ops }).await))
        }
        ClientMsg::Create { req_id, key, ops } => {
            Some(reply(req_id, write(app_state, key, Write::Create { ops }).await))
        }
        ClientMsg::Update {
            req_id,
            key,
            guards,
            ops,
        } => Some(reply(
            req_id,
            write(app_state, key, Write::Update { guards, ops }).await,
        )),
        ClientMsg::Subscribe { key } => {
            let snapshot = get_snapshot(app_state, key.clone()).await?;
            tracing::info!("Subscribed to {}", key);
            subscriptions.insert(key, snapshot.version);
            Some(ServerMsg::Snapshot(snapshot))
        }
        ClientMsg::Unsubscribe { key } => {
            subscriptions.remove(&key);
            None
        }
    }
}

fn reply(req_id: u64, outcome: Outcome) -> ServerMsg {
    ServerMsg::Reply(ReplyMsg { req_id, outcome })
}

fn store_gone() -> Outcome {
    tracing::error!("Store loop is not running");
    Outcome::err(ErrorCode::Internal, "store unavailable")
}

async fn get_snapshot(app_state: &AppState, key: String) -> Option<SnapshotMsg> {
    let (response, rx) = oneshot::channel();
    app_state
        .store_tx
        .send(StoreCommand::Get { key, response })
        .await
        .ok()?;
    rx.await.ok()
}

async fn write(app_state: &AppState, key: String, write: Write) -> Outcome {
    let (response, rx) = oneshot::channel();
    if app_state
        .store_tx
        .send(StoreCommand::Write {
            key,
            write,
            response,
        })
        .await
        .is_err()
    {
        return store_gone();
    }
    match rx.await {
        Ok(Ok(commit)) => Outcome::Ok {
            doc: Some(commit.doc),
        },
        Ok(Err(e)) => Outcome::err(e.code(), e.to_string()),
        Err(_) => store_gone(),
    }
}
