use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use quizduel_shared::document::{FieldOp, Guard};
use quizduel_shared::protocol::{ClientMsg, Outcome, ServerMsg, SnapshotMsg, PROTOCOL_VERSION};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::{DocSnapshot, DocumentStore, StoreError, Subscription};

const WELCOME_TIMEOUT: Duration = Duration::from_secs(5);

type Watchers = HashMap<String, Vec<(u64, mpsc::UnboundedSender<DocSnapshot>)>>;

/// Store server connection. Cheap to clone; all clones share one socket.
///
/// There is no reconnect: once the socket closes, pending requests fail with
/// a transport error and subscriptions end.
#[derive(Clone)]
pub struct RemoteStore {
    shared: Arc<Shared>,
    // Dropping the last handle closes this channel and ends the socket task.
    cmd_tx: mpsc::UnboundedSender<ClientMsg>,
}

struct Shared {
    pending: Mutex<HashMap<u64, oneshot::Sender<Outcome>>>,
    watchers: Mutex<Watchers>,
    next_id: AtomicU64,
    server_version: String,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Normalize a store address: `http(s)` maps to `ws(s)` and a bare host gets
/// the `/ws` path.
pub fn parse_store_url(raw: &str) -> Result<Url, StoreError> {
    let mut url = Url::parse(raw.trim()).map_err(|e| StoreError::InvalidUrl(format!("{raw}: {e}")))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(StoreError::InvalidUrl(format!(
                "{raw}: unsupported scheme '{other}'"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| StoreError::InvalidUrl(format!("{raw}: cannot use scheme {scheme}")))?;
    if url.path().is_empty() || url.path() == "/" {
        url.set_path("/ws");
    }
    Ok(url)
}

impl RemoteStore {
    /// Connect and wait for the server's welcome. A protocol version other
    /// than ours is refused.
    pub async fn connect(raw_url: &str) -> Result<Self, StoreError> {
        let url = parse_store_url(raw_url)?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| StoreError::Transport(format!("connect {url}: {e}")))?;
        let (mut write, mut read) = ws_stream.split();

        let welcome = tokio::time::timeout(WELCOME_TIMEOUT, async {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(txt)) => {
                        return serde_json::from_str::<ServerMsg>(&txt).ok();
                    }
                    Ok(Message::Close(_)) | Err(_) => return None,
                    Ok(_) => {}
                }
            }
            None
        })
        .await;

        let welcome = match welcome {
            Ok(Some(ServerMsg::Welcome(w))) => w,
            Ok(_) => return Err(StoreError::Transport("no welcome from server".into())),
            Err(_) => return Err(StoreError::Transport("timed out waiting for welcome".into())),
        };
        if welcome.protocol_version != PROTOCOL_VERSION {
            let _ = write.close().await;
            return Err(StoreError::ProtocolMismatch {
                server: welcome.protocol_version,
                client: PROTOCOL_VERSION,
            });
        }
        tracing::info!("Connected to store {} (server {})", url, welcome.server_version);

        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<ClientMsg>();
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            server_version: welcome.server_version,
        });

        let io_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    cmd = cmd_rx.recv() => {
                        let Some(cmd) = cmd else {
                            let _ = write.close().await;
                            break;
                        };
                        if let Ok(text) = serde_json::to_string(&cmd) {
                            if write.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                    }

                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(txt))) => {
                                match serde_json::from_str::<ServerMsg>(&txt) {
                                    Ok(server_msg) => io_shared.dispatch(server_msg),
                                    Err(e) => tracing::warn!("Undecodable server message: {}", e),
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::warn!("Store socket error: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
            io_shared.close();
        });

        Ok(Self { shared, cmd_tx })
    }

    pub fn server_version(&self) -> &str {
        &self.shared.server_version
    }

    async fn request(&self, build: impl FnOnce(u64) -> ClientMsg) -> Result<Option<Value>, StoreError> {
        let req_id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).insert(req_id, tx);
        if self.cmd_tx.send(build(req_id)).is_err() {
            lock(&self.shared.pending).remove(&req_id);
            return Err(StoreError::Transport("connection closed".into()));
        }
        match rx.await {
            Ok(Outcome::Ok { doc }) => Ok(doc),
            Ok(Outcome::Err { code, message }) => Err(StoreError::Rejected { code, message }),
            Err(_) => Err(StoreError::Transport("connection closed".into())),
        }
    }

    async fn write(&self, build: impl FnOnce(u64) -> ClientMsg) -> Result<Value, StoreError> {
        self.request(build)
            .await?
            .ok_or_else(|| StoreError::Transport("write reply carried no document".into()))
    }
}

impl Shared {
    fn dispatch(&self, msg: ServerMsg) {
        match msg {
            ServerMsg::Reply(reply) => match lock(&self.pending).remove(&reply.req_id) {
                Some(tx) => {
                    let _ = tx.send(reply.outcome);
                }
                None => tracing::warn!("Reply for unknown request {}", reply.req_id),
            },
            ServerMsg::Snapshot(SnapshotMsg { key, doc, .. }) => {
                let mut watchers = lock(&self.watchers);
                if let Some(list) = watchers.get_mut(&key) {
                    list.retain(|(_, tx)| {
                        tx.send(DocSnapshot {
                            key: key.clone(),
                            doc: doc.clone(),
                        })
                        .is_ok()
                    });
                }
            }
            ServerMsg::Welcome(_) => tracing::warn!("Unexpected second welcome"),
        }
    }

    /// Fail everything waiting on the socket.
    fn close(&self) {
        lock(&self.pending).clear();
        lock(&self.watchers).clear();
        tracing::info!("Store connection closed");
    }
}

impl DocumentStore for RemoteStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let key = key.to_string();
        self.request(|req_id| ClientMsg::Get { req_id, key }).await
    }

    async fn set(&self, key: &str, ops: Vec<FieldOp>) -> Result<Value, StoreError> {
        let key = key.to_string();
        self.write(|req_id| ClientMsg::Set { req_id, key, ops }).await
    }

    async fn create(&self, key: &str, ops: Vec<FieldOp>) -> Result<Value, StoreError> {
        let key = key.to_string();
        self.write(|req_id| ClientMsg::Create { req_id, key, ops })
            .await
    }

    async fn update(
        &self,
        key: &str,
        guards: Vec<Guard>,
        ops: Vec<FieldOp>,
    ) -> Result<Value, StoreError> {
        let key = key.to_string();
        self.write(|req_id| ClientMsg::Update {
            req_id,
            key,
            guards,
            ops,
        })
        .await
    }

    async fn subscribe(&self, key: &str) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.shared.watchers)
            .entry(key.to_string())
            .or_default()
            .push((id, tx));

        // Every subscribe asks for the current document again; watchers that
        // were already attached just see one redundant snapshot.
        if self
            .cmd_tx
            .send(ClientMsg::Subscribe {
                key: key.to_string(),
            })
            .is_err()
        {
            lock(&self.shared.watchers).remove(key);
            return Err(StoreError::Transport("connection closed".into()));
        }

        let shared = Arc::clone(&self.shared);
        let cmd_tx = self.cmd_tx.clone();
        let owned_key = key.to_string();
        Ok(Subscription::new(key, rx, move || {
            let mut watchers = lock(&shared.watchers);
            let Some(list) = watchers.get_mut(&owned_key) else {
                return;
            };
            list.retain(|(watcher, _)| *watcher != id);
            if list.is_empty() {
                watchers.remove(&owned_key);
                let _ = cmd_tx.send(ClientMsg::Unsubscribe { key: owned_key });
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_url_normalized() {
        assert_eq!(
            parse_store_url("ws://127.0.0.1:9002/ws").unwrap().as_str(),
            "ws://127.0.0.1:9002/ws"
        );
        assert_eq!(
            parse_store_url("http://localhost:9002").unwrap().as_str(),
            "ws://localhost:9002/ws"
        );
        assert_eq!(
            parse_store_url("https://quiz.example/store").unwrap().as_str(),
            "wss://quiz.example/store"
        );
    }

    #[test]
    fn bad_store_urls_rejected() {
        assert!(matches!(
            parse_store_url("not a url"),
            Err(StoreError::InvalidUrl(_))
        ));
        assert!(matches!(
            parse_store_url("ftp://host/"),
            Err(StoreError::InvalidUrl(_))
        ));
    }
}
