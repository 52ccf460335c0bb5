use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use quizduel_shared::document::{apply_ops, build_document, check_guards, FieldOp, Guard, Timestamp};
use quizduel_shared::protocol::ErrorCode;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{DocSnapshot, DocumentStore, StoreError, Subscription};

/// In-process store with the same commit semantics as the server.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    docs: HashMap<String, Value>,
    watchers: HashMap<String, Vec<(u64, mpsc::UnboundedSender<DocSnapshot>)>>,
    next_watcher: u64,
}

fn now_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Commits mutate only after all checks pass, so a poisoned map is still whole.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of live subscriptions on `key`.
    pub fn watcher_count(&self, key: &str) -> usize {
        self.lock().watchers.get(key).map_or(0, Vec::len)
    }
}

/// Store `doc` and notify watchers while the caller still holds the lock, so
/// commits and notifications keep one order.
fn commit(inner: &mut Inner, key: &str, doc: Value) -> Value {
    inner.docs.insert(key.to_string(), doc.clone());
    if let Some(watchers) = inner.watchers.get_mut(key) {
        watchers.retain(|(_, tx)| {
            tx.send(DocSnapshot {
                key: key.to_string(),
                doc: Some(doc.clone()),
            })
            .is_ok()
        });
    }
    tracing::debug!("Committed {}", key);
    doc
}

impl DocumentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.lock().docs.get(key).cloned())
    }

    async fn set(&self, key: &str, ops: Vec<FieldOp>) -> Result<Value, StoreError> {
        let doc = build_document(&ops, now_ms())?;
        Ok(commit(&mut self.lock(), key, doc))
    }

    async fn create(&self, key: &str, ops: Vec<FieldOp>) -> Result<Value, StoreError> {
        let doc = build_document(&ops, now_ms())?;
        let mut inner = self.lock();
        if inner.docs.contains_key(key) {
            return Err(StoreError::rejected(
                ErrorCode::AlreadyExists,
                format!("document '{key}' already exists"),
            ));
        }
        Ok(commit(&mut inner, key, doc))
    }

    async fn update(
        &self,
        key: &str,
        guards: Vec<Guard>,
        ops: Vec<FieldOp>,
    ) -> Result<Value, StoreError> {
        let mut inner = self.lock();
        let current = inner.docs.get(key).ok_or_else(|| {
            StoreError::rejected(ErrorCode::NotFound, format!("document '{key}' not found"))
        })?;
        check_guards(current, &guards)?;
        let mut next = current.clone();
        apply_ops(&mut next, &ops, now_ms())?;
        Ok(commit(&mut inner, key, next))
    }

    async fn subscribe(&self, key: &str) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut inner = self.lock();
            let id = inner.next_watcher;
            inner.next_watcher += 1;
            let _ = tx.send(DocSnapshot {
                key: key.to_string(),
                doc: inner.docs.get(key).cloned(),
            });
            inner.watchers.entry(key.to_string()).or_default().push((id, tx));
            id
        };

        let store = self.clone();
        let owned_key = key.to_string();
        Ok(Subscription::new(key, rx, move || {
            let mut inner = store.lock();
            if let Some(watchers) = inner.watchers.get_mut(&owned_key) {
                watchers.retain(|(watcher, _)| *watcher != id);
                if watchers.is_empty() {
                    inner.watchers.remove(&owned_key);
                }
            }
        }))
    }
}
