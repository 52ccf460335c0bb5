//! Client side of the document store.
//!
//! [`DocumentStore`] is the seam the room session talks to. Two backends:
//! [`memory::MemoryStore`] for tests and offline play, and
//! [`remote::RemoteStore`] speaking the WebSocket protocol to the store server.

pub mod memory;
pub mod remote;

use std::future::Future;

use quizduel_shared::document::{DocError, FieldOp, Guard};
use quizduel_shared::protocol::ErrorCode;
use serde_json::Value;
use tokio::sync::mpsc;

pub use memory::MemoryStore;
pub use remote::RemoteStore;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("{code:?}: {message}")]
    Rejected { code: ErrorCode, message: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("invalid store url: {0}")]
    InvalidUrl(String),
    #[error("protocol mismatch: server speaks v{server}, client v{client}")]
    ProtocolMismatch { server: u32, client: u32 },
}

impl StoreError {
    pub fn rejected(code: ErrorCode, message: impl Into<String>) -> Self {
        StoreError::Rejected {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::Rejected { code, .. } => *code,
            StoreError::Transport(_)
            | StoreError::InvalidUrl(_)
            | StoreError::ProtocolMismatch { .. } => ErrorCode::Transport,
        }
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.code() == code
    }
}

impl From<DocError> for StoreError {
    fn from(e: DocError) -> Self {
        let code = match e {
            DocError::GuardFailed(_) => ErrorCode::PreconditionFailed,
            _ => ErrorCode::InvalidPath,
        };
        StoreError::rejected(code, e.to_string())
    }
}

/// One change notification. `doc` is `None` while the key does not exist.
#[derive(Debug, Clone, PartialEq)]
pub struct DocSnapshot {
    pub key: String,
    pub doc: Option<Value>,
}

/// Live feed of one key. The current document arrives first, then every
/// committed change in order. Dropping it unsubscribes.
pub struct Subscription {
    key: String,
    rx: mpsc::UnboundedReceiver<DocSnapshot>,
    on_drop: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(
        key: impl Into<String>,
        rx: mpsc::UnboundedReceiver<DocSnapshot>,
        on_drop: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            rx,
            on_drop: Some(Box::new(on_drop)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Next notification, `None` once the store side is gone.
    pub async fn recv(&mut self) -> Option<DocSnapshot> {
        self.rx.recv().await
    }

    /// Next notification if one is already queued.
    pub fn try_recv(&mut self) -> Option<DocSnapshot> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.on_drop.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("key", &self.key).finish()
    }
}

/// Keyed JSON documents with atomic writes and change subscriptions.
///
/// Writes resolve to the document as committed.
pub trait DocumentStore: Clone + Send + Sync + 'static {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Value>, StoreError>> + Send;

    /// Replace the document with `ops` applied to an empty object.
    fn set(
        &self,
        key: &str,
        ops: Vec<FieldOp>,
    ) -> impl Future<Output = Result<Value, StoreError>> + Send;

    /// Like `set`, failing with `alreadyExists` when the key is present.
    fn create(
        &self,
        key: &str,
        ops: Vec<FieldOp>,
    ) -> impl Future<Output = Result<Value, StoreError>> + Send;

    /// Check `guards`, then apply `ops`; all or nothing.
    fn update(
        &self,
        key: &str,
        guards: Vec<Guard>,
        ops: Vec<FieldOp>,
    ) -> impl Future<Output = Result<Value, StoreError>> + Send;

    fn subscribe(&self, key: &str) -> impl Future<Output = Result<Subscription, StoreError>> + Send;
}
