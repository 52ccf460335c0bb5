use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::document::{FieldOp, Guard};

/// Protocol version - increment when making breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

// === Server -> Client ===

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(tag = "type")]
pub enum ServerMsg {
    #[serde(rename = "welcome")]
    Welcome(WelcomeMsg),
    #[serde(rename = "reply")]
    Reply(ReplyMsg),
    #[serde(rename = "snapshot")]
    Snapshot(SnapshotMsg),
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct WelcomeMsg {
    pub protocol_version: u32,
    pub server_version: String,
}

/// Answer to exactly one request, matched by `req_id`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct ReplyMsg {
    #[ts(type = "number")]
    pub req_id: u64,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Outcome {
    /// `doc` is the document after the request (absent for a missing key).
    Ok {
        #[ts(type = "unknown")]
        doc: Option<Value>,
    },
    Err { code: ErrorCode, message: String },
}

impl Outcome {
    pub fn err(code: ErrorCode, message: impl Into<String>) -> Self {
        Outcome::Err {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    PreconditionFailed,
    InvalidPath,
    TooLarge,
    Transport,
    Internal,
}

/// Change notification for a subscribed key. `version` increases by one per
/// committed write to that key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMsg {
    pub key: String,
    #[ts(type = "number")]
    pub version: u64,
    #[ts(type = "unknown")]
    pub doc: Option<Value>,
}

// === Client -> Server ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    Get {
        #[serde(rename = "reqId")]
        #[ts(type = "number")]
        req_id: u64,
        key: String,
    },
    /// Replace the document with `ops` applied to an empty object.
    Set {
        #[serde(rename = "reqId")]
        #[ts(type = "number")]
        req_id: u64,
        key: String,
        ops: Vec<FieldOp>,
    },
    /// Like `Set`, but fails with `alreadyExists` if the key is present.
    Create {
        #[serde(rename = "reqId")]
        #[ts(type = "number")]
        req_id: u64,
        key: String,
        ops: Vec<FieldOp>,
    },
    /// Check `guards`, then apply `ops` to the existing document.
    Update {
        #[serde(rename = "reqId")]
        #[ts(type = "number")]
        req_id: u64,
        key: String,
        #[serde(default)]
        guards: Vec<Guard>,
        ops: Vec<FieldOp>,
    },
    Subscribe {
        key: String,
    },
    Unsubscribe {
        key: String,
    },
}

impl ClientMsg {
    pub fn req_id(&self) -> Option<u64> {
        match self {
            ClientMsg::Get { req_id, .. }
            | ClientMsg::Set { req_id, .. }
            | ClientMsg::Create { req_id, .. }
            | ClientMsg::Update { req_id, .. } => Some(*req_id),
            ClientMsg::Subscribe { .. } | ClientMsg::Unsubscribe { .. } => None,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            ClientMsg::Get { key, .. }
            | ClientMsg::Set { key, .. }
            | ClientMsg::Create { key, .. }
            | ClientMsg::Update { key, .. }
            | ClientMsg::Subscribe { key }
            | ClientMsg::Unsubscribe { key } => key,
        }
    }
}
