use std::collections::HashMap;
use std::path::Path;

use quizduel_shared::document::{apply_ops, build_document, check_guards, DocError, FieldOp, Guard, Timestamp};
use quizduel_shared::protocol::ErrorCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Longest accepted document key
pub const MAX_KEY_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDoc {
    pub version: u64,
    pub doc: Value,
}

/// A write request against one key.
#[derive(Debug, Clone)]
pub enum Write {
    Set { ops: Vec<FieldOp> },
    Create { ops: Vec<FieldOp> },
    Update { guards: Vec<Guard>, ops: Vec<FieldOp> },
}

/// Result of a committed write.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub key: String,
    pub version: u64,
    pub doc: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("document '{0}' not found")]
    NotFound(String),
    #[error("document '{0}' already exists")]
    AlreadyExists(String),
    #[error("{0}")]
    Precondition(DocError),
    #[error("{0}")]
    InvalidPath(DocError),
    #[error("document is {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },
    #[error("snapshot file: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot file: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::InvalidKey(_) | StoreError::InvalidPath(_) => ErrorCode::InvalidPath,
            StoreError::NotFound(_) => ErrorCode::NotFound,
            StoreError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            StoreError::Precondition(_) => ErrorCode::PreconditionFailed,
            StoreError::TooLarge { .. } => ErrorCode::TooLarge,
            StoreError::Io(_) | StoreError::Json(_) => ErrorCode::Internal,
        }
    }
}

impl From<DocError> for StoreError {
    fn from(e: DocError) -> Self {
        match e {
            DocError::GuardFailed(_) => StoreError::Precondition(e),
            other => StoreError::InvalidPath(other),
        }
    }
}

pub fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() || key.len() > MAX_KEY_LEN || key.chars().any(char::is_control) {
        return Err(StoreError::InvalidKey(key.chars().take(MAX_KEY_LEN).collect()));
    }
    Ok(())
}

/// Keyed JSON documents. Owned by the store loop task; every write goes
/// through [`DocumentStore::write`], which is atomic per call.
pub struct DocumentStore {
    docs: HashMap<String, StoredDoc>,
    max_document_bytes: usize,
    dirty: bool,
}

impl DocumentStore {
    pub fn new(max_document_bytes: usize) -> Self {
        Self {
            docs: HashMap::new(),
            max_document_bytes,
            dirty: false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&StoredDoc> {
        self.docs.get(key)
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Apply a write and bump the key's version. Nothing changes on error.
    pub fn write(&mut self, key: &str, write: Write, now: Timestamp) -> Result<Commit, StoreError> {
        validate_key(key)?;

        let next = match write {
            Write::Set { ops } => build_document(&ops, now)?,
            Write::Create { ops } => {
                if self.docs.contains_key(key) {
                    return Err(StoreError::AlreadyExists(key.to_string()));
                }
                build_document(&ops, now)?
            }
            Write::Update { guards, ops } => {
                let current = self
                    .docs
                    .get(key)
                    .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
                check_guards(&current.doc, &guards)?;
                let mut doc = current.doc.clone();
                apply_ops(&mut doc, &ops, now)?;
                doc
            }
        };

        let size = serde_json::to_vec(&next)?.len();
        if size > self.max_document_bytes {
            return Err(StoreError::TooLarge {
                size,
                max: self.max_document_bytes,
            });
        }

        let version = self.docs.get(key).map_or(1, |d| d.version + 1);
        self.docs.insert(
            key.to_string(),
            StoredDoc {
                version,
                doc: next.clone(),
            },
        );
        self.dirty = true;
        Ok(Commit {
            key: key.to_string(),
            version,
            doc: next,
        })
    }

    /// Replace contents with a snapshot file. A missing file is an empty store.
    pub fn load(&mut self, path: &Path) -> Result<usize, StoreError> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        self.docs = serde_json::from_slice(&bytes)?;
        self.dirty = false;
        Ok(self.docs.len())
    }

    /// Copy of every document if anything changed since the last call. The
    /// dirty flag is cleared; call [`DocumentStore::mark_dirty`] if writing
    /// the copy fails.
    pub fn take_dirty(&mut self) -> Option<HashMap<String, StoredDoc>> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(self.docs.clone())
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

/// Write a snapshot file. The file is replaced via rename so a crash never
/// leaves a torn snapshot. Blocking.
pub fn write_snapshot(path: &Path, docs: &HashMap<String, StoredDoc>) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_vec(docs)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
