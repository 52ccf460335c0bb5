//! Field-level operations on JSON documents.
//!
//! These are the store's write primitives. A write is a list of guards that
//! must all hold followed by a list of operations that are applied together:
//! either every operation lands or the document is left untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

/// Milliseconds since the Unix epoch, assigned by the store.
pub type Timestamp = i64;

/// Path of map keys from the document root. Keys may contain any character
/// (player names included), so a path is never a dot-joined string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(transparent)]
pub struct FieldPath(pub Vec<String>);

impl FieldPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum FieldOp {
    /// Replace the value at `path`, creating intermediate objects.
    Set {
        path: FieldPath,
        #[ts(type = "unknown")]
        value: Value,
    },
    /// Set `path` to the store's commit time.
    ServerTimestamp { path: FieldPath },
    /// Add `by` to the integer at `path`; a missing value counts as 0.
    Increment {
        path: FieldPath,
        #[ts(type = "number")]
        by: i64,
    },
    Delete { path: FieldPath },
}

impl FieldOp {
    pub fn set<I, S>(path: I, value: Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldOp::Set {
            path: FieldPath::new(path),
            value,
        }
    }

    pub fn server_timestamp<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldOp::ServerTimestamp {
            path: FieldPath::new(path),
        }
    }

    pub fn increment<I, S>(path: I, by: i64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldOp::Increment {
            path: FieldPath::new(path),
            by,
        }
    }

    pub fn path(&self) -> &FieldPath {
        match self {
            FieldOp::Set { path, .. }
            | FieldOp::ServerTimestamp { path }
            | FieldOp::Increment { path, .. }
            | FieldOp::Delete { path } => path,
        }
    }
}

/// Precondition checked atomically before a write's operations run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(tag = "guard", rename_all = "camelCase")]
pub enum Guard {
    Equals {
        path: FieldPath,
        #[ts(type = "unknown")]
        value: Value,
    },
    Absent { path: FieldPath },
}

impl Guard {
    pub fn equals<I, S>(path: I, value: Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Guard::Equals {
            path: FieldPath::new(path),
            value,
        }
    }

    pub fn absent<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Guard::Absent {
            path: FieldPath::new(path),
        }
    }

    pub fn holds(&self, doc: &Value) -> bool {
        match self {
            Guard::Equals { path, value } => get_path(doc, path) == Some(value),
            Guard::Absent { path } => get_path(doc, path).is_none(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DocError {
    #[error("field path is empty")]
    EmptyPath,
    #[error("value at {0} is not an object")]
    NotAnObject(FieldPath),
    #[error("value at {0} is not an integer")]
    NotAnInteger(FieldPath),
    #[error("precondition failed at {0}")]
    GuardFailed(FieldPath),
}

pub fn get_path<'a>(doc: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(doc, |node, key| node.as_object()?.get(key))
}

/// Check every guard against `doc`.
pub fn check_guards(doc: &Value, guards: &[Guard]) -> Result<(), DocError> {
    match guards.iter().find(|g| !g.holds(doc)) {
        Some(Guard::Equals { path, .. }) | Some(Guard::Absent { path }) => {
            Err(DocError::GuardFailed(path.clone()))
        }
        None => Ok(()),
    }
}

/// Apply `ops` to `doc` as one unit. On error `doc` is unchanged.
pub fn apply_ops(doc: &mut Value, ops: &[FieldOp], now: Timestamp) -> Result<(), DocError> {
    let mut next = doc.clone();
    for op in ops {
        apply_op(&mut next, op, now)?;
    }
    *doc = next;
    Ok(())
}

/// Build a fresh document by applying `ops` to an empty object.
pub fn build_document(ops: &[FieldOp], now: Timestamp) -> Result<Value, DocError> {
    let mut doc = Value::Object(Map::new());
    apply_ops(&mut doc, ops, now)?;
    Ok(doc)
}

fn apply_op(doc: &mut Value, op: &FieldOp, now: Timestamp) -> Result<(), DocError> {
    let path = op.path();
    let (last, parents) = path.segments().split_last().ok_or(DocError::EmptyPath)?;

    let value = match op {
        FieldOp::Delete { .. } => {
            delete_at(doc, parents, last);
            return Ok(());
        }
        FieldOp::Set { value, .. } => value.clone(),
        FieldOp::ServerTimestamp { .. } => Value::from(now),
        FieldOp::Increment { by, .. } => {
            let current = match get_path(doc, path) {
                None | Some(Value::Null) => 0,
                Some(v) => v
                    .as_i64()
                    .ok_or_else(|| DocError::NotAnInteger(path.clone()))?,
            };
            Value::from(current.saturating_add(*by))
        }
    };
    parent_object(doc, parents, path)?.insert(last.clone(), value);
    Ok(())
}

/// Deleting below a missing parent is a no-op.
fn delete_at(doc: &mut Value, parents: &[String], last: &str) {
    let mut node = doc;
    for key in parents {
        match node.as_object_mut().and_then(|m| m.get_mut(key)) {
            Some(child) => node = child,
            None => return,
        }
    }
    if let Some(map) = node.as_object_mut() {
        map.remove(last);
    }
}

/// Walk to the object that holds the final path segment, creating empty
/// objects for missing (or null) intermediate keys.
fn parent_object<'a>(
    doc: &'a mut Value,
    parents: &[String],
    full_path: &FieldPath,
) -> Result<&'a mut Map<String, Value>, DocError> {
    let mut node = doc;
    for (depth, key) in parents.iter().enumerate() {
        let map = node
            .as_object_mut()
            .ok_or_else(|| DocError::NotAnObject(FieldPath::new(&full_path.0[..depth])))?;
        let child = map
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if child.is_null() {
            *child = Value::Object(Map::new());
        }
        node = child;
    }
    node.as_object_mut()
        .ok_or_else(|| DocError::NotAnObject(FieldPath::new(&full_path.0[..parents.len()])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_creates_intermediate_objects() {
        let mut doc = json!({});
        apply_ops(&mut doc, &[FieldOp::set(["answers", "Ali", "stomach"], json!(2))], 0).unwrap();
        assert_eq!(doc, json!({"answers": {"Ali": {"stomach": 2}}}));
    }

    #[test]
    fn set_is_shallow_replace() {
        let mut doc = json!({"players": {"Ali": {"score": 3}}, "stage": "lobby"});
        apply_ops(&mut doc, &[FieldOp::set(["players"], json!({"Sam": {"score": 0}}))], 0).unwrap();
        assert_eq!(doc["players"], json!({"Sam": {"score": 0}}));
        assert_eq!(doc["stage"], "lobby");
    }

    #[test]
    fn names_with_dots_are_single_keys() {
        let mut doc = json!({});
        apply_ops(&mut doc, &[FieldOp::set(["players", "Dr. Who"], json!(1))], 0).unwrap();
        assert_eq!(doc["players"]["Dr. Who"], 1);
    }

    #[test]
    fn increment_missing_starts_at_zero() {
        let mut doc = json!({"players": {"Ali": {}}});
        let op = FieldOp::increment(["players", "Ali", "score"], 1);
        apply_ops(&mut doc, &[op.clone()], 0).unwrap();
        apply_ops(&mut doc, &[op], 0).unwrap();
        assert_eq!(doc["players"]["Ali"]["score"], 2);
    }

    #[test]
    fn increment_non_number_fails_and_leaves_doc() {
        let mut doc = json!({"stage": "quiz", "n": 1});
        let before = doc.clone();
        let err = apply_ops(
            &mut doc,
            &[
                FieldOp::increment(["n"], 1),
                FieldOp::increment(["stage"], 1),
            ],
            0,
        )
        .unwrap_err();
        assert!(matches!(err, DocError::NotAnInteger(_)));
        assert_eq!(doc, before);
    }

    #[test]
    fn set_through_scalar_fails() {
        let mut doc = json!({"stage": "quiz"});
        let err = apply_ops(&mut doc, &[FieldOp::set(["stage", "x"], json!(1))], 0).unwrap_err();
        assert_eq!(err, DocError::NotAnObject(FieldPath::new(["stage"])));
    }

    #[test]
    fn server_timestamp_uses_commit_time() {
        let doc = build_document(&[FieldOp::server_timestamp(["createdAt"])], 1_700_000_000_123).unwrap();
        assert_eq!(doc["createdAt"], 1_700_000_000_123_i64);
    }

    #[test]
    fn delete_removes_key_and_ignores_missing() {
        let mut doc = json!({"answers": {"Ali": {"stomach": 2}}});
        let ops = [
            FieldOp::Delete {
                path: FieldPath::new(["answers", "Ali"]),
            },
            FieldOp::Delete {
                path: FieldPath::new(["nope", "deeper"]),
            },
        ];
        apply_ops(&mut doc, &ops, 0).unwrap();
        assert_eq!(doc, json!({"answers": {}}));
    }

    #[test]
    fn empty_path_rejected() {
        let mut doc = json!({});
        let op = FieldOp::Set {
            path: FieldPath(vec![]),
            value: json!(1),
        };
        assert_eq!(apply_ops(&mut doc, &[op], 0), Err(DocError::EmptyPath));
    }

    #[test]
    fn guards_check_equality_and_absence() {
        let doc = json!({"stage": "lobby", "players": {"Ali": {"score": 0}}});
        assert!(check_guards(&doc, &[Guard::equals(["stage"], json!("lobby"))]).is_ok());
        assert!(check_guards(&doc, &[Guard::absent(["players", "Sam"])]).is_ok());

        let err = check_guards(
            &doc,
            &[
                Guard::equals(["stage"], json!("lobby")),
                Guard::absent(["players", "Ali"]),
            ],
        )
        .unwrap_err();
        assert_eq!(err, DocError::GuardFailed(FieldPath::new(["players", "Ali"])));
    }

    #[test]
    fn ops_serialize_with_tag() {
        let op = FieldOp::increment(["players", "Ali", "score"], 1);
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(
            json,
            json!({"op": "increment", "path": ["players", "Ali", "score"], "by": 1})
        );
    }
}
