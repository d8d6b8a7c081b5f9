//! Operation variants and their JSONL wire encoding.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::PersistError;
use crate::ids::{OpId, PeerId, VertexId};
use crate::value::{decode_value, encode_value, PropertyValue};

/// A move (or create, for a never-before-seen `target_id`) of a vertex under
/// a new parent, or to the root (`parent_id = None`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveOp {
    pub id: OpId,
    pub target_id: VertexId,
    pub parent_id: Option<VertexId>,
}

/// A property write on an existing vertex. `transient` ops are applied to
/// the in-memory store but are never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetPropertyOp {
    pub id: OpId,
    pub target_id: VertexId,
    pub key: String,
    pub value: Option<PropertyValue>,
    pub transient: bool,
}

/// The tagged operation variants that make up the replicated op log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Move(MoveOp),
    SetProperty(SetPropertyOp),
}

impl Operation {
    pub fn id(&self) -> &OpId {
        match self {
            Operation::Move(op) => &op.id,
            Operation::SetProperty(op) => &op.id,
        }
    }

    pub fn target_id(&self) -> &VertexId {
        match self {
            Operation::Move(op) => &op.target_id,
            Operation::SetProperty(op) => &op.target_id,
        }
    }

    /// Whether this op must never be written to the JSONL log.
    pub fn is_transient(&self) -> bool {
        matches!(self, Operation::SetProperty(op) if op.transient)
    }

    /// Encode one JSONL line: `["m", counter, targetId, parentIdOrNull]` or
    /// `["p", counter, targetId, key, value]`. The peer id is *not*
    /// embedded — it is derived from the containing file name.
    pub fn encode_line(&self) -> String {
        let json = match self {
            Operation::Move(op) => Json::Array(vec![
                Json::String("m".into()),
                Json::from(op.id.counter),
                Json::String(op.target_id.clone()),
                match &op.parent_id {
                    Some(p) => Json::String(p.clone()),
                    None => Json::Null,
                },
            ]),
            Operation::SetProperty(op) => Json::Array(vec![
                Json::String("p".into()),
                Json::from(op.id.counter),
                Json::String(op.target_id.clone()),
                Json::String(op.key.clone()),
                encode_value(op.value.as_ref()),
            ]),
        };
        json.to_string()
    }

    /// Decode one JSONL line, given the peer id derived from the file path
    /// that contained it.
    pub fn decode_line(line: &str, peer_id: &PeerId) -> Result<Self, PersistError> {
        let json: Json = serde_json::from_str(line)
            .map_err(|e| PersistError::MalformedOp(format!("{e}: {line}")))?;
        let arr = json
            .as_array()
            .ok_or_else(|| PersistError::MalformedOp(line.to_string()))?;
        let tag = arr
            .first()
            .and_then(Json::as_str)
            .ok_or_else(|| PersistError::MalformedOp(line.to_string()))?;
        match tag {
            "m" => {
                let counter = arr
                    .get(1)
                    .and_then(Json::as_u64)
                    .ok_or_else(|| PersistError::MalformedOp(line.to_string()))?;
                let target_id = arr
                    .get(2)
                    .and_then(Json::as_str)
                    .ok_or_else(|| PersistError::MalformedOp(line.to_string()))?
                    .to_string();
                let parent_id = match arr.get(3) {
                    Some(Json::Null) | None => None,
                    Some(Json::String(s)) => Some(s.clone()),
                    _ => return Err(PersistError::MalformedOp(line.to_string())),
                };
                Ok(Operation::Move(MoveOp {
                    id: OpId::new(counter, peer_id.clone()),
                    target_id,
                    parent_id,
                }))
            }
            "p" => {
                let counter = arr
                    .get(1)
                    .and_then(Json::as_u64)
                    .ok_or_else(|| PersistError::MalformedOp(line.to_string()))?;
                let target_id = arr
                    .get(2)
                    .and_then(Json::as_str)
                    .ok_or_else(|| PersistError::MalformedOp(line.to_string()))?
                    .to_string();
                let key = arr
                    .get(3)
                    .and_then(Json::as_str)
                    .ok_or_else(|| PersistError::MalformedOp(line.to_string()))?
                    .to_string();
                let value = decode_value(arr.get(4).cloned().unwrap_or(Json::Null));
                Ok(Operation::SetProperty(SetPropertyOp {
                    id: OpId::new(counter, peer_id.clone()),
                    target_id,
                    key,
                    value,
                    transient: false,
                }))
            }
            other => Err(PersistError::MalformedOp(format!(
                "unknown op tag {other:?} in {line}"
            ))),
        }
    }
}
