//! Wire message shapes for exchanging ops between peers, plus the §6
//! request/response/broadcast boundary contract. This module describes the
//! contract only — there is no socket or transport here; any channel that
//! can move bytes (a websocket, a relay, a QUIC stream) can carry these
//! messages. The WebSocket transport and server DB themselves are out of
//! scope; this is the shape a real transport would be plugged in against.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::ids::PeerId;
use crate::ops::Operation;

/// Route names referenced by the core. Not an exhaustive transport spec —
/// just the boundary names the engine's callers route requests and
/// broadcasts through.
pub mod route {
    pub const THREADS: &str = "threads";
    pub const AGENT_CONFIGS: &str = "agent-configs";
    pub const PROVIDER_CONFIGS: &str = "provider-configs";
    pub const PROFILE: &str = "profile";
    pub const SESSION: &str = "session";
    pub const WORKSPACE: &str = "workspace";
    pub const NEW_WORKSPACE: &str = "new-workspace";
    pub const WORKSPACE_EXISTS: &str = "workspace-exists";

    pub fn thread(id: &str) -> String {
        format!("{THREADS}/{id}")
    }

    pub fn agent_config(id: &str) -> String {
        format!("{AGENT_CONFIGS}/{id}")
    }

    pub fn provider_config(id: &str) -> String {
        format!("{PROVIDER_CONFIGS}/{id}")
    }

    pub fn provider_config_validate(id: &str) -> String {
        format!("{PROVIDER_CONFIGS}/{id}/validate")
    }

    pub fn provider_config_models(id: &str) -> String {
        format!("{PROVIDER_CONFIGS}/{id}/models")
    }

    pub fn validate_key(provider: &str) -> String {
        format!("validate-key/{provider}")
    }
}

/// Verbs recognized per route for request/response messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Get,
    Post,
    Delete,
}

/// The narrower action set a `BROADCAST` carries — broadcasts announce a
/// change already committed, so there is no `Get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BroadcastAction {
    Post,
    Update,
    Delete,
}

/// The opaque request/response/broadcast envelope from §6. `response` and
/// `error` are populated on the way back; `params` carries route parameters
/// (e.g. the `<id>` in `threads/<id>`) separately from `data`, the body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    pub route: String,
    #[serde(default)]
    pub data: Json,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub params: HashMap<String, String>,
}

impl Envelope {
    pub fn request(route: impl Into<String>, data: Json) -> Self {
        Self { route: route.into(), data, response: None, error: None, params: HashMap::new() }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn respond(mut self, response: Json) -> Self {
        self.response = Some(response);
        self
    }

    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// A hook validating an inbound broadcast before it is accepted. Routes that
/// accept peer-to-peer broadcasts (e.g. provider-key validation results)
/// register one; anything it rejects is dropped rather than applied.
pub trait ValidateBroadcast: Send + Sync {
    fn validate(&self, action: BroadcastAction, envelope: &Envelope) -> bool;
}

/// A message exchanged between two peers syncing a single tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WireMessage {
    /// Sent when a peer first connects: the full op set it knows about for
    /// a tree, so the other side can merge and reply with anything missing.
    Snapshot { tree_id: String, ops: Vec<Operation> },
    /// A small batch of newly-produced ops, sent as soon as they're applied
    /// locally — the steady-state path once both sides are caught up.
    Ops { tree_id: String, ops: Vec<Operation> },
    /// Fire-and-forget broadcast to every connected peer, used for
    /// transient ops that never touch disk (presence, streaming text) as
    /// well as non-tree boundary events routed per §6
    /// (`route`/`action`/`data`, validated against `ValidateBroadcast`
    /// before a caller applies it).
    Broadcast { action: BroadcastAction, route: String, data: Json },
    /// A request/response round-trip over one of the §6 routes, carried as
    /// a plain envelope so the core never needs to know the transport.
    Request { tree_id: String, verb: Verb, envelope: Envelope },
}

impl WireMessage {
    pub fn tree_id(&self) -> Option<&str> {
        match self {
            WireMessage::Snapshot { tree_id, .. } => Some(tree_id),
            WireMessage::Ops { tree_id, .. } => Some(tree_id),
            WireMessage::Broadcast { .. } => None,
            WireMessage::Request { tree_id, .. } => Some(tree_id),
        }
    }
}

/// Where a [`WireMessage`] came from or is headed, so a router can avoid
/// echoing a peer's own ops back to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddr(pub PeerId);

/// Routes inbound/outbound wire messages to and from the in-memory trees.
/// Implementations live at the transport boundary; this crate only
/// specifies the shape of what crosses it.
#[async_trait::async_trait]
pub trait Router: Send + Sync {
    async fn send(&self, to: &PeerAddr, message: WireMessage) -> crate::error::Result<()>;
    async fn broadcast(&self, from: &PeerAddr, message: WireMessage) -> crate::error::Result<()>;
}
