//! Op exchange between peers: filesystem-change-driven local sync, plus
//! the wire message shapes a remote transport would carry.

pub mod wire;
pub mod watch;

pub use watch::{SpaceWatcher, WatchEvent};
pub use wire::{route, BroadcastAction, Envelope, PeerAddr, Router, ValidateBroadcast, Verb, WireMessage};
