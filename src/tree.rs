//! RepTree engine: apply/merge operations, cycle prevention, deterministic
//! conflict resolution, local-op buffering.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::ids::{LamportClock, OpId, PeerId, VertexId};
use crate::observer::{ObserverRegistry, Subscription};
use crate::ops::{MoveOp, Operation, SetPropertyOp};
use crate::store::{ChangeEvent, VertexStore};
use crate::value::PropertyValue;

/// The replicated tree engine. Single-threaded, single-writer: no
/// internal locking, `&mut self` throughout.
///
/// Moves are resolved by re-deriving the accepted Move set from the full
/// history sorted by OpId on every merge, rather than applying ready ops in
/// arrival order — arrival order is not OpId order, and a fixed walk over it
/// can accept or reject a cyclic Move differently depending on which peer
/// drained it first. Re-sorting the whole history is the same fix as
/// replaying a `do_op`/`undo_op`/`redo_op` log up to the new op's place in
/// time, just recomputed from scratch instead of incrementally: both produce
/// "the unique tree you'd get by applying every Move in OpId order", which is
/// what makes concurrent cyclic moves converge.
pub struct RepTree {
    peer_id: PeerId,
    clock: LamportClock,
    store: VertexStore,
    /// Every distinct Move op ever merged, in no particular order; sorted by
    /// OpId each time `recompute_moves` runs.
    moves: Vec<MoveOp>,
    move_ids_seen: HashSet<OpId>,
    /// The accepted Move set as of the last recompute: target -> (winning
    /// OpId, parent). Monotonic — once a target has an entry it never loses
    /// it, only gets overwritten by a later-OpId acceptance.
    accepted: HashMap<VertexId, (OpId, Option<VertexId>)>,
    /// SetProperty ops whose target vertex has no accepted Move yet.
    pending_props: Vec<SetPropertyOp>,
    /// Ops generated by this peer since the last `pop_local_ops` call.
    local_ops: Vec<Operation>,
    op_applied: ObserverRegistry<Operation>,
    root_id: Option<VertexId>,
    root_move_op: Option<OpId>,
}

impl RepTree {
    /// Construct a tree, folding `initial_ops` in their natural multiset
    /// order — safe for any permutation.
    pub fn new(peer_id: impl Into<PeerId>, initial_ops: Vec<Operation>) -> Self {
        let mut tree = Self {
            peer_id: peer_id.into(),
            clock: LamportClock::new(),
            store: VertexStore::new(),
            moves: Vec::new(),
            move_ids_seen: HashSet::new(),
            accepted: HashMap::new(),
            pending_props: Vec::new(),
            local_ops: Vec::new(),
            op_applied: ObserverRegistry::new(),
            root_id: None,
            root_move_op: None,
        };
        if !initial_ops.is_empty() {
            tree.merge(initial_ops);
        }
        tree
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn store(&self) -> &VertexStore {
        &self.store
    }

    /// The targetId of the unique Move with `parent_id = None`. If more than
    /// one parentless Move is ever observed, the one with the smallest OpId
    /// wins — a deterministic, order-independent tie-break rather than
    /// "whichever arrived first".
    pub fn root_vertex_id(&self) -> Option<&VertexId> {
        self.root_id.as_ref()
    }

    /// How many SetProperty ops are still waiting on their target vertex's
    /// first accepted Move. Move ops are never pending: a Move with an
    /// unknown parent is still decidable (an unknown parent just can't be an
    /// ancestor of anything yet), so only properties wait.
    pub fn pending_count(&self) -> usize {
        self.pending_props.len()
    }

    fn next_op_id(&mut self) -> OpId {
        OpId::new(self.clock.tick(), self.peer_id.clone())
    }

    /// Create a new vertex under `parent_id` (or as a new root if `None`),
    /// emitting one Move and one SetProperty per prop plus a shared `_c`
    /// creation timestamp.
    pub fn new_vertex(
        &mut self,
        parent_id: Option<VertexId>,
        props: Vec<(String, PropertyValue)>,
    ) -> VertexId {
        let id = Uuid::new_v4().to_string();
        let move_op = MoveOp {
            id: self.next_op_id(),
            target_id: id.clone(),
            parent_id,
        };
        self.emit_local(Operation::Move(move_op));

        let created_at = now_iso();
        for (key, value) in props {
            let op = SetPropertyOp {
                id: self.next_op_id(),
                target_id: id.clone(),
                key,
                value: Some(value),
                transient: false,
            };
            self.emit_local(Operation::SetProperty(op));
        }
        let timestamp_op = SetPropertyOp {
            id: self.next_op_id(),
            target_id: id.clone(),
            key: "_c".to_string(),
            value: Some(PropertyValue::date(created_at)),
            transient: false,
        };
        self.emit_local(Operation::SetProperty(timestamp_op));
        id
    }

    /// Move an existing vertex to a new parent (or to the root, `None`).
    pub fn move_vertex(&mut self, id: &str, parent_id: Option<VertexId>) -> OpId {
        let op = MoveOp {
            id: self.next_op_id(),
            target_id: id.to_string(),
            parent_id,
        };
        let op_id = op.id.clone();
        self.emit_local(Operation::Move(op));
        op_id
    }

    /// Set a property. Noop if the current value already equals `value`
    /// *and* this peer wrote it last;
    /// otherwise always emits, since a differing last writer means another
    /// peer needs to see this write to converge.
    pub fn set_vertex_property(&mut self, id: &str, key: &str, value: PropertyValue) {
        if let Some(vertex) = self.store.get(id) {
            if let Some(slot) = vertex.properties.get(key) {
                if slot.value.as_ref() == Some(&value) && slot.last_op.peer_id == self.peer_id {
                    return;
                }
            }
        }
        let op = SetPropertyOp {
            id: self.next_op_id(),
            target_id: id.to_string(),
            key: key.to_string(),
            value: Some(value),
            transient: false,
        };
        self.emit_local(Operation::SetProperty(op));
    }

    /// Set a property that is applied locally (and may be broadcast) but is
    /// never written to the op log.
    pub fn set_transient_vertex_property(&mut self, id: &str, key: &str, value: PropertyValue) {
        let op = SetPropertyOp {
            id: self.next_op_id(),
            target_id: id.to_string(),
            key: key.to_string(),
            value: Some(value),
            transient: true,
        };
        self.emit_local(Operation::SetProperty(op));
    }

    /// Fold a set of (typically remote) ops into state.
    /// Order-independent: any permutation of the same multiset converges to
    /// the same state.
    pub fn merge(&mut self, ops: Vec<Operation>) {
        for op in &ops {
            self.clock.observe(op.id().counter);
        }

        let mut new_moves: Vec<MoveOp> = Vec::new();
        for op in ops {
            match op {
                Operation::Move(m) => {
                    if self.move_ids_seen.insert(m.id.clone()) {
                        self.maybe_adopt_root(&m);
                        new_moves.push(m);
                    }
                }
                Operation::SetProperty(p) => self.pending_props.push(p),
            }
        }

        if !new_moves.is_empty() {
            self.moves.extend(new_moves.iter().cloned());
            self.recompute_moves();
        }
        for m in &new_moves {
            let effective = self
                .accepted
                .get(&m.target_id)
                .map(|(opid, _)| opid == &m.id)
                .unwrap_or(false);
            if effective {
                tracing::trace!(op_id = ?m.id, "op applied");
                self.op_applied.notify(&Operation::Move(m.clone()));
            } else {
                tracing::debug!(op_id = ?m.id, "op dropped (cyclic or superseded)");
            }
        }

        self.drain_properties();
    }

    /// Return and clear the buffer of ops generated by this peer since the
    /// last call, used by the persistence layer
    /// to append to the JSONL log.
    pub fn pop_local_ops(&mut self) -> Vec<Operation> {
        std::mem::take(&mut self.local_ops)
    }

    /// Notified for every op applied (local or remote) after it mutated
    /// state.
    pub fn observe_op_applied(
        &self,
        listener: impl FnMut(&Operation) + Send + 'static,
    ) -> Subscription<Operation> {
        self.op_applied.subscribe(listener)
    }

    /// Higher-level observer built on the store's `Move` events.
    pub fn observe_vertex_move(
        &self,
        mut listener: impl FnMut(&VertexId, Option<&VertexId>, Option<&VertexId>) + Send + 'static,
    ) -> Subscription<ChangeEvent> {
        self.store.observe_global(move |event| {
            if let ChangeEvent::Move {
                target_id,
                old_parent,
                new_parent,
            } = event
            {
                listener(target_id, old_parent.as_ref(), new_parent.as_ref());
            }
        })
    }

    /// Higher-level observer built on the store's events for a single
    /// vertex.
    pub fn observe_vertex(
        &self,
        id: &str,
        listener: impl FnMut(&ChangeEvent) + Send + 'static,
    ) -> Subscription<ChangeEvent> {
        self.store.observe_vertex(id, listener)
    }

    fn emit_local(&mut self, op: Operation) {
        match op {
            Operation::Move(m) => {
                let op_id = m.id.clone();
                if self.move_ids_seen.insert(m.id.clone()) {
                    self.maybe_adopt_root(&m);
                    self.moves.push(m.clone());
                    self.recompute_moves();
                }
                let effective = self
                    .accepted
                    .get(&m.target_id)
                    .map(|(opid, _)| opid == &op_id)
                    .unwrap_or(false);
                if effective {
                    self.local_ops.push(Operation::Move(m.clone()));
                    tracing::trace!(?op_id, "op applied");
                    self.op_applied.notify(&Operation::Move(m));
                } else {
                    tracing::warn!(?op_id, "locally generated op was rejected (cycle or stale)");
                }
            }
            Operation::SetProperty(p) => {
                let op_id = p.id.clone();
                self.pending_props.push(p.clone());
                self.drain_properties();
                let applied = self
                    .store
                    .get(&p.target_id)
                    .and_then(|v| v.properties.get(&p.key))
                    .map(|slot| slot.last_op == op_id)
                    .unwrap_or(false);
                if applied {
                    self.local_ops.push(Operation::SetProperty(p));
                } else {
                    tracing::warn!(?op_id, "locally generated property op was rejected or is pending");
                }
            }
        }
    }

    /// Re-derive the accepted Move set from the full history sorted by
    /// OpId, then push the diff against the previous accepted set into the
    /// store. Equivalent to undoing every Move back to the common point,
    /// applying in ascending order, and redoing — but computed as a single
    /// full pass rather than incremental undo/redo.
    fn recompute_moves(&mut self) {
        let mut sorted = self.moves.clone();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let mut accepted: HashMap<VertexId, (OpId, Option<VertexId>)> = HashMap::new();
        for mv in &sorted {
            let cycle = match &mv.parent_id {
                Some(parent) if parent == &mv.target_id => true,
                Some(parent) => would_cycle(&accepted, &mv.target_id, parent),
                None => false,
            };
            if !cycle {
                accepted.insert(mv.target_id.clone(), (mv.id.clone(), mv.parent_id.clone()));
            }
        }

        let mut changed: Vec<(VertexId, OpId, Option<VertexId>)> = Vec::new();
        for (target, (opid, parent)) in &accepted {
            match self.accepted.get(target) {
                Some((old_opid, old_parent)) if old_opid == opid && old_parent == parent => {}
                _ => changed.push((target.clone(), opid.clone(), parent.clone())),
            }
        }
        changed.sort_by(|a, b| a.1.cmp(&b.1));
        for (target, opid, parent) in changed {
            self.store.set_parent(&target, parent, opid);
        }

        self.accepted = accepted;
    }

    fn maybe_adopt_root(&mut self, op: &MoveOp) {
        if op.parent_id.is_some() {
            return;
        }
        let adopt = match &self.root_move_op {
            None => true,
            Some(current) => op.id < *current,
        };
        if adopt {
            self.root_id = Some(op.target_id.clone());
            self.root_move_op = Some(op.id.clone());
        }
    }

    /// Apply every pending SetProperty whose target now has an accepted
    /// Move; properties whose target is still unknown stay buffered.
    fn drain_properties(&mut self) {
        let pending = std::mem::take(&mut self.pending_props);
        let mut still_pending = Vec::new();
        for p in pending {
            if !self.store.contains(&p.target_id) {
                still_pending.push(p);
                continue;
            }
            let applied = self
                .store
                .apply_property(&p.target_id, &p.key, p.value.clone(), p.id.clone());
            if applied {
                tracing::trace!(op_id = ?p.id, "op applied");
                self.op_applied.notify(&Operation::SetProperty(p));
            } else {
                tracing::debug!(op_id = ?p.id, "op dropped (stale write)");
            }
        }
        self.pending_props = still_pending;
    }
}

/// Walk ancestors from `proposed_parent` through the accepted-move map
/// being built up so far; if `target` appears, accepting this Move would
/// create a cycle. Stops (no cycle) as soon as it reaches a node with no
/// accepted Move yet, exactly as it would if that node didn't exist.
fn would_cycle(
    accepted: &HashMap<VertexId, (OpId, Option<VertexId>)>,
    target: &str,
    proposed_parent: &str,
) -> bool {
    let mut current = Some(proposed_parent.to_string());
    while let Some(node) = current {
        if node == target {
            return true;
        }
        current = accepted.get(&node).and_then(|(_, parent)| parent.clone());
    }
    false
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_establishes_root() {
        let mut tree = RepTree::new("p1", vec![]);
        let root = tree.new_vertex(None, vec![]);
        assert_eq!(tree.root_vertex_id(), Some(&root));
    }

    #[test]
    fn new_vertex_sets_created_at() {
        let mut tree = RepTree::new("p1", vec![]);
        let root = tree.new_vertex(None, vec![]);
        let child = tree.new_vertex(Some(root), vec![("_n".into(), PropertyValue::from("child"))]);
        let vertex = tree.store().get(&child).unwrap();
        assert!(vertex.get("_c").is_some());
        assert_eq!(vertex.get("_n"), Some(&PropertyValue::String("child".into())));
    }

    #[test]
    fn set_vertex_property_is_idempotent_for_same_writer() {
        let mut tree = RepTree::new("p1", vec![]);
        let root = tree.new_vertex(None, vec![]);
        tree.set_vertex_property(&root, "name", PropertyValue::from("X"));
        let before = tree.pop_local_ops().len();
        tree.set_vertex_property(&root, "name", PropertyValue::from("X"));
        let after = tree.pop_local_ops().len();
        assert!(before > 0);
        assert_eq!(after, 0, "re-setting the same value by the same writer must be a noop");
    }

    /// Scenario S2: concurrent property write, lexicographically larger
    /// peer id wins when counters tie.
    #[test]
    fn concurrent_property_write_converges_by_opid() {
        let mut a = RepTree::new("a", vec![]);
        let root = a.new_vertex(None, vec![]);
        a.pop_local_ops();

        let mut b = RepTree::new("b", vec![Operation::Move(MoveOp {
            id: OpId::new(0, "a"),
            target_id: root.clone(),
            parent_id: None,
        })]);

        let op_a = Operation::SetProperty(SetPropertyOp {
            id: OpId::new(5, "a"),
            target_id: root.clone(),
            key: "name".into(),
            value: Some(PropertyValue::from("X")),
            transient: false,
        });
        let op_b = Operation::SetProperty(SetPropertyOp {
            id: OpId::new(5, "b"),
            target_id: root.clone(),
            key: "name".into(),
            value: Some(PropertyValue::from("Y")),
            transient: false,
        });

        a.merge(vec![op_a.clone(), op_b.clone()]);
        b.merge(vec![op_a, op_b]);

        assert_eq!(
            a.store().get(&root).unwrap().get("name"),
            Some(&PropertyValue::String("Y".into()))
        );
        assert_eq!(
            a.store().get(&root).unwrap().get("name"),
            b.store().get(&root).unwrap().get("name"),
        );
    }

    /// Scenario S3: concurrent moves that would jointly form a cycle
    /// converge to the same tree regardless of which peer drains them in
    /// which order — the decision is re-derived from the full OpId-sorted
    /// history, not from a one-pass arrival-order walk.
    #[test]
    fn concurrent_cyclic_moves_converge_regardless_of_arrival_order() {
        let bootstrap = vec![
            Operation::Move(MoveOp { id: OpId::new(0, "seed"), target_id: "root".into(), parent_id: None }),
            Operation::Move(MoveOp { id: OpId::new(1, "seed"), target_id: "A".into(), parent_id: Some("root".into()) }),
            Operation::Move(MoveOp { id: OpId::new(2, "seed"), target_id: "B".into(), parent_id: Some("root".into()) }),
        ];
        let mut peer_a = RepTree::new("viewer-a", bootstrap.clone());
        let mut peer_b = RepTree::new("viewer-b", bootstrap);

        let move_a_under_b = Operation::Move(MoveOp {
            id: OpId::new(3, "a"),
            target_id: "A".into(),
            parent_id: Some("B".into()),
        });
        let move_b_under_a = Operation::Move(MoveOp {
            id: OpId::new(3, "b"),
            target_id: "B".into(),
            parent_id: Some("A".into()),
        });

        // Each peer drains the two ops in the opposite order.
        peer_a.merge(vec![move_b_under_a.clone(), move_a_under_b.clone()]);
        peer_b.merge(vec![move_a_under_b, move_b_under_a]);

        // (3,"a") < (3,"b"): A-under-B applies, B-under-A is rejected as cyclic.
        assert_eq!(peer_a.store().get("A").unwrap().parent_id, Some("B".to_string()));
        assert_eq!(peer_b.store().get("A").unwrap().parent_id, Some("B".to_string()));
        assert_eq!(peer_a.store().get("B").unwrap().parent_id, Some("root".to_string()));
        assert_eq!(peer_b.store().get("B").unwrap().parent_id, Some("root".to_string()));
    }

    #[test]
    fn merge_is_commutative_under_permutation() {
        let bootstrap = vec![Operation::Move(MoveOp {
            id: OpId::new(0, "seed"),
            target_id: "root".into(),
            parent_id: None,
        })];
        let ops = vec![
            Operation::Move(MoveOp { id: OpId::new(1, "a"), target_id: "x".into(), parent_id: Some("root".into()) }),
            Operation::Move(MoveOp { id: OpId::new(2, "a"), target_id: "y".into(), parent_id: Some("x".into()) }),
            Operation::SetProperty(SetPropertyOp { id: OpId::new(3, "a"), target_id: "x".into(), key: "_n".into(), value: Some(PropertyValue::from("X")), transient: false }),
            Operation::Move(MoveOp { id: OpId::new(4, "b"), target_id: "y".into(), parent_id: Some("root".into()) }),
        ];

        let forward = {
            let mut t = RepTree::new("p", bootstrap.clone());
            t.merge(ops.clone());
            t
        };
        let mut reversed_ops = ops.clone();
        reversed_ops.reverse();
        let reversed = {
            let mut t = RepTree::new("p", bootstrap);
            t.merge(reversed_ops);
            t
        };

        assert_eq!(forward.store().get("x").unwrap().parent_id, reversed.store().get("x").unwrap().parent_id);
        assert_eq!(forward.store().get("y").unwrap().parent_id, reversed.store().get("y").unwrap().parent_id);
        assert_eq!(forward.store().get("x").unwrap().get("_n"), reversed.store().get("x").unwrap().get("_n"));
    }

    #[test]
    fn transient_property_applies_in_memory_but_is_not_buffered_for_persistence() {
        let mut tree = RepTree::new("p1", vec![]);
        let root = tree.new_vertex(None, vec![]);
        tree.pop_local_ops();
        tree.set_transient_vertex_property(&root, "text", PropertyValue::from("streaming"));
        assert_eq!(
            tree.store().get(&root).unwrap().get("text"),
            Some(&PropertyValue::String("streaming".into()))
        );
        let buffered = tree.pop_local_ops();
        assert_eq!(buffered.len(), 1);
        assert!(buffered[0].is_transient());
    }

    /// A child's Move and its properties arrive before its parent's own
    /// creation. The child's Move still applies immediately (an unknown
    /// parent id is just an opaque reference, not a dependency), so only
    /// the child's properties would ever wait — and here they don't need
    /// to either, since the child itself is already known by the time its
    /// properties arrive.
    #[test]
    fn late_arriving_creator_does_not_drop_descendant_ops() {
        let mut tree = RepTree::new("p1", vec![]);
        tree.merge(vec![
            Operation::Move(MoveOp { id: OpId::new(2, "a"), target_id: "child".into(), parent_id: Some("parent".into()) }),
            Operation::SetProperty(SetPropertyOp { id: OpId::new(3, "a"), target_id: "child".into(), key: "_n".into(), value: Some(PropertyValue::from("c")), transient: false }),
        ]);
        assert_eq!(tree.pending_count(), 0);
        assert_eq!(tree.store().get("child").unwrap().parent_id, Some("parent".to_string()));
        assert_eq!(tree.store().get("child").unwrap().get("_n"), Some(&PropertyValue::String("c".into())));

        tree.merge(vec![Operation::Move(MoveOp { id: OpId::new(1, "a"), target_id: "parent".into(), parent_id: None })]);
        assert_eq!(tree.pending_count(), 0);
        assert_eq!(tree.store().children("parent"), &["child".to_string()]);
    }

    /// A property targeting a vertex with no accepted Move at all stays
    /// pending until that Move arrives.
    #[test]
    fn property_for_unknown_vertex_stays_pending_until_its_move_arrives() {
        let mut tree = RepTree::new("p1", vec![]);
        tree.merge(vec![Operation::SetProperty(SetPropertyOp {
            id: OpId::new(1, "a"),
            target_id: "ghost".into(),
            key: "_n".into(),
            value: Some(PropertyValue::from("g")),
            transient: false,
        })]);
        assert_eq!(tree.pending_count(), 1);
        assert!(tree.store().get("ghost").is_none());

        tree.merge(vec![Operation::Move(MoveOp { id: OpId::new(0, "a"), target_id: "ghost".into(), parent_id: None })]);
        assert_eq!(tree.pending_count(), 0);
        assert_eq!(tree.store().get("ghost").unwrap().get("_n"), Some(&PropertyValue::String("g".into())));
    }

    /// A Move targeting itself, or whose parent chain already loops back to
    /// the target through earlier-OpId moves, is rejected outright.
    #[test]
    fn self_parent_move_is_rejected() {
        let mut tree = RepTree::new("p1", vec![]);
        tree.merge(vec![Operation::Move(MoveOp { id: OpId::new(0, "a"), target_id: "x".into(), parent_id: None })]);
        tree.merge(vec![Operation::Move(MoveOp { id: OpId::new(1, "a"), target_id: "x".into(), parent_id: Some("x".into()) })]);
        assert_eq!(tree.store().get("x").unwrap().parent_id, None);
    }
}
