//! In-memory vertex table: node map, parent/child index, change notifications.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::ids::{OpId, VertexId};
use crate::observer::{ObserverRegistry, Subscription};
use crate::value::PropertyValue;

/// A single property slot: the current value and the OpId that wrote it,
/// used for last-writer-wins comparisons.
#[derive(Debug, Clone)]
pub struct PropertySlot {
    pub value: Option<PropertyValue>,
    pub last_op: OpId,
}

/// A tree node: parent pointer plus property map. Reserved keys `_n`/`_c`
/// are ordinary entries here — the store assigns them no special
/// meaning, only the `vertex`/`space` layers do.
#[derive(Debug, Clone, Default)]
pub struct Vertex {
    pub id: VertexId,
    pub parent_id: Option<VertexId>,
    pub properties: HashMap<String, PropertySlot>,
    /// The OpId of the currently-accepted Move for this vertex, used for
    /// LWW comparison against incoming Move ops.
    pub last_move_op: Option<OpId>,
}

impl Vertex {
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key).and_then(|slot| slot.value.as_ref())
    }
}

/// Change events emitted by the store. Listeners observe the POST-change
/// state.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Move {
        target_id: VertexId,
        old_parent: Option<VertexId>,
        new_parent: Option<VertexId>,
    },
    Children {
        parent_id: VertexId,
    },
    Property {
        target_id: VertexId,
        key: String,
    },
}

/// The canonical node table plus a child-list cache.
pub struct VertexStore {
    vertices: HashMap<VertexId, Vertex>,
    children: HashMap<VertexId, Vec<VertexId>>,
    global: ObserverRegistry<ChangeEvent>,
    per_vertex: Mutex<HashMap<VertexId, ObserverRegistry<ChangeEvent>>>,
}

impl Default for VertexStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VertexStore {
    pub fn new() -> Self {
        Self {
            vertices: HashMap::new(),
            children: HashMap::new(),
            global: ObserverRegistry::new(),
            per_vertex: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Vertex> {
        self.vertices.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.vertices.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &VertexId> {
        self.vertices.keys()
    }

    /// Children of `id` in insertion-by-apply order — stable
    /// under re-merge because moves are replayed in OpId order by the
    /// engine, never re-sorted here.
    pub fn children(&self, id: &str) -> &[VertexId] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Ensure a vertex row exists (parentless) without emitting a move
    /// event; used by the engine when a SetProperty or Move references a
    /// target that has not been created yet but is about to be.
    fn ensure_row(&mut self, id: &str) -> &mut Vertex {
        self.vertices.entry(id.to_string()).or_insert_with(|| Vertex {
            id: id.to_string(),
            parent_id: None,
            properties: HashMap::new(),
            last_move_op: None,
        })
    }

    /// Set `id`'s parent, creating the vertex if it does not exist yet
    /// (creation is simply a move targeting a never-before-seen id).
    /// Updates both the old and new parents' cached child lists and emits
    /// `move`, then `children` (old parent), then `children` (new
    /// parent), in that order.
    pub fn set_parent(&mut self, id: &str, new_parent: Option<VertexId>, move_op: OpId) {
        let old_parent = self
            .vertices
            .get(id)
            .and_then(|v| v.parent_id.clone());

        {
            let vertex = self.ensure_row(id);
            vertex.parent_id = new_parent.clone();
            vertex.last_move_op = Some(move_op);
        }

        if let Some(old) = &old_parent {
            if let Some(siblings) = self.children.get_mut(old) {
                siblings.retain(|c| c != id);
            }
        }
        if let Some(new) = &new_parent {
            self.children.entry(new.clone()).or_default().push(id.to_string());
        }

        self.emit(&ChangeEvent::Move {
            target_id: id.to_string(),
            old_parent: old_parent.clone(),
            new_parent: new_parent.clone(),
        });
        if let Some(old) = old_parent {
            self.emit(&ChangeEvent::Children { parent_id: old });
        }
        if let Some(new) = new_parent {
            self.emit(&ChangeEvent::Children { parent_id: new });
        }
    }

    /// Apply a property write if `op_id` is newer than the slot's current
    /// writer. Returns whether
    /// the write was applied.
    pub fn apply_property(
        &mut self,
        id: &str,
        key: &str,
        value: Option<PropertyValue>,
        op_id: OpId,
    ) -> bool {
        let vertex = self.ensure_row(id);
        let should_apply = match vertex.properties.get(key) {
            Some(slot) => op_id > slot.last_op,
            None => true,
        };
        if !should_apply {
            return false;
        }
        vertex
            .properties
            .insert(key.to_string(), PropertySlot { value, last_op: op_id });
        self.emit(&ChangeEvent::Property {
            target_id: id.to_string(),
            key: key.to_string(),
        });
        true
    }

    fn emit(&self, event: &ChangeEvent) {
        self.global.notify(event);
        if let Some(id) = event_target(event) {
            if let Some(registry) = self.per_vertex.lock().unwrap().get(id) {
                registry.notify(event);
            }
        }
    }

    pub fn observe_global(
        &self,
        listener: impl FnMut(&ChangeEvent) + Send + 'static,
    ) -> Subscription<ChangeEvent> {
        self.global.subscribe(listener)
    }

    /// Subscribe to change events targeting a single vertex.
    /// Takes `&self`: the per-vertex registry table is interior-mutable so
    /// observers can attach without the caller needing a unique borrow of
    /// the whole store.
    pub fn observe_vertex(
        &self,
        id: &str,
        listener: impl FnMut(&ChangeEvent) + Send + 'static,
    ) -> Subscription<ChangeEvent> {
        self.per_vertex
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .subscribe(listener)
    }
}

fn event_target(event: &ChangeEvent) -> Option<&str> {
    match event {
        ChangeEvent::Move { target_id, .. } => Some(target_id),
        ChangeEvent::Children { parent_id } => Some(parent_id),
        ChangeEvent::Property { target_id, .. } => Some(target_id),
    }
}
