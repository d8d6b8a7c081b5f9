//! Ergonomic typed accessors over `RepTree`/`VertexStore`. No
//! state of its own — every method reads through to the tree.

use crate::ids::VertexId;
use crate::observer::Subscription;
use crate::store::ChangeEvent;
use crate::tree::RepTree;
use crate::value::PropertyValue;

/// A handle to a single vertex in a tree. Cheap to construct and pass
/// around; all state lives in the `RepTree` it references (design note 9:
/// "index-and-handle", no independent lifetime).
pub struct Vertex<'t> {
    tree: &'t mut RepTree,
    pub id: VertexId,
}

impl<'t> Vertex<'t> {
    pub fn new(tree: &'t mut RepTree, id: VertexId) -> Self {
        Self { tree, id }
    }

    pub fn parent_id(&self) -> Option<VertexId> {
        self.tree.store().get(&self.id).and_then(|v| v.parent_id.clone())
    }

    pub fn get(&self, key: &str) -> Option<PropertyValue> {
        self.tree.store().get(&self.id).and_then(|v| v.get(key)).cloned()
    }

    pub fn name(&self) -> Option<String> {
        match self.get("_n") {
            Some(PropertyValue::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Children of this vertex, in insertion-by-apply order.
    pub fn children(&self) -> Vec<VertexId> {
        self.tree.store().children(&self.id).to_vec()
    }

    /// Create a child vertex — shorthand for `tree.new_vertex(this.id, props)`.
    pub fn new_child(&mut self, props: Vec<(String, PropertyValue)>) -> VertexId {
        self.tree.new_vertex(Some(self.id.clone()), props)
    }

    /// Set multiple properties, one SetProperty op per key.
    pub fn set_properties(&mut self, props: Vec<(String, PropertyValue)>) {
        for (key, value) in props {
            self.tree.set_vertex_property(&self.id, &key, value);
        }
    }

    pub fn set_property(&mut self, key: &str, value: PropertyValue) {
        self.tree.set_vertex_property(&self.id, key, value);
    }

    pub fn set_transient_property(&mut self, key: &str, value: PropertyValue) {
        self.tree.set_transient_vertex_property(&self.id, key, value);
    }

    pub fn move_to(&mut self, parent_id: Option<VertexId>) {
        self.tree.move_vertex(&self.id, parent_id);
    }

    /// A copy of `{id, ...properties}` as a flat key/value view. Real typed
    /// deserialization into an application-defined `T` is left to callers,
    /// since the engine has no knowledge of app-specific vertex schemas.
    pub fn as_property_map(&self) -> Vec<(String, PropertyValue)> {
        self.tree
            .store()
            .get(&self.id)
            .map(|v| {
                v.properties
                    .iter()
                    .filter_map(|(k, slot)| slot.value.clone().map(|val| (k.clone(), val)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Linear scan for the first child whose `key` property equals `value`
    ///.
    pub fn find_first_child_with_property(&self, key: &str, value: &PropertyValue) -> Option<VertexId> {
        self.children().into_iter().find(|child_id| {
            self.tree
                .store()
                .get(child_id)
                .and_then(|v| v.get(key))
                .map(|v| v == value)
                .unwrap_or(false)
        })
    }

    /// Observe changes targeting this vertex.
    pub fn observe(&self, listener: impl FnMut(&ChangeEvent) + Send + 'static) -> Subscription<ChangeEvent> {
        self.tree.observe_vertex(&self.id, listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::RepTree;

    #[test]
    fn new_child_and_typed_object_round_trip() {
        let mut tree = RepTree::new("p1", vec![]);
        let root_id = tree.new_vertex(None, vec![]);
        let mut root = Vertex::new(&mut tree, root_id.clone());
        let child_id = root.new_child(vec![("_n".into(), PropertyValue::from("hello"))]);

        let mut child = Vertex::new(&mut tree, child_id.clone());
        assert_eq!(child.name(), Some("hello".into()));
        assert_eq!(child.parent_id(), Some(root_id.clone()));

        child.set_property("role", PropertyValue::from("user"));
        let props = child.as_property_map();
        assert!(props.iter().any(|(k, v)| k == "role" && v == &PropertyValue::String("user".into())));
    }

    #[test]
    fn find_first_child_with_property_scans_linearly() {
        let mut tree = RepTree::new("p1", vec![]);
        let root_id = tree.new_vertex(None, vec![]);
        let mut root = Vertex::new(&mut tree, root_id);
        root.new_child(vec![("role".into(), PropertyValue::from("user"))]);
        let target = root.new_child(vec![("role".into(), PropertyValue::from("assistant"))]);

        let found = root.find_first_child_with_property("role", &PropertyValue::from("assistant"));
        assert_eq!(found, Some(target));
    }
}
