//! Space & AppTree: conventional named-path structure over a RepTree, plus
//! multi-tree composition.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::ids::{PeerId, VertexId};
use crate::observer::{ObserverRegistry, Subscription};
use crate::ops::Operation;
use crate::tree::RepTree;
use crate::value::PropertyValue;

/// Reserved root-level child names.
pub const APP_CONFIGS: &str = "app-configs";
pub const APP_FOREST: &str = "app-forest";
pub const PROVIDERS: &str = "providers";
pub const SETTINGS: &str = "settings";

/// An independent RepTree hosting one application's state, referenced from
/// a space's `app-forest`.
pub struct AppTree {
    pub tree: RepTree,
    pub app_id: String,
}

impl AppTree {
    /// Construct a fresh AppTree: root carries `{_n:"app-tree", appId, createdAt}`.
    pub fn create(peer_id: impl Into<PeerId>, app_id: impl Into<String>) -> Self {
        let app_id = app_id.into();
        let mut tree = RepTree::new(peer_id, vec![]);
        let root = tree.new_vertex(
            None,
            vec![
                ("_n".into(), PropertyValue::from("app-tree")),
                ("appId".into(), PropertyValue::from(app_id.as_str())),
            ],
        );
        debug_assert_eq!(tree.root_vertex_id(), Some(&root));
        Self { tree, app_id }
    }

    /// Rebuild an AppTree from a previously persisted op multiset.
    pub fn from_ops(peer_id: impl Into<PeerId>, app_id: impl Into<String>, ops: Vec<Operation>) -> Self {
        let tree = RepTree::new(peer_id, ops);
        Self { tree, app_id: app_id.into() }
    }

    pub fn root_vertex_id(&self) -> Option<&VertexId> {
        self.tree.root_vertex_id()
    }
}

/// A RepTree with the conventional top-level structure used as a user's
/// workspace.
pub struct Space {
    pub tree: RepTree,
    peer_id: PeerId,
    /// Memoized loaded AppTrees, keyed by their root vertex id.
    app_trees: HashMap<VertexId, AppTree>,
    tree_loader: Option<Box<dyn Fn(&str) -> Option<Vec<Operation>> + Send + Sync>>,
    /// Opaque provider-key map — NOT part of the RepTree, persisted as a
    /// separate encrypted blob.
    pub secrets: HashMap<String, String>,
    new_app_tree_observers: ObserverRegistry<VertexId>,
    tree_load_observers: ObserverRegistry<VertexId>,
}

impl Space {
    /// Create a brand-new space: emits the bootstrap "genesis" ops for the
    /// root + four named children + a default app-config vertex.
    pub fn create(peer_id: impl Into<PeerId>) -> Self {
        let peer_id = peer_id.into();
        let mut tree = RepTree::new(peer_id.clone(), vec![]);
        let root = tree.new_vertex(
            None,
            vec![
                ("_n".into(), PropertyValue::from("space")),
                ("version".into(), PropertyValue::Number(1.0)),
                ("name".into(), PropertyValue::from("My space")),
            ],
        );
        tree.new_vertex(Some(root.clone()), vec![("_n".into(), PropertyValue::from(APP_CONFIGS))]);
        tree.new_vertex(Some(root.clone()), vec![("_n".into(), PropertyValue::from(APP_FOREST))]);
        tree.new_vertex(Some(root.clone()), vec![("_n".into(), PropertyValue::from(PROVIDERS))]);
        tree.new_vertex(Some(root.clone()), vec![("_n".into(), PropertyValue::from(SETTINGS))]);

        if let Some(configs) = Self::find_named_child(&tree, &root, APP_CONFIGS) {
            tree.new_vertex(
                Some(configs),
                vec![
                    ("id".into(), PropertyValue::from("default")),
                    ("name".into(), PropertyValue::from("Default assistant")),
                ],
            );
        }

        Self {
            tree,
            peer_id,
            app_trees: HashMap::new(),
            tree_loader: None,
            secrets: HashMap::new(),
            new_app_tree_observers: ObserverRegistry::new(),
            tree_load_observers: ObserverRegistry::new(),
        }
    }

    /// Rebuild a space from a persisted op multiset.
    /// Fails with `SpaceIdMismatch` if the reloaded root id disagrees with
    /// the pointer's declared space id.
    pub fn from_ops(peer_id: impl Into<PeerId>, declared_id: &str, ops: Vec<Operation>) -> Result<Self> {
        let tree = RepTree::new(peer_id.clone().into(), ops);
        match tree.root_vertex_id() {
            Some(root) if root == declared_id => {}
            Some(root) => {
                return Err(Error::SpaceIdMismatch {
                    declared: declared_id.to_string(),
                    loaded: root.clone(),
                })
            }
            None => return Err(Error::InvalidSpace("no root vertex in op log".into())),
        }
        Ok(Self {
            tree,
            peer_id: peer_id.into(),
            app_trees: HashMap::new(),
            tree_loader: None,
            secrets: HashMap::new(),
            new_app_tree_observers: ObserverRegistry::new(),
            tree_load_observers: ObserverRegistry::new(),
        })
    }

    /// Inject the persistence-layer callback used to load an AppTree by id
    /// on a memoization miss.
    pub fn set_tree_loader(&mut self, loader: impl Fn(&str) -> Option<Vec<Operation>> + Send + Sync + 'static) {
        self.tree_loader = Some(Box::new(loader));
    }

    pub fn root_vertex_id(&self) -> Option<&VertexId> {
        self.tree.root_vertex_id()
    }

    /// Validity: root has name "space" AND `app-configs` AND `app-forest`
    /// exist.
    pub fn is_valid(&self) -> bool {
        let Some(root) = self.tree.root_vertex_id().cloned() else {
            return false;
        };
        let Some(root_vertex) = self.tree.store().get(&root) else {
            return false;
        };
        let name_ok = matches!(root_vertex.get("_n"), Some(PropertyValue::String(n)) if n == "space");
        name_ok
            && Self::find_named_child(&self.tree, &root, APP_CONFIGS).is_some()
            && Self::find_named_child(&self.tree, &root, APP_FOREST).is_some()
    }

    fn find_named_child(tree: &RepTree, parent: &str, name: &str) -> Option<VertexId> {
        tree.store().children(parent).iter().find_map(|child_id| {
            let vertex = tree.store().get(child_id)?;
            match vertex.get("_n") {
                Some(PropertyValue::String(n)) if n == name => Some(child_id.clone()),
                _ => None,
            }
        })
    }

    fn named_child(&self, name: &str) -> Option<VertexId> {
        let root = self.tree.root_vertex_id()?;
        Self::find_named_child(&self.tree, root, name)
    }

    pub fn app_forest_id(&self) -> Option<VertexId> {
        self.named_child(APP_FOREST)
    }

    pub fn app_configs_id(&self) -> Option<VertexId> {
        self.named_child(APP_CONFIGS)
    }

    /// Create the referencing vertex under `app-forest` and construct the
    /// AppTree it points to.
    pub fn new_app_tree(&mut self, app_id: impl Into<String>) -> Result<VertexId> {
        let forest = self
            .app_forest_id()
            .ok_or_else(|| Error::InvalidSpace("missing app-forest".into()))?;
        let app_id = app_id.into();
        let app_tree = AppTree::create(self.peer_id.clone(), app_id.clone());
        let app_tree_root = app_tree
            .root_vertex_id()
            .cloned()
            .ok_or_else(|| Error::InvalidSpace("app tree has no root".into()))?;

        self.tree.new_vertex(
            Some(forest),
            vec![
                ("tid".into(), PropertyValue::from(app_tree_root.as_str())),
                ("title".into(), PropertyValue::from(app_id.as_str())),
            ],
        );
        self.app_trees.insert(app_tree_root.clone(), app_tree);
        self.new_app_tree_observers.notify(&app_tree_root);
        Ok(app_tree_root)
    }

    /// Mutable access to an already-loaded AppTree, e.g. to seed its initial
    /// structure right after `new_app_tree` returns. Does not consult the
    /// tree loader — use [`Space::load_app_tree`] first for a tree that may
    /// not yet be in memory.
    pub fn app_tree_mut(&mut self, id: &str) -> Option<&mut AppTree> {
        self.app_trees.get_mut(id)
    }

    /// Memoized AppTree lookup; on a miss, delegates to the registered
    /// `tree_loader`.
    pub fn load_app_tree(&mut self, id: &str) -> Option<&AppTree> {
        if !self.app_trees.contains_key(id) {
            let ops = self.tree_loader.as_ref()?(id)?;
            let app_tree = AppTree::from_ops(self.peer_id.clone(), "", ops);
            self.app_trees.insert(id.to_string(), app_tree);
            self.tree_load_observers.notify(&id.to_string());
        }
        self.app_trees.get(id)
    }

    pub fn observe_new_app_tree(
        &self,
        listener: impl FnMut(&VertexId) + Send + 'static,
    ) -> Subscription<VertexId> {
        self.new_app_tree_observers.subscribe(listener)
    }

    pub fn observe_tree_load(
        &self,
        listener: impl FnMut(&VertexId) + Send + 'static,
    ) -> Subscription<VertexId> {
        self.tree_load_observers.subscribe(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario S1: bootstrap emits exactly the genesis structure and the
    /// space is valid immediately.
    #[test]
    fn create_emits_genesis_structure() {
        let space = Space::create("p1");
        assert!(space.is_valid());
        assert!(space.app_forest_id().is_some());
        assert!(space.app_configs_id().is_some());

        let configs = space.app_configs_id().unwrap();
        let defaults = space.tree.store().children(&configs);
        assert_eq!(defaults.len(), 1);
        let default_config = space.tree.store().get(&defaults[0]).unwrap();
        assert_eq!(default_config.get("id"), Some(&PropertyValue::String("default".into())));
    }

    /// Scenario S1 (reopen): persisting then reconstructing from the same
    /// op multiset yields a valid space with the same root id.
    #[test]
    fn reopen_from_same_ops_is_valid_with_same_root() {
        let mut space = Space::create("p1");
        let root = space.root_vertex_id().cloned().unwrap();
        let genesis_ops = space.tree.pop_local_ops();
        assert!(!genesis_ops.is_empty());

        let reopened = Space::from_ops("p1", &root, genesis_ops).unwrap();
        assert!(reopened.is_valid());
        assert_eq!(reopened.root_vertex_id(), Some(&root));
    }

    /// An op log whose reconstructed root disagrees with the declared
    /// space id is a hard failure, never a
    /// silently-wrong space.
    #[test]
    fn mismatched_declared_id_is_rejected() {
        let mut space = Space::create("p1");
        let genesis_ops = space.tree.pop_local_ops();
        let err = Space::from_ops("p1", "not-the-real-root", genesis_ops).unwrap_err();
        assert!(matches!(err, Error::SpaceIdMismatch { .. }));
    }

    /// Scenario S4: creating a chat-like app-tree links it from
    /// `app-forest` via `tid` and gives it its own independent root.
    #[test]
    fn new_app_tree_links_from_app_forest() {
        let mut space = Space::create("p1");
        let app_root = space.new_app_tree("chat").unwrap();

        let forest = space.app_forest_id().unwrap();
        let forest_children = space.tree.store().children(&forest);
        assert_eq!(forest_children.len(), 1);
        let link = space.tree.store().get(&forest_children[0]).unwrap();
        assert_eq!(link.get("tid"), Some(&PropertyValue::String(app_root)));
    }
}
