//! Persistent table backend contract and the in-memory implementation.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{Node, NodeId, StorageFault, StoreResult, TreeStoreError};

/// Settings key holding the current node id.
pub const CURRENT_NODE_KEY: &str = "current_node";

/// Key-ordered record store the tree store runs on.
///
/// Implementations guarantee single-call atomicity only. Every listing is
/// ordered by node id. `insert_node` does not validate the parent reference;
/// that is the store's job.
pub trait TreeBackend: Send + Sync {
    fn insert_node(&self, node: &Node) -> StoreResult<()>;
    fn get_node(&self, id: &NodeId) -> StoreResult<Option<Node>>;
    fn root_nodes(&self) -> StoreResult<Vec<Node>>;
    fn child_nodes(&self, parent_id: &NodeId) -> StoreResult<Vec<Node>>;
    fn all_nodes(&self) -> StoreResult<Vec<Node>>;
    /// Returns the number of records removed (0 or 1).
    fn delete_node(&self, id: &NodeId) -> StoreResult<usize>;

    fn child_ids(&self, parent_id: &NodeId) -> StoreResult<Vec<NodeId>> {
        Ok(self
            .child_nodes(parent_id)?
            .into_iter()
            .map(|node| node.id)
            .collect())
    }

    fn read_setting(&self, key: &str) -> StoreResult<Option<String>>;
    /// Inserts or overwrites.
    fn write_setting(&self, key: &str, value: &str) -> StoreResult<()>;
    /// Removing an absent key is not an error.
    fn remove_setting(&self, key: &str) -> StoreResult<()>;
}

/// Ordered-map backend for tests and local experimentation.
#[derive(Debug, Default)]
pub struct InMemoryTreeBackend {
    inner: RwLock<BackendInner>,
}

#[derive(Debug, Default)]
struct BackendInner {
    nodes: BTreeMap<NodeId, Node>,
    settings: BTreeMap<String, String>,
}

impl InMemoryTreeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, BackendInner>> {
        self.inner
            .read()
            .map_err(|_| StorageFault::LockPoisoned("in-memory tree backend").into())
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, BackendInner>> {
        self.inner
            .write()
            .map_err(|_| StorageFault::LockPoisoned("in-memory tree backend").into())
    }
}

impl TreeBackend for InMemoryTreeBackend {
    fn insert_node(&self, node: &Node) -> StoreResult<()> {
        let mut inner = self.write()?;
        if inner.nodes.contains_key(&node.id) {
            return Err(TreeStoreError::InvalidArgument(format!(
                "node id '{}' already exists",
                node.id
            )));
        }
        inner.nodes.insert(node.id.clone(), node.clone());
        Ok(())
    }

    fn get_node(&self, id: &NodeId) -> StoreResult<Option<Node>> {
        Ok(self.read()?.nodes.get(id).cloned())
    }

    fn root_nodes(&self) -> StoreResult<Vec<Node>> {
        Ok(self
            .read()?
            .nodes
            .values()
            .filter(|node| node.parent.is_none())
            .cloned()
            .collect())
    }

    fn child_nodes(&self, parent_id: &NodeId) -> StoreResult<Vec<Node>> {
        Ok(self
            .read()?
            .nodes
            .values()
            .filter(|node| node.parent.as_ref() == Some(parent_id))
            .cloned()
            .collect())
    }

    fn all_nodes(&self) -> StoreResult<Vec<Node>> {
        Ok(self.read()?.nodes.values().cloned().collect())
    }

    fn delete_node(&self, id: &NodeId) -> StoreResult<usize> {
        Ok(usize::from(self.write()?.nodes.remove(id).is_some()))
    }

    fn read_setting(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.read()?.settings.get(key).cloned())
    }

    fn write_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        self.write()?
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_setting(&self, key: &str) -> StoreResult<()> {
        self.write()?.settings.remove(key);
        Ok(())
    }
}
