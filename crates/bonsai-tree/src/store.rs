//! `TreeStore`: creation, pointer management, traversal, prune, cherry-pick.

use std::collections::HashSet;

use tracing::debug;

use crate::{
    Node, NodeId, NodeKind, StoreResult, TreeBackend, TreeStoreError, CURRENT_NODE_KEY,
};

/// Result of a create operation.
///
/// Insert and pointer update are separate steps. When the insert succeeds but
/// the pointer write fails, `node` is still persisted and `pointer_error`
/// carries the failure; retrying `TreeStore::set_current(&outcome.node.id)` is
/// enough to recover.
#[derive(Debug)]
pub struct CreateOutcome {
    pub node: Node,
    pub pointer_error: Option<TreeStoreError>,
}

impl CreateOutcome {
    pub fn pointer_updated(&self) -> bool {
        self.pointer_error.is_none()
    }

    pub fn into_node(self) -> Node {
        self.node
    }
}

/// Owns the node table and the current-node pointer of one backend.
#[derive(Debug)]
pub struct TreeStore<B> {
    backend: B,
}

impl<B: TreeBackend> TreeStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Creates a user-authored root and moves the pointer to it.
    pub fn create_root(
        &self,
        content: impl Into<String>,
        model: Option<String>,
    ) -> StoreResult<CreateOutcome> {
        self.insert_and_point(Node {
            id: NodeId::generate(),
            content: content.into(),
            kind: NodeKind::User,
            parent: None,
            model,
        })
    }

    /// Creates a child of `parent_id` and moves the pointer to it.
    pub fn create_child(
        &self,
        content: impl Into<String>,
        parent_id: &NodeId,
        kind: NodeKind,
        model: Option<String>,
    ) -> StoreResult<CreateOutcome> {
        if self.backend.get_node(parent_id)?.is_none() {
            return Err(TreeStoreError::NotFound(parent_id.clone()));
        }
        self.insert_and_point(Node {
            id: NodeId::generate(),
            content: content.into(),
            kind,
            parent: Some(parent_id.clone()),
            model,
        })
    }

    pub fn create_user_child(
        &self,
        content: impl Into<String>,
        parent_id: &NodeId,
        model: Option<String>,
    ) -> StoreResult<CreateOutcome> {
        self.create_child(content, parent_id, NodeKind::User, model)
    }

    /// Records a generated response under `parent_id`.
    pub fn create_assistant_reply(
        &self,
        parent_id: &NodeId,
        content: impl Into<String>,
        model: impl Into<String>,
    ) -> StoreResult<CreateOutcome> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(TreeStoreError::InvalidArgument(
                "assistant replies require a model label".to_string(),
            ));
        }
        self.create_child(content, parent_id, NodeKind::Assistant, Some(model))
    }

    fn insert_and_point(&self, node: Node) -> StoreResult<CreateOutcome> {
        self.backend.insert_node(&node)?;
        debug!(
            node_id = %node.id,
            parent_id = ?node.parent.as_ref().map(NodeId::as_str),
            kind = %node.kind,
            "inserted node"
        );
        let pointer_error = self.set_current(&node.id).err();
        Ok(CreateOutcome {
            node,
            pointer_error,
        })
    }

    /// `None` when no node is current, e.g. on an empty store.
    pub fn current(&self) -> StoreResult<Option<NodeId>> {
        Ok(self
            .backend
            .read_setting(CURRENT_NODE_KEY)?
            .map(NodeId::from_persisted))
    }

    /// Overwrites the pointer without checking that `id` exists.
    pub fn set_current(&self, id: &NodeId) -> StoreResult<()> {
        self.backend.write_setting(CURRENT_NODE_KEY, id.as_str())?;
        debug!(node_id = %id, "moved current pointer");
        Ok(())
    }

    /// Resolves `id` first, then moves the pointer to it.
    pub fn checkout(&self, id: &NodeId) -> StoreResult<Node> {
        let node = self.get_node(id)?;
        self.set_current(&node.id)?;
        Ok(node)
    }

    pub fn clear_current(&self) -> StoreResult<()> {
        self.backend.remove_setting(CURRENT_NODE_KEY)?;
        debug!("cleared current pointer");
        Ok(())
    }

    /// The node the pointer refers to. A pointer to a missing node is
    /// `NotFound`.
    pub fn current_node(&self) -> StoreResult<Option<Node>> {
        self.current()?.map(|id| self.get_node(&id)).transpose()
    }

    pub fn get_node(&self, id: &NodeId) -> StoreResult<Node> {
        self.backend
            .get_node(id)?
            .ok_or_else(|| TreeStoreError::NotFound(id.clone()))
    }

    pub fn contains(&self, id: &NodeId) -> StoreResult<bool> {
        Ok(self.backend.get_node(id)?.is_some())
    }

    pub fn roots(&self) -> StoreResult<Vec<Node>> {
        self.backend.root_nodes()
    }

    pub fn children(&self, id: &NodeId) -> StoreResult<Vec<Node>> {
        self.backend.child_nodes(id)
    }

    pub fn all_nodes(&self) -> StoreResult<Vec<Node>> {
        self.backend.all_nodes()
    }

    /// Nodes without children, ordered by id.
    pub fn branch_tips(&self) -> StoreResult<Vec<Node>> {
        let nodes = self.backend.all_nodes()?;
        let parent_ids = nodes
            .iter()
            .filter_map(|node| node.parent.clone())
            .collect::<HashSet<_>>();
        Ok(nodes
            .into_iter()
            .filter(|node| !parent_ids.contains(&node.id))
            .collect())
    }

    /// Ancestors of `id`, nearest first, excluding `id` itself.
    ///
    /// `max_levels <= 0` walks to the root; a positive value caps the number
    /// of ancestors returned.
    pub fn ancestors(&self, id: &NodeId, max_levels: i64) -> StoreResult<Vec<Node>> {
        let limit = usize::try_from(max_levels).ok().filter(|limit| *limit > 0);
        let mut lineage = self.walk_lineage(id, limit.map(|limit| limit.saturating_add(1)))?;
        lineage.remove(0);
        Ok(lineage)
    }

    /// `id` and all of its ancestors, root first. This is the replay order for
    /// rebuilding dialogue context.
    pub fn conversation_history(&self, id: &NodeId) -> StoreResult<Vec<Node>> {
        let mut lineage = self.walk_lineage(id, None)?;
        lineage.reverse();
        Ok(lineage)
    }

    /// Walks parent links from `id`, returning at most `limit` nodes (start
    /// node included, nearest first).
    fn walk_lineage(&self, id: &NodeId, limit: Option<usize>) -> StoreResult<Vec<Node>> {
        let mut lineage = vec![self.get_node(id)?];
        let mut visited = HashSet::from([id.clone()]);

        while limit.map_or(true, |limit| lineage.len() < limit) {
            let Some(parent_id) = lineage.last().and_then(|node| node.parent.clone()) else {
                break;
            };
            if !visited.insert(parent_id.clone()) {
                return Err(TreeStoreError::Inconsistent(format!(
                    "detected a cycle at node '{parent_id}' while walking ancestors of '{id}'"
                )));
            }
            lineage.push(self.get_node(&parent_id)?);
        }

        Ok(lineage)
    }

    /// `id` and every transitive descendant in depth-first pre-order, children
    /// visited in id order. Unknown `id` yields an empty list.
    pub fn collect_subtree(&self, id: &NodeId) -> StoreResult<Vec<Node>> {
        let mut collected = Vec::new();
        let mut visited = HashSet::new();
        let mut pending = vec![id.clone()];

        while let Some(next_id) = pending.pop() {
            if !visited.insert(next_id.clone()) {
                continue;
            }
            let Some(node) = self.backend.get_node(&next_id)? else {
                continue;
            };
            let mut child_ids = self.backend.child_ids(&node.id)?;
            child_ids.reverse();
            pending.extend(child_ids);
            collected.push(node);
        }

        Ok(collected)
    }

    pub fn subtree_contains(&self, root_id: &NodeId, needle: &NodeId) -> StoreResult<bool> {
        Ok(self
            .collect_subtree(root_id)?
            .iter()
            .any(|node| &node.id == needle))
    }

    /// Deletes `id` and its whole subtree, descendants before ancestors.
    ///
    /// Returns the number of records the backend actually removed. The current
    /// pointer is left alone even when it points into the pruned set.
    pub fn prune(&self, id: &NodeId) -> StoreResult<usize> {
        let doomed = self.collect_subtree(id)?;
        let mut deleted = 0;
        for node in doomed.iter().rev() {
            deleted += self.backend.delete_node(&node.id)?;
        }
        debug!(node_id = %id, planned = doomed.len(), deleted, "pruned subtree");
        Ok(deleted)
    }

    /// Copies content, kind and model of `source_id` into a new child of
    /// `dest_parent_id`. The source is untouched.
    pub fn cherry_pick(
        &self,
        source_id: &NodeId,
        dest_parent_id: &NodeId,
    ) -> StoreResult<CreateOutcome> {
        let source = self.get_node(source_id)?;
        self.create_child(source.content, dest_parent_id, source.kind, source.model)
    }
}
