//! Nested JSON view of the whole forest.
//!
//! The view is an arena: `nodes` holds every reachable node and `children`
//! refer to positions in it. Building, rendering and dropping all run off
//! explicit stacks, so a conversation thousands of turns deep exports like
//! any other.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::Write as _;
use std::path::Path;

use anyhow::{bail, Context, Result};
use bonsai_tree::{Node, NodeId, NodeKind, TreeBackend, TreeStore};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub struct TreeView {
    pub current_node: Option<NodeId>,
    /// Every stored node, including ones unreachable from a root.
    pub node_count: usize,
    pub roots: Vec<usize>,
    pub nodes: Vec<TreeViewNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeViewNode {
    pub id: NodeId,
    pub content: String,
    pub kind: NodeKind,
    pub model: Option<String>,
    pub is_current: bool,
    pub children: Vec<usize>,
}

impl TreeView {
    pub fn node(&self, index: usize) -> Option<&TreeViewNode> {
        self.nodes.get(index)
    }

    pub fn children_of(&self, index: usize) -> impl Iterator<Item = &TreeViewNode> + '_ {
        self.nodes
            .get(index)
            .into_iter()
            .flat_map(move |node| node.children.iter().filter_map(|child| self.nodes.get(*child)))
    }
}

pub fn build_tree_view<B: TreeBackend>(store: &TreeStore<B>) -> Result<TreeView> {
    let nodes = store.all_nodes()?;
    let current = store.current()?;

    let mut view = TreeView {
        current_node: current,
        node_count: nodes.len(),
        roots: Vec::new(),
        nodes: Vec::with_capacity(nodes.len()),
    };

    let mut children_by_parent: BTreeMap<NodeId, Vec<Node>> = BTreeMap::new();
    let mut roots = Vec::new();
    for node in nodes {
        match node.parent.clone() {
            Some(parent_id) => children_by_parent.entry(parent_id).or_default().push(node),
            None => roots.push(node),
        }
    }

    // Nodes caught in a parent cycle are never reached from a root and stay
    // out of `nodes`.
    let mut pending = roots
        .into_iter()
        .rev()
        .map(|root| (root, None))
        .collect::<Vec<(Node, Option<usize>)>>();
    while let Some((node, parent)) = pending.pop() {
        let index = view.nodes.len();
        match parent.and_then(|parent| view.nodes.get_mut(parent)) {
            Some(parent) => parent.children.push(index),
            None => view.roots.push(index),
        }
        if let Some(children) = children_by_parent.remove(&node.id) {
            pending.extend(children.into_iter().rev().map(|child| (child, Some(index))));
        }
        view.nodes.push(TreeViewNode {
            is_current: view.current_node.as_ref() == Some(&node.id),
            id: node.id,
            content: node.content,
            kind: node.kind,
            model: node.model,
            children: Vec::new(),
        });
    }

    Ok(view)
}

enum RenderStep {
    Open { index: usize, last: bool },
    Close { last: bool },
}

fn sibling_steps(indices: &[usize]) -> impl Iterator<Item = RenderStep> + '_ {
    indices
        .iter()
        .enumerate()
        .rev()
        .map(|(position, index)| RenderStep::Open {
            index: *index,
            last: position + 1 == indices.len(),
        })
}

fn write_field(out: &mut String, key: &str, value: &impl Serialize) -> Result<()> {
    write!(out, "\"{key}\":{},", serde_json::to_string(value)?)?;
    Ok(())
}

/// Compact JSON: `{"current_node", "node_count", "roots": [node..]}` where
/// each node carries its `children` inline.
pub fn render_tree_json(view: &TreeView) -> Result<String> {
    let mut out = String::from("{");
    write_field(&mut out, "current_node", &view.current_node)?;
    write_field(&mut out, "node_count", &view.node_count)?;
    out.push_str("\"roots\":[");

    let mut steps = sibling_steps(&view.roots).collect::<Vec<_>>();
    while let Some(step) = steps.pop() {
        match step {
            RenderStep::Open { index, last } => {
                let Some(node) = view.node(index) else {
                    bail!("tree view references missing node index {index}");
                };
                out.push('{');
                write_field(&mut out, "id", &node.id)?;
                write_field(&mut out, "content", &node.content)?;
                write_field(&mut out, "kind", &node.kind)?;
                if let Some(model) = &node.model {
                    write_field(&mut out, "model", model)?;
                }
                write_field(&mut out, "is_current", &node.is_current)?;
                out.push_str("\"children\":[");
                steps.push(RenderStep::Close { last });
                steps.extend(sibling_steps(&node.children));
            }
            RenderStep::Close { last } => {
                out.push_str("]}");
                if !last {
                    out.push(',');
                }
            }
        }
    }

    out.push_str("]}");
    Ok(out)
}

/// Renders the view and replaces `path` in one rename; a reader sees the old
/// export or the new one, never a partial file.
pub fn export_tree_json(view: &TreeView, path: &Path) -> Result<()> {
    let json = render_tree_json(view)?;
    replace_file(path, json.as_bytes())
}

fn replace_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
        bail!("export path '{}' has no file name", path.display());
    };
    if path.is_dir() {
        bail!("export path '{}' is a directory", path.display());
    }
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create export directory {}", dir.display()))?;

    let staging = dir.join(format!(".{file_name}.partial-{}", std::process::id()));
    let staged = File::create(&staging)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|()| std::fs::rename(&staging, path));
    if let Err(error) = staged {
        let _ = std::fs::remove_file(&staging);
        return Err(error)
            .with_context(|| format!("failed to write tree export {}", path.display()));
    }
    Ok(())
}
