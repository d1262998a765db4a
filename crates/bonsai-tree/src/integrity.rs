//! Forest integrity checks (orphaned parents, parent cycles).
use std::collections::{HashMap, HashSet};

use crate::{Node, NodeId, StoreResult, TreeBackend, TreeStore};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeValidationReport {
    pub nodes: usize,
    pub orphaned: usize,
    pub orphaned_ids: Vec<NodeId>,
    pub cycles: usize,
    pub cycle_ids: Vec<NodeId>,
}

impl TreeValidationReport {
    pub fn is_valid(&self) -> bool {
        self.orphaned == 0 && self.cycles == 0
    }
}

impl<B: TreeBackend> TreeStore<B> {
    /// Scans every node for dangling parents and parent cycles.
    pub fn validation_report(&self) -> StoreResult<TreeValidationReport> {
        Ok(validation_report_for_nodes(&self.all_nodes()?))
    }
}

/// Detect whether the ancestor walk from `start_id` revisits an id.
fn has_cycle<'a>(start_id: &'a NodeId, parents: &HashMap<&'a NodeId, Option<&'a NodeId>>) -> bool {
    let mut visited = HashSet::new();
    let mut current = Some(start_id);

    while let Some(id) = current {
        if !visited.insert(id) {
            return true;
        }
        current = parents.get(id).copied().flatten();
    }

    false
}

pub(crate) fn validation_report_for_nodes(nodes: &[Node]) -> TreeValidationReport {
    let parents = nodes
        .iter()
        .map(|node| (&node.id, node.parent.as_ref()))
        .collect::<HashMap<_, _>>();

    let mut report = TreeValidationReport {
        nodes: nodes.len(),
        ..TreeValidationReport::default()
    };

    for node in nodes {
        if let Some(parent_id) = &node.parent {
            if !parents.contains_key(parent_id) {
                report.orphaned_ids.push(node.id.clone());
            }
        }
        if has_cycle(&node.id, &parents) {
            report.cycle_ids.push(node.id.clone());
        }
    }

    report.orphaned_ids.sort();
    report.cycle_ids.sort();
    report.orphaned = report.orphaned_ids.len();
    report.cycles = report.cycle_ids.len();
    report
}
