//! Island decomposition of the node graph.
//!
//! An island is a maximal set of non-Ground nodes mutually reachable
//! through non-zero off-diagonal admittance entries. The solver factors
//! and solves each island independently, so a change in one island never
//! forces refactorization of another.

use std::sync::Arc;

use petgraph::unionfind::UnionFind;

/// One island: an ordered list of node indices sharing a connected
/// component of the admittance adjacency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Island {
    pub id: usize,
    pub nodes: Vec<usize>,
}

impl Island {
    pub fn contains(&self, node: usize) -> bool {
        self.nodes.binary_search(&node).is_ok()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Partition the non-Ground nodes into islands.
///
/// `num_nodes` includes the Ground node (always the last index), which is
/// excluded from every island; edges touching Ground are ignored. Nodes
/// with no incident admittance become singleton islands so that every
/// solvable node belongs to exactly one island.
///
/// Islands are ordered by their smallest node index and node lists are
/// sorted, so the partition is deterministic for a given adjacency.
pub fn decompose(
    num_nodes: usize,
    edges: impl IntoIterator<Item = (usize, usize)>,
) -> Vec<Arc<Island>> {
    let ground = num_nodes.saturating_sub(1);
    let mut uf = UnionFind::<usize>::new(ground);
    for (i, j) in edges {
        if i < ground && j < ground && i != j {
            uf.union(i, j);
        }
    }

    let labels = uf.into_labeling();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut group_of_label: Vec<Option<usize>> = vec![None; ground];
    for (node, &label) in labels.iter().enumerate() {
        match group_of_label[label] {
            Some(g) => groups[g].push(node),
            None => {
                group_of_label[label] = Some(groups.len());
                groups.push(vec![node]);
            }
        }
    }

    // Union-find labeling walks nodes in index order, so each group is
    // already sorted and groups appear in order of their smallest member.
    groups
        .into_iter()
        .enumerate()
        .map(|(id, nodes)| Arc::new(Island { id, nodes }))
        .collect()
}
