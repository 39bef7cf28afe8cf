use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::NodeId;

/// An ordered set of nodes, e.g. the targets of a multicast message.
///
/// Iteration is always in ascending node order so every process that builds
/// the same set walks it identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeSet {
    nodes: BTreeSet<NodeId>,
}

impl NodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every node in `0..=max`.
    pub fn range_inclusive(max: NodeId) -> Self {
        (0..=max.raw()).map(NodeId).collect()
    }

    /// Add a node. Returns `false` if it was already present.
    pub fn insert(&mut self, node: NodeId) -> bool {
        self.nodes.insert(node)
    }

    /// Remove a node. Returns `false` if it was not present.
    pub fn remove(&mut self, node: NodeId) -> bool {
        self.nodes.remove(&node)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }

    /// Largest node in the set, if any.
    pub fn max(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }
}

impl FromIterator<NodeId> for NodeSet {
    fn from_iter<I: IntoIterator<Item = NodeId>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}

impl Extend<NodeId> for NodeSet {
    fn extend<I: IntoIterator<Item = NodeId>>(&mut self, iter: I) {
        self.nodes.extend(iter);
    }
}

impl<'a> IntoIterator for &'a NodeSet {
    type Item = NodeId;
    type IntoIter = std::iter::Copied<std::collections::btree_set::Iter<'a, NodeId>>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter().copied()
    }
}

impl fmt::Display for NodeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, node) in self.nodes.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", node)?;
        }
        f.write_str("}")
    }
}
