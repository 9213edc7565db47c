//! Structural consistency check for a whole tree

use serde::Serialize;
use tracing::debug;

use super::walk::{NodeVisit, NodeWalk};
use crate::error::{IndexError, Result};

/// Shape of a verified tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    /// Nodes reachable from the root
    pub nodes: usize,
    /// Leaf nodes among them
    pub leaf_nodes: usize,
    /// Used records in leaf nodes
    pub leaf_records: usize,
    /// Levels from root to leaves, 0 for a tree without a root
    pub depth: usize,
}

/// Walk every node and check the tree invariants
///
/// Checked per node: the parent pointer names the node that referenced it,
/// used records are ordered by start time, and the node's records fit in
/// the interval of the record that led to it. Across the tree all leaves
/// must sit at the same depth.
pub(crate) fn verify<S: crate::source::ByteSource + ?Sized>(
    walk: NodeWalk<'_, S>,
) -> Result<TreeStats> {
    let mut stats = TreeStats::default();
    let mut leaf_depth = None;

    for visit in walk {
        let NodeVisit {
            node,
            depth,
            referrer,
            bound,
        } = visit?;
        stats.nodes += 1;

        if node.parent != referrer {
            return Err(IndexError::corrupt(
                node.offset,
                format!(
                    "parent pointer {:#x} does not match referencing node {:#x}",
                    node.parent, referrer
                ),
            ));
        }

        let mut previous = None;
        for (i, record) in node.used_records() {
            if let Some(prev) = previous
                && record.interval.start < prev
            {
                return Err(IndexError::corrupt(
                    node.offset,
                    format!("record {i} starts before the record preceding it"),
                ));
            }
            previous = Some(record.interval.start);
        }

        if let (Some(bound), Some(covering)) = (bound, node.covering_interval())
            && !bound.encloses(&covering)
        {
            return Err(IndexError::corrupt(
                node.offset,
                format!("records span {covering}, outside parent record {bound}"),
            ));
        }

        if node.is_leaf {
            stats.leaf_nodes += 1;
            stats.leaf_records += node.used_records().count();
            match leaf_depth {
                None => leaf_depth = Some(depth),
                Some(expected) if expected != depth => {
                    return Err(IndexError::corrupt(
                        node.offset,
                        format!("leaf at depth {depth}, expected {expected}"),
                    ));
                }
                Some(_) => {}
            }
        }
    }

    stats.depth = leaf_depth.map_or(0, |d| d + 1);
    debug!(
        "Verified {} nodes ({} leaves, {} records, depth {})",
        stats.nodes, stats.leaf_nodes, stats.leaf_records, stats.depth
    );
    Ok(stats)
}
