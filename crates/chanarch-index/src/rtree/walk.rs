//! Depth-first walk over every node of a tree

use std::collections::HashSet;

use super::node::Node;
use crate::cursor::ByteCursor;
use crate::error::{IndexError, Result};
use crate::source::ByteSource;
use crate::time::{Interval, TimeCodec};

/// A node reached during a walk
#[derive(Debug, Clone)]
pub struct NodeVisit {
    /// The decoded node
    pub node: Node,
    /// Distance from the root, 0 for the root itself
    pub depth: usize,
    /// Offset of the node whose record led here, 0 for the root
    pub referrer: u64,
    /// Interval of that record, `None` for the root
    pub bound: Option<Interval>,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    offset: u64,
    depth: usize,
    referrer: u64,
    bound: Option<Interval>,
}

/// Pre-order iterator over all nodes reachable from a root
///
/// Unused slots are not followed. Like [`RangeQuery`](super::RangeQuery)
/// it stops with [`IndexError::CycleDetected`] when an offset repeats and
/// yields nothing after the first error.
pub struct NodeWalk<'a, S: ByteSource + ?Sized> {
    source: &'a S,
    codec: TimeCodec,
    fanout: u32,
    stack: Vec<Pending>,
    visited: HashSet<u64>,
    done: bool,
}

impl<'a, S: ByteSource + ?Sized> NodeWalk<'a, S> {
    pub(crate) fn new(source: &'a S, codec: TimeCodec, root_offset: u64, fanout: u32) -> Self {
        let mut stack = Vec::new();
        if root_offset != 0 {
            stack.push(Pending {
                offset: root_offset,
                depth: 0,
                referrer: 0,
                bound: None,
            });
        }
        Self {
            source,
            codec,
            fanout,
            stack,
            visited: HashSet::new(),
            done: false,
        }
    }

    fn visit(&mut self, pending: Pending) -> Result<NodeVisit> {
        if !self.visited.insert(pending.offset) {
            return Err(IndexError::CycleDetected {
                offset: pending.offset,
                visited: self.visited.len(),
            });
        }

        let mut cursor = ByteCursor::new(self.source);
        let node = Node::decode(&mut cursor, pending.offset, self.fanout, &self.codec)?;

        if !node.is_leaf {
            for (_, record) in node.used_records().rev() {
                self.stack.push(Pending {
                    offset: record.child,
                    depth: pending.depth + 1,
                    referrer: node.offset,
                    bound: Some(record.interval),
                });
            }
        }

        Ok(NodeVisit {
            node,
            depth: pending.depth,
            referrer: pending.referrer,
            bound: pending.bound,
        })
    }
}

impl<S: ByteSource + ?Sized> Iterator for NodeWalk<'_, S> {
    type Item = Result<NodeVisit>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let pending = self.stack.pop()?;
        let visit = self.visit(pending);
        if visit.is_err() {
            self.done = true;
            self.stack.clear();
        }
        Some(visit)
    }
}

impl<S: ByteSource + ?Sized> std::iter::FusedIterator for NodeWalk<'_, S> {}
