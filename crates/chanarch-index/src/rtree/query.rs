//! Time-range queries over the tree
//!
//! A [`RangeQuery`] walks the tree with an explicit stack of pending node
//! offsets. Records whose interval does not intersect the query are pruned,
//! so their subtrees are never read. Leaf records that intersect are yielded
//! lazily in stored order, which is time-ascending for archives written in
//! time order.
//!
//! Overlap is closed on both sides: a record ending exactly at the query
//! start, or starting exactly at the query end, is part of the result.
//!
//! Each query keeps its own set of visited node offsets. Reaching an offset
//! twice means the file's child pointers loop (or two parents share a
//! child), and the query fails with [`IndexError::CycleDetected`]. Since
//! every visited offset must hold a decodable node, the number of visits is
//! bounded by the file size divided by the node size.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use super::node::Node;
use crate::cursor::ByteCursor;
use crate::error::{IndexError, Result};
use crate::source::ByteSource;
use crate::time::{Instant, Interval, TimeCodec};

/// Shared flag a caller raises to abort running traversals
///
/// Checked before every node visit. Cloning shares the flag, so one clone
/// can be handed to a query while another is kept to cancel it, e.g. from a
/// deadline watcher on another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// New, unraised flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether the flag has been raised
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Traversal options
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Check every child's parent pointer against the node that referenced it
    pub verify_parents: bool,
    /// Collect all results and sort them by interval and offset
    pub sort_results: bool,
    /// Walk newest records first
    pub descending: bool,
    /// Abort when raised
    pub cancel: Option<CancelFlag>,
}

impl QueryOptions {
    /// Enable or disable parent pointer checks
    #[must_use]
    pub const fn with_verify_parents(mut self, verify: bool) -> Self {
        self.verify_parents = verify;
        self
    }

    /// Enable or disable sorting of the full result set
    #[must_use]
    pub const fn with_sort_results(mut self, sort: bool) -> Self {
        self.sort_results = sort;
        self
    }

    /// Walk newest records first
    #[must_use]
    pub const fn with_descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    /// Attach a cancel flag
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// A leaf record matching a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LeafRecord {
    /// Time span of the data block
    pub interval: Interval,
    /// Offset of the data block
    pub data_offset: u64,
    /// Offset of the leaf node holding the record
    pub node_offset: u64,
}

/// Counters for one traversal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStats {
    /// Nodes decoded
    pub nodes_visited: usize,
    /// Records skipped because they do not intersect the query
    pub records_pruned: usize,
    /// Unused slots skipped
    pub unused_skipped: usize,
    /// Leaf records produced
    pub matches: usize,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    offset: u64,
    parent: u64,
}

/// Lazy iterator over the leaf records intersecting a query interval
///
/// Yields `Err` for the first structural problem and then ends;
/// collecting into `Result<Vec<_>>` therefore never returns a partial set.
pub struct RangeQuery<'a, S: ByteSource + ?Sized> {
    source: &'a S,
    codec: TimeCodec,
    fanout: u32,
    query: Interval,
    options: QueryOptions,
    stack: Vec<Pending>,
    visited: HashSet<u64>,
    ready: VecDeque<LeafRecord>,
    stats: QueryStats,
    sorted: bool,
    done: bool,
}

impl<'a, S: ByteSource + ?Sized> RangeQuery<'a, S> {
    /// Prepare a query over the tree rooted at `root_offset`
    ///
    /// No bytes are read until the iterator is polled. A root offset of 0
    /// denotes a channel without a tree and yields nothing. A reversed
    /// interval fails with [`IndexError::InvalidQuery`].
    pub fn new(
        source: &'a S,
        codec: TimeCodec,
        root_offset: u64,
        fanout: u32,
        query: Interval,
        options: QueryOptions,
    ) -> Result<Self> {
        if query.start > query.end {
            return Err(IndexError::InvalidQuery {
                start: query.start.format(),
                end: query.end.format(),
            });
        }
        if fanout == 0 {
            return Err(IndexError::InvalidFanout(fanout));
        }

        let mut stack = Vec::new();
        if root_offset != 0 {
            stack.push(Pending {
                offset: root_offset,
                parent: 0,
            });
        }

        Ok(Self {
            source,
            codec,
            fanout,
            query,
            options,
            stack,
            visited: HashSet::new(),
            ready: VecDeque::new(),
            stats: QueryStats::default(),
            sorted: false,
            done: false,
        })
    }

    /// Query interval
    pub const fn interval(&self) -> Interval {
        self.query
    }

    /// Counters so far
    pub const fn stats(&self) -> QueryStats {
        self.stats
    }

    /// Run the query to completion
    pub fn collect_all(self) -> Result<Vec<LeafRecord>> {
        self.collect()
    }

    fn visit(&mut self, pending: Pending) -> Result<()> {
        if let Some(cancel) = &self.options.cancel
            && cancel.is_cancelled()
        {
            return Err(IndexError::Cancelled {
                visited: self.stats.nodes_visited,
            });
        }

        if !self.visited.insert(pending.offset) {
            return Err(IndexError::CycleDetected {
                offset: pending.offset,
                visited: self.stats.nodes_visited,
            });
        }

        let mut cursor = ByteCursor::new(self.source);
        let node = Node::decode(&mut cursor, pending.offset, self.fanout, &self.codec)?;
        self.stats.nodes_visited += 1;

        if self.options.verify_parents && node.parent != pending.parent {
            return Err(IndexError::corrupt(
                node.offset,
                format!(
                    "parent pointer {:#x} does not match referencing node {:#x}",
                    node.parent, pending.parent
                ),
            ));
        }

        let mut matching = Vec::with_capacity(node.records.len());
        for (i, record) in node.records.iter().enumerate() {
            if record.is_unused() {
                if record.child == 0 && !(record.raw_start().is_zero() && record.raw_end().is_zero())
                {
                    warn!(
                        "Node {:#x} record {i} has an interval but no offset, skipping",
                        node.offset
                    );
                }
                self.stats.unused_skipped += 1;
                continue;
            }
            if record.interval.overlaps(&self.query) {
                matching.push(record);
            } else {
                self.stats.records_pruned += 1;
            }
        }

        if node.is_leaf {
            let records = matching.into_iter().map(|r| LeafRecord {
                interval: r.interval,
                data_offset: r.child,
                node_offset: node.offset,
            });
            let before = self.ready.len();
            if self.options.descending {
                self.ready.extend(records.rev());
            } else {
                self.ready.extend(records);
            }
            self.stats.matches += self.ready.len() - before;
        } else {
            // The stack pops last-in first, so push in reverse visiting order
            let children = matching.into_iter().map(|r| Pending {
                offset: r.child,
                parent: node.offset,
            });
            if self.options.descending {
                self.stack.extend(children);
            } else {
                self.stack.extend(children.rev());
            }
        }

        Ok(())
    }

    fn advance(&mut self) -> Option<Result<LeafRecord>> {
        loop {
            if let Some(record) = self.ready.pop_front() {
                return Some(Ok(record));
            }
            if self.done {
                return None;
            }
            let Some(pending) = self.stack.pop() else {
                self.done = true;
                debug!(
                    "Query {} finished: {} nodes visited, {} records pruned, {} matches",
                    self.query,
                    self.stats.nodes_visited,
                    self.stats.records_pruned,
                    self.stats.matches
                );
                return None;
            };
            if let Err(e) = self.visit(pending) {
                self.fail();
                return Some(Err(e));
            }
        }
    }

    fn fail(&mut self) {
        self.done = true;
        self.stack.clear();
        self.ready.clear();
    }

    fn sort_all(&mut self) -> Option<Result<()>> {
        let mut all = Vec::new();
        while let Some(item) = self.advance() {
            match item {
                Ok(record) => all.push(record),
                Err(e) => return Some(Err(e)),
            }
        }
        all.sort();
        if self.options.descending {
            all.reverse();
        }
        self.ready = all.into();
        Some(Ok(()))
    }
}

impl<S: ByteSource + ?Sized> Iterator for RangeQuery<'_, S> {
    type Item = Result<LeafRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.options.sort_results && !self.sorted {
            self.sorted = true;
            if let Some(Err(e)) = self.sort_all() {
                self.fail();
                return Some(Err(e));
            }
        }
        self.advance()
    }
}

impl<S: ByteSource + ?Sized> std::iter::FusedIterator for RangeQuery<'_, S> {}

/// Range query straight from a root offset and fanout
///
/// Fails with [`IndexError::InvalidQuery`] when `start > end` and with
/// [`IndexError::InvalidFanout`] when `fanout` is 0, both before any read.
pub fn range_query<'a, S: ByteSource + ?Sized>(
    source: &'a S,
    codec: &TimeCodec,
    root_offset: u64,
    fanout: u32,
    start: Instant,
    end: Instant,
) -> Result<RangeQuery<'a, S>> {
    let query = Interval::new(start, end)?;
    RangeQuery::new(
        source,
        *codec,
        root_offset,
        fanout,
        query,
        QueryOptions::default(),
    )
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::rtree::node::{Node, Record, node_size};
    use crate::test_utils::{instant, interval, record};
    use pretty_assertions::assert_eq;

    /// Root over [0,100], children over [0,50] and [50,100], two leaf
    /// records each
    fn three_level() -> (Vec<u8>, u64) {
        let fanout = 2;
        let size = node_size(fanout);
        let root = 8;
        let left = root + size;
        let right = left + size;

        let nodes = [
            Node::new(
                root,
                false,
                0,
                vec![record(0, 50, left as u32), record(50, 100, right as u32)],
            ),
            Node::new(
                left,
                true,
                root as u32,
                vec![record(0, 25, 0x1000), record(25, 50, 0x2000)],
            ),
            Node::new(
                right,
                true,
                root as u32,
                vec![record(50, 75, 0x3000), record(75, 100, 0x4000)],
            ),
        ];

        let mut data = vec![0u8; 8];
        for node in &nodes {
            data.extend_from_slice(&node.build());
        }
        (data, root)
    }

    fn run(data: &[u8], root: u64, fanout: u32, a: u32, b: u32) -> Result<Vec<LeafRecord>> {
        range_query(data, &TimeCodec::EPICS, root, fanout, instant(a), instant(b))?.collect()
    }

    fn offsets(records: &[LeafRecord]) -> Vec<u64> {
        records.iter().map(|r| r.data_offset).collect()
    }

    #[test]
    fn test_boundary_overlap_at_fifty() {
        let (data, root) = three_level();
        let results = run(&data, root, 2, 40, 60).unwrap();
        assert_eq!(offsets(&results), vec![0x2000, 0x3000]);
        assert_eq!(results[0].interval, interval(25, 50));
        assert_eq!(results[1].interval, interval(50, 75));
    }

    #[test]
    fn test_full_range_in_order() {
        let (data, root) = three_level();
        let results = run(&data, root, 2, 0, 100).unwrap();
        assert_eq!(offsets(&results), vec![0x1000, 0x2000, 0x3000, 0x4000]);
    }

    #[test]
    fn test_point_query_on_edge() {
        let (data, root) = three_level();
        assert_eq!(offsets(&run(&data, root, 2, 25, 25).unwrap()), vec![0x1000, 0x2000]);
        assert_eq!(offsets(&run(&data, root, 2, 100, 100).unwrap()), vec![0x4000]);
    }

    #[test]
    fn test_outside_span_is_empty() {
        let (data, root) = three_level();
        assert!(run(&data, root, 2, 101, 500).unwrap().is_empty());

        // Before the first record, which starts after the archive epoch
        let mut data = vec![0u8; 8];
        data.extend_from_slice(&Node::new(8, true, 0, vec![record(10, 20, 0x100)]).build());
        assert!(run(&data, 8, 1, 0, 9).unwrap().is_empty());
        assert_eq!(offsets(&run(&data, 8, 1, 0, 10).unwrap()), vec![0x100]);
    }

    #[test]
    fn test_pruning_skips_subtrees() {
        let (data, root) = three_level();
        let mut query = range_query(
            data.as_slice(),
            &TimeCodec::EPICS,
            root,
            2,
            instant(60),
            instant(70),
        )
        .unwrap();
        let results: Vec<_> = query.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(offsets(&results), vec![0x3000]);

        let stats = query.stats();
        // Root and right child only
        assert_eq!(stats.nodes_visited, 2);
        assert_eq!(stats.records_pruned, 2);
        assert_eq!(stats.matches, 1);
    }

    #[test]
    fn test_reversed_interval_rejected() {
        let (data, root) = three_level();
        let err = range_query(data.as_slice(), &TimeCodec::EPICS, root, 2, instant(60), instant(40))
            .map(|_| ())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);

        // Built without `Interval::new`, so the order is unchecked until here
        let reversed = Interval {
            start: instant(60),
            end: instant(40),
        };
        let err = RangeQuery::new(
            data.as_slice(),
            TimeCodec::EPICS,
            root,
            2,
            reversed,
            QueryOptions::default(),
        )
        .map(|_| ())
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);

        // Checked before the fanout
        let err = RangeQuery::new(
            data.as_slice(),
            TimeCodec::EPICS,
            root,
            0,
            reversed,
            QueryOptions::default(),
        )
        .map(|_| ())
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);
    }

    #[test]
    fn test_zero_fanout() {
        let (data, root) = three_level();
        let err = run(&data, root, 0, 0, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFanout);
    }

    #[test]
    fn test_empty_root() {
        let codec = TimeCodec::EPICS;
        let root = Node::new(8, true, 0, vec![Record::unused(&codec), Record::unused(&codec)]);
        let mut data = vec![0u8; 8];
        data.extend_from_slice(&root.build());

        assert!(run(&data, 8, 2, 0, u32::MAX).unwrap().is_empty());
        // No tree at all
        assert!(run(&data, 0, 2, 0, u32::MAX).unwrap().is_empty());
    }

    #[test]
    fn test_repeated_query_is_identical() {
        let (data, root) = three_level();
        let first = run(&data, root, 2, 10, 80).unwrap();
        let second = run(&data, root, 2, 10, 80).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_cycle_detected() {
        // Root points at a child whose only record points back at the root
        let size = node_size(1);
        let root = 8u64;
        let child = root + size;
        let mut data = vec![0u8; 8];
        data.extend_from_slice(&Node::new(root, false, 0, vec![record(0, 10, child as u32)]).build());
        data.extend_from_slice(
            &Node::new(child, false, root as u32, vec![record(0, 10, root as u32)]).build(),
        );

        let err = run(&data, root, 1, 0, 10).unwrap_err();
        assert!(matches!(
            err,
            IndexError::CycleDetected { offset, visited: 2 } if offset == root
        ));
    }

    #[test]
    fn test_self_loop_detected() {
        let mut data = vec![0u8; 8];
        data.extend_from_slice(&Node::new(8, false, 0, vec![record(0, 10, 8)]).build());
        let err = run(&data, 8, 1, 0, 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CycleDetected);
    }

    #[test]
    fn test_child_past_end_is_out_of_range() {
        let mut data = vec![0u8; 8];
        data.extend_from_slice(&Node::new(8, false, 0, vec![record(0, 10, 0xFFFF)]).build());
        let err = run(&data, 8, 1, 0, 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn test_error_ends_iteration() {
        let mut data = vec![0u8; 8];
        data.extend_from_slice(&Node::new(8, false, 0, vec![record(0, 10, 0xFFFF)]).build());
        let mut query =
            range_query(data.as_slice(), &TimeCodec::EPICS, 8, 1, instant(0), instant(10))
                .unwrap();
        assert!(matches!(query.next(), Some(Err(_))));
        assert!(query.next().is_none());
    }

    #[test]
    fn test_verify_parents() {
        let (mut data, root) = three_level();
        // Point the right child's parent somewhere else
        let right = root + 2 * node_size(2);
        let parent_field = (right + 1) as usize;
        data[parent_field..parent_field + 4].copy_from_slice(&0x99u32.to_be_bytes());

        // Tolerated by default
        assert_eq!(run(&data, root, 2, 0, 100).unwrap().len(), 4);

        let err = RangeQuery::new(
            data.as_slice(),
            TimeCodec::EPICS,
            root,
            2,
            interval(0, 100),
            QueryOptions::default().with_verify_parents(true),
        )
        .unwrap()
        .collect_all()
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptNode);
    }

    #[test]
    fn test_cancel_between_visits() {
        let (data, root) = three_level();
        let cancel = CancelFlag::new();
        let mut query = RangeQuery::new(
            data.as_slice(),
            TimeCodec::EPICS,
            root,
            2,
            interval(0, 100),
            QueryOptions::default().with_cancel(cancel.clone()),
        )
        .unwrap();

        assert!(query.next().unwrap().is_ok());
        cancel.cancel();
        // Records of the leaf already decoded are still delivered
        assert!(query.next().unwrap().is_ok());
        let err = query.next().unwrap().unwrap_err();
        assert!(matches!(err, IndexError::Cancelled { visited: 2 }));
    }

    #[test]
    fn test_descending_and_sorted() {
        let (data, root) = three_level();
        let desc = RangeQuery::new(
            data.as_slice(),
            TimeCodec::EPICS,
            root,
            2,
            interval(0, 100),
            QueryOptions::default().with_descending(true),
        )
        .unwrap()
        .collect_all()
        .unwrap();
        assert_eq!(offsets(&desc), vec![0x4000, 0x3000, 0x2000, 0x1000]);

        let sorted = RangeQuery::new(
            data.as_slice(),
            TimeCodec::EPICS,
            root,
            2,
            interval(30, 80),
            QueryOptions::default().with_sort_results(true),
        )
        .unwrap()
        .collect_all()
        .unwrap();
        assert_eq!(offsets(&sorted), vec![0x2000, 0x3000, 0x4000]);
    }
}
