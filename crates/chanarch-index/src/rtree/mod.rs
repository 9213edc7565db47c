//! Time-interval R-tree
//!
//! Every channel of an archive owns one 1-D R-tree keyed by time. Internal
//! records cover the span of their child subtree; leaf records point at
//! data blocks holding the samples of their span. An [`RTree`] borrows the
//! archive's byte source and decodes nodes on demand, so any number of
//! trees and queries can run over one source at the same time.

pub mod anchor;
pub mod node;
pub mod query;
mod verify;
mod walk;

pub use anchor::TreeAnchor;
pub use node::{NODE_HEADER_SIZE, Node, RECORD_SIZE, Record, node_size};
pub use query::{CancelFlag, LeafRecord, QueryOptions, QueryStats, RangeQuery, range_query};
pub use verify::TreeStats;
pub use walk::{NodeVisit, NodeWalk};

use tracing::debug;

use crate::block::{SampleBlock, SampleBlockReader};
use crate::cursor::ByteCursor;
use crate::error::{IndexError, Result};
use crate::source::ByteSource;
use crate::time::{Interval, TimeCodec};

/// One tree, opened from its anchor
pub struct RTree<'a, S: ByteSource + ?Sized> {
    source: &'a S,
    codec: TimeCodec,
    anchor: TreeAnchor,
    options: QueryOptions,
}

impl<'a, S: ByteSource + ?Sized> RTree<'a, S> {
    /// Open the tree described by `anchor`
    pub fn new(source: &'a S, codec: TimeCodec, anchor: TreeAnchor) -> Result<Self> {
        if anchor.fanout == 0 {
            return Err(IndexError::InvalidFanout(anchor.fanout));
        }
        Ok(Self {
            source,
            codec,
            anchor,
            options: QueryOptions::default(),
        })
    }

    /// Open the tree whose anchor lives at `anchor_offset`
    pub fn open_at(
        source: &'a S,
        codec: TimeCodec,
        anchor_offset: u64,
        max_fanout: u32,
    ) -> Result<Self> {
        let anchor = TreeAnchor::read_at(source, anchor_offset, max_fanout)?;
        debug!(
            "Tree anchor at {anchor_offset:#x}: root {:#x}, fanout {}",
            anchor.root_offset, anchor.fanout
        );
        Self::new(source, codec, anchor)
    }

    /// Replace the options used by [`RTree::range_query`]
    #[must_use]
    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    /// The tree anchor
    pub const fn anchor(&self) -> TreeAnchor {
        self.anchor
    }

    /// Offset of the root node, 0 for a tree without nodes
    pub fn root_offset(&self) -> u64 {
        u64::from(self.anchor.root_offset)
    }

    /// Records per node
    pub const fn fanout(&self) -> u32 {
        self.anchor.fanout
    }

    /// Time codec of the archive
    pub const fn codec(&self) -> &TimeCodec {
        &self.codec
    }

    /// Decode the node at `offset`
    pub fn node(&self, offset: u64) -> Result<Node> {
        let mut cursor = ByteCursor::new(self.source);
        Node::decode(&mut cursor, offset, self.anchor.fanout, &self.codec)
    }

    /// Decode the root node, `None` when the tree has no root
    pub fn root(&self) -> Result<Option<Node>> {
        match self.root_offset() {
            0 => Ok(None),
            offset => self.node(offset).map(Some),
        }
    }

    /// Leaf records intersecting `interval`, with the tree's options
    pub fn range_query(&self, interval: Interval) -> Result<RangeQuery<'a, S>> {
        self.range_query_with(interval, self.options.clone())
    }

    /// Leaf records intersecting `interval`, with explicit options
    pub fn range_query_with(
        &self,
        interval: Interval,
        options: QueryOptions,
    ) -> Result<RangeQuery<'a, S>> {
        RangeQuery::new(
            self.source,
            self.codec,
            self.root_offset(),
            self.anchor.fanout,
            interval,
            options,
        )
    }

    /// Leftmost used leaf record
    pub fn first_record(&self) -> Result<Option<LeafRecord>> {
        self.edge_record(false)
    }

    /// Rightmost used leaf record
    pub fn last_record(&self) -> Result<Option<LeafRecord>> {
        self.edge_record(true)
    }

    fn edge_record(&self, descending: bool) -> Result<Option<LeafRecord>> {
        let options = QueryOptions {
            descending,
            cancel: self.options.cancel.clone(),
            ..QueryOptions::default()
        };
        self.range_query_with(Interval::unbounded(), options)?
            .next()
            .transpose()
    }

    /// Span from the start of the first record to the end of the last
    pub fn time_range(&self) -> Result<Option<Interval>> {
        let (Some(first), Some(last)) = (self.first_record()?, self.last_record()?) else {
            return Ok(None);
        };
        Ok(Some(Interval {
            start: first.interval.start,
            end: last.interval.end.max(first.interval.end),
        }))
    }

    /// Every node in depth-first pre-order
    pub fn nodes(&self) -> NodeWalk<'a, S> {
        NodeWalk::new(
            self.source,
            self.codec,
            self.root_offset(),
            self.anchor.fanout,
        )
    }

    /// Check the whole tree for structural consistency
    pub fn verify(&self) -> Result<TreeStats> {
        verify::verify(self.nodes())
    }

    /// Decode the sample blocks of every leaf record intersecting
    /// `interval`, in traversal order
    pub fn read_samples<R: SampleBlockReader>(
        &self,
        interval: Interval,
        mut reader: R,
    ) -> Result<Vec<SampleBlock<R::Sample>>> {
        let mut blocks = Vec::new();
        for record in self.range_query(interval)? {
            let record = record?;
            let samples = reader
                .decode_block(record.data_offset)
                .map_err(|e| IndexError::SampleBlock {
                    offset: record.data_offset,
                    source: Box::new(e),
                })?;
            blocks.push(SampleBlock { record, samples });
        }
        Ok(blocks)
    }
}
