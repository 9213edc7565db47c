//! R-tree node and record decoding
//!
//! Binary layout (big-endian):
//! ```text
//! Node (5 + 20 * M bytes, at any absolute offset):
//!   is_leaf:  u8        0 = internal, anything else = leaf
//!   parent:   u32       offset of the parent node, 0 for the root
//!   records:  [Record; M]
//!
//! Record (20 bytes):
//!   start:    timestamp (u32 seconds, u32 fraction)
//!   end:      timestamp (u32 seconds, u32 fraction)
//!   child:    u32       internal: child node offset
//!                       leaf:     data block offset
//!                       0 = unused slot
//! ```

use crate::cursor::{ByteCursor, RawTimestamp};
use crate::error::{ErrorKind, IndexError, Result};
use crate::source::ByteSource;
use crate::time::{Interval, TimeCodec};
use std::fmt;
use tracing::debug;

/// Size of the leaf flag and parent offset preceding the records
pub const NODE_HEADER_SIZE: u64 = 5;

/// Size of one record
pub const RECORD_SIZE: u64 = 20;

/// Encoded size of a node with `fanout` records
pub const fn node_size(fanout: u32) -> u64 {
    NODE_HEADER_SIZE + RECORD_SIZE * fanout as u64
}

/// One slot of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Record {
    /// Time span of the child subtree or data block
    pub interval: Interval,
    /// Child node offset (internal) or data block offset (leaf)
    pub child: u64,
    raw_start: RawTimestamp,
    raw_end: RawTimestamp,
}

impl Record {
    /// Build a used record, encoding its interval for the archive
    pub fn new(codec: &TimeCodec, interval: Interval, child: u32) -> Result<Self> {
        Ok(Self {
            interval,
            child: u64::from(child),
            raw_start: codec.encode(interval.start)?,
            raw_end: codec.encode(interval.end)?,
        })
    }

    /// An unused slot (all fields zero)
    pub fn unused(codec: &TimeCodec) -> Self {
        let epoch = codec.epoch();
        Self {
            interval: Interval {
                start: epoch,
                end: epoch,
            },
            child: 0,
            raw_start: RawTimestamp::default(),
            raw_end: RawTimestamp::default(),
        }
    }

    /// Whether this slot carries no reference
    ///
    /// Zero timestamps mark an empty slot; a zero child offset is the
    /// reserved "absent" value. Either one means the slot must not be
    /// dereferenced.
    pub const fn is_unused(&self) -> bool {
        self.child == 0 || (self.raw_start.is_zero() && self.raw_end.is_zero())
    }

    /// Start timestamp as stored
    pub const fn raw_start(&self) -> RawTimestamp {
        self.raw_start
    }

    /// End timestamp as stored
    pub const fn raw_end(&self) -> RawTimestamp {
        self.raw_end
    }

    fn decode<S: ByteSource + ?Sized>(
        cursor: &mut ByteCursor<'_, S>,
        codec: &TimeCodec,
        node_offset: u64,
        index: usize,
    ) -> Result<Self> {
        let raw_start = cursor.read_timestamp()?;
        let raw_end = cursor.read_timestamp()?;
        let child = u64::from(cursor.read_u32()?);

        let unused = child == 0 || (raw_start.is_zero() && raw_end.is_zero());
        let decoded = codec
            .decode_raw(raw_start)
            .and_then(|start| Ok((start, codec.decode_raw(raw_end)?)));

        let interval = match decoded {
            Ok((start, end)) if start <= end => Interval { start, end },
            _ if unused => {
                // Garbage in an unused slot is never looked at
                let epoch = codec.epoch();
                Interval {
                    start: epoch,
                    end: epoch,
                }
            }
            Ok((start, end)) => {
                return Err(IndexError::corrupt(
                    node_offset,
                    format!("record {index}: start {start} is after end {end}"),
                ));
            }
            Err(e) => {
                return Err(IndexError::corrupt(
                    node_offset,
                    format!("record {index}: {e}"),
                ));
            }
        };

        Ok(Self {
            interval,
            child,
            raw_start,
            raw_end,
        })
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        self.raw_start.write_to(out);
        self.raw_end.write_to(out);
        // Offsets are u32 on disk
        out.extend_from_slice(&(self.child as u32).to_be_bytes());
    }
}

/// A decoded R-tree node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Absolute offset the node was read from
    pub offset: u64,
    /// Whether records point at data blocks
    pub is_leaf: bool,
    /// Offset of the parent node, 0 for the root
    pub parent: u64,
    /// Exactly `M` records in stored order
    pub records: Vec<Record>,
    leaf_flag: u8,
}

impl Node {
    /// Assemble a node value
    pub fn new(offset: u64, is_leaf: bool, parent: u32, records: Vec<Record>) -> Self {
        Self {
            offset,
            is_leaf,
            parent: u64::from(parent),
            records,
            leaf_flag: u8::from(is_leaf),
        }
    }

    /// Decode the node at `offset` with `fanout` records
    ///
    /// An offset at or beyond the end of the source is
    /// [`ErrorKind::OutOfRange`]: the index pointed past the file. A node
    /// that starts inside the file but does not fit is
    /// [`ErrorKind::CorruptNode`]: the file is too short.
    pub fn decode<S: ByteSource + ?Sized>(
        cursor: &mut ByteCursor<'_, S>,
        offset: u64,
        fanout: u32,
        codec: &TimeCodec,
    ) -> Result<Self> {
        if fanout == 0 {
            return Err(IndexError::InvalidFanout(fanout));
        }
        if offset == 0 {
            return Err(IndexError::corrupt(0, "offset 0 is reserved for absent nodes"));
        }
        let len = cursor.len();
        if offset >= len {
            return Err(IndexError::OffsetOutOfRange { offset, len });
        }
        cursor.seek(offset)?;

        let size = node_size(fanout);
        if cursor.remaining() < size {
            let truncated = IndexError::Truncated {
                offset,
                needed: size as usize,
                available: cursor.remaining(),
            };
            return Err(IndexError::corrupt(offset, truncated.to_string()));
        }

        Self::decode_at_cursor(cursor, offset, fanout, codec).map_err(|e| match e.kind() {
            ErrorKind::Truncated | ErrorKind::Io => IndexError::corrupt(offset, e.to_string()),
            _ => e,
        })
    }

    fn decode_at_cursor<S: ByteSource + ?Sized>(
        cursor: &mut ByteCursor<'_, S>,
        offset: u64,
        fanout: u32,
        codec: &TimeCodec,
    ) -> Result<Self> {
        let leaf_flag = cursor.read_u8()?;
        if leaf_flag > 1 {
            debug!("Node {offset:#x} has leaf flag {leaf_flag:#04x}, treating as leaf");
        }
        let parent = u64::from(cursor.read_u32()?);

        let mut records = Vec::with_capacity(fanout as usize);
        for i in 0..fanout as usize {
            records.push(Record::decode(cursor, codec, offset, i)?);
        }

        Ok(Self {
            offset,
            is_leaf: leaf_flag != 0,
            parent,
            records,
            leaf_flag,
        })
    }

    /// Leaf flag byte as stored
    pub const fn leaf_flag(&self) -> u8 {
        self.leaf_flag
    }

    /// Number of record slots
    pub fn fanout(&self) -> usize {
        self.records.len()
    }

    /// Records that reference a child or data block, with their slot index
    pub fn used_records(&self) -> impl DoubleEndedIterator<Item = (usize, &Record)> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.is_unused())
    }

    /// Whether every slot is unused
    pub fn is_empty(&self) -> bool {
        self.used_records().next().is_none()
    }

    /// Interval spanning all used records, `None` for an empty node
    pub fn covering_interval(&self) -> Option<Interval> {
        self.used_records()
            .map(|(_, r)| r.interval)
            .reduce(|acc, i| Interval {
                start: acc.start.min(i.start),
                end: acc.end.max(i.end),
            })
    }

    /// Encode the node to its on-disk bytes
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(node_size(self.records.len() as u32) as usize);
        out.push(self.leaf_flag);
        out.extend_from_slice(&(self.parent as u32).to_be_bytes());
        for record in &self.records {
            record.write_to(&mut out);
        }
        out
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RTree Node @ {:#x}", self.offset)?;
        if self.is_leaf {
            f.write_str(" (leaf)")?;
        }
        if self.parent != 0 {
            write!(f, " parent @ {:#x}", self.parent)?;
        }
        writeln!(f)?;
        for (i, record) in self.records.iter().enumerate() {
            writeln!(
                f,
                "[{i}] {} - {} -> {:#x}",
                record.interval.start, record.interval.end, record.child
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::{interval, record};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn sample_node(offset: u64) -> Node {
        let codec = TimeCodec::EPICS;
        Node::new(
            offset,
            true,
            0x40,
            vec![
                record(0, 10, 0x1000),
                record(10, 20, 0x2000),
                Record::unused(&codec),
            ],
        )
    }

    fn image_with_node(offset: u64, node: &Node) -> Vec<u8> {
        let mut data = vec![0u8; offset as usize];
        data.extend_from_slice(&node.build());
        data
    }

    #[test]
    fn test_node_size() {
        assert_eq!(node_size(1), 25);
        assert_eq!(node_size(2), 45);
        assert_eq!(node_size(50), 1005);
    }

    #[test]
    fn test_decode_node() {
        let node = sample_node(0x10);
        let data = image_with_node(0x10, &node);
        assert_eq!(data.len() as u64, 0x10 + node_size(3));

        let mut cursor = ByteCursor::new(&data);
        let decoded = Node::decode(&mut cursor, 0x10, 3, &TimeCodec::EPICS).unwrap();
        assert_eq!(decoded, node);
        assert!(decoded.is_leaf);
        assert_eq!(decoded.parent, 0x40);
        assert_eq!(decoded.used_records().count(), 2);
        assert_eq!(decoded.covering_interval(), Some(interval(0, 20)));
    }

    #[test]
    fn test_zero_fanout_fails_fast() {
        let data = vec![0u8; 64];
        let mut cursor = ByteCursor::new(&data);
        let err = Node::decode(&mut cursor, 8, 0, &TimeCodec::EPICS).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFanout);
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_offset_past_end_is_out_of_range() {
        let data = vec![0u8; 32];
        let mut cursor = ByteCursor::new(&data);
        let err = Node::decode(&mut cursor, 32, 1, &TimeCodec::EPICS).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
        let err = Node::decode(&mut cursor, 4096, 1, &TimeCodec::EPICS).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn test_short_node_is_corrupt() {
        let node = sample_node(0x10);
        let mut data = image_with_node(0x10, &node);
        data.truncate(data.len() - 1);

        let mut cursor = ByteCursor::new(&data);
        let err = Node::decode(&mut cursor, 0x10, 3, &TimeCodec::EPICS).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptNode);
        assert!(err.to_string().contains("truncated"));

        // Declaring a larger fanout than the bytes hold is the same failure
        let data = image_with_node(0x10, &node);
        let mut cursor = ByteCursor::new(&data);
        let err = Node::decode(&mut cursor, 0x10, 4, &TimeCodec::EPICS).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptNode);
    }

    #[test]
    fn test_reversed_record_is_corrupt() {
        let node = Node::new(8, true, 0, vec![record(0, 10, 0x100)]);
        let mut data = image_with_node(8, &node);
        // Swap start and end seconds of record 0
        let rec = 8 + NODE_HEADER_SIZE as usize;
        let start = data[rec..rec + 8].to_vec();
        let end = data[rec + 8..rec + 16].to_vec();
        data[rec..rec + 8].copy_from_slice(&end);
        data[rec + 8..rec + 16].copy_from_slice(&start);

        let mut cursor = ByteCursor::new(&data);
        let err = Node::decode(&mut cursor, 8, 1, &TimeCodec::EPICS).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptNode);
    }

    #[test]
    fn test_unused_slot_tolerates_garbage_times() {
        let mut data = vec![0u8; 8];
        data.push(1); // leaf
        data.extend_from_slice(&0u32.to_be_bytes());
        // start with an invalid fraction, end before start, child 0
        data.extend_from_slice(&5u32.to_be_bytes());
        data.extend_from_slice(&u32::MAX.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());

        let mut cursor = ByteCursor::new(&data);
        let node = Node::decode(&mut cursor, 8, 1, &TimeCodec::EPICS).unwrap();
        assert!(node.records[0].is_unused());
        assert!(node.is_empty());
        assert_eq!(node.build(), data[8..].to_vec());
    }

    #[test]
    fn test_display_format() {
        let node = Node::new(
            0x20,
            true,
            0x400,
            vec![record(0, 10, 0x1000)],
        );
        let text = node.to_string();
        assert_eq!(
            text,
            "RTree Node @ 0x20 (leaf) parent @ 0x400\n\
             [0] 1990-01-01 00:00:00.000000000 - 1990-01-01 00:00:10.000000000 -> 0x1000\n"
        );

        let root = Node::new(0x20, false, 0, vec![record(0, 10, 0x1000)]);
        assert!(root.to_string().starts_with("RTree Node @ 0x20\n"));
    }

    proptest! {
        /// Any nonzero leaf byte decodes as a leaf and is preserved
        #[test]
        fn leaf_flag_nonzero_is_leaf(flag in any::<u8>()) {
            let node = Node::new(4, true, 0, vec![record(1, 2, 0x80)]);
            let mut data = image_with_node(4, &node);
            data[4] = flag;

            let mut cursor = ByteCursor::new(&data);
            let decoded = Node::decode(&mut cursor, 4, 1, &TimeCodec::EPICS).unwrap();
            prop_assert_eq!(decoded.is_leaf, flag != 0);
            prop_assert_eq!(decoded.leaf_flag(), flag);
            prop_assert_eq!(decoded.build(), data[4..].to_vec());
        }

        /// Arbitrary bytes never panic and never produce a short node
        #[test]
        fn arbitrary_bytes_decode_or_fail(data in prop::collection::vec(any::<u8>(), 0..128), fanout in 1u32..6) {
            let mut cursor = ByteCursor::new(&data);
            match Node::decode(&mut cursor, 1, fanout, &TimeCodec::EPICS) {
                Ok(node) => prop_assert_eq!(node.records.len(), fanout as usize),
                Err(e) => prop_assert!(matches!(
                    e.kind(),
                    ErrorKind::CorruptNode | ErrorKind::OutOfRange
                )),
            }
        }
    }
}
