//! Test utilities for chanarch
//!
//! Builds synthetic archive index images through the public encoding API of
//! `chanarch-index`. Leaves are given as `(start, end, data_offset)` with
//! times in whole seconds after the archive epoch. Trees are packed bottom
//! up: leaf records fill leaves `fanout` at a time, each level's nodes fill
//! the level above, and trailing slots stay unused.

use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};

use chanarch_index::{
    ByteSource, ChannelEntry, IndexError, IndexHeader, Instant, Interval, Node, Record, Result,
    TimeCodec, TreeAnchor,
};
use tempfile::NamedTempFile;

/// Leaf record as `(start_secs, end_secs, data_offset)`
pub type Leaf = (u32, u32, u32);

/// `secs` seconds after the EPICS epoch
pub fn instant(secs: u32) -> Instant {
    Instant::from_unix_secs(TimeCodec::EPICS.epoch_unix_secs() + i64::from(secs))
}

/// Interval between two offsets from the EPICS epoch
///
/// `a` must not exceed `b`.
pub fn interval(a: u32, b: u32) -> Interval {
    Interval {
        start: instant(a),
        end: instant(b),
    }
}

fn leaf_interval(codec: &TimeCodec, (start, end, _): Leaf) -> Result<Interval> {
    Interval::new(codec.decode(start, 0)?, codec.decode(end, 0)?)
}

/// Append a packed tree holding `leaves` to `data` and return its root offset
///
/// `data` must already be non-empty so that no node lands at offset 0.
/// Without leaves the root is a single leaf node with only unused slots.
/// A fanout of 1 can only hold a single leaf record.
pub fn append_tree(
    data: &mut Vec<u8>,
    codec: &TimeCodec,
    fanout: u32,
    leaves: &[Leaf],
) -> Result<u64> {
    if fanout == 0 || (fanout == 1 && leaves.len() > 1) {
        return Err(IndexError::InvalidFanout(fanout));
    }
    let width = fanout as usize;
    let mut level = leaves
        .iter()
        .map(|&leaf| Ok((leaf_interval(codec, leaf)?, u64::from(leaf.2))))
        .collect::<Result<Vec<(Interval, u64)>>>()?;
    let mut is_leaf = true;

    loop {
        let chunks: Vec<&[(Interval, u64)]> = if level.is_empty() {
            vec![level.as_slice()]
        } else {
            level.chunks(width).collect()
        };

        let mut written = Vec::with_capacity(chunks.len());
        let mut next = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let offset = data.len() as u64;
            let mut records = chunk
                .iter()
                .map(|&(span, child)| Record::new(codec, span, child as u32))
                .collect::<Result<Vec<_>>>()?;
            records.resize(width, Record::unused(codec));

            let node = Node::new(offset, is_leaf, 0, records);
            data.extend_from_slice(&node.build());

            if !is_leaf {
                for &(_, child) in chunk {
                    let at = child as usize + 1;
                    data[at..at + 4].copy_from_slice(&(offset as u32).to_be_bytes());
                }
            }
            written.push(offset);
            if let Some(span) = node.covering_interval() {
                next.push((span, offset));
            }
        }

        if let [root] = written.as_slice() {
            return Ok(*root);
        }
        level = next;
        is_leaf = false;
    }
}

/// A bare tree image
#[derive(Debug, Clone)]
pub struct TreeImage {
    /// Image bytes, starting with 8 padding bytes
    pub data: Vec<u8>,
    /// Root node offset
    pub root: u64,
    /// Records per node
    pub fanout: u32,
}

/// Build a bare tree behind 8 padding bytes, EPICS time encoding
pub fn tree_image(fanout: u32, leaves: &[Leaf]) -> Result<TreeImage> {
    let mut data = vec![0u8; 8];
    let root = append_tree(&mut data, &TimeCodec::EPICS, fanout, leaves)?;
    Ok(TreeImage { data, root, fanout })
}

#[derive(Debug, Clone)]
struct PlannedChannel {
    name: String,
    fanout: u32,
    leaves: Option<Vec<Leaf>>,
}

/// Builder for a complete index file: header, anchors, trees
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    codec: TimeCodec,
    channels: Vec<PlannedChannel>,
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveBuilder {
    /// Empty archive with EPICS time encoding
    pub fn new() -> Self {
        Self {
            codec: TimeCodec::EPICS,
            channels: Vec::new(),
        }
    }

    /// Use a different time encoding
    #[must_use]
    pub fn with_codec(mut self, codec: TimeCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Add a channel with a tree over `leaves`
    #[must_use]
    pub fn channel(mut self, name: &str, fanout: u32, leaves: &[Leaf]) -> Self {
        self.channels.push(PlannedChannel {
            name: name.to_string(),
            fanout,
            leaves: Some(leaves.to_vec()),
        });
        self
    }

    /// Add a channel whose anchor has no root
    #[must_use]
    pub fn empty_channel(mut self, name: &str, fanout: u32) -> Self {
        self.channels.push(PlannedChannel {
            name: name.to_string(),
            fanout,
            leaves: None,
        });
        self
    }

    /// Encode the whole index
    pub fn build(&self) -> Result<Vec<u8>> {
        let mut header = IndexHeader::new(
            &self.codec,
            self.channels
                .iter()
                .map(|c| ChannelEntry {
                    name: c.name.clone(),
                    anchor_offset: 0,
                })
                .collect(),
        );
        let anchors_at = header.encoded_size();
        for (i, entry) in header.channels.iter_mut().enumerate() {
            entry.anchor_offset = (anchors_at + i as u64 * TreeAnchor::SIZE) as u32;
        }

        let mut data = header.build()?;
        data.resize(
            (anchors_at + self.channels.len() as u64 * TreeAnchor::SIZE) as usize,
            0,
        );

        for (i, channel) in self.channels.iter().enumerate() {
            let root = match &channel.leaves {
                Some(leaves) => append_tree(&mut data, &self.codec, channel.fanout, leaves)?,
                None => 0,
            };
            let anchor = TreeAnchor {
                root_offset: root as u32,
                fanout: channel.fanout,
            };
            let at = header.channels[i].anchor_offset as usize;
            data[at..at + TreeAnchor::SIZE as usize].copy_from_slice(&anchor.build()?);
        }

        Ok(data)
    }

    /// Encode the index into a temporary file
    pub fn write_temp(&self) -> Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        file.write_all(&self.build()?)?;
        file.flush()?;
        Ok(file)
    }
}

/// `count` back-to-back leaves of `len` seconds starting at `start`, with
/// data offsets `0x1000, 0x2000, ...`
pub fn contiguous_leaves(start: u32, len: u32, count: u32) -> Vec<Leaf> {
    (0..count)
        .map(|i| {
            let s = start + i * len;
            (s, s + len, 0x1000 * (i + 1))
        })
        .collect()
}

/// In-memory source counting `read_at` calls
#[derive(Debug, Default)]
pub struct CountingSource {
    data: Vec<u8>,
    reads: AtomicUsize,
}

impl CountingSource {
    /// Wrap `data` with a zero read count
    pub const fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            reads: AtomicUsize::new(0),
        }
    }

    /// `read_at` calls so far
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl ByteSource for CountingSource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.data.read_at(offset, buf)
    }
}
