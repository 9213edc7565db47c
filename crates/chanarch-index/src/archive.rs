//! Opened archive index file
//!
//! An [`ArchiveIndex`] owns the byte source, the parsed header and the time
//! codec. It is immutable after opening; share it behind an `Arc` to query
//! from several threads.

use std::path::Path;

use tracing::{debug, info};

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::header::{ChannelEntry, IndexHeader};
use crate::rtree::RTree;
use crate::source::{ByteSource, FileSource, MmapSource};
use crate::time::TimeCodec;

/// Source chosen by [`ArchiveIndex::open`]
pub enum IndexSource {
    /// Memory-mapped file
    Mapped(MmapSource),
    /// Positional reads on a file handle
    File(FileSource),
}

impl ByteSource for IndexSource {
    fn len(&self) -> u64 {
        match self {
            Self::Mapped(s) => s.len(),
            Self::File(s) => s.len(),
        }
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Mapped(s) => s.read_at(offset, buf),
            Self::File(s) => s.read_at(offset, buf),
        }
    }
}

/// An opened archive index
pub struct ArchiveIndex<S: ByteSource = IndexSource> {
    source: S,
    header: IndexHeader,
    codec: TimeCodec,
    config: IndexConfig,
}

impl ArchiveIndex<IndexSource> {
    /// Open the index file at `path`
    pub fn open(path: impl AsRef<Path>, config: &IndexConfig) -> Result<Self> {
        let path = path.as_ref();
        let source = if config.use_mmap {
            IndexSource::Mapped(MmapSource::open(path)?)
        } else {
            IndexSource::File(FileSource::open(path)?)
        };

        let index = Self::from_source(source, config.clone())?;
        info!(
            "Opened archive index {} ({} channels, {} bytes)",
            path.display(),
            index.header.channels.len(),
            index.source.len()
        );
        Ok(index)
    }
}

impl<S: ByteSource> ArchiveIndex<S> {
    /// Parse the header of an already opened source
    pub fn from_source(source: S, config: IndexConfig) -> Result<Self> {
        let header = IndexHeader::read_from(&source)?;
        let codec = header.codec()?;
        Ok(Self {
            source,
            header,
            codec,
            config,
        })
    }

    /// Parsed header
    pub const fn header(&self) -> &IndexHeader {
        &self.header
    }

    /// Time codec of this archive
    pub const fn codec(&self) -> &TimeCodec {
        &self.codec
    }

    /// Configuration the index was opened with
    pub const fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Underlying byte source
    pub const fn source(&self) -> &S {
        &self.source
    }

    /// Channel directory in stored order
    pub fn channels(&self) -> &[ChannelEntry] {
        &self.header.channels
    }

    /// Open the tree of channel `name`
    pub fn tree(&self, name: &str) -> Result<RTree<'_, S>> {
        let entry = self
            .header
            .channel(name)
            .ok_or_else(|| IndexError::ChannelNotFound(name.to_string()))?;
        self.tree_for(entry)
    }

    /// Open the tree of a directory entry
    pub fn tree_for(&self, entry: &ChannelEntry) -> Result<RTree<'_, S>> {
        let tree = RTree::open_at(
            &self.source,
            self.codec,
            u64::from(entry.anchor_offset),
            self.config.max_fanout,
        )?;
        Ok(tree.with_options(self.config.query_options()))
    }

    /// Release the index and hand back its source
    pub fn into_source(self) -> S {
        self.source
    }

    /// Release the backing file or mapping
    pub fn close(self) {
        debug!(
            "Closing archive index ({} channels, {} bytes)",
            self.header.channels.len(),
            self.source.len()
        );
        drop(self.source);
    }
}
