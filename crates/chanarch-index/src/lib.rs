//! Read path for channel archive indexes
//!
#![allow(clippy::cast_possible_wrap)] // u32 offsets and i64 seconds mix freely
#![allow(clippy::cast_lossless)] // Sometimes clearer than From
#![allow(clippy::uninlined_format_args)] // Long format argument lists
#![allow(clippy::return_self_not_must_use)] // Builder patterns
//! A channel archive stores time-stamped samples per channel in data blocks.
//! For every channel the index file holds a 1-D R-tree keyed by time that
//! maps a time range to the data blocks whose samples fall inside it. This
//! crate decodes that index and answers range queries; it never writes to
//! an archive and never decodes sample payloads itself.
//!
//! # Layers
//!
//! - **Sources** ([`source`]): files, memory maps or buffers behind one
//!   positional-read trait
//! - **Cursor** ([`cursor`]): big-endian field reads over a source
//! - **Time** ([`time`]): archive timestamps to and from [`Instant`]s
//! - **Header** ([`header`]): magic, time encoding and channel directory
//! - **R-tree** ([`rtree`]): node decoding, range queries, tree checks
//! - **Archive** ([`archive`]): an opened index file tying it together
//!
//! # Example
//!
//! ```no_run
//! use chanarch_index::{ArchiveIndex, IndexConfig, Instant, Interval};
//!
//! # fn main() -> chanarch_index::Result<()> {
//! let index = ArchiveIndex::open("archive/index", &IndexConfig::default())?;
//! let tree = index.tree("DTL_HPRF:Tnk1:T")?;
//! let window = Interval::new(
//!     Instant::from_unix_secs(1_700_000_000),
//!     Instant::from_unix_secs(1_700_003_600),
//! )?;
//! for record in tree.range_query(window)? {
//!     let record = record?;
//!     println!("{} @ {:#x}", record.interval, record.data_offset);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod archive;
pub mod block;
pub mod config;
pub mod cursor;
pub mod error;
pub mod header;
pub mod rtree;
pub mod source;
pub mod time;

#[cfg(test)]
pub(crate) mod test_utils;

pub use archive::{ArchiveIndex, IndexSource};
pub use block::{SampleBlock, SampleBlockReader};
pub use config::IndexConfig;
pub use cursor::{ByteCursor, RawTimestamp};
pub use error::{ErrorKind, IndexError, Result};
pub use header::{ChannelEntry, IndexHeader};
pub use rtree::{
    CancelFlag, LeafRecord, Node, QueryOptions, RTree, RangeQuery, Record, TreeAnchor, TreeStats,
    range_query,
};
pub use source::{ByteSource, FileSource, MmapSource};
pub use time::{Instant, Interval, TimeCodec};
