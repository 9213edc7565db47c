//! Index file header and channel directory
//!
//! The index file opens with a fixed preamble describing the archive time
//! encoding, followed by a directory mapping channel names to the offsets
//! of their tree anchors.
//!
//! ```text
//! 0x00  magic             [u8; 4]   "CAIX"
//! 0x04  version           u32       1
//! 0x08  epoch_unix_secs   i64       archive epoch in Unix seconds
//! 0x10  ticks_per_second  u32       sub-second fraction resolution
//! 0x14  channel_count     u32
//! 0x18  channels          [ChannelEntry; channel_count]
//!
//! ChannelEntry:
//!       name_len          u16
//!       name              [u8; name_len]  UTF-8
//!       anchor_offset     u32
//! ```
//!
//! All integers are big-endian.

use binrw::io::{Read, Seek, Write};
use binrw::{BinRead, BinResult, BinWrite};

use crate::cursor::ByteCursor;
use crate::error::{IndexError, Result};
use crate::source::ByteSource;
use crate::time::TimeCodec;

/// Index file magic bytes
pub const INDEX_MAGIC: [u8; 4] = *b"CAIX";

/// Supported header version
pub const INDEX_VERSION: u32 = 1;

/// Size of the fixed preamble before the channel directory
pub const PREAMBLE_SIZE: u64 = 24;

/// One channel directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEntry {
    /// Channel name
    pub name: String,
    /// Offset of the channel's tree anchor
    pub anchor_offset: u32,
}

impl ChannelEntry {
    /// Encoded size in bytes
    pub fn encoded_size(&self) -> u64 {
        2 + self.name.len() as u64 + 4
    }
}

impl BinRead for ChannelEntry {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let name_len = u16::read_options(reader, endian, ())?;
        let mut name = vec![0u8; usize::from(name_len)];
        reader.read_exact(&mut name)?;
        let name = String::from_utf8(name).map_err(|e| binrw::Error::Custom {
            pos,
            err: Box::new(IndexError::MalformedHeader(format!(
                "channel name at {pos:#x} is not UTF-8: {e}"
            ))),
        })?;
        let anchor_offset = u32::read_options(reader, endian, ())?;

        Ok(Self {
            name,
            anchor_offset,
        })
    }
}

impl BinWrite for ChannelEntry {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        let name_len = u16::try_from(self.name.len()).map_err(|_| binrw::Error::AssertFail {
            pos: writer.stream_position().unwrap_or_default(),
            message: format!("channel name longer than {} bytes", u16::MAX),
        })?;
        name_len.write_options(writer, endian, ())?;
        writer.write_all(self.name.as_bytes())?;
        self.anchor_offset.write_options(writer, endian, ())?;
        Ok(())
    }
}

/// Index file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHeader {
    /// Format version
    pub version: u32,
    /// Archive epoch in Unix seconds
    pub epoch_unix_secs: i64,
    /// Timestamp fraction resolution
    pub ticks_per_second: u32,
    /// Channel directory in stored order
    pub channels: Vec<ChannelEntry>,
}

impl BinRead for IndexHeader {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        _endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != INDEX_MAGIC {
            return Err(binrw::Error::Custom {
                pos: 0,
                err: Box::new(IndexError::BadMagic(magic)),
            });
        }

        let version = u32::read_options(reader, binrw::Endian::Big, ())?;
        if version != INDEX_VERSION {
            return Err(binrw::Error::Custom {
                pos: 4,
                err: Box::new(IndexError::UnsupportedVersion(version)),
            });
        }

        let epoch_unix_secs = i64::read_options(reader, binrw::Endian::Big, ())?;
        let ticks_per_second = u32::read_options(reader, binrw::Endian::Big, ())?;
        let channel_count = u32::read_options(reader, binrw::Endian::Big, ())?;

        // The count comes from the file; let the reads, not the count, bound
        // the allocation.
        let mut channels = Vec::with_capacity((channel_count as usize).min(1024));
        for _ in 0..channel_count {
            channels.push(ChannelEntry::read_options(reader, binrw::Endian::Big, ())?);
        }

        Ok(Self {
            version,
            epoch_unix_secs,
            ticks_per_second,
            channels,
        })
    }
}

impl BinWrite for IndexHeader {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        _endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        writer.write_all(&INDEX_MAGIC)?;
        self.version.write_options(writer, binrw::Endian::Big, ())?;
        self.epoch_unix_secs
            .write_options(writer, binrw::Endian::Big, ())?;
        self.ticks_per_second
            .write_options(writer, binrw::Endian::Big, ())?;
        (self.channels.len() as u32).write_options(writer, binrw::Endian::Big, ())?;
        for channel in &self.channels {
            channel.write_options(writer, binrw::Endian::Big, ())?;
        }
        Ok(())
    }
}

impl IndexHeader {
    /// Header for an archive using `codec`
    pub fn new(codec: &TimeCodec, channels: Vec<ChannelEntry>) -> Self {
        Self {
            version: INDEX_VERSION,
            epoch_unix_secs: codec.epoch_unix_secs(),
            ticks_per_second: codec.ticks_per_second(),
            channels,
        }
    }

    /// Read and validate the header at the start of `source`
    pub fn read_from<S: ByteSource + ?Sized>(source: &S) -> Result<Self> {
        let len = source.len();
        if len < PREAMBLE_SIZE {
            return Err(IndexError::Truncated {
                offset: 0,
                needed: PREAMBLE_SIZE as usize,
                available: len,
            });
        }

        let mut cursor = ByteCursor::new(source);
        let header = Self::read_be(&mut cursor)?;
        // Reject unusable resolutions up front
        header.codec()?;
        Ok(header)
    }

    /// Time codec described by this header
    pub fn codec(&self) -> Result<TimeCodec> {
        TimeCodec::new(self.epoch_unix_secs, self.ticks_per_second)
    }

    /// Look up a channel by name
    pub fn channel(&self, name: &str) -> Option<&ChannelEntry> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Encoded size in bytes
    pub fn encoded_size(&self) -> u64 {
        PREAMBLE_SIZE + self.channels.iter().map(ChannelEntry::encoded_size).sum::<u64>()
    }

    /// Encode the header
    pub fn build(&self) -> Result<Vec<u8>> {
        let mut out = binrw::io::Cursor::new(Vec::with_capacity(self.encoded_size() as usize));
        self.write_be(&mut out)?;
        Ok(out.into_inner())
    }
}
