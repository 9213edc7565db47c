//! Positioned reads over a [`ByteSource`]
//!
//! A cursor borrows its source and owns only a position, so every traversal
//! creates its own cursors and nothing is shared mutably between threads.
//! All multi-byte integers in the archive are big-endian.

use crate::error::{IndexError, Result};
use crate::source::ByteSource;
use std::io::{self, Read, Seek, SeekFrom};

/// On-disk timestamp: whole seconds since the archive epoch plus a
/// sub-second fraction in archive ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RawTimestamp {
    /// Seconds since the archive epoch
    pub secs: u32,
    /// Sub-second ticks
    pub frac: u32,
}

impl RawTimestamp {
    /// Encoded size in bytes
    pub const SIZE: usize = 8;

    /// Both fields zero; marks unused record slots
    pub const fn is_zero(self) -> bool {
        self.secs == 0 && self.frac == 0
    }

    /// Append the big-endian encoding to `out`
    pub fn write_to(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.secs.to_be_bytes());
        out.extend_from_slice(&self.frac.to_be_bytes());
    }
}

/// Read cursor over a byte source
pub struct ByteCursor<'a, S: ByteSource + ?Sized> {
    source: &'a S,
    pos: u64,
}

impl<'a, S: ByteSource + ?Sized> ByteCursor<'a, S> {
    /// Create a cursor positioned at offset 0
    pub fn new(source: &'a S) -> Self {
        Self { source, pos: 0 }
    }

    /// Current absolute position
    pub const fn position(&self) -> u64 {
        self.pos
    }

    /// Length of the underlying source
    pub fn len(&self) -> u64 {
        self.source.len()
    }

    /// Whether the underlying source is empty
    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Bytes between the current position and the end of the source
    pub fn remaining(&self) -> u64 {
        self.len().saturating_sub(self.pos)
    }

    /// Move to an absolute offset
    ///
    /// Seeking exactly to the end is allowed; anything beyond fails with
    /// [`IndexError::OffsetOutOfRange`].
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        let len = self.len();
        if offset > len {
            return Err(IndexError::OffsetOutOfRange { offset, len });
        }
        self.pos = offset;
        Ok(())
    }

    /// Fill `buf` from the current position and advance past it
    pub fn read_exact_at_pos(&mut self, buf: &mut [u8]) -> Result<()> {
        let available = self.remaining();
        if (buf.len() as u64) > available {
            return Err(IndexError::Truncated {
                offset: self.pos,
                needed: buf.len(),
                available,
            });
        }

        let n = self.source.read_at(self.pos, buf)?;
        if n < buf.len() {
            // Source shrank or misreported its length
            return Err(IndexError::Truncated {
                offset: self.pos,
                needed: buf.len(),
                available: n as u64,
            });
        }

        self.pos += buf.len() as u64;
        Ok(())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut b = [0u8; N];
        self.read_exact_at_pos(&mut b)?;
        Ok(b)
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Read a big-endian `u16`
    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian `u32`
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian `i64`
    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    /// Read `n` raw bytes
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let available = self.remaining();
        if (n as u64) > available {
            return Err(IndexError::Truncated {
                offset: self.pos,
                needed: n,
                available,
            });
        }
        let mut buf = vec![0u8; n];
        self.read_exact_at_pos(&mut buf)?;
        Ok(buf)
    }

    /// Read an on-disk timestamp (seconds word, then fraction word)
    pub fn read_timestamp(&mut self) -> Result<RawTimestamp> {
        let secs = self.read_u32()?;
        let frac = self.read_u32()?;
        Ok(RawTimestamp { secs, frac })
    }
}

impl<S: ByteSource + ?Sized> Read for ByteCursor<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.source.read_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<S: ByteSource + ?Sized> Seek for ByteCursor<'_, S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.len().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        match target {
            Some(n) => {
                self.pos = n;
                Ok(n)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )),
        }
    }
}
