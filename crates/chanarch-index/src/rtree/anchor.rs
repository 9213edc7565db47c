//! Per-channel tree anchor
//!
//! The anchor is the fixed entry point of one channel's tree: the offset of
//! the root node and the fanout `M` shared by every node of that tree.

use binrw::{BinRead, BinWrite};

use crate::cursor::ByteCursor;
use crate::error::{IndexError, Result};
use crate::source::ByteSource;

/// Root offset and fanout of one tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BinRead, BinWrite)]
#[brw(big)]
pub struct TreeAnchor {
    /// Offset of the root node, 0 when the channel has no tree yet
    pub root_offset: u32,
    /// Records per node
    pub fanout: u32,
}

impl TreeAnchor {
    /// Encoded size in bytes
    pub const SIZE: u64 = 8;

    /// Read the anchor at `offset`, accepting fanouts in `1..=max_fanout`
    pub fn read_at<S: ByteSource + ?Sized>(
        source: &S,
        offset: u64,
        max_fanout: u32,
    ) -> Result<Self> {
        let mut cursor = ByteCursor::new(source);
        cursor.seek(offset)?;
        if cursor.remaining() < Self::SIZE {
            return Err(IndexError::Truncated {
                offset,
                needed: Self::SIZE as usize,
                available: cursor.remaining(),
            });
        }

        let anchor = Self::read(&mut cursor)?;
        anchor.validate(max_fanout)?;
        Ok(anchor)
    }

    /// Check the fanout against `1..=max_fanout`
    pub fn validate(&self, max_fanout: u32) -> Result<()> {
        if self.fanout == 0 || self.fanout > max_fanout {
            return Err(IndexError::InvalidFanout(self.fanout));
        }
        Ok(())
    }

    /// Encode the anchor
    pub fn build(&self) -> Result<Vec<u8>> {
        let mut out = binrw::io::Cursor::new(Vec::with_capacity(Self::SIZE as usize));
        self.write(&mut out)?;
        Ok(out.into_inner())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_read_anchor() {
        let anchor = TreeAnchor {
            root_offset: 0x1234,
            fanout: 50,
        };
        let mut data = vec![0u8; 16];
        data.extend_from_slice(&anchor.build().unwrap());
        assert_eq!(&data[16..20], &0x1234u32.to_be_bytes());

        let read = TreeAnchor::read_at(data.as_slice(), 16, 100).unwrap();
        assert_eq!(read, anchor);
    }

    #[test]
    fn test_fanout_limits() {
        let zero = TreeAnchor {
            root_offset: 8,
            fanout: 0,
        };
        let data = zero.build().unwrap();
        let err = TreeAnchor::read_at(data.as_slice(), 0, 100).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFanout);

        let huge = TreeAnchor {
            root_offset: 8,
            fanout: 1_000_000,
        };
        assert_eq!(huge.validate(4096).unwrap_err().kind(), ErrorKind::InvalidFanout);
        assert!(huge.validate(u32::MAX).is_ok());
    }

    #[test]
    fn test_anchor_bounds() {
        let data = vec![0u8; 12];
        let err = TreeAnchor::read_at(data.as_slice(), 8, 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Truncated);

        let err = TreeAnchor::read_at(data.as_slice(), 13, 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
    }
}
