//! Hand-off from leaf records to a sample block decoder
//!
//! The index only knows where data blocks live. Decoding their samples is
//! left to an implementation of [`SampleBlockReader`].

use crate::rtree::LeafRecord;

/// Decodes the samples stored in a data block
pub trait SampleBlockReader {
    /// Decoded sample type
    type Sample;
    /// Decoder failure
    type Error: std::error::Error + Send + Sync + 'static;

    /// Decode the block at `offset`
    fn decode_block(&mut self, offset: u64) -> Result<Vec<Self::Sample>, Self::Error>;
}

/// Samples of one data block together with the record that located it
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlock<T> {
    /// Leaf record pointing at the block
    pub record: LeafRecord,
    /// Decoded samples
    pub samples: Vec<T>,
}

impl<R: SampleBlockReader + ?Sized> SampleBlockReader for &mut R {
    type Sample = R::Sample;
    type Error = R::Error;

    fn decode_block(&mut self, offset: u64) -> Result<Vec<Self::Sample>, Self::Error> {
        (**self).decode_block(offset)
    }
}
