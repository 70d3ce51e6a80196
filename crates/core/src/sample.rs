//! Media samples and the buffer metadata that travels with them.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use tracing::warn;

use crate::codec::CodecHolder;
use crate::error::CodecResult;

bitflags! {
    /// Buffer flags carried bit-compatible with the platform codec API.
    /// Serde impls come with the `serde` feature of `bitflags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SampleFlags: u32 {
        /// The buffer holds codec-specific data, not media payload.
        const CODEC_CONFIG = 1 << 1;
        /// The last buffer of the stream.
        const END_OF_STREAM = 1 << 2;
        /// The buffer holds a partial frame; the next buffer continues it.
        const PARTIAL_FRAME = 1 << 3;
    }
}

/// Describes the payload of one codec output buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferInfo {
    pub offset: usize,
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: SampleFlags,
}

/// One encoded sample borrowed from a codec's output buffer pool.
///
/// The sample keeps its codec alive through a shared [`CodecHolder`] and
/// returns the buffer to the codec exactly once, when the sample is dropped.
/// Consumers therefore control how long the codec's buffer (and the codec
/// itself) stays pinned simply by holding on to the sample.
pub struct MediaSample {
    holder: Arc<CodecHolder>,
    buffer_index: usize,
    pub info: BufferInfo,
}

impl MediaSample {
    pub(crate) fn new(holder: Arc<CodecHolder>, buffer_index: usize, info: BufferInfo) -> Self {
        Self {
            holder,
            buffer_index,
            info,
        }
    }

    pub fn buffer_index(&self) -> usize {
        self.buffer_index
    }

    pub fn presentation_time_us(&self) -> i64 {
        self.info.presentation_time_us
    }

    pub fn flags(&self) -> SampleFlags {
        self.info.flags
    }

    /// Run `f` over the sample payload.
    ///
    /// The bytes live in the codec-owned buffer; the borrow is scoped to the
    /// closure and serialized against other users of the codec.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> CodecResult<R> {
        let mut codec = self.holder.lock();
        let buffer = codec.output_buffer(self.buffer_index)?;
        let end = self.info.offset + self.info.size;
        Ok(f(&buffer[self.info.offset..end]))
    }
}

impl Drop for MediaSample {
    fn drop(&mut self) {
        // Return the buffer without rendering; encoded output never targets
        // a surface.
        let mut codec = self.holder.lock();
        if let Err(e) = codec.release_output_buffer(self.buffer_index, false) {
            warn!(
                "releasing output buffer {} back to codec failed: {}",
                self.buffer_index, e
            );
        }
    }
}

impl fmt::Debug for MediaSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaSample")
            .field("buffer_index", &self.buffer_index)
            .field("info", &self.info)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_bit_compatible() {
        assert_eq!(SampleFlags::CODEC_CONFIG.bits(), 2);
        assert_eq!(SampleFlags::END_OF_STREAM.bits(), 4);
        assert_eq!(SampleFlags::PARTIAL_FRAME.bits(), 8);

        let flags = SampleFlags::CODEC_CONFIG | SampleFlags::END_OF_STREAM;
        assert!(flags.contains(SampleFlags::END_OF_STREAM));
        assert!(!flags.contains(SampleFlags::PARTIAL_FRAME));
    }
}
