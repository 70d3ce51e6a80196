use crate::error::TranscodeError;
use crate::sample::SampleFlags;

/// Metadata for the next compressed sample on a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: SampleFlags,
}

/// Source of demuxed compressed samples, one track at a time.
///
/// Implementations wrap the platform demuxer. Sample metadata and payload
/// are fetched in two steps so the caller can size-check the destination
/// buffer before the copy; `read_sample_data` consumes the sample the last
/// `sample_info` call described and advances the track.
pub trait SampleReader: Send {
    /// Estimate the track's bit rate in bits per second.
    fn estimated_bitrate(&mut self, track: usize) -> Result<u32, TranscodeError>;

    /// Metadata for the next sample, or `Ok(None)` once the track is
    /// exhausted.
    fn sample_info(&mut self, track: usize) -> Result<Option<SampleInfo>, TranscodeError>;

    /// Copy the current sample's payload into `dst`, which holds exactly
    /// the size reported by the preceding `sample_info`.
    fn read_sample_data(&mut self, track: usize, dst: &mut [u8]) -> Result<(), TranscodeError>;
}
