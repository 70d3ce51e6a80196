use crate::format::MediaFormat;
use crate::sample::MediaSample;

/// Consumer of encoded output, typically a muxer track writer.
pub trait SampleSink: Send {
    /// Delivered once, after the encoder's first format change. The format
    /// combines the encoder's codec-specific data with container-level
    /// geometry and timing from the source track.
    fn on_track_format_available(&mut self, format: &MediaFormat);

    /// Delivered in encoder-output order. Dropping the sample returns its
    /// buffer to the encoder; sinks that queue samples keep the encoder
    /// alive until they drain.
    fn on_sample_available(&mut self, sample: MediaSample);
}
