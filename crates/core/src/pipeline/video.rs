//! Single-track video transcoding pipeline.
//!
//! Compressed samples are pulled from a [`SampleReader`], decoded onto a
//! producer surface feeding the encoder, and the encoder's output is handed
//! to a [`SampleSink`]. Both codecs deliver their events asynchronously;
//! every event is reified onto a blocking queue and executed serially by the
//! run loop, so all pipeline state is touched from one thread only.

use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, error, info, trace, warn};

use crate::codec::{
    CodecEventHandler, CodecFactory, CodecHolder, ConfigureMode, MediaCodec, Surface,
};
use crate::error::{CodecError, TranscodeError};
use crate::format::{keys, MediaFormat};
use crate::pipeline::PipelineCallback;
use crate::queue::EventQueue;
use crate::reader::SampleReader;
use crate::sample::{BufferInfo, MediaSample, SampleFlags};
use crate::sink::SampleSink;

/// Color format value meaning "input arrives through a surface".
const COLOR_FORMAT_SURFACE: i32 = 0x7f00_0789;
/// Fallback bit rate when neither the request nor the reader supplies one.
const DEFAULT_BITRATE_BPS: i32 = 10_000_000;
/// Default key frame interval in seconds.
const DEFAULT_KEY_FRAME_INTERVAL_SECS: f32 = 1.0;

enum PipelineEvent {
    StartDecoder,
    StartEncoder,
    DecoderInput { index: usize },
    DecoderOutput { index: usize, info: BufferInfo },
    EncoderOutput { index: usize, info: BufferInfo },
    EncoderFormatChanged { format: MediaFormat },
    CodecFailed { error: CodecError },
    Stop,
}

#[derive(Clone, Copy)]
enum CodecRole {
    Decoder,
    Encoder,
}

/// Translates codec callbacks into queued pipeline events. One instance is
/// registered per codec; both feed the same queue.
struct CodecEventDispatch {
    role: CodecRole,
    queue: Arc<EventQueue<PipelineEvent>>,
}

impl CodecEventHandler for CodecEventDispatch {
    fn on_input_available(&self, index: usize) {
        // Encoder input flows through the surface; only decoder input
        // buffers are filled by the pipeline.
        if let CodecRole::Decoder = self.role {
            self.queue.push(PipelineEvent::DecoderInput { index });
        }
    }

    fn on_output_available(&self, index: usize, info: BufferInfo) {
        match self.role {
            CodecRole::Decoder => self.queue.push(PipelineEvent::DecoderOutput { index, info }),
            CodecRole::Encoder => self.queue.push(PipelineEvent::EncoderOutput { index, info }),
        }
    }

    fn on_format_changed(&self, format: MediaFormat) {
        match self.role {
            CodecRole::Decoder => debug!("decoder output format changed: {}", format),
            CodecRole::Encoder => {
                debug!("encoder output format changed: {}", format);
                self.queue.push(PipelineEvent::EncoderFormatChanged { format });
            }
        }
    }

    fn on_error(&self, error: CodecError) {
        error!("codec reported error: {}", error);
        // Errors cut ahead of any backlog of buffer events.
        self.queue.push_front(PipelineEvent::CodecFailed { error });
    }
}

/// Stops a running pipeline from any thread. Requesting a stop any number
/// of times is equivalent to requesting it once.
#[derive(Clone)]
pub struct AbortHandle {
    queue: Arc<EventQueue<PipelineEvent>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.queue.push_front(PipelineEvent::Stop);
    }
}

/// Transcodes one video track end to end.
pub struct VideoTrackPipeline {
    track_index: usize,
    reader: Box<dyn SampleReader>,
    sink: Box<dyn SampleSink>,
    callback: Arc<dyn PipelineCallback>,
    decoder: Box<dyn MediaCodec>,
    /// Shared with every outstanding output sample; the encoder stays alive
    /// until the last sample is released, even after the pipeline is gone.
    encoder: Arc<CodecHolder>,
    /// The decoder renders into this for as long as the pipeline lives.
    _surface: Surface,
    source_format: MediaFormat,
    actual_output_format: Option<MediaFormat>,
    queue: Arc<EventQueue<PipelineEvent>>,
    source_duration_us: i64,
    last_progress: Option<u32>,
    eos_from_source: bool,
    eos_from_encoder: bool,
    stop_requested: bool,
    status: Option<TranscodeError>,
}

impl VideoTrackPipeline {
    /// Build the codec pair for a track and connect them through a producer
    /// surface.
    ///
    /// Missing destination entries are defaulted: bit rate from the
    /// reader's estimate (10 Mbps if that fails) and a one second key frame
    /// interval. The encoder always takes surface input and zero rotation;
    /// the source rotation rides the output track format instead so the
    /// muxer can apply an orientation hint.
    pub fn new(
        source_format: MediaFormat,
        destination_format: MediaFormat,
        track_index: usize,
        mut reader: Box<dyn SampleReader>,
        sink: Box<dyn SampleSink>,
        callback: Arc<dyn PipelineCallback>,
        factory: &dyn CodecFactory,
    ) -> Result<Self, TranscodeError> {
        if destination_format.is_empty() {
            error!("destination format is empty");
            return Err(TranscodeError::InvalidArgument(
                "destination format is empty".into(),
            ));
        }
        let mut encoder_format = destination_format;

        if encoder_format.get_i32(keys::BIT_RATE).is_none() {
            let bitrate = match reader.estimated_bitrate(track_index) {
                Ok(estimate) => estimate as i32,
                Err(e) => {
                    error!(
                        "unable to estimate bitrate, using default {}: {}",
                        DEFAULT_BITRATE_BPS, e
                    );
                    DEFAULT_BITRATE_BPS
                }
            };
            info!("configuring bitrate {}", bitrate);
            encoder_format.set_i32(keys::BIT_RATE, bitrate);
        }
        if encoder_format.get_f32(keys::I_FRAME_INTERVAL).is_none() {
            encoder_format.set_f32(keys::I_FRAME_INTERVAL, DEFAULT_KEY_FRAME_INTERVAL_SECS);
        }
        encoder_format.set_i32(keys::COLOR_FORMAT, COLOR_FORMAT_SURFACE);
        encoder_format.set_i32(keys::ROTATION, 0);

        let Some(destination_mime) = encoder_format.mime().map(str::to_owned) else {
            error!("destination MIME type is required for transcoding");
            return Err(TranscodeError::InvalidArgument(
                "destination format has no MIME type".into(),
            ));
        };
        let mut encoder = factory.create_encoder(&destination_mime).ok_or_else(|| {
            error!("unable to create encoder for {}", destination_mime);
            TranscodeError::Unsupported(destination_mime.clone())
        })?;
        encoder
            .configure(&encoder_format, None, ConfigureMode::Encode)
            .map_err(|e| {
                error!("unable to configure video encoder: {}", e);
                TranscodeError::from(e)
            })?;
        let surface = encoder.create_input_surface().map_err(|e| {
            error!("unable to create an encoder input surface: {}", e);
            TranscodeError::from(e)
        })?;

        let Some(source_mime) = source_format.mime().map(str::to_owned) else {
            error!("source MIME type is required for transcoding");
            return Err(TranscodeError::InvalidArgument(
                "source format has no MIME type".into(),
            ));
        };
        let mut decoder = factory.create_decoder(&source_mime).ok_or_else(|| {
            error!("unable to create decoder for {}", source_mime);
            TranscodeError::Unsupported(source_mime.clone())
        })?;

        let mut decoder_format = source_format.clone();
        // The decoder must not overwrite frames the encoder has not yet
        // consumed from the surface.
        decoder_format.set_i32(keys::ALLOW_FRAME_DROP, 0);
        // Both codecs share the caller's throughput goals.
        decoder_format.copy_entry(&encoder_format, keys::OPERATING_RATE);
        decoder_format.copy_entry(&encoder_format, keys::PRIORITY);
        decoder
            .configure(&decoder_format, Some(&surface), ConfigureMode::Decode)
            .map_err(|e| {
                error!("unable to configure video decoder: {}", e);
                TranscodeError::from(e)
            })?;

        let queue = Arc::new(EventQueue::new());
        decoder.set_event_handler(Arc::new(CodecEventDispatch {
            role: CodecRole::Decoder,
            queue: queue.clone(),
        }));
        encoder.set_event_handler(Arc::new(CodecEventDispatch {
            role: CodecRole::Encoder,
            queue: queue.clone(),
        }));

        let source_duration_us = source_format.get_i64(keys::DURATION).unwrap_or(0);

        Ok(Self {
            track_index,
            reader,
            sink,
            callback,
            decoder,
            encoder: Arc::new(CodecHolder::new(encoder)),
            _surface: surface,
            source_format,
            actual_output_format: None,
            queue,
            source_duration_us,
            last_progress: None,
            eos_from_source: false,
            eos_from_encoder: false,
            stop_requested: false,
            status: None,
        })
    }

    /// Handle for stopping the pipeline once it runs.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            queue: self.queue.clone(),
        }
    }

    /// Run on a dedicated named thread and return the join handle together
    /// with an abort handle. The embedder that owns the codec bindings is
    /// expected to elevate the thread to the platform's video priority.
    pub fn spawn(
        self,
    ) -> std::io::Result<(AbortHandle, JoinHandle<Result<(), TranscodeError>>)> {
        let abort = self.abort_handle();
        let thread = std::thread::Builder::new()
            .name(format!("transcode:video:{}", self.track_index))
            .spawn(move || self.run())?;
        Ok((abort, thread))
    }

    /// Drive the pipeline until end of stream, a stop request or an error.
    ///
    /// Returns the latched status: `Ok` on a clean end of stream,
    /// [`TranscodeError::Cancelled`] when stopped early without another
    /// recorded error. The completion callback fires before returning.
    pub fn run(mut self) -> Result<(), TranscodeError> {
        // Codec starts go through the queue so a stop that arrived before
        // the loop cancels them without spinning the codecs up at all.
        self.queue.push(PipelineEvent::StartDecoder);
        self.queue.push(PipelineEvent::StartEncoder);

        while !self.stop_requested && !self.eos_from_encoder && self.status.is_none() {
            let event = self.queue.pop();
            self.handle_event(event);
        }

        self.queue.abort();
        if let Err(e) = self.decoder.stop() {
            warn!("stopping decoder failed: {}", e);
        }

        let result = match self.status.take() {
            Some(error) => Err(error),
            None if self.stop_requested && !self.eos_from_encoder => {
                Err(TranscodeError::Cancelled)
            }
            None => Ok(()),
        };
        match &result {
            Ok(()) => {
                debug!("track {} transcode finished", self.track_index);
                self.callback.on_finished(self.track_index);
            }
            Err(error) => {
                error!("track {} transcode failed: {}", self.track_index, error);
                self.callback.on_error(self.track_index, error.clone());
            }
        }
        result
    }

    fn handle_event(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::StartDecoder => {
                if let Err(e) = self.decoder.start() {
                    error!("unable to start video decoder: {}", e);
                    self.latch_error(e.into());
                }
            }
            PipelineEvent::StartEncoder => {
                let result = self.encoder.lock().start();
                match result {
                    Ok(()) => self.encoder.mark_started(),
                    Err(e) => {
                        error!("unable to start video encoder: {}", e);
                        self.latch_error(e.into());
                    }
                }
            }
            PipelineEvent::DecoderInput { index } => {
                if let Err(e) = self.enqueue_input_sample(index) {
                    self.latch_error(e);
                }
            }
            PipelineEvent::DecoderOutput { index, info } => {
                if let Err(e) = self.transfer_buffer(index, info) {
                    self.latch_error(e);
                }
            }
            PipelineEvent::EncoderOutput { index, info } => {
                self.dequeue_output_sample(index, info);
            }
            PipelineEvent::EncoderFormatChanged { format } => self.update_track_format(format),
            PipelineEvent::CodecFailed { error } => {
                self.latch_error(error.into());
                self.stop_requested = true;
            }
            PipelineEvent::Stop => self.stop_requested = true,
        }
    }

    fn latch_error(&mut self, error: TranscodeError) {
        if self.status.is_none() {
            self.status = Some(error);
        }
    }

    /// Fill the decoder input buffer at `index` with the next compressed
    /// sample, or queue an empty end-of-stream buffer once the reader is
    /// exhausted.
    fn enqueue_input_sample(&mut self, index: usize) -> Result<(), TranscodeError> {
        if self.eos_from_source {
            return Ok(());
        }

        let info = self.reader.sample_info(self.track_index).map_err(|e| {
            error!("error getting next sample info: {}", e);
            e
        })?;

        match info {
            Some(sample) => {
                let buffer = self.decoder.input_buffer(index).map_err(|e| {
                    error!("decoder returned no input buffer: {}", e);
                    TranscodeError::from(e)
                })?;
                if buffer.len() < sample.size {
                    error!("decoder input buffer is smaller than the sample");
                    return Err(TranscodeError::InvalidArgument(format!(
                        "sample of {} bytes does not fit input buffer of {}",
                        sample.size,
                        buffer.len()
                    )));
                }
                self.reader
                    .read_sample_data(self.track_index, &mut buffer[..sample.size])
                    .map_err(|e| {
                        error!("unable to read next sample data, aborting transcode");
                        e
                    })?;
                self.decoder.queue_input_buffer(
                    index,
                    0,
                    sample.size,
                    sample.presentation_time_us,
                    sample.flags,
                )?;
                self.report_progress(sample.presentation_time_us);
            }
            None => {
                debug!("EOS from source");
                self.eos_from_source = true;
                self.decoder
                    .queue_input_buffer(index, 0, 0, 0, SampleFlags::END_OF_STREAM)?;
            }
        }
        Ok(())
    }

    /// Return a decoder output buffer, rendering it to the surface when it
    /// carries payload, and forward end of stream to the encoder.
    fn transfer_buffer(&mut self, index: usize, info: BufferInfo) -> Result<(), TranscodeError> {
        let render = info.size > 0;
        self.decoder.release_output_buffer(index, render)?;

        if info.flags.contains(SampleFlags::END_OF_STREAM) {
            debug!("EOS from decoder");
            self.encoder
                .lock()
                .signal_end_of_input_stream()
                .map_err(|e| {
                    error!("signalling end of input stream on encoder failed: {}", e);
                    TranscodeError::from(e)
                })?;
        }
        Ok(())
    }

    /// Wrap an encoder output buffer into a sample and hand it to the sink.
    fn dequeue_output_sample(&mut self, index: usize, info: BufferInfo) {
        trace!(
            "encoder output: index {}, pts {}, size {}, flags {:?}",
            index,
            info.presentation_time_us,
            info.size,
            info.flags
        );
        let sample = MediaSample::new(self.encoder.clone(), index, info);
        self.sink.on_sample_available(sample);

        if info.flags.contains(SampleFlags::END_OF_STREAM) {
            debug!("EOS from encoder");
            self.eos_from_encoder = true;
        }
    }

    /// Publish the actual output format once, based on the encoder's format
    /// overlaid with container-level entries from the source track.
    fn update_track_format(&mut self, encoder_format: MediaFormat) {
        if self.actual_output_format.is_some() {
            warn!("ignoring duplicate encoder format change");
            return;
        }

        // The encoder format carries the codec specific data the muxer
        // needs; geometry and timing still come from the source container.
        let mut actual = encoder_format;

        let sar_width = self.source_format.get_i32(keys::SAR_WIDTH);
        let sar_height = self.source_format.get_i32(keys::SAR_HEIGHT);
        if let (Some(w), Some(h)) = (sar_width, sar_height) {
            if w > 0 && h > 0 {
                actual.set_i32(keys::SAR_WIDTH, w);
                actual.set_i32(keys::SAR_HEIGHT, h);
            }
        }
        let display_width = self.source_format.get_i32(keys::DISPLAY_WIDTH);
        let display_height = self.source_format.get_i32(keys::DISPLAY_HEIGHT);
        if let (Some(w), Some(h)) = (display_width, display_height) {
            if w > 0 && h > 0 {
                actual.set_i32(keys::DISPLAY_WIDTH, w);
                actual.set_i32(keys::DISPLAY_HEIGHT, h);
            }
        }
        if let Some(rotation) = self.source_format.get_i32(keys::ROTATION) {
            if rotation != 0 {
                actual.set_i32(keys::ROTATION, rotation);
            }
        }
        if let Some(duration) = self.source_format.get_i64(keys::DURATION) {
            if duration > 0 {
                actual.set_i64(keys::DURATION, duration);
            }
        }

        debug!("track {} output format: {}", self.track_index, actual);
        self.sink.on_track_format_available(&actual);
        self.actual_output_format = Some(actual);
    }

    fn report_progress(&mut self, presentation_time_us: i64) {
        if self.source_duration_us <= 0 {
            return;
        }
        let percent = (presentation_time_us
            .max(0)
            .saturating_mul(100)
            / self.source_duration_us)
            .min(100) as u32;
        if self.last_progress != Some(percent) {
            self.last_progress = Some(percent);
            self.callback.on_progress(self.track_index, percent);
        }
    }
}
