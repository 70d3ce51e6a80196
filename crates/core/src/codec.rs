//! Codec collaborator interface.
//!
//! The engine never talks to codec hardware directly. It drives instances of
//! [`MediaCodec`] obtained from a [`CodecFactory`], and receives their
//! asynchronous events through a [`CodecEventHandler`] registered per
//! instance. Implementations wrap the platform's codec bindings; the mock
//! codecs in the test modules wrap nothing at all.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::warn;

use crate::error::CodecResult;
use crate::format::MediaFormat;
use crate::sample::{BufferInfo, SampleFlags};

/// Whether a codec is configured as a decoder or an encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigureMode {
    Decode,
    Encode,
}

/// Opaque producer surface handle.
///
/// Created on an encoder and handed to a decoder's `configure` so decoded
/// frames flow to the encoder without a software copy. The engine only moves
/// the handle around; its meaning belongs to the codec collaborator.
#[derive(Clone)]
pub struct Surface(Arc<dyn Any + Send + Sync>);

impl Surface {
    pub fn new(handle: Arc<dyn Any + Send + Sync>) -> Self {
        Self(handle)
    }

    pub fn handle(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.0
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Surface")
    }
}

/// Asynchronous codec events.
///
/// Implementations may be invoked from any thread the codec owns; handlers
/// must not block and must not call back into the codec.
pub trait CodecEventHandler: Send + Sync {
    /// An input buffer at `index` is ready to be filled and queued.
    fn on_input_available(&self, index: usize);

    /// An output buffer at `index` holds data described by `info`.
    fn on_output_available(&self, index: usize, info: BufferInfo);

    /// The codec's output format changed.
    fn on_format_changed(&self, format: MediaFormat);

    /// The codec failed; no further events will be delivered.
    fn on_error(&self, error: crate::error::CodecError);
}

/// One hardware codec instance.
///
/// Methods take `&mut self`; shared instances are serialized through
/// [`CodecHolder`]. Buffer indices follow the platform convention of a small
/// codec-owned pool: a buffer borrowed through an event must be returned
/// exactly once, either by queueing it (input) or releasing it (output).
pub trait MediaCodec: Send {
    fn configure(
        &mut self,
        format: &MediaFormat,
        surface: Option<&Surface>,
        mode: ConfigureMode,
    ) -> CodecResult<()>;

    fn start(&mut self) -> CodecResult<()>;

    fn stop(&mut self) -> CodecResult<()>;

    /// Open a producer surface feeding this codec's input. Encoders only.
    fn create_input_surface(&mut self) -> CodecResult<Surface>;

    fn set_event_handler(&mut self, handler: Arc<dyn CodecEventHandler>);

    /// Borrow the writable input buffer at `index`.
    fn input_buffer(&mut self, index: usize) -> CodecResult<&mut [u8]>;

    fn queue_input_buffer(
        &mut self,
        index: usize,
        offset: usize,
        size: usize,
        presentation_time_us: i64,
        flags: SampleFlags,
    ) -> CodecResult<()>;

    /// Borrow the readable output buffer at `index`.
    fn output_buffer(&mut self, index: usize) -> CodecResult<&[u8]>;

    /// Return the output buffer at `index` to the codec. When `render` is
    /// true the frame is pushed to the configured surface on the way out.
    fn release_output_buffer(&mut self, index: usize, render: bool) -> CodecResult<()>;

    /// Flush the encoder after its surface producer reached end of stream.
    fn signal_end_of_input_stream(&mut self) -> CodecResult<()>;

    fn output_format(&mut self) -> CodecResult<MediaFormat>;
}

/// Creates codec instances by MIME type. `None` means no codec exists for
/// that MIME.
pub trait CodecFactory: Send + Sync {
    fn create_decoder(&self, mime: &str) -> Option<Box<dyn MediaCodec>>;
    fn create_encoder(&self, mime: &str) -> Option<Box<dyn MediaCodec>>;
}

/// Shared owner of a codec instance that can outlive the pipeline.
///
/// Output samples handed to the sink keep the encoder alive through an
/// `Arc<CodecHolder>` so their release path stays valid after the pipeline
/// is gone. The codec is stopped when the last owner drops the holder, and
/// only if it was ever started.
pub struct CodecHolder {
    codec: Mutex<Box<dyn MediaCodec>>,
    started: AtomicBool,
}

impl CodecHolder {
    pub fn new(codec: Box<dyn MediaCodec>) -> Self {
        Self {
            codec: Mutex::new(codec),
            started: AtomicBool::new(false),
        }
    }

    /// Lock the codec for a sequence of calls.
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn MediaCodec>> {
        self.codec.lock()
    }

    /// Record that `start` succeeded, arming the stop on drop.
    pub fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

impl Drop for CodecHolder {
    fn drop(&mut self) {
        if self.started.load(Ordering::Acquire) {
            if let Err(e) = self.codec.get_mut().stop() {
                warn!("stopping retained codec failed: {}", e);
            }
        }
    }
}
