//! Core orchestration engine of the mediamill transcoding service.
//!
//! Two subsystems make up the engine: the [`scheduler`] keeps a population
//! of transcoding sessions in priority order and drives exactly one of them
//! at a time, and the [`pipeline`] transcodes a single video track through
//! an asynchronous decoder/encoder pair bridged by a producer surface.
//! Codec hardware, demuxing, muxing and the client RPC surface are external
//! collaborators injected through the traits in [`codec`], [`reader`],
//! [`sink`] and [`scheduler`].

pub mod codec;
pub mod error;
pub mod format;
pub mod pipeline;
pub mod queue;
pub mod reader;
pub mod sample;
pub mod scheduler;
pub mod session;
pub mod sink;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{CodecError, TranscodeError};
