//! Streaming PCM resampler
//!
//! Feeds interleaved audio buffers into FFmpeg's libswresample and emits the
//! converted buffers asynchronously. The conversion itself is entirely the
//! engine's; this crate sequences requests, republishes engine events as
//! stream output and manages the session lifecycle.

pub mod config;
pub mod correlator;
pub mod engine;
pub mod error;
pub mod format;
pub mod pipeline;
pub mod session;
pub mod source;
pub mod stream;

#[cfg(test)]
pub(crate) mod tests;

pub use config::ResampleConfig;
pub use engine::{init, EngineEvent, RequestIndex, ResampleEngine, SwrEngine};
pub use error::{FfmpegError, ResampleError, Result};
pub use format::{formats_equal, AudioFormat, SampleFormat};
pub use source::{PcmSource, RawSource, WavSource};
pub use stream::{Attachment, ResampleOptions, ResampleReader, ResampleStream, ResampleWriter};
