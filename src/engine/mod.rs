//! Native resampling engine
//!
//! This module handles:
//! - The operation set the adapter needs from a resampler (`ResampleEngine`)
//! - The typed events an engine reports back (`EngineEvent`)
//! - FFmpeg initialization
//! - The libswresample-backed engine (`SwrEngine`)

mod helpers;
#[cfg(test)]
pub(crate) mod mock;
pub mod swr;

use bytes::Bytes;
use ffmpeg_next as ffmpeg;
use tokio::sync::mpsc;

use crate::error::{FfmpegError, Result};
use crate::format::AudioFormat;

pub use swr::SwrEngine;

/// Per-session identifier of one `feed` call.
pub type RequestIndex = u64;

/// Sending half of an engine's event channel.
pub type EngineEvents = mpsc::UnboundedSender<EngineEvent>;

/// Everything an engine reports back to the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Converted output. `index` names the feed this answers; `None` marks
    /// drain output produced while ending or reconfiguring.
    SamplesProduced {
        index: Option<RequestIndex>,
        buffer: Bytes,
    },
    /// All fed data has been converted after `end`.
    StreamEnded,
    /// The engine failed; the session is unusable.
    EngineError { message: String },
}

/// Operations the adapter issues against one resampler session.
///
/// Creating the session is the implementor's constructor. Calls never block
/// on conversion work: results arrive later on the `EngineEvents` channel
/// handed to `open`.
pub trait ResampleEngine: Send + 'static {
    /// Start the session; events are posted to `events` until `close`.
    fn open(&mut self, events: EngineEvents) -> Result<()>;

    /// Stop the session and release native resources.
    fn close(&mut self);

    fn set_source_format(&mut self, format: &AudioFormat) -> Result<()>;

    fn set_destination_format(&mut self, format: &AudioFormat) -> Result<()>;

    /// Submit interleaved samples. Every call is answered by exactly one
    /// `SamplesProduced` carrying `Some(index)`, possibly with an empty buffer.
    fn feed(&mut self, index: RequestIndex, samples: Bytes) -> Result<()>;

    /// No more input follows: drain buffered samples, then report `StreamEnded`.
    fn end(&mut self) -> Result<()>;
}

/// Initialize FFmpeg library
///
/// This should be called once at application startup.
/// Returns an error if FFmpeg fails to initialize.
pub fn init() -> std::result::Result<(), FfmpegError> {
    ffmpeg::init().map_err(|e| FfmpegError::InitFailed(format!("ffmpeg::init() failed: {}", e)))?;

    // Keep libswresample quiet unless something is actually wrong.
    ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Warning);

    tracing::info!("FFmpeg initialized");

    Ok(())
}
