use thiserror::Error;

use crate::engine::RequestIndex;

/// Main error type for the resampling adapter
#[derive(Error, Debug)]
pub enum ResampleError {
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] FfmpegError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No pending request for completion index {index}")]
    Correlation { index: RequestIndex },

    #[error("Resampler engine error: {0}")]
    Engine(String),

    #[error("Resampler session is closed")]
    SessionClosed,

    #[error("Request abandoned: upstream producer detached")]
    Detached,

    #[error("Resampler stream terminated")]
    Terminated,

    #[error("A flush is already in progress")]
    FlushInProgress,

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("WAV parse error: {0}")]
    Wav(String),
}

/// FFmpeg-specific errors
#[derive(Error, Debug)]
pub enum FfmpegError {
    #[error("FFmpeg initialization failed: {0}")]
    InitFailed(String),

    #[error("Failed to create resampler: {0}")]
    ResamplerCreate(String),

    #[error("Failed to convert samples: {0}")]
    Convert(String),

    #[error("Failed to flush resampler: {0}")]
    Flush(String),

    #[error("Resampler worker unavailable")]
    WorkerGone,
}

impl ResampleError {
    /// Rebuild an equivalent error for fanning one failure out to several
    /// waiters. IO and FFmpeg errors collapse to their rendered message.
    pub(crate) fn replicate(&self) -> ResampleError {
        match self {
            ResampleError::Config(msg) => ResampleError::Config(msg.clone()),
            ResampleError::Correlation { index } => ResampleError::Correlation { index: *index },
            ResampleError::Engine(msg) => ResampleError::Engine(msg.clone()),
            ResampleError::SessionClosed => ResampleError::SessionClosed,
            ResampleError::Detached => ResampleError::Detached,
            ResampleError::Terminated => ResampleError::Terminated,
            ResampleError::FlushInProgress => ResampleError::FlushInProgress,
            ResampleError::UnsupportedFormat(msg) => ResampleError::UnsupportedFormat(msg.clone()),
            ResampleError::Wav(msg) => ResampleError::Wav(msg.clone()),
            other => ResampleError::Engine(other.to_string()),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ResampleError>;
