//! PCM format description shared by the adapter and the engine
//!
//! Only interleaved (packed) sample layouts are described here; the engine
//! maps them onto FFmpeg sample formats and channel layouts.

use std::fmt;
use std::str::FromStr;

use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::{Sample, Type};
use serde::{Deserialize, Serialize};

use crate::error::{ResampleError, Result};

/// Interleaved PCM sample encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    Flt,
    Dbl,
}

impl SampleFormat {
    /// Size of one sample of one channel in bytes.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16 => 2,
            SampleFormat::S32 | SampleFormat::Flt => 4,
            SampleFormat::Dbl => 8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::S16 => "s16",
            SampleFormat::S32 => "s32",
            SampleFormat::Flt => "flt",
            SampleFormat::Dbl => "dbl",
        }
    }

    /// The packed FFmpeg sample format with the same encoding.
    pub fn to_ffmpeg(self) -> Sample {
        match self {
            SampleFormat::U8 => Sample::U8(Type::Packed),
            SampleFormat::S16 => Sample::I16(Type::Packed),
            SampleFormat::S32 => Sample::I32(Type::Packed),
            SampleFormat::Flt => Sample::F32(Type::Packed),
            SampleFormat::Dbl => Sample::F64(Type::Packed),
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SampleFormat {
    type Err = ResampleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "u8" => Ok(SampleFormat::U8),
            "s16" => Ok(SampleFormat::S16),
            "s32" => Ok(SampleFormat::S32),
            "flt" => Ok(SampleFormat::Flt),
            "dbl" => Ok(SampleFormat::Dbl),
            other => Err(ResampleError::UnsupportedFormat(format!(
                "unknown sample format '{}'",
                other
            ))),
        }
    }
}

/// Sample encoding, rate and channel count of a PCM byte stream.
///
/// Two formats are equal only when all three fields match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub format: SampleFormat,
    pub rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(format: SampleFormat, rate: u32, channels: u16) -> Self {
        Self {
            format,
            rate,
            channels,
        }
    }

    /// Bytes occupied by one frame (one sample for every channel).
    pub fn frame_size(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }

    /// Number of whole frames in `bytes` bytes of interleaved data.
    pub fn frames_in(&self, bytes: usize) -> usize {
        match self.frame_size() {
            0 => 0,
            size => bytes / size,
        }
    }

    /// FFmpeg channel layout for this channel count. Only mono and stereo
    /// are supported.
    pub fn channel_layout(&self) -> Result<ChannelLayout> {
        match self.channels {
            1 => Ok(ChannelLayout::MONO),
            2 => Ok(ChannelLayout::STEREO),
            n => Err(ResampleError::UnsupportedFormat(format!(
                "{} channels (only mono and stereo are supported)",
                n
            ))),
        }
    }

    /// Check that the format can be handed to the engine.
    pub fn validate(&self) -> Result<()> {
        if self.rate == 0 {
            return Err(ResampleError::UnsupportedFormat(
                "sample rate must be non-zero".to_string(),
            ));
        }
        self.channel_layout()?;
        Ok(())
    }

    /// Parse the JSON object form, e.g. `{"format":"s16","rate":44100,"channels":2}`.
    pub fn from_json(s: &str) -> Result<Self> {
        let format: AudioFormat = serde_json::from_str(s)
            .map_err(|e| ResampleError::Config(format!("invalid audio format '{}': {}", s, e)))?;
        format.validate()?;
        Ok(format)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}Hz {}ch", self.format, self.rate, self.channels)
    }
}

/// Structural format comparison where both sides may be unset.
///
/// Both absent compares equal; one absent never does.
pub fn formats_equal(a: Option<&AudioFormat>, b: Option<&AudioFormat>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
