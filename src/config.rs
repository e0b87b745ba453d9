//! Resampler configuration
//!
//! Loaded from TOML; command-line flags override individual fields.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ResampleError, Result};
use crate::format::AudioFormat;
use crate::stream::ResampleOptions;

/// Stream configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Format of the input; taken from the WAV header when reading WAV
    pub source: Option<AudioFormat>,

    /// Format of the output (required)
    pub destination: Option<AudioFormat>,

    /// Bytes read from the input per write
    pub chunk_size: usize,

    /// Parse the input as RIFF/WAVE instead of raw PCM
    pub wav_input: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            source: None,
            destination: None,
            chunk_size: 4096,
            wav_input: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Output format (pretty, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResampleConfig {
    pub stream: StreamConfig,
    pub logging: LoggingConfig,
}

impl ResampleConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&content).map_err(|e| {
            ResampleError::Config(format!("{}: {}", path.as_ref().display(), e))
        })
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ResampleError::Config(e.to_string()))
    }

    /// Options for constructing the stream.
    pub fn stream_options(&self) -> ResampleOptions {
        ResampleOptions {
            source_format: self.stream.source,
            destination_format: self.stream.destination,
        }
    }

    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub fn log_directive(&self) -> String {
        format!("swresample_stream={}", self.logging.level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleFormat;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ResampleConfig::default();
        assert_eq!(config.stream.chunk_size, 4096);
        assert!(config.stream.destination.is_none());
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.is_json());
    }

    #[test]
    fn test_parse_partial_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(
            temp_file,
            r#"
[stream]
destination = {{ format = "s16", rate = 8000, channels = 1 }}

[logging]
format = "json"
"#
        )
        .unwrap();

        let config = ResampleConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(
            config.stream.destination,
            Some(AudioFormat::new(SampleFormat::S16, 8000, 1))
        );
        assert_eq!(config.stream.chunk_size, 4096);
        assert!(config.logging.is_json());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_file_roundtrip() {
        let mut config = ResampleConfig::default();
        config.stream.source = Some(AudioFormat::new(SampleFormat::S16, 44100, 2));
        config.stream.destination = Some(AudioFormat::new(SampleFormat::Flt, 48000, 2));

        let temp_file = NamedTempFile::new().unwrap();
        config.to_file(temp_file.path()).unwrap();

        let loaded = ResampleConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_bad_sample_format_rejected() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(
            temp_file,
            "[stream]\nsource = {{ format = \"s24\", rate = 44100, channels = 2 }}\n"
        )
        .unwrap();
        assert!(matches!(
            ResampleConfig::from_file(temp_file.path()),
            Err(ResampleError::Config(_))
        ));
    }

    #[test]
    fn test_stream_options() {
        let mut config = ResampleConfig::default();
        config.stream.destination = Some(AudioFormat::new(SampleFormat::S16, 8000, 1));
        let options = config.stream_options();
        assert!(options.source_format.is_none());
        assert_eq!(options.destination_format, config.stream.destination);
        assert_eq!(config.log_directive(), "swresample_stream=info");
    }
}
