//! Resampler session lifecycle
//!
//! Owns one engine instance together with its open flag and the formats it
//! was configured with, so a closed session can be reopened and replayed.

use bytes::Bytes;

use crate::engine::{EngineEvents, RequestIndex, ResampleEngine};
use crate::error::{ResampleError, Result};
use crate::format::{formats_equal, AudioFormat};

pub struct Session {
    engine: Box<dyn ResampleEngine>,
    events: EngineEvents,
    is_open: bool,
    source_format: Option<AudioFormat>,
    destination_format: AudioFormat,
}

impl Session {
    /// Open `engine` and configure it.
    ///
    /// A missing destination format is rejected before the engine is touched.
    pub fn create(
        engine: Box<dyn ResampleEngine>,
        events: EngineEvents,
        destination_format: Option<AudioFormat>,
        source_format: Option<AudioFormat>,
    ) -> Result<Self> {
        let destination_format = destination_format
            .ok_or_else(|| ResampleError::Config("Needs a destination format".to_string()))?;

        let mut session = Self {
            engine,
            events,
            is_open: false,
            source_format,
            destination_format,
        };
        session.open()?;
        Ok(session)
    }

    fn open(&mut self) -> Result<()> {
        self.engine.open(self.events.clone())?;
        self.is_open = true;

        if let Some(source) = self.source_format.as_ref() {
            self.engine.set_source_format(source)?;
        }
        self.engine.set_destination_format(&self.destination_format)?;

        tracing::debug!(
            source = ?self.source_format,
            destination = %self.destination_format,
            "session opened"
        );
        Ok(())
    }

    /// Reopen after an end-of-stream close. Returns whether a reopen happened.
    pub fn reopen_if_closed(&mut self) -> Result<bool> {
        if self.is_open {
            return Ok(false);
        }
        self.open()?;
        Ok(true)
    }

    pub fn close(&mut self) {
        if !self.is_open {
            return;
        }
        self.is_open = false;
        self.engine.close();
        tracing::debug!("session closed");
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn source_format(&self) -> Option<AudioFormat> {
        self.source_format
    }

    pub fn destination_format(&self) -> AudioFormat {
        self.destination_format
    }

    /// Store `format` and push it to the engine when it differs from the
    /// current source format. Returns whether anything changed.
    ///
    /// While closed the format is only stored; `open` replays it.
    pub fn update_source_format(&mut self, format: Option<AudioFormat>) -> Result<bool> {
        if formats_equal(format.as_ref(), self.source_format.as_ref()) {
            return Ok(false);
        }

        self.source_format = format;
        match format {
            Some(format) if self.is_open => {
                tracing::debug!(%format, "source format changed");
                self.engine.set_source_format(&format)?;
            }
            Some(format) => tracing::debug!(%format, "source format stored for reopen"),
            None => tracing::debug!("source format cleared"),
        }
        Ok(true)
    }

    pub fn feed(&mut self, index: RequestIndex, samples: Bytes) -> Result<()> {
        if !self.is_open {
            return Err(ResampleError::SessionClosed);
        }
        self.engine.feed(index, samples)
    }

    pub fn end(&mut self) -> Result<()> {
        if !self.is_open {
            return Err(ResampleError::SessionClosed);
        }
        self.engine.end()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
