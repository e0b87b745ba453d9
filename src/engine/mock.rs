//! Scriptable in-memory engine for adapter tests

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use super::{EngineEvent, EngineEvents, RequestIndex, ResampleEngine};
use crate::error::{ResampleError, Result};
use crate::format::AudioFormat;

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open,
    Close,
    SourceFormat(AudioFormat),
    DestinationFormat(AudioFormat),
    Feed(RequestIndex, Bytes),
    End,
}

#[derive(Debug, Default)]
struct Inner {
    calls: Vec<Call>,
    events: Option<EngineEvents>,
    auto: bool,
}

/// Engine that records calls. In auto mode every feed is echoed back as its
/// own output and `end` is answered with `StreamEnded`; otherwise tests post
/// events through the handle.
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    inner: Arc<Mutex<Inner>>,
}

impl MockEngine {
    pub fn manual() -> Self {
        Self::default()
    }

    pub fn echo() -> Self {
        let engine = Self::default();
        engine.inner.lock().auto = true;
        engine
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().calls.clone()
    }

    pub fn source_format_calls(&self) -> Vec<AudioFormat> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::SourceFormat(format) => Some(format),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    /// Post an event as if the native side produced it.
    pub fn emit(&self, event: EngineEvent) {
        if let Some(events) = self.inner.lock().events.as_ref() {
            let _ = events.send(event);
        }
    }

    pub fn samples(&self, index: RequestIndex, buffer: &'static [u8]) {
        self.emit(EngineEvent::SamplesProduced {
            index: Some(index),
            buffer: Bytes::from_static(buffer),
        });
    }
}

impl ResampleEngine for MockEngine {
    fn open(&mut self, events: EngineEvents) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.calls.push(Call::Open);
        inner.events = Some(events);
        Ok(())
    }

    fn close(&mut self) {
        let mut inner = self.inner.lock();
        inner.calls.push(Call::Close);
        inner.events = None;
    }

    fn set_source_format(&mut self, format: &AudioFormat) -> Result<()> {
        self.inner.lock().calls.push(Call::SourceFormat(*format));
        Ok(())
    }

    fn set_destination_format(&mut self, format: &AudioFormat) -> Result<()> {
        self.inner.lock().calls.push(Call::DestinationFormat(*format));
        Ok(())
    }

    fn feed(&mut self, index: RequestIndex, samples: Bytes) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.events.is_none() {
            return Err(ResampleError::SessionClosed);
        }
        inner.calls.push(Call::Feed(index, samples.clone()));
        if inner.auto {
            if let Some(events) = inner.events.as_ref() {
                let _ = events.send(EngineEvent::SamplesProduced {
                    index: Some(index),
                    buffer: samples,
                });
            }
        }
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.calls.push(Call::End);
        if inner.auto {
            if let Some(events) = inner.events.as_ref() {
                let _ = events.send(EngineEvent::StreamEnded);
            }
        }
        Ok(())
    }
}
