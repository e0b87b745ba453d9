//! libswresample-backed engine
//!
//! Conversion runs on a dedicated worker thread that owns the `SwrContext`.
//! Calls on `SwrEngine` only enqueue commands; results come back as
//! `EngineEvent`s in the order the worker produces them.

use std::thread;

use bytes::{Bytes, BytesMut};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::software::resampling;
use tokio::sync::mpsc;

use super::helpers;
use super::{EngineEvent, EngineEvents, RequestIndex, ResampleEngine};
use crate::error::{FfmpegError, ResampleError, Result};
use crate::format::AudioFormat;

#[derive(Debug)]
enum Command {
    SourceFormat(AudioFormat),
    DestinationFormat(AudioFormat),
    Samples { index: RequestIndex, data: Bytes },
    End,
    Stop,
}

/// Resampler session backed by FFmpeg's `SwrContext`
#[derive(Debug, Default)]
pub struct SwrEngine {
    commands: Option<mpsc::UnboundedSender<Command>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl SwrEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn send(&self, command: Command) -> Result<()> {
        let commands = self.commands.as_ref().ok_or(ResampleError::SessionClosed)?;
        commands
            .send(command)
            .map_err(|_| ResampleError::Ffmpeg(FfmpegError::WorkerGone))
    }
}

impl ResampleEngine for SwrEngine {
    fn open(&mut self, events: EngineEvents) -> Result<()> {
        if self.commands.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = thread::Builder::new()
            .name("swresample".to_string())
            .spawn(move || Worker::new(events).run(rx))?;

        self.commands = Some(tx);
        self.worker = Some(worker);
        tracing::debug!("swresample worker started");
        Ok(())
    }

    fn close(&mut self) {
        if let Some(commands) = self.commands.take() {
            // The worker finishes whatever is queued ahead of Stop, then exits.
            let _ = commands.send(Command::Stop);
        }
        if let Some(worker) = self.worker.take() {
            if worker.is_finished() {
                let _ = worker.join();
            }
        }
    }

    fn set_source_format(&mut self, format: &AudioFormat) -> Result<()> {
        self.send(Command::SourceFormat(*format))
    }

    fn set_destination_format(&mut self, format: &AudioFormat) -> Result<()> {
        self.send(Command::DestinationFormat(*format))
    }

    fn feed(&mut self, index: RequestIndex, samples: Bytes) -> Result<()> {
        self.send(Command::Samples {
            index,
            data: samples,
        })
    }

    fn end(&mut self) -> Result<()> {
        self.send(Command::End)
    }
}

impl Drop for SwrEngine {
    fn drop(&mut self) {
        self.close();
    }
}

struct Converter {
    context: resampling::Context,
    source: AudioFormat,
    destination: AudioFormat,
}

impl Converter {
    fn new(source: AudioFormat, destination: AudioFormat) -> Result<Self> {
        let context = resampling::Context::get(
            source.format.to_ffmpeg(),
            source.channel_layout()?,
            source.rate,
            destination.format.to_ffmpeg(),
            destination.channel_layout()?,
            destination.rate,
        )
        .map_err(|e| FfmpegError::ResamplerCreate(e.to_string()))?;

        Ok(Self {
            context,
            source,
            destination,
        })
    }

    /// Output frame sized for everything `input_samples` more input can yield.
    fn output_frame(&mut self, input_samples: usize) -> Result<ffmpeg::util::frame::Audio> {
        let capacity = unsafe {
            ffmpeg::ffi::swr_get_out_samples(self.context.as_mut_ptr(), input_samples as i32)
        };
        let mut out = ffmpeg::util::frame::Audio::new(
            self.destination.format.to_ffmpeg(),
            capacity.max(1) as usize,
            self.destination.channel_layout()?,
        );
        out.set_rate(self.destination.rate);
        Ok(out)
    }

    fn convert(&mut self, data: &[u8]) -> Result<Bytes> {
        let input = helpers::input_frame(&self.source, data)?;
        let mut out = self.output_frame(input.samples())?;

        self.context
            .run(&input, &mut out)
            .map_err(|e| FfmpegError::Convert(e.to_string()))?;

        if out.samples() == 0 {
            return Ok(Bytes::new());
        }
        Ok(helpers::output_bytes(&out, &self.destination))
    }

    /// Pull the samples still held back by the filter delay.
    fn drain(&mut self) -> Result<Bytes> {
        let mut out = self.output_frame(0)?;

        if let Err(e) = self.context.flush(&mut out) {
            // Passthrough contexts and empty delay lines report an error here.
            tracing::debug!("Resampler flush returned non-fatal error: {}", e);
            return Ok(Bytes::new());
        }

        if out.samples() == 0 {
            return Ok(Bytes::new());
        }
        Ok(helpers::output_bytes(&out, &self.destination))
    }
}

struct Worker {
    events: EngineEvents,
    source: Option<AudioFormat>,
    destination: Option<AudioFormat>,
    converter: Option<Converter>,
    /// Trailing bytes of a partial frame, completed by the next chunk.
    partial: BytesMut,
}

impl Worker {
    fn new(events: EngineEvents) -> Self {
        Self {
            events,
            source: None,
            destination: None,
            converter: None,
            partial: BytesMut::new(),
        }
    }

    fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.blocking_recv() {
            match command {
                Command::Stop => break,
                Command::SourceFormat(format) => {
                    if let Err(e) = format.validate() {
                        self.fail(format!("Unable to set source format: {}", e));
                        continue;
                    }
                    if self.source != Some(format) && !self.partial.is_empty() {
                        tracing::debug!(
                            bytes = self.partial.len(),
                            "dropping partial frame on source format change"
                        );
                        self.partial.clear();
                    }
                    self.source = Some(format);
                    self.recreate();
                }
                Command::DestinationFormat(format) => {
                    if let Err(e) = format.validate() {
                        self.fail(format!("Unable to set destination format: {}", e));
                        continue;
                    }
                    self.destination = Some(format);
                    self.recreate();
                }
                Command::Samples { index, data } => match self.convert(&data) {
                    Ok(buffer) => {
                        tracing::trace!(index, input = data.len(), output = buffer.len(), "converted");
                        self.emit(EngineEvent::SamplesProduced {
                            index: Some(index),
                            buffer,
                        });
                    }
                    Err(e) => {
                        self.converter = None;
                        self.fail(format!("Unable to convert samples: {}", e));
                    }
                },
                Command::End => {
                    self.drain_converter();
                    self.partial.clear();
                    self.emit(EngineEvent::StreamEnded);
                }
            }
        }
        tracing::debug!("swresample worker stopped");
    }

    /// Rebuild the converter once both formats are known. The tail of the
    /// previous converter is emitted first.
    fn recreate(&mut self) {
        let (Some(source), Some(destination)) = (self.source, self.destination) else {
            return;
        };

        self.drain_converter();
        self.converter = None;

        match Converter::new(source, destination) {
            Ok(converter) => {
                tracing::debug!(%source, %destination, "resampler configured");
                self.converter = Some(converter);
            }
            Err(e) => self.fail(format!("Unable to initialize resampler: {}", e)),
        }
    }

    fn convert(&mut self, data: &[u8]) -> Result<Bytes> {
        let Some(converter) = self.converter.as_mut() else {
            tracing::warn!(bytes = data.len(), "no source format configured; dropping samples");
            return Ok(Bytes::new());
        };

        self.partial.extend_from_slice(data);
        let frame_size = converter.source.frame_size();
        let whole = (self.partial.len() / frame_size) * frame_size;
        if whole == 0 {
            return Ok(Bytes::new());
        }

        let input = self.partial.split_to(whole);
        converter.convert(&input)
    }

    fn drain_converter(&mut self) {
        let Some(converter) = self.converter.as_mut() else {
            return;
        };
        match converter.drain() {
            Ok(buffer) if !buffer.is_empty() => {
                self.emit(EngineEvent::SamplesProduced {
                    index: None,
                    buffer,
                });
            }
            Ok(_) => {}
            Err(e) => self.fail(format!("Unable to drain resampler: {}", e)),
        }
    }

    fn fail(&self, message: String) {
        tracing::error!("{}", message);
        self.emit(EngineEvent::EngineError { message });
    }

    fn emit(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleFormat;

    fn s16(rate: u32, channels: u16) -> AudioFormat {
        AudioFormat::new(SampleFormat::S16, rate, channels)
    }

    #[test]
    fn test_send_before_open_is_closed() {
        let mut engine = SwrEngine::new();
        let err = engine.feed(0, Bytes::from_static(&[0, 0])).unwrap_err();
        assert!(matches!(err, ResampleError::SessionClosed));
    }

    #[test]
    fn test_feed_without_formats_answers_empty() {
        crate::engine::init().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut engine = SwrEngine::new();
        engine.open(tx).unwrap();
        engine.feed(0, Bytes::from(vec![0u8; 64])).unwrap();

        let event = rx.blocking_recv().unwrap();
        assert_eq!(
            event,
            EngineEvent::SamplesProduced {
                index: Some(0),
                buffer: Bytes::new()
            }
        );
        engine.close();
    }

    #[test]
    fn test_invalid_destination_reports_error() {
        crate::engine::init().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut engine = SwrEngine::new();
        engine.open(tx).unwrap();
        engine.set_destination_format(&s16(8000, 6)).unwrap();

        match rx.blocking_recv().unwrap() {
            EngineEvent::EngineError { message } => {
                assert!(message.starts_with("Unable to set destination format"))
            }
            other => panic!("unexpected event {:?}", other),
        }
        engine.close();
    }

    #[test]
    fn test_partial_frames_carry_over() {
        crate::engine::init().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut engine = SwrEngine::new();
        engine.open(tx).unwrap();
        engine.set_source_format(&s16(8000, 2)).unwrap();
        engine.set_destination_format(&s16(8000, 2)).unwrap();

        // 3 bytes: less than one stereo s16 frame
        engine.feed(0, Bytes::from(vec![1u8; 3])).unwrap();
        // completes the first frame and adds 99 more
        engine.feed(1, Bytes::from(vec![1u8; 397])).unwrap();
        engine.end().unwrap();

        let mut total = 0;
        loop {
            match rx.blocking_recv().unwrap() {
                EngineEvent::SamplesProduced { index, buffer } => {
                    if index == Some(0) {
                        assert!(buffer.is_empty());
                    }
                    total += buffer.len();
                }
                EngineEvent::StreamEnded => break,
                EngineEvent::EngineError { message } => panic!("{}", message),
            }
        }
        assert_eq!(total, 400);
        engine.close();
    }
}
