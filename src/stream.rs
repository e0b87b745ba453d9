//! Duplex resampling stream
//!
//! `ResampleStream` turns the engine's asynchronous operation set into a
//! transform: the writer half feeds chunks and waits for each one to be
//! converted, the reader half yields converted output. A pump task per
//! stream consumes engine events, forwards output, resolves completions and
//! handles end-of-stream and engine failure.
//!
//! Upstream producers attach with [`ResampleWriter::pipe`], handing over a
//! `watch` channel on which they declare their format. Detaching releases
//! the producer's in-flight writes.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::correlator::Correlator;
use crate::engine::{EngineEvent, ResampleEngine};
use crate::error::{ResampleError, Result};
use crate::format::AudioFormat;
use crate::session::Session;

/// Construction options for a `ResampleStream`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResampleOptions {
    /// Format of the incoming bytes; may instead arrive from an upstream.
    pub source_format: Option<AudioFormat>,
    /// Format of the produced bytes. Required.
    pub destination_format: Option<AudioFormat>,
}

impl ResampleOptions {
    pub fn new(destination_format: AudioFormat) -> Self {
        Self {
            source_format: None,
            destination_format: Some(destination_format),
        }
    }

    pub fn with_source(mut self, source_format: AudioFormat) -> Self {
        self.source_format = Some(source_format);
        self
    }
}

/// What the pump hands to the reader half.
#[derive(Debug)]
enum Emitted {
    Chunk(Bytes),
    End,
    Failed(ResampleError),
}

struct State {
    session: Session,
    correlator: Correlator,
    flush: Option<oneshot::Sender<Result<()>>>,
    /// Terminal error; once set every operation fails with it.
    failure: Option<ResampleError>,
}

struct Shared {
    id: Uuid,
    state: Mutex<State>,
}

impl Shared {
    fn format_changed(&self, format: Option<AudioFormat>) -> Result<bool> {
        if let Some(format) = format.as_ref() {
            format.validate()?;
        }
        let mut state = self.state.lock();
        if let Some(failure) = state.failure.as_ref() {
            return Err(failure.replicate());
        }
        state.session.update_source_format(format)
    }

    fn samples(&self, index: Option<u64>, buffer: Bytes, output: &mpsc::UnboundedSender<Emitted>) {
        let resolved = {
            let mut state = self.state.lock();
            if state.failure.is_some() {
                tracing::debug!(?index, bytes = buffer.len(), "dropping samples after failure");
                return;
            }

            if !buffer.is_empty() {
                let _ = output.send(Emitted::Chunk(buffer));
            }
            match index {
                Some(index) => state.correlator.resolve(index),
                None => Ok(()),
            }
        };

        if let Err(e) = resolved {
            self.terminate(e, output);
        }
    }

    fn ended(&self, output: &mpsc::UnboundedSender<Emitted>) {
        let mut state = self.state.lock();
        if state.failure.is_some() {
            tracing::debug!("ignoring stream end after failure");
            return;
        }

        let orphaned = state.correlator.fail_all(&ResampleError::Terminated);
        if orphaned > 0 {
            tracing::warn!(orphaned, "engine ended with unanswered requests");
        }

        let _ = output.send(Emitted::End);
        match state.flush.take() {
            Some(flush) => {
                let _ = flush.send(Ok(()));
            }
            None => tracing::debug!("engine ended without a pending flush"),
        }

        // The flush completion is already delivered; only now tear down.
        state.session.close();
    }

    fn terminate(&self, error: ResampleError, output: &mpsc::UnboundedSender<Emitted>) {
        let mut state = self.state.lock();
        if let Some(failure) = state.failure.as_ref() {
            tracing::debug!(%failure, "ignoring further error: {}", error);
            return;
        }
        tracing::error!("resampler stream failed: {}", error);

        state.correlator.fail_all(&error);
        if let Some(flush) = state.flush.take() {
            let _ = flush.send(Err(error.replicate()));
        }
        state.session.close();

        let _ = output.send(Emitted::Failed(error.replicate()));
        state.failure = Some(error);
    }
}

async fn pump(
    shared: Arc<Shared>,
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
    output: mpsc::UnboundedSender<Emitted>,
) {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::SamplesProduced { index, buffer } => {
                tracing::trace!(?index, bytes = buffer.len(), "samples");
                shared.samples(index, buffer, &output);
            }
            EngineEvent::StreamEnded => {
                tracing::debug!("engine drained");
                shared.ended(&output);
            }
            EngineEvent::EngineError { message } => {
                shared.terminate(ResampleError::Engine(message), &output);
            }
        }
    }
}

/// Aborts the pump once neither half is alive.
struct PumpGuard(JoinHandle<()>);

impl Drop for PumpGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A registered upstream producer. Dropping it stops format forwarding.
pub struct Attachment {
    listener: JoinHandle<()>,
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Writer half: feeds input, flushes and manages upstream attachment.
#[derive(Clone)]
pub struct ResampleWriter {
    shared: Arc<Shared>,
    _pump: Arc<PumpGuard>,
}

impl ResampleWriter {
    /// Feed one chunk of interleaved source samples.
    ///
    /// Resolves once the engine has converted this chunk, which is the
    /// signal that the next chunk may be written.
    pub async fn write(&self, chunk: Bytes) -> Result<()> {
        let completion = {
            let mut state = self.shared.state.lock();
            if let Some(failure) = state.failure.as_ref() {
                return Err(failure.replicate());
            }

            let (index, completion) = state.correlator.register();
            let len = chunk.len();
            if let Err(e) = state.session.feed(index, chunk) {
                state.correlator.forget(index);
                return Err(e);
            }
            tracing::trace!(index, bytes = len, "fed");
            completion
        };

        completion.await.map_err(|_| ResampleError::Terminated)?
    }

    /// Signal end of input and wait until every buffered sample has been
    /// produced. The session closes afterwards; attaching a new upstream
    /// reopens it.
    pub async fn flush(&self) -> Result<()> {
        let done = {
            let mut state = self.shared.state.lock();
            if let Some(failure) = state.failure.as_ref() {
                return Err(failure.replicate());
            }
            if state.flush.is_some() {
                return Err(ResampleError::FlushInProgress);
            }

            state.session.end()?;
            let (tx, rx) = oneshot::channel();
            state.flush = Some(tx);
            rx
        };

        tracing::debug!("flush requested");
        done.await.map_err(|_| ResampleError::Terminated)?
    }

    /// Attach an upstream producer that declares its format on `formats`.
    ///
    /// Reopens the session if a previous flush closed it. The producer's
    /// current format, when declared, is applied immediately.
    pub fn pipe(&self, mut formats: watch::Receiver<Option<AudioFormat>>) -> Result<Attachment> {
        let current = *formats.borrow_and_update();
        if let Some(format) = current.as_ref() {
            format.validate()?;
        }

        {
            let mut state = self.shared.state.lock();
            if let Some(failure) = state.failure.as_ref() {
                return Err(failure.replicate());
            }
            if state.session.reopen_if_closed()? {
                tracing::debug!("session reopened for new upstream");
            }
            if current.is_some() {
                state.session.update_source_format(current)?;
            }
        }

        let shared = self.shared.clone();
        let span = tracing::debug_span!("upstream", id = %self.shared.id);
        let listener = tokio::spawn(
            async move {
                while formats.changed().await.is_ok() {
                    let format = *formats.borrow_and_update();
                    if let Err(e) = shared.format_changed(format) {
                        tracing::warn!("ignoring upstream format change: {}", e);
                    }
                }
                tracing::debug!("upstream format channel closed");
            }
            .instrument(span),
        );

        Ok(Attachment { listener })
    }

    /// Detach an upstream producer. Writes it still has in flight are
    /// released with `ResampleError::Detached`; returns how many.
    pub fn unpipe(&self, attachment: Attachment) -> usize {
        drop(attachment);

        let abandoned = self
            .shared
            .state
            .lock()
            .correlator
            .abandon_all(&ResampleError::Detached);
        if abandoned > 0 {
            tracing::debug!(abandoned, "released writes of detached upstream");
        }
        abandoned
    }

    /// Apply a format notification without a `watch` channel.
    pub fn format_changed(&self, format: Option<AudioFormat>) -> Result<bool> {
        self.shared.format_changed(format)
    }

    pub fn source_format(&self) -> Option<AudioFormat> {
        self.shared.state.lock().session.source_format()
    }

    pub fn destination_format(&self) -> AudioFormat {
        self.shared.state.lock().session.destination_format()
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.lock().session.is_open()
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }
}

/// Reader half: converted output in engine emission order.
pub struct ResampleReader {
    output: mpsc::UnboundedReceiver<Emitted>,
    _pump: Arc<PumpGuard>,
}

impl ResampleReader {
    /// Next converted chunk. `None` marks the end of a flushed stream; a
    /// reopened session produces further chunks after it.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        match self.output.recv().await? {
            Emitted::Chunk(buffer) => Some(Ok(buffer)),
            Emitted::End => None,
            Emitted::Failed(e) => Some(Err(e)),
        }
    }
}

/// Each flush ends the stream with `None`. A session reopened by a new
/// upstream produces further items after that `None`, so combinators that
/// stop at the first `None` (`collect`, `fuse`) only see one flushed
/// segment; poll again after reattaching to continue.
impl Stream for ResampleReader {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.output.poll_recv(cx) {
            Poll::Ready(Some(Emitted::Chunk(buffer))) => Poll::Ready(Some(Ok(buffer))),
            Poll::Ready(Some(Emitted::Failed(e))) => Poll::Ready(Some(Err(e))),
            Poll::Ready(Some(Emitted::End)) | Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Resampling transform over a `ResampleEngine`
pub struct ResampleStream {
    writer: ResampleWriter,
    reader: ResampleReader,
}

impl ResampleStream {
    /// Create and open a session on `engine`.
    ///
    /// Fails without touching the engine when no destination format is
    /// given. Must be called from within a tokio runtime.
    pub fn new<E: ResampleEngine>(engine: E, options: ResampleOptions) -> Result<Self> {
        for format in options.source_format.iter().chain(options.destination_format.iter()) {
            format.validate()?;
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ResampleError::Config("ResampleStream must be created inside a tokio runtime".to_string())
        })?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = Session::create(
            Box::new(engine),
            events_tx,
            options.destination_format,
            options.source_format,
        )?;

        let id = Uuid::new_v4();
        let shared = Arc::new(Shared {
            id,
            state: Mutex::new(State {
                session,
                correlator: Correlator::new(),
                flush: None,
                failure: None,
            }),
        });

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let span = tracing::debug_span!("resampler", %id);
        let handle = runtime.spawn(pump(shared.clone(), events_rx, output_tx).instrument(span));
        let guard = Arc::new(PumpGuard(handle));

        tracing::debug!(%id, "resample stream created");
        Ok(Self {
            writer: ResampleWriter {
                shared,
                _pump: guard.clone(),
            },
            reader: ResampleReader {
                output: output_rx,
                _pump: guard,
            },
        })
    }

    /// Separate the halves so input and output can be driven concurrently.
    pub fn split(self) -> (ResampleWriter, ResampleReader) {
        (self.writer, self.reader)
    }

    pub fn writer(&self) -> &ResampleWriter {
        &self.writer
    }

    pub async fn write(&self, chunk: Bytes) -> Result<()> {
        self.writer.write(chunk).await
    }

    pub async fn flush(&self) -> Result<()> {
        self.writer.flush().await
    }

    pub async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        self.reader.next_chunk().await
    }

    pub fn pipe(&self, formats: watch::Receiver<Option<AudioFormat>>) -> Result<Attachment> {
        self.writer.pipe(formats)
    }

    pub fn unpipe(&self, attachment: Attachment) -> usize {
        self.writer.unpipe(attachment)
    }

    pub fn source_format(&self) -> Option<AudioFormat> {
        self.writer.source_format()
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_open()
    }
}
