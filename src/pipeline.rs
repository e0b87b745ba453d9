//! Source -> resampler -> sink pipe
//!
//! Drives a `PcmSource` through a `ResampleStream` into an `AsyncWrite`,
//! feeding and draining concurrently on the current task.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::source::PcmSource;
use crate::stream::ResampleStream;

/// Byte counts of a finished pipe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub chunks_in: u64,
    pub chunks_out: u64,
}

/// Pipe `source` through `stream` into `sink` until the source is exhausted
/// and the resampler has been flushed.
pub async fn run<S, W>(mut source: S, mut sink: W, stream: ResampleStream) -> Result<PipelineStats>
where
    S: PcmSource,
    W: AsyncWrite + Unpin,
{
    let (writer, mut reader) = stream.split();
    let attachment = source.formats().map(|formats| writer.pipe(formats)).transpose()?;

    let feed = async {
        let mut bytes_in = 0u64;
        let mut chunks_in = 0u64;
        while let Some(chunk) = source.next_chunk().await? {
            bytes_in += chunk.len() as u64;
            chunks_in += 1;
            writer.write(chunk).await?;
        }
        writer.flush().await?;
        tracing::debug!(bytes_in, chunks_in, "input exhausted and flushed");
        Ok::<_, crate::error::ResampleError>((bytes_in, chunks_in))
    };

    let drain = async {
        let mut bytes_out = 0u64;
        let mut chunks_out = 0u64;
        while let Some(chunk) = reader.next_chunk().await {
            let chunk = chunk?;
            sink.write_all(&chunk).await?;
            bytes_out += chunk.len() as u64;
            chunks_out += 1;
        }
        sink.flush().await?;
        Ok::<_, crate::error::ResampleError>((bytes_out, chunks_out))
    };

    let ((bytes_in, chunks_in), (bytes_out, chunks_out)) = tokio::try_join!(feed, drain)?;

    if let Some(attachment) = attachment {
        writer.unpipe(attachment);
    }

    let stats = PipelineStats {
        bytes_in,
        bytes_out,
        chunks_in,
        chunks_out,
    };
    tracing::info!(?stats, "pipeline finished");
    Ok(stats)
}
