//! Upstream PCM producers
//!
//! A `PcmSource` yields chunks of interleaved samples and may declare its
//! format on a `watch` channel, which the resampler listens to once the
//! source is piped in.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;

use crate::error::{ResampleError, Result};
use crate::format::{AudioFormat, SampleFormat};

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Producer of interleaved PCM chunks
#[allow(async_fn_in_trait)]
pub trait PcmSource {
    /// Next chunk, or `None` at end of input.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;

    /// Format notifications, for sources that know their format.
    fn formats(&self) -> Option<watch::Receiver<Option<AudioFormat>>> {
        None
    }
}

/// Headerless PCM read in fixed-size chunks
pub struct RawSource<R> {
    reader: R,
    chunk_size: usize,
}

impl<R: AsyncRead + Unpin> RawSource<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
        }
    }
}

impl<R: AsyncRead + Unpin> PcmSource for RawSource<R> {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        read_chunk(&mut self.reader, self.chunk_size).await
    }
}

/// RIFF/WAVE reader that announces the format found in its header
pub struct WavSource<R> {
    reader: R,
    chunk_size: usize,
    format: AudioFormat,
    /// Bytes left in the data chunk; `None` when the header left it open-ended.
    remaining: Option<u64>,
    formats: watch::Sender<Option<AudioFormat>>,
}

impl<R: AsyncRead + Unpin> WavSource<R> {
    /// Parse the header up to the start of the sample data.
    pub async fn open(mut reader: R, chunk_size: usize) -> Result<Self> {
        let mut tag = [0u8; 4];
        reader.read_exact(&mut tag).await?;
        if &tag != b"RIFF" {
            return Err(ResampleError::Wav("missing RIFF tag".to_string()));
        }
        let _riff_size = reader.read_u32_le().await?;
        reader.read_exact(&mut tag).await?;
        if &tag != b"WAVE" {
            return Err(ResampleError::Wav("missing WAVE tag".to_string()));
        }

        let mut format = None;
        loop {
            reader.read_exact(&mut tag).await?;
            let size = reader.read_u32_le().await?;

            match &tag {
                b"fmt " => {
                    format = Some(read_fmt_chunk(&mut reader, size).await?);
                }
                b"data" => {
                    let format = format
                        .ok_or_else(|| ResampleError::Wav("data chunk before fmt chunk".to_string()))?;
                    // Streaming writers leave the size at u32::MAX.
                    let remaining = match size {
                        u32::MAX => None,
                        n => Some(n as u64),
                    };
                    tracing::debug!(%format, data = ?remaining, "wav header parsed");

                    let (formats, _) = watch::channel(Some(format));
                    return Ok(Self {
                        reader,
                        chunk_size: chunk_size.max(1),
                        format,
                        remaining,
                        formats,
                    });
                }
                other => {
                    tracing::trace!(chunk = %String::from_utf8_lossy(other), size, "skipping wav chunk");
                    skip(&mut reader, padded(size)).await?;
                }
            }
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }
}

impl<R: AsyncRead + Unpin> PcmSource for WavSource<R> {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        let want = match self.remaining {
            Some(0) => return Ok(None),
            Some(n) => (n as usize).min(self.chunk_size),
            None => self.chunk_size,
        };

        let chunk = read_chunk(&mut self.reader, want).await?;
        if let (Some(remaining), Some(chunk)) = (self.remaining.as_mut(), chunk.as_ref()) {
            *remaining -= chunk.len() as u64;
        }
        Ok(chunk)
    }

    fn formats(&self) -> Option<watch::Receiver<Option<AudioFormat>>> {
        Some(self.formats.subscribe())
    }
}

async fn read_fmt_chunk<R: AsyncRead + Unpin>(reader: &mut R, size: u32) -> Result<AudioFormat> {
    if size < 16 {
        return Err(ResampleError::Wav(format!("fmt chunk too short ({} bytes)", size)));
    }
    let mut tag = reader.read_u16_le().await?;
    let channels = reader.read_u16_le().await?;
    let rate = reader.read_u32_le().await?;
    let _byte_rate = reader.read_u32_le().await?;
    let _block_align = reader.read_u16_le().await?;
    let bits = reader.read_u16_le().await?;
    let mut consumed = 16u64;

    if tag == WAVE_FORMAT_EXTENSIBLE && size >= 26 {
        let _cb_size = reader.read_u16_le().await?;
        let _valid_bits = reader.read_u16_le().await?;
        let _channel_mask = reader.read_u32_le().await?;
        // first two bytes of the sub-format GUID carry the format tag
        tag = reader.read_u16_le().await?;
        consumed += 10;
    }
    skip(reader, padded(size) - consumed).await?;

    let format = match (tag, bits) {
        (WAVE_FORMAT_PCM, 8) => SampleFormat::U8,
        (WAVE_FORMAT_PCM, 16) => SampleFormat::S16,
        (WAVE_FORMAT_PCM, 32) => SampleFormat::S32,
        (WAVE_FORMAT_IEEE_FLOAT, 32) => SampleFormat::Flt,
        (WAVE_FORMAT_IEEE_FLOAT, 64) => SampleFormat::Dbl,
        (tag, bits) => {
            return Err(ResampleError::Wav(format!(
                "unsupported encoding: format tag {:#06x}, {} bits",
                tag, bits
            )))
        }
    };

    let format = AudioFormat::new(format, rate, channels);
    format.validate()?;
    Ok(format)
}

fn padded(size: u32) -> u64 {
    size as u64 + (size as u64 & 1)
}

async fn skip<R: AsyncRead + Unpin>(reader: &mut R, count: u64) -> Result<()> {
    let skipped = tokio::io::copy(&mut reader.take(count), &mut tokio::io::sink()).await?;
    if skipped < count {
        return Err(ResampleError::Wav("truncated header".to_string()));
    }
    Ok(())
}

/// Fill up to `max` bytes, stopping early only at end of input.
async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, max: usize) -> Result<Option<Bytes>> {
    let mut buf = vec![0u8; max];
    let mut filled = 0;
    while filled < max {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    if filled == 0 {
        return Ok(None);
    }
    buf.truncate(filled);
    Ok(Some(Bytes::from(buf)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixtures::wav_bytes;

    #[tokio::test]
    async fn test_wav_header() {
        let bytes = wav_bytes(WAVE_FORMAT_PCM, 2, 44100, 16, &[0u8; 10]);
        let mut source = WavSource::open(&bytes[..], 4).await.unwrap();
        assert_eq!(source.format(), AudioFormat::new(SampleFormat::S16, 44100, 2));
        assert_eq!(
            *source.formats().unwrap().borrow(),
            Some(AudioFormat::new(SampleFormat::S16, 44100, 2))
        );

        let mut total = 0;
        while let Some(chunk) = source.next_chunk().await.unwrap() {
            assert!(chunk.len() <= 4);
            total += chunk.len();
        }
        assert_eq!(total, 10);
    }

    #[tokio::test]
    async fn test_wav_data_size_bounds_reads() {
        let mut bytes = wav_bytes(WAVE_FORMAT_IEEE_FLOAT, 1, 8000, 32, &[0u8; 8]);
        // trailing chunk after data must not be read as samples
        bytes.extend_from_slice(b"junk\x04\x00\x00\x00abcd");
        let mut source = WavSource::open(&bytes[..], 1024).await.unwrap();
        assert_eq!(source.format().format, SampleFormat::Flt);
        assert_eq!(source.next_chunk().await.unwrap().unwrap().len(), 8);
        assert!(source.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wav_empty_data_ignores_trailing_chunks() {
        let mut bytes = wav_bytes(WAVE_FORMAT_PCM, 1, 8000, 16, &[]);
        bytes.extend_from_slice(b"LIST\x04\x00\x00\x00INFO");
        let mut source = WavSource::open(&bytes[..], 1024).await.unwrap();
        assert!(source.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wav_streaming_size_reads_to_eof() {
        let mut bytes = wav_bytes(WAVE_FORMAT_PCM, 1, 8000, 16, &[]);
        let len = bytes.len();
        bytes[len - 4..].copy_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 6]);
        let mut source = WavSource::open(&bytes[..], 1024).await.unwrap();
        assert_eq!(source.next_chunk().await.unwrap().unwrap().len(), 6);
        assert!(source.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wav_rejects_unsupported() {
        let bytes = wav_bytes(WAVE_FORMAT_PCM, 2, 44100, 24, &[]);
        assert!(matches!(
            WavSource::open(&bytes[..], 4).await,
            Err(ResampleError::Wav(_))
        ));

        assert!(WavSource::open(&b"RIFX\0\0\0\0WAVE"[..], 4).await.is_err());
    }

    #[tokio::test]
    async fn test_raw_source_chunks() {
        let data = vec![7u8; 10];
        let mut source = RawSource::new(&data[..], 4);
        let mut sizes = Vec::new();
        while let Some(chunk) = source.next_chunk().await.unwrap() {
            sizes.push(chunk.len());
        }
        assert_eq!(sizes, vec![4, 4, 2]);
        assert!(source.formats().is_none());
    }
}
