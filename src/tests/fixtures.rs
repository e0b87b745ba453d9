//! Test fixtures
//!
//! Synthetic PCM and WAV data so no media files are needed.

use std::future::Future;
use std::time::Duration;

use crate::format::{AudioFormat, SampleFormat};

pub fn s16(rate: u32, channels: u16) -> AudioFormat {
    AudioFormat::new(SampleFormat::S16, rate, channels)
}

/// Interleaved s16 sine, the same signal on every channel.
pub fn sine_s16(rate: u32, channels: u16, seconds: f64, freq: f64) -> Vec<u8> {
    let frames = (rate as f64 * seconds).round() as usize;
    let mut out = Vec::with_capacity(frames * channels as usize * 2);
    for n in 0..frames {
        let t = n as f64 / rate as f64;
        let value = ((t * freq * std::f64::consts::TAU).sin() * 12_000.0) as i16;
        for _ in 0..channels {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    out
}

/// Canonical WAV header with an extra LIST chunk, followed by `data`.
pub fn wav_bytes(format: u16, channels: u16, rate: u32, bits: u16, data: &[u8]) -> Vec<u8> {
    let block_align = channels * bits / 8;
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(48 + data.len() as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&format.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&rate.to_le_bytes());
    out.extend_from_slice(&(rate * block_align as u32).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits.to_le_bytes());
    // odd-sized chunk, padded to even
    out.extend_from_slice(b"LIST");
    out.extend_from_slice(&3u32.to_le_bytes());
    out.extend_from_slice(&[1, 2, 3, 0]);
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    out
}

/// Poll `check` until it holds or a second has passed.
pub async fn wait_for<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

/// Whether `future` is still pending after a short grace period.
pub async fn still_pending<F: Future + Unpin>(future: &mut F) -> bool {
    tokio::time::timeout(Duration::from_millis(50), future)
        .await
        .is_err()
}
