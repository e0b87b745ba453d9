//! Frame helpers for interleaved PCM
//!
//! Packed audio keeps every channel in data plane 0. These helpers read and
//! fill that plane directly from the `AVFrame` instead of going through
//! `ffmpeg-next`'s `Audio::data(index)`, whose plane count relies on the
//! deprecated `channels` field.

use bytes::Bytes;
use ffmpeg_next as ffmpeg;

use crate::error::Result;
use crate::format::AudioFormat;

/// Borrow the packed data plane of `frame`.
///
/// The slice spans `linesize[0]` bytes, which may include alignment padding
/// past the last frame.
pub fn packed_plane(frame: &ffmpeg::util::frame::Audio) -> &[u8] {
    unsafe {
        let f = frame.as_ptr();
        let ptrs = (*f).extended_data;
        if ptrs.is_null() {
            return &[];
        }

        let plane_ptr = *ptrs;
        if plane_ptr.is_null() || (*f).linesize[0] <= 0 {
            return &[];
        }

        std::slice::from_raw_parts(plane_ptr, (*f).linesize[0] as usize)
    }
}

/// Mutable version of `packed_plane`.
pub fn packed_plane_mut(frame: &mut ffmpeg::util::frame::Audio) -> &mut [u8] {
    unsafe {
        let f = frame.as_mut_ptr();
        let ptrs = (*f).extended_data;
        if ptrs.is_null() {
            return &mut [];
        }

        let plane_ptr = *ptrs;
        if plane_ptr.is_null() || (*f).linesize[0] <= 0 {
            return &mut [];
        }

        std::slice::from_raw_parts_mut(plane_ptr, (*f).linesize[0] as usize)
    }
}

/// Wrap whole frames of interleaved `data` into an input frame of `format`.
///
/// `data.len()` must be a multiple of `format.frame_size()`.
pub fn input_frame(format: &AudioFormat, data: &[u8]) -> Result<ffmpeg::util::frame::Audio> {
    let samples = format.frames_in(data.len());
    let mut frame =
        ffmpeg::util::frame::Audio::new(format.format.to_ffmpeg(), samples, format.channel_layout()?);
    frame.set_rate(format.rate);

    let plane = packed_plane_mut(&mut frame);
    let len = data.len().min(plane.len());
    plane[..len].copy_from_slice(&data[..len]);

    Ok(frame)
}

/// Copy the converted frames out of `frame` as interleaved bytes of `format`.
pub fn output_bytes(frame: &ffmpeg::util::frame::Audio, format: &AudioFormat) -> Bytes {
    let wanted = frame.samples() * format.frame_size();
    let plane = packed_plane(frame);
    Bytes::copy_from_slice(&plane[..wanted.min(plane.len())])
}
