//! Byte layout of the process-shared control block. Field order is
//! part of the wire contract, so this is a `#[repr(C)]` struct rather than
//! a `bytemuck`-derived one — the block is read by a process built from an
//! entirely separate toolchain, not just another Rust crate.

use std::ffi::CStr;

use framecap_common::WaveSample;

/// Not given an explicit value anywhere in the retrieved source; the
/// original's own comment on `encoder_send_audio_samples` says actual
/// batches are "typically... 512 or 1024" samples, so this picks a round
/// value comfortably above that.
pub const ENCODER_MAX_SAMPLES: usize = 4096;

pub const MAX_PATH: usize = 260;
pub const TOKEN_CAP: usize = 32;
pub const MESSAGE_CAP: usize = 1024;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct EncoderMovieParams {
    pub video_width: u32,
    pub video_height: u32,
    pub video_fps: u32,
    pub audio_channels: u32,
    pub audio_hz: u32,
    pub audio_bits: u32,
    pub use_audio: u32,
    pub x264_crf: u32,
    pub x264_intra: u32,
    pub dest_file: [u8; MAX_PATH],
    pub video_encoder: [u8; TOKEN_CAP],
    pub x264_preset: [u8; TOKEN_CAP],
    pub dnxhr_profile: [u8; TOKEN_CAP],
    pub audio_encoder: [u8; TOKEN_CAP],
    /// Destination planar pixel format / colour space the encoder should
    /// convert the raw BGRA8 shared texture into. The core hands over one
    /// raw texture and never converts it in-process; this is the wire-level
    /// plumbing that carries the profile's chosen format to the process
    /// that does, instead of leaving it unread.
    pub video_pixel_format: [u8; TOKEN_CAP],
    pub video_color_space: [u8; TOKEN_CAP],
}

impl Default for EncoderMovieParams {
    fn default() -> Self {
        // SAFETY: an all-zero bit pattern is a valid value for every field
        // here (u32s and fixed byte arrays).
        unsafe { std::mem::zeroed() }
    }
}

/// The process-shared control block that precedes the audio ring in the
/// mapped view. Field order must not change without bumping the
/// encoder child process's own copy of this layout.
#[repr(C)]
pub struct SharedBlock {
    pub game_pid: u32,
    pub game_wake_event_handle: u32,
    pub encoder_wake_event_handle: u32,
    pub audio_buffer_offset: u32,
    pub event_type: u32,
    pub waiting_audio_samples: u32,
    pub game_texture_handle: u32,
    pub movie_params: EncoderMovieParams,
    pub error: u32,
    pub error_message: [u8; MESSAGE_CAP],
}

impl SharedBlock {
    /// Total bytes to map: the control block plus the fixed-capacity audio
    /// ring that follows it (layout comment, "followed by
    /// audio_buffer").
    pub const fn total_size() -> usize {
        std::mem::size_of::<SharedBlock>() + std::mem::size_of::<WaveSample>() * ENCODER_MAX_SAMPLES
    }

    pub const fn audio_buffer_offset() -> u32 {
        std::mem::size_of::<SharedBlock>() as u32
    }

    /// # Safety
    /// `ptr` must point at a mapping at least `Self::total_size()` bytes
    /// long, zero-initialized, for the lifetime of the returned reference.
    pub unsafe fn from_mapped<'a>(ptr: *mut u8) -> &'a mut SharedBlock {
        &mut *(ptr as *mut SharedBlock)
    }

    /// # Safety
    /// Same preconditions as `from_mapped`; returns the audio ring that
    /// starts at `audio_buffer_offset()` bytes past the block.
    pub unsafe fn audio_buffer<'a>(ptr: *mut u8) -> &'a mut [WaveSample] {
        let base = ptr.add(Self::audio_buffer_offset() as usize) as *mut WaveSample;
        std::slice::from_raw_parts_mut(base, ENCODER_MAX_SAMPLES)
    }

    pub fn error_message(&self) -> String {
        CStr::from_bytes_until_nul(&self.error_message)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Copies `s` into a fixed-size nul-terminated byte buffer, truncating (at
/// a byte boundary) if it does not fit. Mirrors `svr_copy_string`.
pub fn write_fixed_str<const N: usize>(dst: &mut [u8; N], s: &str) {
    let bytes = s.as_bytes();
    let cap = N - 1;
    let n = bytes.len().min(cap);
    dst[..n].copy_from_slice(&bytes[..n]);
    dst[n] = 0;
    for b in &mut dst[n + 1..] {
        *b = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_buffer_offset_matches_block_size() {
        assert_eq!(SharedBlock::audio_buffer_offset() as usize, std::mem::size_of::<SharedBlock>());
    }

    #[test]
    fn write_fixed_str_truncates_and_nul_terminates() {
        let mut buf = [0xffu8; 8];
        write_fixed_str(&mut buf, "hello world");
        assert_eq!(&buf, b"hello w\0");
    }

    #[test]
    fn write_fixed_str_zero_pads_short_strings() {
        let mut buf = [0xffu8; 8];
        write_fixed_str(&mut buf, "hi");
        assert_eq!(&buf, b"hi\0\0\0\0\0\0");
    }
}
