//! Cross-process bridge to the encoder child process: a shared
//! control block plus a PCM audio ring, two auto-reset wake events, and a
//! strict ping-pong handshake that serializes every event.
//!
//! Grounded on `examples/original_source/src/svr_game/proc_encoder.cpp`;
//! handle ownership follows `framecap_common::win32::OwnedHandle`.

mod shared_mem;

#[cfg(target_os = "windows")]
mod windows_bridge;

use framecap_common::{AudioStreamDescription, WaveSample};

pub use shared_mem::{EncoderMovieParams, SharedBlock, ENCODER_MAX_SAMPLES, MESSAGE_CAP};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("could not create shared memory region: {0}")]
    SharedMemoryCreate(String),
    #[error("could not start encoder process: {0}")]
    ProcessStart(String),
    #[error("encoder process exited unexpectedly")]
    EncoderExited,
    #[error("encoder reported error: {0}")]
    EncoderReported(String),
    #[error("encoder bridge is not supported on this platform")]
    Unsupported,
}

/// One NEW_VIDEO/NEW_AUDIO/START/STOP transaction (event discriminants).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EncoderEvent {
    Start = 0,
    NewVideo = 1,
    NewAudio = 2,
    Stop = 3,
}

/// Parameters carried by a START event; mirrors `EncoderSharedMovieParams`
/// but using owned Rust types at the API boundary (`shared_mem` does the
/// fixed-width byte packing).
#[derive(Debug, Clone)]
pub struct MovieStartParams {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub audio: AudioStreamDescription,
    pub use_audio: bool,
    pub x264_crf: u32,
    pub x264_intra: bool,
    pub dest_file: String,
    pub video_encoder: String,
    pub x264_preset: String,
    pub dnxhr_profile: String,
    pub audio_encoder: String,
    /// Destination planar pixel format / colour space, e.g. `"nv12"` /
    /// `"bt709"`. The encoder process owns the actual transcode; this
    /// field only carries the profile's choice across the wire.
    pub video_pixel_format: String,
    pub video_color_space: String,
}

/// The trait boundary re-architects "virtual dispatch over host C++
/// vtables" into a small interface resolved once at recording start,
/// rather than a class hierarchy. One real implementation
/// (`windows_bridge::Bridge`) backs this on the reference platform.
pub trait EncoderChannel: Send {
    /// Sends the shared-texture handle the encoder should map for every
    /// subsequent NEW_VIDEO, and the session parameters (START).
    fn start(&mut self, game_texture_handle: u32, params: &MovieStartParams) -> Result<(), BridgeError>;

    /// Signals that the shared video texture has a new frame ready.
    /// Callers must have flushed the GPU context beforehand (shared
    /// resources).
    fn send_video(&mut self) -> Result<(), BridgeError>;

    /// Writes `samples` into the audio ring and signals NEW_AUDIO,
    /// fragmenting into `ENCODER_MAX_SAMPLES`-sized submissions as needed
    /// (audio batching). Each fragment is an independent ping-pong.
    fn send_audio(&mut self, samples: &[WaveSample]) -> Result<(), BridgeError>;

    /// Finalizes the output file (STOP; never fails per the event
    /// table).
    fn stop(&mut self);
}

/// Fragments `samples` into batches of at most `ENCODER_MAX_SAMPLES`,
/// calling `send_one` for each. Shared between the real Windows bridge and
/// any fake used in `framecap-core`'s scheduler tests so the fragmentation
/// boundary behavior is exercised identically either way.
pub fn fragment_audio<'a>(samples: &'a [WaveSample]) -> impl Iterator<Item = &'a [WaveSample]> {
    samples.chunks(ENCODER_MAX_SAMPLES)
}

#[cfg(target_os = "windows")]
pub use windows_bridge::Bridge;

/// Non-Windows stand-in: the reference encoder bridge is Win32 IPC-only
/// (named shared memory, auto-reset events, a suspended-then-resumed child
/// process), so on other platforms it is simply unavailable.
#[cfg(not(target_os = "windows"))]
pub struct Bridge;

#[cfg(not(target_os = "windows"))]
impl Bridge {
    pub fn spawn(_resource_path: &std::path::Path) -> Result<Self, BridgeError> {
        Err(BridgeError::Unsupported)
    }
}

#[cfg(not(target_os = "windows"))]
impl EncoderChannel for Bridge {
    fn start(&mut self, _game_texture_handle: u32, _params: &MovieStartParams) -> Result<(), BridgeError> {
        Err(BridgeError::Unsupported)
    }

    fn send_video(&mut self) -> Result<(), BridgeError> {
        Err(BridgeError::Unsupported)
    }

    fn send_audio(&mut self, _samples: &[WaveSample]) -> Result<(), BridgeError> {
        Err(BridgeError::Unsupported)
    }

    fn stop(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_fragments_at_encoder_max_samples() {
        let samples = vec![WaveSample { left: 0, right: 0 }; ENCODER_MAX_SAMPLES * 2 + 7];
        let chunks: Vec<_> = fragment_audio(&samples).collect();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), ENCODER_MAX_SAMPLES);
        assert_eq!(chunks[1].len(), ENCODER_MAX_SAMPLES);
        assert_eq!(chunks[2].len(), 7);
    }

    #[test]
    fn exact_multiple_does_not_emit_a_trailing_empty_fragment() {
        let samples = vec![WaveSample { left: 0, right: 0 }; ENCODER_MAX_SAMPLES];
        let chunks: Vec<_> = fragment_audio(&samples).collect();
        assert_eq!(chunks.len(), 1);
    }
}
