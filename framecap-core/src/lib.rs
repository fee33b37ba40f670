//! Host-facing facade: wires C4 motion blur, C5 overlay, C6 audio
//! mixer and C7 scheduler to the C1 graphics backend and C3 encoder bridge,
//! exposing the four entry points (`initialize`/`start_movie`/`frame`/
//! `stop`) the host drives every simulation frame, plus the per-frame
//! supplemental setters and profile-derived queries.
//!
//! Grounded on `examples/original_source/src/svr_game/svr_api.cpp` for the
//! entry-point shape, and `hylarana/src/lib.rs`'s `startup`/`shutdown` plus
//! trait-object sender/receiver construction for how the pieces are wired
//! together rather than mirroring the host's own class hierarchy.

pub mod audio_mixer;
pub mod host;
pub mod motion_blur;
pub mod overlay;
pub mod scheduler;

use std::path::PathBuf;

use framecap_bridge::{BridgeError, EncoderChannel, MovieStartParams};
use framecap_common::{AudioStreamDescription, Size, WaveSample};
use framecap_graphics::{
    BlendMode, CapFlags, ConversionDesc, ConversionHandle, GraphicsBackend, GraphicsError,
    OverlayOptions, PixelFormat, Rect, SamplerKind, TextFormatDesc, TextFormatHandle, TextureDesc,
    TextureHandle, TextureUsageKind, View, ViewFlags,
};
use framecap_profile::{Profile, ProfileError};

use crate::audio_mixer::AudioMixer;
use crate::host::Host;
use crate::motion_blur::{MotionBlur, MotionBlurAction};
use crate::overlay::Overlay;
use crate::scheduler::{parse_start_movie_args, RecordingScheduler, StartMovieError};

pub use crate::scheduler::{RecordingState, SignonState, StartMovieArgs, START_MOVIE_USAGE};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error(transparent)]
    Graphics(#[from] GraphicsError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    StartMovie(#[from] StartMovieError),
    #[error("required cfg '{0}' is not registered with the host")]
    MissingCfg(&'static str),
}

/// What the host hands over at `start_movie` (`start_data`): the SRV
/// the core reads from every tick, its pixel dimensions, and the audio
/// stream shape the host's mixer will generate at.
pub struct StartData {
    pub game_srv: View,
    pub size: Size,
    pub audio: AudioStreamDescription,
}

/// Dynamic, per-recording GPU allocations (Resource lifetimes): "On
/// recording start: allocate work tex, conversion context, text format,
/// shared tex. On recording end: destroy in reverse order."
struct Recording {
    size: Size,
    game_srv: View,
    work_tex: TextureHandle,
    shared_tex: TextureHandle,
    conversion: ConversionHandle,
    text_format: Option<TextFormatHandle>,
    audio_hz: u32,
}

/// The top-level state struct ("global singletons... a single owning
/// state struct threaded explicitly through calls"). Lives on the host's
/// main render thread only; nothing here is `Sync`.
pub struct Core {
    resource_path: PathBuf,
    host: Box<dyn Host>,
    graphics: Box<dyn GraphicsBackend>,
    bridge: Box<dyn EncoderChannel>,
    scheduler: RecordingScheduler,
    profile: Option<Profile>,
    motion_blur: Option<MotionBlur>,
    overlay: Option<Overlay>,
    audio_mixer: AudioMixer,
    recording: Option<Recording>,
    movie_active: bool,
    /// The rate actually driving the host/scheduler for the active
    /// recording: `video.fps * motion_blur.multiplier` only when motion
    /// blur was both requested and the graphics backend could actually
    /// sample at it; `video.fps` otherwise (including a capability-refused
    /// request, which must behave exactly like `multiplier == 1`). Set once
    /// in `start_movie`, not recomputed from `profile.game_rate()` later,
    /// so it can't drift from what motion blur is actually doing.
    game_rate: u32,
}

impl Core {
    /// `initialize(resource_path, graphics_device)`, realized as
    /// dependency injection rather than a device handle the core would
    /// otherwise have to reconstruct a backend from: the caller constructs
    /// whichever [`GraphicsBackend`]/[`EncoderChannel`] it wants (the real
    /// `wgpu`/`windows` ones in production, fakes in tests) and hands them
    /// here already built. See DESIGN.md for why this departs from the
    /// literal `graphics_device` parameter.
    pub fn new(
        resource_path: impl Into<PathBuf>,
        host: Box<dyn Host>,
        graphics: Box<dyn GraphicsBackend>,
        bridge: Box<dyn EncoderChannel>,
    ) -> Self {
        let supports_autostop = host.supports_autostop();
        Self {
            resource_path: resource_path.into(),
            host,
            graphics,
            bridge,
            scheduler: RecordingScheduler::new(supports_autostop),
            profile: None,
            motion_blur: None,
            overlay: None,
            audio_mixer: AudioMixer::new(),
            recording: None,
            movie_active: false,
            game_rate: 0,
        }
    }

    pub fn scheduler_state(&self) -> RecordingState {
        self.scheduler.state()
    }

    /// `start_movie(filename, profile_name, start_data)`, collapsed
    /// to the single `startmovie <args>` command string the console
    /// surface actually hands the core — `args` is parsed by
    /// [`parse_start_movie_args`].
    pub fn start_movie(&mut self, args: &str, start_data: StartData) -> bool {
        match self.try_start_movie(args, start_data) {
            Ok(()) => true,
            Err(err) => {
                log::error!("startmovie failed: {err}");
                self.host.console_msg(&err.to_string());
                false
            }
        }
    }

    fn try_start_movie(&mut self, args: &str, start_data: StartData) -> Result<(), CoreError> {
        let (filename, movie_args) = parse_start_movie_args(args)?;

        if !self.host.has_cfg("start") {
            return Err(CoreError::MissingCfg("svr_movie_start.cfg"));
        }
        if !self.host.has_cfg("end") {
            return Err(CoreError::MissingCfg("svr_movie_end.cfg"));
        }

        let profile_name = movie_args.profile.clone().unwrap_or_else(|| "default".to_string());
        let profile = Profile::load(&self.resource_path, &profile_name)?;

        let work_tex = self.graphics.create_texture(
            "mb-work",
            TextureDesc {
                size: start_data.size,
                format: PixelFormat::Rgba32Float,
                usage: TextureUsageKind::Default,
                views: ViewFlags::UAV | ViewFlags::SRV | ViewFlags::RTV,
                caps: CapFlags::NONE,
            },
        )?;

        let shared_tex = self.graphics.create_texture(
            "shared-output",
            TextureDesc {
                size: start_data.size,
                format: PixelFormat::Bgra8,
                usage: TextureUsageKind::Default,
                views: ViewFlags::SRV | ViewFlags::RTV,
                caps: CapFlags::SHARED | CapFlags::DOWNLOADABLE | CapFlags::TEXT_TARGET,
            },
        )?;

        let conversion = self.graphics.create_conversion_context(
            "movie-conversion",
            ConversionDesc {
                size: start_data.size,
                format: profile.video.pixel_format,
                color_space: profile.video.color_space,
            },
        )?;

        // "failure is fatal for this overlay only": a font lookup
        // failure disables the velocity overlay for this recording rather
        // than aborting the whole `start_movie`.
        let text_format = if profile.overlay.enabled {
            match self.graphics.create_text_format(
                "velo-overlay",
                shared_tex,
                TextFormatDesc {
                    font_family: profile.overlay.font_path.clone(),
                    size: profile.overlay.font_size as f32,
                    color: to_unit_color(profile.overlay.color),
                    border_color: to_unit_color(profile.overlay.border_color),
                    border_size: profile.overlay.border_size as f32,
                    style: map_font_style(profile.overlay.style),
                    weight: map_font_weight(profile.overlay.weight),
                },
            ) {
                Ok(fmt) => Some(fmt),
                Err(err) => {
                    log::error!("velocity overlay disabled, font lookup failed: {err}");
                    None
                }
            }
        } else {
            None
        };

        // Capability has to be known before the rate that drives the host
        // and scheduler is decided: a capability-refused request falls back
        // to the direct-blit path and must run at plain `video.fps`, the
        // same as `multiplier == 1` (see `run_direct_blit_tick`).
        let motion_blur_requested = profile.motion_blur.enabled && profile.motion_blur.multiplier > 1;
        let motion_blur_capable = self.graphics.motion_blur_capable();
        let game_rate = if motion_blur_requested && motion_blur_capable {
            profile.game_rate()
        } else {
            profile.video.fps
        };

        let start_params = MovieStartParams {
            width: start_data.size.width,
            height: start_data.size.height,
            fps: profile.video.fps,
            audio: start_data.audio,
            use_audio: profile.audio.enabled,
            x264_crf: profile.video.x264_crf,
            x264_intra: profile.video.x264_intra,
            dest_file: filename,
            video_encoder: profile.video.encoder.to_string(),
            x264_preset: profile.video.x264_preset.to_string(),
            dnxhr_profile: profile.video.dnxhr_profile.to_string(),
            audio_encoder: profile.audio.encoder.to_string(),
            video_pixel_format: profile.video.pixel_format.to_string(),
            video_color_space: profile.video.color_space.to_string(),
        };

        // The shared texture's cross-process handle is owned by the
        // backend/bridge pairing ("COM reference counting on GPU
        // resources" -> explicit ownership by key); the reference `wgpu`
        // backend does not yet expose a stable numeric handle for it
        // (see `open_shared_texture`'s note in wgpu_backend.rs), so 0 is
        // passed and the real handle is plumbed in by whichever backend
        // does implement Windows shared-handle interop.
        self.bridge.start(0, &start_params)?;

        self.host.run_cfgs_for_event("start");
        self.host.set_host_framerate(game_rate);

        self.scheduler.begin(&movie_args, game_rate, self.host.real_time_micros());
        self.movie_active = true;
        self.game_rate = game_rate;

        self.motion_blur = if motion_blur_requested && motion_blur_capable {
            Some(MotionBlur::new(profile.motion_blur.multiplier, profile.motion_blur.exposure))
        } else {
            if motion_blur_requested {
                log::warn!("motion blur requested but the graphics backend lacks compute capability; recording without it");
            }
            None
        };
        self.overlay = (profile.overlay.enabled && text_format.is_some())
            .then(|| Overlay::new(profile.overlay.clone()));
        self.audio_mixer = AudioMixer::new();

        self.recording = Some(Recording {
            size: start_data.size,
            game_srv: start_data.game_srv,
            work_tex,
            shared_tex,
            conversion,
            text_format,
            audio_hz: start_data.audio.sample_rate,
        });
        self.profile = Some(profile);

        Ok(())
    }

    /// `frame()`: one host simulation tick. No-op unless a movie is
    /// active and the scheduler is in `Possible` (the open question: frames
    /// received while `Waiting` are silently ignored).
    pub fn frame(&mut self) {
        if !self.movie_active {
            return;
        }

        self.scheduler.update_recording_state(self.host.signon_state());

        if self.scheduler.update_autostop(self.movie_active) {
            self.finish_recording();
            return;
        }

        if !self.scheduler.should_run_frame(self.movie_active) {
            return;
        }

        if let Err(err) = self.run_frame_tick() {
            log::error!("frame tick failed, stopping recording: {err}");
            self.finish_recording();
            return;
        }

        self.scheduler.note_frame();

        if self.scheduler.timed_out() {
            self.finish_recording();
        }

        if !self.scheduler.window_update_disabled() {
            self.host.update_window();
        }
    }

    fn run_frame_tick(&mut self) -> Result<(), CoreError> {
        let game_rate = self.scheduler_game_rate();
        let audio_enabled = self.profile.as_ref().map(|p| p.audio.enabled).unwrap_or(false);

        if audio_enabled {
            let audio_hz = self.recording.as_ref().map(|r| r.audio_hz).unwrap_or(44_100);
            if let Some((aligned_end, _)) = self.audio_mixer.tick(self.host.paint_time(), game_rate, audio_hz) {
                let samples = self.host.mix_audio(aligned_end);
                if !samples.is_empty() {
                    self.bridge.send_audio(&samples)?;
                }
            }
        }

        let recording_size = self.recording.as_ref().map(|r| r.size).expect("frame tick requires an active recording");
        let game_srv = self.recording.as_ref().map(|r| r.game_srv).expect("frame tick requires an active recording");

        match self.motion_blur.take() {
            Some(mut motion_blur) => {
                let result = self.run_motion_blur_tick(&mut motion_blur, recording_size, game_srv);
                self.motion_blur = Some(motion_blur);
                result
            }
            None => self.run_direct_blit_tick(recording_size, game_srv),
        }
    }

    /// : one motion-blur sampling tick, executing whatever
    /// accumulate/downsample/emit/clear sequence [`MotionBlur::tick`]
    /// returns.
    fn run_motion_blur_tick(&mut self, motion_blur: &mut MotionBlur, size: Size, game_srv: View) -> Result<(), CoreError> {
        let work_uav = self.texture_view_or_err(self.recording_work_tex(), ViewKindHint::Uav)?;
        let work_srv = self.texture_view_or_err(self.recording_work_tex(), ViewKindHint::Srv)?;
        let work_rtv = self.texture_view_or_err(self.recording_work_tex(), ViewKindHint::Rtv)?;
        let shared_rtv = self.texture_view_or_err(self.recording_shared_tex(), ViewKindHint::Rtv)?;

        let mut text_pending = false;

        for action in motion_blur.tick() {
            match action {
                MotionBlurAction::Accumulate(weight) => {
                    self.graphics.motion_sample(size, game_srv, work_uav, weight)?;
                }
                MotionBlurAction::Downsample => {
                    self.graphics.draw_overlay(
                        work_srv,
                        shared_rtv,
                        OverlayOptions { rect: full_rect(size), sampler: SamplerKind::Linear, blend: BlendMode::Opaque },
                    )?;
                    text_pending = true;
                }
                MotionBlurAction::EmitFrame => {
                    if text_pending {
                        self.draw_overlay_text(size)?;
                        text_pending = false;
                    }
                    self.graphics.flush();
                    self.bridge.send_video()?;
                }
                MotionBlurAction::Clear => {
                    self.graphics.clear_rtv(work_rtv, [0.0, 0.0, 0.0, 1.0])?;
                }
            }
        }

        Ok(())
    }

    /// Motion blur disabled (or `multiplier == 1`, which collapses to this
    /// same path boundary behavior): blit the game SRV straight onto
    /// the shared output texture every tick.
    fn run_direct_blit_tick(&mut self, size: Size, game_srv: View) -> Result<(), CoreError> {
        let shared_rtv = self.texture_view_or_err(self.recording_shared_tex(), ViewKindHint::Rtv)?;

        self.graphics.draw_overlay(
            game_srv,
            shared_rtv,
            OverlayOptions { rect: full_rect(size), sampler: SamplerKind::Point, blend: BlendMode::Opaque },
        )?;
        self.draw_overlay_text(size)?;
        self.graphics.flush();
        self.bridge.send_video()?;
        Ok(())
    }

    fn draw_overlay_text(&mut self, size: Size) -> Result<(), CoreError> {
        let Some(overlay) = self.overlay.as_ref() else { return Ok(()) };
        let Some(fmt) = self.recording.as_ref().and_then(|r| r.text_format) else { return Ok(()) };

        let layout = overlay.layout(size);
        let rect = Rect {
            left: layout.origin.0.max(0.0) as u32,
            top: layout.origin.1.max(0.0) as u32,
            right: (layout.origin.0 + layout.estimated_width).clamp(0.0, size.width as f32) as u32,
            bottom: size.height,
        };
        self.graphics.draw_text(fmt, &layout.text, rect)?;
        Ok(())
    }

    fn recording_work_tex(&self) -> TextureHandle {
        self.recording.as_ref().expect("recording resources required").work_tex
    }

    fn recording_shared_tex(&self) -> TextureHandle {
        self.recording.as_ref().expect("recording resources required").shared_tex
    }

    fn texture_view_or_err(&self, tex: TextureHandle, kind: ViewKindHint) -> Result<View, CoreError> {
        let view = match kind {
            ViewKindHint::Srv => self.graphics.get_texture_srv(tex),
            ViewKindHint::Uav => self.graphics.get_texture_uav(tex),
            ViewKindHint::Rtv => self.graphics.get_texture_rtv(tex),
        };
        view.ok_or(CoreError::Graphics(GraphicsError::ViewNotAvailable))
    }

    fn scheduler_game_rate(&self) -> u32 {
        self.game_rate.max(1)
    }

    /// `stop()`: explicit `end_movie`. A no-op if no recording is
    /// active ("running `start_movie` then `end_movie` with no frames
    /// in between is a no-op besides cfg execution").
    pub fn stop(&mut self) {
        if !self.movie_active {
            return;
        }
        self.finish_recording();
    }

    fn finish_recording(&mut self) {
        let (elapsed_secs, fps) = self.scheduler.end(self.host.real_time_micros());
        log::info!(
            "recording finished: {} frames in {:.2}s ({:.2} fps)",
            self.scheduler.num_frames(),
            elapsed_secs,
            fps
        );

        self.bridge.stop();

        // "destroy in reverse order" of the allocation list (work tex,
        // shared tex, conversion context, text format): text format first
        // since it targets the shared texture's view.
        if let Some(recording) = self.recording.take() {
            if let Some(fmt) = recording.text_format {
                self.graphics.destroy_text_format(fmt);
            }
            self.graphics.destroy_conversion_context(recording.conversion);
            self.graphics.destroy_texture(recording.shared_tex);
            self.graphics.destroy_texture(recording.work_tex);
        }

        self.host.run_cfgs_for_event("end");
        self.host.reset_window();

        self.profile = None;
        self.motion_blur = None;
        self.overlay = None;
        self.movie_active = false;
        self.game_rate = 0;
    }

    /// `give_velocity(x, y, z)`.
    pub fn give_velocity(&mut self, x: f32, y: f32, z: f32) {
        if let Some(overlay) = self.overlay.as_mut() {
            overlay.give_velocity(x, y, z);
        }
    }

    /// `give_audio(samples, count)`: a push-style alternative to the
    /// mixer's pull for hosts that generate audio independently of
    /// [`host::Host::mix_audio`]. Silently dropped while muted (
    /// "muting... the bridge silently drops sample writes") or while no
    /// recording is active.
    pub fn give_audio(&mut self, samples: &[WaveSample]) {
        if !self.movie_active {
            return;
        }
        let audio_enabled = self.profile.as_ref().map(|p| p.audio.enabled).unwrap_or(false);
        if !audio_enabled || samples.is_empty() {
            return;
        }
        if let Err(err) = self.bridge.send_audio(samples) {
            log::error!("give_audio failed: {err}");
        }
    }

    /// `is_velo_enabled()`.
    pub fn is_velo_enabled(&self) -> bool {
        self.overlay.as_ref().map(|o| o.enabled()).unwrap_or(false)
    }

    /// `is_audio_enabled()`.
    pub fn is_audio_enabled(&self) -> bool {
        self.profile.as_ref().map(|p| p.audio.enabled).unwrap_or(false)
    }

    /// `get_game_rate()`: the rate actually driving this recording, which
    /// collapses to `video.fps` whenever motion blur isn't actually
    /// sampling (disabled, `multiplier == 1`, or capability-refused).
    pub fn get_game_rate(&self) -> u32 {
        if self.movie_active {
            self.game_rate
        } else {
            0
        }
    }
}

#[derive(Clone, Copy)]
enum ViewKindHint {
    Srv,
    Uav,
    Rtv,
}

fn full_rect(size: Size) -> Rect {
    Rect { left: 0, top: 0, right: size.width, bottom: size.height }
}

fn to_unit_color(c: [u8; 4]) -> [f32; 4] {
    [c[0] as f32 / 255.0, c[1] as f32 / 255.0, c[2] as f32 / 255.0, c[3] as f32 / 255.0]
}

fn map_font_style(style: framecap_profile::FontStyle) -> framecap_graphics::FontStyle {
    match style {
        framecap_profile::FontStyle::Normal => framecap_graphics::FontStyle::Normal,
        framecap_profile::FontStyle::Italic => framecap_graphics::FontStyle::Italic,
        framecap_profile::FontStyle::ExtraItalic => framecap_graphics::FontStyle::ExtraItalic,
    }
}

fn map_font_weight(weight: framecap_profile::FontWeight) -> framecap_graphics::FontWeight {
    use framecap_graphics::FontWeight as G;
    use framecap_profile::FontWeight as P;
    match weight {
        P::Thin => G::Thin,
        P::ExtraLight => G::ExtraLight,
        P::Light => G::Light,
        P::SemiLight => G::SemiLight,
        P::Normal => G::Normal,
        P::Medium => G::Medium,
        P::SemiBold => G::SemiBold,
        P::Bold => G::Bold,
        P::ExtraBold => G::ExtraBold,
        P::Black => G::Black,
        P::ExtraBlack => G::ExtraBlack,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::{HashMap, HashSet};
    use std::path::Path;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use framecap_graphics::{ConversionHandle, TextFormatHandle, ViewKind};

    // ---- fakes ---------------------------------------------------------
    //
    // `GraphicsBackend` carries no `Send` bound, so `FakeGraphics` shares its
    // resource counts with the test body through a plain `Rc`.
    // `EncoderChannel: Send` does carry one, so `FakeBridge` uses `Arc`s of
    // atomics instead.

    #[derive(Clone, Default)]
    struct GraphicsCounters {
        created: Rc<Cell<u64>>,
        destroyed: Rc<Cell<u64>>,
    }

    impl GraphicsCounters {
        fn balanced(&self) -> bool {
            self.created.get() == self.destroyed.get()
        }
    }

    struct FakeGraphics {
        next_id: u64,
        live_textures: HashSet<u64>,
        counters: GraphicsCounters,
        descs: HashMap<u64, TextureDesc>,
        /// Conversion handle -> (desc, per-plane texture ids), mirroring
        /// `WgpuBackend`'s conversion contexts owning real plane textures
        /// that `destroy_conversion_context` must release.
        conversions: HashMap<u64, (ConversionDesc, Vec<u64>)>,
        text_formats: HashSet<u64>,
        fail_text_format: bool,
        motion_blur_capable: bool,
    }

    impl FakeGraphics {
        fn new() -> (Self, GraphicsCounters) {
            let counters = GraphicsCounters::default();
            let backend = Self {
                next_id: 1,
                live_textures: HashSet::new(),
                counters: counters.clone(),
                descs: HashMap::new(),
                conversions: HashMap::new(),
                text_formats: HashSet::new(),
                fail_text_format: false,
                motion_blur_capable: true,
            };
            (backend, counters)
        }

        /// Simulates a missing font face: every subsequent
        /// `create_text_format` call fails instead of succeeding.
        fn with_failing_text_format() -> (Self, GraphicsCounters) {
            let (mut backend, counters) = Self::new();
            backend.fail_text_format = true;
            (backend, counters)
        }

        /// Simulates an adapter lacking read-write storage-texture support.
        fn without_motion_blur_capability() -> (Self, GraphicsCounters) {
            let (mut backend, counters) = Self::new();
            backend.motion_blur_capable = false;
            (backend, counters)
        }

        fn alloc(&mut self) -> u64 {
            let id = self.next_id;
            self.next_id += 1;
            id
        }
    }

    impl GraphicsBackend for FakeGraphics {
        fn create_texture(&mut self, _name: &str, desc: TextureDesc) -> Result<TextureHandle, GraphicsError> {
            desc.validate()?;
            let id = self.alloc();
            self.live_textures.insert(id);
            self.descs.insert(id, desc);
            self.counters.created.set(self.counters.created.get() + 1);
            Ok(TextureHandle(id))
        }

        fn create_texture_from_file(&mut self, name: &str, _path: &Path, desc: TextureDesc) -> Result<TextureHandle, GraphicsError> {
            self.create_texture(name, desc)
        }

        fn open_shared_texture(&mut self, name: &str, _shared_handle: u64, desc: TextureDesc) -> Result<TextureHandle, GraphicsError> {
            self.create_texture(name, desc)
        }

        fn destroy_texture(&mut self, tex: TextureHandle) {
            if self.live_textures.remove(&tex.0) {
                self.counters.destroyed.set(self.counters.destroyed.get() + 1);
            }
        }

        fn get_texture_srv(&self, tex: TextureHandle) -> Option<View> {
            let desc = self.descs.get(&tex.0)?;
            desc.views.contains(ViewFlags::SRV).then_some(View { texture: tex, kind: ViewKind::Srv })
        }

        fn get_texture_rtv(&self, tex: TextureHandle) -> Option<View> {
            let desc = self.descs.get(&tex.0)?;
            desc.views.contains(ViewFlags::RTV).then_some(View { texture: tex, kind: ViewKind::Rtv })
        }

        fn get_texture_uav(&self, tex: TextureHandle) -> Option<View> {
            let desc = self.descs.get(&tex.0)?;
            desc.views.contains(ViewFlags::UAV).then_some(View { texture: tex, kind: ViewKind::Uav })
        }

        fn get_texture_size(&self, tex: TextureHandle) -> Result<u64, GraphicsError> {
            let desc = self.descs.get(&tex.0).ok_or(GraphicsError::UnknownTexture)?;
            Ok((desc.size.width * desc.size.height * desc.format.bytes_per_pixel()) as u64)
        }

        fn copy_texture(&mut self, _src: TextureHandle, _dst: TextureHandle) -> Result<(), GraphicsError> {
            Ok(())
        }

        fn clear_rtv(&mut self, _rtv: View, _rgba: [f32; 4]) -> Result<(), GraphicsError> {
            Ok(())
        }

        fn draw_overlay(&mut self, _src: View, _dst: View, _options: OverlayOptions) -> Result<(), GraphicsError> {
            Ok(())
        }

        fn motion_sample(&mut self, _size: Size, _src: View, _dst: View, _weight: f32) -> Result<(), GraphicsError> {
            Ok(())
        }

        fn create_conversion_context(&mut self, name: &str, desc: ConversionDesc) -> Result<ConversionHandle, GraphicsError> {
            let plane_count = desc.format.plane_count();
            let mut planes = Vec::with_capacity(plane_count);
            for idx in 0..plane_count {
                let plane_id = self.alloc();
                self.live_textures.insert(plane_id);
                self.descs.insert(
                    plane_id,
                    TextureDesc {
                        size: desc.size,
                        format: PixelFormat::R8,
                        usage: TextureUsageKind::Default,
                        views: ViewFlags::RTV,
                        caps: CapFlags::DOWNLOADABLE,
                    },
                );
                self.counters.created.set(self.counters.created.get() + 1);
                let _ = (name, idx);
                planes.push(plane_id);
            }

            let id = self.alloc();
            self.conversions.insert(id, (desc, planes));
            Ok(ConversionHandle(id))
        }

        fn convert_pixel_formats(&mut self, _src: View, _ctx: ConversionHandle) -> Result<Vec<TextureHandle>, GraphicsError> {
            Ok(Vec::new())
        }

        fn get_conversion_texture_count(&self, ctx: ConversionHandle) -> Result<usize, GraphicsError> {
            Ok(self.conversions.get(&ctx.0).ok_or(GraphicsError::UnknownConversion)?.0.format.plane_count())
        }

        fn get_conversion_sizes(&self, ctx: ConversionHandle) -> Result<Vec<usize>, GraphicsError> {
            let (desc, _) = self.conversions.get(&ctx.0).ok_or(GraphicsError::UnknownConversion)?;
            Ok(desc.format.plane_sizes(desc.size).to_vec())
        }

        fn destroy_conversion_context(&mut self, ctx: ConversionHandle) {
            if let Some((_, planes)) = self.conversions.remove(&ctx.0) {
                for plane_id in planes {
                    if self.live_textures.remove(&plane_id) {
                        self.counters.destroyed.set(self.counters.destroyed.get() + 1);
                    }
                }
            }
        }

        fn download_texture(&mut self, _tex: TextureHandle, _dst: &mut [u8]) -> Result<(), GraphicsError> {
            Ok(())
        }

        fn create_text_format(&mut self, _name: &str, _target_tex: TextureHandle, desc: TextFormatDesc) -> Result<TextFormatHandle, GraphicsError> {
            if self.fail_text_format {
                return Err(GraphicsError::FontNotFound(desc.font_family));
            }
            let id = self.alloc();
            self.text_formats.insert(id);
            Ok(TextFormatHandle(id))
        }

        fn draw_text(&mut self, fmt: TextFormatHandle, _text: &str, _rect: Rect) -> Result<(), GraphicsError> {
            if self.text_formats.contains(&fmt.0) { Ok(()) } else { Err(GraphicsError::UnknownTextFormat) }
        }

        fn draw_glyph_run(&mut self, fmt: TextFormatHandle, _glyph_ids: &[u16], _advances: &[f32], _origin: (f32, f32)) -> Result<(), GraphicsError> {
            if self.text_formats.contains(&fmt.0) { Ok(()) } else { Err(GraphicsError::UnknownTextFormat) }
        }

        fn destroy_text_format(&mut self, fmt: TextFormatHandle) {
            self.text_formats.remove(&fmt.0);
        }

        fn flush(&mut self) {}

        fn motion_blur_capable(&self) -> bool {
            self.motion_blur_capable
        }
    }

    #[derive(Clone, Default)]
    struct BridgeCounters {
        new_video: Arc<AtomicU64>,
        new_audio: Arc<AtomicU64>,
        total_audio_samples: Arc<AtomicU64>,
        stops: Arc<AtomicU64>,
    }

    impl BridgeCounters {
        fn get(counter: &AtomicU64) -> u64 {
            counter.load(Ordering::Relaxed)
        }
    }

    struct FakeBridge {
        counters: BridgeCounters,
    }

    impl FakeBridge {
        fn new() -> (Self, BridgeCounters) {
            let counters = BridgeCounters::default();
            (Self { counters: counters.clone() }, counters)
        }
    }

    impl EncoderChannel for FakeBridge {
        fn start(&mut self, _game_texture_handle: u32, _params: &MovieStartParams) -> Result<(), BridgeError> {
            Ok(())
        }

        fn send_video(&mut self) -> Result<(), BridgeError> {
            self.counters.new_video.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn send_audio(&mut self, samples: &[WaveSample]) -> Result<(), BridgeError> {
            for chunk in framecap_bridge::fragment_audio(samples) {
                self.counters.new_audio.fetch_add(1, Ordering::Relaxed);
                self.counters.total_audio_samples.fetch_add(chunk.len() as u64, Ordering::Relaxed);
            }
            Ok(())
        }

        fn stop(&mut self) {
            self.counters.stops.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct FakeHost {
        signon: Rc<Cell<SignonState>>,
        paint_time: Cell<i64>,
        real_time_micros: Cell<i64>,
        frame_micros: i64,
        game_rate: Cell<u32>,
        has_cfgs: bool,
        autostop_capable: bool,
    }

    impl FakeHost {
        fn new() -> Self {
            Self {
                signon: Rc::new(Cell::new(SignonState::Full)),
                paint_time: Cell::new(0),
                real_time_micros: Cell::new(0),
                frame_micros: 1_000_000 / 60,
                game_rate: Cell::new(60),
                has_cfgs: true,
                autostop_capable: true,
            }
        }

        fn advance_real_time(&self) {
            self.real_time_micros.set(self.real_time_micros.get() + self.frame_micros);
        }
    }

    impl Host for FakeHost {
        fn supports_autostop(&self) -> bool {
            self.autostop_capable
        }

        fn signon_state(&self) -> SignonState {
            self.signon.get()
        }

        fn paint_time(&self) -> i64 {
            self.paint_time.get()
        }

        fn mix_audio(&mut self, aligned_end: i64) -> Vec<WaveSample> {
            let start = self.paint_time.get();
            let count = (aligned_end - start).max(0) as usize;
            self.paint_time.set(aligned_end);
            vec![WaveSample { left: 0, right: 0 }; count]
        }

        fn has_cfg(&self, _name: &str) -> bool {
            self.has_cfgs
        }

        fn run_cfgs_for_event(&mut self, _event: &str) {}

        fn set_host_framerate(&mut self, rate: u32) {
            self.game_rate.set(rate);
        }

        fn console_msg(&mut self, _message: &str) {}

        fn real_time_micros(&self) -> i64 {
            self.real_time_micros.get()
        }

        fn update_window(&mut self) {
            self.advance_real_time();
        }

        fn reset_window(&mut self) {}
    }

    /// The game's own render target SRV (host-owned, never created or
    /// destroyed through the facade's backend) — fabricated directly rather
    /// than routed through `FakeGraphics::create_texture` so the per-test
    /// resource-balance assertions only see what `Core` itself allocates.
    fn start_data() -> StartData {
        StartData {
            game_srv: View { texture: TextureHandle(u64::MAX), kind: ViewKind::Srv },
            size: Size::new(64, 64),
            audio: AudioStreamDescription { channels: 2, sample_rate: 44_100, bits: 16 },
        }
    }

    fn write_profile(dir: &Path, name: &str, contents: &str) {
        let path = dir.join("data").join("profiles").join(format!("{name}.ini"));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    struct ScratchDir(PathBuf);

    impl ScratchDir {
        fn new() -> Self {
            static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
            let path = std::env::temp_dir().join(format!(
                "framecap-core-test-{}-{}",
                std::process::id(),
                COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            ));
            std::fs::create_dir_all(&path).unwrap();
            Self(path)
        }
    }

    impl Drop for ScratchDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    /// Scenario 1: plain 60fps recording, no motion blur/overlay/audio.
    /// 120 host frames should submit exactly 120 NEW_VIDEO and 0 NEW_AUDIO.
    #[test]
    fn scenario_plain_recording_emits_one_frame_per_host_frame() {
        let dir = ScratchDir::new();
        write_profile(&dir.0, "default", "video_fps=60\n");

        let (graphics, graphics_counters) = FakeGraphics::new();
        let data = start_data();
        let (bridge, bridge_counters) = FakeBridge::new();
        let host = FakeHost::new();

        let mut core = Core::new(dir.0.clone(), Box::new(host), Box::new(graphics), Box::new(bridge));
        assert!(core.start_movie("test.mp4", data));

        for _ in 0..120 {
            core.frame();
        }
        core.stop();

        assert_eq!(core.scheduler_state(), RecordingState::Stopped);
        assert_eq!(BridgeCounters::get(&bridge_counters.new_video), 120);
        assert_eq!(BridgeCounters::get(&bridge_counters.new_audio), 0);
        assert!(graphics_counters.balanced());
    }

    /// Scenario 2: motion blur with multiplier=16, exposure=0.5 should
    /// emit exactly one frame per 16 sample ticks.
    #[test]
    fn scenario_motion_blur_emits_one_frame_per_multiplier_ticks() {
        let dir = ScratchDir::new();
        write_profile(&dir.0, "default", "video_fps=60\nmotion_blur_enabled=0\n");
        write_profile(
            &dir.0,
            "blur60",
            "video_fps=60\nmotion_blur_enabled=1\nmotion_blur_fps_mult=16\nmotion_blur_exposure=0.5\n",
        );

        let (graphics, graphics_counters) = FakeGraphics::new();
        let data = start_data();
        let (bridge, bridge_counters) = FakeBridge::new();
        let host = FakeHost::new();

        let mut core = Core::new(dir.0.clone(), Box::new(host), Box::new(graphics), Box::new(bridge));
        assert!(core.start_movie("blur.mkv profile=blur60", data));
        assert_eq!(core.get_game_rate(), 960);

        for _ in 0..960 {
            core.frame();
        }
        core.stop();

        assert_eq!(BridgeCounters::get(&bridge_counters.new_video), 60);
        assert!(graphics_counters.balanced());
    }

    /// Scenario 3: timeout=2s at 60fps auto-ends after 120 frames even
    /// though the host keeps calling `frame()` past that point.
    #[test]
    fn scenario_timeout_auto_ends_recording() {
        let dir = ScratchDir::new();
        write_profile(&dir.0, "default", "video_fps=60\n");

        let (graphics, graphics_counters) = FakeGraphics::new();
        let data = start_data();
        let (bridge, bridge_counters) = FakeBridge::new();
        let host = FakeHost::new();

        let mut core = Core::new(dir.0.clone(), Box::new(host), Box::new(graphics), Box::new(bridge));
        assert!(core.start_movie("s.mov timeout=2", data));

        for _ in 0..240 {
            core.frame();
        }

        assert_eq!(core.scheduler_state(), RecordingState::Stopped);
        assert_eq!(BridgeCounters::get(&bridge_counters.new_video), 120);
        assert_eq!(BridgeCounters::get(&bridge_counters.stops), 1);
        assert!(graphics_counters.balanced());
    }

    /// Scenario 4: `autostop=0` keeps the recording alive across a
    /// disconnect/reconnect instead of ending it.
    #[test]
    fn scenario_autostop_disabled_survives_disconnect() {
        let dir = ScratchDir::new();
        write_profile(&dir.0, "default", "video_fps=60\n");

        let (graphics, _graphics_counters) = FakeGraphics::new();
        let data = start_data();
        let (bridge, bridge_counters) = FakeBridge::new();
        let host = FakeHost::new();
        let signon = host.signon.clone();

        let mut core = Core::new(dir.0.clone(), Box::new(host), Box::new(graphics), Box::new(bridge));
        assert!(core.start_movie("x.mp4 autostop=0", data));

        for _ in 0..30 {
            core.frame();
        }
        assert_eq!(core.scheduler_state(), RecordingState::Possible);

        signon.set(SignonState::None);
        core.frame();
        assert_eq!(core.scheduler_state(), RecordingState::Waiting);
        assert_eq!(BridgeCounters::get(&bridge_counters.stops), 0);

        signon.set(SignonState::Full);
        for _ in 0..30 {
            core.frame();
        }
        assert_eq!(core.scheduler_state(), RecordingState::Possible);
        assert_eq!(BridgeCounters::get(&bridge_counters.new_video), 60);
        assert_eq!(BridgeCounters::get(&bridge_counters.stops), 0);
    }

    /// Scenario 5: with audio enabled, ~44100 samples should be
    /// submitted over one second (60 frames) of recording, within ±3.
    #[test]
    fn scenario_audio_enabled_submits_one_second_of_samples() {
        let dir = ScratchDir::new();
        write_profile(&dir.0, "default", "video_fps=60\n");
        write_profile(&dir.0, "with_audio", "video_fps=60\naudio_enabled=1\n");

        let (graphics, graphics_counters) = FakeGraphics::new();
        let data = start_data();
        let (bridge, bridge_counters) = FakeBridge::new();
        let host = FakeHost::new();

        let mut core = Core::new(dir.0.clone(), Box::new(host), Box::new(graphics), Box::new(bridge));
        assert!(core.start_movie("audio.mp4 profile=with_audio", data));
        assert!(core.is_audio_enabled());

        for _ in 0..60 {
            core.frame();
        }
        core.stop();

        let total_samples = BridgeCounters::get(&bridge_counters.total_audio_samples);
        assert!((total_samples as i64 - 44_100).abs() <= 3, "total samples was {total_samples}");
        assert!(graphics_counters.balanced());
    }

    /// Scenario 6: a disallowed extension is rejected with no state
    /// change and the core stays stopped.
    #[test]
    fn scenario_bad_extension_is_rejected() {
        let dir = ScratchDir::new();
        write_profile(&dir.0, "default", "video_fps=60\n");

        let (graphics, _graphics_counters) = FakeGraphics::new();
        let data = start_data();
        let (bridge, bridge_counters) = FakeBridge::new();
        let host = FakeHost::new();

        let mut core = Core::new(dir.0.clone(), Box::new(host), Box::new(graphics), Box::new(bridge));
        assert!(!core.start_movie("bad.avi", data));
        assert_eq!(core.scheduler_state(), RecordingState::Stopped);
        assert_eq!(BridgeCounters::get(&bridge_counters.new_video), 0);
    }

    /// : a font lookup failure disables the velocity overlay for this
    /// recording only; the recording itself still starts and runs frames.
    #[test]
    fn scenario_font_lookup_failure_disables_overlay_but_not_recording() {
        let dir = ScratchDir::new();
        write_profile(&dir.0, "default", "video_fps=60\nvelo_enabled=1\n");

        let (graphics, graphics_counters) = FakeGraphics::with_failing_text_format();
        let data = start_data();
        let (bridge, bridge_counters) = FakeBridge::new();
        let host = FakeHost::new();

        let mut core = Core::new(dir.0.clone(), Box::new(host), Box::new(graphics), Box::new(bridge));
        assert!(core.start_movie("test.mp4", data));
        assert!(!core.is_velo_enabled());

        for _ in 0..10 {
            core.frame();
        }
        core.stop();

        assert_eq!(BridgeCounters::get(&bridge_counters.new_video), 10);
        assert!(graphics_counters.balanced());
    }

    /// : a graphics backend lacking compute capability refuses the
    /// motion-blur path rather than silently producing garbage — the
    /// recording still runs, one frame per host frame, as if motion blur
    /// were disabled.
    #[test]
    fn scenario_motion_blur_refused_without_compute_capability() {
        let dir = ScratchDir::new();
        write_profile(&dir.0, "default", "video_fps=60\nmotion_blur_enabled=0\n");
        write_profile(
            &dir.0,
            "blur60",
            "video_fps=60\nmotion_blur_enabled=1\nmotion_blur_fps_mult=16\nmotion_blur_exposure=0.5\n",
        );

        let (graphics, graphics_counters) = FakeGraphics::without_motion_blur_capability();
        let data = start_data();
        let (bridge, bridge_counters) = FakeBridge::new();
        let host = FakeHost::new();

        let mut core = Core::new(dir.0.clone(), Box::new(host), Box::new(graphics), Box::new(bridge));
        assert!(core.start_movie("blur.mkv profile=blur60", data));
        // Capability-refused motion blur must collapse to the plain
        // `video.fps` path, exactly like `multiplier == 1`: the host is
        // never driven at the multiplied rate for sampling it can't do.
        assert_eq!(core.get_game_rate(), 60);

        for _ in 0..60 {
            core.frame();
        }
        core.stop();

        assert_eq!(BridgeCounters::get(&bridge_counters.new_video), 60);
        assert!(graphics_counters.balanced());
    }

    /// Invariant: after `stop`, every resource this facade allocated at
    /// `start_movie` (work tex, shared tex) has a matching destroy call.
    #[test]
    fn invariant_recording_resources_are_balanced_after_stop() {
        let dir = ScratchDir::new();
        write_profile(&dir.0, "default", "video_fps=60\n");

        let (graphics, graphics_counters) = FakeGraphics::new();
        let data = start_data();
        let (bridge, _bridge_counters) = FakeBridge::new();
        let host = FakeHost::new();

        let mut core = Core::new(dir.0.clone(), Box::new(host), Box::new(graphics), Box::new(bridge));
        assert!(core.start_movie("test.mp4", data));
        core.frame();
        core.stop();

        assert!(graphics_counters.balanced());
    }
}
