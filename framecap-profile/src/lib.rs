//! Movie profile: the in-memory, typed representation of one recording's
//! settings (Profile, ). Loaded from a keyed ini-style text file
//! rooted at `<resource_path>/data/profiles/<name>.ini`; any key missing
//! from the named profile falls back to `data/profiles/default.ini`, which
//! must itself supply every known key ("a profile is complete if
//! every known key has a value").
//!
//! Grounded on `proc_profile.cpp`/`proc_profile_opts.cpp`/`proc_state.h`
//! (`MovieProfile`); the enum `FromStr`/`ToString` pattern follows
//! `common/src/codec.rs`'s `VideoEncoderType`.

mod opts;

use std::path::{Path, PathBuf};
use std::str::FromStr;

use framecap_common::{ColorSpace, PlanarPixelFormat};
use ini::Ini;

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("could not load mandatory default profile at {0}: {1}")]
    MissingDefaultProfile(PathBuf, ini::Error),
}

macro_rules! str_enum {
    ($name:ident { $($variant:ident => $spelling:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl ToString for $name {
            fn to_string(&self) -> String {
                match self {
                    $(Self::$variant => $spelling),+
                }.to_string()
            }
        }

        impl FromStr for $name {
            type Err = ();

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Ok(match value {
                    $($spelling => Self::$variant,)+
                    _ => return Err(()),
                })
            }
        }
    };
}

str_enum!(VideoEncoder {
    LibX264 => "libx264",
    LibX264444 => "libx264_444",
    Dnxhr => "dnxhr",
});

str_enum!(AudioEncoder {
    Aac => "aac",
});

str_enum!(X264Preset {
    UltraFast => "ultrafast",
    SuperFast => "superfast",
    VeryFast => "veryfast",
    Faster => "faster",
    Fast => "fast",
    Medium => "medium",
    Slow => "slow",
    Slower => "slower",
    VerySlow => "veryslow",
    Placebo => "placebo",
});

str_enum!(DnxhrProfile {
    Lb => "lb",
    Sq => "sq",
    Hq => "hq",
});

str_enum!(FontWeight {
    Thin => "thin",
    ExtraLight => "extralight",
    Light => "light",
    SemiLight => "semilight",
    Normal => "normal",
    Medium => "medium",
    SemiBold => "semibold",
    Bold => "bold",
    ExtraBold => "extrabold",
    Black => "black",
    ExtraBlack => "extrablack",
});

str_enum!(FontStyle {
    Normal => "normal",
    Italic => "italic",
    ExtraItalic => "extraitalic",
});

str_enum!(VeloAnchor {
    Left => "left",
    Center => "center",
    Right => "right",
});

str_enum!(VeloLength {
    Xy => "xy",
    Xyz => "xyz",
    Z => "z",
});

#[derive(Debug, Clone)]
pub struct VideoSettings {
    pub fps: u32,
    pub encoder: VideoEncoder,
    pub pixel_format: PlanarPixelFormat,
    pub color_space: ColorSpace,
    pub x264_crf: u32,
    pub x264_preset: X264Preset,
    pub x264_intra: bool,
    pub dnxhr_profile: DnxhrProfile,
    pub threads: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct MotionBlurSettings {
    pub enabled: bool,
    pub multiplier: u32,
    pub exposure: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct AudioSettings {
    pub enabled: bool,
    pub encoder: AudioEncoder,
}

#[derive(Debug, Clone)]
pub struct OverlaySettings {
    pub enabled: bool,
    pub font_path: String,
    pub font_size: u32,
    pub color: [u8; 4],
    pub border_color: [u8; 4],
    pub border_size: u32,
    pub style: FontStyle,
    pub weight: FontWeight,
    pub align: (i32, i32),
    pub anchor: VeloAnchor,
    pub length_mode: VeloLength,
}

/// Immutable snapshot of a recording's settings (Profile).
#[derive(Debug, Clone)]
pub struct Profile {
    pub video: VideoSettings,
    pub motion_blur: MotionBlurSettings,
    pub audio: AudioSettings,
    pub overlay: OverlaySettings,
}

impl Profile {
    /// The synthetic rate the host must be driven at once this profile is
    /// active (invariant: `video.fps * motion_blur.multiplier` equals
    /// the applied game rate).
    pub fn game_rate(&self) -> u32 {
        if self.motion_blur.enabled {
            self.video.fps * self.motion_blur.multiplier.max(1)
        } else {
            self.video.fps
        }
    }

    /// Loads `<resource_path>/data/profiles/<name>.ini`, falling back to
    /// `data/profiles/default.ini` for any key the named profile omits.
    /// `default.ini` itself is mandatory.
    pub fn load(resource_path: &Path, name: &str) -> Result<Profile, ProfileError> {
        let default_path = profiles_dir(resource_path).join("default.ini");
        let default_ini = Ini::load_from_file(&default_path)
            .map_err(|e| ProfileError::MissingDefaultProfile(default_path.clone(), e))?;

        let named_ini = if name == "default" {
            None
        } else {
            let path = profiles_dir(resource_path).join(format!("{name}.ini"));
            match Ini::load_from_file(&path) {
                Ok(ini) => Some(ini),
                Err(e) => {
                    log::warn!(
                        "could not load profile {name:?} at {}: {e}; falling back to default profile",
                        path.display()
                    );
                    None
                }
            }
        };

        let lookup = |key: &str| -> Option<String> {
            named_ini
                .as_ref()
                .and_then(|ini| ini.general_section().get(key))
                .or_else(|| default_ini.general_section().get(key))
                .map(str::to_string)
        };

        Ok(build_profile(&lookup))
    }
}

fn profiles_dir(resource_path: &Path) -> PathBuf {
    resource_path.join("data").join("profiles")
}

fn build_profile(lookup: &dyn Fn(&str) -> Option<String>) -> Profile {
    let get = |key: &str| lookup(key);

    let video = VideoSettings {
        fps: opts::int_in_range("video_fps", get("video_fps").as_deref(), 1, 1000, 60) as u32,
        encoder: opts::enum_or("video_encoder", get("video_encoder").as_deref(), VideoEncoder::LibX264),
        pixel_format: opts::enum_or("video_pixel_format", get("video_pixel_format").as_deref(), PlanarPixelFormat::Bgr0),
        color_space: opts::enum_or("video_color_space", get("video_color_space").as_deref(), ColorSpace::Rgb),
        x264_crf: opts::int_in_range("video_x264_crf", get("video_x264_crf").as_deref(), 0, 52, 23) as u32,
        x264_preset: opts::enum_or("video_x264_preset", get("video_x264_preset").as_deref(), X264Preset::Medium),
        x264_intra: opts::bool_or("video_x264_intra", get("video_x264_intra").as_deref(), false),
        dnxhr_profile: opts::enum_or("video_dnxhr_profile", get("video_dnxhr_profile").as_deref(), DnxhrProfile::Sq),
        threads: opts::int_in_range("video_threads", get("video_threads").as_deref(), 0, 64, 0) as u32,
    };

    let motion_blur = MotionBlurSettings {
        enabled: opts::bool_or("motion_blur_enabled", get("motion_blur_enabled").as_deref(), false),
        multiplier: opts::int_in_range("motion_blur_fps_mult", get("motion_blur_fps_mult").as_deref(), 2, i32::MAX as i64, 4) as u32,
        exposure: opts::float_in_range("motion_blur_exposure", get("motion_blur_exposure").as_deref(), 0.0, 1.0, 0.5),
    };

    let audio = AudioSettings {
        enabled: opts::bool_or("audio_enabled", get("audio_enabled").as_deref(), false),
        encoder: opts::enum_or("audio_encoder", get("audio_encoder").as_deref(), AudioEncoder::Aac),
    };

    let overlay = OverlaySettings {
        enabled: opts::bool_or("velo_enabled", get("velo_enabled").as_deref(), false),
        font_path: opts::string_or(get("velo_font").as_deref(), ""),
        font_size: opts::int_in_range("velo_font_size", get("velo_font_size").as_deref(), 16, 192, 24) as u32,
        color: opts::color_or("velo_color", get("velo_color").as_deref(), [255, 255, 255, 255]),
        border_color: opts::color_or("velo_border_color", get("velo_border_color").as_deref(), [0, 0, 0, 255]),
        border_size: opts::int_in_range("velo_border_size", get("velo_border_size").as_deref(), 0, 192, 0) as u32,
        style: opts::enum_or("velo_font_style", get("velo_font_style").as_deref(), FontStyle::Normal),
        weight: opts::enum_or("velo_font_weight", get("velo_font_weight").as_deref(), FontWeight::Normal),
        align: opts::vec2_or("velo_align", get("velo_align").as_deref(), (0, 0)),
        anchor: opts::enum_or("velo_anchor", get("velo_anchor").as_deref(), VeloAnchor::Center),
        length_mode: opts::enum_or("velo_length", get("velo_length").as_deref(), VeloLength::Xy),
    };

    Profile { video, motion_blur, audio, overlay }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_ini(dir: &Path, name: &str, contents: &str) {
        let path = profiles_dir(dir).join(format!("{name}.ini"));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn missing_default_profile_is_an_error() {
        let dir = tempdir();
        let err = Profile::load(dir.path(), "default");
        assert!(err.is_err());
    }

    #[test]
    fn named_profile_falls_back_to_default_for_missing_keys() {
        let dir = tempdir();
        write_ini(dir.path(), "default", "video_fps=60\nmotion_blur_enabled=0\n");
        write_ini(dir.path(), "blur60", "motion_blur_enabled=1\nmotion_blur_fps_mult=16\nmotion_blur_exposure=0.5\n");

        let profile = Profile::load(dir.path(), "blur60").unwrap();
        assert_eq!(profile.video.fps, 60); // inherited from default
        assert!(profile.motion_blur.enabled);
        assert_eq!(profile.motion_blur.multiplier, 16);
        assert_eq!(profile.game_rate(), 960);
    }

    #[test]
    fn out_of_range_crf_is_clamped_not_rejected() {
        let dir = tempdir();
        write_ini(dir.path(), "default", "video_x264_crf=999\n");

        let profile = Profile::load(dir.path(), "default").unwrap();
        assert_eq!(profile.video.x264_crf, 52);
    }

    #[test]
    fn unknown_enum_value_falls_back_to_default_spelling() {
        let dir = tempdir();
        write_ini(dir.path(), "default", "video_pixel_format=not_a_format\n");

        let profile = Profile::load(dir.path(), "default").unwrap();
        assert_eq!(profile.video.pixel_format, PlanarPixelFormat::Bgr0);
    }

    #[test]
    fn enum_round_trips_through_its_canonical_spelling() {
        for encoder in [VideoEncoder::LibX264, VideoEncoder::LibX264444, VideoEncoder::Dnxhr] {
            let spelling = encoder.to_string();
            assert_eq!(VideoEncoder::from_str(&spelling).unwrap(), encoder);
        }
    }

    /// Minimal scratch-directory helper; avoids pulling in a `tempfile`
    /// dependency this crate does not otherwise need.
    fn tempdir() -> ScratchDir {
        ScratchDir::new()
    }

    struct ScratchDir(PathBuf);

    impl ScratchDir {
        fn new() -> Self {
            let path = std::env::temp_dir().join(format!(
                "framecap-profile-test-{}-{}",
                std::process::id(),
                ADDR.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            ));
            std::fs::create_dir_all(&path).unwrap();
            Self(path)
        }

        fn path(&self) -> &Path {
            &self.0
        }
    }

    static ADDR: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

    impl Drop for ScratchDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }
}
