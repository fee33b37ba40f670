pub mod logger;

#[cfg(target_os = "windows")]
pub mod win32;

/// Width/height pair used for every texture, conversion plane and overlay
/// rect in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// boundary behavior: a 1x1 video dimension is rejected.
    pub fn is_valid(&self) -> bool {
        self.width >= 2 && self.height >= 2
    }
}

/// Planar destination pixel format produced by the conversion stage (
/// `video_pixel_format`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlanarPixelFormat {
    Bgr0,
    Yuv420,
    Nv12,
    Nv21,
    Yuv444,
}

impl PlanarPixelFormat {
    /// Number of output planes written by `convert_pixel_formats`.
    pub const fn plane_count(&self) -> usize {
        match self {
            Self::Bgr0 => 1,
            Self::Yuv420 => 3,
            Self::Nv12 | Self::Nv21 => 2,
            Self::Yuv444 => 3,
        }
    }

    /// Byte size of each plane for a frame of the given dimensions.
    pub fn plane_sizes(&self, size: Size) -> smallvec::SmallVec<[usize; 3]> {
        let luma = (size.width * size.height) as usize;
        let chroma_half = ((size.width / 2).max(1) * (size.height / 2).max(1)) as usize;
        match self {
            Self::Bgr0 => smallvec::smallvec![luma * 4],
            Self::Yuv420 => smallvec::smallvec![luma, chroma_half, chroma_half],
            Self::Nv12 | Self::Nv21 => smallvec::smallvec![luma, chroma_half * 2],
            Self::Yuv444 => smallvec::smallvec![luma, luma, luma],
        }
    }
}

impl ToString for PlanarPixelFormat {
    fn to_string(&self) -> String {
        match self {
            Self::Bgr0 => "bgr0",
            Self::Yuv420 => "yuv420",
            Self::Nv12 => "nv12",
            Self::Nv21 => "nv21",
            Self::Yuv444 => "yuv444",
        }
        .to_string()
    }
}

impl std::str::FromStr for PlanarPixelFormat {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "bgr0" => Self::Bgr0,
            "yuv420" => Self::Yuv420,
            "nv12" => Self::Nv12,
            "nv21" => Self::Nv21,
            "yuv444" => Self::Yuv444,
            _ => return Err(()),
        })
    }
}

/// Destination color space (`convert_pixel_formats`, 
/// `video_color_space`). `Rgb` means the identity transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    Rgb,
    Bt601,
    Bt709,
}

impl ColorSpace {
    /// The 3x3 RGB -> YUV matrix rows (row-major) used by the conversion
    /// shaders, and the offset applied to the luma channel.
    pub const fn matrix(&self) -> ([[f32; 3]; 3], f32) {
        match self {
            Self::Rgb => (
                [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
                0.0,
            ),
            Self::Bt601 => (
                [
                    [0.299, 0.587, 0.114],
                    [-0.168736, -0.331264, 0.5],
                    [0.5, -0.418688, -0.081312],
                ],
                0.0625,
            ),
            Self::Bt709 => (
                [
                    [0.2126, 0.7152, 0.0722],
                    [-0.1146, -0.3854, 0.5],
                    [0.5, -0.4542, -0.0458],
                ],
                0.0625,
            ),
        }
    }
}

impl ToString for ColorSpace {
    fn to_string(&self) -> String {
        match self {
            Self::Rgb => "rgb",
            Self::Bt601 => "601",
            Self::Bt709 => "709",
        }
        .to_string()
    }
}

impl std::str::FromStr for ColorSpace {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "rgb" => Self::Rgb,
            "601" => Self::Bt601,
            "709" => Self::Bt709,
            _ => return Err(()),
        })
    }
}

/// A single interleaved stereo PCM sample pair (Wave Sample).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct WaveSample {
    pub left: i16,
    pub right: i16,
}

/// Parameters the host hands over at `start_movie` describing the audio it
/// will generate (`start_data`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioStreamDescription {
    pub channels: u32,
    pub sample_rate: u32,
    pub bits: u32,
}

impl Default for AudioStreamDescription {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: 44100,
            bits: 16,
        }
    }
}
