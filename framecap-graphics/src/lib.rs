//! Thin abstraction over a GPU API: textures, views, shader
//! dispatch, overlay blit, the motion-sample accumulation kernel, pixel
//! format conversion and a text rasterizer binding.
//!
//! One reference implementation is provided, [`wgpu_backend::WgpuBackend`],
//! targeting whichever native API `wgpu` selects for the host platform
//! (DX12 on Windows, Metal on macOS, Vulkan elsewhere).

pub mod shaders;
pub mod text;
pub mod wgpu_backend;

use framecap_common::{ColorSpace, PlanarPixelFormat, Size};

#[derive(Debug, thiserror::Error)]
pub enum GraphicsError {
    #[error("texture descriptor is invalid: {0}")]
    InvalidDesc(&'static str),
    #[error("gpu allocation failed")]
    AllocFailed,
    #[error("shared texture handle is stale or from an incompatible device")]
    ShareFailed,
    #[error("no adapter matching the requested backend was found")]
    NotFoundAdapter,
    #[error(transparent)]
    RequestDeviceError(#[from] wgpu::RequestDeviceError),
    #[error("unknown texture handle")]
    UnknownTexture,
    #[error("unknown conversion context handle")]
    UnknownConversion,
    #[error("unknown text format handle")]
    UnknownTextFormat,
    #[error("the requested view is not available for this texture")]
    ViewNotAvailable,
    #[error("texture does not have the downloadable capability")]
    NotDownloadable,
    #[error("font face lookup failed: {0}")]
    FontNotFound(String),
    #[error("motion sampling requires compute/storage-texture support, which this adapter lacks")]
    MissingComputeCapability,
}

/// How a texture is expected to be written to after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureUsageKind {
    /// Written by the GPU only (render target / compute output).
    Default,
    /// Written once at creation, read many times.
    Immutable,
    /// Written frequently from the CPU (`queue.write_texture`).
    Dynamic,
    /// CPU-readback mirror only; never sampled.
    Staging,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ViewFlags: u8 {
        const SRV = 0b001;
        const UAV = 0b010;
        const RTV = 0b100;
        const NONE = 0;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CapFlags: u8 {
        const DOWNLOADABLE = 0b001;
        const TEXT_TARGET = 0b010;
        const SHARED = 0b100;
        const NONE = 0;
    }
}

/// Logical pixel format of a texture resource (GPU Texture).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
    Rgba32Float,
    R8,
    Rg8,
}

impl PixelFormat {
    pub(crate) fn to_wgpu(self) -> wgpu::TextureFormat {
        match self {
            Self::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
            Self::Bgra8 => wgpu::TextureFormat::Bgra8Unorm,
            Self::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
            Self::R8 => wgpu::TextureFormat::R8Unorm,
            Self::Rg8 => wgpu::TextureFormat::Rg8Unorm,
        }
    }

    pub(crate) fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Rgba8 | Self::Bgra8 => 4,
            Self::Rgba32Float => 16,
            Self::R8 => 1,
            Self::Rg8 => 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TextureDesc {
    pub size: Size,
    pub format: PixelFormat,
    pub usage: TextureUsageKind,
    pub views: ViewFlags,
    pub caps: CapFlags,
}

impl TextureDesc {
    pub fn validate(&self) -> Result<(), GraphicsError> {
        if !self.size.is_valid() {
            return Err(GraphicsError::InvalidDesc("width/height must be >= 2"));
        }
        if self.views == ViewFlags::NONE {
            return Err(GraphicsError::InvalidDesc("at least one view flag is required"));
        }
        Ok(())
    }
}

/// Opaque per-resource key. The inner value is `pub` (rather than
/// `pub(crate)`) because [`GraphicsBackend`] is a trait other backends are
/// meant to implement ("one implementation is required"), and each
/// needs to mint its own handles the same way `WgpuBackend` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversionHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextFormatHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    Srv,
    Uav,
    Rtv,
}

/// Borrowed reference to a texture; never outlives the texture it names
/// ("COM reference counting on GPU resources").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct View {
    pub texture: TextureHandle,
    pub kind: ViewKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerKind {
    Point,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    Opaque,
    Alpha,
    Additive,
    NonPremul,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct OverlayOptions {
    pub rect: Rect,
    pub sampler: SamplerKind,
    pub blend: BlendMode,
}

#[derive(Debug, Clone, Copy)]
pub struct ConversionDesc {
    pub size: Size,
    pub format: PlanarPixelFormat,
    pub color_space: ColorSpace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontStyle {
    Normal,
    Italic,
    ExtraItalic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontWeight {
    Thin,
    ExtraLight,
    Light,
    SemiLight,
    Normal,
    Medium,
    SemiBold,
    Bold,
    ExtraBold,
    Black,
    ExtraBlack,
}

#[derive(Debug, Clone)]
pub struct TextFormatDesc {
    pub font_family: String,
    pub size: f32,
    pub color: [f32; 4],
    pub border_color: [f32; 4],
    pub border_size: f32,
    pub style: FontStyle,
    pub weight: FontWeight,
}

/// The GPU backend contract. One implementation, [`wgpu_backend::WgpuBackend`],
/// is provided; the trait itself stays platform-neutral so a different
/// backend could implement it without touching callers.
pub trait GraphicsBackend {
    fn create_texture(&mut self, name: &str, desc: TextureDesc) -> Result<TextureHandle, GraphicsError>;

    fn create_texture_from_file(
        &mut self,
        name: &str,
        path: &std::path::Path,
        desc: TextureDesc,
    ) -> Result<TextureHandle, GraphicsError>;

    /// Opens a cross-process-shared texture by its platform shared handle.
    fn open_shared_texture(
        &mut self,
        name: &str,
        shared_handle: u64,
        desc: TextureDesc,
    ) -> Result<TextureHandle, GraphicsError>;

    fn destroy_texture(&mut self, tex: TextureHandle);

    fn get_texture_srv(&self, tex: TextureHandle) -> Option<View>;
    fn get_texture_rtv(&self, tex: TextureHandle) -> Option<View>;
    fn get_texture_uav(&self, tex: TextureHandle) -> Option<View>;

    fn get_texture_size(&self, tex: TextureHandle) -> Result<u64, GraphicsError>;

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> Result<(), GraphicsError>;

    fn clear_rtv(&mut self, rtv: View, rgba: [f32; 4]) -> Result<(), GraphicsError>;

    fn draw_overlay(&mut self, src: View, dst: View, options: OverlayOptions) -> Result<(), GraphicsError>;

    /// `dst += src * weight`, executed as a compute dispatch.
    fn motion_sample(
        &mut self,
        size: Size,
        src: View,
        dst: View,
        weight: f32,
    ) -> Result<(), GraphicsError>;

    fn create_conversion_context(
        &mut self,
        name: &str,
        desc: ConversionDesc,
    ) -> Result<ConversionHandle, GraphicsError>;

    /// Writes up to three planar textures and returns their handles in
    /// plane order.
    fn convert_pixel_formats(
        &mut self,
        src: View,
        ctx: ConversionHandle,
    ) -> Result<Vec<TextureHandle>, GraphicsError>;

    fn get_conversion_texture_count(&self, ctx: ConversionHandle) -> Result<usize, GraphicsError>;
    fn get_conversion_sizes(&self, ctx: ConversionHandle) -> Result<Vec<usize>, GraphicsError>;

    /// Releases the conversion context's plane textures. Bound to the
    /// recording that created it; called at recording end.
    fn destroy_conversion_context(&mut self, ctx: ConversionHandle);

    fn download_texture(&mut self, tex: TextureHandle, dst: &mut [u8]) -> Result<(), GraphicsError>;

    fn create_text_format(
        &mut self,
        name: &str,
        target_tex: TextureHandle,
        desc: TextFormatDesc,
    ) -> Result<TextFormatHandle, GraphicsError>;

    fn draw_text(
        &mut self,
        fmt: TextFormatHandle,
        text: &str,
        rect: Rect,
    ) -> Result<(), GraphicsError>;

    /// Tabular glyph-run draw used by the velocity overlay: every
    /// glyph advances by a caller-supplied amount rather than its natural
    /// metric, so consecutive frames never jitter horizontally.
    fn draw_glyph_run(
        &mut self,
        fmt: TextFormatHandle,
        glyph_ids: &[u16],
        advances: &[f32],
        origin: (f32, f32),
    ) -> Result<(), GraphicsError>;

    fn destroy_text_format(&mut self, fmt: TextFormatHandle);

    /// Mandatory before signaling NEW_VIDEO: ensures every GPU write
    /// to the shared texture is visible to the encoder process.
    fn flush(&mut self);

    /// Whether this backend's adapter supports the read-write storage
    /// textures `motion_sample` dispatches against. Probed once at
    /// construction; `Core` checks this before enabling motion blur for a
    /// recording and `motion_sample` refuses to run without it.
    fn motion_blur_capable(&self) -> bool;
}
