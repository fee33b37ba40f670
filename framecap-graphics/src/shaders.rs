//! WGSL sources for the fixed set of GPU kernels the backend needs. The
//! per-pixel-format conversion shaders follow the same structure as the
//! teacher's `Texture2DSample` fragment shaders (sample N textures, emit
//! one `vec4<f32>`), generalized to accept a runtime colour matrix instead
//! of a hardcoded BT.709 one.

use std::borrow::Cow;

use wgpu::{ShaderModuleDescriptor, ShaderSource};

pub const OVERLAY_BLIT: &str = r#"
@group(0) @binding(0) var src_texture: texture_2d<f32>;
@group(0) @binding(1) var src_sampler: sampler;

@fragment fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(src_texture, src_sampler, uv);
}
"#;

/// `dst += src * weight` (`motion_sample`, ). `weight` is passed
/// as a push constant-equivalent uniform since it changes every sample
/// tick.
pub const MOTION_SAMPLE: &str = r#"
struct Params {
    weight: f32,
};

@group(0) @binding(0) var src_texture: texture_2d<f32>;
@group(0) @binding(1) var dst_texture: texture_storage_2d<rgba32float, read_write>;
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let size = textureDimensions(dst_texture);
    if gid.x >= size.x || gid.y >= size.y {
        return;
    }

    let coord = vec2<i32>(i32(gid.x), i32(gid.y));
    let src = textureLoad(src_texture, coord, 0);
    let dst = textureLoad(dst_texture, coord);
    textureStore(dst_texture, coord, dst + src * params.weight);
}
"#;

/// RGB -> planar conversion fragment shader. The 3x3 colour matrix and
/// luma offset are uploaded as a uniform so one shader module serves
/// RGB/BT.601/BT.709 alike ("standard BT.601 and BT.709 matrices").
/// Writes the Y (or packed BGR0) plane; `conversion_plane.rs` in the wgpu
/// backend binds a second pass with `CHROMA` defined for the U/V planes.
pub const CONVERT_LUMA: &str = r#"
struct ColorMatrix {
    row0: vec3<f32>,
    row1: vec3<f32>,
    row2: vec3<f32>,
    offset: f32,
};

@group(0) @binding(0) var src_texture: texture_2d<f32>;
@group(0) @binding(1) var src_sampler: sampler;
@group(0) @binding(2) var<uniform> mat: ColorMatrix;

@fragment fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let rgb = textureSample(src_texture, src_sampler, uv).rgb;
    let y = dot(mat.row0, rgb) + mat.offset;
    return vec4<f32>(y, y, y, 1.0);
}
"#;

pub const CONVERT_CHROMA: &str = r#"
struct ColorMatrix {
    row0: vec3<f32>,
    row1: vec3<f32>,
    row2: vec3<f32>,
    offset: f32,
};

@group(0) @binding(0) var src_texture: texture_2d<f32>;
@group(0) @binding(1) var src_sampler: sampler;
@group(0) @binding(2) var<uniform> mat: ColorMatrix;

@fragment fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec2<f32> {
    let rgb = textureSample(src_texture, src_sampler, uv).rgb;
    let u = dot(mat.row1, rgb) + 0.5;
    let v = dot(mat.row2, rgb) + 0.5;
    return vec2<f32>(u, v);
}
"#;

/// Straight passthrough used for the identity (RGB destination) path.
pub const CONVERT_IDENTITY: &str = r#"
@group(0) @binding(0) var src_texture: texture_2d<f32>;
@group(0) @binding(1) var src_sampler: sampler;

@fragment fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(src_texture, src_sampler, uv);
}
"#;

/// Blits a pre-rasterized glyph coverage mask (from [`crate::text`]) onto
/// the target texture, tinted by fill/border colour (overlay draw).
pub const GLYPH_BLIT: &str = r#"
@group(0) @binding(0) var mask_texture: texture_2d<f32>;
@group(0) @binding(1) var mask_sampler: sampler;

@fragment fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(mask_texture, mask_sampler, uv);
}
"#;

pub(crate) fn module(source: &'static str) -> ShaderModuleDescriptor<'static> {
    ShaderModuleDescriptor {
        label: None,
        source: ShaderSource::Wgsl(Cow::Borrowed(source)),
    }
}
