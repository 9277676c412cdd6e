//! Lazily allocated offscreen targets owned by the renderer.
//!
//! Each slot is allocated on first use and reallocated when the requested
//! size changes; an unchanged request returns the existing target.

use bevy::log::info;
use bevy::math::UVec2;
use wgpu::TextureFormat;

use crate::gpu::{GraphicsContext, RenderTarget, RenderTargetDescriptor};

/// Packed albedo, packed normal + material extra, third extra channel.
pub const GBUFFER_COLOR_FORMATS: [TextureFormat; 3] = [
    TextureFormat::Rgba16Float,
    TextureFormat::Rgba16Float,
    TextureFormat::Rgba16Float,
];
pub const GBUFFER_DEPTH_FORMAT: TextureFormat = TextureFormat::Depth24PlusStencil8;
pub const SHADOW_DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;
pub const SSAO_FORMAT: TextureFormat = TextureFormat::R8Unorm;
pub const ILLUMINATION_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const CAPTURE_FORMAT: TextureFormat = TextureFormat::Rgba32Float;
pub const CAPTURE_DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Every offscreen target slot the renderer owns.
#[derive(Default)]
pub struct FrameTargets {
    pub gbuffer: Option<RenderTarget>,
    pub ssao: Option<RenderTarget>,
    pub ssao_blur: Option<RenderTarget>,
    pub illumination: Option<RenderTarget>,
    pub volumetric: Option<RenderTarget>,
    pub planar: Option<RenderTarget>,
    pub irradiance_capture: Option<RenderTarget>,
    pub reflection_capture: Option<RenderTarget>,
}

/// Return the target in `slot`, (re)allocating it if absent or resized.
pub fn ensure_allocated(
    ctx: &mut dyn GraphicsContext,
    slot: &mut Option<RenderTarget>,
    desc: &RenderTargetDescriptor,
) -> RenderTarget {
    if let Some(existing) = slot.as_ref() {
        if existing.size == desc.size {
            return existing.clone();
        }
    }

    if let Some(old) = slot.take() {
        release(ctx, &old);
    }
    info!(
        "Allocating {} target {}x{} ({} color attachments)",
        desc.label,
        desc.size.x,
        desc.size.y,
        desc.color_formats.len()
    );
    let target = ctx.create_render_target(desc);
    *slot = Some(target.clone());
    target
}

pub fn release(ctx: &mut dyn GraphicsContext, target: &RenderTarget) {
    for texture in target.color.iter().chain(target.depth.iter()) {
        ctx.destroy_texture(*texture);
    }
}

pub fn gbuffer_descriptor(size: UVec2) -> RenderTargetDescriptor {
    RenderTargetDescriptor {
        label: "gbuffer",
        size,
        color_formats: GBUFFER_COLOR_FORMATS.to_vec(),
        depth_format: Some(GBUFFER_DEPTH_FORMAT),
    }
}

pub fn color_descriptor(
    label: &'static str,
    size: UVec2,
    format: TextureFormat,
) -> RenderTargetDescriptor {
    RenderTargetDescriptor {
        label,
        size,
        color_formats: vec![format],
        depth_format: None,
    }
}

pub fn capture_descriptor(label: &'static str, size: UVec2) -> RenderTargetDescriptor {
    RenderTargetDescriptor {
        label,
        size,
        color_formats: vec![CAPTURE_FORMAT],
        depth_format: Some(CAPTURE_DEPTH_FORMAT),
    }
}

pub fn shadow_descriptor(resolution: u32) -> RenderTargetDescriptor {
    RenderTargetDescriptor {
        label: "shadow_map",
        size: UVec2::splat(resolution),
        color_formats: Vec::new(),
        depth_format: Some(SHADOW_DEPTH_FORMAT),
    }
}
