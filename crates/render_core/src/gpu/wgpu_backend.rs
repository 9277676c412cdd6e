//! [`GraphicsContext`] backed by a `wgpu` device.
//!
//! Programs are WGSL modules registered together with the layout of their
//! parameters ([`ProgramSource`]). Every program shares one bind group
//! convention in `@group(0)`:
//!
//! - `@binding(0)`: the uniform block, see [`UniformLayout`]
//! - `@binding(1 + 2i)`: texture `i`, in declaration order
//! - `@binding(2 + 2i)`: the sampler for texture `i`
//!
//! Vertex input is [`Vertex`] at locations 0..=2 and the entry points are
//! `vs_main` and `fs_main`.
//!
//! Each clear, draw and blit becomes its own render pass in one command
//! encoder. The encoder is submitted on [`GraphicsContext::submit`] and before
//! any upload, read-back or texture destruction, so queue writes stay ordered
//! with the passes around them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bevy::log::{debug, error, info, trace, warn, warn_once};
use bevy::math::{UVec2, Vec3};
use bevy::tasks::block_on;
use bytemuck::{Pod, Zeroable};
use half::f16;
use wgpu::util::DeviceExt;
use wgpu::{
    AddressMode, CompareFunction, FilterMode, LoadOp, Operations, StoreOp, TextureFormat,
    TextureFormatFeatureFlags, TextureUsages,
};

use super::{
    ClearOps, DrawBuffers, GraphicsContext, PipelineState, ProgramId, RenderTarget,
    RenderTargetDescriptor, RenderTargetId, TextureDescriptor, TextureId, UniformKind,
    UniformLayout, UniformValue, Viewport,
};
use crate::probes::{CubeFace, FloatImage};
use crate::scene::{Aabb, Mesh};

/// Target bound by `bind_render_target(None)`.
pub const SURFACE_TARGET: RenderTargetId = RenderTargetId(0);

pub const SURFACE_COLOR_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
pub const SURFACE_DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Textures a single program may declare.
pub const MAX_PROGRAM_TEXTURES: usize = 16;

const BLIT_WGSL: &str = include_str!("blit.wgsl");

/// Errors from device setup and program registration.
#[derive(Debug)]
pub enum BackendError {
    Adapter(wgpu::RequestAdapterError),
    Device(wgpu::RequestDeviceError),
    Program { name: String, message: String },
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Adapter(e) => write!(f, "no suitable GPU adapter: {e}"),
            BackendError::Device(e) => write!(f, "failed to create GPU device: {e}"),
            BackendError::Program { name, message } => {
                write!(f, "program '{name}' rejected: {message}")
            }
        }
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BackendError::Adapter(e) => Some(e),
            BackendError::Device(e) => Some(e),
            BackendError::Program { .. } => None,
        }
    }
}

impl From<wgpu::RequestAdapterError> for BackendError {
    fn from(e: wgpu::RequestAdapterError) -> Self {
        BackendError::Adapter(e)
    }
}

impl From<wgpu::RequestDeviceError> for BackendError {
    fn from(e: wgpu::RequestDeviceError) -> Self {
        BackendError::Device(e)
    }
}

/// Mesh vertex as laid out in GPU vertex buffers.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Two triangles covering clip space. UV (0, 0) is the top-left corner.
pub fn fullscreen_quad() -> [Vertex; 6] {
    let corner = |x: f32, y: f32| Vertex {
        position: [x, y, 0.0],
        normal: [0.0, 0.0, 1.0],
        uv: [(x + 1.0) * 0.5, (1.0 - y) * 0.5],
    };
    [
        corner(-1.0, -1.0),
        corner(1.0, -1.0),
        corner(1.0, 1.0),
        corner(-1.0, -1.0),
        corner(1.0, 1.0),
        corner(-1.0, 1.0),
    ]
}

/// How a program samples one of its textures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureKind {
    /// `texture_2d<f32>`, filtered when the format allows it.
    Float,
    /// `texture_2d<f32>` read with a nearest sampler.
    UnfilterableFloat,
    /// `texture_depth_2d`.
    Depth,
    /// `texture_cube<f32>`.
    Cube,
}

impl TextureKind {
    fn filters(self) -> bool {
        matches!(self, TextureKind::Float | TextureKind::Cube)
    }
}

/// WGSL source of a program plus the names the renderer binds.
#[derive(Clone, Debug, Default)]
pub struct ProgramSource {
    wgsl: String,
    uniforms: Vec<(String, UniformKind)>,
    textures: Vec<(String, TextureKind)>,
    outputs: u32,
}

impl ProgramSource {
    pub fn new(wgsl: impl Into<String>) -> Self {
        Self {
            wgsl: wgsl.into(),
            outputs: 1,
            ..Default::default()
        }
    }

    /// Append a field to the uniform block.
    pub fn uniform(mut self, name: &str, kind: UniformKind) -> Self {
        self.uniforms.push((name.to_string(), kind));
        self
    }

    /// Append a texture binding.
    pub fn texture(mut self, name: &str, kind: TextureKind) -> Self {
        self.textures.push((name.to_string(), kind));
        self
    }

    /// Number of `@location` outputs of `fs_main`.
    pub fn outputs(mut self, count: u32) -> Self {
        self.outputs = count;
        self
    }
}

struct GpuProgram {
    label: String,
    module: wgpu::ShaderModule,
    uniforms: UniformLayout,
    textures: Vec<(String, TextureKind)>,
    outputs: u32,
}

fn compile_module(device: &wgpu::Device, label: &str, wgsl: String) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(wgsl.into()),
    })
}

struct GpuTexture {
    texture: wgpu::Texture,
    /// Every mip and layer, cube dimension for cubemaps, depth aspect only
    /// for depth formats.
    sample_view: wgpu::TextureView,
    /// Mip 0 of layer 0.
    attachment_view: wgpu::TextureView,
    format: TextureFormat,
    size: UVec2,
    cubemap: bool,
    mip_levels: u32,
}

impl GpuTexture {
    fn new(texture: wgpu::Texture, cubemap: bool) -> Self {
        let format = texture.format();
        let sample_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("sample_view"),
            dimension: Some(if cubemap {
                wgpu::TextureViewDimension::Cube
            } else {
                wgpu::TextureViewDimension::D2
            }),
            aspect: if format.has_depth_aspect() {
                wgpu::TextureAspect::DepthOnly
            } else {
                wgpu::TextureAspect::All
            },
            ..Default::default()
        });
        let attachment_view = layer_view(&texture, 0, 0);
        Self {
            size: UVec2::new(texture.width(), texture.height()),
            mip_levels: texture.mip_level_count(),
            sample_view,
            attachment_view,
            format,
            cubemap,
            texture,
        }
    }

    fn is_depth(&self) -> bool {
        self.format.has_depth_aspect()
    }

    fn supports(&self, kind: TextureKind) -> bool {
        if !self.texture.usage().contains(TextureUsages::TEXTURE_BINDING) {
            return false;
        }
        match kind {
            TextureKind::Float | TextureKind::UnfilterableFloat => {
                !self.is_depth() && !self.cubemap
            }
            TextureKind::Depth => self.is_depth() && !self.cubemap,
            TextureKind::Cube => self.cubemap && !self.is_depth(),
        }
    }
}

/// Single mip, single layer 2D view.
fn layer_view(texture: &wgpu::Texture, mip: u32, layer: u32) -> wgpu::TextureView {
    texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some("layer_view"),
        dimension: Some(wgpu::TextureViewDimension::D2),
        base_mip_level: mip,
        mip_level_count: Some(1),
        base_array_layer: layer,
        array_layer_count: Some(1),
        ..Default::default()
    })
}

struct TextureEntry {
    gpu: Arc<GpuTexture>,
    min_filter: FilterMode,
    mag_filter: FilterMode,
    address: AddressMode,
}

impl TextureEntry {
    fn sampler_key(&self) -> SamplerKey {
        let mipmap = if self.gpu.mip_levels > 1 {
            self.min_filter
        } else {
            FilterMode::Nearest
        };
        SamplerKey {
            min: self.min_filter,
            mag: self.mag_filter,
            mipmap,
            address: self.address,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct SamplerKey {
    min: FilterMode,
    mag: FilterMode,
    mipmap: FilterMode,
    address: AddressMode,
}

impl SamplerKey {
    fn nearest(self) -> Self {
        Self {
            min: FilterMode::Nearest,
            mag: FilterMode::Nearest,
            mipmap: FilterMode::Nearest,
            ..self
        }
    }
}

struct TargetEntry {
    target: RenderTarget,
    /// Cubemap face replacing color attachment 0.
    face: Option<(TextureId, CubeFace)>,
}

struct GpuMesh {
    mesh: Arc<Mesh>,
    buffer: Arc<wgpu::Buffer>,
    vertex_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    /// `None` for the built-in blit.
    program: Option<ProgramId>,
    /// Bit `i` set when texture `i` is bound with a filtering sampler.
    filterable: u32,
    color_formats: Vec<TextureFormat>,
    depth_format: Option<TextureFormat>,
    state: PipelineState,
    draw_buffers: DrawBuffers,
}

enum AttachmentView {
    Texture(Arc<GpuTexture>),
    CubeFace(wgpu::TextureView),
}

struct PassAttachment {
    view: AttachmentView,
    format: TextureFormat,
}

impl PassAttachment {
    fn view(&self) -> &wgpu::TextureView {
        match &self.view {
            AttachmentView::Texture(gpu) => &gpu.attachment_view,
            AttachmentView::CubeFace(view) => view,
        }
    }

    fn color(&self, load: LoadOp<wgpu::Color>) -> wgpu::RenderPassColorAttachment<'_> {
        wgpu::RenderPassColorAttachment {
            view: self.view(),
            depth_slice: None,
            resolve_target: None,
            ops: Operations {
                load,
                store: StoreOp::Store,
            },
        }
    }

    /// `None` makes the attachment read-only.
    fn depth_stencil(
        &self,
        load: Option<(LoadOp<f32>, LoadOp<u32>)>,
    ) -> wgpu::RenderPassDepthStencilAttachment<'_> {
        let stencil = load.filter(|_| self.format.has_stencil_aspect());
        wgpu::RenderPassDepthStencilAttachment {
            view: self.view(),
            depth_ops: load.map(|(depth, _)| Operations {
                load: depth,
                store: StoreOp::Store,
            }),
            stencil_ops: stencil.map(|(_, stencil)| Operations {
                load: stencil,
                store: StoreOp::Store,
            }),
        }
    }
}

struct PassTarget {
    size: UVec2,
    colors: Vec<PassAttachment>,
    depth: Option<PassAttachment>,
    /// Every texture written by the pass.
    textures: Vec<TextureId>,
}

struct Fallbacks {
    color: Arc<GpuTexture>,
    depth: Arc<GpuTexture>,
    cube: Arc<GpuTexture>,
}

impl Fallbacks {
    fn get(&self, kind: TextureKind) -> Arc<GpuTexture> {
        match kind {
            TextureKind::Float | TextureKind::UnfilterableFloat => self.color.clone(),
            TextureKind::Depth => self.depth.clone(),
            TextureKind::Cube => self.cube.clone(),
        }
    }
}

struct BoundState {
    target: Option<RenderTargetId>,
    draw_buffers: DrawBuffers,
    viewport: Option<Viewport>,
    state: PipelineState,
    program: Option<ProgramId>,
    uniforms: HashMap<String, UniformValue>,
    textures: HashMap<String, TextureId>,
}

impl Default for BoundState {
    fn default() -> Self {
        Self {
            target: None,
            draw_buffers: DrawBuffers::All,
            viewport: None,
            state: PipelineState::default(),
            program: None,
            uniforms: HashMap::new(),
            textures: HashMap::new(),
        }
    }
}

/// Depth is written only while the depth test is enabled.
fn writes_depth(state: &PipelineState) -> bool {
    state.depth_write && state.depth_compare.is_some()
}

fn selected(buffers: DrawBuffers, index: usize) -> bool {
    match buffers {
        DrawBuffers::All => true,
        DrawBuffers::Single(i) => i as usize == index,
    }
}

/// Intersect `viewport` (or the whole target) with the target bounds.
/// `None` when nothing is left to draw.
fn clamp_viewport(viewport: Option<Viewport>, size: UVec2) -> Option<Viewport> {
    let v = viewport.unwrap_or(Viewport::full(size));
    let x = v.x.min(size.x);
    let y = v.y.min(size.y);
    let width = v.width.min(size.x - x);
    let height = v.height.min(size.y - y);
    (width > 0 && height > 0).then_some(Viewport {
        x,
        y,
        width,
        height,
    })
}

/// Full mip chain length down to 1×1.
fn mip_level_count(size: UVec2) -> u32 {
    32 - size.x.max(size.y).max(1).leading_zeros()
}

/// Row pitch of a texture-to-buffer copy.
fn padded_bytes_per_row(width: u32, texel_size: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (width * texel_size).div_ceil(align) * align
}

/// Convert tightly packed texels of a color format to float RGBA.
fn decode_texels(format: TextureFormat, bytes: &[u8]) -> Option<Vec<[f32; 4]>> {
    match format {
        TextureFormat::Rgba32Float => Some(bytemuck::pod_collect_to_vec(bytes)),
        TextureFormat::Rgba16Float => Some(
            bytes
                .chunks_exact(8)
                .map(|texel| {
                    let mut rgba = [0.0; 4];
                    for (channel, bits) in rgba.iter_mut().zip(texel.chunks_exact(2)) {
                        *channel = f16::from_bits(u16::from_le_bytes([bits[0], bits[1]])).to_f32();
                    }
                    rgba
                })
                .collect(),
        ),
        TextureFormat::Rgba8Unorm => Some(
            bytes
                .chunks_exact(4)
                .map(|t| [t[0], t[1], t[2], t[3]].map(|c| c as f32 / 255.0))
                .collect(),
        ),
        TextureFormat::R8Unorm => Some(
            bytes
                .iter()
                .map(|v| {
                    let v = *v as f32 / 255.0;
                    [v, v, v, 1.0]
                })
                .collect(),
        ),
        _ => None,
    }
}

fn create_bind_group_layout(
    device: &wgpu::Device,
    program: &GpuProgram,
    filterable: u32,
) -> wgpu::BindGroupLayout {
    let mut entries = vec![wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }];
    for (index, (_, kind)) in program.textures.iter().enumerate() {
        let filter = filterable & (1 << index) != 0;
        let (sample_type, view_dimension) = match kind {
            TextureKind::Depth => (
                wgpu::TextureSampleType::Depth,
                wgpu::TextureViewDimension::D2,
            ),
            TextureKind::Cube => (
                wgpu::TextureSampleType::Float { filterable: filter },
                wgpu::TextureViewDimension::Cube,
            ),
            TextureKind::Float | TextureKind::UnfilterableFloat => (
                wgpu::TextureSampleType::Float { filterable: filter },
                wgpu::TextureViewDimension::D2,
            ),
        };
        let binding = 1 + 2 * index as u32;
        entries.push(wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type,
                view_dimension,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: binding + 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(if filter {
                wgpu::SamplerBindingType::Filtering
            } else {
                wgpu::SamplerBindingType::NonFiltering
            }),
            count: None,
        });
    }
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(&program.label),
        entries: &entries,
    })
}

/// A [`GraphicsContext`] that renders with `wgpu`.
///
/// `bind_render_target(None)` binds an offscreen surface of
/// [`SURFACE_COLOR_FORMAT`] plus [`SURFACE_DEPTH_FORMAT`], read back with
/// [`WgpuContext::read_surface`]. Viewport origins are top-left.
pub struct WgpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    encoder: Option<wgpu::CommandEncoder>,

    programs: Vec<Arc<GpuProgram>>,
    program_ids: HashMap<String, ProgramId>,
    blit_program: Arc<GpuProgram>,
    meshes: HashMap<String, GpuMesh>,
    named_textures: HashMap<String, TextureId>,
    textures: HashMap<TextureId, TextureEntry>,
    targets: HashMap<RenderTargetId, TargetEntry>,
    next_texture: u32,
    next_target: u32,

    layouts: HashMap<(Option<ProgramId>, u32), Arc<wgpu::BindGroupLayout>>,
    pipelines: HashMap<PipelineKey, Arc<wgpu::RenderPipeline>>,
    samplers: HashMap<SamplerKey, Arc<wgpu::Sampler>>,
    quad: Arc<wgpu::Buffer>,
    empty_uniforms: wgpu::Buffer,
    fallbacks: Fallbacks,

    bound: BoundState,
}

impl WgpuContext {
    /// Create a device on the default adapter, without a window.
    pub async fn headless(surface_size: UVec2) -> Result<Self, BackendError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await?;
        info!("Renderer using GPU adapter: {}", adapter.get_info().name);
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("render_core"),
                ..Default::default()
            })
            .await?;
        Ok(Self::new(device, queue, surface_size))
    }

    pub fn new(device: wgpu::Device, queue: wgpu::Queue, surface_size: UVec2) -> Self {
        device.on_uncaptured_error(Box::new(|e: wgpu::Error| error!("GPU error: {e}")));

        let blit_program = Arc::new(GpuProgram {
            label: "blit".to_string(),
            module: compile_module(&device, "blit", BLIT_WGSL.to_string()),
            uniforms: UniformLayout::new([]),
            textures: vec![("source".to_string(), TextureKind::Float)],
            outputs: 1,
        });
        let quad = Arc::new(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("fullscreen_quad"),
            contents: bytemuck::cast_slice(&fullscreen_quad()),
            usage: wgpu::BufferUsages::VERTEX,
        }));
        let empty_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("empty_uniforms"),
            size: super::MIN_UNIFORM_SIZE,
            usage: wgpu::BufferUsages::UNIFORM,
            mapped_at_creation: false,
        });
        let fallback = |label: &str, format: TextureFormat, cubemap: bool| {
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: if cubemap { 6 } else { 1 },
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            });
            Arc::new(GpuTexture::new(texture, cubemap))
        };
        let fallbacks = Fallbacks {
            color: fallback("fallback_color", TextureFormat::Rgba8Unorm, false),
            depth: fallback("fallback_depth", TextureFormat::Depth32Float, false),
            cube: fallback("fallback_cube", TextureFormat::Rgba8Unorm, true),
        };

        let mut ctx = Self {
            device,
            queue,
            encoder: None,
            programs: Vec::new(),
            program_ids: HashMap::new(),
            blit_program,
            meshes: HashMap::new(),
            named_textures: HashMap::new(),
            textures: HashMap::new(),
            targets: HashMap::new(),
            next_texture: 1,
            next_target: SURFACE_TARGET.0,
            layouts: HashMap::new(),
            pipelines: HashMap::new(),
            samplers: HashMap::new(),
            quad,
            empty_uniforms,
            fallbacks,
            bound: BoundState::default(),
        };
        ctx.create_render_target(&RenderTargetDescriptor {
            label: "surface",
            size: surface_size,
            color_formats: vec![SURFACE_COLOR_FORMAT],
            depth_format: Some(SURFACE_DEPTH_FORMAT),
        });
        ctx
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Compile `source` and make it resolvable as `name`. Registering a name
    /// again replaces the program behind the same id.
    pub fn register_program(
        &mut self,
        name: &str,
        source: ProgramSource,
    ) -> Result<ProgramId, BackendError> {
        let ProgramSource {
            wgsl,
            uniforms,
            textures,
            outputs,
        } = source;
        if textures.len() > MAX_PROGRAM_TEXTURES {
            return Err(BackendError::Program {
                name: name.to_string(),
                message: format!(
                    "{} textures declared, at most {MAX_PROGRAM_TEXTURES} supported",
                    textures.len()
                ),
            });
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = compile_module(&self.device, name, wgsl);
        if let Some(e) = block_on(self.device.pop_error_scope()) {
            return Err(BackendError::Program {
                name: name.to_string(),
                message: e.to_string(),
            });
        }

        let program = Arc::new(GpuProgram {
            label: name.to_string(),
            module,
            uniforms: UniformLayout::new(uniforms.iter().map(|(n, k)| (n.as_str(), *k))),
            textures,
            outputs,
        });
        if let Some(id) = self.program_ids.get(name).copied() {
            if let Some(slot) = self.programs.get_mut(id.0 as usize) {
                *slot = program;
            }
            self.layouts.retain(|(p, _), _| *p != Some(id));
            self.pipelines.retain(|key, _| key.program != Some(id));
            debug!("Replaced program '{name}'");
            return Ok(id);
        }
        let id = ProgramId(self.programs.len() as u32);
        self.programs.push(program);
        self.program_ids.insert(name.to_string(), id);
        debug!("Registered program '{name}'");
        Ok(id)
    }

    /// Upload `vertices` (a triangle list) and make them resolvable as `name`.
    pub fn register_mesh(&mut self, name: &str, vertices: &[Vertex]) -> Arc<Mesh> {
        let bounds = match vertices.split_first() {
            Some((first, rest)) => {
                let (min, max) = rest.iter().fold(
                    (Vec3::from(first.position), Vec3::from(first.position)),
                    |(min, max), v| {
                        (min.min(v.position.into()), max.max(v.position.into()))
                    },
                );
                Aabb::from_min_max(min, max)
            }
            None => Aabb::unit(),
        };
        let mesh = Arc::new(Mesh::new(name, vertices.len() as u32, bounds));
        // Zero-sized vertex buffers are invalid.
        let zero = [Vertex::zeroed()];
        let contents = if vertices.is_empty() { &zero[..] } else { vertices };
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(name),
                contents: bytemuck::cast_slice(contents),
                usage: wgpu::BufferUsages::VERTEX,
            });
        self.meshes.insert(
            name.to_string(),
            GpuMesh {
                mesh: mesh.clone(),
                buffer: Arc::new(buffer),
                vertex_count: vertices.len() as u32,
            },
        );
        mesh
    }

    /// Create a repeating texture from tightly packed texels and make it
    /// resolvable as `name`.
    pub fn register_texture(
        &mut self,
        name: &str,
        desc: &TextureDescriptor,
        data: &[u8],
    ) -> TextureId {
        let id = self.create_texture(desc);
        self.upload_texture(id, data);
        if let Some(entry) = self.textures.get_mut(&id) {
            entry.address = AddressMode::Repeat;
        }
        if desc.mipmaps {
            self.generate_mipmaps(id);
        }
        if let Some(old) = self.named_textures.insert(name.to_string(), id) {
            self.destroy_texture(old);
        }
        id
    }

    /// Live textures, including the surface attachments.
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn render_target(&self, id: RenderTargetId) -> Option<&RenderTarget> {
        self.targets.get(&id).map(|e| &e.target)
    }

    pub fn render_target_count(&self) -> usize {
        self.targets.len()
    }

    /// Submit everything encoded so far.
    pub fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(Some(encoder.finish()));
        }
    }

    /// Read back what has been presented so far.
    pub fn read_surface(&mut self) -> FloatImage {
        self.read_color(SURFACE_TARGET, 0)
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.device;
        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("render_core"),
            })
        })
    }

    fn format_flags(&self, format: TextureFormat) -> TextureFormatFeatureFlags {
        format.guaranteed_format_features(self.device.features()).flags
    }

    fn allocate_texture(
        &mut self,
        label: &str,
        size: UVec2,
        format: TextureFormat,
        cubemap: bool,
        mip_levels: u32,
    ) -> TextureId {
        let wanted = TextureUsages::TEXTURE_BINDING
            | TextureUsages::RENDER_ATTACHMENT
            | TextureUsages::COPY_SRC
            | TextureUsages::COPY_DST;
        let allowed = format
            .guaranteed_format_features(self.device.features())
            .allowed_usages;
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size.x.max(1),
                height: size.y.max(1),
                depth_or_array_layers: if cubemap { 6 } else { 1 },
            },
            mip_level_count: mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wanted & allowed,
            view_formats: &[],
        });
        let filter = if format.has_depth_aspect() {
            FilterMode::Nearest
        } else {
            FilterMode::Linear
        };
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        self.textures.insert(
            id,
            TextureEntry {
                gpu: Arc::new(GpuTexture::new(texture, cubemap)),
                min_filter: filter,
                mag_filter: filter,
                address: AddressMode::ClampToEdge,
            },
        );
        id
    }

    fn sampler(&mut self, key: SamplerKey) -> Arc<wgpu::Sampler> {
        self.samplers
            .entry(key)
            .or_insert_with(|| {
                Arc::new(self.device.create_sampler(&wgpu::SamplerDescriptor {
                    label: Some("render_core_sampler"),
                    address_mode_u: key.address,
                    address_mode_v: key.address,
                    address_mode_w: key.address,
                    mag_filter: key.mag,
                    min_filter: key.min,
                    mipmap_filter: key.mipmap,
                    ..Default::default()
                }))
            })
            .clone()
    }

    fn bind_group_layout(
        &mut self,
        program: Option<ProgramId>,
        info: &GpuProgram,
        filterable: u32,
    ) -> Arc<wgpu::BindGroupLayout> {
        self.layouts
            .entry((program, filterable))
            .or_insert_with(|| Arc::new(create_bind_group_layout(&self.device, info, filterable)))
            .clone()
    }

    fn render_pipeline(
        &mut self,
        key: PipelineKey,
        info: &GpuProgram,
        layout: &wgpu::BindGroupLayout,
    ) -> Arc<wgpu::RenderPipeline> {
        if let Some(pipeline) = self.pipelines.get(&key) {
            return pipeline.clone();
        }
        let pipeline = Arc::new(self.create_pipeline(&key, info, layout));
        self.pipelines.insert(key, pipeline.clone());
        debug!(
            "Created pipeline for '{}' ({} cached)",
            info.label,
            self.pipelines.len()
        );
        pipeline
    }

    fn create_pipeline(
        &self,
        key: &PipelineKey,
        info: &GpuProgram,
        layout: &wgpu::BindGroupLayout,
    ) -> wgpu::RenderPipeline {
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&info.label),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            });
        let targets: Vec<Option<wgpu::ColorTargetState>> = key
            .color_formats
            .iter()
            .enumerate()
            .map(|(index, format)| {
                let written = selected(key.draw_buffers, index) && (index as u32) < info.outputs;
                let blend = key.state.blend.filter(|_| {
                    let blendable = self
                        .format_flags(*format)
                        .contains(TextureFormatFeatureFlags::BLENDABLE);
                    if !blendable {
                        warn_once!("{format:?} is not blendable, blending disabled");
                    }
                    blendable
                });
                Some(wgpu::ColorTargetState {
                    format: *format,
                    blend,
                    write_mask: if written {
                        key.state.color_writes
                    } else {
                        wgpu::ColorWrites::empty()
                    },
                })
            })
            .collect();
        let depth_stencil = key.depth_format.map(|format| wgpu::DepthStencilState {
            format,
            depth_write_enabled: writes_depth(&key.state),
            depth_compare: key.state.depth_compare.unwrap_or(CompareFunction::Always),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        self.device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&info.label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &info.module,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[Vertex::layout()],
                },
                primitive: wgpu::PrimitiveState {
                    front_face: key.state.front_face,
                    cull_mode: key.state.cull_mode,
                    ..Default::default()
                },
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &info.module,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &targets,
                }),
                multiview: None,
                cache: None,
            })
    }

    /// Attachments of the bound target, with cubemap face routing applied.
    fn pass_target(&self) -> Option<PassTarget> {
        let entry = self.targets.get(&self.bound.target.unwrap_or(SURFACE_TARGET))?;
        let mut textures = Vec::new();
        let mut colors = Vec::with_capacity(entry.target.color.len());
        for (index, texture) in entry.target.color.iter().enumerate() {
            let face = entry.face.filter(|_| index == 0).and_then(|(cubemap, face)| {
                let gpu = &self.textures.get(&cubemap)?.gpu;
                (gpu.size == entry.target.size).then(|| (cubemap, gpu, face))
            });
            if let Some((cubemap, gpu, face)) = face {
                textures.push(cubemap);
                colors.push(PassAttachment {
                    view: AttachmentView::CubeFace(layer_view(&gpu.texture, 0, face.layer())),
                    format: gpu.format,
                });
                continue;
            }
            let gpu = self.textures.get(texture)?.gpu.clone();
            textures.push(*texture);
            colors.push(PassAttachment {
                format: gpu.format,
                view: AttachmentView::Texture(gpu),
            });
        }
        let depth = match entry.target.depth {
            Some(texture) => {
                let gpu = self.textures.get(&texture)?.gpu.clone();
                textures.push(texture);
                Some(PassAttachment {
                    format: gpu.format,
                    view: AttachmentView::Texture(gpu),
                })
            }
            None => None,
        };
        Some(PassTarget {
            size: entry.target.size,
            colors,
            depth,
            textures,
        })
    }

    /// Encode one draw of `vertex_count` vertices into the bound target.
    /// `source` overrides the program's first texture.
    fn encode_draw(
        &mut self,
        vertices: &wgpu::Buffer,
        vertex_count: u32,
        program: Option<ProgramId>,
        source: Option<TextureId>,
        state: PipelineState,
    ) {
        let Some(pass) = self.pass_target() else {
            trace!("Bound render target is gone, draw skipped");
            return;
        };
        let Some(viewport) = clamp_viewport(self.bound.viewport, pass.size) else {
            trace!("Empty viewport, draw skipped");
            return;
        };
        let info = match program {
            Some(id) => match self.programs.get(id.0 as usize) {
                Some(info) => info.clone(),
                None => return,
            },
            None => self.blit_program.clone(),
        };

        let mut filterable = 0u32;
        let mut bindings = Vec::with_capacity(info.textures.len());
        for (index, (name, kind)) in info.textures.iter().enumerate() {
            let requested = match source {
                Some(source) if index == 0 => Some(source),
                _ => self.bound.textures.get(name).copied(),
            };
            let requested = requested.filter(|id| {
                let feedback = pass.textures.contains(id);
                if feedback {
                    warn_once!("Texture '{name}' is also being rendered to, sampling a fallback");
                }
                !feedback
            });
            let entry = requested
                .and_then(|id| self.textures.get(&id))
                .filter(|e| e.gpu.supports(*kind));
            let (gpu, sampler) = match entry {
                Some(e) => (e.gpu.clone(), e.sampler_key()),
                None => {
                    trace!("No usable texture for '{name}' in '{}'", info.label);
                    let key = SamplerKey {
                        min: FilterMode::Nearest,
                        mag: FilterMode::Nearest,
                        mipmap: FilterMode::Nearest,
                        address: AddressMode::ClampToEdge,
                    };
                    (self.fallbacks.get(*kind), key)
                }
            };
            let filter = kind.filters()
                && self
                    .format_flags(gpu.format)
                    .contains(TextureFormatFeatureFlags::FILTERABLE);
            if filter {
                filterable |= 1 << index;
            }
            bindings.push((gpu, if filter { sampler } else { sampler.nearest() }));
        }

        let layout = self.bind_group_layout(program, &info, filterable);
        let key = PipelineKey {
            program,
            filterable,
            color_formats: pass.colors.iter().map(|c| c.format).collect(),
            depth_format: pass.depth.as_ref().map(|d| d.format),
            state,
            draw_buffers: self.bound.draw_buffers,
        };
        let pipeline = self.render_pipeline(key, &info, &layout);

        let mut block = info.uniforms.zeroed();
        for (name, value) in &self.bound.uniforms {
            if !info.uniforms.write(&mut block, name, value) {
                trace!("Uniform '{name}' not declared by '{}'", info.label);
            }
        }
        let uniforms = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("uniforms"),
                contents: &block,
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let samplers: Vec<_> = bindings.iter().map(|(_, key)| self.sampler(*key)).collect();
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: uniforms.as_entire_binding(),
        }];
        for (index, ((gpu, _), sampler)) in bindings.iter().zip(&samplers).enumerate() {
            let binding = 1 + 2 * index as u32;
            entries.push(wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::TextureView(&gpu.sample_view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: binding + 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&info.label),
            layout: &layout,
            entries: &entries,
        });

        let colors: Vec<_> = pass.colors.iter().map(|c| Some(c.color(LoadOp::Load))).collect();
        let depth = pass.depth.as_ref().map(|d| {
            d.depth_stencil(writes_depth(&state).then_some((LoadOp::Load, LoadOp::Load)))
        });
        let encoder = self.encoder();
        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&info.label),
            color_attachments: &colors,
            depth_stencil_attachment: depth,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        render_pass.set_viewport(
            viewport.x as f32,
            viewport.y as f32,
            viewport.width as f32,
            viewport.height as f32,
            0.0,
            1.0,
        );
        render_pass.set_pipeline(&pipeline);
        render_pass.set_bind_group(0, &bind_group, &[]);
        render_pass.set_vertex_buffer(0, vertices.slice(..));
        render_pass.draw(0..vertex_count, 0..1);
    }
}

impl GraphicsContext for WgpuContext {
    fn program(&mut self, name: &str) -> Option<ProgramId> {
        self.program_ids.get(name).copied()
    }

    fn mesh(&mut self, name: &str) -> Option<Arc<Mesh>> {
        self.meshes.get(name).map(|m| m.mesh.clone())
    }

    fn texture(&mut self, name: &str) -> Option<TextureId> {
        self.named_textures.get(name).copied()
    }

    fn create_render_target(&mut self, desc: &RenderTargetDescriptor) -> RenderTarget {
        let size = desc.size.max(UVec2::ONE);
        let color = desc
            .color_formats
            .iter()
            .map(|format| self.allocate_texture(desc.label, size, *format, false, 1))
            .collect();
        let depth = desc
            .depth_format
            .map(|format| self.allocate_texture(desc.label, size, format, false, 1));
        let id = RenderTargetId(self.next_target);
        self.next_target += 1;
        let target = RenderTarget {
            id,
            size,
            color,
            depth,
        };
        debug!("Created render target '{}' {}x{}", desc.label, size.x, size.y);
        self.targets.insert(
            id,
            TargetEntry {
                target: target.clone(),
                face: None,
            },
        );
        target
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> TextureId {
        let mip_levels = if desc.mipmaps {
            mip_level_count(desc.size)
        } else {
            1
        };
        self.allocate_texture(desc.label, desc.size, desc.format, desc.cubemap, mip_levels)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        let Some(entry) = self.textures.remove(&texture) else {
            return;
        };
        // Passes already encoded may still use it.
        self.flush();
        entry.gpu.texture.destroy();
        self.targets.retain(|_, e| {
            e.target.depth != Some(texture) && !e.target.color.contains(&texture)
        });
        for target in self.targets.values_mut() {
            if target.face.is_some_and(|(cubemap, _)| cubemap == texture) {
                target.face = None;
            }
        }
    }

    fn upload_texture(&mut self, texture: TextureId, data: &[u8]) {
        let Some(gpu) = self.textures.get(&texture).map(|e| e.gpu.clone()) else {
            return;
        };
        let Some(texel_size) = gpu.format.block_copy_size(None) else {
            warn!("Cannot upload to {:?} texture", gpu.format);
            return;
        };
        let layers = if gpu.cubemap { 6 } else { 1 };
        let expected = (gpu.size.x * gpu.size.y * layers * texel_size) as usize;
        if data.len() != expected {
            warn!(
                "Texture upload of {} bytes ignored, {} expected",
                data.len(),
                expected
            );
            return;
        }
        self.flush();
        self.queue.write_texture(
            gpu.texture.as_image_copy(),
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(gpu.size.x * texel_size),
                rows_per_image: Some(gpu.size.y),
            },
            wgpu::Extent3d {
                width: gpu.size.x,
                height: gpu.size.y,
                depth_or_array_layers: layers,
            },
        );
    }

    fn set_texture_filter(&mut self, texture: TextureId, min: FilterMode, mag: FilterMode) {
        if let Some(entry) = self.textures.get_mut(&texture) {
            entry.min_filter = min;
            entry.mag_filter = mag;
        }
    }

    fn generate_mipmaps(&mut self, texture: TextureId) {
        let Some(gpu) = self.textures.get(&texture).map(|e| e.gpu.clone()) else {
            return;
        };
        if gpu.mip_levels < 2 {
            trace!("Texture {texture:?} has a single mip level");
            return;
        }
        let usage = gpu.texture.usage();
        if gpu.is_depth() || !usage.contains(TextureUsages::RENDER_ATTACHMENT) {
            warn_once!("Cannot generate mipmaps for {:?}", gpu.format);
            return;
        }

        let filter = self
            .format_flags(gpu.format)
            .contains(TextureFormatFeatureFlags::FILTERABLE);
        let info = self.blit_program.clone();
        let layout = self.bind_group_layout(None, &info, filter as u32);
        let key = PipelineKey {
            program: None,
            filterable: filter as u32,
            color_formats: vec![gpu.format],
            depth_format: None,
            state: PipelineState::fullscreen(),
            draw_buffers: DrawBuffers::All,
        };
        let pipeline = self.render_pipeline(key, &info, &layout);
        let mode = if filter {
            FilterMode::Linear
        } else {
            FilterMode::Nearest
        };
        let sampler = self.sampler(SamplerKey {
            min: mode,
            mag: mode,
            mipmap: FilterMode::Nearest,
            address: AddressMode::ClampToEdge,
        });
        let quad = self.quad.clone();

        let layers = if gpu.cubemap { 6 } else { 1 };
        for layer in 0..layers {
            for mip in 1..gpu.mip_levels {
                let source = layer_view(&gpu.texture, mip - 1, layer);
                let destination = layer_view(&gpu.texture, mip, layer);
                let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("mipmap"),
                    layout: &layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: self.empty_uniforms.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(&source),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: wgpu::BindingResource::Sampler(&sampler),
                        },
                    ],
                });
                let color = wgpu::RenderPassColorAttachment {
                    view: &destination,
                    depth_slice: None,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Load,
                        store: StoreOp::Store,
                    },
                };
                let encoder = self.encoder();
                let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("mipmap"),
                    color_attachments: &[Some(color)],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                render_pass.set_pipeline(&pipeline);
                render_pass.set_bind_group(0, &bind_group, &[]);
                render_pass.set_vertex_buffer(0, quad.slice(..));
                render_pass.draw(0..6, 0..1);
            }
        }
    }

    fn attach_cubemap_face(&mut self, target: RenderTargetId, cubemap: TextureId, face: CubeFace) {
        let Some(gpu) = self.textures.get(&cubemap).map(|e| e.gpu.clone()) else {
            return;
        };
        let Some(entry) = self.targets.get_mut(&target) else {
            return;
        };
        if !gpu.cubemap || gpu.size != entry.target.size {
            warn!(
                "Texture {cubemap:?} cannot back target {target:?}: cubemap {}, {}x{} vs {}x{}",
                gpu.cubemap, gpu.size.x, gpu.size.y, entry.target.size.x, entry.target.size.y
            );
            return;
        }
        entry.face = Some((cubemap, face));
    }

    fn read_color(&mut self, target: RenderTargetId, attachment: u32) -> FloatImage {
        let Some(entry) = self.targets.get(&target) else {
            warn!("Read-back of unknown render target {target:?}");
            return FloatImage::new(1, 1);
        };
        let size = entry.target.size;
        let source = match (attachment, entry.face) {
            (0, Some((cubemap, face))) => Some((cubemap, face.layer())),
            _ => entry.target.color(attachment as usize).map(|id| (id, 0)),
        };
        let Some((gpu, layer)) = source
            .and_then(|(id, layer)| Some((self.textures.get(&id)?.gpu.clone(), layer)))
        else {
            warn!("Render target {target:?} has no color attachment {attachment}");
            return FloatImage::new(size.x, size.y);
        };
        let texel_size = gpu.format.block_copy_size(None).unwrap_or(0);
        if texel_size == 0 || !gpu.texture.usage().contains(TextureUsages::COPY_SRC) {
            warn_once!("Cannot read back {:?} attachments", gpu.format);
            return FloatImage::new(size.x, size.y);
        }

        let row_bytes = size.x * texel_size;
        let padded_row_bytes = padded_bytes_per_row(size.x, texel_size);
        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: (padded_row_bytes * size.y) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        self.encoder().copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &gpu.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: layer,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(size.y),
                },
            },
            wgpu::Extent3d {
                width: size.x,
                height: size.y,
                depth_or_array_layers: 1,
            },
        );
        self.flush();

        let slice = staging_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            tx.send(result).ok();
        });
        let _ = self.device.poll(wgpu::PollType::wait());
        if rx.recv().ok().and_then(|r| r.ok()).is_none() {
            warn!("Read-back of render target {target:?} failed");
            return FloatImage::new(size.x, size.y);
        }

        let mut bytes = Vec::with_capacity((row_bytes * size.y) as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks_exact(padded_row_bytes as usize) {
                bytes.extend_from_slice(&row[..row_bytes as usize]);
            }
        }
        staging_buffer.unmap();

        let image = decode_texels(gpu.format, &bytes).and_then(|texels| {
            FloatImage::from_rgba_bytes(size.x, size.y, bytemuck::cast_slice(&texels))
        });
        match image {
            Some(image) => image,
            None => {
                warn_once!("Read-back of {:?} is not supported", gpu.format);
                FloatImage::new(size.x, size.y)
            }
        }
    }

    fn bind_render_target(&mut self, target: Option<RenderTargetId>) {
        self.bound.target = target;
        self.bound.draw_buffers = DrawBuffers::All;
    }

    fn set_draw_buffers(&mut self, buffers: DrawBuffers) {
        self.bound.draw_buffers = buffers;
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.bound.viewport = Some(viewport);
    }

    fn clear(&mut self, ops: ClearOps) {
        if ops.color.is_none() && !ops.depth {
            return;
        }
        let Some(pass) = self.pass_target() else {
            trace!("Bound render target is gone, clear skipped");
            return;
        };
        let buffers = self.bound.draw_buffers;
        let colors: Vec<_> = pass
            .colors
            .iter()
            .enumerate()
            .map(|(index, attachment)| {
                let load = match ops.color {
                    Some(c) if selected(buffers, index) => LoadOp::Clear(wgpu::Color {
                        r: c.x as f64,
                        g: c.y as f64,
                        b: c.z as f64,
                        a: c.w as f64,
                    }),
                    _ => LoadOp::Load,
                };
                Some(attachment.color(load))
            })
            .collect();
        let depth = pass.depth.as_ref().map(|attachment| {
            let load = if ops.depth {
                (LoadOp::Clear(1.0), LoadOp::Clear(0))
            } else {
                (LoadOp::Load, LoadOp::Load)
            };
            attachment.depth_stencil(Some(load))
        });
        let encoder = self.encoder();
        let _render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear"),
            color_attachments: &colors,
            depth_stencil_attachment: depth,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
    }

    fn set_pipeline_state(&mut self, state: &PipelineState) {
        self.bound.state = *state;
    }

    fn use_program(&mut self, program: ProgramId) {
        self.bound.program = Some(program);
        self.bound.uniforms.clear();
        self.bound.textures.clear();
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        self.bound.uniforms.insert(name.to_string(), value);
    }

    fn set_texture(&mut self, name: &str, texture: TextureId, _slot: u32) {
        self.bound.textures.insert(name.to_string(), texture);
    }

    fn draw(&mut self, mesh: &Mesh) {
        let Some(gpu_mesh) = self.meshes.get(&mesh.name) else {
            trace!("Mesh '{}' has no vertex buffer", mesh.name);
            return;
        };
        let Some(program) = self.bound.program else {
            trace!("No program bound, '{}' not drawn", mesh.name);
            return;
        };
        let buffer = gpu_mesh.buffer.clone();
        let count = mesh.vertex_count.min(gpu_mesh.vertex_count);
        if count == 0 {
            return;
        }
        let state = self.bound.state;
        self.encode_draw(&buffer, count, Some(program), None, state);
    }

    fn blit(&mut self, source: TextureId, program: Option<ProgramId>) {
        let state = PipelineState {
            depth_compare: None,
            depth_write: false,
            cull_mode: None,
            ..self.bound.state
        };
        let quad = self.quad.clone();
        self.encode_draw(&quad, 6, program, Some(source), state);
    }

    fn submit(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::math::Vec4;

    const SOLID_WGSL: &str = r#"
struct Params {
    u_color: vec4<f32>,
};
@group(0) @binding(0) var<uniform> params: Params;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return params.u_color;
}
"#;

    /// `None` on machines without a usable adapter.
    fn gpu_context() -> Option<WgpuContext> {
        match block_on(WgpuContext::headless(UVec2::new(4, 4))) {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                eprintln!("skipping GPU test: {e}");
                None
            }
        }
    }

    fn assert_rgba(actual: Vec4, expected: Vec4) {
        assert!(
            (actual - expected).abs().max_element() <= 1.0 / 255.0,
            "{actual} != {expected}"
        );
    }

    #[test]
    fn test_viewport_is_clamped_to_target() {
        let size = UVec2::new(64, 32);
        assert_eq!(clamp_viewport(None, size), Some(Viewport::full(size)));
        let inside = Viewport {
            x: 8,
            y: 4,
            width: 16,
            height: 8,
        };
        assert_eq!(clamp_viewport(Some(inside), size), Some(inside));
        let overhanging = Viewport {
            x: 48,
            y: 0,
            width: 100,
            height: 100,
        };
        assert_eq!(
            clamp_viewport(Some(overhanging), size),
            Some(Viewport {
                x: 48,
                y: 0,
                width: 16,
                height: 32
            })
        );
        let outside = Viewport {
            x: 64,
            y: 0,
            width: 10,
            height: 10,
        };
        assert_eq!(clamp_viewport(Some(outside), size), None);
    }

    #[test]
    fn test_mip_chain_and_row_padding() {
        assert_eq!(mip_level_count(UVec2::ONE), 1);
        assert_eq!(mip_level_count(UVec2::ZERO), 1);
        assert_eq!(mip_level_count(UVec2::new(256, 64)), 9);
        assert_eq!(mip_level_count(UVec2::new(3, 5)), 3);

        assert_eq!(padded_bytes_per_row(1, 4), 256);
        assert_eq!(padded_bytes_per_row(64, 4), 256);
        assert_eq!(padded_bytes_per_row(65, 4), 512);
        assert_eq!(padded_bytes_per_row(16, 16), 256);
    }

    #[test]
    fn test_decode_half_and_unorm_texels() {
        let halves: Vec<u8> = [0.5f32, -2.0, 0.0, 1.0]
            .iter()
            .flat_map(|v| f16::from_f32(*v).to_bits().to_le_bytes())
            .collect();
        assert_eq!(
            decode_texels(TextureFormat::Rgba16Float, &halves),
            Some(vec![[0.5, -2.0, 0.0, 1.0]])
        );
        assert_eq!(
            decode_texels(TextureFormat::Rgba8Unorm, &[255, 0, 51, 255]),
            Some(vec![[1.0, 0.0, 0.2, 1.0]])
        );
        assert_eq!(
            decode_texels(TextureFormat::R8Unorm, &[0]),
            Some(vec![[0.0, 0.0, 0.0, 1.0]])
        );
        assert_eq!(decode_texels(TextureFormat::Depth32Float, &[0; 4]), None);
    }

    #[test]
    fn test_fullscreen_quad_covers_clip_space() {
        let quad = fullscreen_quad();
        let top_left = quad.iter().find(|v| v.position[0] < 0.0 && v.position[1] > 0.0);
        assert_eq!(top_left.map(|v| v.uv), Some([0.0, 0.0]));
        let bottom_right = quad.iter().find(|v| v.position[0] > 0.0 && v.position[1] < 0.0);
        assert_eq!(bottom_right.map(|v| v.uv), Some([1.0, 1.0]));
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
    }

    #[test]
    fn test_clear_reaches_surface() {
        let Some(mut ctx) = gpu_context() else {
            return;
        };
        ctx.bind_render_target(None);
        ctx.clear(ClearOps::color_and_depth(Vec4::new(1.0, 0.0, 0.0, 1.0)));
        let image = ctx.read_surface();
        assert_eq!((image.width(), image.height()), (4, 4));
        assert_rgba(image.pixel_rgba(0, 0), Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert_rgba(image.pixel_rgba(3, 3), Vec4::new(1.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn test_program_draw_writes_uniform_color() {
        let Some(mut ctx) = gpu_context() else {
            return;
        };
        let solid = ctx
            .register_program(
                "solid",
                ProgramSource::new(SOLID_WGSL).uniform("u_color", UniformKind::Vec4),
            )
            .unwrap();
        let quad = ctx.register_mesh("quad", &fullscreen_quad());
        assert_eq!(quad.vertex_count, 6);
        assert_eq!(ctx.program("solid"), Some(solid));

        ctx.bind_render_target(None);
        ctx.clear(ClearOps::color_and_depth(Vec4::ZERO));
        ctx.set_pipeline_state(&PipelineState::fullscreen());
        ctx.use_program(solid);
        ctx.set_uniform("u_color", Vec4::new(0.0, 1.0, 0.0, 1.0).into());
        ctx.draw(&quad);

        let image = ctx.read_surface();
        assert_rgba(image.pixel_rgba(1, 2), Vec4::new(0.0, 1.0, 0.0, 1.0));
    }

    #[test]
    fn test_draw_respects_viewport() {
        let Some(mut ctx) = gpu_context() else {
            return;
        };
        let solid = ctx
            .register_program(
                "solid",
                ProgramSource::new(SOLID_WGSL).uniform("u_color", UniformKind::Vec4),
            )
            .unwrap();
        let quad = ctx.register_mesh("quad", &fullscreen_quad());
        ctx.bind_render_target(None);
        ctx.clear(ClearOps::color_and_depth(Vec4::ZERO));
        ctx.set_viewport(Viewport {
            x: 0,
            y: 0,
            width: 2,
            height: 4,
        });
        ctx.set_pipeline_state(&PipelineState::fullscreen());
        ctx.use_program(solid);
        ctx.set_uniform("u_color", Vec4::ONE.into());
        ctx.draw(&quad);

        let image = ctx.read_surface();
        assert_rgba(image.pixel_rgba(1, 1), Vec4::ONE);
        assert_rgba(image.pixel_rgba(3, 1), Vec4::ZERO);
    }

    #[test]
    fn test_blit_copies_float_target_to_surface() {
        let Some(mut ctx) = gpu_context() else {
            return;
        };
        let scratch = ctx.create_render_target(&RenderTargetDescriptor {
            label: "scratch",
            size: UVec2::new(4, 4),
            color_formats: vec![TextureFormat::Rgba16Float],
            depth_format: None,
        });
        let color = Vec4::new(0.25, 0.5, 1.0, 1.0);
        ctx.bind_render_target(Some(scratch.id));
        ctx.clear(ClearOps::color(color));
        let direct = ctx.read_color(scratch.id, 0);
        assert_eq!(direct.pixel_rgba(2, 2), color);

        ctx.bind_render_target(None);
        ctx.set_pipeline_state(&PipelineState::fullscreen());
        ctx.blit(scratch.color(0).unwrap(), None);
        let image = ctx.read_surface();
        assert_rgba(image.pixel_rgba(2, 2), color);
    }

    #[test]
    fn test_uploaded_texels_survive_blit_and_readback() {
        let Some(mut ctx) = gpu_context() else {
            return;
        };
        let texels: [[f32; 4]; 4] = [
            [1.0, 0.0, 0.0, 1.0],
            [0.0, 2.0, 0.0, 1.0],
            [0.0, 0.0, 3.0, 1.0],
            [4.0, 4.0, 4.0, 1.0],
        ];
        let texture = ctx.create_texture(&TextureDescriptor {
            label: "texels",
            size: UVec2::new(2, 2),
            format: TextureFormat::Rgba32Float,
            cubemap: false,
            mipmaps: false,
        });
        ctx.upload_texture(texture, bytemuck::cast_slice(&texels));
        let target = ctx.create_render_target(&RenderTargetDescriptor {
            label: "copy",
            size: UVec2::new(2, 2),
            color_formats: vec![TextureFormat::Rgba32Float],
            depth_format: None,
        });
        ctx.bind_render_target(Some(target.id));
        ctx.set_viewport(Viewport::full(target.size));
        ctx.set_pipeline_state(&PipelineState::fullscreen());
        ctx.blit(texture, None);

        let image = ctx.read_color(target.id, 0);
        assert_eq!(image.pixel_rgba(1, 0), Vec4::from_array(texels[1]));
        assert_eq!(image.pixel_rgba(0, 1), Vec4::from_array(texels[2]));
    }

    #[test]
    fn test_cubemap_face_receives_clear() {
        let Some(mut ctx) = gpu_context() else {
            return;
        };
        let cubemap = ctx.create_texture(&TextureDescriptor {
            label: "cube",
            size: UVec2::new(4, 4),
            format: TextureFormat::Rgba16Float,
            cubemap: true,
            mipmaps: true,
        });
        let capture = ctx.create_render_target(&RenderTargetDescriptor {
            label: "capture",
            size: UVec2::new(4, 4),
            color_formats: vec![TextureFormat::Rgba16Float],
            depth_format: Some(TextureFormat::Depth32Float),
        });
        ctx.attach_cubemap_face(capture.id, cubemap, CubeFace::NegativeY);
        ctx.bind_render_target(Some(capture.id));
        ctx.clear(ClearOps::color_and_depth(Vec4::new(0.0, 0.0, 2.0, 1.0)));
        ctx.bind_render_target(None);
        ctx.generate_mipmaps(cubemap);

        let face = ctx.read_color(capture.id, 0);
        assert_eq!(face.pixel_rgba(0, 3), Vec4::new(0.0, 0.0, 2.0, 1.0));
        ctx.attach_cubemap_face(capture.id, cubemap, CubeFace::PositiveX);
        assert_eq!(ctx.read_color(capture.id, 0).pixel_rgba(0, 3), Vec4::ZERO);
    }

    #[test]
    fn test_destroying_attachment_drops_target() {
        let Some(mut ctx) = gpu_context() else {
            return;
        };
        let before = ctx.texture_count();
        let target = ctx.create_render_target(&RenderTargetDescriptor {
            label: "gbuffer",
            size: UVec2::new(8, 8),
            color_formats: vec![TextureFormat::Rgba16Float; 3],
            depth_format: Some(TextureFormat::Depth24PlusStencil8),
        });
        assert_eq!(ctx.texture_count(), before + 4);
        ctx.bind_render_target(Some(target.id));
        ctx.clear(ClearOps::color_and_depth(Vec4::ONE));

        for texture in target.color.iter().chain(&target.depth) {
            ctx.destroy_texture(*texture);
        }
        assert_eq!(ctx.texture_count(), before);
        assert!(ctx.render_target(target.id).is_none());
        // Clearing a vanished target is a no-op.
        ctx.clear(ClearOps::color(Vec4::ZERO));
        ctx.submit();
    }

    #[test]
    fn test_invalid_wgsl_is_rejected() {
        let Some(mut ctx) = gpu_context() else {
            return;
        };
        let result = ctx.register_program("broken", ProgramSource::new("fn broken("));
        assert!(matches!(result, Err(BackendError::Program { .. })));
        assert_eq!(ctx.program("broken"), None);

        let crowded = (0..=MAX_PROGRAM_TEXTURES).fold(ProgramSource::new(SOLID_WGSL), |s, i| {
            s.texture(&format!("t{i}"), TextureKind::Float)
        });
        assert!(ctx.register_program("crowded", crowded).is_err());
    }
}
