//! Headless [`GraphicsContext`] that records the command stream.
//!
//! Used by the demo binary and by tests to observe exactly what the renderer
//! submitted: every command in order, plus a snapshot of the bound program,
//! target, pipeline state, uniforms and textures at each draw.

use std::collections::HashMap;
use std::sync::Arc;

use bevy::math::{UVec2, Vec4};
use wgpu::FilterMode;

use super::{
    ClearOps, DrawBuffers, GraphicsContext, PipelineState, ProgramId, RenderTarget,
    RenderTargetDescriptor, RenderTargetId, TextureDescriptor, TextureId, UniformValue, Viewport,
};
use crate::config::AssetNames;
use crate::probes::{CubeFace, FloatImage};
use crate::renderer::PROGRAM_NAMES;
use crate::scene::{Aabb, Mesh};

/// A single recorded command.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    CreateRenderTarget {
        id: RenderTargetId,
        label: &'static str,
        size: UVec2,
    },
    CreateTexture {
        id: TextureId,
        label: &'static str,
        size: UVec2,
    },
    DestroyTexture(TextureId),
    UploadTexture { texture: TextureId, bytes: usize },
    SetTextureFilter {
        texture: TextureId,
        min: FilterMode,
        mag: FilterMode,
    },
    GenerateMipmaps(TextureId),
    AttachCubemapFace {
        target: RenderTargetId,
        cubemap: TextureId,
        face: CubeFace,
    },
    ReadColor {
        target: RenderTargetId,
        attachment: u32,
    },
    BindRenderTarget(Option<RenderTargetId>),
    SetDrawBuffers(DrawBuffers),
    SetViewport(Viewport),
    Clear(ClearOps),
    SetPipelineState(PipelineState),
    UseProgram(String),
    Draw {
        program: Option<String>,
        mesh: String,
    },
    Blit {
        source: TextureId,
        program: Option<String>,
    },
}

/// Everything bound at the moment of a draw or blit.
#[derive(Clone, Debug)]
pub struct DrawRecord {
    pub program: Option<String>,
    /// Mesh name, or `None` for a blit.
    pub mesh: Option<String>,
    /// Source texture of a blit.
    pub source: Option<TextureId>,
    pub target: Option<RenderTargetId>,
    pub draw_buffers: DrawBuffers,
    pub viewport: Option<Viewport>,
    pub state: PipelineState,
    pub uniforms: HashMap<String, UniformValue>,
    pub textures: HashMap<String, TextureId>,
}

impl DrawRecord {
    pub fn uniform(&self, name: &str) -> Option<&UniformValue> {
        self.uniforms.get(name)
    }

    pub fn is_program(&self, name: &str) -> bool {
        self.program.as_deref() == Some(name)
    }
}

/// Command-recording graphics backend.
pub struct RecordingContext {
    programs: HashMap<String, ProgramId>,
    program_names: Vec<String>,
    meshes: HashMap<String, Arc<Mesh>>,
    named_textures: HashMap<String, TextureId>,
    /// Live textures and their sizes.
    textures: HashMap<TextureId, UVec2>,
    targets: HashMap<RenderTargetId, RenderTarget>,
    next_texture: u32,
    next_target: u32,
    readback_radiance: Vec4,

    bound_target: Option<RenderTargetId>,
    draw_buffers: DrawBuffers,
    viewport: Option<Viewport>,
    state: PipelineState,
    program: Option<ProgramId>,
    uniforms: HashMap<String, UniformValue>,
    bound_textures: HashMap<String, TextureId>,

    commands: Vec<Command>,
    draws: Vec<DrawRecord>,
}

impl Default for RecordingContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingContext {
    /// An empty context: no programs, meshes or named textures resolve.
    pub fn new() -> Self {
        Self {
            programs: HashMap::new(),
            program_names: Vec::new(),
            meshes: HashMap::new(),
            named_textures: HashMap::new(),
            textures: HashMap::new(),
            targets: HashMap::new(),
            next_texture: 1,
            next_target: 1,
            readback_radiance: Vec4::new(0.0, 0.0, 0.0, 1.0),
            bound_target: None,
            draw_buffers: DrawBuffers::All,
            viewport: None,
            state: PipelineState::default(),
            program: None,
            uniforms: HashMap::new(),
            bound_textures: HashMap::new(),
            commands: Vec::new(),
            draws: Vec::new(),
        }
    }

    /// A context where every program the renderer uses and every default
    /// asset name resolves.
    pub fn standard() -> Self {
        let assets = AssetNames::default();
        let mut ctx = Self::new();
        for name in PROGRAM_NAMES {
            ctx.register_program(name);
        }
        ctx.register_mesh(Mesh::new(&assets.quad_mesh, 6, Aabb::unit()));
        ctx.register_mesh(Mesh::new(&assets.sphere_mesh, 2880, Aabb::unit()));
        ctx.register_mesh(Mesh::new(&assets.cube_mesh, 36, Aabb::unit()));
        ctx.register_mesh(Mesh::new(&assets.skybox_mesh, 36, Aabb::unit()));
        ctx.register_texture(&assets.environment);
        ctx.register_texture(&assets.noise_texture);
        ctx.register_texture(&assets.decal_texture);
        ctx
    }

    pub fn register_program(&mut self, name: &str) -> ProgramId {
        if let Some(id) = self.programs.get(name) {
            return *id;
        }
        let id = ProgramId(self.program_names.len() as u32);
        self.program_names.push(name.to_string());
        self.programs.insert(name.to_string(), id);
        id
    }

    pub fn remove_program(&mut self, name: &str) {
        self.programs.remove(name);
    }

    pub fn register_mesh(&mut self, mesh: Mesh) -> Arc<Mesh> {
        let mesh = Arc::new(mesh);
        self.meshes.insert(mesh.name.clone(), mesh.clone());
        mesh
    }

    pub fn remove_mesh(&mut self, name: &str) {
        self.meshes.remove(name);
    }

    pub fn register_texture(&mut self, name: &str) -> TextureId {
        if let Some(id) = self.named_textures.get(name) {
            return *id;
        }
        let id = self.allocate_texture(UVec2::ONE);
        self.named_textures.insert(name.to_string(), id);
        id
    }

    pub fn remove_texture(&mut self, name: &str) {
        self.named_textures.remove(name);
    }

    /// Radiance returned for every texel of every read-back.
    pub fn set_readback_radiance(&mut self, radiance: Vec4) {
        self.readback_radiance = radiance;
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Draw and blit snapshots, in submission order.
    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    /// Mesh draws only (blits excluded).
    pub fn mesh_draws(&self) -> impl Iterator<Item = &DrawRecord> {
        self.draws.iter().filter(|d| d.mesh.is_some())
    }

    pub fn draws_with_program<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a DrawRecord> + 'a {
        self.draws.iter().filter(move |d| d.is_program(name))
    }

    pub fn render_target(&self, id: RenderTargetId) -> Option<&RenderTarget> {
        self.targets.get(&id)
    }

    pub fn render_target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Forget recorded commands and draws, keeping resources and lookups.
    pub fn clear_log(&mut self) {
        self.commands.clear();
        self.draws.clear();
    }

    fn allocate_texture(&mut self, size: UVec2) -> TextureId {
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        self.textures.insert(id, size);
        id
    }

    fn program_name(&self, id: ProgramId) -> Option<String> {
        self.program_names.get(id.0 as usize).cloned()
    }

    fn snapshot(
        &self,
        mesh: Option<String>,
        source: Option<TextureId>,
        program: Option<String>,
    ) -> DrawRecord {
        DrawRecord {
            program,
            mesh,
            source,
            target: self.bound_target,
            draw_buffers: self.draw_buffers,
            viewport: self.viewport,
            state: self.state,
            uniforms: self.uniforms.clone(),
            textures: self.bound_textures.clone(),
        }
    }
}

impl GraphicsContext for RecordingContext {
    fn program(&mut self, name: &str) -> Option<ProgramId> {
        self.programs.get(name).copied()
    }

    fn mesh(&mut self, name: &str) -> Option<Arc<Mesh>> {
        self.meshes.get(name).cloned()
    }

    fn texture(&mut self, name: &str) -> Option<TextureId> {
        self.named_textures.get(name).copied()
    }

    fn create_render_target(&mut self, desc: &RenderTargetDescriptor) -> RenderTarget {
        let id = RenderTargetId(self.next_target);
        self.next_target += 1;
        let color = desc
            .color_formats
            .iter()
            .map(|_| self.allocate_texture(desc.size))
            .collect();
        let depth = desc.depth_format.map(|_| self.allocate_texture(desc.size));
        let target = RenderTarget {
            id,
            size: desc.size,
            color,
            depth,
        };
        self.targets.insert(id, target.clone());
        self.commands.push(Command::CreateRenderTarget {
            id,
            label: desc.label,
            size: desc.size,
        });
        target
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> TextureId {
        let id = self.allocate_texture(desc.size);
        self.commands.push(Command::CreateTexture {
            id,
            label: desc.label,
            size: desc.size,
        });
        id
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
        self.commands.push(Command::DestroyTexture(texture));
    }

    fn upload_texture(&mut self, texture: TextureId, data: &[u8]) {
        self.commands.push(Command::UploadTexture {
            texture,
            bytes: data.len(),
        });
    }

    fn set_texture_filter(&mut self, texture: TextureId, min: FilterMode, mag: FilterMode) {
        self.commands.push(Command::SetTextureFilter { texture, min, mag });
    }

    fn generate_mipmaps(&mut self, texture: TextureId) {
        self.commands.push(Command::GenerateMipmaps(texture));
    }

    fn attach_cubemap_face(&mut self, target: RenderTargetId, cubemap: TextureId, face: CubeFace) {
        self.commands.push(Command::AttachCubemapFace {
            target,
            cubemap,
            face,
        });
    }

    fn read_color(&mut self, target: RenderTargetId, attachment: u32) -> FloatImage {
        self.commands.push(Command::ReadColor { target, attachment });
        let size = self
            .targets
            .get(&target)
            .map(|t| t.size)
            .unwrap_or(UVec2::ONE);
        FloatImage::filled(size.x, size.y, self.readback_radiance)
    }

    fn bind_render_target(&mut self, target: Option<RenderTargetId>) {
        self.bound_target = target;
        self.draw_buffers = DrawBuffers::All;
        self.commands.push(Command::BindRenderTarget(target));
    }

    fn set_draw_buffers(&mut self, buffers: DrawBuffers) {
        self.draw_buffers = buffers;
        self.commands.push(Command::SetDrawBuffers(buffers));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
        self.commands.push(Command::SetViewport(viewport));
    }

    fn clear(&mut self, ops: ClearOps) {
        self.commands.push(Command::Clear(ops));
    }

    fn set_pipeline_state(&mut self, state: &PipelineState) {
        self.state = *state;
        self.commands.push(Command::SetPipelineState(*state));
    }

    fn use_program(&mut self, program: ProgramId) {
        self.program = Some(program);
        self.uniforms.clear();
        self.bound_textures.clear();
        let name = self.program_name(program).unwrap_or_default();
        self.commands.push(Command::UseProgram(name));
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        self.uniforms.insert(name.to_string(), value);
    }

    fn set_texture(&mut self, name: &str, texture: TextureId, _slot: u32) {
        self.bound_textures.insert(name.to_string(), texture);
    }

    fn draw(&mut self, mesh: &Mesh) {
        let program = self.program.and_then(|p| self.program_name(p));
        self.commands.push(Command::Draw {
            program: program.clone(),
            mesh: mesh.name.clone(),
        });
        let record = self.snapshot(Some(mesh.name.clone()), None, program);
        self.draws.push(record);
    }

    fn blit(&mut self, source: TextureId, program: Option<ProgramId>) {
        let program = program.and_then(|p| self.program_name(p));
        self.commands.push(Command::Blit {
            source,
            program: program.clone(),
        });
        // A blit through a program keeps the uniforms just pushed to it.
        let mut record = self.snapshot(None, Some(source), program.clone());
        if program.is_none() {
            record.uniforms.clear();
            record.textures.clear();
        }
        self.draws.push(record);
    }
}
