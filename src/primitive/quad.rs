use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    record_draw, upload_texture_coordinate_buffer, DrawCall, GeometryBuffers, ReadinessFlags,
    RenderPassConfig, RenderablePrimitive,
};
use crate::context::RenderingContext;
use crate::diagnostics::Diagnostic;
use crate::geometry::{quad_vertices, texture_coordinates, Quad2d, RectD, QUAD_INDICES, QUAD_VERTEX_SCALARS};
use crate::pipeline::{mask_reference, StencilPolicy, MASK_REFERENCE};
use crate::program::{MaterialLayout, ProgramHandle};
use crate::shader::ShaderProgram;
use crate::texture::{texture_factors, TextureHolder};

struct TextureBinding {
    holder: Arc<dyn TextureHolder>,
    view: Arc<wgpu::TextureView>,
    /// Built on first draw against the program's material layout, keyed by program id.
    bind_group: Option<(u64, wgpu::BindGroup)>,
}

impl TextureBinding {
    fn bind_group(&mut self, context: &RenderingContext, program: &ProgramHandle) -> Option<&wgpu::BindGroup> {
        let layout = program.material_layout()?;
        let stale = self
            .bind_group
            .as_ref()
            .is_none_or(|(program_id, _)| *program_id != program.id());
        if stale {
            let bind_group = context.device().create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("quad_texture_bind_group"),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&self.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(context.sampler()),
                    },
                ],
            });
            self.bind_group = Some((program.id(), bind_group));
        }
        self.bind_group.as_ref().map(|(_, bind_group)| bind_group)
    }
}

struct QuadState {
    frame: Quad2d,
    texture_rect: RectD,
    vertices: [f32; QUAD_VERTEX_SCALARS],
    indices: [u16; 6],
    texture_coords: [f32; 8],
    factor_width: f32,
    factor_height: f32,
    flags: ReadinessFlags,
    /// Bumped whenever staged geometry, texture coordinates or GPU state change, so an upload
    /// done outside the lock can tell whether it is still current.
    generation: u64,
    is_inverse_masked: bool,
    skipped_draw_reported: bool,
    program: Option<ProgramHandle>,
    buffers: Option<GeometryBuffers>,
    texture_coord_buffer: Option<wgpu::Buffer>,
    texture: Option<TextureBinding>,
}

impl QuadState {
    fn recompute_texture_coords(&mut self) {
        self.texture_coords =
            texture_coordinates(&self.texture_rect, self.factor_width, self.factor_height);
    }

    /// Dropped rather than destroyed: passes that already recorded it keep it alive.
    fn release_texture_coord_buffer(&mut self) {
        self.texture_coord_buffer = None;
        self.flags.texture_coords_ready = false;
    }

    fn install_texture_coord_buffer(&mut self, buffer: Option<wgpu::Buffer>) {
        self.flags.texture_coords_ready = buffer.is_some();
        self.texture_coord_buffer = buffer;
    }

    /// Replaces the texture-coordinate buffer with the current coordinates.
    fn upload_texture_coords(&mut self, context: &RenderingContext) {
        let buffer = upload_texture_coordinate_buffer(context, &self.texture_coords);
        self.install_texture_coord_buffer(buffer);
    }

    fn take_texture(&mut self) -> Option<Arc<dyn TextureHolder>> {
        let binding = self.texture.take()?;
        self.generation += 1;
        self.release_texture_coord_buffer();
        self.factor_width = 1.0;
        self.factor_height = 1.0;
        self.recompute_texture_coords();
        Some(binding.holder)
    }
}

/// A four-cornered, optionally textured primitive.
///
/// Texture coordinates follow the frame corners and are scaled by the loaded texture's
/// `image / backing` size ratio.
pub struct Quad {
    shader: Arc<dyn ShaderProgram>,
    state: Mutex<QuadState>,
}

impl Quad {
    pub fn new(shader: Arc<dyn ShaderProgram>) -> Self {
        Self {
            shader,
            state: Mutex::new(QuadState {
                frame: Quad2d::default(),
                texture_rect: RectD::default(),
                vertices: [0.0; QUAD_VERTEX_SCALARS],
                indices: QUAD_INDICES,
                texture_coords: texture_coordinates(&RectD::default(), 1.0, 1.0),
                factor_width: 1.0,
                factor_height: 1.0,
                flags: ReadinessFlags::default(),
                generation: 0,
                is_inverse_masked: false,
                skipped_draw_reported: false,
                program: None,
                buffers: None,
                texture_coord_buffer: None,
                texture: None,
            }),
        }
    }

    pub fn shader(&self) -> &Arc<dyn ShaderProgram> {
        &self.shader
    }

    /// Stages new corners and the normalized part of the texture to show. CPU only; safe from
    /// any thread. The quad needs another `setup` before it draws again.
    pub fn set_frame(&self, frame: Quad2d, texture_rect: RectD) {
        let vertices = quad_vertices(&frame);

        let mut state = self.state.lock();
        state.frame = frame;
        state.texture_rect = texture_rect;
        state.vertices = vertices;
        state.indices = QUAD_INDICES;
        state.recompute_texture_coords();
        state.flags.data_ready = true;
        state.flags.ready_to_draw = false;
        state.generation += 1;
    }

    /// Attaches `holder` to the GPU and shows it on this quad, replacing any previous texture.
    ///
    /// Once the quad has uploaded geometry this re-uploads texture coordinates, so it must
    /// then be called on the render thread.
    pub fn load_texture(&self, context: &RenderingContext, holder: Arc<dyn TextureHolder>) {
        let Some(view) = holder.attach_to_graphics(context) else {
            tracing::warn!("texture could not be attached, quad stays untextured");
            return;
        };
        let (factor_width, factor_height) = texture_factors(holder.as_ref());

        let previous = {
            let mut state = self.state.lock();
            let previous = state.texture.replace(TextureBinding {
                holder,
                view,
                bind_group: None,
            });
            state.factor_width = factor_width;
            state.factor_height = factor_height;
            state.recompute_texture_coords();
            state.generation += 1;
            if state.buffers.is_some() && state.flags.uses_texture_coords {
                state.upload_texture_coords(context);
            }
            previous
        };

        // Detached after the new one is attached, so reloading the same holder keeps it alive.
        if let Some(previous) = previous {
            previous.holder.clear_from_graphics();
        }
    }

    /// Detaches the texture and drops the texture-coordinate buffer. Idempotent.
    pub fn remove_texture(&self) {
        let holder = self.state.lock().take_texture();
        if let Some(holder) = holder {
            holder.clear_from_graphics();
        }
    }

    pub fn frame(&self) -> Quad2d {
        self.state.lock().frame
    }

    pub fn vertices(&self) -> [f32; QUAD_VERTEX_SCALARS] {
        self.state.lock().vertices
    }

    pub fn indices(&self) -> [u16; 6] {
        self.state.lock().indices
    }

    pub fn texture_coords(&self) -> [f32; 8] {
        self.state.lock().texture_coords
    }

    /// `(factor_width, factor_height)` of the current texture, 1.0 without one.
    pub fn texture_factors(&self) -> (f32, f32) {
        let state = self.state.lock();
        (state.factor_width, state.factor_height)
    }

    pub fn has_texture(&self) -> bool {
        self.state.lock().texture.is_some()
    }

    pub fn readiness(&self) -> ReadinessFlags {
        self.state.lock().flags
    }

    fn draw(
        &self,
        context: &RenderingContext,
        pass: &mut wgpu::RenderPass<'_>,
        pass_config: &RenderPassConfig,
        mvp: &[f32; 16],
        policy: StencilPolicy,
    ) {
        let mut state = self.state.lock();
        let flags = state.flags;
        if !flags.ready_to_draw || (flags.uses_texture_coords && !flags.texture_coords_ready) {
            return;
        }
        let Some(program) = state.program.clone() else {
            return;
        };
        if !program.is_valid() {
            tracing::trace!(program = program.name(), "skipping quad draw");
            if !state.skipped_draw_reported {
                state.skipped_draw_reported = true;
                context.report(Diagnostic::SkippedDraw {
                    program: program.name().to_owned(),
                });
            }
            return;
        }

        let stencil_reference = match policy {
            StencilPolicy::QuadMask => MASK_REFERENCE,
            _ => mask_reference(state.is_inverse_masked),
        };

        let state = &mut *state;
        let material = if program.material() == MaterialLayout::Texture {
            // A textured program cannot draw without its texture bound.
            match state.texture.as_mut() {
                Some(texture) => texture.bind_group(context, &program),
                None => return,
            }
        } else {
            None
        };
        let Some(buffers) = state.buffers.as_ref() else {
            return;
        };
        let texture_coords = if flags.uses_texture_coords {
            state.texture_coord_buffer.as_ref()
        } else {
            None
        };

        let drawn = record_draw(
            context,
            self.shader.as_ref(),
            pass,
            mvp,
            DrawCall {
                program: &program,
                policy,
                stencil_reference,
                buffers,
                texture_coords,
                material,
            },
        );
        if drawn {
            tracing::trace!(
                render_pass_index = pass_config.render_pass_index,
                ?policy,
                "drew quad"
            );
            state.flags.ready = true;
        }
    }
}

impl RenderablePrimitive for Quad {
    fn setup(&self, context: &RenderingContext) {
        // Staged data is copied out so the uploads below run without the lock.
        let (vertices, indices, texture_coords, generation) = {
            let state = self.state.lock();
            if state.flags.ready_to_draw || !state.flags.data_ready {
                return;
            }
            (
                state.vertices,
                state.indices,
                state.texture_coords,
                state.generation,
            )
        };

        let program = context.program_for(self.shader.as_ref());
        let uses_texture_coords = program.uses_texture_coords();
        let Some(buffers) = GeometryBuffers::upload(context, "quad_geometry", &vertices, &indices)
        else {
            return;
        };
        let texture_coord_buffer = if uses_texture_coords {
            upload_texture_coordinate_buffer(context, &texture_coords)
        } else {
            None
        };

        let mut state = self.state.lock();
        if state.flags.ready_to_draw {
            return;
        }
        if state.generation != generation {
            tracing::trace!("quad restaged during setup, discarding upload");
            return;
        }

        if !uses_texture_coords && state.texture.is_some() {
            context.report(Diagnostic::MissingTextureCoordinates {
                program: program.name().to_owned(),
            });
        }

        state.buffers = Some(buffers);
        state.flags.uses_texture_coords = uses_texture_coords;
        state.install_texture_coord_buffer(texture_coord_buffer);
        state.program = Some(program);
        state.flags.ready_to_draw = true;
    }

    fn render(
        &self,
        context: &RenderingContext,
        pass: &mut wgpu::RenderPass<'_>,
        pass_config: &RenderPassConfig,
        mvp: &[f32; 16],
        is_masked: bool,
        _pixel_scale: f64,
    ) {
        let policy = if is_masked {
            StencilPolicy::QuadMasked
        } else {
            StencilPolicy::Unmasked
        };
        self.draw(context, pass, pass_config, mvp, policy);
    }

    fn render_as_mask(
        &self,
        context: &RenderingContext,
        pass: &mut wgpu::RenderPass<'_>,
        pass_config: &RenderPassConfig,
        mvp: &[f32; 16],
        _pixel_scale: f64,
    ) {
        self.draw(context, pass, pass_config, mvp, StencilPolicy::QuadMask);
    }

    fn clear(&self) {
        let holder = {
            let mut state = self.state.lock();
            state.buffers = None;
            state.generation += 1;
            let holder = state.take_texture();
            state.release_texture_coord_buffer();
            state.program = None;
            state.flags = ReadinessFlags {
                data_ready: state.flags.data_ready,
                ..ReadinessFlags::default()
            };
            holder
        };
        if let Some(holder) = holder {
            holder.clear_from_graphics();
        }
    }

    fn is_ready(&self) -> bool {
        let state = self.state.lock();
        state.flags.ready_to_draw && (!state.flags.uses_texture_coords || state.texture.is_some())
    }

    fn set_is_inverse_masked(&self, is_inverse_masked: bool) {
        self.state.lock().is_inverse_masked = is_inverse_masked;
    }
}

impl Drop for Quad {
    fn drop(&mut self) {
        if let Some(holder) = self.state.get_mut().texture.take().map(|binding| binding.holder) {
            holder.clear_from_graphics();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Coord;
    use crate::shader::{ColorShader, TexturedBaseShader};

    fn color_quad() -> Quad {
        Quad::new(Arc::new(ColorShader::new(1.0, 0.0, 0.0, 1.0)))
    }

    #[test]
    fn set_frame_stages_vertices_and_indices() {
        let quad = color_quad();
        quad.set_frame(Quad2d::from_rect(0.0, 0.0, 2.0, 1.0), RectD::default());

        let vertices = quad.vertices();
        assert_eq!(vertices.len(), 12);
        assert_eq!(&vertices[3..6], &[0.0, 1.0, 0.0]);
        assert_eq!(quad.indices(), [0, 1, 2, 0, 2, 3]);

        let flags = quad.readiness();
        assert!(flags.data_ready);
        assert!(!flags.ready_to_draw);
    }

    #[test]
    fn texture_coordinates_follow_the_texture_rect() {
        let quad = color_quad();
        quad.set_frame(
            Quad2d::from_rect(0.0, 0.0, 1.0, 1.0),
            RectD::new(0.5, 0.0, 0.5, 1.0),
        );
        assert_eq!(quad.texture_coords(), [0.5, 0.0, 0.5, 1.0, 1.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn not_ready_before_setup() {
        let quad = color_quad();
        assert!(!quad.is_ready());
        quad.set_frame(Quad2d::from_rect(0.0, 0.0, 1.0, 1.0), RectD::default());
        assert!(!quad.is_ready());
    }

    #[test]
    fn clear_and_remove_texture_are_idempotent_without_gpu_state() {
        let quad = Quad::new(Arc::new(TexturedBaseShader::new()));
        quad.set_frame(Quad2d::from_rect(0.0, 0.0, 1.0, 1.0), RectD::default());

        quad.remove_texture();
        quad.remove_texture();
        quad.clear();
        let after_first = quad.readiness();
        quad.clear();

        assert_eq!(quad.readiness(), after_first);
        assert!(!quad.is_ready());
        assert!(quad.readiness().data_ready);
        assert_eq!(quad.texture_factors(), (1.0, 1.0));
    }

    #[test]
    fn staging_changes_invalidate_pending_uploads() {
        let quad = Quad::new(Arc::new(TexturedBaseShader::new()));
        let generation = || quad.state.lock().generation;
        let start = generation();

        quad.set_frame(Quad2d::from_rect(0.0, 0.0, 1.0, 1.0), RectD::default());
        let staged = generation();
        assert!(staged > start);

        quad.clear();
        assert!(generation() > staged);
    }

    #[test]
    fn concurrent_frames_never_tear() {
        let quad = Arc::new(color_quad());
        let frames: Vec<Quad2d> = (0..4)
            .map(|i| {
                let offset = i as f64 * 100.0;
                Quad2d::new(
                    Coord::new(offset, offset),
                    Coord::new(offset + 1.0, offset),
                    Coord::new(offset + 1.0, offset + 1.0),
                    Coord::new(offset, offset + 1.0),
                )
            })
            .collect();
        let expected: Vec<[f32; 12]> = frames.iter().map(quad_vertices).collect();

        std::thread::scope(|scope| {
            for frame in &frames {
                let quad = Arc::clone(&quad);
                let frame = *frame;
                scope.spawn(move || {
                    for _ in 0..500 {
                        quad.set_frame(frame, RectD::default());
                    }
                });
            }
            let quad = Arc::clone(&quad);
            let expected = expected.clone();
            scope.spawn(move || {
                for _ in 0..500 {
                    let vertices = quad.vertices();
                    assert!(
                        vertices == [0.0; 12] || expected.contains(&vertices),
                        "torn vertices: {vertices:?}"
                    );
                }
            });
        });

        assert!(expected.contains(&quad.vertices()));
    }
}
