use std::sync::Arc;

use parking_lot::Mutex;

use super::{record_draw, DrawCall, GeometryBuffers, ReadinessFlags, RenderPassConfig, RenderablePrimitive};
use crate::buffer::BufferDescriptor;
use crate::context::RenderingContext;
use crate::diagnostics::Diagnostic;
use crate::error::StagingError;
use crate::geometry::{tessellate_outline, Coord};
use crate::pipeline::{mask_reference, StencilPolicy, MASK_REFERENCE};
use crate::program::{MaterialLayout, ProgramHandle};
use crate::shader::ShaderProgram;

#[derive(Default)]
struct PolygonState {
    vertices: Vec<f32>,
    indices: Vec<u16>,
    flags: ReadinessFlags,
    /// Bumped on every restage or clear; an upload started before a bump is stale.
    generation: u64,
    is_inverse_masked: bool,
    skipped_draw_reported: bool,
    program: Option<ProgramHandle>,
    buffers: Option<GeometryBuffers>,
}

/// Pre-triangulated geometry, drawn untextured.
///
/// Every polygon draw increments the stencil buffer where it lands, so overlapping polygons
/// inside one mask paint at most once.
pub struct Polygon {
    shader: Arc<dyn ShaderProgram>,
    state: Mutex<PolygonState>,
}

impl Polygon {
    pub fn new(shader: Arc<dyn ShaderProgram>) -> Self {
        Self {
            shader,
            state: Mutex::new(PolygonState::default()),
        }
    }

    pub fn shader(&self) -> &Arc<dyn ShaderProgram> {
        &self.shader
    }

    /// Copies xyz vertex positions and `u16` triangle indices out of caller memory.
    ///
    /// Safe from any thread. On error nothing is staged.
    pub fn set_vertices(
        &self,
        vertices: &BufferDescriptor<'_>,
        indices: &BufferDescriptor<'_>,
    ) -> Result<(), StagingError> {
        let vertices = vertices.to_vec::<f32>()?;
        let indices = indices.to_vec::<u16>()?;
        self.stage(vertices, indices);
        Ok(())
    }

    /// Triangulates a closed outline and stages the result like [`Polygon::set_vertices`].
    pub fn set_outline(&self, outline: &[Coord]) -> Result<(), StagingError> {
        let geometry = tessellate_outline(outline)?;
        self.stage(geometry.vertices, geometry.indices);
        Ok(())
    }

    fn stage(&self, vertices: Vec<f32>, indices: Vec<u16>) {
        let mut state = self.state.lock();
        state.vertices = vertices;
        state.indices = indices;
        state.flags.ready = false;
        state.flags.data_ready = true;
        state.generation += 1;
    }

    pub fn vertices(&self) -> Vec<f32> {
        self.state.lock().vertices.clone()
    }

    pub fn indices(&self) -> Vec<u16> {
        self.state.lock().indices.clone()
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
        if !state.flags.ready {
            return;
        }
        let Some(program) = state.program.clone() else {
            return;
        };
        // Polygons carry no texture, so textured programs cannot draw them either.
        let drawable = program.is_valid()
            && !program.uses_texture_coords()
            && program.material() != MaterialLayout::Texture;
        if !drawable {
            tracing::trace!(program = program.name(), "skipping polygon draw");
            if !state.skipped_draw_reported {
                state.skipped_draw_reported = true;
                context.report(Diagnostic::SkippedDraw {
                    program: program.name().to_owned(),
                });
            }
            return;
        }
        let Some(buffers) = state.buffers.as_ref() else {
            return;
        };

        let stencil_reference = match policy {
            StencilPolicy::PolygonMask => MASK_REFERENCE,
            _ => mask_reference(state.is_inverse_masked),
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
                texture_coords: None,
                material: None,
            },
        );
        if drawn {
            tracing::trace!(
                render_pass_index = pass_config.render_pass_index,
                index_count = buffers.index_count(),
                ?policy,
                "drew polygon"
            );
        }
    }
}

impl RenderablePrimitive for Polygon {
    fn setup(&self, context: &RenderingContext) {
        // Uploads run on a copy so staging threads are not blocked behind the GPU.
        let (vertices, indices, generation) = {
            let state = self.state.lock();
            if state.flags.ready || !state.flags.data_ready {
                return;
            }
            (state.vertices.clone(), state.indices.clone(), state.generation)
        };

        let program = context.program_for(self.shader.as_ref());
        let Some(buffers) = GeometryBuffers::upload(context, "polygon_geometry", &vertices, &indices)
        else {
            return;
        };

        let mut state = self.state.lock();
        if state.flags.ready {
            return;
        }
        if state.generation != generation {
            tracing::trace!("polygon restaged during setup, discarding upload");
            return;
        }
        state.buffers = Some(buffers);
        state.program = Some(program);
        state.flags.ready = true;
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
            StencilPolicy::PolygonMasked
        } else {
            StencilPolicy::PolygonCounting
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
        self.draw(context, pass, pass_config, mvp, StencilPolicy::PolygonMask);
    }

    fn clear(&self) {
        let mut state = self.state.lock();
        state.buffers = None;
        state.generation += 1;
        state.program = None;
        state.flags.ready = false;
    }

    fn is_ready(&self) -> bool {
        self.state.lock().flags.ready
    }

    fn set_is_inverse_masked(&self, is_inverse_masked: bool) {
        self.state.lock().is_inverse_masked = is_inverse_masked;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::ColorShader;

    fn polygon() -> Polygon {
        Polygon::new(Arc::new(ColorShader::default()))
    }

    #[test]
    fn staging_copies_the_described_buffers() {
        let polygon = polygon();
        let vertices = [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let indices = [0u16, 1, 2];

        polygon
            .set_vertices(
                &BufferDescriptor::from_slice(&vertices),
                &BufferDescriptor::from_slice(&indices),
            )
            .unwrap();

        assert_eq!(polygon.vertices(), vertices.to_vec());
        assert_eq!(polygon.indices(), indices.to_vec());
        let flags = polygon.readiness();
        assert!(flags.data_ready);
        assert!(!flags.ready);
    }

    #[test]
    fn empty_descriptors_clear_the_staged_geometry() {
        let polygon = polygon();
        polygon
            .set_outline(&[
                Coord::new(0.0, 0.0),
                Coord::new(1.0, 0.0),
                Coord::new(1.0, 1.0),
            ])
            .unwrap();
        assert!(!polygon.indices().is_empty());

        polygon
            .set_vertices(&BufferDescriptor::empty(), &BufferDescriptor::empty())
            .unwrap();
        assert!(polygon.vertices().is_empty());
        assert!(polygon.indices().is_empty());
        assert!(polygon.readiness().data_ready);
    }

    #[test]
    fn misaligned_staging_leaves_the_polygon_untouched() {
        let polygon = polygon();
        let vertices = [0.0f32; 9];
        let bytes = [0u8; 5];

        let result = polygon.set_vertices(
            &BufferDescriptor::from_slice(&vertices),
            &BufferDescriptor::from_slice(&bytes),
        );

        assert!(matches!(result, Err(StagingError::MisalignedLength { .. })));
        assert!(polygon.vertices().is_empty());
        assert!(!polygon.readiness().data_ready);
    }

    #[test]
    fn restaging_and_clearing_invalidate_pending_uploads() {
        let polygon = polygon();
        let generation = || polygon.state.lock().generation;
        let start = generation();

        polygon
            .set_vertices(&BufferDescriptor::empty(), &BufferDescriptor::empty())
            .unwrap();
        let staged = generation();
        assert!(staged > start);

        polygon.clear();
        assert!(generation() > staged);
    }

    #[test]
    fn overflowing_descriptors_leave_the_polygon_untouched() {
        let polygon = polygon();
        let vertex = [0.0f32; 3];
        let huge = unsafe { BufferDescriptor::new(vertex.as_ptr().cast(), usize::MAX, 12) };

        let result = polygon.set_vertices(&huge, &BufferDescriptor::empty());

        assert!(matches!(result, Err(StagingError::LengthOverflow { .. })));
        assert!(!polygon.readiness().data_ready);
    }

    #[test]
    fn clear_is_idempotent() {
        let polygon = polygon();
        polygon.clear();
        polygon.clear();
        assert!(!polygon.is_ready());
    }

    #[test]
    fn concurrent_staging_never_tears() {
        let polygon = Arc::new(polygon());
        let sources: Vec<(Vec<f32>, Vec<u16>)> = (1..=4)
            .map(|n| {
                let vertices = vec![n as f32; 3 * (n + 2)];
                let indices = (0..n as u16 * 3).collect();
                (vertices, indices)
            })
            .collect();

        std::thread::scope(|scope| {
            for (vertices, indices) in &sources {
                let polygon = Arc::clone(&polygon);
                scope.spawn(move || {
                    for _ in 0..200 {
                        polygon
                            .set_vertices(
                                &BufferDescriptor::from_slice(vertices),
                                &BufferDescriptor::from_slice(indices),
                            )
                            .unwrap();
                    }
                });
            }
            let polygon = Arc::clone(&polygon);
            let sources = &sources;
            scope.spawn(move || {
                for _ in 0..200 {
                    let (vertices, indices) = {
                        let state = polygon.state.lock();
                        (state.vertices.clone(), state.indices.clone())
                    };
                    let consistent = (vertices.is_empty() && indices.is_empty())
                        || sources.iter().any(|(v, i)| *v == vertices && *i == indices);
                    assert!(consistent, "torn geometry");
                }
            });
        });
    }
}
