//! Renderable primitives: geometry staged from any thread, uploaded and drawn on the render
//! thread.
//!
//! Every primitive guards its staged arrays, GPU buffers and [`ReadinessFlags`] with one
//! non-reentrant lock. Staging calls copy caller data before taking the lock and swap it in
//! whole, so a concurrent `setup` sees either the old or the new geometry, never a mix.

mod polygon;
mod quad;

pub use polygon::Polygon;
pub use quad::Quad;

use wgpu::BufferUsages;

use crate::context::RenderingContext;
use crate::pipeline::{create_buffer_init, create_uniform_bind_group, StencilPolicy, TransformUniform};
use crate::program::ProgramHandle;
use crate::shader::ShaderProgram;

/// Column-major 4x4 identity, for geometry already in clip space.
pub const IDENTITY_MVP: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Identifies the pass a draw belongs to. Passed through to primitives untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderPassConfig {
    pub render_pass_index: i32,
}

impl RenderPassConfig {
    pub const fn new(render_pass_index: i32) -> Self {
        Self { render_pass_index }
    }
}

/// Snapshot of a primitive's lifecycle state, taken under its lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadinessFlags {
    /// CPU-side geometry has been staged.
    pub data_ready: bool,
    /// Polygons: GPU buffers are uploaded. Quads: at least one draw has been issued.
    pub ready: bool,
    /// Quads: vertex and index buffers are uploaded.
    pub ready_to_draw: bool,
    /// The program reads per-vertex texture coordinates.
    pub uses_texture_coords: bool,
    /// The texture-coordinate buffer is uploaded.
    pub texture_coords_ready: bool,
}

/// The capability surface shared by quads and polygons.
///
/// `setup`, `render`, `render_as_mask` and `clear` must be called from the thread that records
/// render passes for `context`. None of them fail: GPU problems are logged, reported to the
/// context's diagnostic sink and leave the primitive not ready.
pub trait RenderablePrimitive: Send + Sync {
    /// Uploads staged geometry. A no-op once ready.
    fn setup(&self, context: &RenderingContext);

    /// Draws the primitive. With `is_masked`, only where the stencil buffer holds the mask
    /// reference (or, for inverse-masked primitives, where no mask was drawn).
    ///
    /// `pixel_scale` is accepted for hosts that pass it and is currently unused.
    fn render(
        &self,
        context: &RenderingContext,
        pass: &mut wgpu::RenderPass<'_>,
        pass_config: &RenderPassConfig,
        mvp: &[f32; 16],
        is_masked: bool,
        pixel_scale: f64,
    );

    /// Draws the primitive into the stencil buffer only.
    fn render_as_mask(
        &self,
        context: &RenderingContext,
        pass: &mut wgpu::RenderPass<'_>,
        pass_config: &RenderPassConfig,
        mvp: &[f32; 16],
        pixel_scale: f64,
    );

    /// Releases GPU resources and returns to not-ready. Idempotent.
    fn clear(&self);

    fn is_ready(&self) -> bool;

    fn set_is_inverse_masked(&self, is_inverse_masked: bool);
}

/// Vertex and index buffers of an uploaded primitive.
///
/// Released by dropping: wgpu keeps them alive for passes that already recorded them.
pub(crate) struct GeometryBuffers {
    vertex: wgpu::Buffer,
    index: wgpu::Buffer,
    index_count: u32,
}

impl GeometryBuffers {
    /// Uploads `vertices` (xyz) and `indices`. `None` when validation rejected the upload.
    pub(crate) fn upload(
        context: &RenderingContext,
        label: &str,
        vertices: &[f32],
        indices: &[u16],
    ) -> Option<Self> {
        let device = context.device();
        let (buffers, valid) = context.checked(label, || Self {
            vertex: create_buffer_init(
                device,
                Some(label),
                bytemuck::cast_slice(vertices),
                BufferUsages::VERTEX,
            ),
            index: create_buffer_init(
                device,
                Some(label),
                bytemuck::cast_slice(indices),
                BufferUsages::INDEX,
            ),
            // Only complete triangles whose vertices exist are drawable.
            index_count: if vertices.len() >= 3 {
                (indices.len() - indices.len() % 3) as u32
            } else {
                0
            },
        });

        if !valid {
            return None;
        }
        tracing::trace!(
            label,
            vertex_bytes = std::mem::size_of_val(vertices),
            index_count = indices.len(),
            "uploaded primitive geometry"
        );
        Some(buffers)
    }

    pub(crate) fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// Uploads two floats per vertex for the texture-coordinate stream.
pub(crate) fn upload_texture_coordinate_buffer(
    context: &RenderingContext,
    texture_coords: &[f32],
) -> Option<wgpu::Buffer> {
    let (buffer, valid) = context.checked("texture_coordinate_buffer", || {
        create_buffer_init(
            context.device(),
            Some("texture_coordinate_buffer"),
            bytemuck::cast_slice(texture_coords),
            BufferUsages::VERTEX,
        )
    });
    valid.then_some(buffer)
}

/// Everything one indexed draw binds.
pub(crate) struct DrawCall<'a> {
    pub program: &'a ProgramHandle,
    pub policy: StencilPolicy,
    pub stencil_reference: u32,
    pub buffers: &'a GeometryBuffers,
    pub texture_coords: Option<&'a wgpu::Buffer>,
    pub material: Option<&'a wgpu::BindGroup>,
}

/// Records one draw. Returns false when nothing was drawn.
///
/// The matrix goes into a uniform of its own, so a primitive drawn several times in one pass
/// keeps each draw's transform.
pub(crate) fn record_draw(
    context: &RenderingContext,
    shader: &dyn ShaderProgram,
    pass: &mut wgpu::RenderPass<'_>,
    mvp: &[f32; 16],
    call: DrawCall<'_>,
) -> bool {
    let buffers = call.buffers;
    if buffers.index_count == 0 {
        return false;
    }
    let Some(pipeline) = call.program.pipeline(call.policy) else {
        return false;
    };

    let transform_bind_group = create_uniform_bind_group(
        context.device(),
        call.program.transform_layout(),
        "transform_bind_group",
        bytemuck::bytes_of(&TransformUniform { mvp: *mvp }),
    );

    pass.set_pipeline(pipeline);
    pass.set_stencil_reference(call.stencil_reference);
    pass.set_bind_group(0, &transform_bind_group, &[]);
    if let Some(material) = call.material {
        pass.set_bind_group(1, material, &[]);
    }
    shader.pre_render(context, call.program, pass);

    pass.set_vertex_buffer(0, buffers.vertex.slice(..));
    if let Some(texture_coords) = call.texture_coords {
        pass.set_vertex_buffer(1, texture_coords.slice(..));
    }
    pass.set_index_buffer(buffers.index.slice(..), wgpu::IndexFormat::Uint16);
    pass.draw_indexed(0..buffers.index_count, 0, 0..1);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_column_major() {
        for column in 0..4 {
            for row in 0..4 {
                let expected = if row == column { 1.0 } else { 0.0 };
                assert_eq!(IDENTITY_MVP[column * 4 + row], expected);
            }
        }
    }

    #[test]
    fn fresh_flags_are_all_clear() {
        let flags = ReadinessFlags::default();
        assert!(!flags.data_ready);
        assert!(!flags.ready);
        assert!(!flags.ready_to_draw);
        assert!(!flags.uses_texture_coords);
        assert!(!flags.texture_coords_ready);
    }
}
