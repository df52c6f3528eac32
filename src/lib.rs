//! GPU-resident map primitives on top of `wgpu`.
//!
//! Quads and polygons stage geometry from any thread, upload it lazily on the render thread
//! and draw either normally or into the stencil buffer as a mask. Shader programs are compiled
//! once per [`RenderingContext`] and shared through its [`ProgramCache`].

pub use wgpu;

mod buffer;
mod context;
mod diagnostics;
mod error;
mod geometry;
mod pipeline;
mod primitive;
mod program;
mod shader;
mod target;
mod texture;

pub use buffer::BufferDescriptor;
pub use context::{ContextConfig, RenderingContext};
pub use diagnostics::{Diagnostic, DiagnosticSink};
pub use error::{GraphicsError, StagingError};
pub use geometry::{
    quad_vertices, tessellate_outline, texture_coordinates, Coord, PolygonGeometry, Quad2d, RectD,
    QUAD_INDICES,
};
pub use pipeline::{mask_reference, StencilPolicy, INVERSE_MASK_REFERENCE, MASK_REFERENCE};
pub use primitive::{
    Polygon, Quad, ReadinessFlags, RenderPassConfig, RenderablePrimitive, IDENTITY_MVP,
};
pub use program::{
    compile_program, exposes_texture_coordinates, MaterialLayout, ProgramCache, ProgramHandle,
    ProgramSource,
};
pub use shader::{ColorShader, ShaderProgram, TexturedBaseShader};
pub use target::OffscreenTarget;
pub use texture::{premultiply_rgba8_inplace, BitmapTexture, TextureHolder};
