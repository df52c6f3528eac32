//! Shader programs shared between primitives.
//!
//! A [`ShaderProgram`] knows its WGSL and how to bind its own per-draw state. Compiled
//! programs live in the context's cache under [`ShaderProgram::program_name`], so any number
//! of primitives can share one shader and one compiled program.

mod color;
mod textured;

pub use color::ColorShader;
pub use textured::TexturedBaseShader;

use crate::context::RenderingContext;
use crate::program::{compile_program, ProgramHandle, ProgramSource};

/// Vertex stage shared by the built-in programs: xyz positions through the primitive's mvp.
pub(crate) const TRANSFORM_PREAMBLE: &str = r#"
struct Transform {
    mvp: mat4x4<f32>,
};

@group(0) @binding(0) var<uniform> transform: Transform;
"#;

pub trait ShaderProgram: Send + Sync {
    /// Stable key of the compiled program in the context's cache.
    fn program_name(&self) -> &str;

    fn program_source(&self) -> ProgramSource;

    /// Compiles the program and stores it under [`ShaderProgram::program_name`].
    ///
    /// Always returns a handle; a failed compile yields an invalid one, which is stored too.
    fn setup_program(&self, context: &RenderingContext) -> ProgramHandle {
        let name = self.program_name();
        let handle = compile_program(context, name, &self.program_source());
        context.store_program(name, handle.clone());
        handle
    }

    /// Binds per-draw state other than the transform and texture, before the primitive draws.
    fn pre_render(
        &self,
        context: &RenderingContext,
        program: &ProgramHandle,
        pass: &mut wgpu::RenderPass<'_>,
    );
}
