use std::borrow::Cow;

use parking_lot::Mutex;

use super::{ShaderProgram, TRANSFORM_PREAMBLE};
use crate::context::RenderingContext;
use crate::pipeline::create_uniform_bind_group;
use crate::program::{MaterialLayout, ProgramHandle, ProgramSource};

const COLOR_SHADER_NAME: &str = "UBMAP_ColorShader";

const COLOR_SHADER_BODY: &str = r#"
struct Material {
    color: vec4<f32>,
};

@group(1) @binding(0) var<uniform> material: Material;

struct VertexInput {
    @location(0) position: vec3<f32>,
};

@vertex
fn vs_main(input: VertexInput) -> @builtin(position) vec4<f32> {
    return transform.mvp * vec4<f32>(input.position, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    // Premultiplied output.
    return vec4<f32>(material.color.rgb, 1.0) * material.color.a;
}
"#;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct ColorUniform {
    color: [f32; 4],
}

/// Flat, straight-alpha color. Renders premultiplied.
pub struct ColorShader {
    color: Mutex<[f32; 4]>,
}

impl ColorShader {
    pub fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self {
            color: Mutex::new([r, g, b, a]),
        }
    }

    /// Takes effect on the next draw; draws already recorded keep their color. Safe from any
    /// thread.
    pub fn set_color(&self, r: f32, g: f32, b: f32, a: f32) {
        *self.color.lock() = [r, g, b, a];
    }

    pub fn color(&self) -> [f32; 4] {
        *self.color.lock()
    }
}

impl Default for ColorShader {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 1.0)
    }
}

impl ShaderProgram for ColorShader {
    fn program_name(&self) -> &str {
        COLOR_SHADER_NAME
    }

    fn program_source(&self) -> ProgramSource {
        ProgramSource {
            wgsl: Cow::Owned(format!("{TRANSFORM_PREAMBLE}\n{COLOR_SHADER_BODY}")),
            vertex_entry: "vs_main",
            fragment_entry: "fs_main",
            material: MaterialLayout::Uniform,
        }
    }

    fn pre_render(
        &self,
        context: &RenderingContext,
        program: &ProgramHandle,
        pass: &mut wgpu::RenderPass<'_>,
    ) {
        let Some(layout) = program.material_layout() else {
            return;
        };
        let uniform = ColorUniform { color: self.color() };
        let bind_group = create_uniform_bind_group(
            context.device(),
            layout,
            "color_bind_group",
            bytemuck::bytes_of(&uniform),
        );
        pass.set_bind_group(1, &bind_group, &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::exposes_texture_coordinates;

    #[test]
    fn color_program_has_no_texture_coordinates() {
        let source = ColorShader::default().program_source();
        assert!(!exposes_texture_coordinates(&source.wgsl));
        assert_eq!(source.material, MaterialLayout::Uniform);
    }

    #[test]
    fn set_color_replaces_the_color() {
        let shader = ColorShader::new(1.0, 0.0, 0.0, 1.0);
        shader.set_color(0.0, 0.5, 1.0, 0.25);
        assert_eq!(shader.color(), [0.0, 0.5, 1.0, 0.25]);
    }
}
