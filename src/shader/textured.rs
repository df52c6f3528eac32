use std::borrow::Cow;

use super::{ShaderProgram, TRANSFORM_PREAMBLE};
use crate::context::RenderingContext;
use crate::program::{MaterialLayout, ProgramHandle, ProgramSource};

const TEXTURED_SHADER_NAME: &str = "UBMAP_TexturedBaseShader";

const TEXTURED_SHADER_BODY: &str = r#"
@group(1) @binding(0) var t_texture: texture_2d<f32>;
@group(1) @binding(1) var s_texture: sampler;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) tex_coord: vec2<f32>,
};

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) tex_coord: vec2<f32>,
};

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.position = transform.mvp * vec4<f32>(input.position, 1.0);
    out.tex_coord = input.tex_coord;
    return out;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(t_texture, s_texture, input.tex_coord);
}
"#;

/// Samples the primitive's texture. The texture itself is bound by the primitive.
#[derive(Debug, Default)]
pub struct TexturedBaseShader;

impl TexturedBaseShader {
    pub fn new() -> Self {
        Self
    }
}

impl ShaderProgram for TexturedBaseShader {
    fn program_name(&self) -> &str {
        TEXTURED_SHADER_NAME
    }

    fn program_source(&self) -> ProgramSource {
        ProgramSource {
            wgsl: Cow::Owned(format!("{TRANSFORM_PREAMBLE}\n{TEXTURED_SHADER_BODY}")),
            vertex_entry: "vs_main",
            fragment_entry: "fs_main",
            material: MaterialLayout::Texture,
        }
    }

    fn pre_render(&self, _: &RenderingContext, _: &ProgramHandle, _: &mut wgpu::RenderPass<'_>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::exposes_texture_coordinates;

    #[test]
    fn textured_program_exposes_texture_coordinates() {
        let source = TexturedBaseShader::new().program_source();
        assert!(exposes_texture_coordinates(&source.wgsl));
        assert_eq!(source.material, MaterialLayout::Texture);
    }

    #[test]
    fn built_in_programs_use_distinct_cache_keys() {
        let color = crate::shader::ColorShader::default();
        assert_ne!(TexturedBaseShader.program_name(), color.program_name());
    }
}
