//! Compiled shader programs and the per-context cache that keeps them.
//!
//! A program is compiled at most once per [`RenderingContext`]: primitives look it up by name
//! first and only ask their [`crate::ShaderProgram`] to compile on a miss. Entries are never
//! evicted; the cache lives exactly as long as its context.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use ahash::HashMap;
use parking_lot::RwLock;
use regex::Regex;
use wgpu::{BindGroupLayout, RenderPipeline};

use crate::context::RenderingContext;
use crate::diagnostics::{with_validation_scope, Diagnostic};
use crate::error::GraphicsError;
use crate::pipeline::{
    create_policy_pipelines, create_texture_material_bind_group_layout,
    create_transform_bind_group_layout, create_uniform_material_bind_group_layout, PipelineStages,
    StencilPolicy,
};

/// Name of the vertex input that carries texture coordinates, bound at `@location(1)`.
pub const TEXTURE_COORDINATE_ATTRIBUTE: &str = "tex_coord";

static NEXT_PROGRAM_ID: AtomicU64 = AtomicU64::new(1);

/// What a program binds at group 1, next to the transform at group 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialLayout {
    /// Nothing beyond the transform.
    None,
    /// A fragment uniform block, set by the shader in `pre_render`.
    Uniform,
    /// A sampled texture and sampler, set by the primitive.
    Texture,
}

/// WGSL source plus the entry points and bindings it expects.
#[derive(Debug, Clone)]
pub struct ProgramSource {
    pub wgsl: Cow<'static, str>,
    pub vertex_entry: &'static str,
    pub fragment_entry: &'static str,
    pub material: MaterialLayout,
}

/// Whether the vertex stage of `wgsl` declares the texture-coordinate input.
pub fn exposes_texture_coordinates(wgsl: &str) -> bool {
    static COMMENT: OnceLock<Regex> = OnceLock::new();
    static ATTRIBUTE: OnceLock<Regex> = OnceLock::new();

    let comment = COMMENT.get_or_init(|| Regex::new(r"//[^\n]*|/\*[\s\S]*?\*/").expect("valid regex"));
    let attribute = ATTRIBUTE.get_or_init(|| {
        Regex::new(&format!(
            r"@location\s*\(\s*1\s*\)\s*{TEXTURE_COORDINATE_ATTRIBUTE}\s*:"
        ))
        .expect("valid regex")
    });

    attribute.is_match(&comment.replace_all(wgsl, ""))
}

/// A program compiled for one context: its bind group layouts and one pipeline per
/// [`StencilPolicy`].
pub struct CompiledProgram {
    id: u64,
    name: String,
    valid: bool,
    uses_texture_coords: bool,
    material: MaterialLayout,
    transform_layout: BindGroupLayout,
    material_layout: Option<BindGroupLayout>,
    pipelines: Vec<RenderPipeline>,
}

/// Shared handle to a [`CompiledProgram`]. Clones refer to the same compiled program and
/// compare equal.
#[derive(Clone)]
pub struct ProgramHandle(Arc<CompiledProgram>);

impl ProgramHandle {
    /// Process-unique id of the compiled program.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// False when compilation or linking reported an error. Draws with an invalid program are
    /// skipped.
    pub fn is_valid(&self) -> bool {
        self.0.valid
    }

    pub fn uses_texture_coords(&self) -> bool {
        self.0.uses_texture_coords
    }

    pub fn material(&self) -> MaterialLayout {
        self.0.material
    }

    pub(crate) fn transform_layout(&self) -> &BindGroupLayout {
        &self.0.transform_layout
    }

    pub(crate) fn material_layout(&self) -> Option<&BindGroupLayout> {
        self.0.material_layout.as_ref()
    }

    pub(crate) fn pipeline(&self, policy: StencilPolicy) -> Option<&RenderPipeline> {
        self.0.pipelines.get(policy.index())
    }
}

impl PartialEq for ProgramHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ProgramHandle {}

impl fmt::Debug for ProgramHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgramHandle")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("valid", &self.0.valid)
            .field("uses_texture_coords", &self.0.uses_texture_coords)
            .finish()
    }
}

/// Program name to compiled program, for one context. Grows monotonically.
#[derive(Default)]
pub struct ProgramCache {
    programs: RwLock<HashMap<String, ProgramHandle>>,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The program stored under `name`, or `None` when it has not been compiled yet.
    pub fn get_program(&self, name: &str) -> Option<ProgramHandle> {
        self.programs.read().get(name).cloned()
    }

    pub fn store_program(&self, name: &str, handle: ProgramHandle) {
        let previous = self.programs.write().insert(name.to_owned(), handle);
        if previous.is_some() {
            tracing::warn!(program = name, "replaced an already compiled program");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.programs.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.programs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.read().is_empty()
    }
}

/// Compiles `source` into a program for `context`.
///
/// A failed compile is logged and reported as a [`Diagnostic::ShaderCompilation`]; the handle is
/// returned anyway, marked invalid.
pub fn compile_program(context: &RenderingContext, name: &str, source: &ProgramSource) -> ProgramHandle {
    let device = context.device();
    tracing::debug!(program = name, "compiling shader program");

    let (module, compile_error) = with_validation_scope(device, name, || {
        device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(name),
            source: wgpu::ShaderSource::Wgsl(source.wgsl.clone()),
        })
    });

    let uses_texture_coords = exposes_texture_coordinates(&source.wgsl);
    let transform_layout = create_transform_bind_group_layout(device);
    let material_layout = match source.material {
        MaterialLayout::None => None,
        MaterialLayout::Uniform => Some(create_uniform_material_bind_group_layout(device)),
        MaterialLayout::Texture => Some(create_texture_material_bind_group_layout(device)),
    };

    let mut bind_group_layouts = vec![&transform_layout];
    bind_group_layouts.extend(material_layout.as_ref());
    let layout_label = format!("{name}_layout");
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&layout_label),
        bind_group_layouts: &bind_group_layouts,
        push_constant_ranges: &[],
    });

    let stages = PipelineStages {
        module: &module,
        vertex_entry: source.vertex_entry,
        fragment_entry: source.fragment_entry,
        layout: &pipeline_layout,
        uses_texture_coords,
    };
    let (pipelines, link_error) = with_validation_scope(device, name, || {
        create_policy_pipelines(device, context.config(), name, &stages)
    });

    let failure = compile_error.or(link_error).map(|error| match error {
        GraphicsError::Validation { message, .. } => GraphicsError::ShaderCompilation {
            program: name.to_owned(),
            message,
        },
        other => other,
    });
    let valid = failure.is_none();
    if let Some(error) = &failure {
        tracing::error!(program = name, "{error}");
        context.report(Diagnostic::from(error));
    } else {
        tracing::debug!(program = name, uses_texture_coords, "shader program compiled");
    }

    ProgramHandle(Arc::new(CompiledProgram {
        id: NEXT_PROGRAM_ID.fetch_add(1, Ordering::Relaxed),
        name: name.to_owned(),
        valid,
        uses_texture_coords,
        material: source.material,
        transform_layout,
        material_layout,
        pipelines,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_the_texture_coordinate_input() {
        let wgsl = r"
            struct VertexInput {
                @location(0) position: vec3<f32>,
                @location(1) tex_coord: vec2<f32>,
            };
        ";
        assert!(exposes_texture_coordinates(wgsl));
    }

    #[test]
    fn ignores_commented_out_inputs() {
        let wgsl = r"
            struct VertexInput {
                @location(0) position: vec3<f32>,
                // @location(1) tex_coord: vec2<f32>,
                /* @location(1) tex_coord: vec2<f32>, */
            };
        ";
        assert!(!exposes_texture_coordinates(wgsl));
    }

    #[test]
    fn other_inputs_at_location_one_do_not_count() {
        let wgsl = "struct VertexInput { @location(1) normal: vec3<f32>, };";
        assert!(!exposes_texture_coordinates(wgsl));
    }

    #[test]
    fn empty_cache_has_no_programs() {
        let cache = ProgramCache::new();
        assert!(cache.is_empty());
        assert!(cache.get_program("ColorShader").is_none());
        assert!(!cache.contains("ColorShader"));
    }
}
