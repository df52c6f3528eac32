use wgpu::util::DeviceExt;
use wgpu::{BindGroupLayout, BufferUsages, Device, RenderPipeline, ShaderModule};

use crate::context::ContextConfig;

/// Stencil reference a mask draw writes, and a masked draw tests against.
pub const MASK_REFERENCE: u32 = 128;
/// Stencil reference an inverse-masked draw tests against: outside every mask.
pub const INVERSE_MASK_REFERENCE: u32 = 0;

/// Vertex positions, xyz.
pub(crate) const POSITION_ATTRIBUTES: [wgpu::VertexAttribute; 1] =
    wgpu::vertex_attr_array![0 => Float32x3];
/// Texture coordinates, uv.
pub(crate) const TEXTURE_COORDINATE_ATTRIBUTES: [wgpu::VertexAttribute; 1] =
    wgpu::vertex_attr_array![1 => Float32x2];

/// The 4x4 model-view-projection matrix every primitive binds at group 0.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TransformUniform {
    pub mvp: [f32; 16],
}

/// Reference a masked draw compares the stencil buffer against.
pub fn mask_reference(is_inverse_masked: bool) -> u32 {
    if is_inverse_masked {
        INVERSE_MASK_REFERENCE
    } else {
        MASK_REFERENCE
    }
}

/// How a draw interacts with the stencil buffer. Every compiled program carries one
/// pipeline per policy.
///
/// Quads and polygons use different policies: quads test a single mask bit and
/// never write while drawing, polygons test the whole byte and increment on every draw so
/// overlapping polygons inside one mask only paint once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilPolicy {
    /// Plain draw, stencil untouched.
    Unmasked,
    /// Draw only where the mask bit equals the reference.
    QuadMasked,
    /// Color off, writes the reference into the stencil buffer.
    QuadMask,
    /// Unmasked polygon draw that still counts coverage in the stencil buffer.
    PolygonCounting,
    /// Draw only where the stencil equals the reference, then increment it.
    PolygonMasked,
    /// Color off, increments the stencil buffer.
    PolygonMask,
}

impl StencilPolicy {
    pub const ALL: [StencilPolicy; 6] = [
        StencilPolicy::Unmasked,
        StencilPolicy::QuadMasked,
        StencilPolicy::QuadMask,
        StencilPolicy::PolygonCounting,
        StencilPolicy::PolygonMasked,
        StencilPolicy::PolygonMask,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            StencilPolicy::Unmasked => 0,
            StencilPolicy::QuadMasked => 1,
            StencilPolicy::QuadMask => 2,
            StencilPolicy::PolygonCounting => 3,
            StencilPolicy::PolygonMasked => 4,
            StencilPolicy::PolygonMask => 5,
        }
    }

    fn label(self) -> &'static str {
        match self {
            StencilPolicy::Unmasked => "unmasked",
            StencilPolicy::QuadMasked => "quad_masked",
            StencilPolicy::QuadMask => "quad_mask",
            StencilPolicy::PolygonCounting => "polygon_counting",
            StencilPolicy::PolygonMasked => "polygon_masked",
            StencilPolicy::PolygonMask => "polygon_mask",
        }
    }

    /// Whether the draw produces visible color.
    pub fn color_writes(self) -> wgpu::ColorWrites {
        match self {
            StencilPolicy::QuadMask | StencilPolicy::PolygonMask => wgpu::ColorWrites::empty(),
            _ => wgpu::ColorWrites::ALL,
        }
    }

    pub fn stencil_state(self) -> wgpu::StencilState {
        match self {
            StencilPolicy::Unmasked => wgpu::StencilState {
                front: wgpu::StencilFaceState::IGNORE,
                back: wgpu::StencilFaceState::IGNORE,
                read_mask: 0,
                write_mask: 0,
            },
            StencilPolicy::QuadMasked => create_stencil_state(
                wgpu::CompareFunction::Equal,
                wgpu::StencilOperation::Keep,
                MASK_REFERENCE,
                0,
            ),
            StencilPolicy::QuadMask => create_stencil_state(
                wgpu::CompareFunction::Always,
                wgpu::StencilOperation::Replace,
                0xff,
                0xff,
            ),
            StencilPolicy::PolygonCounting | StencilPolicy::PolygonMask => create_stencil_state(
                wgpu::CompareFunction::Always,
                wgpu::StencilOperation::IncrementClamp,
                0xff,
                0xff,
            ),
            StencilPolicy::PolygonMasked => create_stencil_state(
                wgpu::CompareFunction::Equal,
                wgpu::StencilOperation::IncrementClamp,
                0xff,
                0xff,
            ),
        }
    }
}

fn create_stencil_state(
    compare: wgpu::CompareFunction,
    pass_op: wgpu::StencilOperation,
    read_mask: u32,
    write_mask: u32,
) -> wgpu::StencilState {
    // Failing fragments never touch the stencil value.
    let face_state = wgpu::StencilFaceState {
        compare,
        fail_op: wgpu::StencilOperation::Keep,
        depth_fail_op: wgpu::StencilOperation::Keep,
        pass_op,
    };

    wgpu::StencilState {
        front: face_state,
        back: face_state,
        read_mask,
        write_mask,
    }
}

fn create_depth_stencil_state(
    format: wgpu::TextureFormat,
    policy: StencilPolicy,
) -> wgpu::DepthStencilState {
    wgpu::DepthStencilState {
        format,
        depth_write_enabled: false,
        depth_compare: wgpu::CompareFunction::Always,
        stencil: policy.stencil_state(),
        bias: wgpu::DepthBiasState::default(),
    }
}

/// Premultiplied-alpha blending: `ONE, ONE_MINUS_SRC_ALPHA`.
fn premultiplied_blend_state() -> wgpu::BlendState {
    let component = wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    };
    wgpu::BlendState {
        color: component,
        alpha: component,
    }
}

/// Layout of the per-primitive transform uniform (group 0).
pub(crate) fn create_transform_bind_group_layout(device: &Device) -> BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("transform_bind_group_layout"),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
    })
}

/// Layout of a fragment-stage uniform block (group 1), e.g. a flat color.
pub(crate) fn create_uniform_material_bind_group_layout(device: &Device) -> BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("uniform_material_bind_group_layout"),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
    })
}

/// Layout of a sampled texture plus its sampler (group 1).
pub(crate) fn create_texture_material_bind_group_layout(device: &Device) -> BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("texture_material_bind_group_layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
    })
}

pub(crate) struct PipelineStages<'a> {
    pub module: &'a ShaderModule,
    pub vertex_entry: &'a str,
    pub fragment_entry: &'a str,
    pub layout: &'a wgpu::PipelineLayout,
    pub uses_texture_coords: bool,
}

/// Builds one render pipeline per [`StencilPolicy`], indexed by [`StencilPolicy::index`].
pub(crate) fn create_policy_pipelines(
    device: &Device,
    config: &ContextConfig,
    program_name: &str,
    stages: &PipelineStages<'_>,
) -> Vec<RenderPipeline> {
    let position_layout = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &POSITION_ATTRIBUTES,
    };
    let texture_coordinate_layout = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &TEXTURE_COORDINATE_ATTRIBUTES,
    };
    let mut buffers = vec![position_layout];
    if stages.uses_texture_coords {
        buffers.push(texture_coordinate_layout);
    }

    StencilPolicy::ALL
        .iter()
        .map(|&policy| {
            let label = format!("{program_name}_{}_pipeline", policy.label());
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&label),
                layout: Some(stages.layout),
                vertex: wgpu::VertexState {
                    module: stages.module,
                    entry_point: Some(stages.vertex_entry),
                    compilation_options: Default::default(),
                    buffers: &buffers,
                },
                fragment: Some(wgpu::FragmentState {
                    module: stages.module,
                    entry_point: Some(stages.fragment_entry),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: config.color_format,
                        blend: Some(premultiplied_blend_state()),
                        write_mask: policy.color_writes(),
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    ..Default::default()
                },
                depth_stencil: Some(create_depth_stencil_state(
                    config.depth_stencil_format,
                    policy,
                )),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        })
        .collect()
}

pub(crate) fn create_buffer_init(
    device: &Device,
    label: Option<&str>,
    contents: &[u8],
    usage: BufferUsages,
) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label,
        contents,
        usage,
    })
}

/// A fresh uniform buffer holding `contents`, bound at binding 0 of `layout`.
///
/// Each draw gets its own, so draws recorded into one pass never share uniform storage. The
/// buffer lives as long as the bind group, which the recorded pass keeps alive.
pub(crate) fn create_uniform_bind_group(
    device: &Device,
    layout: &BindGroupLayout,
    label: &str,
    contents: &[u8],
) -> wgpu::BindGroup {
    let buffer = create_buffer_init(device, Some(label), contents, BufferUsages::UNIFORM);
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: buffer.as_entire_binding(),
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_masking_selects_a_distinct_reference() {
        assert_eq!(mask_reference(false), 128);
        assert_eq!(mask_reference(true), 0);
        assert_ne!(mask_reference(false), mask_reference(true));
    }

    #[test]
    fn quad_masked_draws_test_the_mask_bit_without_writing() {
        let state = StencilPolicy::QuadMasked.stencil_state();
        assert_eq!(state.front.compare, wgpu::CompareFunction::Equal);
        assert_eq!(state.front.pass_op, wgpu::StencilOperation::Keep);
        assert_eq!(state.read_mask, MASK_REFERENCE);
        assert_eq!(state.write_mask, 0);
    }

    #[test]
    fn polygon_draws_increment_the_stencil() {
        for policy in [
            StencilPolicy::PolygonCounting,
            StencilPolicy::PolygonMasked,
            StencilPolicy::PolygonMask,
        ] {
            let state = policy.stencil_state();
            assert_eq!(state.front.fail_op, wgpu::StencilOperation::Keep);
            assert_eq!(state.front.depth_fail_op, wgpu::StencilOperation::Keep);
            assert_eq!(state.front.pass_op, wgpu::StencilOperation::IncrementClamp);
        }
        let masked = StencilPolicy::PolygonMasked.stencil_state();
        assert_eq!(masked.front.compare, wgpu::CompareFunction::Equal);
        assert_eq!(masked.read_mask, 0xff);
    }

    #[test]
    fn only_mask_policies_disable_color() {
        for policy in StencilPolicy::ALL {
            let is_mask = matches!(policy, StencilPolicy::QuadMask | StencilPolicy::PolygonMask);
            assert_eq!(policy.color_writes().is_empty(), is_mask, "{policy:?}");
        }
    }

    #[test]
    fn policy_indices_are_dense() {
        for (expected, policy) in StencilPolicy::ALL.iter().enumerate() {
            assert_eq!(policy.index(), expected);
        }
    }
}
