//! Headless render target: a color texture plus the depth/stencil attachment the masking
//! pipelines expect, with synchronous pixel readback.

use crate::context::RenderingContext;

const BYTES_PER_PIXEL: u32 = 4;

fn compute_padded_bytes_per_row(width: u32) -> (u32, u32) {
    let unpadded = width * BYTES_PER_PIXEL;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let padded = unpadded.div_ceil(align) * align;
    (unpadded, padded)
}

fn copy_padded_readback_rows(
    data: &[u8],
    height: u32,
    unpadded_bytes_per_row: u32,
    padded_bytes_per_row: u32,
) -> Vec<u8> {
    if padded_bytes_per_row == unpadded_bytes_per_row {
        return data[..(unpadded_bytes_per_row * height) as usize].to_vec();
    }

    let mut output = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
    for row in 0..height {
        let padded_offset = (row * padded_bytes_per_row) as usize;
        output.extend_from_slice(&data[padded_offset..padded_offset + unpadded_bytes_per_row as usize]);
    }
    output
}

pub struct OffscreenTarget {
    size: (u32, u32),
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth_stencil_view: wgpu::TextureView,
}

impl OffscreenTarget {
    /// Allocates color and depth/stencil textures in the context's configured formats.
    pub fn new(context: &RenderingContext, size: (u32, u32)) -> Self {
        let device = context.device();
        let config = context.config();
        let extent = wgpu::Extent3d {
            width: size.0.max(1),
            height: size.1.max(1),
            depth_or_array_layers: 1,
        };

        let color = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("offscreen_color_texture"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: config.color_format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let depth_stencil = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("offscreen_depth_stencil_texture"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: config.depth_stencil_format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });

        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_stencil_view = depth_stencil.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            size: (extent.width, extent.height),
            color,
            color_view,
            depth_stencil_view,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn color_view(&self) -> &wgpu::TextureView {
        &self.color_view
    }

    pub fn depth_stencil_view(&self) -> &wgpu::TextureView {
        &self.depth_stencil_view
    }

    /// Starts a pass that clears color to transparent black and the stencil buffer to 0.
    pub fn begin_pass<'e>(&self, encoder: &'e mut wgpu::CommandEncoder) -> wgpu::RenderPass<'e> {
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("offscreen_render_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.depth_stencil_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(0),
                    store: wgpu::StoreOp::Store,
                }),
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        })
    }

    /// Copies the color texture back to the CPU as tightly packed RGBA8 rows.
    ///
    /// Blocks until the GPU has finished. Returns an empty vector if mapping fails.
    pub fn read_pixels(&self, context: &RenderingContext) -> Vec<u8> {
        let (width, height) = self.size;
        let (unpadded_bytes_per_row, padded_bytes_per_row) = compute_padded_bytes_per_row(width);
        let device = context.device();

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("offscreen_readback_buffer"),
            size: (padded_bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("offscreen_readback_encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.color,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        context.queue().submit(std::iter::once(encoder.finish()));

        let buffer_slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            if sender.send(result).is_err() {
                tracing::warn!("failed to send map_async result from callback");
            }
        });

        let _ = device.poll(wgpu::MaintainBase::Wait);

        match receiver.recv() {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::warn!("failed to map readback buffer: {error:?}");
                return Vec::new();
            }
            Err(error) => {
                tracing::warn!("failed to receive mapped buffer result: {error}");
                return Vec::new();
            }
        }

        let pixels = {
            let mapped_range = buffer_slice.get_mapped_range();
            copy_padded_readback_rows(
                &mapped_range,
                height,
                unpadded_bytes_per_row,
                padded_bytes_per_row,
            )
        };
        buffer.unmap();
        pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_padded_to_the_copy_alignment() {
        assert_eq!(compute_padded_bytes_per_row(64), (256, 256));
        assert_eq!(compute_padded_bytes_per_row(3), (12, 256));
        assert_eq!(compute_padded_bytes_per_row(65), (260, 512));
    }

    #[test]
    fn padding_is_stripped_from_every_row() {
        let mut data = vec![0u8; 2 * 256];
        data[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        data[256..264].copy_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16]);

        let pixels = copy_padded_readback_rows(&data, 2, 8, 256);
        assert_eq!(pixels, (1..=16).collect::<Vec<u8>>());
    }
}
