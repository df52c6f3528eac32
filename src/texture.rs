//! Texture data handed to primitives, and the GPU textures made from it.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::RenderingContext;

/// Decoded pixel data that can be turned into a GPU texture on demand.
///
/// The backing texture may be larger than the image (e.g. padded to a power of two); primitives
/// scale their texture coordinates by `image / texture` in each axis.
pub trait TextureHolder: Send + Sync {
    fn image_width(&self) -> u32;
    fn image_height(&self) -> u32;
    fn texture_width(&self) -> u32;
    fn texture_height(&self) -> u32;

    /// Uploads the pixels if needed and returns a view of the backing texture.
    ///
    /// `None` means the texture could not be created; the caller renders without it.
    fn attach_to_graphics(&self, context: &RenderingContext) -> Option<Arc<wgpu::TextureView>>;

    /// Gives up one attachment. The GPU texture is released once nothing is attached.
    fn clear_from_graphics(&self);
}

/// Ratio of image size to backing-texture size, per axis. Degenerate sizes yield 1.0.
pub(crate) fn texture_factors(holder: &dyn TextureHolder) -> (f32, f32) {
    fn factor(image: u32, texture: u32) -> f32 {
        if image == 0 || texture == 0 {
            1.0
        } else {
            image as f32 / texture as f32
        }
    }
    (
        factor(holder.image_width(), holder.texture_width()),
        factor(holder.image_height(), holder.texture_height()),
    )
}

/// Converts straight-alpha RGBA8 pixels to premultiplied alpha in place.
///
/// Panics if `pixels.len()` is not a multiple of 4.
pub fn premultiply_rgba8_inplace(pixels: &mut [u8]) {
    assert!(
        pixels.len().is_multiple_of(4),
        "RGBA8 data length must be multiple of 4"
    );
    for px in pixels.chunks_mut(4) {
        let a = px[3] as u16;
        for channel in &mut px[..3] {
            *channel = ((*channel as u16 * a + 127) / 255) as u8;
        }
    }
}

struct BitmapState {
    /// The view owns its texture. Dropping it frees the texture once no recorded pass or
    /// bind group still uses it.
    gpu: Option<Arc<wgpu::TextureView>>,
    attachments: usize,
}

/// Premultiplied RGBA8 pixels in a texture padded up to power-of-two dimensions.
///
/// One GPU texture is shared by every primitive the bitmap is attached to.
pub struct BitmapTexture {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    state: Mutex<BitmapState>,
}

impl BitmapTexture {
    /// `pixels` must hold `width * height` premultiplied RGBA8 texels, row by row.
    ///
    /// Returns `None` when the buffer length does not match the dimensions.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        if pixels.len() != width as usize * height as usize * 4 {
            tracing::warn!(
                width,
                height,
                bytes = pixels.len(),
                "bitmap size does not match its pixel data"
            );
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
            state: Mutex::new(BitmapState {
                gpu: None,
                attachments: 0,
            }),
        })
    }

    /// Same as [`BitmapTexture::new`] for straight-alpha pixels.
    pub fn from_straight_alpha(width: u32, height: u32, mut pixels: Vec<u8>) -> Option<Self> {
        if !pixels.len().is_multiple_of(4) {
            return None;
        }
        premultiply_rgba8_inplace(&mut pixels);
        Self::new(width, height, pixels)
    }

    /// A `width x height` bitmap filled with one premultiplied color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba.repeat(width as usize * height as usize);
        Self {
            width,
            height,
            pixels,
            state: Mutex::new(BitmapState {
                gpu: None,
                attachments: 0,
            }),
        }
    }

    /// Whether a GPU texture currently exists.
    pub fn is_attached(&self) -> bool {
        self.state.lock().gpu.is_some()
    }

    fn upload(&self, context: &RenderingContext) -> Option<Arc<wgpu::TextureView>> {
        let size = wgpu::Extent3d {
            width: self.texture_width(),
            height: self.texture_height(),
            depth_or_array_layers: 1,
        };
        let (texture, valid) = context.checked("bitmap_texture", || {
            context.device().create_texture(&wgpu::TextureDescriptor {
                label: Some("bitmap_texture"),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            })
        });
        if !valid {
            return None;
        }

        if self.width > 0 && self.height > 0 {
            context.queue().write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                &self.pixels,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * self.width),
                    rows_per_image: Some(self.height),
                },
                wgpu::Extent3d {
                    width: self.width,
                    height: self.height,
                    depth_or_array_layers: 1,
                },
            );
        }

        tracing::debug!(
            width = self.width,
            height = self.height,
            texture_width = size.width,
            texture_height = size.height,
            "uploaded bitmap texture"
        );
        Some(Arc::new(
            texture.create_view(&wgpu::TextureViewDescriptor::default()),
        ))
    }
}

impl TextureHolder for BitmapTexture {
    fn image_width(&self) -> u32 {
        self.width
    }

    fn image_height(&self) -> u32 {
        self.height
    }

    fn texture_width(&self) -> u32 {
        self.width.max(1).next_power_of_two()
    }

    fn texture_height(&self) -> u32 {
        self.height.max(1).next_power_of_two()
    }

    fn attach_to_graphics(&self, context: &RenderingContext) -> Option<Arc<wgpu::TextureView>> {
        let mut state = self.state.lock();
        if state.gpu.is_none() {
            state.gpu = Some(self.upload(context)?);
        }
        state.attachments += 1;
        state.gpu.clone()
    }

    fn clear_from_graphics(&self) {
        let mut state = self.state.lock();
        state.attachments = state.attachments.saturating_sub(1);
        if state.attachments == 0 {
            state.gpu = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backing_texture_is_padded_to_powers_of_two() {
        let bitmap = BitmapTexture::solid(3, 5, [255, 0, 0, 255]);
        assert_eq!(bitmap.texture_width(), 4);
        assert_eq!(bitmap.texture_height(), 8);
        assert_eq!(texture_factors(&bitmap), (0.75, 0.625));
    }

    #[test]
    fn exact_powers_of_two_are_not_padded() {
        let bitmap = BitmapTexture::solid(16, 1, [0; 4]);
        assert_eq!(bitmap.texture_width(), 16);
        assert_eq!(bitmap.texture_height(), 1);
        assert_eq!(texture_factors(&bitmap), (1.0, 1.0));
    }

    #[test]
    fn empty_bitmaps_have_unit_factors() {
        let bitmap = BitmapTexture::solid(0, 0, [0; 4]);
        assert_eq!(texture_factors(&bitmap), (1.0, 1.0));
    }

    #[test]
    fn rejects_mismatched_pixel_data() {
        assert!(BitmapTexture::new(2, 2, vec![0; 15]).is_none());
        assert!(BitmapTexture::new(2, 2, vec![0; 16]).is_some());
    }

    #[test]
    fn premultiplies_color_channels_only() {
        let mut pixels = vec![255, 128, 0, 128, 10, 20, 30, 255, 200, 200, 200, 0];
        premultiply_rgba8_inplace(&mut pixels);
        assert_eq!(pixels, vec![128, 64, 0, 128, 10, 20, 30, 255, 0, 0, 0, 0]);
    }

    #[test]
    fn clearing_an_unattached_bitmap_is_harmless() {
        let bitmap = BitmapTexture::solid(2, 2, [0; 4]);
        bitmap.clear_from_graphics();
        bitmap.clear_from_graphics();
        assert!(!bitmap.is_attached());
    }
}
