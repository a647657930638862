// ============================================================================
// image_io.rs — TriEvo
// Reference image decoding/upload and the persistent canvas texture
// (creation, readback, PNG export).
// ============================================================================

use std::path::Path;

use crate::error::{EngineError, Result};
use crate::gpu::GpuContext;

pub const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Decoded reference: RGBA8, rows top-to-bottom as the decoder returns them.
#[derive(Clone, Debug)]
pub struct ReferenceImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl ReferenceImage {
    pub fn open(path: &Path) -> Result<Self> {
        let img = image::open(path)
            .map_err(|source| EngineError::ImageDecode {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgba8();
        let (width, height) = img.dimensions();
        log::info!("Reference image {:?}: {}x{}", path, width, height);
        Self::from_rgba(width, height, img.into_raw())
    }

    pub fn from_rgba(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(EngineError::InvalidConfig(format!(
                "reference image must not be empty ({width}x{height})"
            )));
        }
        let expected = (width * height * 4) as usize;
        if rgba.len() != expected {
            return Err(EngineError::SizeMismatch {
                expected,
                actual: rgba.len(),
            });
        }
        Ok(Self { width, height, rgba })
    }

    #[cfg(test)]
    pub fn solid(width: u32, height: u32, color: [u8; 4]) -> Self {
        Self {
            width,
            height,
            rgba: color.repeat((width * height) as usize),
        }
    }
}

/// Reject images the device cannot hold as a 2D texture.
pub fn check_texture_size(gpu: &GpuContext, width: u32, height: u32) -> Result<()> {
    let max = gpu.device.limits().max_texture_dimension_2d;
    if width > max || height > max {
        return Err(EngineError::InvalidConfig(format!(
            "image {width}x{height} exceeds the device texture limit of {max}"
        )));
    }
    Ok(())
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

/// Read-only reference on the GPU. Never written after upload.
pub struct ReferenceTexture {
    pub width: u32,
    pub height: u32,
    pub view: wgpu::TextureView,
}

impl ReferenceTexture {
    pub fn upload(gpu: &GpuContext, image: &ReferenceImage) -> Self {
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("reference"),
            size: extent(image.width, image.height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &image.rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(image.width * 4),
                rows_per_image: Some(image.height),
            },
            extent(image.width, image.height),
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            width: image.width,
            height: image.height,
            view,
        }
    }
}

/// Persistent output image. Written only by the compositor kernel; starts
/// out as transparent black.
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl Canvas {
    pub fn new(gpu: &GpuContext, width: u32, height: u32) -> Self {
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("canvas"),
            size: extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            width,
            height,
            texture,
            view,
        }
    }

    /// Tightly packed RGBA8 rows, texture row 0 first. Blocks until the copy
    /// has completed.
    pub fn read_pixels(&self, gpu: &GpuContext) -> Result<Vec<u8>> {
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let unpadded_bpr = self.width * 4;
        let padded_bpr = (unpadded_bpr + align - 1) / align * align;

        let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("canvas_staging"),
            size: (padded_bpr * self.height) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("canvas_readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bpr),
                    rows_per_image: Some(self.height),
                },
            },
            extent(self.width, self.height),
        );
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        gpu.wait_idle();
        rx.recv()
            .map_err(|_| EngineError::BufferMapping("map callback dropped".into()))?
            .map_err(|e| EngineError::BufferMapping(e.to_string()))?;

        let data = slice.get_mapped_range();
        let mut rgba = Vec::with_capacity((unpadded_bpr * self.height) as usize);
        for row in 0..self.height {
            let start = (row * padded_bpr) as usize;
            rgba.extend_from_slice(&data[start..start + unpadded_bpr as usize]);
        }
        drop(data);
        staging.unmap();
        Ok(rgba)
    }

    pub fn save_png(&self, gpu: &GpuContext, path: &Path) -> Result<()> {
        let rgba = self.read_pixels(gpu)?;
        let img = image::RgbaImage::from_raw(self.width, self.height, rgba).ok_or(
            EngineError::SizeMismatch {
                expected: (self.width * self.height * 4) as usize,
                actual: 0,
            },
        )?;
        img.save(path).map_err(|source| EngineError::ImageEncode {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Saved canvas to {:?}", path);
        Ok(())
    }
}
