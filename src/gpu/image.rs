// gpu/image.rs — Device-resident luma images.
//
// Every pyramid level is an R32Float texture holding integer values in
// [0, 255]. The downsample kernel reads one level as `texture_2d<f32>` and
// writes the next through `texture_storage_2d<r32float, write>`, so each
// texture carries both TEXTURE_BINDING and STORAGE_BINDING usage.
//
//
// ROW ALIGNMENT
// ─────────────
// wgpu's buffer↔texture copies require `bytes_per_row` to be a multiple of
// `COPY_BYTES_PER_ROW_ALIGNMENT` (256). Uploads pack each row of f32 pixels
// into a staging buffer at that pitch; read-backs strip the padding again.
//
//
// WHY R32FLOAT AND NOT R8UINT?
// ────────────────────────────
// R8 formats are not valid storage-texture formats in baseline WebGPU, and
// the kernels need to write levels 1..3 from a shader. R32Float is storable
// everywhere and represents 0..=255 exactly, so the GPU levels compare
// byte-for-byte with the host kernels after conversion.

use wgpu::util::DeviceExt;

use crate::error::RuntimeError;
use crate::geometry::Dims;
use crate::gpu::device::GpuDevice;
use crate::image::Image;

const BYTES_PER_PIXEL: u32 = 4;

/// A luma image on the GPU as an R32Float texture.
pub struct GpuImage {
    pub texture: wgpu::Texture,
    /// View for binding as `texture_2d<f32>` input.
    pub read_view: wgpu::TextureView,
    /// View for binding as `texture_storage_2d<r32float, write>` output.
    pub write_view: wgpu::TextureView,
    pub dims: Dims,
}

impl GpuImage {
    /// Allocate an uninitialised texture.
    pub fn new(gpu: &GpuDevice, dims: Dims, label: &str) -> Result<Self, RuntimeError> {
        let (texture, err) = gpu.scoped(|device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: extent(dims),
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::R32Float,
                usage: wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::STORAGE_BINDING
                    | wgpu::TextureUsages::COPY_DST // frame upload
                    | wgpu::TextureUsages::COPY_SRC, // read-back
                view_formats: &[],
            })
        });
        if let Some(e) = err {
            return Err(RuntimeError::Allocation { what: format!("texture {label} ({dims})"), message: e.to_string() });
        }
        let read_view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let write_view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(GpuImage { texture, read_view, write_view, dims })
    }

    /// Queue a copy of `src` into this texture.
    ///
    /// The copy is ordered before any later submission on the same queue.
    pub fn upload(&self, gpu: &GpuDevice, src: &Image<u8>) -> Result<(), RuntimeError> {
        if src.dims() != self.dims {
            return Err(RuntimeError::DimensionMismatch { expected: self.dims, actual: src.dims() });
        }
        let (staging, bytes_per_row) = pack_rows(src);
        let staging_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("GpuImage::staging"),
            contents: &staging,
            usage: wgpu::BufferUsages::COPY_SRC,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("GpuImage::upload") });
        encoder.copy_buffer_to_texture(
            wgpu::ImageCopyBuffer {
                buffer: &staging_buf,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(self.dims.height),
                },
            },
            self.copy_target(),
            extent(self.dims),
        );
        gpu.submit("image upload", encoder)
    }

    /// Copy the texture back to the host. Blocks until queued work is done.
    pub fn readback(&self, gpu: &GpuDevice) -> Result<Image<u8>, RuntimeError> {
        let bytes_per_row = align_to(self.dims.width * BYTES_PER_PIXEL, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GpuImage::readback"),
            size: (bytes_per_row * self.dims.height) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("GpuImage::readback") });
        encoder.copy_texture_to_buffer(
            self.copy_target(),
            wgpu::ImageCopyBuffer {
                buffer: &readback_buf,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(self.dims.height),
                },
            },
            extent(self.dims),
        );
        gpu.submit("image read-back", encoder)?;

        let bytes = gpu.map_read(&readback_buf)?;
        Ok(unpack_rows(&bytes, self.dims, bytes_per_row))
    }

    fn copy_target(&self) -> wgpu::ImageCopyTexture<'_> {
        wgpu::ImageCopyTexture {
            texture: &self.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        }
    }
}

fn extent(dims: Dims) -> wgpu::Extent3d {
    wgpu::Extent3d { width: dims.width, height: dims.height, depth_or_array_layers: 1 }
}

/// Convert `src` to little-endian f32 rows at the copy pitch.
///
/// Returns the staging bytes and the padded `bytes_per_row`.
fn pack_rows(src: &Image<u8>) -> (Vec<u8>, u32) {
    let width = src.width() as u32;
    let bytes_per_row = align_to(width * BYTES_PER_PIXEL, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
    let mut staging = vec![0u8; bytes_per_row as usize * src.height()];
    for (y, dst_row) in staging.chunks_exact_mut(bytes_per_row as usize).enumerate() {
        for (dst, &p) in dst_row.chunks_exact_mut(4).zip(src.row(y)) {
            dst.copy_from_slice(&(p as f32).to_le_bytes());
        }
    }
    (staging, bytes_per_row)
}

/// Inverse of [`pack_rows`]: strip row padding and round back to u8.
fn unpack_rows(bytes: &[u8], dims: Dims, bytes_per_row: u32) -> Image<u8> {
    let width = dims.width as usize;
    let mut data = Vec::with_capacity(dims.pixel_count());
    for row in bytes.chunks_exact(bytes_per_row as usize).take(dims.height as usize) {
        data.extend(row[..width * 4].chunks_exact(4).map(|b| {
            let v = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            v.round().clamp(0.0, 255.0) as u8
        }));
    }
    Image::from_vec(width, dims.height as usize, data)
}

/// Round `value` up to the next multiple of `alignment`.
#[inline]
pub(crate) fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_to() {
        assert_eq!(align_to(0, 256), 0);
        assert_eq!(align_to(1, 256), 256);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(257, 256), 512);
        assert_eq!(align_to(176 * 4, 256), 768);
    }

    #[test]
    fn test_pack_rows_pads_each_row() {
        let img = Image::from_vec(3, 2, vec![10u8, 20, 30, 40, 50, 60]);
        let (staging, bpr) = pack_rows(&img);
        assert_eq!(bpr, 256);
        assert_eq!(staging.len(), 512);
        assert_eq!(&staging[4..8], &20.0f32.to_le_bytes());
        assert_eq!(&staging[256..260], &40.0f32.to_le_bytes());
        // Padding stays zero.
        assert!(staging[12..256].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_unpack_inverts_pack() {
        let img = Image::from_fn(70, 5, |x, y| (x * 3 + y * 50) as u8);
        let (staging, bpr) = pack_rows(&img);
        assert_eq!(unpack_rows(&staging, img.dims(), bpr), img);
    }
}
