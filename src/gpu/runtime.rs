// gpu/runtime.rs — `ComputeRuntime` on wgpu.
//
// RESOURCES
// ─────────
//   Image          GpuImage (R32Float texture)
//   MotionField    storage buffer of `MotionHypothesis` (16 bytes each)
//   ResultBuffers  four storage buffers + one MAP_READ staging buffer:
//
//     modes       8·n bytes  array<vec2<u32>>  low/high 32 bits of the u64
//     shapes      4·n bytes  array<u32>
//     residuals   4·n bytes  array<u32>
//     inter_best  4·n bytes  array<u32>
//
//   The staging buffer is laid out as the four buffers back to back, so
//   one copy command list and one map fetch a whole frame.
//
// QUEUE MODEL
// ───────────
// Every upload and dispatch is its own submission on the single
// `wgpu::Queue`, which executes submissions in order. Nothing here waits
// except `read_*`, which maps a buffer and polls the device to completion.

use tracing::trace;

use crate::error::RuntimeError;
use crate::geometry::{Dims, MacroblockGrid};
use crate::gpu::device::GpuDevice;
use crate::gpu::image::GpuImage;
use crate::gpu::pipelines::{DownsampleParams, HmeParams, IntraParams, Kernels};
use crate::image::Image;
use crate::kernels::saturate_u16;
use crate::results::{IntraMode, IntraShape, ResultBlock};
use crate::runtime::{ComputeRuntime, IntraPass, MotionHypothesis, MotionPass};

const HYPOTHESIS_BYTES: u64 = std::mem::size_of::<MotionHypothesis>() as u64;

/// A motion field in a storage buffer.
pub struct GpuMotionField {
    pub buffer: wgpu::Buffer,
    pub grid: MacroblockGrid,
}

/// The intra kernel's four output buffers and their read-back staging.
pub struct GpuResultBuffers {
    modes: wgpu::Buffer,
    shapes: wgpu::Buffer,
    residuals: wgpu::Buffer,
    inter_best: wgpu::Buffer,
    readback: wgpu::Buffer,
    grid: MacroblockGrid,
}

/// Byte offsets of the four result sections in the staging buffer.
fn result_layout(n: u64) -> [(u64, u64); 4] {
    // (offset, size): modes, shapes, residuals, inter_best
    [(0, 8 * n), (8 * n, 4 * n), (12 * n, 4 * n), (16 * n, 4 * n)]
}

/// Rebuild per-block records from the staged result bytes.
fn decode_results(bytes: &[u8], n: usize, out: &mut Vec<ResultBlock>) -> Result<(), RuntimeError> {
    let layout = result_layout(n as u64);
    let total = (layout[3].0 + layout[3].1) as usize;
    if bytes.len() < total {
        return Err(RuntimeError::Readback(format!("staging holds {} bytes, need {total}", bytes.len())));
    }
    let section = |i: usize| -> Vec<u32> {
        let (off, len) = layout[i];
        bytes[off as usize..(off + len) as usize]
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<u32>)
            .collect()
    };
    let modes = section(0);
    let shapes = section(1);
    let residuals = section(2);
    let inter_best = section(3);

    out.clear();
    out.reserve(n);
    for k in 0..n {
        let code = shapes[k];
        let intra_shape = u8::try_from(code)
            .ok()
            .and_then(IntraShape::from_code)
            .ok_or_else(|| RuntimeError::Readback(format!("block {k}: invalid shape code {code}")))?;
        out.push(ResultBlock {
            intra_mode: IntraMode(modes[2 * k] as u64 | (modes[2 * k + 1] as u64) << 32),
            intra_shape,
            intra_residual: saturate_u16(residuals[k]),
            inter_best_residual: saturate_u16(inter_best[k]),
        });
    }
    Ok(())
}

/// wgpu-backed compute runtime.
pub struct GpuRuntime {
    kernels: Kernels,
    /// Bound in place of a seed field on unseeded passes.
    placeholder_seed: wgpu::Buffer,
    gpu: GpuDevice,
}

impl GpuRuntime {
    /// Open the default GPU and compile the kernels.
    pub fn new() -> Result<Self, RuntimeError> {
        Self::with_device(GpuDevice::new()?)
    }

    pub fn with_device(gpu: GpuDevice) -> Result<Self, RuntimeError> {
        let kernels = Kernels::new(&gpu)?;
        let placeholder_seed = create_buffer(
            &gpu,
            "placeholder seed",
            HYPOTHESIS_BYTES,
            wgpu::BufferUsages::STORAGE,
        )?;
        Ok(GpuRuntime { kernels, placeholder_seed, gpu })
    }

    pub fn device(&self) -> &GpuDevice {
        &self.gpu
    }
}

fn create_buffer(
    gpu: &GpuDevice,
    label: &str,
    size: u64,
    usage: wgpu::BufferUsages,
) -> Result<wgpu::Buffer, RuntimeError> {
    // wgpu zero-initialises new buffers.
    let (buffer, err) = gpu.scoped(|device| {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: size.max(4),
            usage,
            mapped_at_creation: false,
        })
    });
    match err {
        Some(e) => Err(RuntimeError::Allocation { what: format!("buffer {label} ({size} bytes)"), message: e.to_string() }),
        None => Ok(buffer),
    }
}

impl ComputeRuntime for GpuRuntime {
    type Image = GpuImage;
    type MotionField = GpuMotionField;
    type ResultBuffers = GpuResultBuffers;

    fn name(&self) -> &str {
        &self.gpu.adapter_info.name
    }

    fn create_image(&mut self, dims: Dims, label: &str) -> Result<GpuImage, RuntimeError> {
        if dims.is_empty() {
            return Err(RuntimeError::Allocation { what: label.to_string(), message: format!("empty image {dims}") });
        }
        GpuImage::new(&self.gpu, dims, label)
    }

    fn create_motion_field(&mut self, grid: MacroblockGrid, label: &str) -> Result<GpuMotionField, RuntimeError> {
        let buffer = create_buffer(
            &self.gpu,
            label,
            grid.len() as u64 * HYPOTHESIS_BYTES,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        )?;
        Ok(GpuMotionField { buffer, grid })
    }

    fn create_result_buffers(&mut self, grid: MacroblockGrid) -> Result<GpuResultBuffers, RuntimeError> {
        let n = grid.len() as u64;
        let [modes, shapes, residuals, inter_best] = result_layout(n);
        let usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC;
        Ok(GpuResultBuffers {
            modes: create_buffer(&self.gpu, "intra modes", modes.1, usage)?,
            shapes: create_buffer(&self.gpu, "intra shapes", shapes.1, usage)?,
            residuals: create_buffer(&self.gpu, "intra residuals", residuals.1, usage)?,
            inter_best: create_buffer(&self.gpu, "inter-best residuals", inter_best.1, usage)?,
            readback: create_buffer(
                &self.gpu,
                "result read-back",
                inter_best.0 + inter_best.1,
                wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            )?,
            grid,
        })
    }

    fn upload_image(&mut self, dst: &GpuImage, src: &Image<u8>) -> Result<(), RuntimeError> {
        dst.upload(&self.gpu, src)
    }

    fn enqueue_downsample(&mut self, src: &GpuImage, dst: &GpuImage) -> Result<(), RuntimeError> {
        let expected = src.dims.half();
        if dst.dims != expected {
            return Err(RuntimeError::DimensionMismatch { expected, actual: dst.dims });
        }
        trace!(from = %src.dims, to = %dst.dims, "gpu downsample");
        let params = DownsampleParams {
            dst_width: dst.dims.width,
            dst_height: dst.dims.height,
            src_width: src.dims.width,
            src_height: src.dims.height,
        };
        self.kernels.downsample.dispatch(
            &self.gpu,
            &[
                wgpu::BindingResource::TextureView(&src.read_view),
                wgpu::BindingResource::TextureView(&dst.write_view),
            ],
            &params,
            self.gpu.dispatch_size(dst.dims.width, dst.dims.height),
        )
    }

    fn enqueue_motion_search(&mut self, pass: &MotionPass<'_, Self>) -> Result<(), RuntimeError> {
        for image in [pass.src, pass.reference] {
            if image.dims != pass.dims {
                return Err(RuntimeError::DimensionMismatch { expected: pass.dims, actual: image.dims });
            }
        }
        let grid = pass.grid();
        if pass.out.grid != grid {
            return Err(RuntimeError::Execution {
                operation: "motion search",
                message: format!("output field is {} blocks, level needs {grid}", pass.out.grid),
            });
        }
        let (seed_buffer, seed_grid, has_seed) = match pass.seed {
            Some(seed) => (&seed.field.buffer, seed.grid, 1),
            None => (&self.placeholder_seed, MacroblockGrid { cols: 1, rows: 1 }, 0),
        };
        trace!(scale = %pass.scale, %grid, seeded = has_seed == 1, "gpu motion search");

        let params = HmeParams {
            width: pass.dims.width,
            height: pass.dims.height,
            grid_cols: grid.cols,
            grid_rows: grid.rows,
            seed_cols: seed_grid.cols,
            seed_rows: seed_grid.rows,
            has_seed,
            search_range: pass.params.search_range,
            lambda: pass.params.lambda(),
            _pad: [0; 3],
        };
        self.kernels.motion.dispatch(
            &self.gpu,
            &[
                wgpu::BindingResource::TextureView(&pass.src.read_view),
                wgpu::BindingResource::TextureView(&pass.reference.read_view),
                seed_buffer.as_entire_binding(),
                pass.out.buffer.as_entire_binding(),
            ],
            &params,
            self.gpu.dispatch_size(grid.cols, grid.rows),
        )
    }

    fn enqueue_intra(&mut self, pass: &IntraPass<'_, Self>) -> Result<(), RuntimeError> {
        if pass.src.dims != pass.dims {
            return Err(RuntimeError::DimensionMismatch { expected: pass.dims, actual: pass.src.dims });
        }
        let grid = MacroblockGrid::for_dims(pass.dims);
        if pass.inter.grid != grid || pass.out.grid != grid {
            return Err(RuntimeError::Execution {
                operation: "intra prediction",
                message: format!("buffers sized {} / {}, frame needs {grid}", pass.inter.grid, pass.out.grid),
            });
        }
        trace!(dims = %pass.dims, "gpu intra prediction");

        let params = IntraParams {
            width: pass.dims.width,
            height: pass.dims.height,
            grid_cols: grid.cols,
            grid_rows: grid.rows,
            lambda: pass.params.lambda(),
            _pad: [0; 3],
        };
        let out = pass.out;
        self.kernels.intra.dispatch(
            &self.gpu,
            &[
                wgpu::BindingResource::TextureView(&pass.src.read_view),
                pass.inter.buffer.as_entire_binding(),
                out.modes.as_entire_binding(),
                out.shapes.as_entire_binding(),
                out.residuals.as_entire_binding(),
                out.inter_best.as_entire_binding(),
            ],
            &params,
            self.gpu.dispatch_size(grid.cols, grid.rows),
        )
    }

    fn read_results(&mut self, buffers: &GpuResultBuffers, out: &mut Vec<ResultBlock>) -> Result<(), RuntimeError> {
        let n = buffers.grid.len();
        let layout = result_layout(n as u64);
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("result read-back") });
        for (src, (offset, size)) in
            [&buffers.modes, &buffers.shapes, &buffers.residuals, &buffers.inter_best].into_iter().zip(layout)
        {
            encoder.copy_buffer_to_buffer(src, 0, &buffers.readback, offset, size);
        }
        self.gpu.submit("result read-back", encoder)?;

        let bytes = self.gpu.map_read(&buffers.readback)?;
        decode_results(&bytes, n, out)
    }

    fn read_image(&mut self, image: &GpuImage) -> Result<Image<u8>, RuntimeError> {
        image.readback(&self.gpu)
    }

    fn read_motion_field(&mut self, field: &GpuMotionField) -> Result<Vec<MotionHypothesis>, RuntimeError> {
        let size = field.grid.len() as u64 * HYPOTHESIS_BYTES;
        let staging = create_buffer(
            &self.gpu,
            "motion field read-back",
            size,
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        )?;
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("motion field read-back") });
        encoder.copy_buffer_to_buffer(&field.buffer, 0, &staging, 0, size);
        self.gpu.submit("motion field read-back", encoder)?;

        let bytes = self.gpu.map_read(&staging)?;
        Ok(bytes[..size as usize]
            .chunks_exact(HYPOTHESIS_BYTES as usize)
            .map(bytemuck::pod_read_unaligned::<MotionHypothesis>)
            .collect())
    }
}
