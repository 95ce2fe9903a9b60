// gpu/pipelines.rs — Compiled compute pipelines for the three kernels.
//
//   downsample.wgsl  `downsample`     one invocation per destination pixel
//   hme.wgsl         `motion_search`  one invocation per macroblock
//   intra.wgsl       `intra_predict`  one invocation per macroblock
//
// Pipelines are built once, inside an error scope, when the runtime is
// created. A shader that fails to compile or a layout that fails
// validation surfaces as `RuntimeError::KernelBuild` there rather than on
// the first frame.
//
// Each dispatch gets its own bind group and uniform buffer (they are tiny)
// and is submitted as its own command buffer. The queue executes
// submissions in order, which is what sequences pyramid levels and HME
// passes.

use wgpu::util::DeviceExt;

use crate::error::RuntimeError;
use crate::gpu::device::GpuDevice;

// ---------------------------------------------------------------------------
// Kernel params uniforms (must match WGSL struct layouts exactly)
// ---------------------------------------------------------------------------

/// `DownsampleParams` in downsample.wgsl (16 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DownsampleParams {
    pub dst_width: u32,
    pub dst_height: u32,
    pub src_width: u32,
    pub src_height: u32,
}

/// `HmeParams` in hme.wgsl (48 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct HmeParams {
    pub width: u32,
    pub height: u32,
    pub grid_cols: u32,
    pub grid_rows: u32,
    pub seed_cols: u32,
    pub seed_rows: u32,
    /// 0 or 1. When 0 the seed binding holds a placeholder and is not read.
    pub has_seed: u32,
    pub search_range: u32,
    pub lambda: u32,
    pub _pad: [u32; 3],
}

/// `IntraParams` in intra.wgsl (32 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct IntraParams {
    pub width: u32,
    pub height: u32,
    pub grid_cols: u32,
    pub grid_rows: u32,
    pub lambda: u32,
    pub _pad: [u32; 3],
}

// ---------------------------------------------------------------------------
// Bind group layout entries
// ---------------------------------------------------------------------------

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            multisampled: false,
            view_dimension: wgpu::TextureViewDimension::D2,
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
        },
        count: None,
    }
}

fn storage_texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: wgpu::TextureFormat::R32Float,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

/// One compiled compute pipeline and the layout of its group 0.
pub struct Kernel {
    name: &'static str,
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
}

impl Kernel {
    /// Compile `template` (with workgroup placeholders) and build a pipeline
    /// for `entry_point`.
    fn build(
        gpu: &GpuDevice,
        name: &'static str,
        template: &str,
        entry_point: &'static str,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> Result<Self, RuntimeError> {
        let source = gpu.workgroup_size.specialize(template);
        let ((pipeline, bgl), err) = gpu.scoped(|device| {
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(name),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(name),
                entries,
            });
            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(name),
                bind_group_layouts: &[&bgl],
                push_constant_ranges: &[],
            });
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(name),
                layout: Some(&layout),
                module: &shader,
                entry_point,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
            (pipeline, bgl)
        });
        if let Some(e) = err {
            return Err(RuntimeError::KernelBuild { kernel: name, message: e.to_string() });
        }
        Ok(Kernel { name, pipeline, bgl })
    }

    /// Upload `params` as the uniform at `params_binding`, bind `resources`
    /// and submit one dispatch of `groups` workgroups.
    pub fn dispatch<P: bytemuck::Pod>(
        &self,
        gpu: &GpuDevice,
        resources: &[wgpu::BindingResource<'_>],
        params: &P,
        groups: (u32, u32),
    ) -> Result<(), RuntimeError> {
        let params_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(self.name),
            contents: bytemuck::bytes_of(params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let mut entries: Vec<wgpu::BindGroupEntry<'_>> = resources
            .iter()
            .enumerate()
            .map(|(i, r)| wgpu::BindGroupEntry { binding: i as u32, resource: r.clone() })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: resources.len() as u32,
            resource: params_buf.as_entire_binding(),
        });

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(self.name),
            layout: &self.bgl,
            entries: &entries,
        });

        let mut encoder =
            gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(self.name) });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(self.name),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups.0, groups.1, 1);
        }
        gpu.submit(self.name, encoder)
    }
}

/// The three analysis kernels.
pub struct Kernels {
    pub downsample: Kernel,
    pub motion: Kernel,
    pub intra: Kernel,
}

impl Kernels {
    pub fn new(gpu: &GpuDevice) -> Result<Self, RuntimeError> {
        // Bindings follow the @group(0) declarations in each shader; the
        // uniform params buffer is always last.
        let downsample = Kernel::build(
            gpu,
            "downsample",
            include_str!("../shaders/downsample.wgsl"),
            "downsample",
            &[texture_entry(0), storage_texture_entry(1), uniform_entry(2)],
        )?;
        let motion = Kernel::build(
            gpu,
            "motion search",
            include_str!("../shaders/hme.wgsl"),
            "motion_search",
            &[
                texture_entry(0),        // src level
                texture_entry(1),        // reference level
                storage_entry(2, true),  // seed field
                storage_entry(3, false), // output field
                uniform_entry(4),
            ],
        )?;
        let intra = Kernel::build(
            gpu,
            "intra prediction",
            include_str!("../shaders/intra.wgsl"),
            "intra_predict",
            &[
                texture_entry(0),        // full-resolution source
                storage_entry(1, true),  // inter field
                storage_entry(2, false), // modes
                storage_entry(3, false), // shapes
                storage_entry(4, false), // intra residuals
                storage_entry(5, false), // inter-best residuals
                uniform_entry(6),
            ],
        )?;
        Ok(Kernels { downsample, motion, intra })
    }
}
