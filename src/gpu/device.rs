// gpu/device.rs — wgpu device abstraction.
//
// Responsibilities:
//   - Enumerate Vulkan adapters and select the first non-CPU one.
//   - Expose a `DeviceProfile` for simulating hardware limits on a
//     development machine (e.g., cap invocations to match Raspberry Pi).
//   - Provide `WorkgroupSize`, validated against the active profile and
//     baked into every compute shader.
//   - Capture device errors that wgpu would otherwise only log.
//
// ADAPTER SELECTION:
// wgpu's default `request_adapter` uses power preference heuristics that
// may grab llvmpipe/softpipe on WSL2 (where the software renderer appears
// as a valid Vulkan device). We enumerate explicitly and prefer anything
// that is not DeviceType::Cpu.
//
// DEVICE LIMITS:
// We request *lower* limits than the hardware actually supports when
// running under a non-Native profile. wgpu validates every dispatch against
// the requested limits, so violations that would crash on RPi are caught at
// dev time on the laptop.
//
// ERROR CAPTURE:
// Pipeline creation and allocation run inside `push_error_scope` /
// `pop_error_scope`, so a failure there is returned to the caller that
// asked for the resource. Errors raised while encoding or submitting work
// land in the uncaptured-error handler, which we point at a shared slot;
// `GpuDevice::check` drains it after each submission.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::RuntimeError;

/// Hardware profile controlling device limits and default workgroup sizes.
///
/// Use `Native` for best performance on your development machine.
/// Use `RaspberryPi` to simulate RPi 4/5 constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceProfile {
    /// Use the adapter's actual hardware limits. No artificial caps.
    Native,
    /// Simulate Raspberry Pi 4/5 (Broadcom VideoCore VI/VII, V3DV Vulkan).
    /// Caps `max_compute_invocations_per_workgroup` to 256.
    RaspberryPi,
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceProfile::Native => write!(f, "Native"),
            DeviceProfile::RaspberryPi => write!(f, "RaspberryPi (simulated limits)"),
        }
    }
}

/// A workgroup size configuration for 2D compute dispatches.
///
/// Kernels that work per macroblock dispatch one invocation per block, so
/// the same size is used for pixel grids and block grids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    /// Total invocations per workgroup (x * y).
    pub fn total(&self) -> u32 {
        self.x * self.y
    }

    /// Substitute the `{{WG_X}}` / `{{WG_Y}}` placeholders in a WGSL template.
    ///
    /// naga does not accept `override` expressions inside @workgroup_size(),
    /// so the dimensions are baked into the source text.
    pub fn specialize(&self, template: &str) -> String {
        template
            .replace("{{WG_X}}", &self.x.to_string())
            .replace("{{WG_Y}}", &self.y.to_string())
    }

    /// - `Native`: 16×8 = 128 invocations (4 NVIDIA warps, 2 AMD waves).
    /// - `RaspberryPi`: 8×8 = 64 invocations, well inside the 256 limit.
    fn for_profile(profile: DeviceProfile) -> Self {
        match profile {
            DeviceProfile::Native => WorkgroupSize { x: 16, y: 8 },
            DeviceProfile::RaspberryPi => WorkgroupSize { x: 8, y: 8 },
        }
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{} ({} invocations)", self.x, self.y, self.total())
    }
}

/// Cached adapter information for logging and the `devices` command.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl From<wgpu::AdapterInfo> for AdapterInfo {
    fn from(raw: wgpu::AdapterInfo) -> Self {
        AdapterInfo {
            name: raw.name,
            vendor: raw.vendor,
            device: raw.device,
            device_type: raw.device_type,
            backend: raw.backend,
        }
    }
}

impl AdapterInfo {
    /// Software rasterisers (llvmpipe and friends).
    pub fn is_software(&self) -> bool {
        self.device_type == wgpu::DeviceType::Cpu
    }
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.backend, self.device_type)
    }
}

fn instance() -> wgpu::Instance {
    // ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER keeps dzn (D3D12→Vulkan on
    // WSL2) in the adapter list; it declares itself non-conformant but runs
    // compute-only work fine.
    let flags = if cfg!(debug_assertions) {
        wgpu::InstanceFlags::VALIDATION | wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
    } else {
        wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
    };
    wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::VULKAN,
        flags,
        ..Default::default()
    })
}

/// Every Vulkan adapter visible to this process.
pub fn list_adapters() -> Vec<AdapterInfo> {
    instance()
        .enumerate_adapters(wgpu::Backends::VULKAN)
        .into_iter()
        .map(|a| AdapterInfo::from(a.get_info()))
        .collect()
}

/// Shared slot the uncaptured-error handler appends to.
type ErrorSlot = Arc<Mutex<Vec<String>>>;

/// The core GPU context: adapter, device, queue, and active profile.
///
/// # Field drop order
/// `_instance` is declared last so the `wgpu::Instance` outlives `device`
/// and `queue`. dzn on WSL2 crashes if the Vulkan instance is destroyed
/// while device-level objects still reference it.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub profile: DeviceProfile,
    pub adapter_info: AdapterInfo,
    pub workgroup_size: WorkgroupSize,
    errors: ErrorSlot,
    _instance: wgpu::Instance,
}

impl GpuDevice {
    /// Create a `GpuDevice` on the best Vulkan adapter with
    /// `DeviceProfile::Native` limits.
    pub fn new() -> Result<Self, RuntimeError> {
        Self::new_with_profile(DeviceProfile::Native)
    }

    pub fn new_with_profile(profile: DeviceProfile) -> Result<Self, RuntimeError> {
        pollster::block_on(Self::init_async(profile))
    }

    async fn init_async(profile: DeviceProfile) -> Result<Self, RuntimeError> {
        let instance = instance();

        // Tiered selection:
        //   1. DiscreteGpu / IntegratedGpu / VirtualGpu / Other (dzn).
        //   2. Last resort: anything, software included.
        let all_adapters = instance.enumerate_adapters(wgpu::Backends::VULKAN);
        for a in &all_adapters {
            debug!(adapter = %AdapterInfo::from(a.get_info()), "vulkan adapter");
        }
        let mut candidates = all_adapters.into_iter();
        let mut fallback = None;
        let adapter = loop {
            match candidates.next() {
                Some(a) if a.get_info().device_type != wgpu::DeviceType::Cpu => break Some(a),
                Some(a) => {
                    fallback.get_or_insert(a);
                }
                None => break fallback,
            }
        }
        .ok_or(RuntimeError::NoAdapter)?;

        let adapter_info = AdapterInfo::from(adapter.get_info());

        // Auto-detect RPi when the caller passed Native but the adapter is V3D.
        let profile = match profile {
            DeviceProfile::Native if adapter_info.name.to_ascii_lowercase().contains("v3d") => {
                info!("V3D adapter detected, using RaspberryPi profile");
                DeviceProfile::RaspberryPi
            }
            other => other,
        };

        // wgpu 22: request_device returns (Device, Queue) directly.
        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("vme-intra"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits_for_profile(profile),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await?;

        let errors = ErrorSlot::default();
        let sink = Arc::clone(&errors);
        device.on_uncaptured_error(Box::new(move |e| sink.lock().push(e.to_string())));

        let workgroup_size = WorkgroupSize::for_profile(profile);
        info!(adapter = %adapter_info, %profile, workgroup = %workgroup_size, "gpu device ready");

        Ok(GpuDevice {
            device,
            queue,
            profile,
            adapter_info,
            workgroup_size,
            errors,
            _instance: instance,
        })
    }

    /// Override the default workgroup size, validating against the active profile.
    pub fn set_workgroup_size(&mut self, x: u32, y: u32) -> Result<(), RuntimeError> {
        let total = x * y;
        let max = max_invocations_for_profile(self.profile);
        if total > max {
            return Err(RuntimeError::WorkgroupTooLarge { total, max });
        }
        self.workgroup_size = WorkgroupSize { x, y };
        Ok(())
    }

    /// Workgroups needed to cover a `w × h` grid of invocations.
    ///
    /// The shader must guard against out-of-bounds global IDs.
    pub fn dispatch_size(&self, w: u32, h: u32) -> (u32, u32) {
        dispatch_for(self.workgroup_size, w, h)
    }

    /// Run `f` inside a validation + out-of-memory error scope.
    ///
    /// Returns the first error the scope caught, if any.
    pub fn scoped<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        (value, validation.or(oom))
    }

    /// Drain errors reported since the last check.
    pub fn take_errors(&self) -> Vec<String> {
        std::mem::take(&mut *self.errors.lock())
    }

    /// Fail `operation` if the device reported an error since the last check.
    pub fn check(&self, operation: &'static str) -> Result<(), RuntimeError> {
        let errors = self.take_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RuntimeError::Execution { operation, message: errors.join("; ") })
        }
    }

    /// Submit one command buffer, then surface any error it raised.
    pub fn submit(&self, operation: &'static str, encoder: wgpu::CommandEncoder) -> Result<(), RuntimeError> {
        self.queue.submit(std::iter::once(encoder.finish()));
        self.check(operation)
    }

    /// Map a `MAP_READ` buffer and copy its contents out.
    ///
    /// Blocks until every submission so far has completed: this is the
    /// host's only wait on the device.
    pub fn map_read(&self, buffer: &wgpu::Buffer) -> Result<Vec<u8>, RuntimeError> {
        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            // The receiver outlives the poll below; a failed send only means
            // the caller already gave up.
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| RuntimeError::Readback("map callback never fired".into()))?
            .map_err(|e| RuntimeError::Readback(e.to_string()))?;
        self.check("read-back")?;

        let bytes = slice.get_mapped_range().to_vec();
        buffer.unmap();
        Ok(bytes)
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpuDevice {{ adapter: {}, profile: {}, workgroup: {} }}",
            self.adapter_info, self.profile, self.workgroup_size
        )
    }
}

fn dispatch_for(wg: WorkgroupSize, w: u32, h: u32) -> (u32, u32) {
    (w.div_ceil(wg.x), h.div_ceil(wg.y))
}

// ============================================================
// Limits helpers
// ============================================================

fn limits_for_profile(profile: DeviceProfile) -> wgpu::Limits {
    match profile {
        DeviceProfile::Native => wgpu::Limits::default(),

        DeviceProfile::RaspberryPi => wgpu::Limits {
            // VideoCore VI/VII: vulkaninfo reports 256 max invocations.
            max_compute_invocations_per_workgroup: 256,
            max_compute_workgroup_size_x: 256,
            max_compute_workgroup_size_y: 256,
            max_compute_workgroup_size_z: 64,
            // VideoCore VI caps textures at 4096×4096 (vs wgpu default 8192).
            max_texture_dimension_2d: 4096,
            max_storage_buffer_binding_size: 128 << 20,
            ..wgpu::Limits::default()
        },
    }
}

fn max_invocations_for_profile(profile: DeviceProfile) -> u32 {
    match profile {
        DeviceProfile::Native => wgpu::Limits::default().max_compute_invocations_per_workgroup,
        DeviceProfile::RaspberryPi => 256,
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[test]
    fn test_workgroup_size_specialize() {
        let ws = WorkgroupSize { x: 16, y: 8 };
        assert_eq!(ws.total(), 128);
        let src = ws.specialize("@workgroup_size({{WG_X}}, {{WG_Y}}, 1)");
        assert_eq!(src, "@workgroup_size(16, 8, 1)");
    }

    #[test]
    fn test_workgroup_size_for_profiles() {
        assert_eq!(WorkgroupSize::for_profile(DeviceProfile::Native), WorkgroupSize { x: 16, y: 8 });
        let rpi = WorkgroupSize::for_profile(DeviceProfile::RaspberryPi);
        assert_eq!(rpi, WorkgroupSize { x: 8, y: 8 });
        assert!(rpi.total() <= 256);
    }

    #[test]
    fn test_dispatch_size_ceiling() {
        let ws = WorkgroupSize { x: 16, y: 8 };
        assert_eq!(dispatch_for(ws, 640, 480), (40, 60));
        // 11×9 macroblocks (QCIF) still need whole workgroups.
        assert_eq!(dispatch_for(ws, 11, 9), (1, 2));
    }

    #[test]
    fn test_rpi_limits_cap_invocations() {
        let limits = limits_for_profile(DeviceProfile::RaspberryPi);
        assert_eq!(limits.max_compute_invocations_per_workgroup, 256);
        assert_eq!(limits.max_texture_dimension_2d, 4096);
        assert_eq!(limits_for_profile(DeviceProfile::Native), wgpu::Limits::default());
    }

    // ---- GPU integration tests (subprocess isolation) -------------------------
    //
    // dzn (Microsoft's D3D12-to-Vulkan layer on WSL2) crashes with SIGSEGV
    // during process exit whenever a Vulkan device was created in that
    // process. Each GPU test therefore runs in a child process; the child
    // prints "GPU_TEST_OK" after its assertions pass and the parent checks
    // for that token instead of the exit status.

    /// Spawn a child `cargo test` running one ignored lib test. Returns the
    /// combined stdout+stderr.
    pub(crate) fn run_gpu_test_in_subprocess(test_name: &str) -> String {
        let output = std::process::Command::new("cargo")
            .args(["test", "--lib", "--", test_name, "--exact", "--ignored", "--nocapture"])
            .output()
            .unwrap_or_else(|e| panic!("failed to spawn subprocess for {test_name}: {e}"));

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        print!("{stdout}");
        eprint!("{stderr}");
        stdout + &stderr
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_gpu_device_init_rpi_profile() {
        let gpu = GpuDevice::new_with_profile(DeviceProfile::RaspberryPi)
            .expect("RPi profile should work on any Vulkan device");
        println!("{gpu}");
        assert_eq!(gpu.profile, DeviceProfile::RaspberryPi);
        assert_eq!(gpu.workgroup_size, WorkgroupSize { x: 8, y: 8 });
        assert!(gpu.take_errors().is_empty());
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_set_workgroup_size_too_large() {
        let mut gpu = GpuDevice::new_with_profile(DeviceProfile::RaspberryPi).unwrap();
        gpu.set_workgroup_size(16, 16).expect("256 should be valid on RPi profile");
        let err = gpu.set_workgroup_size(16, 17).unwrap_err();
        assert!(matches!(err, RuntimeError::WorkgroupTooLarge { total: 272, max: 256 }));
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_gpu_device_init_rpi_profile() {
        let out = run_gpu_test_in_subprocess("gpu::device::tests::inner_gpu_device_init_rpi_profile");
        assert!(out.contains("GPU_TEST_OK"), "inner test did not print GPU_TEST_OK:\n{out}");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_set_workgroup_size_too_large() {
        let out = run_gpu_test_in_subprocess("gpu::device::tests::inner_set_workgroup_size_too_large");
        assert!(out.contains("GPU_TEST_OK"), "inner test did not print GPU_TEST_OK:\n{out}");
    }
}
