// gpu/mod.rs — wgpu compute backend.
//
// `GpuRuntime` implements `ComputeRuntime` with three WGSL compute kernels
// (src/shaders/). The CPU kernels in `crate::kernels` stay the
// authoritative reference: every GPU kernel reproduces them value for
// value, and the GPU tests compare whole frames of results against
// `HostRuntime`.
//
//   device     adapter selection, profiles, error capture, blocking map
//   image      R32Float level textures, upload and read-back
//   pipelines  shader compilation, bind group layouts, dispatch
//   runtime    ComputeRuntime impl, motion fields, result buffers

pub mod device;
pub mod image;
pub mod pipelines;
pub mod runtime;

pub use device::{list_adapters, AdapterInfo, DeviceProfile, GpuDevice};
pub use runtime::GpuRuntime;
