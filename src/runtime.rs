// runtime.rs — The device compute runtime seam.
//
// Everything the orchestrator does to a device goes through `ComputeRuntime`:
// allocate images and buffers once, upload a frame, enqueue the three
// kernels, and block on a read-back. Two implementations ship with the crate:
//
//   HostRuntime (host.rs)          reference kernels on the calling thread.
//   GpuRuntime  (gpu/runtime.rs)   wgpu compute pipelines.
//
// QUEUE MODEL
// ───────────
// A runtime behaves like a single in-order command queue. An `enqueue_*`
// call may return before the work has run, but work executes in call order,
// and every `read_*` call blocks until all previously enqueued work has
// completed. The orchestrator relies on this ordering instead of host-side
// synchronisation: it never reads a level before the call that produces it
// has been enqueued, and the read-back at the end of a frame is the only
// point where the host waits.
//
// HANDLES
// ───────
// `Image`, `MotionField` and `ResultBuffers` are owned handles. The runtime
// hands them out; the orchestrator owns them for the whole run and passes
// them back by reference. They are deliberately not `Clone`.

use crate::error::RuntimeError;
use crate::geometry::{Dims, MacroblockGrid, PyramidScale};
use crate::image::Image;
use crate::results::ResultBlock;

/// Largest accepted quantisation parameter.
pub const MAX_QP: u32 = 51;

/// Per-block motion estimate stored in a motion field.
///
/// Layout matches `Hypothesis` in `hme.wgsl` (16 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MotionHypothesis {
    pub mv_x: i32,
    pub mv_y: i32,
    /// Sum of absolute differences at `(mv_x, mv_y)`.
    pub sad: u32,
    pub _pad: u32,
}

/// Search parameters passed unchanged to every motion and intra pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchParams {
    /// Quantisation parameter, 0..=51.
    pub qp: u32,
    /// Full-search radius in pixels around the predicted vector.
    pub search_range: u32,
}

impl SearchParams {
    /// Rate weight applied to motion-vector deltas and intra partitions.
    ///
    /// Doubles every 6 qp steps, like the quantiser step size it stands in for.
    pub fn lambda(&self) -> u32 {
        1 << (self.qp.min(MAX_QP) / 6)
    }
}

/// The coarser level's motion field that seeds a motion pass.
pub struct Seed<'a, R: ComputeRuntime + ?Sized> {
    pub field: &'a R::MotionField,
    /// Block grid of `field`.
    pub grid: MacroblockGrid,
}

impl<R: ComputeRuntime + ?Sized> Clone for Seed<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R: ComputeRuntime + ?Sized> Copy for Seed<'_, R> {}

/// One motion-estimation kernel invocation at one pyramid level.
pub struct MotionPass<'a, R: ComputeRuntime + ?Sized> {
    pub scale: PyramidScale,
    /// Dimensions of `src` and `reference` at this level.
    pub dims: Dims,
    pub src: &'a R::Image,
    pub reference: &'a R::Image,
    /// `None` at the coarsest level when no seed field is bound.
    pub seed: Option<Seed<'a, R>>,
    /// Receives one hypothesis per block of `MacroblockGrid::for_dims(dims)`.
    pub out: &'a R::MotionField,
    pub params: SearchParams,
}

impl<R: ComputeRuntime + ?Sized> MotionPass<'_, R> {
    pub fn grid(&self) -> MacroblockGrid {
        MacroblockGrid::for_dims(self.dims)
    }
}

/// The intra-prediction kernel invocation at full resolution.
pub struct IntraPass<'a, R: ComputeRuntime + ?Sized> {
    pub dims: Dims,
    pub src: &'a R::Image,
    /// Full-resolution motion field from the last motion pass.
    pub inter: &'a R::MotionField,
    pub out: &'a R::ResultBuffers,
    pub params: SearchParams,
}

/// A device that can hold images and run the three analysis kernels.
pub trait ComputeRuntime {
    /// A 2D luma image resident on the device.
    type Image;
    /// A per-block array of [`MotionHypothesis`].
    type MotionField;
    /// The four per-macroblock result buffers written by the intra kernel.
    type ResultBuffers;

    /// Short backend name for logs.
    fn name(&self) -> &str;

    fn create_image(&mut self, dims: Dims, label: &str) -> Result<Self::Image, RuntimeError>;

    /// Allocate a zero-filled motion field with one entry per block of `grid`.
    fn create_motion_field(
        &mut self,
        grid: MacroblockGrid,
        label: &str,
    ) -> Result<Self::MotionField, RuntimeError>;

    fn create_result_buffers(&mut self, grid: MacroblockGrid) -> Result<Self::ResultBuffers, RuntimeError>;

    /// Copy a host frame into a device image of the same dimensions.
    fn upload_image(&mut self, dst: &Self::Image, src: &Image<u8>) -> Result<(), RuntimeError>;

    /// Enqueue a 2× reduction of `src` into `dst`.
    ///
    /// `dst` must be exactly `src.half()` in size.
    fn enqueue_downsample(&mut self, src: &Self::Image, dst: &Self::Image) -> Result<(), RuntimeError>;

    fn enqueue_motion_search(&mut self, pass: &MotionPass<'_, Self>) -> Result<(), RuntimeError>;

    fn enqueue_intra(&mut self, pass: &IntraPass<'_, Self>) -> Result<(), RuntimeError>;

    /// Block until all enqueued work is done, then copy the four result
    /// buffers into `out` (cleared first), one record per macroblock.
    fn read_results(
        &mut self,
        buffers: &Self::ResultBuffers,
        out: &mut Vec<ResultBlock>,
    ) -> Result<(), RuntimeError>;

    /// Block until all enqueued work is done, then copy an image to the host.
    fn read_image(&mut self, image: &Self::Image) -> Result<Image<u8>, RuntimeError>;

    /// Block until all enqueued work is done, then copy a motion field to the host.
    fn read_motion_field(&mut self, field: &Self::MotionField) -> Result<Vec<MotionHypothesis>, RuntimeError>;
}
