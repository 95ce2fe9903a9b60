// host.rs — `ComputeRuntime` backed by the CPU reference kernels.
//
// Every enqueue runs to completion before it returns, so the in-order queue
// contract holds trivially and read-backs never wait. Images, motion fields
// and result buffers live in per-kind slabs inside the runtime; the handles
// the orchestrator owns are just slab indices.
//
// HostRuntime is the test double for everything above the runtime seam and
// the fallback backend on machines without a usable GPU.

use tracing::trace;

use crate::error::RuntimeError;
use crate::geometry::{Dims, MacroblockGrid};
use crate::image::Image;
use crate::kernels;
use crate::results::ResultBlock;
use crate::runtime::{ComputeRuntime, IntraPass, MotionHypothesis, MotionPass};

/// Handle to a host image slot.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct HostImage(usize);

/// Handle to a host motion-field slot.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct HostMotionField(usize);

/// Handle to a host result-buffer slot.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct HostResultBuffers(usize);

impl HostImage {
    pub fn id(&self) -> usize {
        self.0
    }
}

impl HostMotionField {
    pub fn id(&self) -> usize {
        self.0
    }
}

impl HostResultBuffers {
    pub fn id(&self) -> usize {
        self.0
    }
}

struct FieldSlot {
    grid: MacroblockGrid,
    data: Vec<MotionHypothesis>,
}

struct ResultSlot {
    grid: MacroblockGrid,
    blocks: Vec<ResultBlock>,
}

/// In-process runtime executing the reference kernels.
#[derive(Default)]
pub struct HostRuntime {
    images: Vec<Image<u8>>,
    fields: Vec<FieldSlot>,
    results: Vec<ResultSlot>,
    launches: u64,
}

impl HostRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of kernel invocations executed so far.
    pub fn kernel_launches(&self) -> u64 {
        self.launches
    }

    fn image(&self, h: &HostImage) -> Result<&Image<u8>, RuntimeError> {
        self.images.get(h.0).ok_or(RuntimeError::UnknownHandle { kind: "image", id: h.0 })
    }

    fn field(&self, h: &HostMotionField) -> Result<&FieldSlot, RuntimeError> {
        self.fields.get(h.0).ok_or(RuntimeError::UnknownHandle { kind: "motion field", id: h.0 })
    }

    fn result_slot(&self, h: &HostResultBuffers) -> Result<&ResultSlot, RuntimeError> {
        self.results.get(h.0).ok_or(RuntimeError::UnknownHandle { kind: "result buffers", id: h.0 })
    }
}

/// `len` copies of `value`, or an allocation error if `len` overflowed or
/// the allocator refused.
fn alloc_filled<T: Clone>(len: Option<usize>, value: T, what: &str) -> Result<Vec<T>, RuntimeError> {
    let fail = |message: String| RuntimeError::Allocation { what: what.to_string(), message };
    let len = len.ok_or_else(|| fail("size overflows usize".into()))?;
    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|e| fail(e.to_string()))?;
    data.resize(len, value);
    Ok(data)
}

impl ComputeRuntime for HostRuntime {
    type Image = HostImage;
    type MotionField = HostMotionField;
    type ResultBuffers = HostResultBuffers;

    fn name(&self) -> &str {
        "host"
    }

    fn create_image(&mut self, dims: Dims, label: &str) -> Result<HostImage, RuntimeError> {
        if dims.is_empty() {
            return Err(RuntimeError::Allocation {
                what: label.to_string(),
                message: format!("empty image {dims}"),
            });
        }
        let (w, h) = (dims.width as usize, dims.height as usize);
        let data = alloc_filled(w.checked_mul(h), 0u8, label)?;
        self.images.push(Image::from_vec(w, h, data));
        Ok(HostImage(self.images.len() - 1))
    }

    fn create_motion_field(
        &mut self,
        grid: MacroblockGrid,
        label: &str,
    ) -> Result<HostMotionField, RuntimeError> {
        let data = alloc_filled(Some(grid.len()), MotionHypothesis::default(), label)?;
        self.fields.push(FieldSlot { grid, data });
        Ok(HostMotionField(self.fields.len() - 1))
    }

    fn create_result_buffers(&mut self, grid: MacroblockGrid) -> Result<HostResultBuffers, RuntimeError> {
        let blocks = alloc_filled(Some(grid.len()), ResultBlock::default(), "result buffers")?;
        self.results.push(ResultSlot { grid, blocks });
        Ok(HostResultBuffers(self.results.len() - 1))
    }

    fn upload_image(&mut self, dst: &HostImage, src: &Image<u8>) -> Result<(), RuntimeError> {
        let expected = self.image(dst)?.dims();
        if expected != src.dims() {
            return Err(RuntimeError::DimensionMismatch { expected, actual: src.dims() });
        }
        self.images[dst.0] = src.clone();
        Ok(())
    }

    fn enqueue_downsample(&mut self, src: &HostImage, dst: &HostImage) -> Result<(), RuntimeError> {
        let expected = self.image(src)?.dims().half();
        let actual = self.image(dst)?.dims();
        if expected != actual || src.0 == dst.0 {
            return Err(RuntimeError::DimensionMismatch { expected, actual });
        }
        trace!(src = src.0, dst = dst.0, "host downsample");

        // Move the destination out of its slot so the source can be borrowed.
        let mut out = std::mem::replace(&mut self.images[dst.0], Image::new(0, 0));
        kernels::downsample_2x_into(&self.images[src.0], &mut out);
        self.images[dst.0] = out;
        self.launches += 1;
        Ok(())
    }

    fn enqueue_motion_search(&mut self, pass: &MotionPass<'_, Self>) -> Result<(), RuntimeError> {
        let src = self.image(pass.src)?;
        let reference = self.image(pass.reference)?;
        if src.dims() != pass.dims || reference.dims() != pass.dims {
            return Err(RuntimeError::DimensionMismatch { expected: pass.dims, actual: src.dims() });
        }
        let seed = match pass.seed {
            Some(seed) => {
                let slot = self.field(seed.field)?;
                Some((slot.data.as_slice(), slot.grid))
            }
            None => None,
        };
        trace!(scale = %pass.scale, seeded = seed.is_some(), "host motion search");
        let hypotheses = kernels::motion_search(src, reference, seed, pass.params);

        let out = self.field(pass.out)?;
        if out.grid != pass.grid() {
            return Err(RuntimeError::Execution {
                operation: "motion search",
                message: format!("output field is {} blocks, level needs {}", out.grid, pass.grid()),
            });
        }
        self.fields[pass.out.0].data = hypotheses;
        self.launches += 1;
        Ok(())
    }

    fn enqueue_intra(&mut self, pass: &IntraPass<'_, Self>) -> Result<(), RuntimeError> {
        let src = self.image(pass.src)?;
        if src.dims() != pass.dims {
            return Err(RuntimeError::DimensionMismatch { expected: pass.dims, actual: src.dims() });
        }
        let grid = MacroblockGrid::for_dims(pass.dims);
        let inter = self.field(pass.inter)?;
        let out = self.result_slot(pass.out)?;
        if inter.grid != grid || out.grid != grid {
            return Err(RuntimeError::Execution {
                operation: "intra prediction",
                message: format!("buffers sized {} / {}, frame needs {grid}", inter.grid, out.grid),
            });
        }
        trace!(dims = %pass.dims, "host intra prediction");
        let blocks = kernels::intra_predict(src, &inter.data, pass.params);
        self.results[pass.out.0].blocks = blocks;
        self.launches += 1;
        Ok(())
    }

    fn read_results(
        &mut self,
        buffers: &HostResultBuffers,
        out: &mut Vec<ResultBlock>,
    ) -> Result<(), RuntimeError> {
        let slot = self.result_slot(buffers)?;
        out.clear();
        out.extend_from_slice(&slot.blocks);
        Ok(())
    }

    fn read_image(&mut self, image: &HostImage) -> Result<Image<u8>, RuntimeError> {
        self.image(image).cloned()
    }

    fn read_motion_field(&mut self, field: &HostMotionField) -> Result<Vec<MotionHypothesis>, RuntimeError> {
        Ok(self.field(field)?.data.clone())
    }
}
