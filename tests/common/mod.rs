// tests/common/mod.rs — Test doubles and synthetic frames shared by the
// integration tests.
//
// Both runtimes wrap `HostRuntime`, so they hand out the same handle types
// and produce the same numbers; they only add observation or failure.

#![allow(dead_code)]

use std::collections::HashMap;

use vme_intra::error::RuntimeError;
use vme_intra::geometry::{Dims, MacroblockGrid, PyramidScale};
use vme_intra::host::{HostImage, HostMotionField, HostResultBuffers};
use vme_intra::image::Image;
use vme_intra::results::ResultBlock;
use vme_intra::runtime::{ComputeRuntime, IntraPass, MotionHypothesis, MotionPass, Seed};
use vme_intra::HostRuntime;

// ===== Synthetic frames =====

/// Deterministic texture shifted by `(dx, dy)`; distinct enough that SAD
/// minima are unique.
pub fn textured(width: usize, height: usize, dx: i64, dy: i64) -> Image<u8> {
    Image::from_fn(width, height, |x, y| {
        let (x, y) = (x as i64 - dx, y as i64 - dy);
        (((x * 37 + y * 91 + (x * y).rem_euclid(13) * 17).rem_euclid(251)) as u8).wrapping_add(2)
    })
}

/// `n` frames of a texture sliding right by `step` pixels per frame.
pub fn moving_sequence(width: usize, height: usize, n: usize, step: i64) -> Vec<Image<u8>> {
    (0..n).map(|i| textured(width, height, i as i64 * step, 0)).collect()
}

/// Lower a host motion pass to the wrapped runtime's pass type.
fn lower<'a, R>(pass: &MotionPass<'a, R>) -> MotionPass<'a, HostRuntime>
where
    R: ComputeRuntime<Image = HostImage, MotionField = HostMotionField>,
{
    MotionPass {
        scale: pass.scale,
        dims: pass.dims,
        src: pass.src,
        reference: pass.reference,
        seed: pass.seed.map(|s| Seed { field: s.field, grid: s.grid }),
        out: pass.out,
        params: pass.params,
    }
}

fn lower_intra<'a, R>(pass: &IntraPass<'a, R>) -> IntraPass<'a, HostRuntime>
where
    R: ComputeRuntime<Image = HostImage, MotionField = HostMotionField, ResultBuffers = HostResultBuffers>,
{
    IntraPass { dims: pass.dims, src: pass.src, inter: pass.inter, out: pass.out, params: pass.params }
}

// ===== Recording runtime =====

/// One call observed by [`RecordingRuntime`], with the handle ids it touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Upload { image: usize },
    Downsample { src: usize, dst: usize },
    Motion { scale: PyramidScale, src: usize, reference: usize, seed: Option<usize>, out: usize },
    Intra { src: usize, inter: usize, out: usize },
    ReadResults { buffers: usize },
    ReadImage { image: usize },
    ReadField { field: usize },
}

/// `HostRuntime` that logs every upload, enqueue and read-back in order.
#[derive(Default)]
pub struct RecordingRuntime {
    pub inner: HostRuntime,
    pub events: Vec<Event>,
    /// Image id → label given at allocation.
    pub image_labels: HashMap<usize, String>,
    /// Motion field id → label given at allocation.
    pub field_labels: HashMap<usize, String>,
}

impl RecordingRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn motion_events(&self) -> Vec<&Event> {
        self.events.iter().filter(|e| matches!(e, Event::Motion { .. })).collect()
    }

    pub fn label_of(&self, image: usize) -> &str {
        self.image_labels.get(&image).map(String::as_str).unwrap_or("?")
    }
}

impl ComputeRuntime for RecordingRuntime {
    type Image = HostImage;
    type MotionField = HostMotionField;
    type ResultBuffers = HostResultBuffers;

    fn name(&self) -> &str {
        "recording"
    }

    fn create_image(&mut self, dims: Dims, label: &str) -> Result<HostImage, RuntimeError> {
        let image = self.inner.create_image(dims, label)?;
        self.image_labels.insert(image.id(), label.to_string());
        Ok(image)
    }

    fn create_motion_field(&mut self, grid: MacroblockGrid, label: &str) -> Result<HostMotionField, RuntimeError> {
        let field = self.inner.create_motion_field(grid, label)?;
        self.field_labels.insert(field.id(), label.to_string());
        Ok(field)
    }

    fn create_result_buffers(&mut self, grid: MacroblockGrid) -> Result<HostResultBuffers, RuntimeError> {
        self.inner.create_result_buffers(grid)
    }

    fn upload_image(&mut self, dst: &HostImage, src: &Image<u8>) -> Result<(), RuntimeError> {
        self.events.push(Event::Upload { image: dst.id() });
        self.inner.upload_image(dst, src)
    }

    fn enqueue_downsample(&mut self, src: &HostImage, dst: &HostImage) -> Result<(), RuntimeError> {
        self.events.push(Event::Downsample { src: src.id(), dst: dst.id() });
        self.inner.enqueue_downsample(src, dst)
    }

    fn enqueue_motion_search(&mut self, pass: &MotionPass<'_, Self>) -> Result<(), RuntimeError> {
        self.events.push(Event::Motion {
            scale: pass.scale,
            src: pass.src.id(),
            reference: pass.reference.id(),
            seed: pass.seed.map(|s| s.field.id()),
            out: pass.out.id(),
        });
        self.inner.enqueue_motion_search(&lower(pass))
    }

    fn enqueue_intra(&mut self, pass: &IntraPass<'_, Self>) -> Result<(), RuntimeError> {
        self.events.push(Event::Intra { src: pass.src.id(), inter: pass.inter.id(), out: pass.out.id() });
        self.inner.enqueue_intra(&lower_intra(pass))
    }

    fn read_results(&mut self, buffers: &HostResultBuffers, out: &mut Vec<ResultBlock>) -> Result<(), RuntimeError> {
        self.events.push(Event::ReadResults { buffers: buffers.id() });
        self.inner.read_results(buffers, out)
    }

    fn read_image(&mut self, image: &HostImage) -> Result<Image<u8>, RuntimeError> {
        self.events.push(Event::ReadImage { image: image.id() });
        self.inner.read_image(image)
    }

    fn read_motion_field(&mut self, field: &HostMotionField) -> Result<Vec<MotionHypothesis>, RuntimeError> {
        self.events.push(Event::ReadField { field: field.id() });
        self.inner.read_motion_field(field)
    }
}

// ===== Failing runtime =====

/// Device operation a [`FailingRuntime`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Upload,
    Downsample,
    Motion,
    Intra,
    ReadResults,
}

/// `HostRuntime` that fails the `nth` call (0-based) of one operation with
/// `RuntimeError::Execution`. Every other call goes through.
pub struct FailingRuntime {
    pub inner: HostRuntime,
    op: Op,
    nth: usize,
    calls: HashMap<Op, usize>,
}

impl FailingRuntime {
    pub fn new(op: Op, nth: usize) -> Self {
        FailingRuntime { inner: HostRuntime::new(), op, nth, calls: HashMap::new() }
    }

    /// Fail the given operation of frame `frame`, for an operation issued
    /// `per_frame` times per frame.
    pub fn at_frame(op: Op, frame: usize, per_frame: usize) -> Self {
        Self::new(op, frame * per_frame)
    }

    pub fn calls(&self, op: Op) -> usize {
        self.calls.get(&op).copied().unwrap_or(0)
    }

    fn tick(&mut self, op: Op) -> Result<(), RuntimeError> {
        let n = self.calls.entry(op).or_insert(0);
        let this = *n;
        *n += 1;
        if op == self.op && this == self.nth {
            return Err(RuntimeError::Execution { operation: "injected", message: format!("{op:?} call {this}") });
        }
        Ok(())
    }
}

impl ComputeRuntime for FailingRuntime {
    type Image = HostImage;
    type MotionField = HostMotionField;
    type ResultBuffers = HostResultBuffers;

    fn name(&self) -> &str {
        "failing"
    }

    fn create_image(&mut self, dims: Dims, label: &str) -> Result<HostImage, RuntimeError> {
        self.inner.create_image(dims, label)
    }

    fn create_motion_field(&mut self, grid: MacroblockGrid, label: &str) -> Result<HostMotionField, RuntimeError> {
        self.inner.create_motion_field(grid, label)
    }

    fn create_result_buffers(&mut self, grid: MacroblockGrid) -> Result<HostResultBuffers, RuntimeError> {
        self.inner.create_result_buffers(grid)
    }

    fn upload_image(&mut self, dst: &HostImage, src: &Image<u8>) -> Result<(), RuntimeError> {
        self.tick(Op::Upload)?;
        self.inner.upload_image(dst, src)
    }

    fn enqueue_downsample(&mut self, src: &HostImage, dst: &HostImage) -> Result<(), RuntimeError> {
        self.tick(Op::Downsample)?;
        self.inner.enqueue_downsample(src, dst)
    }

    fn enqueue_motion_search(&mut self, pass: &MotionPass<'_, Self>) -> Result<(), RuntimeError> {
        self.tick(Op::Motion)?;
        self.inner.enqueue_motion_search(&lower(pass))
    }

    fn enqueue_intra(&mut self, pass: &IntraPass<'_, Self>) -> Result<(), RuntimeError> {
        self.tick(Op::Intra)?;
        self.inner.enqueue_intra(&lower_intra(pass))
    }

    fn read_results(&mut self, buffers: &HostResultBuffers, out: &mut Vec<ResultBlock>) -> Result<(), RuntimeError> {
        self.tick(Op::ReadResults)?;
        self.inner.read_results(buffers, out)
    }

    fn read_image(&mut self, image: &HostImage) -> Result<Image<u8>, RuntimeError> {
        self.inner.read_image(image)
    }

    fn read_motion_field(&mut self, field: &HostMotionField) -> Result<Vec<MotionHypothesis>, RuntimeError> {
        self.inner.read_motion_field(field)
    }
}
