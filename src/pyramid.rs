// pyramid.rs — Four-level image pyramid resident on a compute device.
//
//   Level 0 (Full)    : uploaded from the host frame.
//   Level n+1         : 2× reduction of level n by the downsample kernel.
//
// The reduction is chained (Full → Half → Quarter → Eighth): each downsample
// reads the level the previous call wrote. The runtime's in-order queue
// guarantees level n is complete before level n+1 reads it, so `rebuild`
// only has to enqueue the three calls in that order.
//
// BUFFER REUSE
// ────────────
// The four level images are allocated once by `Pyramid::allocate` and
// overwritten every frame. Nothing in this module allocates per frame.

use tracing::trace;

use crate::error::RuntimeError;
use crate::geometry::{Dims, PyramidScale};
use crate::image::Image;
use crate::runtime::ComputeRuntime;

/// One pyramid level: a device image and its dimensions.
pub struct PyramidLevel<I> {
    pub image: I,
    pub dims: Dims,
}

/// A 1×/2×/4×/8× pyramid of device images.
///
/// `levels[PyramidScale::index()]`, finest first.
pub struct Pyramid<R: ComputeRuntime> {
    levels: Vec<PyramidLevel<R::Image>>,
    label: &'static str,
}

impl<R: ComputeRuntime> Pyramid<R> {
    /// Allocate the four level images for a `full`-sized frame.
    ///
    /// Level dimensions are `ceil(prev / 2)` per axis.
    pub fn allocate(runtime: &mut R, full: Dims, label: &'static str) -> Result<Self, RuntimeError> {
        let mut levels = Vec::with_capacity(PyramidScale::COUNT);
        for scale in PyramidScale::FINE_TO_COARSE {
            let dims = scale.dims_for(full);
            let image = runtime.create_image(dims, &format!("{label} {scale}"))?;
            levels.push(PyramidLevel { image, dims });
        }
        Ok(Pyramid { levels, label })
    }

    pub fn level(&self, scale: PyramidScale) -> &PyramidLevel<R::Image> {
        &self.levels[scale.index()]
    }

    pub fn dims(&self, scale: PyramidScale) -> Dims {
        self.levels[scale.index()].dims
    }

    /// Full-resolution image.
    pub fn full(&self) -> &R::Image {
        &self.levels[PyramidScale::Full.index()].image
    }

    /// Write a host frame into level 0. The reduced levels are stale until
    /// the next [`rebuild`](Self::rebuild).
    pub fn upload(&self, runtime: &mut R, frame: &Image<u8>) -> Result<(), RuntimeError> {
        runtime.upload_image(self.full(), frame)
    }

    /// Enqueue the three chained downsample passes that regenerate levels
    /// 1..=3 from level 0.
    ///
    /// Stops at the first failure; coarser levels are not enqueued after a
    /// failed one.
    pub fn rebuild(&self, runtime: &mut R) -> Result<(), RuntimeError> {
        for pair in self.levels.windows(2) {
            let (finer, coarser) = (&pair[0], &pair[1]);
            trace!(pyramid = self.label, from = %finer.dims, to = %coarser.dims, "downsample");
            runtime.enqueue_downsample(&finer.image, &coarser.image)?;
        }
        Ok(())
    }

    /// Read one level back to the host. Blocks until queued work completes.
    pub fn read_level(&self, runtime: &mut R, scale: PyramidScale) -> Result<Image<u8>, RuntimeError> {
        runtime.read_image(&self.level(scale).image)
    }
}
