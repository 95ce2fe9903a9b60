// intra.rs — Full-resolution intra prediction and result extraction.
//
// One intra kernel invocation per frame writes the four per-macroblock
// result buffers (mode, shape, intra residual, inter-best residual). The
// kernel makes every intra-vs-inter decision itself; this module only binds
// buffers, enqueues, and reads back.

use tracing::trace;

use crate::error::RuntimeError;
use crate::geometry::{MacroblockGrid, PyramidScale};
use crate::pyramid::Pyramid;
use crate::results::ResultBlock;
use crate::runtime::{ComputeRuntime, IntraPass, SearchParams};

/// Owns the result buffers for one frame size.
pub struct IntraPredictor<R: ComputeRuntime> {
    buffers: R::ResultBuffers,
    grid: MacroblockGrid,
}

impl<R: ComputeRuntime> IntraPredictor<R> {
    pub fn allocate(runtime: &mut R, grid: MacroblockGrid) -> Result<Self, RuntimeError> {
        let buffers = runtime.create_result_buffers(grid)?;
        Ok(IntraPredictor { buffers, grid })
    }

    pub fn grid(&self) -> MacroblockGrid {
        self.grid
    }

    /// Enqueue the intra kernel over the full-resolution source level.
    ///
    /// `inter` is the full-resolution motion field; its residuals are passed
    /// through into the inter-best buffer.
    pub fn predict(
        &self,
        runtime: &mut R,
        src: &Pyramid<R>,
        inter: &R::MotionField,
        params: SearchParams,
    ) -> Result<(), RuntimeError> {
        let pass = IntraPass {
            dims: src.dims(PyramidScale::Full),
            src: src.full(),
            inter,
            out: &self.buffers,
            params,
        };
        trace!(dims = %pass.dims, qp = params.qp, "intra pass");
        runtime.enqueue_intra(&pass)
    }

    /// Block on the device and copy the result buffers into `out`.
    ///
    /// `out` holds exactly one record per macroblock on success.
    pub fn read_back(&self, runtime: &mut R, out: &mut Vec<ResultBlock>) -> Result<(), RuntimeError> {
        runtime.read_results(&self.buffers, out)?;
        if out.len() != self.grid.len() {
            return Err(RuntimeError::Readback(format!(
                "expected {} result records, runtime returned {}",
                self.grid.len(),
                out.len()
            )));
        }
        Ok(())
    }
}
