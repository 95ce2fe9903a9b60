// motion.rs — Hierarchical (coarse-to-fine) motion estimation.
//
// One motion-search pass per pyramid level, coarsest first:
//
//   8×  : src/ref at 1/8 scale, seed = none (or the zero field)
//   4×  : src/ref at 1/4 scale, seed = 8× output
//   2×  : src/ref at 1/2 scale, seed = 4× output
//   1×  : full resolution,     seed = 2× output   → inter-best residuals
//
// Each level owns its own motion field, sized by that level's 16×16 block
// grid, so a pass never overwrites the field it is seeded from. The passes
// are enqueued in this order on the runtime's in-order queue; a finer pass
// can therefore not run before the coarser pass whose output it binds.

use tracing::trace;

use crate::error::RuntimeError;
use crate::geometry::{Dims, MacroblockGrid, PyramidScale};
use crate::pyramid::Pyramid;
use crate::runtime::{ComputeRuntime, MotionPass, SearchParams, Seed};

/// How the coarsest pass is seeded.
///
/// Both policies start the coarsest search at the zero vector; they differ
/// only in whether the kernel sees a bound seed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeedPolicy {
    /// No seed field is bound at the coarsest level.
    #[default]
    Unseeded,
    /// A zero-filled field is bound, so every pass runs the seeded kernel path.
    ZeroFilled,
}

struct LevelField<F> {
    field: F,
    grid: MacroblockGrid,
}

/// Per-level motion fields plus the pass sequence that fills them.
pub struct MotionEstimator<R: ComputeRuntime> {
    fields: Vec<LevelField<R::MotionField>>,
    zero_seed: Option<LevelField<R::MotionField>>,
}

impl<R: ComputeRuntime> MotionEstimator<R> {
    /// Allocate one motion field per pyramid level of a `full`-sized frame.
    pub fn allocate(runtime: &mut R, full: Dims, policy: SeedPolicy) -> Result<Self, RuntimeError> {
        let mut fields = Vec::with_capacity(PyramidScale::COUNT);
        for scale in PyramidScale::FINE_TO_COARSE {
            let grid = MacroblockGrid::for_dims(scale.dims_for(full));
            let field = runtime.create_motion_field(grid, &format!("motion field {scale}"))?;
            fields.push(LevelField { field, grid });
        }
        let zero_seed = match policy {
            SeedPolicy::Unseeded => None,
            SeedPolicy::ZeroFilled => {
                let grid = fields[PyramidScale::Eighth.index()].grid;
                let field = runtime.create_motion_field(grid, "zero seed")?;
                Some(LevelField { field, grid })
            }
        };
        Ok(MotionEstimator { fields, zero_seed })
    }

    /// Motion field written by the pass at `scale`.
    pub fn field(&self, scale: PyramidScale) -> &R::MotionField {
        &self.fields[scale.index()].field
    }

    pub fn grid(&self, scale: PyramidScale) -> MacroblockGrid {
        self.fields[scale.index()].grid
    }

    fn seed_for(&self, scale: PyramidScale) -> Option<Seed<'_, R>> {
        let level = match scale.coarser() {
            Some(coarser) => &self.fields[coarser.index()],
            None => self.zero_seed.as_ref()?,
        };
        Some(Seed { field: &level.field, grid: level.grid })
    }

    /// Enqueue the four motion passes, coarse to fine.
    ///
    /// Returns the full-resolution field, which carries the inter-best
    /// residual of every macroblock. Stops at the first failed pass.
    pub fn estimate(
        &self,
        runtime: &mut R,
        src: &Pyramid<R>,
        reference: &Pyramid<R>,
        params: SearchParams,
    ) -> Result<&R::MotionField, RuntimeError> {
        for scale in PyramidScale::COARSE_TO_FINE {
            let pass = MotionPass {
                scale,
                dims: src.dims(scale),
                src: &src.level(scale).image,
                reference: &reference.level(scale).image,
                seed: self.seed_for(scale),
                out: self.field(scale),
                params,
            };
            trace!(%scale, grid = %self.grid(scale), seeded = pass.seed.is_some(), "motion pass");
            runtime.enqueue_motion_search(&pass)?;
        }
        Ok(self.field(PyramidScale::Full))
    }
}
