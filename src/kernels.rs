// kernels.rs — CPU reference kernels.
//
// These are the authoritative definitions of the three analysis kernels.
// `HostRuntime` runs them directly; the WGSL shaders in src/shaders/ are
// validated against them value-for-value (see gpu::runtime tests), so every
// loop order and tie-break here is part of the contract.
//
//   downsample_2x_into   2×2 box average with rounding, edge-clamped.
//   motion_search        full search around a seeded predictor, SAD + λ·|Δmv|.
//   intra_predict        V/H/DC prediction at 16×16, 8×8 and 4×4.

use crate::geometry::{Dims, MacroblockGrid, MB_SIZE};
use crate::image::Image;
use crate::results::{IntraMode, IntraShape, PredictionMode, ResultBlock};
use crate::runtime::{MotionHypothesis, SearchParams};

/// DC prediction value when a block has no neighbours inside the image.
pub const DC_FALLBACK: u32 = 128;

// ---------------------------------------------------------------------------
// Downsample
// ---------------------------------------------------------------------------

/// Reduce `src` by 2× into `dst`, which must be `src.dims().half()`.
///
/// `dst(x, y) = (s(2x,2y) + s(2x+1,2y) + s(2x,2y+1) + s(2x+1,2y+1) + 2) / 4`
/// with sample coordinates clamped to `src`, so odd sizes replicate the last
/// column/row.
pub fn downsample_2x_into(src: &Image<u8>, dst: &mut Image<u8>) {
    debug_assert_eq!(dst.dims(), src.dims().half());
    for y in 0..dst.height() {
        for x in 0..dst.width() {
            let sx = 2 * x as i64;
            let sy = 2 * y as i64;
            let sum = src.get_clamped(sx, sy) as u32
                + src.get_clamped(sx + 1, sy) as u32
                + src.get_clamped(sx, sy + 1) as u32
                + src.get_clamped(sx + 1, sy + 1) as u32;
            dst.set(x, y, ((sum + 2) / 4) as u8);
        }
    }
}

/// Allocating variant of [`downsample_2x_into`].
pub fn downsample_2x(src: &Image<u8>) -> Image<u8> {
    let d = src.dims().half();
    let mut dst = Image::new(d.width as usize, d.height as usize);
    downsample_2x_into(src, &mut dst);
    dst
}

// ---------------------------------------------------------------------------
// Motion search
// ---------------------------------------------------------------------------

/// Pixel rectangle `[x0, x_end) × [y0, y_end)` of block `(bx, by)`, clipped
/// to the image.
fn block_bounds(dims: Dims, bx: u32, by: u32) -> (usize, usize, usize, usize) {
    let x0 = bx * MB_SIZE;
    let y0 = by * MB_SIZE;
    (
        x0 as usize,
        y0 as usize,
        (x0 + MB_SIZE).min(dims.width) as usize,
        (y0 + MB_SIZE).min(dims.height) as usize,
    )
}

fn displaced_sad(
    src: &Image<u8>,
    reference: &Image<u8>,
    (x0, y0, x_end, y_end): (usize, usize, usize, usize),
    mv_x: i32,
    mv_y: i32,
) -> u32 {
    let mut sad = 0u32;
    for y in y0..y_end {
        for x in x0..x_end {
            let r = reference.get_clamped(x as i64 + mv_x as i64, y as i64 + mv_y as i64);
            sad += (src.get(x, y) as i32 - r as i32).unsigned_abs();
        }
    }
    sad
}

/// Estimate one motion vector per 16×16 block of `src` against `reference`.
///
/// Each block searches `[-r, r]²` around its predictor: twice the vector of
/// the covering block in `seed` (the next coarser level), or zero without a
/// seed. Candidates are visited row by row; the first strictly cheaper
/// `sad + λ·(|dx| + |dy|)` wins.
pub fn motion_search(
    src: &Image<u8>,
    reference: &Image<u8>,
    seed: Option<(&[MotionHypothesis], MacroblockGrid)>,
    params: SearchParams,
) -> Vec<MotionHypothesis> {
    debug_assert_eq!(src.dims(), reference.dims());
    let dims = src.dims();
    let grid = MacroblockGrid::for_dims(dims);
    let lambda = params.lambda();
    let r = params.search_range as i32;

    let mut out = Vec::with_capacity(grid.len());
    for by in 0..grid.rows {
        for bx in 0..grid.cols {
            let (px, py) = match seed {
                Some((field, seed_grid)) => {
                    let s = field[seed_grid.seed_index(bx, by)];
                    (s.mv_x * 2, s.mv_y * 2)
                }
                None => (0, 0),
            };
            let bounds = block_bounds(dims, bx, by);

            let mut best_cost = u32::MAX;
            let mut best = MotionHypothesis { mv_x: px, mv_y: py, ..Default::default() };
            for dy in -r..=r {
                for dx in -r..=r {
                    let (mv_x, mv_y) = (px + dx, py + dy);
                    let sad = displaced_sad(src, reference, bounds, mv_x, mv_y);
                    let cost = sad + lambda * (dx.unsigned_abs() + dy.unsigned_abs());
                    if cost < best_cost {
                        best_cost = cost;
                        best = MotionHypothesis { mv_x, mv_y, sad, _pad: 0 };
                    }
                }
            }
            out.push(best);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Intra prediction
// ---------------------------------------------------------------------------

/// SAD of the clipped block `[x, x_end) × [y, y_end)` against `pred(i, j)`.
fn prediction_sad(
    src: &Image<u8>,
    (x, y, x_end, y_end): (usize, usize, usize, usize),
    pred: impl Fn(usize, usize) -> u32,
) -> u32 {
    let mut sad = 0;
    for j in y..y_end {
        for i in x..x_end {
            sad += (src.get(i, j) as u32).abs_diff(pred(i, j));
        }
    }
    sad
}

/// Best prediction mode for the `n × n` sub-block at `(x, y)`, clipped to
/// the image. Neighbours are source pixels (open-loop).
fn best_sub_block_mode(src: &Image<u8>, x: usize, y: usize, n: usize) -> (PredictionMode, u32) {
    let x_end = (x + n).min(src.width());
    let y_end = (y + n).min(src.height());
    let bounds = (x, y, x_end, y_end);
    let has_top = y > 0;
    let has_left = x > 0;

    let mut best = (PredictionMode::Dc, u32::MAX);
    if has_top {
        let sad = prediction_sad(src, bounds, |i, _| src.get(i, y - 1) as u32);
        if sad < best.1 {
            best = (PredictionMode::Vertical, sad);
        }
    }
    if has_left {
        let sad = prediction_sad(src, bounds, |_, j| src.get(x - 1, j) as u32);
        if sad < best.1 {
            best = (PredictionMode::Horizontal, sad);
        }
    }

    let mut sum = 0u32;
    let mut count = 0u32;
    if has_top {
        sum += (x..x_end).map(|i| src.get(i, y - 1) as u32).sum::<u32>();
        count += (x_end - x) as u32;
    }
    if has_left {
        sum += (y..y_end).map(|j| src.get(x - 1, j) as u32).sum::<u32>();
        count += (y_end - y) as u32;
    }
    let dc = if count > 0 { (sum + count / 2) / count } else { DC_FALLBACK };
    let sad = prediction_sad(src, bounds, |_, _| dc);
    if sad < best.1 {
        best = (PredictionMode::Dc, sad);
    }
    best
}

/// Choose partition and modes for macroblock `(bx, by)`.
///
/// Returns `(modes, shape, distortion)`. The partition minimising
/// `Σ sad + λ · sub_blocks` wins, larger partitions first on ties.
pub fn intra_predict_block(
    src: &Image<u8>,
    bx: u32,
    by: u32,
    lambda: u32,
) -> (IntraMode, IntraShape, u32) {
    let x0 = (bx * MB_SIZE) as usize;
    let y0 = (by * MB_SIZE) as usize;

    let mut best_cost = u32::MAX;
    let mut best = (IntraMode::default(), IntraShape::Intra16x16, 0);
    for shape in IntraShape::ALL {
        let n = shape.block_size() as usize;
        let mut modes = IntraMode::default();
        let mut total = 0u32;
        for sy in (0..16).step_by(n) {
            for sx in (0..16).step_by(n) {
                let (x, y) = (x0 + sx, y0 + sy);
                if x >= src.width() || y >= src.height() {
                    continue;
                }
                let (mode, sad) = best_sub_block_mode(src, x, y, n);
                total += sad;
                for j in (sy..sy + n).step_by(4) {
                    for i in (sx..sx + n).step_by(4) {
                        if x0 + i < src.width() && y0 + j < src.height() {
                            modes = modes.with_mode((j / 4) * 4 + i / 4, mode);
                        }
                    }
                }
            }
        }
        let cost = total + lambda * shape.sub_blocks();
        if cost < best_cost {
            best_cost = cost;
            best = (modes, shape, total);
        }
    }
    best
}

/// Run intra prediction over every macroblock of `src` and pair each block
/// with the inter residual from the full-resolution motion field.
pub fn intra_predict(
    src: &Image<u8>,
    inter: &[MotionHypothesis],
    params: SearchParams,
) -> Vec<ResultBlock> {
    let grid = MacroblockGrid::for_dims(src.dims());
    debug_assert_eq!(inter.len(), grid.len());
    let lambda = params.lambda();

    let mut out = Vec::with_capacity(grid.len());
    for by in 0..grid.rows {
        for bx in 0..grid.cols {
            let (intra_mode, intra_shape, sad) = intra_predict_block(src, bx, by, lambda);
            let inter_sad = inter[grid.index(bx, by)].sad;
            out.push(ResultBlock {
                intra_mode,
                intra_shape,
                intra_residual: saturate_u16(sad),
                inter_best_residual: saturate_u16(inter_sad),
            });
        }
    }
    out
}

#[inline]
pub fn saturate_u16(v: u32) -> u16 {
    v.min(u16::MAX as u32) as u16
}
