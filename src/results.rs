// results.rs — Per-macroblock results and the sink they are emitted to.
//
// The device produces four parallel buffers per frame (intra modes, intra
// shapes, intra residuals, inter-best residuals). On the host they are
// zipped into one `ResultBlock` per macroblock so an index can never pair
// block k's mode with block k+1's residual.

use std::fmt;
use std::io;

use crate::geometry::{Dims, MacroblockGrid};

/// Intra partition chosen for a macroblock.
///
/// Codes are the values stored in the device shape buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum IntraShape {
    #[default]
    Intra16x16 = 0,
    Intra8x8 = 1,
    Intra4x4 = 2,
}

impl IntraShape {
    pub const ALL: [IntraShape; 3] = [IntraShape::Intra16x16, IntraShape::Intra8x8, IntraShape::Intra4x4];

    /// Edge length of one prediction sub-block.
    pub const fn block_size(self) -> u32 {
        match self {
            IntraShape::Intra16x16 => 16,
            IntraShape::Intra8x8 => 8,
            IntraShape::Intra4x4 => 4,
        }
    }

    /// Number of sub-blocks a macroblock splits into.
    pub const fn sub_blocks(self) -> u32 {
        let per_side = 16 / self.block_size();
        per_side * per_side
    }

    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Decode a device shape code. Unknown codes are `None`.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(IntraShape::Intra16x16),
            1 => Some(IntraShape::Intra8x8),
            2 => Some(IntraShape::Intra4x4),
            _ => None,
        }
    }
}

impl fmt::Display for IntraShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntraShape::Intra16x16 => "16x16",
            IntraShape::Intra8x8 => "8x8",
            IntraShape::Intra4x4 => "4x4",
        };
        f.write_str(s)
    }
}

/// Directional intra prediction mode of one sub-block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PredictionMode {
    Vertical = 0,
    Horizontal = 1,
    Dc = 2,
}

impl PredictionMode {
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(PredictionMode::Vertical),
            1 => Some(PredictionMode::Horizontal),
            2 => Some(PredictionMode::Dc),
            _ => None,
        }
    }
}

/// Packed intra modes of a macroblock: sixteen 4-bit modes, one per 4×4
/// block in raster order inside the macroblock (nibble 0 = top-left).
///
/// Larger partitions repeat their mode over every 4×4 block they cover.
/// 4×4 blocks lying outside the image carry [`NOT_CODED`](Self::NOT_CODED).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntraMode(pub u64);

impl IntraMode {
    /// Nibble of a 4×4 block that was not predicted.
    pub const NOT_CODED: u8 = 0xF;

    /// Every nibble `NOT_CODED`.
    pub const UNCODED: IntraMode = IntraMode(u64::MAX);

    /// Mode of the 4×4 block at raster position `k` (0..16). `None` for a
    /// block outside the image.
    pub fn mode_at(self, k: usize) -> Option<PredictionMode> {
        debug_assert!(k < 16);
        PredictionMode::from_code(((self.0 >> (4 * k)) & 0xF) as u8)
    }

    /// Whether the 4×4 block at `k` was predicted.
    pub fn is_coded(self, k: usize) -> bool {
        ((self.0 >> (4 * k)) & 0xF) as u8 != Self::NOT_CODED
    }

    /// Store `mode` for 4×4 block `k`.
    pub fn with_mode(self, k: usize, mode: PredictionMode) -> Self {
        let shift = 4 * k;
        IntraMode((self.0 & !(0xF << shift)) | ((mode as u64) << shift))
    }
}

impl Default for IntraMode {
    fn default() -> Self {
        IntraMode::UNCODED
    }
}

impl fmt::Display for IntraMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Results for one macroblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResultBlock {
    pub intra_mode: IntraMode,
    pub intra_shape: IntraShape,
    /// Distortion of the best intra choice.
    pub intra_residual: u16,
    /// Best residual found by motion estimation.
    pub inter_best_residual: u16,
}

impl ResultBlock {
    /// Whether intra coding beats the best inter candidate for this block.
    pub fn prefers_intra(&self) -> bool {
        self.intra_residual < self.inter_best_residual
    }
}

/// All results for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameResults {
    pub frame_index: u64,
    pub dims: Dims,
    pub grid: MacroblockGrid,
    /// One entry per macroblock, raster order. `blocks.len() == grid.len()`.
    pub blocks: Vec<ResultBlock>,
}

impl FrameResults {
    pub fn block(&self, bx: u32, by: u32) -> &ResultBlock {
        &self.blocks[self.grid.index(bx, by)]
    }

    pub fn intra_modes(&self) -> impl ExactSizeIterator<Item = u64> + '_ {
        self.blocks.iter().map(|b| b.intra_mode.0)
    }

    pub fn intra_shapes(&self) -> impl ExactSizeIterator<Item = u8> + '_ {
        self.blocks.iter().map(|b| b.intra_shape.code())
    }

    pub fn intra_residuals(&self) -> impl ExactSizeIterator<Item = u16> + '_ {
        self.blocks.iter().map(|b| b.intra_residual)
    }

    pub fn inter_best_residuals(&self) -> impl ExactSizeIterator<Item = u16> + '_ {
        self.blocks.iter().map(|b| b.inter_best_residual)
    }

    /// Number of blocks where intra prediction wins.
    pub fn intra_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.prefers_intra()).count()
    }
}

/// Receives each frame's results as soon as they are read back.
pub trait ResultSink {
    fn emit(&mut self, results: &FrameResults) -> io::Result<()>;
}

impl<S: ResultSink + ?Sized> ResultSink for &mut S {
    fn emit(&mut self, results: &FrameResults) -> io::Result<()> {
        (**self).emit(results)
    }
}

impl<S: ResultSink + ?Sized> ResultSink for Box<S> {
    fn emit(&mut self, results: &FrameResults) -> io::Result<()> {
        (**self).emit(results)
    }
}

/// Keeps every emitted frame in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub frames: Vec<FrameResults>,
}

impl ResultSink for CollectingSink {
    fn emit(&mut self, results: &FrameResults) -> io::Result<()> {
        self.frames.push(results.clone());
        Ok(())
    }
}
