// geometry.rs — Frame dimensions, pyramid scales and the macroblock grid.

use std::fmt;

/// Macroblock edge length in pixels, at every pyramid level.
pub const MB_SIZE: u32 = 16;

/// Width and height of an image in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dims {
    pub width: u32,
    pub height: u32,
}

impl Dims {
    pub const fn new(width: u32, height: u32) -> Self {
        Dims { width, height }
    }

    /// Dimensions of the next coarser pyramid level: `ceil(w/2) × ceil(h/2)`.
    ///
    /// Odd sizes round up so the last column/row of the finer level still
    /// contributes to a coarser pixel.
    pub const fn half(self) -> Self {
        Dims {
            width: self.width.div_ceil(2),
            height: self.height.div_ceil(2),
        }
    }

    pub const fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }

    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Dims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One of the four pyramid levels.
///
/// Discriminants are the level index: `Full` is level 0, `Eighth` level 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PyramidScale {
    Full = 0,
    Half = 1,
    Quarter = 2,
    Eighth = 3,
}

impl PyramidScale {
    /// Finest to coarsest. Pyramid construction walks this order.
    pub const FINE_TO_COARSE: [PyramidScale; 4] =
        [PyramidScale::Full, PyramidScale::Half, PyramidScale::Quarter, PyramidScale::Eighth];

    /// Coarsest to finest. Motion estimation walks this order.
    pub const COARSE_TO_FINE: [PyramidScale; 4] =
        [PyramidScale::Eighth, PyramidScale::Quarter, PyramidScale::Half, PyramidScale::Full];

    pub const COUNT: usize = 4;

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Linear downscale factor relative to full resolution (1, 2, 4, 8).
    pub const fn factor(self) -> u32 {
        1 << (self as u32)
    }

    /// The next coarser level, or `None` at `Eighth`.
    pub const fn coarser(self) -> Option<PyramidScale> {
        match self {
            PyramidScale::Full => Some(PyramidScale::Half),
            PyramidScale::Half => Some(PyramidScale::Quarter),
            PyramidScale::Quarter => Some(PyramidScale::Eighth),
            PyramidScale::Eighth => None,
        }
    }

    /// Dimensions of this level for a full-resolution frame of `full`.
    pub fn dims_for(self, full: Dims) -> Dims {
        (0..self.index()).fold(full, |d, _| d.half())
    }
}

impl fmt::Display for PyramidScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.factor())
    }
}

/// Grid of `MB_SIZE × MB_SIZE` blocks covering an image.
///
/// Edge blocks are partial when a dimension is not a multiple of 16;
/// they are still counted (`ceil` division).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacroblockGrid {
    pub cols: u32,
    pub rows: u32,
}

impl MacroblockGrid {
    pub const fn for_dims(dims: Dims) -> Self {
        MacroblockGrid {
            cols: dims.width.div_ceil(MB_SIZE),
            rows: dims.height.div_ceil(MB_SIZE),
        }
    }

    /// Number of macroblocks (`cols × rows`).
    pub const fn len(self) -> usize {
        self.cols as usize * self.rows as usize
    }

    pub const fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Raster index of block `(bx, by)`.
    #[inline]
    pub const fn index(self, bx: u32, by: u32) -> usize {
        by as usize * self.cols as usize + bx as usize
    }

    /// Index of the block in this (coarser) grid that seeds finer block
    /// `(bx, by)`, clamped to the last column/row.
    #[inline]
    pub fn seed_index(self, bx: u32, by: u32) -> usize {
        let cx = (bx / 2).min(self.cols.saturating_sub(1));
        let cy = (by / 2).min(self.rows.saturating_sub(1));
        self.index(cx, cy)
    }
}

impl fmt::Display for MacroblockGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}
