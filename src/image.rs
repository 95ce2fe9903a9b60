// image.rs — Host-side planar image container.
//
// One plane, row-major, stride == width. Frames from the YUV reader, pyramid
// levels read back from a device, and the reference kernels all use it.
//
// Unlike a GPU texture, an `Image<T>` is plain heap memory: cloning it copies
// every pixel, and equality is byte-for-byte. Both properties are what the
// sliding-window and idempotence checks rely on.

use std::fmt;

use crate::geometry::Dims;

/// A runtime-sized 2D image, generic over the sample type.
#[derive(Clone, PartialEq, Eq)]
pub struct Image<T: Copy + Default> {
    data: Vec<T>,
    width: usize,
    height: usize,
}

impl<T: Copy + Default> Image<T> {
    /// Allocate an image filled with `T::default()`.
    pub fn new(width: usize, height: usize) -> Self {
        Image { data: vec![T::default(); width * height], width, height }
    }

    /// Allocate an image with every sample set to `value`.
    pub fn filled(width: usize, height: usize, value: T) -> Self {
        Image { data: vec![value; width * height], width, height }
    }

    /// Wrap an existing row-major buffer.
    ///
    /// # Panics
    /// Panics if `data.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "buffer length {} does not match {}x{}",
            data.len(),
            width,
            height
        );
        Image { data, width, height }
    }

    /// Build an image by evaluating `f(x, y)` at every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Image { data, width, height }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Width and height as `Dims`.
    pub fn dims(&self) -> Dims {
        Dims::new(self.width as u32, self.height as u32)
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        debug_assert!(x < self.width && y < self.height, "({x}, {y}) out of bounds");
        self.data[y * self.width + x]
    }

    /// Sample with coordinates clamped to the image bounds.
    ///
    /// Kernels that read outside the image (motion search, downsampling of
    /// odd sizes) replicate the border pixel.
    #[inline]
    pub fn get_clamped(&self, x: i64, y: i64) -> T {
        let cx = x.clamp(0, self.width as i64 - 1) as usize;
        let cy = y.clamp(0, self.height as i64 - 1) as usize;
        self.data[cy * self.width + cx]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        debug_assert!(x < self.width && y < self.height, "({x}, {y}) out of bounds");
        self.data[y * self.width + x] = value;
    }

    pub fn row(&self, y: usize) -> &[T] {
        &self.data[y * self.width..(y + 1) * self.width]
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Iterate over `(x, y, value)` in row-major order.
    pub fn pixels(&self) -> impl Iterator<Item = (usize, usize, T)> + '_ {
        let w = self.width;
        self.data.iter().enumerate().map(move |(i, &v)| (i % w, i / w, v))
    }
}

impl<T: Copy + Default + fmt::Debug> fmt::Debug for Image<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Image {}x{}", self.width, self.height)?;
        let show_h = self.height.min(8);
        let show_w = self.width.min(8);
        for y in 0..show_h {
            write!(f, "  [")?;
            for x in 0..show_w {
                if x > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{:?}", self.get(x, y))?;
            }
            if show_w < self.width {
                write!(f, ", ...")?;
            }
            writeln!(f, "]")?;
        }
        if show_h < self.height {
            writeln!(f, "  ...")?;
        }
        Ok(())
    }
}
