// source.rs — Frame providers.
//
// A provider yields luma frames in display order. `YuvReader` reads raw
// planar I420 (Y, then U and V at quarter resolution) and discards chroma;
// `MemoryFrames` serves frames already in memory.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crate::geometry::Dims;
use crate::image::Image;

/// Source of luma frames.
pub trait FrameProvider {
    /// The next frame, or `Ok(None)` at the end of the sequence.
    fn next_frame(&mut self) -> io::Result<Option<Image<u8>>>;
}

impl<P: FrameProvider + ?Sized> FrameProvider for &mut P {
    fn next_frame(&mut self) -> io::Result<Option<Image<u8>>> {
        (**self).next_frame()
    }
}

/// Reader for raw planar YUV 4:2:0 (I420) sequences.
pub struct YuvReader<R> {
    inner: R,
    dims: Dims,
    luma: usize,
    chroma: usize,
    scratch: Vec<u8>,
}

impl YuvReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>, dims: Dims) -> io::Result<Self> {
        Ok(YuvReader::new(BufReader::new(File::open(path)?), dims))
    }
}

impl<R: Read> YuvReader<R> {
    pub fn new(inner: R, dims: Dims) -> Self {
        let luma = dims.pixel_count();
        let chroma = 2 * dims.half().pixel_count();
        YuvReader { inner, dims, luma, chroma, scratch: Vec::new() }
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    /// Bytes per frame on disk, chroma included.
    pub fn frame_bytes(&self) -> usize {
        self.luma + self.chroma
    }

    /// Fill `buf` completely. Returns `Ok(false)` if the stream was already
    /// at EOF, `UnexpectedEof` if it ended part-way.
    fn fill(&mut self, buf_len: usize, allow_clean_eof: bool) -> io::Result<bool> {
        self.scratch.resize(buf_len, 0);
        let mut filled = 0;
        while filled < buf_len {
            match self.inner.read(&mut self.scratch[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        if filled == 0 && allow_clean_eof {
            return Ok(false);
        }
        if filled < buf_len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("truncated {} frame: {filled} of {buf_len} bytes", self.dims),
            ));
        }
        Ok(true)
    }
}

impl<R: Read> FrameProvider for YuvReader<R> {
    fn next_frame(&mut self) -> io::Result<Option<Image<u8>>> {
        if !self.fill(self.luma, true)? {
            return Ok(None);
        }
        let luma = std::mem::take(&mut self.scratch);
        // Chroma planes are read and dropped.
        self.fill(self.chroma, false)?;
        Ok(Some(Image::from_vec(self.dims.width as usize, self.dims.height as usize, luma)))
    }
}

/// Frames held in memory, served front to back.
#[derive(Debug, Default)]
pub struct MemoryFrames {
    frames: VecDeque<Image<u8>>,
}

impl MemoryFrames {
    pub fn new(frames: impl IntoIterator<Item = Image<u8>>) -> Self {
        MemoryFrames { frames: frames.into_iter().collect() }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameProvider for MemoryFrames {
    fn next_frame(&mut self) -> io::Result<Option<Image<u8>>> {
        Ok(self.frames.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn i420(dims: Dims, frames: u8) -> Vec<u8> {
        let mut out = Vec::new();
        for f in 0..frames {
            out.extend(std::iter::repeat(f).take(dims.pixel_count()));
            out.extend(std::iter::repeat(200).take(2 * dims.half().pixel_count()));
        }
        out
    }

    #[test]
    fn reads_luma_and_skips_chroma() {
        let dims = Dims::new(5, 3);
        let mut reader = YuvReader::new(Cursor::new(i420(dims, 2)), dims);
        assert_eq!(reader.frame_bytes(), 15 + 2 * 3 * 2);
        let f0 = reader.next_frame().unwrap().unwrap();
        let f1 = reader.next_frame().unwrap().unwrap();
        assert_eq!(f0.dims(), dims);
        assert!(f0.as_slice().iter().all(|&p| p == 0));
        assert!(f1.as_slice().iter().all(|&p| p == 1));
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let dims = Dims::new(4, 4);
        let mut bytes = i420(dims, 1);
        bytes.truncate(20);
        let mut reader = YuvReader::new(Cursor::new(bytes), dims);
        let err = reader.next_frame().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn memory_frames_drain_in_order() {
        let mut frames = MemoryFrames::new([Image::filled(2, 2, 1u8), Image::filled(2, 2, 2u8)]);
        assert_eq!(frames.remaining(), 2);
        assert_eq!(frames.next_frame().unwrap().unwrap().get(0, 0), 1);
        assert_eq!(frames.next_frame().unwrap().unwrap().get(0, 0), 2);
        assert!(frames.next_frame().unwrap().is_none());
    }
}
