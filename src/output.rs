// output.rs — Result sinks that write to files.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use image::{GrayImage, ImageFormat, Luma};
use tracing::debug;

use crate::geometry::MB_SIZE;
use crate::results::{FrameResults, IntraShape, ResultBlock, ResultSink};

/// Writes each frame as a header line plus one line per macroblock:
///
/// ```text
/// frame 0 176x144 11x9
/// 0 0 16x16 0000000000000002 1203 2210
/// ```
pub struct TextResultWriter<W: Write> {
    out: W,
}

impl<W: Write> TextResultWriter<W> {
    pub fn new(out: W) -> Self {
        TextResultWriter { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ResultSink for TextResultWriter<W> {
    fn emit(&mut self, results: &FrameResults) -> io::Result<()> {
        writeln!(self.out, "frame {} {} {}", results.frame_index, results.dims, results.grid)?;
        for by in 0..results.grid.rows {
            for bx in 0..results.grid.cols {
                let b = results.block(bx, by);
                writeln!(
                    self.out,
                    "{bx} {by} {} {} {} {}",
                    b.intra_shape, b.intra_mode, b.intra_residual, b.inter_best_residual
                )?;
            }
        }
        self.out.flush()
    }
}

/// Grey level a macroblock is painted with in the decision map.
pub fn decision_shade(block: &ResultBlock) -> u8 {
    if !block.prefers_intra() {
        return 0;
    }
    match block.intra_shape {
        IntraShape::Intra16x16 => 255,
        IntraShape::Intra8x8 => 192,
        IntraShape::Intra4x4 => 128,
    }
}

/// Renders the intra/inter decision of every macroblock.
pub fn decision_map(results: &FrameResults) -> GrayImage {
    GrayImage::from_fn(results.dims.width, results.dims.height, |x, y| {
        Luma([decision_shade(results.block(x / MB_SIZE, y / MB_SIZE))])
    })
}

/// Writes one `frame_NNNNN.bmp` decision map per frame into a directory.
pub struct DecisionMapWriter {
    dir: PathBuf,
}

impl DecisionMapWriter {
    /// Creates `dir` if it does not exist.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(DecisionMapWriter { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, frame_index: u64) -> PathBuf {
        self.dir.join(format!("frame_{frame_index:05}.bmp"))
    }
}

impl ResultSink for DecisionMapWriter {
    fn emit(&mut self, results: &FrameResults) -> io::Result<()> {
        let path = self.path_for(results.frame_index);
        decision_map(results)
            .save_with_format(&path, ImageFormat::Bmp)
            .map_err(io::Error::other)?;
        debug!(path = %path.display(), "wrote decision map");
        Ok(())
    }
}

/// Forwards every frame to each sink in turn. Stops at the first failure.
#[derive(Default)]
pub struct SinkChain<'a> {
    sinks: Vec<Box<dyn ResultSink + 'a>>,
}

impl<'a> SinkChain<'a> {
    pub fn new() -> Self {
        SinkChain { sinks: Vec::new() }
    }

    pub fn push(&mut self, sink: impl ResultSink + 'a) {
        self.sinks.push(Box::new(sink));
    }

    pub fn with(mut self, sink: impl ResultSink + 'a) -> Self {
        self.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ResultSink for SinkChain<'_> {
    fn emit(&mut self, results: &FrameResults) -> io::Result<()> {
        for sink in &mut self.sinks {
            sink.emit(results)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Dims, MacroblockGrid};
    use crate::results::{CollectingSink, IntraMode};

    fn two_block_frame() -> FrameResults {
        let dims = Dims::new(20, 16);
        FrameResults {
            frame_index: 4,
            dims,
            grid: MacroblockGrid::for_dims(dims),
            blocks: vec![
                ResultBlock {
                    intra_mode: IntraMode(0x2),
                    intra_shape: IntraShape::Intra16x16,
                    intra_residual: 10,
                    inter_best_residual: 300,
                },
                ResultBlock {
                    intra_mode: IntraMode(0),
                    intra_shape: IntraShape::Intra4x4,
                    intra_residual: 90,
                    inter_best_residual: 40,
                },
            ],
        }
    }

    #[test]
    fn text_writer_format() {
        let mut w = TextResultWriter::new(Vec::new());
        w.emit(&two_block_frame()).unwrap();
        let text = String::from_utf8(w.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "frame 4 20x16 2x1");
        assert_eq!(lines[1], "0 0 16x16 0000000000000002 10 300");
        assert_eq!(lines[2], "1 0 4x4 0000000000000000 90 40");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn decision_map_paints_blocks() {
        let map = decision_map(&two_block_frame());
        assert_eq!(map.dimensions(), (20, 16));
        assert_eq!(map.get_pixel(0, 0).0[0], 255);
        assert_eq!(map.get_pixel(15, 15).0[0], 255);
        // Block 1 is partial (4 px wide) and inter wins.
        assert_eq!(map.get_pixel(19, 0).0[0], 0);
    }

    #[test]
    fn chain_forwards_to_every_sink() {
        let mut a = CollectingSink::default();
        let mut b = CollectingSink::default();
        {
            let mut chain = SinkChain::new().with(&mut a).with(&mut b);
            assert_eq!(chain.len(), 2);
            chain.emit(&two_block_frame()).unwrap();
        }
        assert_eq!(a.frames.len(), 1);
        assert_eq!(b.frames.len(), 1);
    }
}
