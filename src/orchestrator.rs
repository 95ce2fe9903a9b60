// orchestrator.rs — Per-frame pipeline driver.
//
// PIPELINE (per frame)
// ────────────────────
//   load      upload frame i into the source pyramid's full level
//   pyramid   rebuild source, then reference (3 downsamples each)
//   motion    HME 8× → 4× → 2× → 1× (4 motion passes)
//   intra     1 intra pass at full resolution
//   read-back block until the device is idle, copy result buffers out
//   emit      hand `FrameResults` to the sink (done by `run`)
//   advance   swap source/reference pyramids
//
// Everything from load to intra is enqueued without waiting; the runtime's
// in-order queue sequences it. The read-back is the only point per frame
// where the host blocks, so at most one frame is ever in flight.
//
// SLIDING WINDOW
// ──────────────
// After frame i the two pyramids swap roles: the images holding frame i
// become the reference for frame i+1, and frame i+1 is uploaded over the
// images that held frame i−1. Nothing is copied and nothing is allocated
// after construction.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{AnalyzerConfig, InitialReference};
use crate::error::{Error, Result, RuntimeError, Stage};
use crate::geometry::{MacroblockGrid, PyramidScale};
use crate::image::Image;
use crate::intra::IntraPredictor;
use crate::motion::MotionEstimator;
use crate::pyramid::Pyramid;
use crate::results::{FrameResults, ResultSink};
use crate::runtime::{ComputeRuntime, SearchParams};
use crate::source::FrameProvider;

/// Which pyramid of the frame pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Reference,
}

/// Wall-clock time spent in each stage of one frame, in seconds.
///
/// On an asynchronous runtime the enqueue stages measure submission only;
/// device time shows up in `readback`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameTiming {
    pub upload: f64,
    pub pyramid: f64,
    pub motion: f64,
    pub intra: f64,
    pub readback: f64,
    pub total: f64,
}

impl fmt::Display for FrameTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = |s: f64| s * 1e3;
        write!(
            f,
            "upload {:.2}ms | pyramid {:.2}ms | motion {:.2}ms | intra {:.2}ms | read-back {:.2}ms | total {:.2}ms",
            ms(self.upload),
            ms(self.pyramid),
            ms(self.motion),
            ms(self.intra),
            ms(self.readback),
            ms(self.total),
        )
    }
}

/// Outcome of [`FrameOrchestrator::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub frames_requested: u64,
    pub frames_processed: u64,
    /// Macroblocks where intra beat inter, over all processed frames.
    pub intra_blocks: u64,
    pub total_blocks: u64,
    pub elapsed: Duration,
}

impl RunSummary {
    /// The provider ran out before `frames_requested` frames.
    pub fn ended_early(&self) -> bool {
        self.frames_processed < self.frames_requested
    }

    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 { self.frames_processed as f64 / secs } else { 0.0 }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} frames, {}/{} blocks intra, {:.1} fps",
            self.frames_processed, self.frames_requested, self.intra_blocks, self.total_blocks, self.fps()
        )
    }
}

fn failed_at(frame: u64, stage: Stage) -> impl FnOnce(RuntimeError) -> Error {
    move |source| Error::Stage { frame, stage, source }
}

fn setup(what: &'static str) -> impl FnOnce(RuntimeError) -> Error {
    move |source| Error::Resource { what, source }
}

/// Drives a [`ComputeRuntime`] through the per-frame pipeline.
///
/// All device resources are allocated by [`new`](Self::new) and owned here
/// until the orchestrator is dropped.
pub struct FrameOrchestrator<R: ComputeRuntime> {
    config: AnalyzerConfig,
    params: SearchParams,
    grid: MacroblockGrid,

    source: Pyramid<R>,
    reference: Pyramid<R>,
    motion: MotionEstimator<R>,
    intra: IntraPredictor<R>,

    next_index: u64,
    /// The reference pyramid holds a frame.
    primed: bool,

    runtime: R,
}

impl<R: ComputeRuntime> FrameOrchestrator<R> {
    /// Validate `config` and allocate every device resource for the run.
    pub fn new(mut runtime: R, config: AnalyzerConfig) -> Result<Self> {
        config.validate()?;
        let dims = config.dims();
        let grid = MacroblockGrid::for_dims(dims);

        let source = Pyramid::allocate(&mut runtime, dims, "source").map_err(setup("source pyramid"))?;
        let reference =
            Pyramid::allocate(&mut runtime, dims, "reference").map_err(setup("reference pyramid"))?;
        let motion = MotionEstimator::allocate(&mut runtime, dims, config.seed_policy)
            .map_err(setup("motion fields"))?;
        let intra = IntraPredictor::allocate(&mut runtime, grid).map_err(setup("result buffers"))?;

        info!(
            backend = runtime.name(),
            %dims,
            %grid,
            qp = config.qp,
            search_range = config.search_range,
            seed_policy = %config.seed_policy,
            initial_reference = %config.initial_reference,
            "orchestrator ready"
        );

        Ok(FrameOrchestrator {
            params: config.search_params(),
            config,
            grid,
            source,
            reference,
            motion,
            intra,
            next_index: 0,
            primed: false,
            runtime,
        })
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn grid(&self) -> MacroblockGrid {
        self.grid
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    /// Index the next processed frame will get.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    fn check_dims(&self, frame: &Image<u8>) -> Result<()> {
        let expected = self.config.dims();
        if frame.dims() != expected {
            return Err(Error::FrameSize { frame: self.next_index, expected, actual: frame.dims() });
        }
        Ok(())
    }

    /// Load `frame` as the reference for the next processed frame without
    /// analysing it.
    pub fn prime(&mut self, frame: &Image<u8>) -> Result<()> {
        self.check_dims(frame)?;
        self.reference
            .upload(&mut self.runtime, frame)
            .map_err(failed_at(self.next_index, Stage::Load))?;
        self.primed = true;
        Ok(())
    }

    /// Run the full pipeline on one frame and return its results.
    ///
    /// The first frame without a primed reference is its own reference.
    pub fn process_frame(&mut self, frame: &Image<u8>) -> Result<FrameResults> {
        self.check_dims(frame)?;
        let idx = self.next_index;
        let t_total = Instant::now();
        let mut timing = FrameTiming::default();

        // ── Load ─────────────────────────────────────────────────────────
        let t0 = Instant::now();
        self.source.upload(&mut self.runtime, frame).map_err(failed_at(idx, Stage::Load))?;
        if !self.primed {
            self.reference.upload(&mut self.runtime, frame).map_err(failed_at(idx, Stage::Load))?;
            self.primed = true;
        }
        timing.upload = t0.elapsed().as_secs_f64();

        // ── Build pyramids ───────────────────────────────────────────────
        let t0 = Instant::now();
        self.source.rebuild(&mut self.runtime).map_err(failed_at(idx, Stage::Pyramid))?;
        self.reference.rebuild(&mut self.runtime).map_err(failed_at(idx, Stage::Pyramid))?;
        timing.pyramid = t0.elapsed().as_secs_f64();

        // ── Hierarchical motion estimation ───────────────────────────────
        let t0 = Instant::now();
        let inter = self
            .motion
            .estimate(&mut self.runtime, &self.source, &self.reference, self.params)
            .map_err(failed_at(idx, Stage::Motion))?;
        timing.motion = t0.elapsed().as_secs_f64();

        // ── Intra prediction ─────────────────────────────────────────────
        let t0 = Instant::now();
        self.intra
            .predict(&mut self.runtime, &self.source, inter, self.params)
            .map_err(failed_at(idx, Stage::Intra))?;
        timing.intra = t0.elapsed().as_secs_f64();

        // ── Read back ────────────────────────────────────────────────────
        let t0 = Instant::now();
        let mut blocks = Vec::with_capacity(self.grid.len());
        self.intra
            .read_back(&mut self.runtime, &mut blocks)
            .map_err(failed_at(idx, Stage::Readback))?;
        timing.readback = t0.elapsed().as_secs_f64();

        // ── Advance ──────────────────────────────────────────────────────
        std::mem::swap(&mut self.source, &mut self.reference);
        self.next_index += 1;

        timing.total = t_total.elapsed().as_secs_f64();

        let results = FrameResults { frame_index: idx, dims: self.config.dims(), grid: self.grid, blocks };
        debug!(frame = idx, intra = results.intra_count(), blocks = results.blocks.len(), "{timing}");
        Ok(results)
    }

    /// Pull frames from `provider` and emit their results to `sink` until
    /// `config.frames` frames are done or the provider runs dry.
    ///
    /// The first error aborts the run. Frames already emitted stay emitted.
    pub fn run<P: FrameProvider, S: ResultSink>(&mut self, mut provider: P, mut sink: S) -> Result<RunSummary> {
        let start = Instant::now();
        let mut summary = RunSummary {
            frames_requested: self.config.frames,
            frames_processed: 0,
            intra_blocks: 0,
            total_blocks: 0,
            elapsed: Duration::ZERO,
        };
        info!(frames = self.config.frames, "run started");

        if self.config.initial_reference == InitialReference::LeadingFrame {
            match provider.next_frame().map_err(|source| Error::Provider { frame: 0, source })? {
                Some(leading) => self.prime(&leading)?,
                None => warn!("sequence is empty; no leading reference frame"),
            }
        }

        while summary.frames_processed < self.config.frames {
            let idx = self.next_index;
            let frame = match provider.next_frame().map_err(|source| Error::Provider { frame: idx, source })? {
                Some(frame) => frame,
                None => {
                    warn!(
                        processed = summary.frames_processed,
                        requested = self.config.frames,
                        "sequence ended early"
                    );
                    break;
                }
            };
            let results = self.process_frame(&frame)?;
            sink.emit(&results).map_err(|source| Error::Sink { frame: idx, source })?;

            summary.frames_processed += 1;
            summary.intra_blocks += results.intra_count() as u64;
            summary.total_blocks += results.blocks.len() as u64;
        }

        summary.elapsed = start.elapsed();
        info!("run finished: {summary}");
        Ok(summary)
    }

    /// Read one pyramid level back to the host. Blocks on the device.
    ///
    /// Between frames, `Side::Reference` holds the last processed frame.
    pub fn read_level(&mut self, side: Side, scale: PyramidScale) -> Result<Image<u8>, RuntimeError> {
        let pyramid = match side {
            Side::Source => &self.source,
            Side::Reference => &self.reference,
        };
        pyramid.read_level(&mut self.runtime, scale)
    }
}
