// vme-intra: pyramid motion estimation and intra prediction analysis
//
// Per frame: build 1×/2×/4×/8× pyramids of the source and reference luma
// planes, run hierarchical motion estimation coarse to fine, run intra
// prediction at full resolution, and read back one result record per
// 16×16 macroblock. The device work goes through `runtime::ComputeRuntime`,
// implemented on the CPU (`host`) and on wgpu (`gpu`).

pub mod image;
pub mod geometry;
pub mod error;
pub mod results;
pub mod runtime;
pub mod kernels;
pub mod host;
pub mod gpu;
pub mod pyramid;
pub mod motion;
pub mod intra;
pub mod config;
pub mod source;
pub mod output;
pub mod orchestrator;

pub use config::{AnalyzerConfig, InitialReference};
pub use error::{Error, Result, RuntimeError, Stage};
pub use geometry::{Dims, MacroblockGrid, PyramidScale, MB_SIZE};
pub use host::HostRuntime;
pub use motion::SeedPolicy;
pub use orchestrator::{FrameOrchestrator, FrameTiming, RunSummary, Side};
pub use results::{CollectingSink, FrameResults, IntraMode, IntraShape, ResultBlock, ResultSink};
pub use runtime::ComputeRuntime;
