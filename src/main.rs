// main.rs — vme-intra command line.
//
//   vme-intra analyze -i foreman_cif.yuv -W 352 -H 288 -n 300 -o results.txt
//   vme-intra analyze ... --backend host --output-bmp --bmp-dir maps/
//   vme-intra devices
//
// `RUST_LOG` controls log filtering; `-v` raises the default to debug.

use std::error::Error as StdError;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vme_intra::config::AnalyzerConfig;
use vme_intra::gpu::{list_adapters, DeviceProfile, GpuDevice, GpuRuntime};
use vme_intra::output::{DecisionMapWriter, SinkChain, TextResultWriter};
use vme_intra::source::YuvReader;
use vme_intra::{ComputeRuntime, FrameOrchestrator, HostRuntime, InitialReference, RunSummary, SeedPolicy};

#[derive(Parser)]
#[command(name = "vme-intra")]
#[command(about = "Pyramid motion estimation and intra prediction analysis of raw YUV sequences")]
#[command(version)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyse a planar I420 sequence and write per-macroblock results
    Analyze {
        /// Input YUV file (I420, 8 bit)
        #[arg(short, long)]
        input: PathBuf,

        /// Text results file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Frame width in pixels
        #[arg(short = 'W', long)]
        width: u32,

        /// Frame height in pixels
        #[arg(short = 'H', long)]
        height: u32,

        /// Number of frames to analyse
        #[arg(short = 'n', long, default_value_t = 1)]
        frames: u64,

        /// Quantisation parameter (0-51)
        #[arg(long, default_value_t = 26)]
        qp: u32,

        /// Motion search radius in pixels (1-64)
        #[arg(long, default_value_t = 8)]
        search_range: u32,

        /// Coarsest motion pass seed: unseeded or zero
        #[arg(long, default_value_t = SeedPolicy::Unseeded)]
        seed_policy: SeedPolicy,

        /// Reference for the first frame: self or leading
        #[arg(long, default_value_t = InitialReference::SelfReference)]
        initial_reference: InitialReference,

        /// Compute backend
        #[arg(short, long, value_enum, default_value_t = Backend::Gpu)]
        backend: Backend,

        /// GPU device limits
        #[arg(long, value_enum, default_value_t = Profile::Native)]
        profile: Profile,

        /// Also write one BMP decision map per frame
        #[arg(long)]
        output_bmp: bool,

        /// Directory for decision maps
        #[arg(long, default_value = "decision_maps")]
        bmp_dir: PathBuf,
    },
    /// List the GPU adapters visible to this process
    Devices,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Gpu,
    Host,
}

#[derive(Clone, Copy, ValueEnum)]
enum Profile {
    Native,
    Rpi,
}

impl From<Profile> for DeviceProfile {
    fn from(p: Profile) -> Self {
        match p {
            Profile::Native => DeviceProfile::Native,
            Profile::Rpi => DeviceProfile::RaspberryPi,
        }
    }
}

/// Paths and switches that only the binary cares about.
struct OutputOptions {
    input: PathBuf,
    output: Option<PathBuf>,
    output_bmp: bool,
    bmp_dir: PathBuf,
}

type BoxError = Box<dyn StdError + Send + Sync>;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(io::stderr)
        .init();

    let outcome = match cli.command {
        Command::Analyze {
            input,
            output,
            width,
            height,
            frames,
            qp,
            search_range,
            seed_policy,
            initial_reference,
            backend,
            profile,
            output_bmp,
            bmp_dir,
        } => {
            let config = AnalyzerConfig { width, height, frames, qp, search_range, seed_policy, initial_reference };
            let opts = OutputOptions { input, output, output_bmp, bmp_dir };
            let summary = match backend {
                Backend::Host => analyze(HostRuntime::new(), config, &opts),
                Backend::Gpu => GpuDevice::new_with_profile(profile.into())
                    .and_then(GpuRuntime::with_device)
                    .map_err(BoxError::from)
                    .and_then(|rt| analyze(rt, config, &opts)),
            };
            summary.map(|summary| info!("{summary}"))
        }
        Command::Devices => devices(),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            let mut cause = e.source();
            while let Some(c) = cause {
                error!("  caused by: {c}");
                cause = c.source();
            }
            ExitCode::FAILURE
        }
    }
}

fn analyze<R: ComputeRuntime>(
    runtime: R,
    config: AnalyzerConfig,
    opts: &OutputOptions,
) -> Result<RunSummary, BoxError> {
    let dims = config.dims();
    let mut orchestrator = FrameOrchestrator::new(runtime, config)?;
    let reader = YuvReader::open(&opts.input, dims)
        .map_err(|e| format!("cannot open {}: {e}", opts.input.display()))?;
    info!(input = %opts.input.display(), frame_bytes = reader.frame_bytes(), "reading sequence");

    let text: Box<dyn Write> = match &opts.output {
        Some(path) => Box::new(BufWriter::new(create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    let mut sinks = SinkChain::new().with(TextResultWriter::new(text));
    if opts.output_bmp {
        let maps = DecisionMapWriter::new(&opts.bmp_dir)
            .map_err(|e| format!("cannot create {}: {e}", opts.bmp_dir.display()))?;
        info!(dir = %maps.dir().display(), "writing decision maps");
        sinks.push(maps);
    }

    Ok(orchestrator.run(reader, &mut sinks)?)
}

fn create(path: &Path) -> Result<File, BoxError> {
    File::create(path).map_err(|e| format!("cannot create {}: {e}", path.display()).into())
}

fn devices() -> Result<(), BoxError> {
    let adapters = list_adapters();
    if adapters.is_empty() {
        println!("no Vulkan adapters found");
        return Ok(());
    }
    for (i, a) in adapters.iter().enumerate() {
        let kind = if a.is_software() { " [software]" } else { "" };
        println!("{i}: {a} vendor={:#06x} device={:#06x}{kind}", a.vendor, a.device);
    }
    Ok(())
}
