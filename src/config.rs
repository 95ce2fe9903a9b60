// config.rs — Analyzer configuration.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::geometry::Dims;
use crate::motion::SeedPolicy;
use crate::runtime::{SearchParams, MAX_QP};

/// Largest accepted motion search radius in pixels.
pub const MAX_SEARCH_RANGE: u32 = 64;

/// Largest accepted frame width or height. Matches the default wgpu
/// `max_texture_dimension_2d`.
pub const MAX_DIMENSION: u32 = 8192;

/// What frame 0 is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialReference {
    /// Frame 0 is its own reference.
    #[default]
    SelfReference,
    /// One frame is read ahead of frame 0 and used only as its reference.
    LeadingFrame,
}

/// Run configuration, fixed once the orchestrator is built.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Luma width in pixels.
    pub width: u32,
    /// Luma height in pixels.
    pub height: u32,
    /// Number of frames to analyse.
    pub frames: u64,
    /// Quantisation parameter (0–51). Sets the rate weight λ.
    pub qp: u32,
    /// Full-search radius per pyramid level.
    pub search_range: u32,
    pub seed_policy: SeedPolicy,
    pub initial_reference: InitialReference,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        AnalyzerConfig {
            width:             0,
            height:            0,
            frames:            1,
            qp:                26,
            search_range:      8,
            seed_policy:       SeedPolicy::Unseeded,
            initial_reference: InitialReference::SelfReference,
        }
    }
}

impl AnalyzerConfig {
    /// Config for a `width × height` sequence with every other field default.
    pub fn for_size(width: u32, height: u32) -> Self {
        AnalyzerConfig { width, height, ..Default::default() }
    }

    pub fn dims(&self) -> Dims {
        Dims::new(self.width, self.height)
    }

    pub fn search_params(&self) -> SearchParams {
        SearchParams { qp: self.qp, search_range: self.search_range }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Config(format!("frame size {} must be non-zero", self.dims())));
        }
        if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION {
            return Err(Error::Config(format!(
                "frame size {} exceeds {MAX_DIMENSION}x{MAX_DIMENSION}",
                self.dims()
            )));
        }
        if self.frames == 0 {
            return Err(Error::Config("frame count must be at least 1".into()));
        }
        if self.qp > MAX_QP {
            return Err(Error::Config(format!("qp {} out of range 0..={MAX_QP}", self.qp)));
        }
        if self.search_range == 0 || self.search_range > MAX_SEARCH_RANGE {
            return Err(Error::Config(format!(
                "search range {} out of range 1..={MAX_SEARCH_RANGE}",
                self.search_range
            )));
        }
        Ok(())
    }
}

impl fmt::Display for SeedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SeedPolicy::Unseeded => "unseeded",
            SeedPolicy::ZeroFilled => "zero",
        })
    }
}

impl FromStr for SeedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unseeded" | "none" => Ok(SeedPolicy::Unseeded),
            "zero" | "zero-filled" => Ok(SeedPolicy::ZeroFilled),
            other => Err(format!("unknown seed policy `{other}` (expected unseeded|zero)")),
        }
    }
}

impl fmt::Display for InitialReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InitialReference::SelfReference => "self",
            InitialReference::LeadingFrame => "leading",
        })
    }
}

impl FromStr for InitialReference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "self" => Ok(InitialReference::SelfReference),
            "leading" | "leading-frame" => Ok(InitialReference::LeadingFrame),
            other => Err(format!("unknown initial reference `{other}` (expected self|leading)")),
        }
    }
}
