//! Error types.
//!
//! `RuntimeError` is what a compute backend reports. `Error` is what the
//! orchestrator surfaces to its caller: it wraps backend failures with the
//! stage and frame index they happened at.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::geometry::Dims;

/// Failures reported by a [`ComputeRuntime`](crate::runtime::ComputeRuntime).
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// No usable GPU adapter was found.
    #[error("no suitable GPU adapter found")]
    NoAdapter,

    /// The adapter refused to create a device.
    #[error("device request failed: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    /// Requested workgroup size exceeds the device profile's invocation limit.
    #[error("workgroup size {total} exceeds profile limit of {max} invocations")]
    WorkgroupTooLarge { total: u32, max: u32 },

    /// A kernel failed to compile or link into a pipeline.
    #[error("failed to build kernel `{kernel}`: {message}")]
    KernelBuild { kernel: &'static str, message: String },

    /// A device image or buffer could not be allocated.
    #[error("failed to allocate {what}: {message}")]
    Allocation { what: String, message: String },

    /// A kernel dispatch, copy or submission failed on the device.
    #[error("{operation} failed: {message}")]
    Execution { operation: &'static str, message: String },

    /// Mapping a buffer back to host memory failed.
    #[error("read-back failed: {0}")]
    Readback(String),

    /// Host data does not fit the device resource it is written to.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: Dims, actual: Dims },

    /// A handle that this runtime never issued (or already released).
    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: usize },
}

/// Per-frame processing stage, used to tag execution failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Pyramid,
    Motion,
    Intra,
    Readback,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Pyramid => "pyramid",
            Stage::Motion => "motion",
            Stage::Intra => "intra",
            Stage::Readback => "read-back",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the frame orchestrator.
#[derive(Error, Debug)]
pub enum Error {
    /// Rejected configuration. Raised before anything is allocated.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Allocation or kernel build failed at start-up.
    #[error("failed to set up {what}: {source}")]
    Resource {
        what: &'static str,
        #[source]
        source: RuntimeError,
    },

    /// A device operation failed while processing a frame.
    #[error("frame {frame}: {stage} stage failed: {source}")]
    Stage {
        frame: u64,
        stage: Stage,
        #[source]
        source: RuntimeError,
    },

    /// The frame provider delivered a frame of the wrong size.
    #[error("frame {frame}: expected {expected} frame, got {actual}")]
    FrameSize { frame: u64, expected: Dims, actual: Dims },

    /// The frame provider failed.
    #[error("frame {frame}: frame provider failed: {source}")]
    Provider {
        frame: u64,
        #[source]
        source: io::Error,
    },

    /// The result sink failed.
    #[error("frame {frame}: result sink failed: {source}")]
    Sink {
        frame: u64,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Frame index the error is attributed to, if any.
    pub fn frame(&self) -> Option<u64> {
        match self {
            Error::Stage { frame, .. }
            | Error::FrameSize { frame, .. }
            | Error::Provider { frame, .. }
            | Error::Sink { frame, .. } => Some(*frame),
            Error::Config(_) | Error::Resource { .. } => None,
        }
    }

    /// Stage the error is attributed to, if it came from the device.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_names_stage_and_frame() {
        let err = Error::Stage {
            frame: 3,
            stage: Stage::Motion,
            source: RuntimeError::Execution {
                operation: "motion search",
                message: "device lost".into(),
            },
        };
        let text = err.to_string();
        assert!(text.contains("frame 3"), "{text}");
        assert!(text.contains("motion stage"), "{text}");
        assert!(text.contains("device lost"), "{text}");
        assert_eq!(err.frame(), Some(3));
        assert_eq!(err.stage(), Some(Stage::Motion));
    }

    #[test]
    fn config_error_has_no_frame() {
        let err = Error::Config("qp out of range".into());
        assert_eq!(err.frame(), None);
        assert_eq!(err.stage(), None);
    }
}
