//! Typed errors for the tracer core.
//!
//! Setup and per-frame GPU faults are fatal and bubble up to `main`; hierarchy
//! violations are reported when a pose is constructed.

use thiserror::Error;

/// Failures while bringing up the device, surface or kernel program.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    #[error("failed to create GPU device: {0}")]
    Device(String),

    #[error("failed to create display surface: {0}")]
    Surface(String),

    #[error("failed to read kernel program {path}: {source}")]
    KernelSource {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("kernel program build failed:\n{diagnostics}")]
    KernelBuild { diagnostics: String },
}

/// Bone list precondition violations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("pose has no bones")]
    Empty,

    #[error("bone 0 must be the root but has parent {parent}")]
    RootHasParent { parent: usize },

    #[error("bone {index} has no parent; only bone 0 may be a root")]
    MultipleRoots { index: usize },

    #[error("bone {index} references parent {parent}, which does not precede it")]
    ParentAfterChild { index: usize, parent: usize },

    #[error("bone count mismatch: bind pose has {bind}, current pose has {current}")]
    BoneCountMismatch { bind: usize, current: usize },

    #[error("offset output holds {slots} matrices for {bones} bones")]
    OffsetSlotMismatch { bones: usize, slots: usize },
}

/// Binding errors against a kernel's positional signature.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("kernel {kernel} expects {expected} arguments, got {actual}")]
    ArgumentCount { kernel: &'static str, expected: usize, actual: usize },

    #[error("kernel {kernel} argument {index}: expected {expected}, got {actual}")]
    ArgumentKind { kernel: &'static str, index: usize, expected: &'static str, actual: &'static str },
}

/// Fatal per-frame GPU faults.
#[derive(Error, Debug)]
pub enum GpuError {
    #[error("buffer allocation of {size} bytes failed for {label}")]
    Allocation { label: String, size: u64 },

    #[error("unknown buffer handle {0}")]
    UnknownBuffer(u32),

    #[error("unknown texture handle {0}")]
    UnknownTexture(u32),

    #[error("display interop: {0}")]
    Interop(&'static str),

    #[error("device lost: {0}")]
    DeviceLost(String),

    #[error("GPU validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Kernel(#[from] KernelError),
}
