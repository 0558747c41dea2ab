use crate::{DType, Device, UnaryOp};

/// Errors raised by tensor construction, transfers, kernels and dispatch.
#[derive(Debug, thiserror::Error)]
pub enum ShuntError {
    #[error("Unsupported dtype: {0}")]
    UnsupportedDType(DType),

    #[error("DType mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Tensor is on {0}; transfer it to the host first")]
    NotOnHost(Device),

    #[error("No runtime attached for {0}")]
    DeviceNotAttached(Device),

    #[error("Invalid device: {0}")]
    InvalidDevice(String),

    #[error("Unknown {kind} '{value}'")]
    UnknownName { kind: &'static str, value: String },

    #[error("Out of memory on {device}: requested {requested} bytes, {available} available")]
    OutOfMemory {
        device: Device,
        requested: usize,
        available: usize,
    },

    #[error("Kernel '{op}' failed to compile for {arch}: {msg}")]
    KernelCompile {
        op: UnaryOp,
        arch: String,
        msg: String,
    },

    #[error("Kernel launch failed: {0}")]
    LaunchError(String),

    #[error("Transfer {from} -> {to} failed: {msg}")]
    TransferError { from: Device, to: Device, msg: String },

    #[error("Op '{op}' already has override '{existing}' registered")]
    OverrideConflict { op: UnaryOp, existing: String },

    #[error("CUDA error: {0}")]
    CudaError(String),
}
