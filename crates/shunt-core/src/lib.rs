//! # shunt-core
//!
//! Tensor core for the shunt workspace.
//!
//! Provides:
//! - `Tensor` with F32, F64 and I32 dtypes
//! - Host and accelerator storage, with accelerator memory served by a
//!   pluggable [`runtime::DeviceRuntime`]
//! - Elementwise unary ops (`lgamma`, `exp`, `log`, `sqrt`, `abs`, `neg`)
//! - A per-op dispatch override table ([`dispatch`]) through which ops can
//!   be wrapped without touching their call sites

pub mod dtype;
pub mod device;
pub mod shape;
pub mod storage;
pub mod tensor;
pub mod runtime;
pub mod ops;
pub mod dispatch;
pub mod error;

pub use dtype::DType;
pub use device::Device;
pub use shape::Shape;
pub use storage::{Placement, Storage};
pub use tensor::Tensor;
pub use ops::UnaryOp;
pub use dispatch::{DispatchTable, Next, OverrideHandle, ScopeGuard, UnaryOverride};
pub use runtime::{DeviceRuntime, EmulatedDevice};
pub use error::ShuntError;

pub type Result<T> = std::result::Result<T, ShuntError>;
