//! # shunt-fallback
//!
//! Runs selected ops on the host when their input lives on an accelerator.
//!
//! Some accelerator kernels cannot be built on some devices: an NVRTC that
//! predates the GPU's architecture fails to compile `lgamma`, for example.
//! [`HostFallback`] wraps such an op through the dispatch override table:
//! accelerator inputs are copied to the host, the op's own computation runs
//! there, and the result is copied back to the input's device. Host inputs
//! are passed straight through.
//!
//! ```
//! use shunt_core::{DispatchTable, Tensor};
//! use shunt_fallback::{install, FallbackConfig};
//!
//! let table = DispatchTable::new();
//! let _installed = install(&table, &FallbackConfig::default()).unwrap();
//! let _scope = table.enter();
//!
//! let x = Tensor::from_f32(&[0.5, 1.0, 2.0], &[3]);
//! let y = x.lgamma().unwrap();
//! assert!((y.to_vec_f32().unwrap()[0] - 0.5724).abs() < 1e-4);
//! ```

pub mod config;
pub mod error;
pub mod host_fallback;
pub mod install;

pub use config::FallbackConfig;
pub use error::FallbackError;
pub use host_fallback::{FallbackStats, HostFallback};
pub use install::{install, install_global, Installation};

pub type Result<T> = std::result::Result<T, FallbackError>;
