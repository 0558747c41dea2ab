//! Accelerator runtimes.
//!
//! A [`DeviceRuntime`] owns the memory and kernels of one accelerator.
//! Runtimes are attached to a process-wide registry by ordinal, so that
//! `Tensor::to(Device::Cuda(n))` can find the runtime serving device `n`.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::{DType, Device, Result, ShuntError, UnaryOp};

pub mod emulated;
#[cfg(feature = "cuda")]
pub mod cuda;

pub use emulated::{EmulatedDevice, EmulatedStats};
#[cfg(feature = "cuda")]
pub use cuda::CudaRuntime;

/// Type-erased handle to an allocation owned by a [`DeviceRuntime`].
///
/// Runtimes downcast the handle back to their own allocation type.
#[derive(Clone)]
pub struct DeviceBuffer {
    handle: Arc<dyn Any + Send + Sync>,
    nbytes: usize,
}

impl DeviceBuffer {
    pub fn new<T: Any + Send + Sync>(handle: T, nbytes: usize) -> Self {
        Self {
            handle: Arc::new(handle),
            nbytes,
        }
    }

    pub fn nbytes(&self) -> usize {
        self.nbytes
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.handle.downcast_ref::<T>()
    }

    /// Whether both handles refer to the same device allocation.
    pub fn same_allocation(&self, other: &DeviceBuffer) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.handle) as *const (),
            Arc::as_ptr(&other.handle) as *const (),
        )
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("nbytes", &self.nbytes)
            .finish_non_exhaustive()
    }
}

/// Memory and kernel services of one accelerator.
///
/// All transfers are blocking with respect to the calling thread.
pub trait DeviceRuntime: Send + Sync + fmt::Debug {
    /// Human-readable runtime name (e.g. "emulated", "cuda").
    fn name(&self) -> &str;

    /// Ordinal of the device this runtime serves.
    fn ordinal(&self) -> usize;

    /// The [`Device`] this runtime serves.
    fn device(&self) -> Device {
        Device::Cuda(self.ordinal())
    }

    /// Architecture tag, e.g. `sm_89`.
    fn arch(&self) -> String;

    /// Copy host bytes into a new device allocation (H2D).
    fn upload(&self, bytes: &[u8]) -> Result<DeviceBuffer>;

    /// Copy a device allocation back to the host (D2H).
    fn download(&self, buffer: &DeviceBuffer) -> Result<Vec<u8>>;

    /// Overwrite an existing device allocation with host bytes of equal length.
    fn write(&self, buffer: &DeviceBuffer, bytes: &[u8]) -> Result<()>;

    /// Copy one allocation of this runtime into another of equal length,
    /// without a round trip through the host (D2D).
    fn copy(&self, src: &DeviceBuffer, dst: &DeviceBuffer) -> Result<()>;

    /// Run an elementwise kernel over `numel` elements of `dtype`,
    /// returning a new allocation on the same device.
    fn launch_unary(
        &self,
        op: UnaryOp,
        dtype: DType,
        input: &DeviceBuffer,
        numel: usize,
    ) -> Result<DeviceBuffer>;
}

static RUNTIMES: OnceLock<RwLock<HashMap<usize, Arc<dyn DeviceRuntime>>>> = OnceLock::new();

fn runtimes() -> &'static RwLock<HashMap<usize, Arc<dyn DeviceRuntime>>> {
    RUNTIMES.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Attach a runtime for its ordinal, returning the runtime it replaced.
pub fn attach(runtime: Arc<dyn DeviceRuntime>) -> Option<Arc<dyn DeviceRuntime>> {
    let ordinal = runtime.ordinal();
    tracing::debug!(
        "attaching {} runtime for cuda:{} ({})",
        runtime.name(),
        ordinal,
        runtime.arch()
    );
    runtimes().write().insert(ordinal, runtime)
}

/// Detach the runtime serving `ordinal`.
///
/// Tensors already resident on the device keep their runtime handle alive.
pub fn detach(ordinal: usize) -> Option<Arc<dyn DeviceRuntime>> {
    runtimes().write().remove(&ordinal)
}

/// All attached runtimes, ordered by ordinal.
pub fn attached() -> Vec<Arc<dyn DeviceRuntime>> {
    let map = runtimes().read();
    let mut list: Vec<_> = map.values().cloned().collect();
    list.sort_by_key(|r| r.ordinal());
    list
}

/// Look up the runtime serving `device`.
///
/// With the `cuda` feature enabled, a CUDA runtime is created and attached
/// on first use of an ordinal that has none.
pub fn get(device: Device) -> Result<Arc<dyn DeviceRuntime>> {
    let ordinal = match device {
        Device::Cpu => {
            return Err(ShuntError::InvalidDevice(
                "cpu has no accelerator runtime".into(),
            ))
        }
        Device::Cuda(idx) => idx,
    };
    if let Some(rt) = runtimes().read().get(&ordinal) {
        return Ok(Arc::clone(rt));
    }
    create_default(ordinal)
}

#[cfg(feature = "cuda")]
fn create_default(ordinal: usize) -> Result<Arc<dyn DeviceRuntime>> {
    let rt: Arc<dyn DeviceRuntime> = Arc::new(CudaRuntime::new(ordinal)?);
    let mut map = runtimes().write();
    Ok(Arc::clone(map.entry(ordinal).or_insert(rt)))
}

#[cfg(not(feature = "cuda"))]
fn create_default(ordinal: usize) -> Result<Arc<dyn DeviceRuntime>> {
    Err(ShuntError::DeviceNotAttached(Device::Cuda(ordinal)))
}
