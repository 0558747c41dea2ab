use std::fmt;
use std::sync::Arc;

use crate::dtype::DType;
use crate::device::Device;
use crate::error::ShuntError;
use crate::runtime::{self, DeviceRuntime};
use crate::shape::Shape;
use crate::storage::{Placement, Storage};
use crate::Result;

/// A contiguous multi-dimensional array on the host or an accelerator.
///
/// # Examples
///
/// ```
/// use shunt_core::Tensor;
///
/// let t = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
/// assert_eq!(t.shape().dims(), &[2, 2]);
///
/// let lg = t.lgamma().unwrap();
/// assert_eq!(lg.device(), t.device());
/// ```
#[derive(Clone)]
pub struct Tensor {
    storage: Storage,
    shape: Shape,
}

impl Tensor {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create a host tensor from f32 data.
    ///
    /// # Panics
    /// If `shape` does not hold exactly `data.len()` elements.
    pub fn from_f32(data: &[f32], shape: &[usize]) -> Self {
        Self::checked(Storage::from_f32(data), shape)
    }

    /// Create a host tensor from f64 data.
    ///
    /// # Panics
    /// If `shape` does not hold exactly `data.len()` elements.
    pub fn from_f64(data: &[f64], shape: &[usize]) -> Self {
        Self::checked(Storage::from_f64(data), shape)
    }

    /// Create a host tensor from i32 data.
    ///
    /// # Panics
    /// If `shape` does not hold exactly `data.len()` elements.
    pub fn from_i32(data: &[i32], shape: &[usize]) -> Self {
        Self::checked(Storage::from_i32(data), shape)
    }

    /// 0-d f32 tensor.
    pub fn scalar(value: f32) -> Self {
        Self::from_f32(&[value], &[])
    }

    fn checked(storage: Storage, shape: &[usize]) -> Self {
        let s = Shape::new(shape);
        assert_eq!(
            s.numel(),
            storage.numel(),
            "Shape {:?} requires {} elements, got {}",
            shape,
            s.numel(),
            storage.numel()
        );
        Self { storage, shape: s }
    }

    /// Wrap existing storage with a shape covering all of its elements.
    pub fn from_storage(storage: Storage, shape: &[usize]) -> Result<Self> {
        let s = Shape::new(shape);
        if s.numel() != storage.numel() {
            return Err(ShuntError::ShapeMismatch {
                expected: vec![storage.numel()],
                got: shape.to_vec(),
            });
        }
        Ok(Self { storage, shape: s })
    }

    // =========================================================================
    // Properties
    // =========================================================================

    pub fn storage_ref(&self) -> &Storage {
        &self.storage
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    pub fn device(&self) -> Device {
        self.storage.device()
    }

    pub fn is_cpu(&self) -> bool {
        self.device().is_cpu()
    }

    pub fn is_accelerator(&self) -> bool {
        self.device().is_accelerator()
    }

    /// Exact location of this tensor, usable to move other data next to it.
    pub fn placement(&self) -> Placement {
        self.storage.placement()
    }

    /// Whether both tensors share one allocation.
    pub fn shares_storage(&self, other: &Tensor) -> bool {
        self.storage.same_allocation(&other.storage)
    }

    // =========================================================================
    // Data access (host only)
    // =========================================================================

    pub fn to_vec_f32(&self) -> Result<Vec<f32>> {
        self.host_values(DType::F32)
    }

    pub fn to_vec_f64(&self) -> Result<Vec<f64>> {
        self.host_values(DType::F64)
    }

    pub fn to_vec_i32(&self) -> Result<Vec<i32>> {
        self.host_values(DType::I32)
    }

    fn host_values<T: bytemuck::Pod>(&self, want: DType) -> Result<Vec<T>> {
        if self.dtype() != want {
            return Err(ShuntError::DTypeMismatch {
                expected: want,
                got: self.dtype(),
            });
        }
        Ok(bytemuck::pod_collect_to_vec(self.storage.host_bytes()?.as_slice()))
    }

    // =========================================================================
    // Views
    // =========================================================================

    /// Reshape without copying. One axis may be `-1`.
    pub fn reshape(&self, new_shape: &[isize]) -> Result<Tensor> {
        let shape = self.shape.resolve_reshape(new_shape).ok_or_else(|| {
            ShuntError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                got: new_shape.iter().map(|&d| d.max(0) as usize).collect(),
            }
        })?;
        Ok(Tensor {
            storage: self.storage.clone(),
            shape,
        })
    }

    // =========================================================================
    // Device transfer
    // =========================================================================

    /// Move to `device`. No-op if already there.
    ///
    /// Accelerator targets are resolved through [`runtime::get`].
    pub fn to(&self, device: Device) -> Result<Tensor> {
        if device == self.device() {
            return Ok(self.clone());
        }
        match device {
            Device::Cpu => self.to_host(),
            Device::Cuda(_) => self.to_runtime(&runtime::get(device)?),
        }
    }

    /// Copy to host memory (blocking).
    pub fn to_host(&self) -> Result<Tensor> {
        self.with_storage(self.storage.to_host()?)
    }

    /// Upload to the device served by `runtime` (blocking).
    pub fn to_runtime(&self, runtime: &Arc<dyn DeviceRuntime>) -> Result<Tensor> {
        self.with_storage(self.storage.upload(runtime)?)
    }

    /// Copy to a recorded placement.
    pub fn to_placement(&self, placement: &Placement) -> Result<Tensor> {
        self.with_storage(self.storage.to_placement(placement)?)
    }

    /// Convenience for `.to(Device::Cuda(ordinal))`.
    pub fn cuda(&self, ordinal: usize) -> Result<Tensor> {
        self.to(Device::Cuda(ordinal))
    }

    /// Convenience for `.to(Device::Cpu)`.
    pub fn cpu(&self) -> Result<Tensor> {
        self.to(Device::Cpu)
    }

    fn with_storage(&self, storage: Storage) -> Result<Tensor> {
        Ok(Tensor {
            storage,
            shape: self.shape.clone(),
        })
    }

    // =========================================================================
    // In-place
    // =========================================================================

    /// Overwrite this tensor's storage with the values of `src`.
    ///
    /// The tensor stays where it is; `src` may live anywhere. Shape and dtype
    /// must match. Tensors sharing the storage, such as reshaped views, see
    /// the new values.
    pub fn copy_(&mut self, src: &Tensor) -> Result<&mut Tensor> {
        if self.shape != src.shape {
            return Err(ShuntError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                got: src.shape.dims().to_vec(),
            });
        }
        self.storage.overwrite(&src.storage)?;
        Ok(self)
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor(shape={}, dtype={}, device={})",
            self.shape,
            self.dtype(),
            self.device(),
        )
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dtype() {
            DType::F32 if self.is_cpu() => {
                let data = self.to_vec_f32().map_err(|_| fmt::Error)?;
                write!(f, "tensor({:?}, shape={})", data, self.shape)
            }
            DType::F64 if self.is_cpu() => {
                let data = self.to_vec_f64().map_err(|_| fmt::Error)?;
                write!(f, "tensor({:?}, shape={})", data, self.shape)
            }
            _ => write!(
                f,
                "tensor(shape={}, dtype={}, device={})",
                self.shape,
                self.dtype(),
                self.device()
            ),
        }
    }
}
