use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::runtime::{DeviceBuffer, DeviceRuntime};
use crate::{DType, Device, Result, ShuntError};

/// Backing memory of a tensor.
pub enum StorageData {
    /// Host heap allocation.
    Host(RwLock<Vec<u8>>),
    /// Accelerator allocation, together with the runtime that owns it.
    Device {
        runtime: Arc<dyn DeviceRuntime>,
        buffer: DeviceBuffer,
    },
}

/// Where a tensor lives, precisely enough to put data back there.
///
/// For accelerator tensors this keeps the runtime handle, not just the
/// ordinal, so restoring does not depend on the runtime registry.
#[derive(Clone)]
pub struct Placement {
    device: Device,
    runtime: Option<Arc<dyn DeviceRuntime>>,
}

impl Placement {
    pub fn host() -> Self {
        Self {
            device: Device::Cpu,
            runtime: None,
        }
    }

    pub fn on(runtime: Arc<dyn DeviceRuntime>) -> Self {
        Self {
            device: runtime.device(),
            runtime: Some(runtime),
        }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn runtime(&self) -> Option<&Arc<dyn DeviceRuntime>> {
        self.runtime.as_ref()
    }
}

impl fmt::Debug for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.runtime {
            Some(rt) => write!(f, "Placement({} via {})", self.device, rt.name()),
            None => write!(f, "Placement({})", self.device),
        }
    }
}

/// Shared, reference-counted tensor storage.
///
/// Clones share one allocation. [`Storage::overwrite`] writes into it, on the
/// host as on a device, so every tensor sharing the buffer sees the write.
#[derive(Clone)]
pub struct Storage {
    data: Arc<StorageData>,
    dtype: DType,
    device: Device,
    /// Number of logical elements (not bytes).
    numel: usize,
}

impl Storage {
    /// Create host storage from raw bytes.
    pub fn from_host_bytes(dtype: DType, numel: usize, bytes: Vec<u8>) -> Result<Self> {
        let expected = dtype.storage_bytes(numel);
        if bytes.len() != expected {
            return Err(ShuntError::StorageError(format!(
                "Expected {} bytes for {} elements of {}, got {}",
                expected,
                numel,
                dtype,
                bytes.len()
            )));
        }
        Ok(Self {
            data: Arc::new(StorageData::Host(RwLock::new(bytes))),
            dtype,
            device: Device::Cpu,
            numel,
        })
    }

    /// Wrap an accelerator allocation produced by `runtime`.
    pub fn from_device(
        runtime: Arc<dyn DeviceRuntime>,
        buffer: DeviceBuffer,
        dtype: DType,
        numel: usize,
    ) -> Self {
        let device = runtime.device();
        Self {
            data: Arc::new(StorageData::Device { runtime, buffer }),
            dtype,
            device,
            numel,
        }
    }

    pub fn from_f32(data: &[f32]) -> Self {
        Self::host_from_pod(data, DType::F32)
    }

    pub fn from_f64(data: &[f64]) -> Self {
        Self::host_from_pod(data, DType::F64)
    }

    pub fn from_i32(data: &[i32]) -> Self {
        Self::host_from_pod(data, DType::I32)
    }

    fn host_from_pod<T: bytemuck::Pod>(data: &[T], dtype: DType) -> Self {
        Self {
            data: Arc::new(StorageData::Host(RwLock::new(bytemuck::cast_slice(data).to_vec()))),
            dtype,
            device: Device::Cpu,
            numel: data.len(),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn numel(&self) -> usize {
        self.numel
    }

    pub fn nbytes(&self) -> usize {
        match self.data.as_ref() {
            StorageData::Host(v) => v.read().len(),
            StorageData::Device { buffer, .. } => buffer.nbytes(),
        }
    }

    pub fn data(&self) -> &StorageData {
        self.data.as_ref()
    }

    pub fn placement(&self) -> Placement {
        match self.data.as_ref() {
            StorageData::Host(_) => Placement::host(),
            StorageData::Device { runtime, .. } => Placement::on(Arc::clone(runtime)),
        }
    }

    /// Runtime and buffer of device storage; `None` on the host.
    pub fn device_parts(&self) -> Option<(&Arc<dyn DeviceRuntime>, &DeviceBuffer)> {
        match self.data.as_ref() {
            StorageData::Host(_) => None,
            StorageData::Device { runtime, buffer } => Some((runtime, buffer)),
        }
    }

    /// Raw bytes of host storage, read-locked.
    pub fn host_bytes(&self) -> Result<RwLockReadGuard<'_, Vec<u8>>> {
        match self.data.as_ref() {
            StorageData::Host(v) => Ok(v.read()),
            StorageData::Device { .. } => Err(ShuntError::NotOnHost(self.device)),
        }
    }

    /// Raw bytes of host storage, write-locked. Writes are seen by every
    /// storage sharing the allocation.
    pub fn host_bytes_mut(&self) -> Result<RwLockWriteGuard<'_, Vec<u8>>> {
        match self.data.as_ref() {
            StorageData::Host(v) => Ok(v.write()),
            StorageData::Device { .. } => Err(ShuntError::NotOnHost(self.device)),
        }
    }

    /// Bytes of this storage on the host, downloading if necessary.
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        match self.data.as_ref() {
            StorageData::Host(v) => Ok(v.read().clone()),
            StorageData::Device { runtime, buffer } => runtime.download(buffer),
        }
    }

    /// Whether both storages share one allocation.
    pub fn same_allocation(&self, other: &Storage) -> bool {
        match (self.data.as_ref(), other.data.as_ref()) {
            (StorageData::Device { buffer: a, .. }, StorageData::Device { buffer: b, .. }) => {
                a.same_allocation(b)
            }
            _ => Arc::ptr_eq(&self.data, &other.data),
        }
    }

    /// Copy to host memory (D2H). No-op for host storage.
    pub fn to_host(&self) -> Result<Self> {
        match self.data.as_ref() {
            StorageData::Host(_) => Ok(self.clone()),
            StorageData::Device { runtime, buffer } => {
                let bytes = runtime.download(buffer).map_err(|e| transfer_error(e, self.device, Device::Cpu))?;
                tracing::trace!("D2H {} bytes from {}", bytes.len(), self.device);
                Self::from_host_bytes(self.dtype, self.numel, bytes)
            }
        }
    }

    /// Copy into a new allocation on `runtime`'s device.
    /// No-op if the storage is already held by that runtime.
    pub fn upload(&self, runtime: &Arc<dyn DeviceRuntime>) -> Result<Self> {
        if let StorageData::Device { runtime: current, .. } = self.data.as_ref() {
            if Arc::ptr_eq(current, runtime) {
                return Ok(self.clone());
            }
        }
        let target = runtime.device();
        let bytes = self.read_bytes().map_err(|e| transfer_error(e, self.device, target))?;
        let buffer = runtime.upload(&bytes).map_err(|e| transfer_error(e, self.device, target))?;
        tracing::trace!("H2D {} bytes to {}", bytes.len(), target);
        Ok(Self::from_device(Arc::clone(runtime), buffer, self.dtype, self.numel))
    }

    /// Copy to `placement`.
    pub fn to_placement(&self, placement: &Placement) -> Result<Self> {
        match placement.runtime() {
            None => self.to_host(),
            Some(runtime) => self.upload(runtime),
        }
    }

    /// Overwrite this storage's contents with `src`, keeping its location.
    ///
    /// Source and destination on the same runtime are copied device to
    /// device.
    pub fn overwrite(&mut self, src: &Storage) -> Result<()> {
        if self.dtype != src.dtype {
            return Err(ShuntError::DTypeMismatch {
                expected: self.dtype,
                got: src.dtype,
            });
        }
        if self.numel != src.numel {
            return Err(ShuntError::StorageError(format!(
                "cannot overwrite {} elements with {}",
                self.numel, src.numel
            )));
        }
        if self.same_allocation(src) {
            return Ok(());
        }
        if let (Some((dst_rt, dst)), Some((src_rt, src_buf))) = (self.device_parts(), src.device_parts()) {
            if Arc::ptr_eq(dst_rt, src_rt) {
                return dst_rt.copy(src_buf, dst);
            }
        }
        let bytes = src.read_bytes()?;
        if let Some((runtime, buffer)) = self.device_parts() {
            return runtime.write(buffer, &bytes);
        }
        self.host_bytes_mut()?.copy_from_slice(&bytes);
        Ok(())
    }
}

/// Device errors that already say what went wrong (OOM, runtime-specific)
/// pass through; anything else is tagged with the transfer direction.
fn transfer_error(err: ShuntError, from: Device, to: Device) -> ShuntError {
    match err {
        ShuntError::StorageError(msg) => ShuntError::TransferError { from, to, msg },
        other => other,
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("dtype", &self.dtype)
            .field("device", &self.device)
            .field("numel", &self.numel)
            .field("nbytes", &self.nbytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::EmulatedDevice;

    fn emulated(ordinal: usize) -> Arc<dyn DeviceRuntime> {
        Arc::new(EmulatedDevice::new(ordinal))
    }

    #[test]
    fn test_from_f32() {
        let s = Storage::from_f32(&[1.0, 2.0, 3.0]);
        assert_eq!(s.numel(), 3);
        assert_eq!(s.nbytes(), 12);
        assert_eq!(s.device(), Device::Cpu);
        let back: Vec<f32> = bytemuck::pod_collect_to_vec(s.host_bytes().unwrap().as_slice());
        assert_eq!(back, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_from_host_bytes_validation() {
        assert!(Storage::from_host_bytes(DType::F32, 3, vec![0u8; 11]).is_err());
        assert!(Storage::from_host_bytes(DType::F32, 3, vec![0u8; 12]).is_ok());
    }

    #[test]
    fn test_host_writes_are_shared() {
        let s1 = Storage::from_f32(&[1.0, 2.0]);
        let s2 = s1.clone();
        assert!(s1.same_allocation(&s2));
        s2.host_bytes_mut().unwrap()[0] = 0xff;
        assert!(s1.same_allocation(&s2));
        assert_eq!(s1.host_bytes().unwrap()[0], 0xff);
    }

    #[test]
    fn test_overwrite_host_in_place() {
        let mut dst = Storage::from_f32(&[0.0, 0.0]);
        let alias = dst.clone();
        dst.overwrite(&Storage::from_f32(&[7.0, 8.0])).unwrap();

        assert!(dst.same_allocation(&alias));
        let seen: Vec<f32> = bytemuck::pod_collect_to_vec(&alias.read_bytes().unwrap());
        assert_eq!(seen, vec![7.0, 8.0]);
    }

    #[test]
    fn test_overwrite_device_from_same_runtime_stays_on_device() {
        let dev = Arc::new(EmulatedDevice::new(2));
        let rt: Arc<dyn DeviceRuntime> = dev.clone();
        let mut dst = Storage::from_f32(&[0.0, 0.0]).upload(&rt).unwrap();
        let src = Storage::from_f32(&[5.0, 6.0]).upload(&rt).unwrap();
        let downloads = dev.stats().downloads();

        dst.overwrite(&src).unwrap();
        assert_eq!(dev.stats().downloads(), downloads);
        assert_eq!(dev.stats().writes(), 0);
        assert_eq!(dev.stats().copies(), 1);
        let seen: Vec<f32> = bytemuck::pod_collect_to_vec(&dst.read_bytes().unwrap());
        assert_eq!(seen, vec![5.0, 6.0]);
    }

    #[test]
    fn test_device_roundtrip() {
        let rt = emulated(0);
        let host = Storage::from_f64(&[1.5, -2.0]);
        let dev = host.upload(&rt).unwrap();
        assert_eq!(dev.device(), Device::Cuda(0));
        assert!(matches!(dev.host_bytes(), Err(ShuntError::NotOnHost(Device::Cuda(0)))));
        assert!(dev.upload(&rt).unwrap().same_allocation(&dev));

        let back = dev.to_host().unwrap();
        assert_eq!(back.device(), Device::Cpu);
        assert_eq!(*back.host_bytes().unwrap(), *host.host_bytes().unwrap());
    }

    #[test]
    fn test_placement() {
        let rt = emulated(3);
        let dev = Storage::from_f32(&[1.0]).upload(&rt).unwrap();
        let placement = dev.placement();
        assert_eq!(placement.device(), Device::Cuda(3));
        assert!(Arc::ptr_eq(placement.runtime().unwrap(), &rt));

        let host = dev.to_host().unwrap();
        let restored = host.to_placement(&placement).unwrap();
        assert_eq!(restored.device(), Device::Cuda(3));
        assert_eq!(Storage::from_f32(&[1.0]).placement().device(), Device::Cpu);
    }

    #[test]
    fn test_overwrite_device_in_place() {
        let rt = emulated(1);
        let mut dst = Storage::from_f32(&[0.0, 0.0]).upload(&rt).unwrap();
        let alias = dst.clone();
        dst.overwrite(&Storage::from_f32(&[7.0, 8.0])).unwrap();

        assert!(dst.same_allocation(&alias));
        let seen: Vec<f32> = bytemuck::pod_collect_to_vec(&alias.read_bytes().unwrap());
        assert_eq!(seen, vec![7.0, 8.0]);
    }

    #[test]
    fn test_overwrite_checks_layout() {
        let mut dst = Storage::from_f32(&[0.0, 0.0]);
        assert!(matches!(
            dst.overwrite(&Storage::from_f64(&[1.0, 2.0])),
            Err(ShuntError::DTypeMismatch { .. })
        ));
        assert!(dst.overwrite(&Storage::from_f32(&[1.0])).is_err());
    }
}
