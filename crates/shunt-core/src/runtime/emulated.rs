//! Accelerator emulated in host memory.
//!
//! `EmulatedDevice` behaves like a discrete GPU from the tensor's point of
//! view: data must be uploaded before kernels run and downloaded before the
//! host can read it, allocations count against a fixed capacity, and each
//! kernel is "JIT-compiled" on first launch. Compilation can be made to fail
//! for chosen ops, which reproduces an NVRTC that does not know the device's
//! architecture.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::{DeviceBuffer, DeviceRuntime};
use crate::ops::unary::apply_bytes;
use crate::{DType, Device, Result, ShuntError, UnaryOp};

/// Default emulated memory: 1 GiB.
const DEFAULT_CAPACITY: usize = 1 << 30;

/// Transfer and launch counters of an [`EmulatedDevice`].
#[derive(Debug, Default)]
pub struct EmulatedStats {
    uploads: AtomicU64,
    downloads: AtomicU64,
    writes: AtomicU64,
    copies: AtomicU64,
    launches: AtomicU64,
}

impl EmulatedStats {
    pub fn uploads(&self) -> u64 {
        self.uploads.load(Ordering::Relaxed)
    }

    pub fn downloads(&self) -> u64 {
        self.downloads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Device-to-device copies.
    pub fn copies(&self) -> u64 {
        self.copies.load(Ordering::Relaxed)
    }

    pub fn launches(&self) -> u64 {
        self.launches.load(Ordering::Relaxed)
    }
}

/// One emulated allocation. Returns its bytes to the ledger when dropped.
struct Allocation {
    bytes: RwLock<Vec<u8>>,
    ledger: Arc<AtomicUsize>,
    len: usize,
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.ledger.fetch_sub(self.len, Ordering::AcqRel);
    }
}

#[derive(Debug)]
pub struct EmulatedDevice {
    ordinal: usize,
    arch: String,
    capacity: usize,
    allocated: Arc<AtomicUsize>,
    jit_unsupported: HashSet<UnaryOp>,
    compiled: Mutex<HashSet<UnaryOp>>,
    stats: EmulatedStats,
}

impl EmulatedDevice {
    /// An `sm_89` device with 1 GiB of memory on which every kernel compiles.
    pub fn new(ordinal: usize) -> Self {
        Self {
            ordinal,
            arch: "sm_89".into(),
            capacity: DEFAULT_CAPACITY,
            allocated: Arc::new(AtomicUsize::new(0)),
            jit_unsupported: HashSet::new(),
            compiled: Mutex::new(HashSet::new()),
            stats: EmulatedStats::default(),
        }
    }

    /// An `sm_89` device whose kernel compiler cannot build `lgamma`.
    pub fn stale_nvrtc(ordinal: usize) -> Self {
        Self::new(ordinal).with_jit_failure(UnaryOp::Lgamma)
    }

    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    /// Limit device memory to `bytes`.
    pub fn with_capacity(mut self, bytes: usize) -> Self {
        self.capacity = bytes;
        self
    }

    /// Make kernel compilation fail for `op`.
    pub fn with_jit_failure(mut self, op: UnaryOp) -> Self {
        self.jit_unsupported.insert(op);
        self
    }

    pub fn stats(&self) -> &EmulatedStats {
        &self.stats
    }

    /// Bytes currently allocated on the device.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn reserve(&self, n: usize) -> Result<()> {
        self.allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(n).filter(|&total| total <= self.capacity)
            })
            .map(|_| ())
            .map_err(|used| ShuntError::OutOfMemory {
                device: Device::Cuda(self.ordinal),
                requested: n,
                available: self.capacity.saturating_sub(used),
            })
    }

    fn alloc(&self, bytes: Vec<u8>) -> Result<DeviceBuffer> {
        let len = bytes.len();
        self.reserve(len)?;
        let allocation = Allocation {
            bytes: RwLock::new(bytes),
            ledger: Arc::clone(&self.allocated),
            len,
        };
        Ok(DeviceBuffer::new(allocation, len))
    }

    fn allocation<'a>(&self, buffer: &'a DeviceBuffer) -> Result<&'a Allocation> {
        buffer.downcast_ref::<Allocation>().ok_or_else(|| {
            ShuntError::StorageError(format!(
                "buffer was not allocated by the emulated runtime for cuda:{}",
                self.ordinal
            ))
        })
    }

    /// Compile on first use, caching successes like a module map.
    fn ensure_compiled(&self, op: UnaryOp) -> Result<()> {
        let mut compiled = self.compiled.lock();
        if compiled.contains(&op) {
            return Ok(());
        }
        if self.jit_unsupported.contains(&op) {
            return Err(ShuntError::KernelCompile {
                op,
                arch: self.arch.clone(),
                msg: format!(
                    "nvrtc: error: invalid value for --gpu-architecture (-arch): compute_{}",
                    self.arch.trim_start_matches("sm_")
                ),
            });
        }
        tracing::trace!("compiled {}_kernel for {}", op, self.arch);
        compiled.insert(op);
        Ok(())
    }
}

impl DeviceRuntime for EmulatedDevice {
    fn name(&self) -> &str {
        "emulated"
    }

    fn ordinal(&self) -> usize {
        self.ordinal
    }

    fn arch(&self) -> String {
        self.arch.clone()
    }

    fn upload(&self, bytes: &[u8]) -> Result<DeviceBuffer> {
        let buffer = self.alloc(bytes.to_vec())?;
        self.stats.uploads.fetch_add(1, Ordering::Relaxed);
        Ok(buffer)
    }

    fn download(&self, buffer: &DeviceBuffer) -> Result<Vec<u8>> {
        let alloc = self.allocation(buffer)?;
        self.stats.downloads.fetch_add(1, Ordering::Relaxed);
        Ok(alloc.bytes.read().clone())
    }

    fn write(&self, buffer: &DeviceBuffer, bytes: &[u8]) -> Result<()> {
        let alloc = self.allocation(buffer)?;
        let mut dst = alloc.bytes.write();
        if dst.len() != bytes.len() {
            return Err(ShuntError::StorageError(format!(
                "write of {} bytes into a {}-byte device buffer",
                bytes.len(),
                dst.len()
            )));
        }
        dst.copy_from_slice(bytes);
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn copy(&self, src: &DeviceBuffer, dst: &DeviceBuffer) -> Result<()> {
        if src.same_allocation(dst) {
            return Ok(());
        }
        let from = self.allocation(src)?;
        let to = self.allocation(dst)?;
        if from.len != to.len {
            return Err(ShuntError::StorageError(format!(
                "copy of {} bytes into a {}-byte device buffer",
                from.len, to.len
            )));
        }
        to.bytes.write().copy_from_slice(&from.bytes.read());
        self.stats.copies.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn launch_unary(
        &self,
        op: UnaryOp,
        dtype: DType,
        input: &DeviceBuffer,
        numel: usize,
    ) -> Result<DeviceBuffer> {
        self.ensure_compiled(op)?;
        let alloc = self.allocation(input)?;
        let expected = dtype.storage_bytes(numel);
        if alloc.len != expected {
            return Err(ShuntError::LaunchError(format!(
                "{op}: expected {expected} bytes for {numel} x {dtype}, buffer has {}",
                alloc.len
            )));
        }
        let out = apply_bytes(op, dtype, &alloc.bytes.read())?;
        self.stats.launches.fetch_add(1, Ordering::Relaxed);
        self.alloc(out)
    }
}
