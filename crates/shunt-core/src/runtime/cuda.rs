//! CUDA runtime backed by `cudarc`.
//!
//! Kernels are compiled from embedded source through NVRTC on first launch
//! and cached in the device's module map. On toolchains that predate the
//! device's architecture, that compilation is what fails.

use std::sync::Arc;

use cudarc::driver::sys::CUdevice_attribute;
use cudarc::driver::{CudaDevice, CudaSlice, LaunchAsync, LaunchConfig};
use parking_lot::Mutex;

use super::{DeviceBuffer, DeviceRuntime};
use crate::{DType, Result, ShuntError, UnaryOp};

const MODULE: &str = "shunt_unary";
const BLOCK_SIZE: u32 = 256;

const UNARY_CU: &str = r#"
#define UNARY_KERNEL(name, T, expr)                                           \
extern "C" __global__ void name(const T* in, T* out, unsigned int n) {       \
    unsigned int i = blockIdx.x * blockDim.x + threadIdx.x;                   \
    if (i < n) { T x = in[i]; out[i] = (expr); }                              \
}

UNARY_KERNEL(lgamma_f32, float, lgammaf(x))
UNARY_KERNEL(exp_f32, float, expf(x))
UNARY_KERNEL(log_f32, float, logf(x))
UNARY_KERNEL(sqrt_f32, float, sqrtf(x))
UNARY_KERNEL(abs_f32, float, fabsf(x))
UNARY_KERNEL(neg_f32, float, -x)

UNARY_KERNEL(lgamma_f64, double, lgamma(x))
UNARY_KERNEL(exp_f64, double, exp(x))
UNARY_KERNEL(log_f64, double, log(x))
UNARY_KERNEL(sqrt_f64, double, sqrt(x))
UNARY_KERNEL(abs_f64, double, fabs(x))
UNARY_KERNEL(neg_f64, double, -x)
"#;

const FUNCS: &[&str] = &[
    "lgamma_f32", "exp_f32", "log_f32", "sqrt_f32", "abs_f32", "neg_f32",
    "lgamma_f64", "exp_f64", "log_f64", "sqrt_f64", "abs_f64", "neg_f64",
];

/// Device allocation; the mutex serialises in-place writes.
struct CudaAllocation {
    slice: Mutex<CudaSlice<u8>>,
}

#[derive(Debug)]
pub struct CudaRuntime {
    device: Arc<CudaDevice>,
    ordinal: usize,
    arch: String,
}

impl CudaRuntime {
    pub fn new(ordinal: usize) -> Result<Self> {
        let device = CudaDevice::new(ordinal)
            .map_err(|e| ShuntError::CudaError(format!("device {ordinal} init: {e}")))?;
        let major = device
            .attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)
            .map_err(|e| ShuntError::CudaError(format!("compute capability: {e}")))?;
        let minor = device
            .attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)
            .map_err(|e| ShuntError::CudaError(format!("compute capability: {e}")))?;
        Ok(Self {
            device,
            ordinal,
            arch: format!("sm_{major}{minor}"),
        })
    }

    fn allocation<'a>(&self, buffer: &'a DeviceBuffer) -> Result<&'a CudaAllocation> {
        buffer
            .downcast_ref::<CudaAllocation>()
            .ok_or_else(|| ShuntError::CudaError("buffer not allocated by the CUDA runtime".into()))
    }

    fn wrap(&self, slice: CudaSlice<u8>, nbytes: usize) -> DeviceBuffer {
        DeviceBuffer::new(CudaAllocation { slice: Mutex::new(slice) }, nbytes)
    }

    fn get_func(&self, op: UnaryOp, dtype: DType) -> Result<cudarc::driver::CudaFunction> {
        let func_name = format!("{op}_{dtype}");
        if let Some(f) = self.device.get_func(MODULE, &func_name) {
            return Ok(f);
        }
        let ptx = cudarc::nvrtc::compile_ptx(UNARY_CU).map_err(|e| ShuntError::KernelCompile {
            op,
            arch: self.arch.clone(),
            msg: e.to_string(),
        })?;
        self.device
            .load_ptx(ptx, MODULE, FUNCS)
            .map_err(|e| ShuntError::KernelCompile {
                op,
                arch: self.arch.clone(),
                msg: e.to_string(),
            })?;
        self.device
            .get_func(MODULE, &func_name)
            .ok_or_else(|| ShuntError::CudaError(format!("func '{func_name}' not found in '{MODULE}'")))
    }
}

/// One thread per element. Kernels index with `unsigned int`.
fn launch_config(op: UnaryOp, numel: usize) -> Result<(LaunchConfig, u32)> {
    let n = u32::try_from(numel).map_err(|_| {
        ShuntError::LaunchError(format!("{op}: {numel} elements exceed the 32-bit index range"))
    })?;
    let cfg = LaunchConfig {
        grid_dim: (n.div_ceil(BLOCK_SIZE).max(1), 1, 1),
        block_dim: (BLOCK_SIZE, 1, 1),
        shared_mem_bytes: 0,
    };
    Ok((cfg, n))
}

impl DeviceRuntime for CudaRuntime {
    fn name(&self) -> &str {
        "cuda"
    }

    fn ordinal(&self) -> usize {
        self.ordinal
    }

    fn arch(&self) -> String {
        self.arch.clone()
    }

    fn upload(&self, bytes: &[u8]) -> Result<DeviceBuffer> {
        let slice = self
            .device
            .htod_sync_copy(bytes)
            .map_err(|e| ShuntError::CudaError(format!("H2D copy: {e}")))?;
        Ok(self.wrap(slice, bytes.len()))
    }

    fn download(&self, buffer: &DeviceBuffer) -> Result<Vec<u8>> {
        let alloc = self.allocation(buffer)?;
        let slice = alloc.slice.lock();
        self.device
            .dtoh_sync_copy(&*slice)
            .map_err(|e| ShuntError::CudaError(format!("D2H copy: {e}")))
    }

    fn write(&self, buffer: &DeviceBuffer, bytes: &[u8]) -> Result<()> {
        if buffer.nbytes() != bytes.len() {
            return Err(ShuntError::StorageError(format!(
                "write of {} bytes into a {}-byte device buffer",
                bytes.len(),
                buffer.nbytes()
            )));
        }
        let alloc = self.allocation(buffer)?;
        let mut slice = alloc.slice.lock();
        self.device
            .htod_sync_copy_into(bytes, &mut *slice)
            .map_err(|e| ShuntError::CudaError(format!("H2D copy: {e}")))
    }

    fn copy(&self, src: &DeviceBuffer, dst: &DeviceBuffer) -> Result<()> {
        if src.same_allocation(dst) {
            return Ok(());
        }
        if src.nbytes() != dst.nbytes() {
            return Err(ShuntError::StorageError(format!(
                "copy of {} bytes into a {}-byte device buffer",
                src.nbytes(),
                dst.nbytes()
            )));
        }
        let from = self.allocation(src)?.slice.lock();
        let mut to = self.allocation(dst)?.slice.lock();
        self.device
            .dtod_copy(&*from, &mut *to)
            .map_err(|e| ShuntError::CudaError(format!("D2D copy: {e}")))
    }

    fn launch_unary(
        &self,
        op: UnaryOp,
        dtype: DType,
        input: &DeviceBuffer,
        numel: usize,
    ) -> Result<DeviceBuffer> {
        if !dtype.is_float() {
            return Err(ShuntError::UnsupportedDType(dtype));
        }
        let (cfg, n) = launch_config(op, numel)?;
        let f = self.get_func(op, dtype)?;
        let nbytes = dtype.storage_bytes(numel);
        let mut out = self
            .device
            .alloc_zeros::<u8>(nbytes)
            .map_err(|e| ShuntError::CudaError(format!("alloc_zeros({nbytes} bytes): {e}")))?;
        let alloc = self.allocation(input)?;
        let src = alloc.slice.lock();
        let launched = unsafe {
            match dtype {
                DType::F32 => {
                    let a = src.transmute::<f32>(numel);
                    let b = out.transmute_mut::<f32>(numel);
                    match (a, b) {
                        (Some(a), Some(mut b)) => f.launch(cfg, (&a, &mut b, n)),
                        _ => return Err(ShuntError::LaunchError(format!("{op}: buffer too small"))),
                    }
                }
                _ => {
                    let a = src.transmute::<f64>(numel);
                    let b = out.transmute_mut::<f64>(numel);
                    match (a, b) {
                        (Some(a), Some(mut b)) => f.launch(cfg, (&a, &mut b, n)),
                        _ => return Err(ShuntError::LaunchError(format!("{op}: buffer too small"))),
                    }
                }
            }
        };
        launched.map_err(|e| ShuntError::LaunchError(format!("{op}_{dtype}: {e}")))?;
        drop(src);
        Ok(self.wrap(out, nbytes))
    }
}
