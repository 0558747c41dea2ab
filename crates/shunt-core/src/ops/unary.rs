//! Host kernels and the default dispatch path for unary ops.

use std::sync::Arc;

use rayon::prelude::*;

use super::UnaryOp;
use crate::storage::Storage;
use crate::tensor::Tensor;
use crate::{DType, Result, ShuntError};

/// Minimum element count before the host kernel fans out across threads.
const PAR_THRESHOLD: usize = 1 << 14;

/// Apply `op` to a packed buffer of `dtype` elements, returning new bytes.
pub(crate) fn apply_bytes(op: UnaryOp, dtype: DType, bytes: &[u8]) -> Result<Vec<u8>> {
    match dtype {
        DType::F32 => {
            let src: Vec<f32> = bytemuck::pod_collect_to_vec(bytes);
            let out = map_elements(&src, |x| op.eval_f32(x));
            Ok(bytemuck::cast_slice(&out).to_vec())
        }
        DType::F64 => {
            let src: Vec<f64> = bytemuck::pod_collect_to_vec(bytes);
            let out = map_elements(&src, |x| op.eval(x));
            Ok(bytemuck::cast_slice(&out).to_vec())
        }
        other => Err(ShuntError::UnsupportedDType(other)),
    }
}

fn map_elements<T, F>(src: &[T], f: F) -> Vec<T>
where
    T: Copy + Send + Sync,
    F: Fn(T) -> T + Send + Sync,
{
    if src.len() >= PAR_THRESHOLD {
        src.par_iter().map(|&v| f(v)).collect()
    } else {
        src.iter().map(|&v| f(v)).collect()
    }
}

/// The computation an op performs when no override intercepts it: the host
/// kernel for host tensors, the device runtime's kernel for accelerator
/// tensors.
pub(crate) fn base_unary(op: UnaryOp, input: &Tensor) -> Result<Tensor> {
    let storage = input.storage_ref();
    let out = match storage.device_parts() {
        None => {
            let bytes = apply_bytes(op, input.dtype(), &storage.host_bytes()?)?;
            Storage::from_host_bytes(input.dtype(), input.numel(), bytes)?
        }
        Some((runtime, buffer)) => {
            tracing::trace!("{} on {} via {} runtime", op, input.device(), runtime.name());
            let out = runtime.launch_unary(op, input.dtype(), buffer, input.numel())?;
            Storage::from_device(Arc::clone(runtime), out, input.dtype(), input.numel())
        }
    };
    Tensor::from_storage(out, input.shape().dims())
}

impl Tensor {
    /// Element-wise log-gamma: `ln |Γ(x)|`.
    pub fn lgamma(&self) -> Result<Tensor> {
        super::lgamma(self)
    }

    /// In-place log-gamma. Overwrites this tensor's storage with the result.
    pub fn lgamma_(&mut self) -> Result<&mut Tensor> {
        self.unary_(UnaryOp::Lgamma)
    }

    pub fn exp(&self) -> Result<Tensor> {
        super::exp(self)
    }

    pub fn exp_(&mut self) -> Result<&mut Tensor> {
        self.unary_(UnaryOp::Exp)
    }

    pub fn log(&self) -> Result<Tensor> {
        super::log(self)
    }

    pub fn log_(&mut self) -> Result<&mut Tensor> {
        self.unary_(UnaryOp::Log)
    }

    pub fn sqrt(&self) -> Result<Tensor> {
        super::sqrt(self)
    }

    pub fn sqrt_(&mut self) -> Result<&mut Tensor> {
        self.unary_(UnaryOp::Sqrt)
    }

    pub fn abs(&self) -> Result<Tensor> {
        super::abs(self)
    }

    pub fn abs_(&mut self) -> Result<&mut Tensor> {
        self.unary_(UnaryOp::Abs)
    }

    pub fn neg(&self) -> Result<Tensor> {
        super::neg(self)
    }

    pub fn neg_(&mut self) -> Result<&mut Tensor> {
        self.unary_(UnaryOp::Neg)
    }

    /// Out-of-place `op`, then copy the result into this tensor's storage.
    pub fn unary_(&mut self, op: UnaryOp) -> Result<&mut Tensor> {
        let out = super::unary(op, self)?;
        self.copy_(&out)?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_bytes_f64() {
        let bytes: Vec<u8> = bytemuck::cast_slice(&[1.0f64, 3.0]).to_vec();
        let out: Vec<f64> = bytemuck::pod_collect_to_vec(&apply_bytes(UnaryOp::Lgamma, DType::F64, &bytes).unwrap());
        assert!(out[0].abs() < 1e-12);
        assert!((out[1] - 2.0f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_apply_bytes_rejects_integers() {
        let bytes: Vec<u8> = bytemuck::cast_slice(&[1i32, 2]).to_vec();
        let err = apply_bytes(UnaryOp::Exp, DType::I32, &bytes).unwrap_err();
        assert!(matches!(err, ShuntError::UnsupportedDType(DType::I32)));
    }

    #[test]
    fn test_parallel_path_matches_serial() {
        let n = PAR_THRESHOLD + 3;
        let data: Vec<f32> = (0..n).map(|i| 0.5 + (i % 50) as f32 * 0.25).collect();
        let t = Tensor::from_f32(&data, &[n]);
        let out = base_unary(UnaryOp::Lgamma, &t).unwrap().to_vec_f32().unwrap();
        for (i, (&x, &y)) in data.iter().zip(out.iter()).enumerate() {
            assert_eq!(y, UnaryOp::Lgamma.eval_f32(x), "element {i}");
        }
    }

    #[test]
    fn test_in_place_host() {
        let mut t = Tensor::from_f64(&[1.0, 2.0, 3.0], &[3]);
        t.lgamma_().unwrap();
        let v = t.to_vec_f64().unwrap();
        assert!(v[0].abs() < 1e-12 && v[1].abs() < 1e-12);
        assert!((v[2] - 2.0f64.ln()).abs() < 1e-12);
        assert_eq!(t.shape().dims(), &[3]);
    }

    #[test]
    fn test_in_place_host_updates_views() {
        let mut t = Tensor::from_f32(&[-1.0, 2.0, -3.0, 4.0], &[4]);
        let view = t.reshape(&[2, 2]).unwrap();
        t.abs_().unwrap();
        assert!(view.shares_storage(&t));
        assert_eq!(view.to_vec_f32().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_shape_and_dtype_preserved() {
        let t = Tensor::from_f64(&[0.5, 1.5, 2.5, 3.5, 4.5, 5.5], &[2, 3]);
        let out = t.lgamma().unwrap();
        assert_eq!(out.shape().dims(), &[2, 3]);
        assert_eq!(out.dtype(), DType::F64);
    }
}
