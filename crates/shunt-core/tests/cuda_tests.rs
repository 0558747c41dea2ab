//! GPU integration tests for the CUDA runtime.
//! Run with: cargo test -p shunt-core --features cuda -- --nocapture

#![cfg(feature = "cuda")]

use shunt_core::{Device, DispatchTable, ShuntError, Tensor, UnaryOp};

fn assert_close(a: &[f32], b: &[f32], tol: f32) {
    assert_eq!(a.len(), b.len(), "length mismatch: {} vs {}", a.len(), b.len());
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        assert!(
            (x - y).abs() < tol,
            "element {} differs: {} vs {} (tol={})",
            i, x, y, tol
        );
    }
}

#[test]
fn test_cpu_to_cuda_roundtrip() {
    let data = vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
    let gpu = Tensor::from_f32(&data, &[2, 3]).cuda(0).expect("Failed to move to GPU");
    assert_eq!(gpu.device(), Device::Cuda(0));
    let back = gpu.cpu().expect("Failed to move back to CPU");
    assert_eq!(back.to_vec_f32().unwrap(), data);
}

#[test]
fn test_cuda_exp() {
    let table = DispatchTable::new();
    let x = Tensor::from_f32(&[0.0, 1.0], &[2]).cuda(0).unwrap();
    let y = table.call_unary(UnaryOp::Exp, &x).unwrap();
    assert!(y.is_accelerator());
    assert_close(&y.cpu().unwrap().to_vec_f32().unwrap(), &[1.0, std::f32::consts::E], 1e-5);
}

#[test]
fn test_cuda_lgamma_or_compile_error() {
    // Either the toolchain knows this GPU, or the failure is a compile error.
    let table = DispatchTable::new();
    let x = Tensor::from_f32(&[0.5, 1.0, 2.0], &[3]).cuda(0).unwrap();
    match table.call_unary(UnaryOp::Lgamma, &x) {
        Ok(y) => assert_close(&y.cpu().unwrap().to_vec_f32().unwrap(), &[0.5724, 0.0, 0.0], 1e-4),
        Err(e) => assert!(matches!(e, ShuntError::KernelCompile { .. }), "unexpected: {e}"),
    }
}
