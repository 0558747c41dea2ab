//! Host fallback against the emulated accelerator.
//! Run with: cargo test -p shunt-fallback --test fallback_tests

use std::sync::Arc;

use shunt_core::runtime::{DeviceRuntime, EmulatedDevice};
use shunt_core::{ops, Device, DispatchTable, ShuntError, Tensor, UnaryOp};
use shunt_fallback::{install, FallbackConfig, FallbackError};

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

fn stale(ordinal: usize) -> (Arc<EmulatedDevice>, Arc<dyn DeviceRuntime>) {
    let dev = Arc::new(EmulatedDevice::stale_nvrtc(ordinal));
    let rt: Arc<dyn DeviceRuntime> = dev.clone();
    (dev, rt)
}

fn host_values(t: &Tensor) -> Vec<f32> {
    t.to_host().unwrap().to_vec_f32().unwrap()
}

// ============================================================================
// Host inputs
// ============================================================================

#[test]
fn test_host_input_matches_direct_call() {
    let table = DispatchTable::new();
    let x = Tensor::from_f32(&[0.5, 1.5, 3.0, 7.25], &[2, 2]);
    let direct = x.lgamma().unwrap();

    let installed = install(&table, &FallbackConfig::default()).unwrap();
    let _scope = table.enter();
    let wrapped = x.lgamma().unwrap();

    assert!(wrapped.is_cpu());
    assert_eq!(wrapped.shape(), x.shape());
    assert_eq!(wrapped.to_vec_f32().unwrap(), direct.to_vec_f32().unwrap());
    assert_eq!(installed.fallback().stats().passthrough(), 1);
    assert_eq!(installed.fallback().stats().redirected(), 0);
}

// ============================================================================
// Accelerator inputs
// ============================================================================

#[test]
fn test_device_scenario() {
    let (dev, rt) = stale(0);
    let table = DispatchTable::new();
    let installed = install(&table, &FallbackConfig::default()).unwrap();
    let _scope = table.enter();

    let x = Tensor::from_f32(&[0.5, 1.0, 2.0], &[3]).to_runtime(&rt).unwrap();
    let y = x.lgamma().unwrap();

    assert_eq!(y.device(), Device::Cuda(0));
    assert_eq!(y.shape().dims(), &[3]);
    assert_close(&host_values(&y), &[0.5724, 0.0, 0.0], 1e-4);

    // one download of the input, one upload of the result, no kernel
    assert_eq!(dev.stats().launches(), 0);
    assert_eq!(dev.stats().uploads(), 2);
    assert_eq!(installed.fallback().stats().redirected(), 1);
}

#[test]
fn test_device_matches_host_computation() {
    let (_, rt) = stale(1);
    let data: Vec<f32> = (1..=40).map(|i| i as f32 * 0.37 - 4.1).collect();
    let host = Tensor::from_f32(&data, &[5, 8]);
    let expected = host.lgamma().unwrap().to_vec_f32().unwrap();

    let table = DispatchTable::new();
    let _installed = install(&table, &FallbackConfig::default()).unwrap();
    let _scope = table.enter();

    let y = host.to_runtime(&rt).unwrap().lgamma().unwrap();
    assert_eq!(y.device(), Device::Cuda(1));
    assert_eq!(y.shape().dims(), &[5, 8]);
    assert_close(&host_values(&y), &expected, 1e-5);
}

#[test]
fn test_f64_keeps_dtype() {
    let (_, rt) = stale(0);
    let table = DispatchTable::new();
    let _installed = install(&table, &FallbackConfig::default()).unwrap();
    let _scope = table.enter();

    let x = Tensor::from_f64(&[0.5, 10.0], &[2]).to_runtime(&rt).unwrap();
    let y = x.lgamma().unwrap();
    assert_eq!(y.dtype(), shunt_core::DType::F64);
    let v = y.to_host().unwrap().to_vec_f64().unwrap();
    assert!((v[0] - std::f64::consts::PI.sqrt().ln()).abs() < 1e-10);
    assert!((v[1] - 362880.0f64.ln()).abs() < 1e-9);
}

#[test]
fn test_without_fallback_kernel_compile_fails() {
    let (_, rt) = stale(0);
    let table = DispatchTable::new();
    let _scope = table.enter();

    let x = Tensor::from_f32(&[0.5, 1.0, 2.0], &[3]).to_runtime(&rt).unwrap();
    let err = x.lgamma().unwrap_err();
    match err {
        ShuntError::KernelCompile { op, arch, msg } => {
            assert_eq!(op, UnaryOp::Lgamma);
            assert_eq!(arch, "sm_89");
            assert!(msg.contains("compute_89"), "{msg}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_call_surfaces_agree() {
    let (_, rt) = stale(0);
    let table = DispatchTable::new();
    let _installed = install(&table, &FallbackConfig::default()).unwrap();
    let _scope = table.enter();

    let x = Tensor::from_f32(&[0.25, 1.5, 4.0, 9.5], &[4]).to_runtime(&rt).unwrap();
    let free = host_values(&ops::lgamma(&x).unwrap());
    let method = host_values(&x.lgamma().unwrap());
    let mut y = x.clone();
    let in_place = host_values(y.lgamma_().unwrap());

    assert_eq!(free, method);
    assert_eq!(free, in_place);
}

#[test]
fn test_in_place_writes_into_device_storage() {
    let (dev, rt) = stale(2);
    let table = DispatchTable::new();
    let _installed = install(&table, &FallbackConfig::default()).unwrap();
    let _scope = table.enter();

    let x = Tensor::from_f32(&[0.5, 1.0, 2.0], &[3]).to_runtime(&rt).unwrap();
    let expected = host_values(&x.lgamma().unwrap());

    let (downloads, uploads) = (dev.stats().downloads(), dev.stats().uploads());
    let mut y = x.clone();
    let returned = y.lgamma_().unwrap();
    assert_eq!(returned.device(), Device::Cuda(2));
    assert!(returned.shares_storage(&x));

    // input down, result up, then a device-side copy into the input buffer
    assert_eq!(dev.stats().downloads(), downloads + 1);
    assert_eq!(dev.stats().uploads(), uploads + 1);
    assert_eq!(dev.stats().copies(), 1);
    assert_eq!(dev.stats().writes(), 0);

    assert_eq!(host_values(returned), expected);
    // the alias sees the new values too
    assert_eq!(host_values(&x), expected);
}

#[test]
fn test_in_place_updates_views_on_host_and_device() {
    let (_, rt) = stale(0);
    let table = DispatchTable::new();
    let _installed = install(&table, &FallbackConfig::default()).unwrap();
    let _scope = table.enter();
    let expected = vec![0.0, 0.0, 2.0f32.ln()];

    let mut host = Tensor::from_f32(&[1.0, 2.0, 3.0], &[3]);
    let host_view = host.reshape(&[1, 3]).unwrap();
    host.lgamma_().unwrap();
    assert!(host_view.shares_storage(&host));
    assert_close(&host_values(&host_view), &expected, 1e-6);

    let mut device = Tensor::from_f32(&[1.0, 2.0, 3.0], &[3]).to_runtime(&rt).unwrap();
    let device_view = device.reshape(&[1, 3]).unwrap();
    device.lgamma_().unwrap();
    assert!(device_view.shares_storage(&device));
    assert_close(&host_values(&device_view), &expected, 1e-6);
}

#[test]
fn test_concurrent_calls_are_independent() {
    let (dev, rt) = stale(4);
    let table = DispatchTable::new();
    let installed = install(&table, &FallbackConfig::default()).unwrap();
    let inputs: Vec<Vec<f32>> = (0..8)
        .map(|t| (0..64).map(|i| 0.5 + (t * 64 + i) as f32 * 0.05).collect())
        .collect();

    std::thread::scope(|s| {
        for data in &inputs {
            let table = table.clone();
            let rt = Arc::clone(&rt);
            s.spawn(move || {
                let _scope = table.enter();
                let expected = Tensor::from_f32(data, &[64]).lgamma().unwrap();
                let x = Tensor::from_f32(data, &[64]).to_runtime(&rt).unwrap();
                for _ in 0..4 {
                    let y = x.lgamma().unwrap();
                    assert_eq!(y.device(), Device::Cuda(4));
                    assert_eq!(host_values(&y), expected.to_vec_f32().unwrap());
                }
            });
        }
    });

    assert_eq!(installed.fallback().stats().redirected(), 32);
    assert_eq!(installed.fallback().stats().passthrough(), 8);
    assert_eq!(dev.stats().launches(), 0);
}

#[test]
fn test_other_ops_keep_device_kernels() {
    let (dev, rt) = stale(0);
    let table = DispatchTable::new();
    let _installed = install(&table, &FallbackConfig::default()).unwrap();
    let _scope = table.enter();

    let x = Tensor::from_f32(&[1.0, 4.0], &[2]).to_runtime(&rt).unwrap();
    let y = x.sqrt().unwrap();
    assert_eq!(dev.stats().launches(), 1);
    assert_eq!(host_values(&y), vec![1.0, 2.0]);
}

#[test]
fn test_configured_ops_are_redirected() {
    let rt: Arc<dyn DeviceRuntime> = Arc::new(
        EmulatedDevice::new(0)
            .with_jit_failure(UnaryOp::Lgamma)
            .with_jit_failure(UnaryOp::Log),
    );
    let table = DispatchTable::new();
    let config = FallbackConfig::from_json_str(r#"{"ops": ["lgamma", "log"]}"#).unwrap();
    let _installed = install(&table, &config).unwrap();
    let _scope = table.enter();

    let x = Tensor::from_f32(&[1.0, std::f32::consts::E], &[2]).to_runtime(&rt).unwrap();
    assert_close(&host_values(&x.log().unwrap()), &[0.0, 1.0], 1e-6);
    assert!(x.lgamma().is_ok());
}

// ============================================================================
// Error propagation
// ============================================================================

#[test]
fn test_out_of_memory_on_return_propagates() {
    // room for the input but not for the result
    let rt: Arc<dyn DeviceRuntime> = Arc::new(EmulatedDevice::stale_nvrtc(0).with_capacity(20));
    let table = DispatchTable::new();
    let installed = install(&table, &FallbackConfig::default()).unwrap();
    let _scope = table.enter();

    let x = Tensor::from_f32(&[0.5, 1.0, 2.0], &[3]).to_runtime(&rt).unwrap();
    let err = x.lgamma().unwrap_err();
    assert!(matches!(
        err,
        ShuntError::OutOfMemory { device: Device::Cuda(0), requested: 12, available: 8 }
    ));
    assert_eq!(installed.fallback().stats().redirected(), 0);
}

#[test]
fn test_integer_input_rejected_on_host() {
    let (_, rt) = stale(0);
    let table = DispatchTable::new();
    let _installed = install(&table, &FallbackConfig::default()).unwrap();
    let _scope = table.enter();

    let x = Tensor::from_i32(&[1, 2], &[2]).to_runtime(&rt).unwrap();
    assert!(matches!(x.lgamma(), Err(ShuntError::UnsupportedDType(_))));
}

// ============================================================================
// Installation lifecycle
// ============================================================================

#[test]
fn test_uninstall_restores_device_kernel() {
    let (_, rt) = stale(0);
    let table = DispatchTable::new();
    let _scope = table.enter();
    let x = Tensor::from_f32(&[2.0], &[1]).to_runtime(&rt).unwrap();

    let installed = install(&table, &FallbackConfig::default()).unwrap();
    assert!(x.lgamma().is_ok());
    installed.uninstall();
    assert!(matches!(x.lgamma(), Err(ShuntError::KernelCompile { .. })));
}

#[test]
fn test_reinstall_keeps_single_wrapper() {
    let table = DispatchTable::new();
    let first = install(&table, &FallbackConfig::default()).unwrap();
    let second = install(&table, &FallbackConfig::default()).unwrap();
    assert_eq!(table.registered().len(), 1);

    let _scope = table.enter();
    let x = Tensor::from_f32(&[3.0], &[1]);
    x.lgamma().unwrap();
    // only the first installation's wrapper is in the table
    assert_eq!(first.fallback().stats().passthrough(), 1);
    assert_eq!(second.fallback().stats().passthrough(), 0);
}

#[test]
fn test_invalid_config_rejected() {
    let table = DispatchTable::new();
    let err = install(&table, &FallbackConfig::for_ops(Vec::<UnaryOp>::new())).unwrap_err();
    assert!(matches!(err, FallbackError::Config(_)));
    assert!(table.registered().is_empty());
}
