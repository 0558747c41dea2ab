//! The host-fallback override.

use std::sync::atomic::{AtomicU64, Ordering};

use shunt_core::{Next, Result, Tensor, UnaryOverride};

/// Counters of how calls were routed.
#[derive(Debug, Default)]
pub struct FallbackStats {
    redirected: AtomicU64,
    passthrough: AtomicU64,
}

impl FallbackStats {
    /// Calls whose input was on an accelerator and ran on the host.
    pub fn redirected(&self) -> u64 {
        self.redirected.load(Ordering::Relaxed)
    }

    /// Calls whose input was already on the host.
    pub fn passthrough(&self) -> u64 {
        self.passthrough.load(Ordering::Relaxed)
    }
}

/// Computes an op on the host and returns the result to the input's device.
///
/// Errors from either transfer or from the op itself are returned as they
/// are; nothing is retried.
#[derive(Debug, Default)]
pub struct HostFallback {
    stats: FallbackStats,
}

impl HostFallback {
    pub const NAME: &'static str = "host-fallback";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &FallbackStats {
        &self.stats
    }
}

impl UnaryOverride for HostFallback {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn call(&self, input: &Tensor, next: Next) -> Result<Tensor> {
        if input.is_cpu() {
            self.stats.passthrough.fetch_add(1, Ordering::Relaxed);
            return next.run(input);
        }

        let placement = input.placement();
        tracing::debug!(
            "{} on {}: computing {} elements on the host",
            next.op(),
            placement.device(),
            input.numel()
        );
        let host = input.to_host()?;
        let out = next.run(&host)?;
        let restored = out.to_placement(&placement)?;
        self.stats.redirected.fetch_add(1, Ordering::Relaxed);
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shunt_core::{DispatchTable, UnaryOp};
    use std::sync::Arc;

    #[test]
    fn test_host_input_passes_through() {
        let fallback = Arc::new(HostFallback::new());
        let table = DispatchTable::new();
        let _h = table.register(UnaryOp::Lgamma, fallback.clone()).unwrap();

        let x = Tensor::from_f32(&[3.0], &[1]);
        let y = table.call_unary(UnaryOp::Lgamma, &x).unwrap();
        assert!(y.is_cpu());
        assert!((y.to_vec_f32().unwrap()[0] - 2.0f32.ln()).abs() < 1e-6);
        assert_eq!(fallback.stats().passthrough(), 1);
        assert_eq!(fallback.stats().redirected(), 0);
    }

    #[test]
    fn test_name() {
        assert_eq!(HostFallback::new().name(), "host-fallback");
    }
}
