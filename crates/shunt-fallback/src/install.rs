//! Registering [`HostFallback`] in a dispatch table.

use std::sync::Arc;

use shunt_core::dispatch::{self, DispatchTable, OverrideHandle};
use shunt_core::UnaryOp;

use crate::{FallbackConfig, HostFallback, Result};

/// A fallback registered in a table.
///
/// Dropping it (or calling [`Installation::uninstall`]) unregisters every op
/// it registered. [`Installation::persist`] keeps them for the life of the
/// table.
#[derive(Debug)]
pub struct Installation {
    fallback: Arc<HostFallback>,
    handles: Vec<OverrideHandle>,
    ops: Vec<UnaryOp>,
}

impl Installation {
    pub fn fallback(&self) -> &Arc<HostFallback> {
        &self.fallback
    }

    /// Ops routed through the fallback, including ones that were already
    /// routed by an earlier installation.
    pub fn ops(&self) -> &[UnaryOp] {
        &self.ops
    }

    /// Ops this installation registered itself.
    pub fn registered_ops(&self) -> Vec<UnaryOp> {
        self.handles.iter().map(|h| h.op()).collect()
    }

    pub fn persist(self) -> Arc<HostFallback> {
        for handle in self.handles {
            handle.persist();
        }
        self.fallback
    }

    pub fn uninstall(self) {}
}

/// Register a [`HostFallback`] in `table` for every op in `config`.
///
/// Ops that already have a host fallback are left as they are. If an op
/// has a different override, nothing is registered and the conflict is
/// returned.
pub fn install(table: &DispatchTable, config: &FallbackConfig) -> Result<Installation> {
    config.validate()?;
    let fallback = Arc::new(HostFallback::new());
    let ops = config.unique_ops();
    let mut handles = Vec::with_capacity(ops.len());

    for &op in &ops {
        match table.override_name(op).as_deref() {
            Some(HostFallback::NAME) => {
                tracing::debug!("{} already routed through {}", op, HostFallback::NAME);
            }
            // On conflict the handles collected so far drop and unregister.
            _ => handles.push(table.register(op, fallback.clone())?),
        }
    }

    Ok(Installation {
        fallback,
        handles,
        ops,
    })
}

/// Register a [`HostFallback`] in the process-wide table for the rest of
/// the process.
///
/// Installing again is a no-op for ops that are already routed. On success
/// a single diagnostic line is printed to stdout when `config.announce` is
/// set.
pub fn install_global(config: &FallbackConfig) -> Result<Arc<HostFallback>> {
    let installation = install(dispatch::global(), config)?;
    tracing::info!("host fallback active for {}", op_list(installation.ops()));
    if let Some(line) = announcement(config, installation.ops()) {
        println!("{line}");
    }
    Ok(installation.persist())
}

fn op_list(ops: &[UnaryOp]) -> String {
    ops.iter().map(|op| op.name()).collect::<Vec<_>>().join(", ")
}

/// The stdout line for a global installation, if `config` asks for one.
fn announcement(config: &FallbackConfig, ops: &[UnaryOp]) -> Option<String> {
    config
        .announce
        .then(|| format!("[shunt] host fallback active for {}", op_list(ops)))
}
