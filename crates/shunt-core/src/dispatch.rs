//! Per-op dispatch override table.
//!
//! Every unary op call goes through a [`DispatchTable`]. With nothing
//! registered, the op runs its base computation ([`Next::run`]). A
//! [`UnaryOverride`] registered for an op intercepts every call to it, from
//! every call site, and decides whether and how to invoke the base
//! computation.
//!
//! Registration returns an [`OverrideHandle`]; dropping the handle removes
//! the override, [`OverrideHandle::persist`] keeps it for the life of the
//! table.
//!
//! Tables are resolved per call: a table entered on the current thread with
//! [`DispatchTable::enter`] takes precedence over the process-wide
//! [`global`] table.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::ops::unary::base_unary;
use crate::{Result, ShuntError, Tensor, UnaryOp};

/// A wrapper around one unary op.
///
/// Implementations receive the input and a [`Next`] continuation that runs
/// the op's base computation. They must return a tensor of the input's
/// shape and dtype.
pub trait UnaryOverride: Send + Sync {
    /// Name reported by [`DispatchTable::override_name`] and in conflicts.
    fn name(&self) -> &str;

    fn call(&self, input: &Tensor, next: Next) -> Result<Tensor>;
}

/// Continuation to the base computation of one op.
#[derive(Debug, Clone, Copy)]
pub struct Next {
    op: UnaryOp,
}

impl Next {
    pub fn op(&self) -> UnaryOp {
        self.op
    }

    /// Run the base computation on `input`, on whatever device it lives.
    pub fn run(&self, input: &Tensor) -> Result<Tensor> {
        base_unary(self.op, input)
    }
}

struct Slot {
    id: u64,
    handler: Arc<dyn UnaryOverride>,
}

#[derive(Default)]
struct TableInner {
    slots: RwLock<HashMap<UnaryOp, Slot>>,
    next_id: AtomicU64,
}

/// Override table; cloning yields another handle to the same table.
#[derive(Clone, Default)]
pub struct DispatchTable {
    inner: Arc<TableInner>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `op`.
    ///
    /// Fails with [`ShuntError::OverrideConflict`] if `op` already has an
    /// override.
    pub fn register(&self, op: UnaryOp, handler: Arc<dyn UnaryOverride>) -> Result<OverrideHandle> {
        let mut slots = self.inner.slots.write();
        if let Some(existing) = slots.get(&op) {
            return Err(ShuntError::OverrideConflict {
                op,
                existing: existing.handler.name().to_string(),
            });
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("registered override '{}' for {}", handler.name(), op);
        slots.insert(op, Slot { id, handler });
        Ok(OverrideHandle {
            table: self.clone(),
            op,
            id,
            persistent: false,
        })
    }

    /// Name of the override registered for `op`, if any.
    pub fn override_name(&self, op: UnaryOp) -> Option<String> {
        self.inner
            .slots
            .read()
            .get(&op)
            .map(|slot| slot.handler.name().to_string())
    }

    pub fn is_overridden(&self, op: UnaryOp) -> bool {
        self.inner.slots.read().contains_key(&op)
    }

    /// All registered overrides as `(op, name)`, ordered by op.
    pub fn registered(&self) -> Vec<(UnaryOp, String)> {
        let slots = self.inner.slots.read();
        let mut list: Vec<_> = slots
            .iter()
            .map(|(op, slot)| (*op, slot.handler.name().to_string()))
            .collect();
        list.sort_by_key(|(op, _)| *op);
        list
    }

    /// Run `op` on `input` through this table.
    pub fn call_unary(&self, op: UnaryOp, input: &Tensor) -> Result<Tensor> {
        let next = Next { op };
        // Clone the handler out so no lock is held while it runs.
        let handler = self
            .inner
            .slots
            .read()
            .get(&op)
            .map(|slot| Arc::clone(&slot.handler));
        match handler {
            Some(h) => h.call(input, next),
            None => next.run(input),
        }
    }

    /// Make this table current for the calling thread until the guard drops.
    ///
    /// Guards may be dropped in any order; each removes only its own entry.
    pub fn enter(&self) -> ScopeGuard {
        let id = NEXT_SCOPE.fetch_add(1, Ordering::Relaxed);
        SCOPED.with(|s| s.borrow_mut().push((id, self.clone())));
        ScopeGuard {
            id,
            _not_send: PhantomData,
        }
    }

    fn unregister(&self, op: UnaryOp, id: u64) -> bool {
        let mut slots = self.inner.slots.write();
        match slots.get(&op) {
            Some(slot) if slot.id == id => {
                slots.remove(&op);
                tracing::debug!("unregistered override for {}", op);
                true
            }
            _ => false,
        }
    }

    /// Whether both handles refer to the same table.
    pub fn same_table(&self, other: &DispatchTable) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("overrides", &self.registered())
            .finish()
    }
}

/// Keeps an override registered. Dropping it unregisters the override.
#[must_use = "dropping the handle unregisters the override immediately"]
pub struct OverrideHandle {
    table: DispatchTable,
    op: UnaryOp,
    id: u64,
    persistent: bool,
}

impl OverrideHandle {
    pub fn op(&self) -> UnaryOp {
        self.op
    }

    /// Keep the override registered for the life of the table.
    pub fn persist(mut self) {
        self.persistent = true;
    }

    /// Unregister now.
    pub fn unregister(self) {}
}

impl Drop for OverrideHandle {
    fn drop(&mut self) {
        if !self.persistent {
            self.table.unregister(self.op, self.id);
        }
    }
}

impl fmt::Debug for OverrideHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverrideHandle")
            .field("op", &self.op)
            .field("persistent", &self.persistent)
            .finish()
    }
}

static NEXT_SCOPE: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static SCOPED: RefCell<Vec<(u64, DispatchTable)>> = const { RefCell::new(Vec::new()) };
}

/// Leaves the table it entered when dropped.
pub struct ScopeGuard {
    id: u64,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPED.with(|s| {
            let mut stack = s.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|(id, _)| *id == self.id) {
                stack.remove(pos);
            }
        });
    }
}

static GLOBAL: OnceLock<DispatchTable> = OnceLock::new();

/// The process-wide table.
pub fn global() -> &'static DispatchTable {
    GLOBAL.get_or_init(DispatchTable::new)
}

/// The table ops dispatch through on this thread.
pub fn current() -> DispatchTable {
    SCOPED
        .with(|s| s.borrow().last().map(|(_, table)| table.clone()))
        .unwrap_or_else(|| global().clone())
}
