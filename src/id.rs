use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counter for module identities. Starts at 1 so that a zero
/// value never names a live module.
static NEXT_MODULE_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of one module instance.
///
/// Minted once when the instance is built and never reused, so two clones of
/// the same definition never compare equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ModuleId(u64);

impl ModuleId {
    pub(crate) fn next() -> Self {
        ModuleId(NEXT_MODULE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleId({})", self.0)
    }
}

/// Unique handle for a mutation subscription, returned by
/// [`MemoryStore::subscribe`](crate::memory::MemoryStore::subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);
