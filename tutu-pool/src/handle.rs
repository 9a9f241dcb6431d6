//! Scoped borrow of a pool entry.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tutu_types::ModelBackend;

/// Borrow token for one pool entry.
///
/// Holding a handle keeps the entry's reference count above zero, which
/// blocks eviction and reaping. The count is released exactly once: on
/// explicit [`release`](PoolHandle::release) or on drop, whichever comes
/// first. The refcount is atomic, so release never takes the pool lock;
/// a handle can be dropped from inside a response stream without
/// deadlocking a concurrent `acquire`.
#[derive(Debug)]
pub struct PoolHandle {
    backend: Arc<dyn ModelBackend>,
    refs: Arc<AtomicUsize>,
    released: AtomicBool,
}

impl PoolHandle {
    pub(crate) fn new(backend: Arc<dyn ModelBackend>, refs: Arc<AtomicUsize>) -> Self {
        Self {
            backend,
            refs,
            released: AtomicBool::new(false),
        }
    }

    /// The backend this handle borrows.
    pub fn backend(&self) -> &Arc<dyn ModelBackend> {
        &self.backend
    }

    /// Decrement the entry's reference count. Idempotent.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.refs.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Deref for PoolHandle {
    type Target = dyn ModelBackend;

    fn deref(&self) -> &Self::Target {
        self.backend.as_ref()
    }
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        self.release();
    }
}
