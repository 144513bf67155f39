//! DynamicConfig handles for live-updatable settings.
//!
//! The limiter and quota tracker read their [`GuardConfig`](crate::GuardConfig)
//! through this handle on every call, so operators can flip the failure policy
//! or cooldown without rebuilding anything.
//!
//! Default uses `ArcSwap` for lock-free reads; feature `adaptive-rwlock` can
//! switch to RwLock if desired.

use std::sync::Arc;

#[cfg(feature = "adaptive-rwlock")]
use std::sync::RwLock;

#[cfg(not(feature = "adaptive-rwlock"))]
use arc_swap::ArcSwap;

/// `DynamicConfig<T>` gives cheap reads and controlled updates for shared config.
#[derive(Debug)]
pub struct DynamicConfig<T> {
    #[cfg(not(feature = "adaptive-rwlock"))]
    inner: Arc<ArcSwap<T>>,
    #[cfg(feature = "adaptive-rwlock")]
    inner: Arc<RwLock<T>>,
}

impl<T> Clone for DynamicConfig<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> DynamicConfig<T> {
    /// Create a new `DynamicConfig` with the given initial value.
    pub fn new(value: T) -> Self {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            Self { inner: Arc::new(ArcSwap::from_pointee(value)) }
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            Self { inner: Arc::new(RwLock::new(value)) }
        }
    }

    /// Snapshot the current value.
    #[cfg(not(feature = "adaptive-rwlock"))]
    pub fn get(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Snapshot the current value (Clone under RwLock backend).
    #[cfg(feature = "adaptive-rwlock")]
    pub fn get(&self) -> Arc<T>
    where
        T: Clone,
    {
        Arc::new(self.inner.read().expect("dynamic config poisoned").clone())
    }

    /// Replace the value entirely.
    pub fn set(&self, value: T) {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            self.inner.store(Arc::new(value));
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            *self.inner.write().expect("dynamic config poisoned") = value;
        }
    }

    /// Update via closure.
    ///
    /// Concurrent updates never overwrite each other: under `ArcSwap` the
    /// closure is re-run against the newer value when another writer won.
    pub fn update<F>(&self, mut f: F)
    where
        F: FnMut(&T) -> T,
        T: Clone,
    {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            self.inner.rcu(|cur| f(cur));
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            let mut guard = self.inner.write().expect("dynamic config poisoned");
            let new_val = f(&guard);
            *guard = new_val;
        }
    }

    /// Update via a fallible closure. An error leaves the value untouched.
    pub fn try_update<F, E>(&self, mut f: F) -> Result<(), E>
    where
        F: FnMut(&T) -> Result<T, E>,
    {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            let mut cur = self.inner.load_full();
            loop {
                let new_val = Arc::new(f(&cur)?);
                let prev = self.inner.compare_and_swap(&cur, new_val);
                if Arc::ptr_eq(&*prev, &cur) {
                    return Ok(());
                }
                cur = arc_swap::Guard::into_inner(prev);
            }
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            let mut guard = self.inner.write().expect("dynamic config poisoned");
            let new_val = f(&guard)?;
            *guard = new_val;
            Ok(())
        }
    }
}
