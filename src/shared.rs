//! Mutex-guarded handle for books and caches shared between the receive
//! task and readers.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Cloneable handle to a value behind one instance-scoped mutex.
///
/// The value is only reachable inside the closures passed to [`read`]
/// and [`write`], so no reference escapes the guarded scope.
///
/// [`read`]: Shared::read
/// [`write`]: Shared::write
pub struct Shared<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(value)),
        }
    }

    /// Run `f` with shared access to the value
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.lock())
    }

    /// Run `f` with exclusive access to the value
    pub fn write<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Whether two handles point at the same value
    pub fn same(&self, other: &Shared<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone> Shared<T> {
    /// Consistent copy of the value taken under the lock
    pub fn snapshot(&self) -> T {
        self.inner.lock().clone()
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Default> Default for Shared<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shared").field(&*self.inner.lock()).finish()
    }
}
