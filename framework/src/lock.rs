use std::ops::{Deref, DerefMut};
use std::time::Duration;

use thiserror::Error;

/// How long a [`NamedMutex`] waits by default before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("timed out after {timeout:?} waiting for lock `{name}`")]
pub struct LockTimeout {
    pub name: &'static str,
    pub timeout: Duration,
}

/// A mutex with a name and a bounded wait. Acquisition fails with [`LockTimeout`] instead of
/// blocking forever.
pub struct NamedMutex<T> {
    name: &'static str,
    timeout: Duration,
    inner: parking_lot::Mutex<T>,
}

impl<T> NamedMutex<T> {
    pub fn new(name: &'static str, value: T) -> Self {
        Self::with_timeout(name, DEFAULT_LOCK_TIMEOUT, value)
    }

    pub fn with_timeout(name: &'static str, timeout: Duration, value: T) -> Self {
        Self {
            name,
            timeout,
            inner: parking_lot::Mutex::new(value),
        }
    }

    /// Acquire with the default bound for this mutex.
    pub fn lock(&self) -> Result<ScopedMutexGuard<'_, T>, LockTimeout> {
        self.lock_within(self.timeout)
    }

    pub fn lock_within(&self, timeout: Duration) -> Result<ScopedMutexGuard<'_, T>, LockTimeout> {
        match self.inner.try_lock_for(timeout) {
            Some(guard) => {
                log::trace!("acquired lock `{}`", self.name);
                Ok(ScopedMutexGuard {
                    name: self.name,
                    guard,
                })
            }
            None => {
                log::debug!("gave up on lock `{}` after {timeout:?}", self.name);
                Err(LockTimeout {
                    name: self.name,
                    timeout,
                })
            }
        }
    }

    /// Exclusive access without locking; only possible when nobody else can hold a guard.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

/// Releases its lock when dropped, on every exit path.
pub struct ScopedMutexGuard<'a, T> {
    name: &'static str,
    guard: parking_lot::MutexGuard<'a, T>,
}

impl<T> Deref for ScopedMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for ScopedMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for ScopedMutexGuard<'_, T> {
    fn drop(&mut self) {
        log::trace!("released lock `{}`", self.name);
    }
}
