//! SMP-supported spinlock.
//!
//! To acquire a lock on a multiprocessor, a processor 1) polls a variable
//! that represents whether the value is locked or not, 2) sets the variable
//! when a thread holds the `lock`, and 3) unsets the variable when the
//! thread `unlock`s. Steps 1 and 2 must be executed ATOMICALLY with the
//! atomic read-modify-write instructions of the CPU.

use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};
use crossbeam_utils::Backoff;

/// The lock could not be acquired at this time because the operation would
/// otherwise block.
pub struct WouldBlock;

/// A mutual exclusion primitive useful for protecting shared data.
///
/// This spinlock will block threads waiting for the lock to become
/// available. The spinlock can be created via a [`new`] constructor. Each
/// spinlock has a type parameter which represents the data that it is
/// protecting. The data can only be accessed through the guards returned
/// from [`lock`] and [`try_lock`], which guarantees that the data is only
/// ever accessed when the spinlock is locked.
///
/// The guard does **not** release the lock on drop; it must be released
/// explicitly with [`SpinLockGuard::unlock`], and dropping a live guard
/// panics. This keeps every critical section visible in the source.
///
/// [`new`]: Self::new
/// [`lock`]: Self::lock
/// [`try_lock`]: Self::try_lock
pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    _pad: [u8; 15],
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new spinlock in an unlocked state ready for use.
    #[inline]
    pub const fn new(t: T) -> SpinLock<T> {
        SpinLock {
            locked: AtomicBool::new(false),
            _pad: [0u8; 15],
            data: UnsafeCell::new(t),
        }
    }

    /// Consumes this spinlock, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquires the spinlock, blocking the current thread until it is able
    /// to do so.
    ///
    /// Upon returning, the thread is the only thread with the lock held. A
    /// guard is returned to allow scoped access to the data. When the guard
    /// goes out of scope without [`SpinLockGuard::unlock`], a panic occurs.
    #[track_caller]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let backoff = Backoff::new();
        while self.locked.fetch_or(true, Ordering::Acquire) {
            backoff.snooze();
        }
        SpinLockGuard {
            caller: core::panic::Location::caller(),
            lock: self,
        }
    }

    /// Attempts to acquire this lock.
    ///
    /// If the lock could not be acquired because it is already held, this
    /// call returns the [`WouldBlock`] error. This function does not block.
    #[track_caller]
    pub fn try_lock(&self) -> Result<SpinLockGuard<'_, T>, WouldBlock> {
        if !self.locked.fetch_or(true, Ordering::Acquire) {
            Ok(SpinLockGuard {
                caller: core::panic::Location::caller(),
                lock: self,
            })
        } else {
            Err(WouldBlock)
        }
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> SpinLock<T> {
        SpinLock::new(Default::default())
    }
}

/// An implementation of a "scoped lock" of a spinlock. When this structure
/// is dropped (falls out of scope) without unlock, a panic occurs.
///
/// The lock must be explicitly released with the [`unlock`] method.
///
/// [`unlock`]: Self::unlock
pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    caller: &'static core::panic::Location<'static>,
    lock: &'a SpinLock<T>,
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> SpinLockGuard<'_, T> {
    /// Releases the underlying [`SpinLock`].
    ///
    /// As the guard does **not** automatically release the lock on drop,
    /// the caller must explicitly invoke [`unlock`] to mark the lock as
    /// available again.
    ///
    /// [`unlock`]: Self::unlock
    pub fn unlock(self) {
        self.lock.locked.store(false, Ordering::Release);
        core::mem::forget(self);
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        panic!(
            "`.unlock()` must be explicitly called before dropping SpinLockGuard.
The lock is held at {:?}.",
            self.caller
        );
    }
}

#[cfg(test)]
mod tests {
    use super::SpinLock;
    use alloc::sync::Arc;

    #[test]
    fn lock_guards_data() {
        let lock = SpinLock::new(0usize);
        let mut guard = lock.lock();
        *guard += 10;
        guard.unlock();
        let guard = lock.lock();
        assert_eq!(*guard, 10);
        guard.unlock();
    }

    #[test]
    fn try_lock_contended() {
        let lock = SpinLock::new(());
        let held = lock.lock();
        assert!(lock.try_lock().is_err());
        held.unlock();
        lock.try_lock().map_err(|_| ()).unwrap().unlock();
    }

    #[test]
    fn concurrent_increments() {
        const N: usize = 8;
        let data = Arc::new(SpinLock::new(0usize));
        let mut handles = alloc::vec::Vec::new();
        for _ in 0..N {
            let data = Arc::clone(&data);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    let mut guard = data.lock();
                    *guard += 1;
                    guard.unlock();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let guard = data.lock();
        assert_eq!(*guard, N * 1000);
        guard.unlock();
    }
}
