//! RwLock implementations.

use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicUsize, Ordering},
};
use crossbeam_utils::Backoff;

/// A reader-writer lock.
///
/// This type of lock allows a number of readers or at most one writer at
/// any point in time. The write portion of this lock typically allows
/// modification of the underlying data (exclusive access) and the read
/// portion of this lock typically allows for read-only access (shared
/// access).
///
/// In comparison, a [`SpinLock`] does not distinguish between readers or
/// writers that acquire the lock, therefore blocking any threads waiting
/// for the lock to become available. An `RwLock` will allow any number of
/// readers to acquire the lock as long as a writer is not holding the lock.
///
/// The guards returned from the locking methods are RAII: shared or
/// exclusive access is released when the guard is dropped.
///
/// [`SpinLock`]: super::SpinLock
pub struct RwLock<T>
where
    T: ?Sized + Send,
{
    // Upper bit: a writer holds the lock. Lower bits: reader count.
    state: AtomicUsize,
    data: UnsafeCell<T>,
}

const STATE_WRITER_LOCKED: usize = 0b1 << (usize::BITS - 2);

unsafe impl<T> Sync for RwLock<T> where T: ?Sized + Send {}
unsafe impl<T> Send for RwLock<T> where T: ?Sized + Send {}

impl<T> RwLock<T>
where
    T: Send,
{
    /// Creates a new instance of an `RwLock<T>` which is unlocked.
    pub const fn new(data: T) -> RwLock<T> {
        RwLock {
            state: AtomicUsize::new(0),
            data: UnsafeCell::new(data),
        }
    }

    /// Locks this rwlock with shared read access, blocking the current
    /// thread until it can be acquired.
    ///
    /// Returns an RAII guard which will release this thread's shared access
    /// once it is dropped.
    #[inline]
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        let backoff = Backoff::new();
        loop {
            let prev = self.state.load(Ordering::Relaxed);
            if prev & STATE_WRITER_LOCKED != 0 {
                backoff.snooze();
            } else if self
                .state
                .compare_exchange(prev, prev + 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                break RwLockReadGuard {
                    lock: self,
                    data: unsafe { &*self.data.get() },
                };
            }
        }
    }

    /// Locks this rwlock with exclusive write access, blocking the current
    /// thread until it can be acquired.
    ///
    /// This function will not return while other writers or other readers
    /// currently have access to the lock.
    ///
    /// Returns an RAII guard which will drop the write access of this
    /// rwlock when dropped.
    #[inline]
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        let backoff = Backoff::new();
        loop {
            if self.state.load(Ordering::Relaxed) != 0 {
                backoff.snooze();
            } else if self
                .state
                .compare_exchange(0, STATE_WRITER_LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                break RwLockWriteGuard {
                    lock: self,
                    data: unsafe { &mut *self.data.get() },
                };
            }
        }
    }

    /// Consumes this RwLock, returning the underlying data.
    #[inline]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

/// RAII structure used to release the shared read access of a lock when
/// dropped.
pub struct RwLockReadGuard<'a, T>
where
    T: ?Sized + Send,
    T: 'a,
{
    lock: &'a RwLock<T>,
    data: &'a T,
}

/// RAII structure used to release the exclusive write access of a lock when
/// dropped.
pub struct RwLockWriteGuard<'a, T>
where
    T: ?Sized + Send,
    T: 'a,
{
    lock: &'a RwLock<T>,
    data: &'a mut T,
}

impl<T> Deref for RwLockReadGuard<'_, T>
where
    T: ?Sized + Send,
{
    type Target = T;
    fn deref(&self) -> &T {
        self.data
    }
}

impl<T> Deref for RwLockWriteGuard<'_, T>
where
    T: ?Sized + Send,
{
    type Target = T;
    fn deref(&self) -> &T {
        &*self.data
    }
}

impl<T> DerefMut for RwLockWriteGuard<'_, T>
where
    T: ?Sized + Send,
{
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.data
    }
}

impl<T> Drop for RwLockReadGuard<'_, T>
where
    T: ?Sized + Send,
{
    fn drop(&mut self) {
        debug_assert_eq!(self.lock.state.load(Ordering::Acquire) & STATE_WRITER_LOCKED, 0);
        self.lock.state.fetch_sub(1, Ordering::Release);
    }
}

impl<T> Drop for RwLockWriteGuard<'_, T>
where
    T: ?Sized + Send,
{
    fn drop(&mut self) {
        debug_assert_eq!(
            self.lock.state.load(Ordering::Acquire) & STATE_WRITER_LOCKED,
            STATE_WRITER_LOCKED
        );
        self.lock
            .state
            .fetch_and(!STATE_WRITER_LOCKED, Ordering::Release);
    }
}

impl<T: Send> core::fmt::Debug for RwLock<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("RwLock")
            .field("state", &self.state.load(Ordering::SeqCst))
            .finish()
    }
}
