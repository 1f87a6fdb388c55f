//! Synchronization primitives.

mod rwlock;
mod spinlock;

pub use rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use spinlock::{SpinLock, SpinLockGuard, WouldBlock};
