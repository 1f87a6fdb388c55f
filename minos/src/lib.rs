//! # MinOS: a Minimal Instructional Operating System
//!
//! This crate is the framework half of MinOS: the pieces of the kernel that
//! the storage and memory core builds on but does not own. It provides the
//! kernel-wide error type, address arithmetic, synchronization primitives,
//! console output, the block-device abstraction, the physical-frame
//! allocator, and the page-directory model, along with the file-system
//! traits that let the virtual-memory core consume files without knowing
//! which file system implements them.
//!
//! The two subsystem crates sit on top:
//!
//! - `minos-fs`: buffer cache, inodes, directories, and the path-resolving
//!   file-system façade.
//! - `minos-vm`: swap, frame table, supplementary page tables, and the
//!   page-fault resolver.

#![cfg_attr(not(test), no_std)]
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

extern crate alloc;

#[macro_use]
pub mod kprint;

pub mod addressing;
pub mod dev;
pub mod fs;
pub mod mm;
pub mod sync;
pub mod util;

/// Enum representing errors that can occur during a kernel operation.
///
/// Each variant corresponds to a specific type of error that might occur
/// while servicing a request from a user program. These errors can be
/// returned to the user program to indicate the nature of the failure.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum KernelError {
    /// No such file or directory. (ENOENT)
    NotFound,
    /// File or directory already exists. (EEXIST)
    AlreadyExists,
    /// A non-final path component is not a directory. (ENOTDIR)
    NotDirectory,
    /// No space left on the disk or the swap device. (ENOSPC)
    NoSpace,
    /// Out of physical memory. (ENOMEM)
    OutOfMemory,
    /// Invalid argument. (EINVAL)
    InvalidArgument,
    /// Writes to the file are currently denied. (EACCES)
    PermissionDenied,
    /// Bad file descriptor. (EBADF)
    BadFileDescriptor,
    /// A user memory access that must terminate the process. (EFAULT)
    UserFault,
}

impl KernelError {
    /// Converts the [`KernelError`] into the corresponding negative errno
    /// code, for use as a system-call return value.
    pub fn into_isize(self) -> isize {
        match self {
            KernelError::NotFound => -2,
            KernelError::BadFileDescriptor => -9,
            KernelError::OutOfMemory => -12,
            KernelError::PermissionDenied => -13,
            KernelError::UserFault => -14,
            KernelError::AlreadyExists => -17,
            KernelError::NotDirectory => -20,
            KernelError::InvalidArgument => -22,
            KernelError::NoSpace => -28,
        }
    }
}

/// The given `isize` does not indicate a [`KernelError`].
#[derive(Debug, Eq, PartialEq)]
pub struct TryFromError {
    e: isize,
}

impl TryFrom<isize> for KernelError {
    type Error = TryFromError;

    fn try_from(value: isize) -> Result<Self, Self::Error> {
        match value {
            -2 => Ok(Self::NotFound),
            -9 => Ok(Self::BadFileDescriptor),
            -12 => Ok(Self::OutOfMemory),
            -13 => Ok(Self::PermissionDenied),
            -14 => Ok(Self::UserFault),
            -17 => Ok(Self::AlreadyExists),
            -20 => Ok(Self::NotDirectory),
            -22 => Ok(Self::InvalidArgument),
            -28 => Ok(Self::NoSpace),
            e => Err(TryFromError { e }),
        }
    }
}
