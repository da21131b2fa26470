//! POSIX-style error codes returned across the syscall boundary.
//!
//! The kernel core never returns a bare `int` sentinel the way the original
//! C sources do; every fallible routine returns a `KernelResult<T>` carrying
//! one of these labels. The syscall dispatcher (`crate::syscall`) is the only
//! place that collapses an `Errno` back down to a negative integer in `rax`.

use core::fmt;

/// Error taxonomy from spec §7. Names are kept exactly as the spec labels
/// them so back-end and dispatcher code reads the same vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    /// No such file or directory.
    ENOENT,
    /// I/O error.
    EIO,
    /// Bad file descriptor.
    EBADF,
    /// Permission denied.
    EACCES,
    /// File exists.
    EEXIST,
    /// Not a directory.
    ENOTDIR,
    /// Is a directory.
    EISDIR,
    /// Too many open files.
    EMFILE,
    /// Out of memory.
    ENOMEM,
    /// Bad address.
    EFAULT,
    /// Invalid argument.
    EINVAL,
    /// Function not implemented.
    ENOSYS,
    /// Name too long.
    ENAMETOOLONG,
    /// Result too large / buffer too small.
    ERANGE,
}

impl Errno {
    /// The value placed in `rax` (as `-errno`) by the syscall dispatcher.
    pub const fn code(self) -> i64 {
        match self {
            Errno::ENOENT => 2,
            Errno::EIO => 5,
            Errno::EBADF => 9,
            Errno::EACCES => 13,
            Errno::EEXIST => 17,
            Errno::ENOTDIR => 20,
            Errno::EISDIR => 21,
            Errno::EMFILE => 24,
            Errno::ENOMEM => 12,
            Errno::EFAULT => 14,
            Errno::EINVAL => 22,
            Errno::ENOSYS => 38,
            Errno::ENAMETOOLONG => 36,
            Errno::ERANGE => 34,
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Errno::ENOENT => "no such file or directory",
            Errno::EIO => "I/O error",
            Errno::EBADF => "bad file descriptor",
            Errno::EACCES => "permission denied",
            Errno::EEXIST => "file exists",
            Errno::ENOTDIR => "not a directory",
            Errno::EISDIR => "is a directory",
            Errno::EMFILE => "too many open files",
            Errno::ENOMEM => "out of memory",
            Errno::EFAULT => "bad address",
            Errno::EINVAL => "invalid argument",
            Errno::ENOSYS => "function not implemented",
            Errno::ENAMETOOLONG => "name too long",
            Errno::ERANGE => "result too large",
        };
        write!(f, "{}", msg)
    }
}

/// Result alias used throughout the core (mm, fs, process, syscall).
pub type KernelResult<T> = Result<T, Errno>;
