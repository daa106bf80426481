//! Tagged error type for the MDOS filesystem core.
//!
//! The reference C library reports failures as small negative integers
//! (`MDOS_ENOENT`, `MDOS_EBADF`, ...). This core keeps that numbering as a
//! stable ABI surface (`MdosError::code`) but represents errors internally
//! as a proper enum rather than bare ints.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MdosError {
    /// File not found.
    NotFound,
    /// No space left (directory full or CAT exhausted).
    NoSpace,
    /// Too many open files on this mount.
    TooManyOpen,
    /// Invalid or stale file descriptor.
    BadFd,
    /// Invalid argument (bad filename, negative seek, ...).
    Invalid,
    /// Backing-file I/O failure.
    Io,
    /// File already exists.
    Exists,
    /// Operation not permitted (write to a read-only mount).
    Permission,
    /// Operation is not implemented by this core (e.g. in-place `write`).
    NotImplemented,
    /// Conversion source had no data to convert (e.g. an all-zero DSK image).
    Empty,
}

impl MdosError {
    /// The stable negative error code from the external ABI (spec §6).
    ///
    /// `NotImplemented` and `Empty` have no counterpart in the spec's
    /// eight-value stable table (they're tagged-only distinctions the
    /// two-value reference ABI couldn't express); they're assigned codes
    /// past the end of that table rather than collapsed onto an existing one.
    pub fn code(self) -> i32 {
        match self {
            MdosError::NotFound => -1,
            MdosError::NoSpace => -2,
            MdosError::TooManyOpen => -3,
            MdosError::BadFd => -4,
            MdosError::Invalid => -5,
            MdosError::Io => -6,
            MdosError::Exists => -7,
            MdosError::Permission => -8,
            MdosError::NotImplemented => -9,
            MdosError::Empty => -10,
        }
    }
}

impl fmt::Display for MdosError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            MdosError::NotFound => "file not found",
            MdosError::NoSpace => "no space left on device",
            MdosError::TooManyOpen => "too many open files",
            MdosError::BadFd => "bad file descriptor",
            MdosError::Invalid => "invalid argument",
            MdosError::Io => "I/O error",
            MdosError::Exists => "file exists",
            MdosError::Permission => "operation not permitted",
            MdosError::NotImplemented => "operation not implemented",
            MdosError::Empty => "no data to convert",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for MdosError {}

impl From<std::io::Error> for MdosError {
    fn from(_: std::io::Error) -> Self {
        MdosError::Io
    }
}

pub type Result<T> = std::result::Result<T, MdosError>;
