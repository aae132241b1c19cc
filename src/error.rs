//! Error taxonomy for the storage engine.
//!
//! Every fallible operation in this crate returns [`Result<T>`], a thin
//! alias over [`std::result::Result`] with [`Error`] as the error type.
//! [`Error::to_errno`] performs the negated-POSIX-number conversion at the
//! one seam where that matters: the kernel filesystem bridge that consumes
//! this crate. Nothing inside the engine itself deals in raw `errno` values.

use thiserror::Error as ThisError;

/// A single taxonomy of things that can go wrong while operating on the
/// filesystem image. Mirrors `spec.md` §7 one-to-one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum Error {
    /// A path component or directory entry does not exist. (`ENOENT`)
    #[error("no such file or directory")]
    NotFound,
    /// A path component that must be a directory isn't one. (`ENOTDIR`)
    #[error("not a directory")]
    NotDir,
    /// A regular-file operation was attempted on a directory. (`EISDIR`)
    #[error("is a directory")]
    NotRegular,
    /// The target name already exists in the parent directory. (`EEXIST`)
    #[error("file exists")]
    Exists,
    /// The block or inode allocator is exhausted. (`ENOSPC`)
    #[error("no space left on device")]
    NoSpace,
    /// The requested offset is past the maximum addressable file size. (`EFBIG`)
    #[error("file too large")]
    FileTooLarge,
    /// `rmdir` was attempted on a directory with more than `.`/`..`. (`ENOTEMPTY`)
    #[error("directory not empty")]
    NotEmpty,
    /// An inode or block id was out of the valid range for its table. (`EIO`)
    #[error("bad inode or block id")]
    BadId,
    /// The underlying [`crate::storage::Storage`] rejected an id. (`EIO`)
    #[error("storage access out of range")]
    IoRange,
    /// A directory or free-list block's on-disk bytes did not decode
    /// cleanly. Not part of `spec.md`'s taxonomy proper, but the engine
    /// needs a distinct way to report corruption rather than silently
    /// misinterpreting garbage as valid structure.
    #[error("on-disk structure is corrupted: {0}")]
    Corrupt(&'static str),
}

/// Crate-wide result alias; every fallible function in this crate returns it.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Negated POSIX `errno` this error maps to at the kernel-bridge
    /// boundary, per `spec.md` §6/§7's result convention.
    pub fn to_errno(self) -> i32 {
        -(match self {
            Error::NotFound => libc::ENOENT,
            Error::NotDir => libc::ENOTDIR,
            Error::NotRegular => libc::EISDIR,
            Error::Exists => libc::EEXIST,
            Error::NoSpace => libc::ENOSPC,
            Error::FileTooLarge => libc::EFBIG,
            Error::NotEmpty => libc::ENOTEMPTY,
            Error::BadId => libc::EIO,
            Error::IoRange => libc::EIO,
            Error::Corrupt(_) => libc::EIO,
        })
    }
}
