//! Error taxonomy for the filesystem core.
//!
//! Mirrors the taxonomy of the host adapter contract: each variant maps
//! to one POSIX-ish failure mode a caller (FUSE bridge, shell, test)
//! needs to distinguish.

use std::io;

use thiserror::Error;

/// Errors returned by filesystem operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A path component is missing, or a path component crosses a non-directory.
    #[error("no such file or directory")]
    NotFound,
    /// The target of a create/link already resolves.
    #[error("file already exists")]
    AlreadyExists,
    /// A name is empty or exceeds `MAX_NAME_LEN` bytes.
    #[error("invalid file name")]
    InvalidName,
    /// The free-block stack and chain are both empty.
    #[error("no space left on device")]
    NoSpace,
    /// The free-inode cache cannot be refilled: the inode region is exhausted.
    #[error("no inodes left on device")]
    NoInode,
    /// A file's block count would exceed the double-indirect threshold.
    #[error("file too large")]
    FileTooLarge,
    /// The operation requires a regular file.
    #[error("not a file")]
    NotAFile,
    /// The operation requires a directory.
    #[error("not a directory")]
    NotADirectory,
    /// The underlying image read or write failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// An on-disk structure failed to decode, or violates an invariant on load.
    #[error("on-disk structure corrupted: {0}")]
    Corruption(String),
}

/// Convenience alias for results returned by the filesystem core.
pub type Result<T> = std::result::Result<T, Error>;
