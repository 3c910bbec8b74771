//! A UNIX V6++-style block filesystem over a single fixed-size disk
//! image file: block device, LRU block cache, on-disk codecs, a typed
//! object accessor, the superblock's free-block/free-inode allocators,
//! the tiered-indirection inode, directory blocks, and the filesystem
//! operations that stitch them together.
//!
//! See `DESIGN.md` for how each module is grounded in the teacher crate
//! (`mutils`, Maestro's userland utilities) and in
//! `examples/original_source/` (the Python reference this crate's
//! on-disk format is ported from).

pub mod accessor;
pub mod cache;
pub mod cli;
pub mod codec;
pub mod device;
pub mod directory;
pub mod error;
pub mod format;
pub mod fs;
pub mod inode;
pub mod layout;
pub mod superblock;

pub use error::{Error, Result};
pub use format::format_image;
pub use fs::{FileStats, Filesystem, FsStats};
pub use inode::FileKind;
