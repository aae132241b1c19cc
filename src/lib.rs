//! `uxfs` — a UNIX-style block filesystem storage engine.
//!
//! This crate implements the on-disk structures and operations of a simple
//! UNIX filesystem over a pluggable block device: a superblock, a
//! fixed-size inode table with three-level indirect block indexing, a
//! linked free-list data-block allocator, and a variable-length directory
//! entry codec. It is the storage core a kernel filesystem bridge (FUSE,
//! a VFS adapter, a network protocol handler) would sit in front of — this
//! crate itself never talks to a kernel, a socket, or a CLI argument
//! parser.
//!
//! ```text
//!   block 0          blocks [1, 1+NI)        blocks [SD, NT)
//!   +----------+     +------------------+    +------------------------+
//!   |superblock|     | inode table      |    | data region            |
//!   |          |     | (NI blocks, 16   |    | (free-list allocated,  |
//!   |          |     |  256B records    |    |  indexed by inode      |
//!   |          |     |  per block)      |    |  p_block trees)        |
//!   +----------+     +------------------+    +------------------------+
//! ```
//!
//! The root of the tree is [`filesystem::FileSystem`], built over anything
//! implementing [`storage::Storage`]. Call [`filesystem::FileSystem::mkfs`]
//! to format a fresh image or [`filesystem::FileSystem::open`] to mount an
//! existing one, then drive it with `mknod`/`mkdir`/`read`/`write`/
//! `truncate`/`unlink`/`rmdir`/`readdir`/`getattr`/`utimens`.
//!
//! Every fallible operation returns [`error::Result`]; [`error::Error`]
//! carries the POSIX-flavored taxonomy a caller needs to translate into a
//! negative `errno` at whatever boundary it sits behind, via
//! [`error::Error::to_errno`].

mod block_manager;
mod directory;
mod error;
mod filesystem;
mod inode;
mod path;
mod storage;
mod superblock;
mod translate;

pub use error::{Error, Result};
pub use filesystem::{Attr, FileSystem, ROOT_INODE};
pub use inode::{Inode, InodeId, InodeType, INODE_SIZE, P_BLOCK_COUNT};
pub use storage::{Block, BlockId, FileStorage, MemStorage, Storage, BLOCK_SIZE};
pub use translate::max_file_size;
