//! The leaf dependency of the whole engine: a fixed-capacity array of
//! equally sized blocks. Everything above this module — the superblock,
//! the allocator, the inode table, directories — is just structured bytes
//! written through [`Storage::read_block`]/[`Storage::write_block`].
//!
//! No caching semantics are required of an implementation; the core
//! assumes a simple synchronous store (`spec.md` §4.1).

use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Block size in bytes. Fixed at 4096 for this engine.
pub const BLOCK_SIZE: usize = 4096;

/// On-disk block identifier.
pub type BlockId = u64;

/// A single block's worth of bytes.
pub type Block = [u8; BLOCK_SIZE];

/// A fixed-capacity block device abstraction. `id` is a block index in
/// `[0, block_count())`; `id >= block_count()` must fail with
/// [`Error::IoRange`].
pub trait Storage {
    /// Total number of addressable blocks.
    fn block_count(&self) -> u64;

    /// Read block `id` into `buf`.
    fn read_block(&mut self, id: BlockId, buf: &mut Block) -> Result<()>;

    /// Write `buf` to block `id`.
    fn write_block(&mut self, id: BlockId, buf: &Block) -> Result<()>;
}

/// An in-memory block store, for tests and for short-lived filesystems
/// that never need to persist across process restarts.
pub struct MemStorage {
    blocks: Vec<Block>,
}

impl MemStorage {
    /// Create a store of `count` zero-initialized blocks.
    pub fn new(count: u64) -> Self {
        Self {
            blocks: vec![[0u8; BLOCK_SIZE]; count as usize],
        }
    }
}

impl Storage for MemStorage {
    fn block_count(&self) -> u64 {
        self.blocks.len() as u64
    }

    fn read_block(&mut self, id: BlockId, buf: &mut Block) -> Result<()> {
        let block = self.blocks.get(id as usize).ok_or(Error::IoRange)?;
        buf.copy_from_slice(block);
        Ok(())
    }

    fn write_block(&mut self, id: BlockId, buf: &Block) -> Result<()> {
        let block = self.blocks.get_mut(id as usize).ok_or(Error::IoRange)?;
        block.copy_from_slice(buf);
        Ok(())
    }
}

/// A file-backed block store: one flat file, `block_count() * BLOCK_SIZE`
/// bytes long, each block at its natural offset.
pub struct FileStorage {
    file: File,
    count: u64,
}

impl FileStorage {
    /// Create a new backing file sized for `count` blocks, truncating any
    /// existing file at `path`.
    pub fn create(path: impl AsRef<Path>, count: u64) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(count * BLOCK_SIZE as u64)?;
        Ok(Self { file, count })
    }

    /// Open an existing backing file; the block count is derived from its
    /// length.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            count: len / BLOCK_SIZE as u64,
        })
    }
}

impl Storage for FileStorage {
    fn block_count(&self) -> u64 {
        self.count
    }

    fn read_block(&mut self, id: BlockId, buf: &mut Block) -> Result<()> {
        if id >= self.count {
            return Err(Error::IoRange);
        }
        self.file
            .seek(SeekFrom::Start(id * BLOCK_SIZE as u64))
            .map_err(|_| Error::IoRange)?;
        self.file.read_exact(buf).map_err(|_| Error::IoRange)
    }

    fn write_block(&mut self, id: BlockId, buf: &Block) -> Result<()> {
        if id >= self.count {
            return Err(Error::IoRange);
        }
        self.file
            .seek(SeekFrom::Start(id * BLOCK_SIZE as u64))
            .map_err(|_| Error::IoRange)?;
        self.file.write_all(buf).map_err(|_| Error::IoRange)
    }
}
