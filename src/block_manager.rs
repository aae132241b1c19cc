//! Data block allocator: a linked free-list threaded through the data
//! region itself, per `spec.md` §4.2. There is no bitmap — every
//! not-currently-allocated data block is a member of exactly one free-list
//! node, either as one of its `entries` or as the block backing the node
//! itself.
//!
//! ```text
//!   head ──▶ [count=3, next=■] ──▶ [count=510, next=□] ──▶ (end, next=0)
//!              entries: a,b,c         entries: 510 ids
//! ```
//!
//! `allocate_dblock` pops an entry off the head node; when that empties the
//! node, the node's own block becomes unused and is recycled back into the
//! list via the ordinary `free_dblock` path, chained after the new head.
//! `free_dblock` is the mirror: push onto the head node, or elevate the
//! freed block itself to a new head when the current one is full.

use crate::error::{Error, Result};
use crate::storage::{Block, BlockId, Storage, BLOCK_SIZE};

/// Number of `BlockID` entries a single free-list node block can hold:
/// `(B - 16) / 8` per `spec.md` §6 (`u32 count; u32 pad; u64 next;` leaves
/// `B - 16` bytes for entries).
pub const ENTRIES_PER_NODE: usize = (BLOCK_SIZE - 16) / 8;

struct FreeListNode {
    next: BlockId,
    entries: Vec<BlockId>,
}

impl FreeListNode {
    fn empty(next: BlockId) -> Self {
        Self {
            next,
            entries: Vec::new(),
        }
    }

    fn to_bytes(&self) -> Block {
        let mut buf = [0u8; BLOCK_SIZE];
        buf[0..4].copy_from_slice(&(self.entries.len() as u32).to_le_bytes());
        buf[8..16].copy_from_slice(&self.next.to_le_bytes());
        for (i, id) in self.entries.iter().enumerate() {
            let off = 16 + i * 8;
            buf[off..off + 8].copy_from_slice(&id.to_le_bytes());
        }
        buf
    }

    fn from_bytes(buf: &Block) -> Result<Self> {
        let count = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        if count > ENTRIES_PER_NODE {
            return Err(Error::Corrupt("free-list node count exceeds capacity"));
        }
        let next = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let off = 16 + i * 8;
            entries.push(u64::from_le_bytes(buf[off..off + 8].try_into().unwrap()));
        }
        Ok(Self { next, entries })
    }
}

/// Allocates and frees data blocks. Owns only the cursor state (the
/// free-list head); the actual free-list contents live in the data region
/// on `Storage`.
pub struct BlockManager {
    /// Current free-list head, `0` meaning the list is empty.
    pub(crate) head: BlockId,
    s_dblock: BlockId,
    nr_block: u64,
}

impl BlockManager {
    /// Construct a manager bound to a data region `[s_dblock, nr_block)`,
    /// with the free-list starting at `head` (`0` = empty).
    pub(crate) fn new(head: BlockId, s_dblock: BlockId, nr_block: u64) -> Self {
        Self {
            head,
            s_dblock,
            nr_block,
        }
    }

    fn check_range(&self, id: BlockId) -> Result<()> {
        if id < self.s_dblock || id >= self.nr_block {
            return Err(Error::BadId);
        }
        Ok(())
    }

    fn read_node(&self, storage: &mut dyn Storage, id: BlockId) -> Result<FreeListNode> {
        let mut buf = [0u8; BLOCK_SIZE];
        storage.read_block(id, &mut buf)?;
        FreeListNode::from_bytes(&buf)
    }

    fn write_node(&self, storage: &mut dyn Storage, id: BlockId, node: &FreeListNode) -> Result<()> {
        storage.write_block(id, &node.to_bytes())
    }

    /// Read a data block, rejecting ids outside `[SD, NT)`.
    pub fn read_dblock(&self, storage: &mut dyn Storage, id: BlockId, buf: &mut Block) -> Result<()> {
        self.check_range(id)?;
        storage.read_block(id, buf)
    }

    /// Write a data block, rejecting ids outside `[SD, NT)`.
    pub fn write_dblock(&self, storage: &mut dyn Storage, id: BlockId, buf: &Block) -> Result<()> {
        self.check_range(id)?;
        storage.write_block(id, buf)
    }

    /// Return a data block not currently reachable from any inode, or
    /// [`Error::NoSpace`] if the free-list is exhausted.
    pub fn allocate_dblock(&mut self, storage: &mut dyn Storage) -> Result<BlockId> {
        if self.head == 0 {
            return Err(Error::NoSpace);
        }
        let old_head = self.head;
        let mut node = self.read_node(storage, old_head)?;
        if let Some(id) = node.entries.pop() {
            if node.entries.is_empty() {
                // This node has nothing left to offer: retire it, and the
                // block it occupied becomes free in its own right.
                self.head = node.next;
                self.free_dblock(storage, old_head)?;
            } else {
                self.write_node(storage, old_head, &node)?;
            }
            return Ok(id);
        }
        // The head node itself holds no entries (a freshly elevated
        // header with nothing queued behind it yet): its own block is a
        // perfectly good free data block, just one presently playing the
        // role of list header. Hand it out directly — recycling it
        // through `free_dblock` here would just reinsert the same id and
        // leave `self.head` pointing right back at it.
        self.head = node.next;
        Ok(old_head)
    }

    /// Return `id` to the free-list. `id` must be a data block not
    /// currently reachable from any inode.
    pub fn free_dblock(&mut self, storage: &mut dyn Storage, id: BlockId) -> Result<()> {
        self.check_range(id)?;
        if self.head == 0 {
            self.write_node(storage, id, &FreeListNode::empty(0))?;
            self.head = id;
            return Ok(());
        }
        let mut node = self.read_node(storage, self.head)?;
        if node.entries.len() < ENTRIES_PER_NODE {
            node.entries.push(id);
            self.write_node(storage, self.head, &node)?;
        } else {
            let new_node = FreeListNode::empty(self.head);
            self.write_node(storage, id, &new_node)?;
            self.head = id;
        }
        Ok(())
    }
}
