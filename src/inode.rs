//! The inode table: `NI` reserved blocks starting at block 1, each packed
//! with `B / 256` fixed-size 256-byte records (`spec.md` §3/§6).
//!
//! ```text
//!   p_block: [ d0 d1 d2 ... d9 | L1 | L2 | L3 ]
//!              10 direct        single  double  triple
//!                                indirect indirect indirect
//! ```
//! Indices `0..10` point straight at data blocks; `10`, `11`, `12` point at
//! index blocks consumed by [`crate::translate`].

use crate::error::{Error, Result};
use crate::storage::{BlockId, Storage, BLOCK_SIZE};
use crate::superblock::SuperBlock;

/// 32-bit inode table index. Inode `0` is always the root directory.
pub type InodeId = u32;

/// On-disk byte size of a single inode record.
pub const INODE_SIZE: usize = 256;

/// Number of `p_block` entries: 10 direct, 1 single-indirect, 1
/// double-indirect, 1 triple-indirect.
pub const P_BLOCK_COUNT: usize = 13;

/// What an inode currently represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeType {
    /// Slot is unallocated.
    Free,
    /// Ordinary byte-addressable file.
    Regular,
    /// Directory, holding a serialized entry stream as its byte content.
    Directory,
}

impl InodeType {
    fn to_u8(self) -> u8 {
        match self {
            InodeType::Free => 0,
            InodeType::Regular => 1,
            InodeType::Directory => 2,
        }
    }

    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(InodeType::Free),
            1 => Ok(InodeType::Regular),
            2 => Ok(InodeType::Directory),
            _ => Err(Error::Corrupt("invalid inode type byte")),
        }
    }
}

/// In-memory form of a 256-byte inode record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub itype: InodeType,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub links: u32,
    pub size: u64,
    pub block: u64,
    pub atime: u64,
    pub ctime: u64,
    pub mtime: u64,
    pub p_block: [BlockId; P_BLOCK_COUNT],
}

impl Inode {
    /// A zeroed, `FREE` inode record.
    pub fn free() -> Self {
        Self {
            itype: InodeType::Free,
            mode: 0,
            uid: 0,
            gid: 0,
            links: 0,
            size: 0,
            block: 0,
            atime: 0,
            ctime: 0,
            mtime: 0,
            p_block: [0; P_BLOCK_COUNT],
        }
    }

    fn to_bytes(&self) -> [u8; INODE_SIZE] {
        let mut buf = [0u8; INODE_SIZE];
        buf[0] = self.itype.to_u8();
        // buf[1..4] stays zero (pad).
        buf[4..8].copy_from_slice(&self.mode.to_le_bytes());
        buf[8..12].copy_from_slice(&self.uid.to_le_bytes());
        buf[12..16].copy_from_slice(&self.gid.to_le_bytes());
        buf[16..20].copy_from_slice(&self.links.to_le_bytes());
        buf[20..28].copy_from_slice(&self.size.to_le_bytes());
        buf[28..36].copy_from_slice(&self.block.to_le_bytes());
        buf[36..44].copy_from_slice(&self.atime.to_le_bytes());
        buf[44..52].copy_from_slice(&self.ctime.to_le_bytes());
        buf[52..60].copy_from_slice(&self.mtime.to_le_bytes());
        for (i, p) in self.p_block.iter().enumerate() {
            let off = 60 + i * 8;
            buf[off..off + 8].copy_from_slice(&p.to_le_bytes());
        }
        buf
    }

    fn from_bytes(buf: &[u8; INODE_SIZE]) -> Result<Self> {
        let itype = InodeType::from_u8(buf[0])?;
        let u32_at = |o: usize| u32::from_le_bytes(buf[o..o + 4].try_into().unwrap());
        let u64_at = |o: usize| u64::from_le_bytes(buf[o..o + 8].try_into().unwrap());
        let mut p_block = [0u64; P_BLOCK_COUNT];
        for (i, p) in p_block.iter_mut().enumerate() {
            *p = u64_at(60 + i * 8);
        }
        Ok(Self {
            itype,
            mode: u32_at(4),
            uid: u32_at(8),
            gid: u32_at(12),
            links: u32_at(16),
            size: u64_at(20),
            block: u64_at(28),
            atime: u64_at(36),
            ctime: u64_at(44),
            mtime: u64_at(52),
            p_block,
        })
    }
}

/// Compile-time check that the byte layout above actually fits in 256
/// bytes: `1 (itype) + 3 (pad) + 16 (mode/uid/gid/links) + 16 (size/block)
/// + 24 (atime/ctime/mtime) + 13*8 (p_block) = 164`, leaving 92 bytes of
/// trailing pad, well within `INODE_SIZE`.
const _: () = assert!(1 + 3 + 16 + 16 + 24 + P_BLOCK_COUNT * 8 <= INODE_SIZE);

/// Allocates, reads and writes records in the inode table.
pub struct InodeManager {
    s_iblock: BlockId,
    nr_iblock: u64,
    per_block: u32,
    next_hint: InodeId,
}

impl InodeManager {
    pub(crate) fn new(sb: &SuperBlock) -> Self {
        Self {
            s_iblock: sb.s_iblock,
            nr_iblock: sb.nr_iblock,
            per_block: (BLOCK_SIZE / INODE_SIZE) as u32,
            next_hint: 0,
        }
    }

    /// Total inode capacity: `NI * (B / 256)`.
    pub fn capacity(&self) -> u32 {
        (self.nr_iblock as u32).saturating_mul(self.per_block)
    }

    fn locate(&self, id: InodeId) -> (BlockId, usize) {
        let per_block = self.per_block;
        let blk = self.s_iblock + (id / per_block) as u64;
        let off = (id % per_block) as usize;
        (blk, off)
    }

    /// Zero out every inode record across the whole inode region, marking
    /// every slot `FREE`. Used by `mkfs`.
    pub(crate) fn format(&self, storage: &mut dyn Storage) -> Result<()> {
        let free = Inode::free().to_bytes();
        let mut block = [0u8; BLOCK_SIZE];
        for slot in 0..self.per_block as usize {
            block[slot * INODE_SIZE..(slot + 1) * INODE_SIZE].copy_from_slice(&free);
        }
        for blk in self.s_iblock..self.s_iblock + self.nr_iblock {
            storage.write_block(blk, &block)?;
        }
        Ok(())
    }

    /// Read the record at `id`.
    pub fn read_inode(&self, storage: &mut dyn Storage, id: InodeId) -> Result<Inode> {
        if id >= self.capacity() {
            return Err(Error::BadId);
        }
        let (blk, off) = self.locate(id);
        let mut buf = [0u8; BLOCK_SIZE];
        storage.read_block(blk, &mut buf)?;
        let mut record = [0u8; INODE_SIZE];
        record.copy_from_slice(&buf[off * INODE_SIZE..(off + 1) * INODE_SIZE]);
        Inode::from_bytes(&record)
    }

    /// Read-modify-write the record at `id`.
    pub fn write_inode(&self, storage: &mut dyn Storage, id: InodeId, inode: &Inode) -> Result<()> {
        if id >= self.capacity() {
            return Err(Error::BadId);
        }
        let (blk, off) = self.locate(id);
        let mut buf = [0u8; BLOCK_SIZE];
        storage.read_block(blk, &mut buf)?;
        buf[off * INODE_SIZE..(off + 1) * INODE_SIZE].copy_from_slice(&inode.to_bytes());
        storage.write_block(blk, &buf)
    }

    /// Scan for the first `FREE` slot, starting from the cached
    /// next-likely-free hint, reserve it with a non-`FREE` marker, and
    /// return its id.
    pub fn allocate_inode(&mut self, storage: &mut dyn Storage) -> Result<InodeId> {
        let cap = self.capacity();
        if cap == 0 {
            return Err(Error::NoSpace);
        }
        for probe in 0..cap {
            let id = (self.next_hint + probe) % cap;
            let mut inode = self.read_inode(storage, id)?;
            if inode.itype == InodeType::Free {
                inode.itype = InodeType::Regular;
                inode.links = 0;
                self.write_inode(storage, id, &inode)?;
                self.next_hint = (id + 1) % cap;
                return Ok(id);
            }
        }
        Err(Error::NoSpace)
    }
}
