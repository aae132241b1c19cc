//! Block-index translation: mapping a file-relative logical block number
//! `k` to a physical [`BlockId`], across direct, single-, double- and
//! triple-indirect ranges (`spec.md` §4.5 — "the heart").
//!
//! ```text
//!           k=0..10            k=10..10+E                k=10+E..10+E+E^2
//!   p_block[0..10] ──▶ data   p_block[10] ──▶ [E ids] ──▶ data
//!                                p_block[11] ──▶ [E ids] ──▶ [E ids] ──▶ data
//!                                p_block[12] ──▶ [E ids] ──▶ [E ids] ──▶ [E ids] ──▶ data
//!                                 (L1 index)      (L2)        (L3)
//! ```
//!
//! Two traversal modes share this table: a read-only [`resolve`] that
//! returns `None` the moment it hits an unset pointer (a hole, read as
//! zero), and an allocate-on-demand [`resolve_mut`] used by `write`, which
//! materializes any missing index or leaf block along the way and records
//! every block it allocates so the caller can roll the whole write back on
//! a later [`crate::error::Error::NoSpace`].

use crate::block_manager::BlockManager;
use crate::error::{Error, Result};
use crate::inode::Inode;
use crate::storage::{BlockId, Storage, BLOCK_SIZE};

/// Direct `p_block` entries.
pub const DIRECT: usize = 10;
/// Index-block fanout: `B / sizeof(BlockID)`.
pub const E: usize = BLOCK_SIZE / 8;

/// First logical index covered by the single-indirect range.
pub const L1_START: usize = DIRECT;
/// First logical index covered by the double-indirect range.
pub const L2_START: usize = L1_START + E;
/// First logical index covered by the triple-indirect range.
pub const L3_START: usize = L2_START + E * E;
/// One past the last logical index this layout can address.
pub const MAX_BLOCKS: usize = L3_START + E * E * E;

/// Maximum file size in bytes this layout can address.
pub fn max_file_size() -> u64 {
    MAX_BLOCKS as u64 * BLOCK_SIZE as u64
}

type IndexArray = Vec<BlockId>;

fn nz(id: BlockId) -> Option<BlockId> {
    if id == 0 {
        None
    } else {
        Some(id)
    }
}

fn read_index_block(storage: &mut dyn Storage, id: BlockId) -> Result<IndexArray> {
    let mut buf = [0u8; BLOCK_SIZE];
    storage.read_block(id, &mut buf)?;
    let mut arr = Vec::with_capacity(E);
    for i in 0..E {
        let off = i * 8;
        arr.push(u64::from_le_bytes(buf[off..off + 8].try_into().unwrap()));
    }
    Ok(arr)
}

fn write_index_block(storage: &mut dyn Storage, id: BlockId, arr: &[BlockId]) -> Result<()> {
    let mut buf = [0u8; BLOCK_SIZE];
    for (i, v) in arr.iter().enumerate() {
        let off = i * 8;
        buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
    }
    storage.write_block(id, &buf)
}

/// Decompose logical index `k` into the level it falls in and the
/// coordinates within that level's index tree.
enum Location {
    Direct(usize),
    L1 { offset: usize },
    L2 { l1_index: usize, offset: usize },
    L3 { l2_index: usize, l1_index: usize, offset: usize },
}

fn locate(k: usize) -> Result<Location> {
    if k < L1_START {
        Ok(Location::Direct(k))
    } else if k < L2_START {
        Ok(Location::L1 { offset: k - L1_START })
    } else if k < L3_START {
        let rel = k - L2_START;
        Ok(Location::L2 {
            l1_index: rel / E,
            offset: rel % E,
        })
    } else if k < MAX_BLOCKS {
        let rel = k - L3_START;
        Ok(Location::L3 {
            l2_index: rel / (E * E),
            l1_index: (rel % (E * E)) / E,
            offset: rel % E,
        })
    } else {
        Err(Error::FileTooLarge)
    }
}

/// Read-only lookup: returns `None` the moment any pointer on the path to
/// `k` is unset, meaning the logical block is a hole (reads as zero).
pub(crate) fn resolve(inode: &Inode, storage: &mut dyn Storage, k: u64) -> Result<Option<BlockId>> {
    let loc = locate(k as usize)?;
    match loc {
        Location::Direct(i) => Ok(nz(inode.p_block[i])),
        Location::L1 { offset } => {
            let Some(l1) = nz(inode.p_block[10]) else { return Ok(None) };
            let arr = read_index_block(storage, l1)?;
            Ok(nz(arr[offset]))
        }
        Location::L2 { l1_index, offset } => {
            let Some(l2_root) = nz(inode.p_block[11]) else { return Ok(None) };
            let l1s = read_index_block(storage, l2_root)?;
            let Some(l1) = nz(l1s[l1_index]) else { return Ok(None) };
            let arr = read_index_block(storage, l1)?;
            Ok(nz(arr[offset]))
        }
        Location::L3 { l2_index, l1_index, offset } => {
            let Some(l3_root) = nz(inode.p_block[12]) else { return Ok(None) };
            let l2s = read_index_block(storage, l3_root)?;
            let Some(l2) = nz(l2s[l2_index]) else { return Ok(None) };
            let l1s = read_index_block(storage, l2)?;
            let Some(l1) = nz(l1s[l1_index]) else { return Ok(None) };
            let arr = read_index_block(storage, l1)?;
            Ok(nz(arr[offset]))
        }
    }
}

/// Read-only enumeration of the dense `BlockId` sequence (or `None` for
/// holes) covering logical blocks `[begin, end)`, matching the reference
/// implementation's separately testable `read_dblock_index`.
pub(crate) fn block_ids_for_range(
    inode: &Inode,
    storage: &mut dyn Storage,
    begin: u64,
    end: u64,
) -> Result<Vec<Option<BlockId>>> {
    let mut out = Vec::with_capacity((end - begin) as usize);
    for k in begin..end {
        out.push(resolve(inode, storage, k)?);
    }
    Ok(out)
}

fn ensure(
    storage: &mut dyn Storage,
    bm: &mut BlockManager,
    ptr: &mut BlockId,
    allocated: &mut Vec<BlockId>,
) -> Result<BlockId> {
    if *ptr == 0 {
        let id = bm.allocate_dblock(storage)?;
        storage.write_block(id, &[0u8; BLOCK_SIZE])?;
        *ptr = id;
        allocated.push(id);
    }
    Ok(*ptr)
}

fn ensure_entry(
    storage: &mut dyn Storage,
    bm: &mut BlockManager,
    block_id: BlockId,
    idx: usize,
    allocated: &mut Vec<BlockId>,
    index_writes: &mut Vec<(BlockId, usize)>,
) -> Result<BlockId> {
    let mut arr = read_index_block(storage, block_id)?;
    if arr[idx] == 0 {
        let id = bm.allocate_dblock(storage)?;
        storage.write_block(id, &[0u8; BLOCK_SIZE])?;
        arr[idx] = id;
        allocated.push(id);
        write_index_block(storage, block_id, &arr)?;
        // `block_id` is an already-persisted index block (it predates this
        // call, or was itself just allocated by `ensure` — either way the
        // entry we just wrote is visible on disk right away, unlike a
        // `p_block` root pointer, which only reaches disk once the whole
        // inode is written back). Record it so a caller that has to roll
        // this write back can re-zero the entry rather than leave it
        // dangling at a block id that's about to be freed.
        index_writes.push((block_id, idx));
    }
    Ok(arr[idx])
}

/// Allocate-on-demand lookup for `write`: materializes any missing index
/// or leaf block on the path to `k`, recording every newly allocated block
/// id into `allocated` (in allocation order), and every freshly wired
/// `(index_block_id, slot)` pair into `index_writes`, so the caller can
/// undo both — freeing the blocks and re-zeroing the entries pointing at
/// them — if the write as a whole fails partway through.
pub(crate) fn resolve_mut(
    inode: &mut Inode,
    bm: &mut BlockManager,
    storage: &mut dyn Storage,
    k: u64,
    allocated: &mut Vec<BlockId>,
    index_writes: &mut Vec<(BlockId, usize)>,
) -> Result<BlockId> {
    let loc = locate(k as usize)?;
    match loc {
        Location::Direct(i) => ensure(storage, bm, &mut inode.p_block[i], allocated),
        Location::L1 { offset } => {
            let l1 = ensure(storage, bm, &mut inode.p_block[10], allocated)?;
            ensure_entry(storage, bm, l1, offset, allocated, index_writes)
        }
        Location::L2 { l1_index, offset } => {
            let l2_root = ensure(storage, bm, &mut inode.p_block[11], allocated)?;
            let l1 = ensure_entry(storage, bm, l2_root, l1_index, allocated, index_writes)?;
            ensure_entry(storage, bm, l1, offset, allocated, index_writes)
        }
        Location::L3 { l2_index, l1_index, offset } => {
            let l3_root = ensure(storage, bm, &mut inode.p_block[12], allocated)?;
            let l2 = ensure_entry(storage, bm, l3_root, l2_index, allocated, index_writes)?;
            let l1 = ensure_entry(storage, bm, l2, l1_index, allocated, index_writes)?;
            ensure_entry(storage, bm, l1, offset, allocated, index_writes)
        }
    }
}

/// Undo the `(index_block_id, slot)` pairs [`resolve_mut`] wired during a
/// write that is being rolled back: re-zero each slot, in reverse order of
/// writing, so every on-disk index block is left exactly as it was before
/// the failed write touched it.
pub(crate) fn undo_index_writes(
    storage: &mut dyn Storage,
    index_writes: &[(BlockId, usize)],
) -> Result<()> {
    for &(block_id, idx) in index_writes.iter().rev() {
        let mut arr = read_index_block(storage, block_id)?;
        arr[idx] = 0;
        write_index_block(storage, block_id, &arr)?;
    }
    Ok(())
}

/// Clear the pointer to logical block `k`, without freeing any index
/// block that becomes vacant as a result — used by shrinking `truncate`,
/// paired with [`prune_empty_index_blocks`].
pub(crate) fn clear_pointer(inode: &mut Inode, storage: &mut dyn Storage, k: u64) -> Result<()> {
    let loc = locate(k as usize)?;
    match loc {
        Location::Direct(i) => {
            inode.p_block[i] = 0;
        }
        Location::L1 { offset } => {
            if let Some(l1) = nz(inode.p_block[10]) {
                let mut arr = read_index_block(storage, l1)?;
                arr[offset] = 0;
                write_index_block(storage, l1, &arr)?;
            }
        }
        Location::L2 { l1_index, offset } => {
            if let Some(l2_root) = nz(inode.p_block[11]) {
                let l1s = read_index_block(storage, l2_root)?;
                if let Some(l1) = nz(l1s[l1_index]) {
                    let mut arr = read_index_block(storage, l1)?;
                    arr[offset] = 0;
                    write_index_block(storage, l1, &arr)?;
                }
            }
        }
        Location::L3 { l2_index, l1_index, offset } => {
            if let Some(l3_root) = nz(inode.p_block[12]) {
                let l2s = read_index_block(storage, l3_root)?;
                if let Some(l2) = nz(l2s[l2_index]) {
                    let l1s = read_index_block(storage, l2)?;
                    if let Some(l1) = nz(l1s[l1_index]) {
                        let mut arr = read_index_block(storage, l1)?;
                        arr[offset] = 0;
                        write_index_block(storage, l1, &arr)?;
                    }
                }
            }
        }
    }
    Ok(())
}

/// After a round of [`clear_pointer`] calls, free any index block (L1,
/// L2, or L3 root) that is now entirely vacant, recursing from the leaves
/// of the index tree back up to `p_block`.
pub(crate) fn prune_empty_index_blocks(
    inode: &mut Inode,
    storage: &mut dyn Storage,
    bm: &mut BlockManager,
) -> Result<()> {
    if let Some(l1) = nz(inode.p_block[10]) {
        let arr = read_index_block(storage, l1)?;
        if arr.iter().all(|&x| x == 0) {
            bm.free_dblock(storage, l1)?;
            inode.p_block[10] = 0;
        }
    }
    if let Some(l2_root) = nz(inode.p_block[11]) {
        let mut l1s = read_index_block(storage, l2_root)?;
        let mut changed = false;
        for slot in l1s.iter_mut() {
            if let Some(l1) = nz(*slot) {
                let arr = read_index_block(storage, l1)?;
                if arr.iter().all(|&x| x == 0) {
                    bm.free_dblock(storage, l1)?;
                    *slot = 0;
                    changed = true;
                }
            }
        }
        if changed {
            write_index_block(storage, l2_root, &l1s)?;
        }
        if l1s.iter().all(|&x| x == 0) {
            bm.free_dblock(storage, l2_root)?;
            inode.p_block[11] = 0;
        }
    }
    if let Some(l3_root) = nz(inode.p_block[12]) {
        let mut l2s = read_index_block(storage, l3_root)?;
        let mut top_changed = false;
        for l2_slot in l2s.iter_mut() {
            if let Some(l2) = nz(*l2_slot) {
                let mut l1s = read_index_block(storage, l2)?;
                let mut changed = false;
                for slot in l1s.iter_mut() {
                    if let Some(l1) = nz(*slot) {
                        let arr = read_index_block(storage, l1)?;
                        if arr.iter().all(|&x| x == 0) {
                            bm.free_dblock(storage, l1)?;
                            *slot = 0;
                            changed = true;
                        }
                    }
                }
                if changed {
                    write_index_block(storage, l2, &l1s)?;
                }
                if l1s.iter().all(|&x| x == 0) {
                    bm.free_dblock(storage, l2)?;
                    *l2_slot = 0;
                    top_changed = true;
                }
            }
        }
        if top_changed {
            write_index_block(storage, l3_root, &l2s)?;
        }
        if l2s.iter().all(|&x| x == 0) {
            bm.free_dblock(storage, l3_root)?;
            inode.p_block[12] = 0;
        }
    }
    Ok(())
}

/// Count every data and index block currently reachable from `inode`,
/// used to keep `inode.block` accurate after writes and truncates.
pub(crate) fn count_blocks(inode: &Inode, storage: &mut dyn Storage) -> Result<u64> {
    let mut count = 0u64;
    for i in 0..DIRECT {
        if inode.p_block[i] != 0 {
            count += 1;
        }
    }
    if let Some(l1) = nz(inode.p_block[10]) {
        count += 1;
        let arr = read_index_block(storage, l1)?;
        count += arr.iter().filter(|&&x| x != 0).count() as u64;
    }
    if let Some(l2_root) = nz(inode.p_block[11]) {
        count += 1;
        let l1s = read_index_block(storage, l2_root)?;
        for &l1 in l1s.iter().filter(|&&x| x != 0) {
            count += 1;
            let arr = read_index_block(storage, l1)?;
            count += arr.iter().filter(|&&x| x != 0).count() as u64;
        }
    }
    if let Some(l3_root) = nz(inode.p_block[12]) {
        count += 1;
        let l2s = read_index_block(storage, l3_root)?;
        for &l2 in l2s.iter().filter(|&&x| x != 0) {
            count += 1;
            let l1s = read_index_block(storage, l2)?;
            for &l1 in l1s.iter().filter(|&&x| x != 0) {
                count += 1;
                let arr = read_index_block(storage, l1)?;
                count += arr.iter().filter(|&&x| x != 0).count() as u64;
            }
        }
    }
    Ok(count)
}
