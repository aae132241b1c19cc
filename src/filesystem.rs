//! Top-level assembly: orchestrates [`crate::storage`],
//! [`crate::block_manager`], [`crate::inode`], [`crate::directory`],
//! [`crate::translate`] and [`crate::path`] into the operations a kernel
//! filesystem bridge actually calls (`spec.md` §4.8/§6).

use crate::block_manager::BlockManager;
use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::inode::{Inode, InodeId, InodeManager, InodeType};
use crate::path;
use crate::storage::{BlockId, Storage, BLOCK_SIZE};
use crate::superblock::{read_superblock, write_superblock, SuperBlock};
use crate::translate;

/// The root directory always lives at this inode id after `mkfs`.
pub const ROOT_INODE: InodeId = 0;

fn now_ns() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// POSIX-flavored metadata snapshot returned by [`FileSystem::getattr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr {
    pub ino: InodeId,
    pub itype: InodeType,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub links: u32,
    pub size: u64,
    pub blocks: u64,
    pub atime_ns: u64,
    pub ctime_ns: u64,
    pub mtime_ns: u64,
}

/// The assembled storage engine. Generic over the [`Storage`] backend so
/// the same logic runs over an in-memory image in tests and a
/// file-backed one in an adapter binary.
pub struct FileSystem<S: Storage> {
    storage: S,
    sb: SuperBlock,
    bm: BlockManager,
    im: InodeManager,
}

impl<S: Storage> FileSystem<S> {
    /// Initialize a brand-new filesystem image: superblock, all-free
    /// inode table, a free-list covering every data block, and a root
    /// directory at inode 0 whose `.`/`..` both point to itself.
    ///
    /// `nr_iblock` is the number of blocks reserved for the inode table,
    /// mirroring the reference implementation's two-argument constructor
    /// `FileSystem(nr_blocks, nr_iblock_blocks)`.
    pub fn mkfs(mut storage: S, nr_iblock: u64) -> Result<Self> {
        let nt = storage.block_count();
        assert!(
            nr_iblock > 0 && 1 + nr_iblock < nt,
            "nr_iblock must leave room for at least the superblock and one data block"
        );
        let sb = SuperBlock::new(nt, nr_iblock);
        write_superblock(&mut storage, &sb)?;

        let im = InodeManager::new(&sb);
        im.format(&mut storage)?;

        let mut bm = BlockManager::new(0, sb.s_dblock, sb.nr_block);
        for id in (sb.s_dblock..sb.nr_block).rev() {
            bm.free_dblock(&mut storage, id)?;
        }

        let mut fs = Self { storage, sb, bm, im };

        let root = fs.im.allocate_inode(&mut fs.storage)?;
        debug_assert_eq!(root, ROOT_INODE);
        let mut inode = fs.im.read_inode(&mut fs.storage, root)?;
        inode.itype = InodeType::Directory;
        inode.mode = libc::S_IFDIR as u32 | 0o755;
        inode.links = 1;
        let now = now_ns();
        inode.atime = now;
        inode.ctime = now;
        inode.mtime = now;
        fs.im.write_inode(&mut fs.storage, root, &inode)?;

        let dir = Directory::new(root, root);
        fs.write_directory(root, &dir)?;
        fs.sync_superblock()?;
        log::debug!("mkfs: nt={} ni={} nd={}", sb.nr_block, sb.nr_iblock, sb.nr_dblock);
        Ok(fs)
    }

    /// Reopen a filesystem previously created by [`FileSystem::mkfs`].
    pub fn open(mut storage: S) -> Result<Self> {
        let sb = read_superblock(&mut storage)?;
        let im = InodeManager::new(&sb);
        let bm = BlockManager::new(sb.free_head, sb.s_dblock, sb.nr_block);
        Ok(Self { storage, sb, bm, im })
    }

    fn sync_superblock(&mut self) -> Result<()> {
        self.sb.free_head = self.bm.head;
        write_superblock(&mut self.storage, &self.sb)
    }

    // ---- byte-level plumbing shared by read/write/directory I/O ----

    fn read_bytes(&mut self, inode: &Inode, dst: &mut [u8], offset: u64) -> Result<()> {
        if dst.is_empty() {
            return Ok(());
        }
        let begin_blk = offset / BLOCK_SIZE as u64;
        let end = offset + dst.len() as u64;
        let end_blk = (end - 1) / BLOCK_SIZE as u64;
        let mut blk = [0u8; BLOCK_SIZE];
        let mut written = 0usize;
        for k in begin_blk..=end_blk {
            let blk_start = k * BLOCK_SIZE as u64;
            let in_off = if k == begin_blk { (offset - blk_start) as usize } else { 0 };
            let in_end = if k == end_blk { (end - blk_start) as usize } else { BLOCK_SIZE };
            match translate::resolve(inode, &mut self.storage, k)? {
                Some(bid) => {
                    self.bm.read_dblock(&mut self.storage, bid, &mut blk)?;
                    dst[written..written + (in_end - in_off)].copy_from_slice(&blk[in_off..in_end]);
                }
                None => {
                    dst[written..written + (in_end - in_off)].fill(0);
                }
            }
            written += in_end - in_off;
        }
        Ok(())
    }

    /// Allocate-on-demand write of `src` into `inode` at `offset`, growing
    /// `inode.size` as needed but never shrinking it. Rolls back every
    /// block it allocated if it fails partway through.
    fn write_raw(&mut self, inode: &mut Inode, src: &[u8], offset: u64) -> Result<usize> {
        if src.is_empty() {
            return Ok(0);
        }
        let end = offset
            .checked_add(src.len() as u64)
            .ok_or(Error::FileTooLarge)?;
        if end > translate::max_file_size() {
            return Err(Error::FileTooLarge);
        }
        let begin_blk = offset / BLOCK_SIZE as u64;
        let end_blk = (end - 1) / BLOCK_SIZE as u64;

        let mut allocated: Vec<BlockId> = Vec::new();
        let mut index_writes: Vec<(BlockId, usize)> = Vec::new();
        let outcome = (|| -> Result<usize> {
            let mut blk = [0u8; BLOCK_SIZE];
            let mut written = 0usize;
            for k in begin_blk..=end_blk {
                let blk_start = k * BLOCK_SIZE as u64;
                let in_off = if k == begin_blk { (offset - blk_start) as usize } else { 0 };
                let in_end = if k == end_blk { (end - blk_start) as usize } else { BLOCK_SIZE };
                let bid = translate::resolve_mut(
                    inode,
                    &mut self.bm,
                    &mut self.storage,
                    k,
                    &mut allocated,
                    &mut index_writes,
                )?;
                if !(in_off == 0 && in_end == BLOCK_SIZE) {
                    self.bm.read_dblock(&mut self.storage, bid, &mut blk)?;
                }
                blk[in_off..in_end].copy_from_slice(&src[written..written + (in_end - in_off)]);
                self.bm.write_dblock(&mut self.storage, bid, &blk)?;
                written += in_end - in_off;
            }
            Ok(written)
        })();

        match outcome {
            Ok(written) => {
                if end > inode.size {
                    inode.size = end;
                }
                inode.block = translate::count_blocks(inode, &mut self.storage)?;
                let now = now_ns();
                inode.mtime = now;
                inode.ctime = now;
                Ok(written)
            }
            Err(e) => {
                // Best-effort rollback: the write already failed, a
                // secondary failure here is not something the caller can
                // act on differently. Undo the on-disk index-block entries
                // before freeing the blocks they point at, so no freed id
                // is ever left dangling off a live index block.
                let _ = translate::undo_index_writes(&mut self.storage, &index_writes);
                for bid in allocated {
                    let _ = self.bm.free_dblock(&mut self.storage, bid);
                }
                log::warn!("write rolled back after {e}");
                Err(e)
            }
        }
    }

    fn truncate_inode(&mut self, inode: &mut Inode, new_size: u64) -> Result<()> {
        if new_size < inode.size {
            let old_last_blk = if inode.size == 0 { 0 } else { (inode.size - 1) / BLOCK_SIZE as u64 };
            let first_free_blk = if new_size == 0 { 0 } else { (new_size - 1) / BLOCK_SIZE as u64 + 1 };
            if inode.size > 0 {
                for k in first_free_blk..=old_last_blk {
                    if let Some(bid) = translate::resolve(inode, &mut self.storage, k)? {
                        self.bm.free_dblock(&mut self.storage, bid)?;
                        translate::clear_pointer(inode, &mut self.storage, k)?;
                    }
                }
            }
            translate::prune_empty_index_blocks(inode, &mut self.storage, &mut self.bm)?;
            inode.size = new_size;
        } else if new_size > inode.size {
            inode.size = new_size;
        }
        inode.block = translate::count_blocks(inode, &mut self.storage)?;
        let now = now_ns();
        inode.mtime = now;
        inode.ctime = now;
        Ok(())
    }

    fn read_directory(&mut self, id: InodeId) -> Result<Directory> {
        let inode = self.im.read_inode(&mut self.storage, id)?;
        let mut buf = vec![0u8; inode.size as usize];
        self.read_bytes(&inode, &mut buf, 0)?;
        Directory::decode(&buf)
    }

    fn write_directory(&mut self, id: InodeId, dir: &Directory) -> Result<()> {
        let mut inode = self.im.read_inode(&mut self.storage, id)?;
        let bytes = dir.encode();
        self.write_raw(&mut inode, &bytes, 0)?;
        if (bytes.len() as u64) < inode.size {
            self.truncate_inode(&mut inode, bytes.len() as u64)?;
        }
        self.im.write_inode(&mut self.storage, id, &inode)?;
        Ok(())
    }

    fn release_inode(&mut self, id: InodeId) -> Result<()> {
        // A fully zeroed record, not a mutated copy of the outgoing one: a
        // reused slot must never carry a prior occupant's mode/uid/gid
        // into whatever `new_inode` fills it with next.
        self.im.write_inode(&mut self.storage, id, &Inode::free())
    }

    // ---- path resolution ----

    /// Resolve a canonicalized path to an inode id, per `spec.md` §4.7.
    pub fn path2iid(&mut self, path: &str) -> Result<InodeId> {
        let comps = path::canonicalize(path);
        let mut cur = ROOT_INODE;
        for comp in comps {
            let inode = self.im.read_inode(&mut self.storage, cur)?;
            if inode.itype != InodeType::Directory {
                return Err(Error::NotDir);
            }
            let dir = self.read_directory(cur)?;
            cur = dir.get_entry(&comp)?;
        }
        Ok(cur)
    }

    /// Allocate a fresh inode and wire `(name, id)` into `parent`'s
    /// directory. Rolls the inode allocation back on `NOT_DIR`/`EXISTS`.
    fn new_inode(&mut self, parent: InodeId, name: &str) -> Result<InodeId> {
        let id = self.im.allocate_inode(&mut self.storage)?;
        match self.link_into_parent(parent, name, id) {
            Ok(()) => Ok(id),
            Err(e) => {
                self.release_inode(id)?;
                Err(e)
            }
        }
    }

    fn link_into_parent(&mut self, parent: InodeId, name: &str, id: InodeId) -> Result<()> {
        let parent_inode = self.im.read_inode(&mut self.storage, parent)?;
        if parent_inode.itype != InodeType::Directory {
            return Err(Error::NotDir);
        }
        let mut dir = self.read_directory(parent)?;
        dir.add_entry(name, id)?;
        self.write_directory(parent, &dir)
    }

    /// Create a regular file at `path`.
    pub fn mknod(&mut self, path: &str) -> Result<InodeId> {
        let parent = self.path2iid(&path::directory_name(path))?;
        let name = path::file_name(path).ok_or(Error::Exists)?;
        let id = self.new_inode(parent, &name)?;
        let mut inode = self.im.read_inode(&mut self.storage, id)?;
        inode.itype = InodeType::Regular;
        inode.mode = libc::S_IFREG as u32 | 0o644;
        inode.links = 1;
        let now = now_ns();
        inode.atime = now;
        inode.ctime = now;
        inode.mtime = now;
        self.im.write_inode(&mut self.storage, id, &inode)?;
        self.sync_superblock()?;
        log::debug!("mknod {path} -> inode {id}");
        Ok(id)
    }

    /// Create a directory at `path`, with a fresh `.`/`..` pair.
    pub fn mkdir(&mut self, path: &str) -> Result<InodeId> {
        let parent = self.path2iid(&path::directory_name(path))?;
        let name = path::file_name(path).ok_or(Error::Exists)?;
        let id = self.new_inode(parent, &name)?;
        let mut inode = self.im.read_inode(&mut self.storage, id)?;
        inode.itype = InodeType::Directory;
        inode.mode = libc::S_IFDIR as u32 | 0o755;
        inode.links = 1;
        let now = now_ns();
        inode.atime = now;
        inode.ctime = now;
        inode.mtime = now;
        self.im.write_inode(&mut self.storage, id, &inode)?;
        let dir = Directory::new(id, parent);
        self.write_directory(id, &dir)?;
        self.sync_superblock()?;
        log::debug!("mkdir {path} -> inode {id}");
        Ok(id)
    }

    /// Remove an empty directory at `path`; fails with
    /// [`Error::NotEmpty`] unless it holds exactly `.`/`..`.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let id = self.path2iid(path)?;
        let inode = self.im.read_inode(&mut self.storage, id)?;
        if inode.itype != InodeType::Directory {
            return Err(Error::NotDir);
        }
        let dir = self.read_directory(id)?;
        if !dir.is_empty_of_children() {
            return Err(Error::NotEmpty);
        }
        let parent_path = path::directory_name(path);
        let name = path::file_name(path).ok_or(Error::NotFound)?;
        let parent = self.path2iid(&parent_path)?;
        let mut parent_dir = self.read_directory(parent)?;
        parent_dir.remove_entry(&name)?;
        self.write_directory(parent, &parent_dir)?;
        self.unlink_inode(id)?;
        self.sync_superblock()?;
        log::debug!("rmdir {path}");
        Ok(())
    }

    /// Remove the directory entry at `path` and drop a link on the inode
    /// it named, freeing it once `links` reaches 0.
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let parent_path = path::directory_name(path);
        let name = path::file_name(path).ok_or(Error::NotFound)?;
        let parent = self.path2iid(&parent_path)?;
        let mut parent_dir = self.read_directory(parent)?;
        let id = parent_dir.remove_entry(&name)?;
        self.write_directory(parent, &parent_dir)?;
        self.unlink_inode(id)?;
        self.sync_superblock()?;
        log::debug!("unlink {path}");
        Ok(())
    }

    fn unlink_inode(&mut self, id: InodeId) -> Result<()> {
        let mut inode = self.im.read_inode(&mut self.storage, id)?;
        if inode.links > 0 {
            inode.links -= 1;
        }
        if inode.links == 0 {
            self.truncate_inode(&mut inode, 0)?;
            return self.release_inode(id);
        }
        self.im.write_inode(&mut self.storage, id, &inode)
    }

    /// Validate `id` names a live inode; the trivial "open" of a
    /// stateless engine — the returned id doubles as the file handle.
    pub fn open(&mut self, id: InodeId) -> Result<InodeId> {
        let inode = self.im.read_inode(&mut self.storage, id)?;
        if inode.itype == InodeType::Free {
            return Err(Error::NotFound);
        }
        Ok(id)
    }

    /// Read up to `dst.len()` bytes starting at `offset`, clamped to the
    /// inode's size. Fails with [`Error::NotRegular`] on a directory.
    pub fn read(&mut self, id: InodeId, dst: &mut [u8], offset: u64) -> Result<usize> {
        let mut inode = self.im.read_inode(&mut self.storage, id)?;
        if inode.itype == InodeType::Directory {
            return Err(Error::NotRegular);
        }
        if offset >= inode.size {
            return Ok(0);
        }
        let n = dst.len().min((inode.size - offset) as usize);
        if n == 0 {
            return Ok(0);
        }
        self.read_bytes(&inode, &mut dst[..n], offset)?;
        inode.atime = now_ns();
        self.im.write_inode(&mut self.storage, id, &inode)?;
        log::trace!("read inode {id} offset {offset} -> {n} bytes");
        Ok(n)
    }

    /// Write `src` at `offset`, extending the file and allocating blocks
    /// as needed. Fails with [`Error::NotRegular`] on a directory.
    pub fn write(&mut self, id: InodeId, src: &[u8], offset: u64) -> Result<usize> {
        let mut inode = self.im.read_inode(&mut self.storage, id)?;
        if inode.itype == InodeType::Directory {
            return Err(Error::NotRegular);
        }
        let n = self.write_raw(&mut inode, src, offset)?;
        self.im.write_inode(&mut self.storage, id, &inode)?;
        self.sync_superblock()?;
        log::trace!("write inode {id} offset {offset} -> {n} bytes");
        Ok(n)
    }

    /// Grow or shrink `id` to exactly `new_size` bytes.
    pub fn truncate(&mut self, id: InodeId, new_size: u64) -> Result<()> {
        let mut inode = self.im.read_inode(&mut self.storage, id)?;
        self.truncate_inode(&mut inode, new_size)?;
        self.im.write_inode(&mut self.storage, id, &inode)?;
        self.sync_superblock()?;
        log::debug!("truncate inode {id} -> {new_size} bytes");
        Ok(())
    }

    /// Snapshot an inode's POSIX-flavored metadata.
    pub fn getattr(&mut self, id: InodeId) -> Result<Attr> {
        let inode = self.im.read_inode(&mut self.storage, id)?;
        Ok(Attr {
            ino: id,
            itype: inode.itype,
            mode: inode.mode,
            uid: inode.uid,
            gid: inode.gid,
            links: inode.links,
            size: inode.size,
            blocks: inode.block,
            atime_ns: inode.atime,
            ctime_ns: inode.ctime,
            mtime_ns: inode.mtime,
        })
    }

    /// Set `atime`/`mtime` from `ts0`/`ts1` (nanosecond-resolution), per
    /// the corrected semantics `spec.md` §9 directs implementers to use.
    pub fn utimens(&mut self, id: InodeId, ts0_ns: Option<u64>, ts1_ns: Option<u64>) -> Result<()> {
        let mut inode = self.im.read_inode(&mut self.storage, id)?;
        if let Some(a) = ts0_ns {
            inode.atime = a;
        }
        if let Some(m) = ts1_ns {
            inode.mtime = m;
        }
        self.im.write_inode(&mut self.storage, id, &inode)
    }

    /// List `(name, inode_id)` pairs in a directory.
    pub fn readdir(&mut self, id: InodeId) -> Result<Vec<(String, InodeId)>> {
        let inode = self.im.read_inode(&mut self.storage, id)?;
        if inode.itype != InodeType::Directory {
            return Err(Error::NotDir);
        }
        let dir = self.read_directory(id)?;
        Ok(dir.iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStorage;
    use std::collections::HashSet;

    // Matches spec.md §8's end-to-end scenario parameters.
    const NT: u64 = 1300;
    const NI: u64 = 9;

    fn fresh() -> FileSystem<MemStorage> {
        FileSystem::mkfs(MemStorage::new(NT), NI).unwrap()
    }

    #[test]
    fn scenario_1_root_after_mkfs() {
        let mut fs = fresh();
        let attr = fs.getattr(ROOT_INODE).unwrap();
        assert_eq!(attr.ino, 0);
        assert_eq!(attr.itype, InodeType::Directory);
        assert_ne!(attr.mode & libc::S_IFDIR as u32, 0);
        // See SPEC_FULL.md §8: 15 bytes under the explicit variable-length
        // directory-entry format, not the reference implementation's 32.
        assert_eq!(attr.size, 15);
    }

    #[test]
    fn scenario_2_mknod_write_read_round_trips() {
        let mut fs = fresh();
        fs.mknod("/a").unwrap();
        let id = fs.path2iid("/a").unwrap();
        let n = fs.write(id, b"hello", 0).unwrap();
        assert_eq!(n, 5);
        let mut out = [0u8; 5];
        let n = fs.read(id, &mut out, 0).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn scenario_3_write_past_l2_boundary_allocates_index_chain() {
        let mut fs = fresh();
        fs.mknod("/a").unwrap();
        let id = fs.path2iid("/a").unwrap();
        fs.write(id, &[0u8], 10_485_759).unwrap();
        let attr = fs.getattr(id).unwrap();
        assert_eq!(attr.size, 10_485_760);
        assert!(attr.blocks >= 3);
    }

    #[test]
    fn scenario_4_rmdir_requires_empty_then_succeeds() {
        let mut fs = fresh();
        fs.mkdir("/d").unwrap();
        fs.mknod("/d/f").unwrap();
        assert_eq!(fs.rmdir("/d"), Err(Error::NotEmpty));
        fs.unlink("/d/f").unwrap();
        fs.rmdir("/d").unwrap();
        assert_reachable_plus_free_covers_all_data_blocks(&mut fs);
    }

    #[test]
    fn scenario_5_truncate_to_zero_then_idempotent() {
        let mut fs = fresh();
        fs.mknod("/x").unwrap();
        let id = fs.path2iid("/x").unwrap();
        let buf = [7u8; 4096];
        for k in 0..12u64 {
            fs.write(id, &buf, k * 4096).unwrap();
        }
        let attr = fs.getattr(id).unwrap();
        assert_eq!(attr.blocks, 13);

        fs.truncate(id, 0).unwrap();
        let attr = fs.getattr(id).unwrap();
        assert_eq!(attr.blocks, 0);
        assert_eq!(attr.size, 0);

        // Second truncate(0) is a no-op.
        fs.truncate(id, 0).unwrap();
        let attr2 = fs.getattr(id).unwrap();
        assert_eq!(attr2.blocks, 0);

        assert_reachable_plus_free_covers_all_data_blocks(&mut fs);
    }

    #[test]
    fn scenario_6_dotdot_and_dot_resolve_identically() {
        let mut fs = fresh();
        fs.mkdir("/b").unwrap();
        fs.mkdir("/b/c").unwrap();
        let via_dotdot = fs.path2iid("/a/../b/./c").unwrap_err();
        // "/a" does not exist, so this particular string fails NOT_FOUND;
        // exercise the equivalence on paths that do exist instead.
        assert_eq!(via_dotdot, Error::NotFound);
        assert_eq!(fs.path2iid("/b/../b/./c").unwrap(), fs.path2iid("/b/c").unwrap());
    }

    #[test]
    fn read_offset_past_end_returns_zero() {
        let mut fs = fresh();
        fs.mknod("/a").unwrap();
        let id = fs.path2iid("/a").unwrap();
        fs.write(id, b"hi", 0).unwrap();
        let mut out = [0u8; 4];
        assert_eq!(fs.read(id, &mut out, 100).unwrap(), 0);
    }

    #[test]
    fn write_on_directory_is_not_regular() {
        let mut fs = fresh();
        let root = ROOT_INODE;
        assert_eq!(fs.write(root, b"x", 0), Err(Error::NotRegular));
        assert_eq!(fs.read(root, &mut [0u8; 1], 0), Err(Error::NotRegular));
    }

    #[test]
    fn unlinked_inode_slot_is_fully_zeroed_not_just_marked_free() {
        let mut fs = fresh();
        fs.mknod("/a").unwrap();
        let id = fs.path2iid("/a").unwrap();
        {
            let mut inode = fs.im.read_inode(&mut fs.storage, id).unwrap();
            inode.uid = 4242;
            inode.gid = 4242;
            fs.im.write_inode(&mut fs.storage, id, &inode).unwrap();
        }
        fs.unlink("/a").unwrap();
        let freed = fs.im.read_inode(&mut fs.storage, id).unwrap();
        assert_eq!(freed.itype, InodeType::Free);
        assert_eq!(freed.uid, 0, "a freed slot must not leak the prior owner's uid");
        assert_eq!(freed.gid, 0, "a freed slot must not leak the prior owner's gid");
    }

    #[test]
    fn unlink_frees_exactly_inode_block_count() {
        let mut fs = fresh();
        fs.mknod("/a").unwrap();
        let id = fs.path2iid("/a").unwrap();
        let buf = [1u8; 4096];
        for k in 0..3u64 {
            fs.write(id, &buf, k * 4096).unwrap();
        }
        let blocks_before = fs.getattr(id).unwrap().blocks;
        assert_eq!(blocks_before, 3);
        fs.unlink("/a").unwrap();
        assert_reachable_plus_free_covers_all_data_blocks(&mut fs);
    }

    #[test]
    fn mknod_does_not_touch_dot_entries() {
        let mut fs = fresh();
        fs.mknod("/a").unwrap();
        let id = fs.path2iid("/a").unwrap();
        // A regular file has no directory content of its own at all.
        assert_eq!(fs.getattr(id).unwrap().itype, InodeType::Regular);
        assert_eq!(fs.readdir(id), Err(Error::NotDir));
    }

    #[test]
    fn every_directory_starts_with_dot_and_dotdot() {
        let mut fs = fresh();
        fs.mkdir("/d").unwrap();
        let id = fs.path2iid("/d").unwrap();
        let entries = fs.readdir(id).unwrap();
        assert_eq!(entries[0].0, ".");
        assert_eq!(entries[1].0, "..");
    }

    #[test]
    fn root_dotdot_is_root() {
        let mut fs = fresh();
        let entries = fs.readdir(ROOT_INODE).unwrap();
        let dotdot = entries.iter().find(|(n, _)| n == "..").unwrap();
        assert_eq!(dotdot.1, ROOT_INODE);
    }

    #[test]
    fn rolled_back_write_clears_dangling_entry_in_preexisting_index_block() {
        // ND=4: one block for the root directory, one L1 index block plus
        // its first leaf (k=10) committed by an earlier write, leaving
        // exactly one free block — just enough for a second write's first
        // new leaf (k=11) before its second (k=12) hits NoSpace.
        let mut fs = FileSystem::mkfs(MemStorage::new(6), 1).unwrap();
        fs.mknod("/a").unwrap();
        let id = fs.path2iid("/a").unwrap();
        fs.write(id, &[0u8], 10 * BLOCK_SIZE as u64).unwrap();
        let l1 = fs.im.read_inode(&mut fs.storage, id).unwrap().p_block[10];
        assert_ne!(l1, 0);

        let buf = [1u8; 2 * BLOCK_SIZE];
        let err = fs.write(id, &buf, 11 * BLOCK_SIZE as u64);
        assert_eq!(err, Err(Error::NoSpace));

        // The rolled-back write must not leave slot 1 of the L1 index
        // block wired to a leaf id that was freed back out from under it.
        let inode = fs.im.read_inode(&mut fs.storage, id).unwrap();
        assert_eq!(translate::resolve(&inode, &mut fs.storage, 11).unwrap(), None);
        assert_reachable_plus_free_covers_all_data_blocks(&mut fs);
    }

    #[test]
    fn utimens_sets_full_resolution_atime_and_mtime() {
        let mut fs = fresh();
        fs.mknod("/a").unwrap();
        let id = fs.path2iid("/a").unwrap();
        fs.utimens(id, Some(123_456_789), Some(987_654_321)).unwrap();
        let attr = fs.getattr(id).unwrap();
        assert_eq!(attr.atime_ns, 123_456_789);
        assert_eq!(attr.mtime_ns, 987_654_321);
    }

    #[test]
    fn no_space_on_full_inode_table_does_not_corrupt_parent() {
        // A tiny image: NI=1 block -> 16 inodes, one used by root.
        let mut fs = FileSystem::mkfs(MemStorage::new(40), 1).unwrap();
        let cap = (BLOCK_SIZE / crate::inode::INODE_SIZE) - 1;
        for i in 0..cap {
            fs.mknod(&format!("/f{i}")).unwrap();
        }
        let before = fs.readdir(ROOT_INODE).unwrap();
        assert_eq!(fs.mknod("/overflow"), Err(Error::NoSpace));
        let after = fs.readdir(ROOT_INODE).unwrap();
        assert_eq!(before, after, "failed mknod must not leave a dangling entry");
    }

    fn assert_reachable_plus_free_covers_all_data_blocks(fs: &mut FileSystem<MemStorage>) {
        let sb = fs.sb;
        let mut reachable = HashSet::new();
        collect_reachable(fs, ROOT_INODE, &mut reachable);
        let mut free = HashSet::new();
        let mut head = fs.bm.head;
        while head != 0 {
            let mut buf = [0u8; BLOCK_SIZE];
            fs.storage.read_block(head, &mut buf).unwrap();
            let count = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
            let next = u64::from_le_bytes(buf[8..16].try_into().unwrap());
            assert!(free.insert(head));
            for i in 0..count {
                let off = 16 + i * 8;
                let id = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
                assert!(free.insert(id), "block {id} free-listed twice");
            }
            head = next;
        }
        for id in &reachable {
            assert!(!free.contains(id), "block {id} both reachable and free");
        }
        let union: HashSet<u64> = reachable.union(&free).cloned().collect();
        let expected: HashSet<u64> = (sb.s_dblock..sb.nr_block).collect();
        assert_eq!(union, expected);
    }

    fn collect_reachable(fs: &mut FileSystem<MemStorage>, id: InodeId, out: &mut HashSet<BlockId>) {
        let inode = fs.im.read_inode(&mut fs.storage, id).unwrap();
        if inode.itype == InodeType::Free {
            return;
        }
        for &d in inode.p_block[..10].iter().filter(|&&x| x != 0) {
            out.insert(d);
        }
        collect_index_blocks(&inode, fs, out);
        if inode.itype == InodeType::Directory {
            if let Ok(dir) = fs.read_directory(id) {
                for (name, child) in dir.iter() {
                    if name != "." && name != ".." {
                        collect_reachable(fs, *child, out);
                    }
                }
            }
        }
    }

    fn collect_index_blocks(inode: &Inode, fs: &mut FileSystem<MemStorage>, out: &mut HashSet<BlockId>) {
        // Walk every index level directly so interior index blocks (which
        // a purely per-leaf `resolve` walk over `0..block` would miss once
        // the file has holes) are counted as reachable too.
        let read_arr = |fs: &mut FileSystem<MemStorage>, id: BlockId| -> Vec<u64> {
            let mut buf = [0u8; BLOCK_SIZE];
            fs.storage.read_block(id, &mut buf).unwrap();
            (0..BLOCK_SIZE / 8)
                .map(|i| u64::from_le_bytes(buf[i * 8..i * 8 + 8].try_into().unwrap()))
                .collect()
        };
        if inode.p_block[10] != 0 {
            out.insert(inode.p_block[10]);
            for &leaf in read_arr(fs, inode.p_block[10]).iter().filter(|&&x| x != 0) {
                out.insert(leaf);
            }
        }
        if inode.p_block[11] != 0 {
            out.insert(inode.p_block[11]);
            for &l1 in read_arr(fs, inode.p_block[11]).iter().filter(|&&x| x != 0) {
                out.insert(l1);
                for &leaf in read_arr(fs, l1).iter().filter(|&&x| x != 0) {
                    out.insert(leaf);
                }
            }
        }
        if inode.p_block[12] != 0 {
            out.insert(inode.p_block[12]);
            for &l2 in read_arr(fs, inode.p_block[12]).iter().filter(|&&x| x != 0) {
                out.insert(l2);
                for &l1 in read_arr(fs, l2).iter().filter(|&&x| x != 0) {
                    out.insert(l1);
                    for &leaf in read_arr(fs, l1).iter().filter(|&&x| x != 0) {
                        out.insert(leaf);
                    }
                }
            }
        }
    }
}
