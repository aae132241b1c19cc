//! Directory content codec: a directory's bytes (as addressed through the
//! ordinary byte-I/O path) are a tightly packed stream of
//! `(name_len: u16, name: [u8; name_len], inode_id: u32)` tuples, in
//! insertion order, per `spec.md` §3/§4.4/§6. `.` and `..` are always the
//! first two entries.

use crate::error::{Error, Result};
use crate::inode::InodeId;

/// In-memory decoded form of a directory's entry stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    entries: Vec<(String, InodeId)>,
}

impl Directory {
    /// A fresh directory for inode `self_id` whose parent is `parent_id`
    /// (the root directory passes its own id for both).
    pub fn new(self_id: InodeId, parent_id: InodeId) -> Self {
        Self {
            entries: vec![(".".to_string(), self_id), ("..".to_string(), parent_id)],
        }
    }

    /// Number of entries, including `.`/`..`.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the directory holds nothing but `.`/`..`.
    pub fn is_empty_of_children(&self) -> bool {
        self.entries.len() <= 2
    }

    /// Iterate `(name, inode_id)` pairs in on-disk order.
    pub fn iter(&self) -> impl Iterator<Item = &(String, InodeId)> {
        self.entries.iter()
    }

    /// Look up `name`, failing with [`Error::NotFound`] if absent.
    pub fn get_entry(&self, name: &str) -> Result<InodeId> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
            .ok_or(Error::NotFound)
    }

    /// Add `(name, id)`, failing with [`Error::Exists`] on a duplicate
    /// name.
    pub fn add_entry(&mut self, name: &str, id: InodeId) -> Result<()> {
        if self.entries.iter().any(|(n, _)| n == name) {
            return Err(Error::Exists);
        }
        self.entries.push((name.to_string(), id));
        Ok(())
    }

    /// Remove `name`, returning the inode id it mapped to, or
    /// [`Error::NotFound`] if absent.
    pub fn remove_entry(&mut self, name: &str) -> Result<InodeId> {
        let pos = self
            .entries
            .iter()
            .position(|(n, _)| n == name)
            .ok_or(Error::NotFound)?;
        Ok(self.entries.remove(pos).1)
    }

    /// Encode to the on-disk tuple stream.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for (name, id) in &self.entries {
            let bytes = name.as_bytes();
            buf.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
            buf.extend_from_slice(bytes);
            buf.extend_from_slice(&id.to_le_bytes());
        }
        buf
    }

    /// Decode from the on-disk tuple stream. `spec.md` §9 treats malformed
    /// source bytes as filesystem corruption rather than a recoverable
    /// condition, hence [`Error::Corrupt`] rather than silently truncating.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut pos = 0usize;
        while pos < bytes.len() {
            if pos + 2 > bytes.len() {
                return Err(Error::Corrupt("truncated directory entry header"));
            }
            let name_len = u16::from_le_bytes(bytes[pos..pos + 2].try_into().unwrap()) as usize;
            pos += 2;
            if pos + name_len + 4 > bytes.len() {
                return Err(Error::Corrupt("truncated directory entry body"));
            }
            let name = std::str::from_utf8(&bytes[pos..pos + name_len])
                .map_err(|_| Error::Corrupt("directory entry name is not valid utf-8"))?
                .to_string();
            pos += name_len;
            let id = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
            pos += 4;
            entries.push((name, id));
        }
        Ok(Self { entries })
    }
}
