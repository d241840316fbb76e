//! The canonical per-entry metadata record.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::path::PathBuf;

use tarview_header::EntryType;

use crate::acl::AclEntry;
use crate::sparse::SparseMap;

/// Everything the reader knows about one logical entry once all prefix
/// records have been applied.
///
/// `size` is the logical byte count a consumer sees: for sparse members it
/// is the real file size, not the (smaller) stored byte count.
#[derive(Debug)]
pub struct Metadata {
    /// Member path, composed from `prefix`/`name` or overridden by a GNU
    /// long-name record or PAX `path`.
    pub path: PathBuf,
    /// Entry classification. Never a prefix-record type; GNU `'S'` entries
    /// are normalised to [`EntryType::Regular`].
    pub entry_type: EntryType,
    /// Permission bits (low 12 bits of the mode field).
    pub mode: u32,
    /// Owner user id.
    pub uid: u64,
    /// Owner group id.
    pub gid: u64,
    /// Logical content size in bytes.
    pub size: u64,
    /// Modification time, seconds since the epoch.
    pub mtime: u64,
    /// Owner user name.
    pub uname: OsString,
    /// Owner group name.
    pub gname: OsString,
    /// Target of a hard or symbolic link.
    pub link_target: Option<PathBuf>,
    /// Device major/minor numbers. Only present for device entries.
    pub device: Option<(u32, u32)>,
    /// Sparse map, when the member is a GNU sparse file.
    pub sparse: Option<SparseMap>,
    /// Extended attributes from PAX `SCHILY.xattr.` / `LIBARCHIVE.xattr.`
    /// records, ordered by key.
    pub xattrs: BTreeMap<OsString, Vec<u8>>,
    /// Access ACL from `SCHILY.acl.access`.
    pub access_acl: Vec<AclEntry>,
    /// Default ACL from `SCHILY.acl.default`.
    pub default_acl: Vec<AclEntry>,
}

impl Metadata {
    /// True for regular and contiguous files.
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.entry_type.is_file()
    }

    /// True for directories.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.entry_type == EntryType::Directory
    }

    /// True for symbolic links.
    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.entry_type == EntryType::Symlink
    }

    /// True for hard links.
    #[must_use]
    pub fn is_hard_link(&self) -> bool {
        self.entry_type == EntryType::HardLink
    }

    /// True for character and block devices.
    #[must_use]
    pub fn is_device(&self) -> bool {
        self.entry_type.is_device()
    }

    /// True when a sparse map is attached.
    #[must_use]
    pub fn is_sparse(&self) -> bool {
        self.sparse.is_some()
    }

    /// True when any extended attributes are attached.
    #[must_use]
    pub fn has_xattrs(&self) -> bool {
        !self.xattrs.is_empty()
    }

    /// True when either ACL list is non-empty.
    #[must_use]
    pub fn has_acls(&self) -> bool {
        !self.access_acl.is_empty() || !self.default_acl.is_empty()
    }
}

/// Convert raw archive path bytes into a `PathBuf` without assuming UTF-8.
pub(crate) fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    PathBuf::from(OsString::from_vec(bytes))
}
