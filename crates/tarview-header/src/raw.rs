//! Fixed-layout header structs.
//!
//! These are direct `#[repr(C)]` images of the on-disk byte layouts, derived
//! with [`zerocopy`] so a 512-byte block can be viewed without copying. All
//! interpretation (octal decoding, NUL truncation) happens elsewhere.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// The `ustar` (POSIX.1-1988) header layout.
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct UstarHeader {
    /// Member path (NUL-terminated if shorter than 100 bytes).
    pub name: [u8; 100],
    /// Permission bits, octal ASCII.
    pub mode: [u8; 8],
    /// Owner user id, octal ASCII.
    pub uid: [u8; 8],
    /// Owner group id, octal ASCII.
    pub gid: [u8; 8],
    /// Data region size, octal ASCII.
    pub size: [u8; 12],
    /// Modification time, octal ASCII seconds since the epoch.
    pub mtime: [u8; 12],
    /// Block checksum, octal ASCII.
    pub checksum: [u8; 8],
    /// Entry typeflag byte.
    pub typeflag: u8,
    /// Link target for hard and symbolic links.
    pub linkname: [u8; 100],
    /// `"ustar\0"` (POSIX) or `"ustar "` (GNU).
    pub magic: [u8; 6],
    /// `"00"` (POSIX) or blank (GNU).
    pub version: [u8; 2],
    /// Owner user name.
    pub uname: [u8; 32],
    /// Owner group name.
    pub gname: [u8; 32],
    /// Device major number, octal ASCII.
    pub devmajor: [u8; 8],
    /// Device minor number, octal ASCII.
    pub devminor: [u8; 8],
    /// Path prefix for long member paths.
    pub prefix: [u8; 155],
    /// Trailing padding to 512 bytes.
    pub pad: [u8; 12],
}

/// One GNU sparse descriptor: a 12-byte octal offset and a 12-byte octal
/// length describing a stored data run.
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct GnuSparseDescriptor {
    /// Byte offset of the run within the logical file.
    pub offset: [u8; 12],
    /// Length of the run in bytes.
    pub numbytes: [u8; 12],
}

/// The GNU header layout: identical to `ustar` up to the magic region, with
/// the prefix area reused for timestamps and the in-header sparse map.
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct GnuHeader {
    /// Member path (NUL-terminated if shorter than 100 bytes).
    pub name: [u8; 100],
    /// Permission bits, octal ASCII.
    pub mode: [u8; 8],
    /// Owner user id, octal ASCII.
    pub uid: [u8; 8],
    /// Owner group id, octal ASCII.
    pub gid: [u8; 8],
    /// Stored data size, octal ASCII. For sparse members this is the byte
    /// count physically present in the archive, not the logical file size.
    pub size: [u8; 12],
    /// Modification time, octal ASCII seconds since the epoch.
    pub mtime: [u8; 12],
    /// Block checksum, octal ASCII.
    pub checksum: [u8; 8],
    /// Entry typeflag byte.
    pub typeflag: u8,
    /// Link target for hard and symbolic links.
    pub linkname: [u8; 100],
    /// `"ustar "`.
    pub magic: [u8; 6],
    /// Blank version field.
    pub version: [u8; 2],
    /// Owner user name.
    pub uname: [u8; 32],
    /// Owner group name.
    pub gname: [u8; 32],
    /// Device major number, octal ASCII.
    pub devmajor: [u8; 8],
    /// Device minor number, octal ASCII.
    pub devminor: [u8; 8],
    /// Access time, octal ASCII.
    pub atime: [u8; 12],
    /// Change time, octal ASCII.
    pub ctime: [u8; 12],
    /// Multi-volume continuation offset.
    pub offset: [u8; 12],
    /// Deprecated long-names field.
    pub longnames: [u8; 4],
    /// Unused byte.
    pub unused: u8,
    /// In-header sparse map: up to four data runs starting at offset 386.
    pub sparse: [GnuSparseDescriptor; 4],
    /// `'1'` when extension sparse blocks follow the header.
    pub isextended: u8,
    /// Logical file size of a sparse member, octal ASCII.
    pub realsize: [u8; 12],
    /// Trailing padding to 512 bytes.
    pub pad: [u8; 17],
}

/// A GNU sparse extension block: 21 further descriptors plus a continuation
/// byte, filling exactly one 512-byte block.
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct GnuExtSparseBlock {
    /// Sparse data runs.
    pub sparse: [GnuSparseDescriptor; 21],
    /// `'1'` when yet another extension block follows.
    pub isextended: u8,
    /// Trailing padding to 512 bytes.
    pub pad: [u8; 7],
}

impl GnuExtSparseBlock {
    /// Reinterpret a block as an extension sparse block without copying.
    #[must_use]
    pub fn from_block(block: &[u8; 512]) -> &Self {
        Self::ref_from_bytes(block).expect("block is exactly one extension block")
    }
}
