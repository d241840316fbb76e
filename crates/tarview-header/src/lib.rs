//! Raw block layer for POSIX `ustar` archives.
//!
//! This crate deals with the fixed 512-byte blocks a tar archive is made of:
//! typed [`zerocopy`] views over the header layouts, decoding of the
//! NUL/space-padded octal fields, checksum verification, and the PAX
//! `len key=value\n` record framing. It performs no I/O and keeps no state;
//! the streaming interpretation of an archive (GNU/PAX prefix records,
//! sparse maps, entry data regions) lives in the `tarview` crate on top.
//!
//! # Header layouts
//!
//! Every header block is 512 bytes. The classic fields (offsets 0-156) are
//! common to all dialects:
//!
//! | Offset | Size | Field     |
//! |--------|------|-----------|
//! | 0      | 100  | name      |
//! | 100    | 8    | mode      |
//! | 108    | 8    | uid       |
//! | 116    | 8    | gid       |
//! | 124    | 12   | size      |
//! | 136    | 12   | mtime     |
//! | 148    | 8    | checksum  |
//! | 156    | 1    | typeflag  |
//! | 157    | 100  | linkname  |
//!
//! The `ustar` extension (offsets 257-500) adds `magic`/`version`, owner
//! names, device numbers and a 155-byte path `prefix`. The GNU dialect keeps
//! the same magic region (with `"ustar "` instead of `"ustar\0"`) but
//! repurposes the prefix area for timestamps and the in-header sparse map:
//! four 24-byte `(offset, numbytes)` descriptors at offset 386, an
//! `isextended` continuation byte at 482 and a 12-byte `realsize` at 483.
//!
//! # Example
//!
//! ```
//! use tarview_header::{Header, EntryType, Format};
//!
//! let mut block = [0u8; 512];
//! block[257..263].copy_from_slice(b"ustar\0");
//! block[263..265].copy_from_slice(b"00");
//!
//! let header = Header::from_block(&block);
//! assert_eq!(header.format().unwrap(), Format::Ustar);
//! assert_eq!(header.entry_type(), EntryType::Regular);
//! ```

mod field;
mod pax;
mod raw;

pub use field::{parse_numeric, parse_octal, trim_field, truncate_nul};
pub use pax::{PaxError, PaxRecord, PaxRecords};
pub use raw::{GnuExtSparseBlock, GnuHeader, GnuSparseDescriptor, UstarHeader};

use std::fmt;

use thiserror::Error;
use zerocopy::{FromBytes, Immutable, KnownLayout};

/// Size of a tar block in bytes. Headers, sparse extension blocks and data
/// region framing are all expressed in this unit.
pub const BLOCK_SIZE: usize = 512;

/// Byte offset of the magic field inside a header block.
pub const MAGIC_OFFSET: usize = 257;

/// Errors produced by the block layer.
#[derive(Debug, Error)]
pub enum HeaderError {
    /// The magic region holds neither `"ustar\0"` nor the GNU `"ustar "`.
    #[error("not a ustar or GNU tar header (magic: {:?})", String::from_utf8_lossy(.0))]
    BadMagic(Vec<u8>),

    /// The version field is neither `"00"` nor blank.
    #[error("unsupported tar header version {:?}", String::from_utf8_lossy(.0))]
    BadVersion(Vec<u8>),

    /// A numeric field is not valid padded octal (or overflows u64).
    #[error("invalid octal field {:?}", String::from_utf8_lossy(.0))]
    InvalidOctal(Vec<u8>),

    /// The stored checksum does not match the sum of the block bytes.
    #[error("header checksum mismatch: stored {stored}, computed {computed}")]
    ChecksumMismatch {
        /// Value decoded from the checksum field.
        stored: u64,
        /// Sum recomputed over the block.
        computed: u64,
    },
}

/// Result alias for block-layer operations.
pub type Result<T> = std::result::Result<T, HeaderError>;

/// Archive dialect recognised from the magic/version region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// POSIX `ustar` (`"ustar\0"` + `"00"`).
    Ustar,
    /// Historical GNU tar (`"ustar "` + blank version).
    Gnu,
}

/// Entry classification from the typeflag byte.
///
/// The first eight variants describe what kind of filesystem object a record
/// stands for. The remaining ones are record-level markers: GNU and PAX
/// prefix records that modify the following real record, and the GNU
/// volume/multi-volume records a reader skips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    /// Regular file (`'0'`, or NUL in pre-POSIX archives).
    Regular,
    /// Hard link to an earlier member (`'1'`).
    HardLink,
    /// Symbolic link (`'2'`).
    Symlink,
    /// Character device (`'3'`).
    CharDevice,
    /// Block device (`'4'`).
    BlockDevice,
    /// Directory (`'5'`).
    Directory,
    /// FIFO special file (`'6'`).
    Fifo,
    /// Contiguous file (`'7'`), treated like a regular file.
    Contiguous,
    /// GNU long-name prefix record (`'L'`).
    GnuLongName,
    /// GNU long-link prefix record (`'K'`).
    GnuLongLink,
    /// GNU sparse file (`'S'`).
    GnuSparse,
    /// GNU volume header (`'V'`).
    GnuVolumeHeader,
    /// GNU multi-volume continuation (`'M'`).
    GnuMultiVolume,
    /// PAX extended header for the next record (`'x'`).
    PaxExtended,
    /// PAX global extended header (`'g'`).
    PaxGlobal,
    /// Any other typeflag byte.
    Unknown(u8),
}

impl EntryType {
    /// Classify a raw typeflag byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            b'0' | b'\0' => EntryType::Regular,
            b'1' => EntryType::HardLink,
            b'2' => EntryType::Symlink,
            b'3' => EntryType::CharDevice,
            b'4' => EntryType::BlockDevice,
            b'5' => EntryType::Directory,
            b'6' => EntryType::Fifo,
            b'7' => EntryType::Contiguous,
            b'L' => EntryType::GnuLongName,
            b'K' => EntryType::GnuLongLink,
            b'S' => EntryType::GnuSparse,
            b'V' => EntryType::GnuVolumeHeader,
            b'M' => EntryType::GnuMultiVolume,
            b'x' => EntryType::PaxExtended,
            b'g' => EntryType::PaxGlobal,
            other => EntryType::Unknown(other),
        }
    }

    /// The canonical typeflag byte for this classification.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            EntryType::Regular => b'0',
            EntryType::HardLink => b'1',
            EntryType::Symlink => b'2',
            EntryType::CharDevice => b'3',
            EntryType::BlockDevice => b'4',
            EntryType::Directory => b'5',
            EntryType::Fifo => b'6',
            EntryType::Contiguous => b'7',
            EntryType::GnuLongName => b'L',
            EntryType::GnuLongLink => b'K',
            EntryType::GnuSparse => b'S',
            EntryType::GnuVolumeHeader => b'V',
            EntryType::GnuMultiVolume => b'M',
            EntryType::PaxExtended => b'x',
            EntryType::PaxGlobal => b'g',
            EntryType::Unknown(b) => b,
        }
    }

    /// True for regular and contiguous files.
    #[must_use]
    pub fn is_file(self) -> bool {
        matches!(self, EntryType::Regular | EntryType::Contiguous)
    }

    /// True for character and block devices.
    #[must_use]
    pub fn is_device(self) -> bool {
        matches!(self, EntryType::CharDevice | EntryType::BlockDevice)
    }

    /// True for hard and symbolic links.
    #[must_use]
    pub fn is_link(self) -> bool {
        matches!(self, EntryType::HardLink | EntryType::Symlink)
    }

    /// True for records that carry metadata for a following real record or
    /// are otherwise consumed inside the reader loop (GNU `L`/`K`/`S`/`V`/`M`
    /// and PAX `x`/`g`).
    #[must_use]
    pub fn is_meta_record(self) -> bool {
        matches!(
            self,
            EntryType::GnuLongName
                | EntryType::GnuLongLink
                | EntryType::GnuSparse
                | EntryType::GnuVolumeHeader
                | EntryType::GnuMultiVolume
                | EntryType::PaxExtended
                | EntryType::PaxGlobal
        )
    }
}

impl From<u8> for EntryType {
    fn from(byte: u8) -> Self {
        Self::from_byte(byte)
    }
}

/// Compute the checksum of a header block: the unsigned sum of all 512
/// bytes, with the eight checksum bytes (offsets 148-155) read as spaces.
#[must_use]
pub fn compute_checksum(block: &[u8; BLOCK_SIZE]) -> u64 {
    let mut sum: u64 = 0;
    for (i, &byte) in block.iter().enumerate() {
        if (148..156).contains(&i) {
            sum += u64::from(b' ');
        } else {
            sum += u64::from(byte);
        }
    }
    sum
}

/// True when every byte of the block is NUL. Two consecutive zero blocks
/// terminate an archive.
#[must_use]
pub fn is_zero_block(block: &[u8; BLOCK_SIZE]) -> bool {
    block.iter().all(|&b| b == 0)
}

/// Typed read-only view over a 512-byte header block.
///
/// `Header` adds field decoding on top of a raw block: dialect detection,
/// checksum verification and typed accessors for the numeric and string
/// fields. It is a transparent wrapper, so a `&[u8; 512]` converts to a
/// `&Header` without copying.
#[derive(FromBytes, Immutable, KnownLayout)]
#[repr(transparent)]
pub struct Header {
    bytes: [u8; BLOCK_SIZE],
}

impl Header {
    /// Reinterpret a block as a header without copying.
    #[must_use]
    pub fn from_block(block: &[u8; BLOCK_SIZE]) -> &Header {
        Header::ref_from_bytes(block).expect("block is exactly one header")
    }

    /// The underlying block bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.bytes
    }

    /// View the block through the `ustar` field layout.
    #[must_use]
    pub fn as_ustar(&self) -> &UstarHeader {
        UstarHeader::ref_from_bytes(&self.bytes).expect("size is correct")
    }

    /// View the block through the GNU field layout (sparse map area).
    #[must_use]
    pub fn as_gnu(&self) -> &GnuHeader {
        GnuHeader::ref_from_bytes(&self.bytes).expect("size is correct")
    }

    /// Identify the archive dialect from the magic and version regions.
    ///
    /// # Errors
    ///
    /// [`HeaderError::BadMagic`] when the magic is neither `"ustar\0"` nor
    /// `"ustar "`, [`HeaderError::BadVersion`] when the version field is
    /// neither `"00"` nor blank.
    pub fn format(&self) -> Result<Format> {
        let ustar = self.as_ustar();
        if &ustar.magic[..5] != b"ustar" {
            return Err(HeaderError::BadMagic(ustar.magic.to_vec()));
        }
        let format = match ustar.magic[5] {
            0 => Format::Ustar,
            b' ' => Format::Gnu,
            _ => return Err(HeaderError::BadMagic(ustar.magic.to_vec())),
        };
        // "00" for POSIX, " \0" or "  " for GNU writers.
        if ustar.version != *b"00" && ustar.version.iter().any(|&b| b != b' ' && b != 0) {
            return Err(HeaderError::BadVersion(ustar.version.to_vec()));
        }
        Ok(format)
    }

    /// Verify the stored checksum against [`compute_checksum`].
    ///
    /// # Errors
    ///
    /// [`HeaderError::InvalidOctal`] if the checksum field does not decode,
    /// [`HeaderError::ChecksumMismatch`] if the values disagree.
    pub fn verify_checksum(&self) -> Result<()> {
        let stored = parse_octal(&self.as_ustar().checksum)?;
        let computed = compute_checksum(&self.bytes);
        if stored == computed {
            Ok(())
        } else {
            Err(HeaderError::ChecksumMismatch { stored, computed })
        }
    }

    /// The typeflag classification.
    #[must_use]
    pub fn entry_type(&self) -> EntryType {
        EntryType::from_byte(self.as_ustar().typeflag)
    }

    /// Declared size of the data region following this header.
    pub fn size(&self) -> Result<u64> {
        parse_numeric(&self.as_ustar().size)
    }

    /// Permission bits (the full mode field; callers mask as needed).
    pub fn mode(&self) -> Result<u32> {
        parse_numeric(&self.as_ustar().mode).map(|v| v as u32)
    }

    /// Owner user id.
    pub fn uid(&self) -> Result<u64> {
        parse_numeric(&self.as_ustar().uid)
    }

    /// Owner group id.
    pub fn gid(&self) -> Result<u64> {
        parse_numeric(&self.as_ustar().gid)
    }

    /// Modification time, seconds since the epoch.
    pub fn mtime(&self) -> Result<u64> {
        parse_numeric(&self.as_ustar().mtime)
    }

    /// Device major number. Only meaningful for device entries.
    pub fn dev_major(&self) -> Result<u32> {
        parse_octal(&self.as_ustar().devmajor).map(|v| v as u32)
    }

    /// Device minor number. Only meaningful for device entries.
    pub fn dev_minor(&self) -> Result<u32> {
        parse_octal(&self.as_ustar().devminor).map(|v| v as u32)
    }

    /// The name field up to its NUL terminator.
    #[must_use]
    pub fn name_bytes(&self) -> &[u8] {
        truncate_nul(&self.as_ustar().name)
    }

    /// The linkname field up to its NUL terminator.
    #[must_use]
    pub fn linkname_bytes(&self) -> &[u8] {
        truncate_nul(&self.as_ustar().linkname)
    }

    /// Owner user name.
    #[must_use]
    pub fn uname_bytes(&self) -> &[u8] {
        truncate_nul(&self.as_ustar().uname)
    }

    /// Owner group name.
    #[must_use]
    pub fn gname_bytes(&self) -> &[u8] {
        truncate_nul(&self.as_ustar().gname)
    }

    /// The `ustar` path prefix. Empty for the GNU dialect, which reuses the
    /// prefix area for timestamps and the sparse map.
    #[must_use]
    pub fn prefix_bytes(&self, format: Format) -> &[u8] {
        match format {
            Format::Ustar => truncate_nul(&self.as_ustar().prefix),
            Format::Gnu => &[],
        }
    }

    /// Compose the member path from `prefix` and `name` per the `ustar`
    /// rules: `prefix + '/' + name` when the prefix is non-empty.
    #[must_use]
    pub fn path_bytes(&self, format: Format) -> Vec<u8> {
        let prefix = self.prefix_bytes(format);
        let name = self.name_bytes();
        if prefix.is_empty() {
            name.to_vec()
        } else {
            let mut path = Vec::with_capacity(prefix.len() + 1 + name.len());
            path.extend_from_slice(prefix);
            path.push(b'/');
            path.extend_from_slice(name);
            path
        }
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("name", &String::from_utf8_lossy(self.name_bytes()))
            .field("entry_type", &self.entry_type())
            .field("size", &self.size().ok())
            .field("format", &self.format().ok())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_ustar() -> [u8; BLOCK_SIZE] {
        let mut block = [0u8; BLOCK_SIZE];
        block[257..263].copy_from_slice(b"ustar\0");
        block[263..265].copy_from_slice(b"00");
        block
    }

    fn with_checksum(mut block: [u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
        let sum = compute_checksum(&block);
        let field = format!("{sum:06o}\0 ");
        block[148..156].copy_from_slice(field.as_bytes());
        block
    }

    #[test]
    fn format_detection() {
        let block = blank_ustar();
        assert_eq!(Header::from_block(&block).format().unwrap(), Format::Ustar);

        let mut gnu = blank_ustar();
        gnu[257..263].copy_from_slice(b"ustar ");
        gnu[263..265].copy_from_slice(b" \0");
        assert_eq!(Header::from_block(&gnu).format().unwrap(), Format::Gnu);

        let zeros = [0u8; BLOCK_SIZE];
        assert!(matches!(
            Header::from_block(&zeros).format(),
            Err(HeaderError::BadMagic(_))
        ));
    }

    #[test]
    fn bad_version_rejected() {
        let mut block = blank_ustar();
        block[263..265].copy_from_slice(b"99");
        assert!(matches!(
            Header::from_block(&block).format(),
            Err(HeaderError::BadVersion(_))
        ));
    }

    #[test]
    fn checksum_roundtrip() {
        let mut block = blank_ustar();
        block[..8].copy_from_slice(b"test.txt");
        block[124..136].copy_from_slice(b"00000000005\0");
        let block = with_checksum(block);

        let header = Header::from_block(&block);
        header.verify_checksum().unwrap();
        assert_eq!(header.size().unwrap(), 5);
        assert_eq!(header.name_bytes(), b"test.txt");
    }

    #[test]
    fn checksum_mismatch_detected() {
        let mut block = with_checksum(blank_ustar());
        block[0] = b'x'; // corrupt after summing
        assert!(matches!(
            Header::from_block(&block).verify_checksum(),
            Err(HeaderError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn path_composition_with_prefix() {
        let mut block = blank_ustar();
        block[..4].copy_from_slice(b"file");
        block[345..348].copy_from_slice(b"dir");
        let header = Header::from_block(&block);
        assert_eq!(header.path_bytes(Format::Ustar), b"dir/file");

        // The GNU dialect has no prefix field.
        assert_eq!(header.path_bytes(Format::Gnu), b"file");
    }

    #[test]
    fn entry_type_roundtrip() {
        for byte in [
            b'0', b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'L', b'K', b'S', b'V', b'M', b'x',
            b'g',
        ] {
            assert_eq!(EntryType::from_byte(byte).to_byte(), byte);
        }
        assert_eq!(EntryType::from_byte(0), EntryType::Regular);
        assert_eq!(EntryType::from_byte(b'Z'), EntryType::Unknown(b'Z'));
    }

    #[test]
    fn meta_record_classification() {
        assert!(EntryType::GnuLongName.is_meta_record());
        assert!(EntryType::PaxGlobal.is_meta_record());
        assert!(!EntryType::Regular.is_meta_record());
        assert!(!EntryType::Directory.is_meta_record());
        assert!(EntryType::CharDevice.is_device());
        assert!(EntryType::Contiguous.is_file());
    }

    #[test]
    fn crosscheck_with_tar_crate() {
        // A header produced by the tar crate must verify and decode here.
        let mut header = tar::Header::new_ustar();
        header.set_path("some/dir/name.txt").unwrap();
        header.set_size(1234);
        header.set_mode(0o644);
        header.set_uid(1000);
        header.set_gid(100);
        header.set_mtime(1234567890);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();

        let ours = Header::from_block(header.as_bytes());
        assert_eq!(ours.format().unwrap(), Format::Ustar);
        ours.verify_checksum().unwrap();
        assert_eq!(ours.size().unwrap(), 1234);
        assert_eq!(ours.mode().unwrap(), 0o644);
        assert_eq!(ours.uid().unwrap(), 1000);
        assert_eq!(ours.gid().unwrap(), 100);
        assert_eq!(ours.mtime().unwrap(), 1234567890);
        assert_eq!(ours.path_bytes(Format::Ustar), b"some/dir/name.txt");
    }

    #[test]
    fn zero_block_detection() {
        assert!(is_zero_block(&[0u8; BLOCK_SIZE]));
        assert!(!is_zero_block(&blank_ustar()));
    }
}
