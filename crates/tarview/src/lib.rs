//! Read-only access to POSIX `ustar` archives.
//!
//! `tarview` decodes the `ustar` format plus the extensions real-world
//! archives rely on: GNU long-name/long-link records, PAX extended headers
//! (path/size/owner overrides, extended attributes, POSIX ACLs), and GNU
//! sparse files in both the 0.x in-header and 1.0 data-block variants.
//! Prefix records are consumed transparently; iteration yields one logical
//! [`Entry`] per real member, carrying a canonical [`Metadata`] record and
//! lazy access to the member's bytes.
//!
//! # Backings
//!
//! An archive can be read three ways:
//!
//! - [`Archive::open`]: buffered file I/O, sequential entry data access.
//! - [`Archive::open_mapped`]: a private read-only memory mapping; entry
//!   data becomes zero-copy, random-access, and stays valid after the
//!   reader advances.
//! - [`Archive::from_reader`] / [`Archive::from_source`]: any sequential
//!   byte stream, e.g. a pipe or a decompressor.
//!
//! In the streaming backings an entry's data may only be read while the
//! entry is current; the reader tracks what was consumed and skips the
//! rest (plus block padding) when advancing.
//!
//! # Example
//!
//! ```no_run
//! use tarview::Archive;
//!
//! let mut archive = Archive::open("backup.tar")?;
//! for entry in archive.entries() {
//!     let entry = entry?;
//!     let meta = entry.metadata();
//!     println!("{} {:o} {}", entry.path().display(), meta.mode, meta.size);
//!     if meta.is_file() {
//!         let head = entry.read_data(0, 16)?;
//!         println!("  starts with {:?}", head);
//!     }
//! }
//! # Ok::<(), tarview::Error>(())
//! ```
//!
//! # Errors and recovery
//!
//! The reader does not resynchronise after damage: a bad magic, checksum
//! mismatch, framing violation or truncation ends iteration, and
//! [`Archive::errored`] distinguishes that from a clean end of archive.
//! Skipping a corrupt record would risk misreading later bytes as headers.

mod acl;
mod entry;
mod error;
mod extract;
mod metadata;
mod pax;
mod reader;
mod source;
mod sparse;

pub use acl::{AclEntry, AclPerms, AclTag};
pub use entry::Entry;
pub use error::{Error, Result};
pub use extract::safe_join;
pub use metadata::Metadata;
pub use reader::{Archive, Entries};
pub use source::{ByteSource, FileSource, MappedSource, ReadSource, SeekableSource};
pub use sparse::{SparseMap, SparseSegment};

pub use tarview_header::{EntryType, Format};
