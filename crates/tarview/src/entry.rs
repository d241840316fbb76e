//! A logical archive entry and its lazy data accessor.

use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;

use tarview_header::EntryType;

use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::reader::ReaderCore;
use crate::source::MapBuffer;

/// How an entry's bytes are backed.
///
/// Mapped archives hand out spans (zero-copy, random access, valid for the
/// entry's whole lifetime). Streamed archives hand out a pull handle into
/// the shared stream, tagged with the reader slot it was minted for so a
/// stale entry is rejected instead of silently reading another entry's
/// bytes.
pub(crate) enum DataSource {
    /// No data region (directories, links, devices, FIFOs).
    None,
    /// A slice of the mapped archive covering the stored data region.
    Span {
        buf: Rc<MapBuffer>,
        start: usize,
        len: usize,
    },
    /// Sequential access through the shared stream.
    Pull {
        core: Rc<RefCell<ReaderCore>>,
        serial: u64,
    },
}

/// One logical member of an archive: resolved metadata plus lazy access to
/// its content.
///
/// For streamed archives the content may only be read while the entry is
/// the reader's current one; advancing the reader invalidates the data
/// accessor (reads then fail with [`Error::InvalidOperation`]). Entries
/// from memory-mapped archives stay readable after advancing.
pub struct Entry {
    metadata: Metadata,
    data: DataSource,
}

impl Entry {
    pub(crate) fn new(metadata: Metadata, data: DataSource) -> Self {
        Self { metadata, data }
    }

    /// The canonical metadata record.
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Consume the entry, keeping only its metadata.
    #[must_use]
    pub fn into_metadata(self) -> Metadata {
        self.metadata
    }

    /// The member path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.metadata.path
    }

    /// The logical content size (the real size for sparse members).
    #[must_use]
    pub fn size(&self) -> u64 {
        self.metadata.size
    }

    /// The entry classification.
    #[must_use]
    pub fn entry_type(&self) -> EntryType {
        self.metadata.entry_type
    }

    /// Read up to `length` bytes of the entry's logical content starting at
    /// `offset`, clamped to the content size.
    ///
    /// Sparse holes read as zeroes. Mapped non-sparse entries borrow
    /// directly from the mapping; everything else returns owned bytes.
    /// Streamed entries only support forward progress: an `offset` behind
    /// what was already consumed is rejected.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidOperation`] for non-file entries, stale streamed
    /// entries, or backwards streamed reads; [`Error::CorruptArchive`] when
    /// the archive ends inside the declared data region.
    pub fn read_data(&self, offset: u64, length: u64) -> Result<Cow<'_, [u8]>> {
        if !self.metadata.is_file() {
            return Err(Error::InvalidOperation(format!(
                "cannot read data from {:?} entry {:?}",
                self.metadata.entry_type,
                self.path()
            )));
        }

        if let Some(map) = &self.metadata.sparse {
            let out = match &self.data {
                DataSource::Span { buf, start, len } => {
                    let stored = &buf.as_slice()[*start..*start + *len];
                    map.read_logical(offset, length, &mut |stored_off, out| {
                        let from = usize::try_from(stored_off).ok();
                        let to = from.and_then(|f| f.checked_add(out.len()));
                        match (from, to) {
                            (Some(from), Some(to)) if to <= stored.len() => {
                                out.copy_from_slice(&stored[from..to]);
                                Ok(())
                            }
                            _ => Err(Error::CorruptArchive(
                                "sparse segment lies outside the stored data region".into(),
                            )),
                        }
                    })?
                }
                DataSource::Pull { core, serial } => {
                    map.read_logical(offset, length, &mut |stored_off, out| {
                        core.borrow_mut().pull_fetch(*serial, stored_off, out)
                    })?
                }
                DataSource::None => {
                    return Err(Error::InvalidOperation(
                        "sparse entry has no data source".into(),
                    ))
                }
            };
            return Ok(Cow::Owned(out));
        }

        match &self.data {
            DataSource::None => Err(Error::InvalidOperation(format!(
                "entry {:?} has no data region",
                self.path()
            ))),
            DataSource::Span { buf, start, len } => {
                let stored = &buf.as_slice()[*start..*start + *len];
                let from = offset.min(*len as u64) as usize;
                let to = offset.saturating_add(length).min(*len as u64) as usize;
                Ok(Cow::Borrowed(&stored[from..to]))
            }
            DataSource::Pull { core, serial } => Ok(Cow::Owned(
                core.borrow_mut().pull_read(*serial, offset, length)?,
            )),
        }
    }

    /// Drain the entry's whole logical content into `sink`, returning the
    /// byte count written. Sparse holes are written as zeroes.
    ///
    /// # Errors
    ///
    /// As for [`read_data`](Self::read_data), plus any write error from the
    /// sink.
    pub fn copy_data_to(&self, sink: &mut dyn Write) -> Result<u64> {
        const CHUNK: u64 = 64 * 1024;

        let total = self.size();
        let mut written = 0u64;
        while written < total {
            let chunk = self.read_data(written, CHUNK.min(total - written))?;
            if chunk.is_empty() {
                return Err(Error::CorruptArchive(format!(
                    "entry data ended at {written} of {total} bytes"
                )));
            }
            sink.write_all(&chunk)?;
            written += chunk.len() as u64;
        }
        Ok(written)
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("path", &self.metadata.path)
            .field("entry_type", &self.metadata.entry_type)
            .field("size", &self.metadata.size)
            .field("sparse", &self.metadata.is_sparse())
            .finish_non_exhaustive()
    }
}
