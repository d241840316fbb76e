//! The archive state machine.
//!
//! [`Archive`] repeatedly reads a 512-byte block, classifies it, and either
//! consumes it as a prefix record (GNU `L`/`K`, PAX `x`/`g`, sparse
//! extension blocks), recognises end-of-archive (two zero blocks), or
//! produces a logical [`Entry`] whose data region remains in the stream.
//! Prefix-record contributions accumulate in a pending bundle that is
//! drained onto the next real record; advancing past an entry skips any
//! unread data plus its block padding, so the source always sits on a block
//! boundary between records.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::Read;
use std::os::unix::ffi::OsStringExt;
use std::path::Path;
use std::rc::Rc;

use tarview_header::{is_zero_block, EntryType, Format, Header, BLOCK_SIZE};

use crate::entry::{DataSource, Entry};
use crate::error::{Error, Result};
use crate::metadata::{path_from_bytes, Metadata};
use crate::pax::PaxBundle;
use crate::source::{read_full, ByteSource, FileSource, MapBuffer, MappedSource, ReadSource};
use crate::sparse::{self, SparseMap, SparseSegment};

/// Upper bound on a single metadata payload (long name, long link, PAX
/// record set). Real archives stay far below this; anything larger is
/// treated as a damaged or hostile size field.
const META_RECORD_MAX: u64 = 16 << 20;

/// Round a data size up to the enclosing block count, in bytes.
fn padding_for(size: u64) -> u64 {
    (BLOCK_SIZE as u64 - size % BLOCK_SIZE as u64) % BLOCK_SIZE as u64
}

enum Source {
    Stream(Box<dyn ByteSource>),
    Mapped(MappedSource),
}

impl Source {
    fn get(&mut self) -> &mut dyn ByteSource {
        match self {
            Source::Stream(stream) => stream.as_mut(),
            Source::Mapped(mapped) => mapped,
        }
    }
}

/// Prefix-record contributions waiting for the next real record. Repeated
/// records of the same kind overwrite the earlier one.
#[derive(Default)]
struct PendingBundle {
    long_name: Option<Vec<u8>>,
    long_link: Option<Vec<u8>>,
    pax: Option<PaxBundle>,
}

impl PendingBundle {
    fn is_empty(&self) -> bool {
        self.long_name.is_none() && self.long_link.is_none() && self.pax.is_none()
    }
}

/// What kind of data access the new entry gets; converted into a
/// [`DataSource`] by [`Archive::next_entry`], which owns the `Rc`.
enum EntryData {
    None,
    Span {
        buf: Rc<MapBuffer>,
        start: usize,
        len: usize,
    },
    Pull,
}

pub(crate) struct ReaderCore {
    source: Source,
    finished: bool,
    errored: bool,
    /// Slot serial for stale-entry detection; bumped whenever the previous
    /// entry's data region is flushed.
    serial: u64,
    /// Bytes of the current entry's stored data still in the stream.
    stored_remaining: u64,
    /// Bytes of the current entry's stored data already consumed.
    stored_consumed: u64,
    /// Physical data region size (including a sparse-1.0 map block), for
    /// computing the trailing padding.
    region_size: u64,
    pending: PendingBundle,
    pax_globals: u64,
}

impl ReaderCore {
    fn new(source: Source) -> Self {
        Self {
            source,
            finished: false,
            errored: false,
            serial: 0,
            stored_remaining: 0,
            stored_consumed: 0,
            region_size: 0,
            pending: PendingBundle::default(),
            pax_globals: 0,
        }
    }

    fn read_block(&mut self) -> Result<Option<[u8; BLOCK_SIZE]>> {
        let mut block = [0u8; BLOCK_SIZE];
        if read_full(self.source.get(), &mut block)? {
            Ok(Some(block))
        } else {
            Ok(None)
        }
    }

    /// Skip whatever is left of the previous entry: unread stored data,
    /// then the padding of its whole data region. Invalidates outstanding
    /// pull handles.
    fn flush_entry(&mut self) -> Result<()> {
        if self.stored_remaining > 0 {
            let n = self.stored_remaining;
            self.source.get().skip(n)?;
            self.stored_remaining = 0;
        }
        if self.region_size > 0 {
            let pad = padding_for(self.region_size);
            if pad > 0 {
                self.source.get().skip(pad)?;
            }
        }
        self.region_size = 0;
        self.stored_consumed = 0;
        self.serial += 1;
        Ok(())
    }

    /// Read a metadata record's payload and skip its padding.
    fn read_payload(&mut self, size: u64) -> Result<Vec<u8>> {
        if size > META_RECORD_MAX {
            return Err(Error::InvalidHeader(format!(
                "metadata record of {size} bytes exceeds the {META_RECORD_MAX} byte bound"
            )));
        }
        let mut data = vec![0u8; size as usize];
        if !read_full(self.source.get(), &mut data)? && size > 0 {
            return Err(Error::CorruptArchive(
                "archive ends inside a metadata record".into(),
            ));
        }
        let pad = padding_for(size);
        if pad > 0 {
            self.source.get().skip(pad)?;
        }
        Ok(data)
    }

    /// Skip a record's payload and padding without reading it.
    fn skip_payload(&mut self, size: u64) -> Result<()> {
        let padded = size
            .checked_next_multiple_of(BLOCK_SIZE as u64)
            .ok_or_else(|| Error::InvalidHeader(format!("entry size {size} overflows")))?;
        if padded > 0 {
            self.source.get().skip(padded)?;
        }
        Ok(())
    }

    fn orphan_check(&self) -> Result<()> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            Err(Error::CorruptArchive(
                "prefix records at end of archive with no entry to attach to".into(),
            ))
        }
    }

    fn advance(&mut self) -> Result<Option<(Metadata, EntryData)>> {
        if self.finished {
            return Ok(None);
        }
        self.flush_entry()?;

        loop {
            let Some(block) = self.read_block()? else {
                self.finished = true;
                self.orphan_check()?;
                return Ok(None);
            };

            if is_zero_block(&block) {
                let second = self.read_block()?.ok_or_else(|| {
                    Error::CorruptArchive("archive ends after a single zero block".into())
                })?;
                if !is_zero_block(&second) {
                    return Err(Error::CorruptArchive(
                        "zero block not followed by a second zero block".into(),
                    ));
                }
                self.finished = true;
                self.orphan_check()?;
                return Ok(None);
            }

            let header = Header::from_block(&block);
            let format = header.format()?;
            header.verify_checksum()?;
            let entry_type = header.entry_type();
            let size = header.size()?;

            match entry_type {
                EntryType::GnuLongName => {
                    let mut name = self.read_payload(size)?;
                    while name.last() == Some(&0) {
                        name.pop();
                    }
                    self.pending.long_name = Some(name);
                }
                EntryType::GnuLongLink => {
                    let mut link = self.read_payload(size)?;
                    while link.last() == Some(&0) {
                        link.pop();
                    }
                    self.pending.long_link = Some(link);
                }
                EntryType::PaxExtended => {
                    let payload = self.read_payload(size)?;
                    self.pending.pax = Some(PaxBundle::parse(&payload)?);
                }
                EntryType::PaxGlobal => {
                    // The payload is discarded; only the fact that one was
                    // seen is recorded.
                    tracing::debug!(size, "skipping PAX global header");
                    self.skip_payload(size)?;
                    self.pax_globals += 1;
                }
                EntryType::GnuVolumeHeader | EntryType::GnuMultiVolume => {
                    tracing::debug!(?entry_type, "skipping GNU volume record");
                    self.skip_payload(size)?;
                }
                EntryType::Unknown(byte) => {
                    return Err(Error::UnsupportedFeature(format!(
                        "unknown entry type {:?}",
                        byte as char
                    )));
                }
                _ => return self.finish_entry(&block, format, entry_type, size).map(Some),
            }
        }
    }

    /// Turn the current header block into a logical entry: decode its
    /// fields, pull in any sparse extension blocks, drain the pending
    /// bundle, and set up the data-region bookkeeping.
    fn finish_entry(
        &mut self,
        block: &[u8; BLOCK_SIZE],
        format: Format,
        entry_type: EntryType,
        size: u64,
    ) -> Result<(Metadata, EntryData)> {
        let header = Header::from_block(block);

        let mut metadata = Metadata {
            path: path_from_bytes(header.path_bytes(format)),
            entry_type,
            mode: header.mode()? & 0o7777,
            uid: header.uid()?,
            gid: header.gid()?,
            size,
            mtime: header.mtime()?,
            uname: OsString::from_vec(header.uname_bytes().to_vec()),
            gname: OsString::from_vec(header.gname_bytes().to_vec()),
            link_target: None,
            device: None,
            sparse: None,
            xattrs: BTreeMap::new(),
            access_acl: Vec::new(),
            default_acl: Vec::new(),
        };
        if entry_type.is_link() {
            let link = header.linkname_bytes();
            if !link.is_empty() {
                metadata.link_target = Some(path_from_bytes(link.to_vec()));
            }
        }
        if entry_type.is_device() {
            metadata.device = Some((header.dev_major()?, header.dev_minor()?));
        }

        // The declared stored size; PAX `size` may override it below.
        let mut declared = size;

        // Speculative GNU in-header sparse map. A type-'S' record is sparse
        // by definition; a GNU regular file is only treated as sparse when
        // descriptors actually decode.
        let mut header_sparse: Option<(Vec<SparseSegment>, Option<u64>)> = None;
        if (format == Format::Gnu && entry_type == EntryType::Regular)
            || entry_type == EntryType::GnuSparse
        {
            let parsed = sparse::parse_in_header(header.as_gnu());
            if !parsed.segments.is_empty() || entry_type == EntryType::GnuSparse {
                let mut segments = parsed.segments;
                let mut extended = parsed.extended;
                while extended {
                    let ext = self.read_block()?.ok_or_else(|| {
                        Error::CorruptArchive(
                            "archive ends inside sparse extension blocks".into(),
                        )
                    })?;
                    let (more, cont) = sparse::parse_extension_block(&ext);
                    segments.extend(more);
                    extended = cont;
                }
                header_sparse = Some((segments, parsed.real_size));
                if entry_type == EntryType::GnuSparse {
                    metadata.entry_type = EntryType::Regular;
                }
            }
        }

        // Drain the pending bundle. Application order: long name, long
        // link, PAX overrides and markers, then the in-header sparse map.
        if let Some(name) = self.pending.long_name.take() {
            metadata.path = path_from_bytes(name);
        }
        if let Some(link) = self.pending.long_link.take() {
            metadata.link_target = Some(path_from_bytes(link));
        }

        let mut sparse_map: Option<SparseMap> = None;
        let mut sparse10_real_size: Option<u64> = None;

        if let Some(pax) = self.pending.pax.take() {
            if let Some(path) = pax.path() {
                metadata.path = path_from_bytes(path.to_vec());
            }
            if let Some(link) = pax.link_path() {
                metadata.link_target = Some(path_from_bytes(link.to_vec()));
            }
            if let Some(pax_size) = pax.decimal("size")? {
                declared = pax_size;
                metadata.size = pax_size;
            }
            if let Some(uid) = pax.decimal("uid")? {
                metadata.uid = uid;
            }
            if let Some(gid) = pax.decimal("gid")? {
                metadata.gid = gid;
            }
            if let Some(mtime) = pax.mtime()? {
                metadata.mtime = mtime;
            }
            if let Some(uname) = pax.uname() {
                metadata.uname = OsString::from_vec(uname.to_vec());
            }
            if let Some(gname) = pax.gname() {
                metadata.gname = OsString::from_vec(gname.to_vec());
            }

            if pax.has_sparse_markers() {
                let (major, minor) = pax.sparse_version()?;
                if let Some(name) = pax.sparse_name() {
                    metadata.path = path_from_bytes(name.to_vec());
                }
                if (major, minor) == (1, 0) {
                    let real_size = pax.sparse_real_size()?.ok_or_else(|| {
                        Error::InvalidHeader(
                            "sparse 1.0 member without GNU.sparse.realsize".into(),
                        )
                    })?;
                    sparse10_real_size = Some(real_size);
                } else if major <= 1 {
                    let segments = pax.sparse_inline_map()?.unwrap_or_default();
                    let real_size = match pax.sparse_real_size()? {
                        Some(real_size) => real_size,
                        None => segments.last().map_or(0, |s| s.offset + s.size),
                    };
                    sparse_map = Some(SparseMap::new(segments, real_size)?);
                } else {
                    return Err(Error::UnsupportedFeature(format!(
                        "GNU sparse version {major}.{minor}"
                    )));
                }
            }

            metadata.xattrs = pax.xattrs();
            let (access, default) = pax.acls()?;
            metadata.access_acl = access;
            metadata.default_acl = default;
        }

        if let Some((segments, real_size)) = header_sparse {
            let real_size = real_size
                .filter(|&r| r > 0)
                .unwrap_or_else(|| segments.last().map_or(0, |s| s.offset + s.size));
            sparse_map = Some(SparseMap::new(segments, real_size)?);
            sparse10_real_size = None;
        }

        // Establish the data-region bookkeeping. For sparse 1.0 the map
        // block is part of the declared region and has just been consumed;
        // any mismatch between the declared size and the map's stored total
        // fails here rather than desynchronising the block stream.
        if let Some(real_size) = sparse10_real_size {
            if declared < BLOCK_SIZE as u64 {
                return Err(Error::CorruptArchive(format!(
                    "sparse 1.0 declared size {declared} cannot hold its map block"
                )));
            }
            let map_block = self.read_block()?.ok_or_else(|| {
                Error::CorruptArchive("archive ends before the sparse 1.0 map block".into())
            })?;
            let map = sparse::parse_data_block_map(&map_block, real_size)?;
            if map.stored_size() != declared - BLOCK_SIZE as u64 {
                return Err(Error::CorruptArchive(format!(
                    "sparse 1.0 map stores {} bytes but the declared size leaves {}",
                    map.stored_size(),
                    declared - BLOCK_SIZE as u64
                )));
            }
            self.region_size = declared;
            self.stored_remaining = declared - BLOCK_SIZE as u64;
            sparse_map = Some(map);
        } else {
            if let Some(map) = &sparse_map {
                if map.stored_size() > declared {
                    return Err(Error::CorruptArchive(format!(
                        "sparse map stores {} bytes but only {declared} are declared",
                        map.stored_size()
                    )));
                }
            }
            self.region_size = declared;
            self.stored_remaining = declared;
        }
        self.stored_consumed = 0;

        if let Some(map) = sparse_map {
            metadata.size = map.real_size();
            metadata.sparse = Some(map);
        }

        // Attach the data source. Mapped archives take a span over the
        // stored region and consume it immediately, so span entries stay
        // valid after the reader advances; streamed archives hand out a
        // pull handle bound to the current slot.
        let mapped_span = match &self.source {
            Source::Mapped(mapped) if metadata.is_file() => {
                Some((Rc::clone(mapped.buffer()), mapped.offset()))
            }
            _ => None,
        };
        let data = if !metadata.is_file() {
            EntryData::None
        } else if let Some((buf, start)) = mapped_span {
            let len = self.stored_remaining;
            if start as u64 + len > buf.as_slice().len() as u64 {
                return Err(Error::CorruptArchive(
                    "archive ends inside the entry data region".into(),
                ));
            }
            self.source.get().skip(len)?;
            self.stored_consumed = len;
            self.stored_remaining = 0;
            EntryData::Span {
                buf,
                start,
                len: len as usize,
            }
        } else {
            EntryData::Pull
        };

        Ok((metadata, data))
    }

    fn check_serial(&self, serial: u64) -> Result<()> {
        if serial == self.serial {
            Ok(())
        } else {
            Err(Error::InvalidOperation(
                "entry is stale: the reader has advanced past it".into(),
            ))
        }
    }

    /// Sequential read for a streamed entry: skip forward to `offset`, then
    /// read up to `length` bytes of the stored region.
    pub(crate) fn pull_read(&mut self, serial: u64, offset: u64, length: u64) -> Result<Vec<u8>> {
        self.check_serial(serial)?;
        if offset < self.stored_consumed {
            return Err(Error::InvalidOperation(format!(
                "cannot read backwards in streaming mode (offset {offset}, consumed {})",
                self.stored_consumed
            )));
        }

        let skip = (offset - self.stored_consumed).min(self.stored_remaining);
        if skip > 0 {
            self.source.get().skip(skip)?;
            self.stored_consumed += skip;
            self.stored_remaining -= skip;
        }

        let want = length.min(self.stored_remaining);
        let mut out = vec![0u8; want as usize];
        if want > 0 {
            if !read_full(self.source.get(), &mut out)? {
                return Err(Error::CorruptArchive(
                    "archive ends inside the entry data region".into(),
                ));
            }
            self.stored_consumed += want;
            self.stored_remaining -= want;
        }
        Ok(out)
    }

    /// Exact sequential read at a stored offset, for the sparse wrapper.
    pub(crate) fn pull_fetch(
        &mut self,
        serial: u64,
        stored_off: u64,
        out: &mut [u8],
    ) -> Result<()> {
        self.check_serial(serial)?;
        if stored_off < self.stored_consumed {
            return Err(Error::InvalidOperation(
                "sparse reads must progress forward in streaming mode".into(),
            ));
        }

        let skip = stored_off - self.stored_consumed;
        if skip > self.stored_remaining
            || (out.len() as u64) > self.stored_remaining - skip
        {
            return Err(Error::CorruptArchive(
                "sparse segment lies outside the stored data region".into(),
            ));
        }
        if skip > 0 {
            self.source.get().skip(skip)?;
            self.stored_consumed += skip;
            self.stored_remaining -= skip;
        }
        if !read_full(self.source.get(), out)? {
            return Err(Error::CorruptArchive(
                "archive ends inside the entry data region".into(),
            ));
        }
        self.stored_consumed += out.len() as u64;
        self.stored_remaining -= out.len() as u64;
        Ok(())
    }
}

/// A read-only archive reader.
///
/// Iteration is forward and single-pass; entries come out in the physical
/// order of the real records, with prefix records silently consumed. The
/// reader is single-threaded by design: iteration and entry data reads
/// share the underlying stream position.
///
/// # Example
///
/// ```no_run
/// use tarview::Archive;
///
/// let mut archive = Archive::open("layer.tar")?;
/// while let Some(entry) = archive.next_entry()? {
///     println!("{} ({} bytes)", entry.path().display(), entry.size());
/// }
/// # Ok::<(), tarview::Error>(())
/// ```
pub struct Archive {
    core: Rc<RefCell<ReaderCore>>,
}

impl Archive {
    /// Open a file-backed archive with buffered sequential I/O.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] when the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::with_source(Source::Stream(Box::new(FileSource::open(
            path,
        )?))))
    }

    /// Open a memory-mapped archive. Entries then expose zero-copy,
    /// random-access data spans that outlive iteration steps.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] when the file cannot be opened or mapped.
    pub fn open_mapped(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::with_source(Source::Mapped(MappedSource::open(path)?)))
    }

    /// Wrap any [`Read`] stream (sequential-only access).
    pub fn from_reader<R: Read + 'static>(reader: R) -> Self {
        Self::from_source(Box::new(ReadSource::new(reader)))
    }

    /// Wrap a caller-supplied byte source (sequential-only access).
    pub fn from_source(source: Box<dyn ByteSource>) -> Self {
        Self::with_source(Source::Stream(source))
    }

    fn with_source(source: Source) -> Self {
        Self {
            core: Rc::new(RefCell::new(ReaderCore::new(source))),
        }
    }

    /// Produce the next logical entry, or `None` at end of archive.
    ///
    /// Any unread data of the previous entry is skipped first. The first
    /// error latches [`errored`](Self::errored) and ends iteration.
    pub fn next_entry(&mut self) -> Result<Option<Entry>> {
        let outcome = self.core.borrow_mut().advance();
        match outcome {
            Ok(None) => Ok(None),
            Ok(Some((metadata, data))) => {
                let serial = self.core.borrow().serial;
                let data = match data {
                    EntryData::None => DataSource::None,
                    EntryData::Span { buf, start, len } => DataSource::Span { buf, start, len },
                    EntryData::Pull => DataSource::Pull {
                        core: Rc::clone(&self.core),
                        serial,
                    },
                };
                Ok(Some(Entry::new(metadata, data)))
            }
            Err(err) => {
                let mut core = self.core.borrow_mut();
                core.errored = true;
                core.finished = true;
                Err(err)
            }
        }
    }

    /// Iterator adapter over [`next_entry`](Self::next_entry).
    pub fn entries(&mut self) -> Entries<'_> {
        Entries { archive: self }
    }

    /// True once a fatal error has ended iteration, distinguishing an
    /// aborted run from a clean end of archive.
    #[must_use]
    pub fn errored(&self) -> bool {
        self.core.borrow().errored
    }

    /// How many PAX global headers were skipped so far.
    #[must_use]
    pub fn pax_global_count(&self) -> u64 {
        self.core.borrow().pax_globals
    }
}

/// Forward, single-pass iterator over an archive's logical entries.
///
/// After yielding an error it yields `None` forever.
pub struct Entries<'a> {
    archive: &'a mut Archive,
}

impl Iterator for Entries<'_> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.archive.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}
