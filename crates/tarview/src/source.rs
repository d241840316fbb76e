//! Byte sources the reader consumes.
//!
//! The state machine only requires the sequential [`ByteSource`] contract:
//! short reads are legal, zero means end of stream, and `skip` advances
//! without materialising bytes. [`SeekableSource`] refines that with O(1)
//! positioning for backings that support it. Three concrete sources are
//! provided: a buffered file, a generic [`Read`] adapter, and a private
//! read-only memory mapping.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;
use std::rc::Rc;

use crate::error::{Error, Result};

/// An abstract sequential byte stream.
pub trait ByteSource {
    /// Read into `buf`, returning the number of bytes read. Short reads are
    /// legal; zero means end of stream. Callers loop as needed.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Advance past `n` bytes without materialising them. Moving past the
    /// logical end of the stream is an error.
    fn skip(&mut self, n: u64) -> Result<()>;

    /// Advisory end-of-stream indication.
    fn at_end(&self) -> bool;
}

/// Random-access refinement of [`ByteSource`].
pub trait SeekableSource: ByteSource {
    /// Reposition to an absolute offset.
    fn seek(&mut self, pos: u64) -> Result<()>;

    /// Current absolute offset.
    fn position(&self) -> u64;

    /// Total stream length, when known.
    fn size(&self) -> Option<u64>;
}

/// Fill `buf` completely, looping over short reads.
///
/// Returns `Ok(true)` when the buffer was filled, `Ok(false)` on a clean
/// end of stream (no bytes read at all), and an error when the stream ends
/// partway through the buffer.
pub(crate) fn read_full(source: &mut dyn ByteSource, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..])? {
            0 if filled == 0 => return Ok(false),
            0 => {
                return Err(Error::CorruptArchive(format!(
                    "stream ended after {filled} of {} bytes",
                    buf.len()
                )))
            }
            n => filled += n,
        }
    }
    Ok(true)
}

/// Buffered file source using positioned seeks for `skip`.
pub struct FileSource {
    inner: BufReader<File>,
    pos: u64,
    len: u64,
}

impl FileSource {
    /// Open `path` for sequential reading.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] when the file cannot be opened or stat'ed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            inner: BufReader::new(file),
            pos: 0,
            len,
        })
    }
}

impl ByteSource for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.inner.read(buf) {
                Ok(n) => {
                    self.pos += n as u64;
                    return Ok(n);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        let target = self
            .pos
            .checked_add(n)
            .filter(|&t| t <= self.len)
            .ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "skip past end of file",
                ))
            })?;
        self.inner.seek_relative(n as i64)?;
        self.pos = target;
        Ok(())
    }

    fn at_end(&self) -> bool {
        self.pos >= self.len
    }
}

impl SeekableSource for FileSource {
    fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.len {
            return Err(Error::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "seek past end of file",
            )));
        }
        self.inner.seek(SeekFrom::Start(pos))?;
        self.pos = pos;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn size(&self) -> Option<u64> {
        Some(self.len)
    }
}

/// Adapter turning any [`Read`] into a [`ByteSource`].
///
/// `skip` drains and discards, so this works for pipes and other
/// non-seekable streams.
pub struct ReadSource<R> {
    inner: R,
    eof: bool,
}

impl<R: Read> ReadSource<R> {
    /// Wrap a reader.
    pub fn new(inner: R) -> Self {
        Self { inner, eof: false }
    }
}

impl<R: Read> ByteSource for ReadSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.inner.read(buf) {
                Ok(0) => {
                    if !buf.is_empty() {
                        self.eof = true;
                    }
                    return Ok(0);
                }
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        let mut remaining = n;
        let mut chunk = [0u8; 8192];
        while remaining > 0 {
            let want = remaining.min(chunk.len() as u64) as usize;
            match self.read(&mut chunk[..want])? {
                0 => {
                    return Err(Error::Io(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "skip past end of stream",
                    )))
                }
                got => remaining -= got as u64,
            }
        }
        Ok(())
    }

    fn at_end(&self) -> bool {
        self.eof
    }
}

/// The bytes behind a mapped source. Zero-length files carry no mapping at
/// all, since mmap rejects empty ranges.
pub(crate) struct MapBuffer(Option<memmap2::Mmap>);

impl MapBuffer {
    pub(crate) fn as_slice(&self) -> &[u8] {
        self.0.as_ref().map_or(&[], |m| &m[..])
    }
}

/// Memory-mapped byte source over a private read-only mapping.
pub struct MappedSource {
    buf: Rc<MapBuffer>,
    pos: usize,
}

impl MappedSource {
    /// Map `path` read-only.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] when the file cannot be opened or mapped.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let map = if len == 0 {
            None
        } else {
            // SAFETY: the mapping is private and read-only; concurrent
            // truncation of the underlying file is the usual mmap caveat
            // and is accepted here as it is by every mmap consumer.
            Some(unsafe { memmap2::Mmap::map(&file)? })
        };
        Ok(Self {
            buf: Rc::new(MapBuffer(map)),
            pos: 0,
        })
    }

    pub(crate) fn buffer(&self) -> &Rc<MapBuffer> {
        &self.buf
    }

    pub(crate) fn offset(&self) -> usize {
        self.pos
    }
}

impl ByteSource for MappedSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let data = self.buf.as_slice();
        let n = buf.len().min(data.len() - self.pos);
        buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        let len = self.buf.as_slice().len() as u64;
        let target = (self.pos as u64).checked_add(n).filter(|&t| t <= len);
        match target {
            Some(t) => {
                self.pos = t as usize;
                Ok(())
            }
            None => Err(Error::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "skip past end of mapping",
            ))),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.buf.as_slice().len()
    }
}

impl SeekableSource for MappedSource {
    fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.buf.as_slice().len() as u64 {
            return Err(Error::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "seek past end of mapping",
            )));
        }
        self.pos = pos as usize;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos as u64
    }

    fn size(&self) -> Option<u64> {
        Some(self.buf.as_slice().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::io::Write;

    #[test]
    fn read_full_clean_eof() {
        let mut source = ReadSource::new(Cursor::new(Vec::<u8>::new()));
        let mut buf = [0u8; 4];
        assert!(!read_full(&mut source, &mut buf).unwrap());
    }

    #[test]
    fn read_full_partial_is_corrupt() {
        let mut source = ReadSource::new(Cursor::new(vec![1, 2]));
        let mut buf = [0u8; 4];
        assert!(matches!(
            read_full(&mut source, &mut buf),
            Err(Error::CorruptArchive(_))
        ));
    }

    #[test]
    fn read_source_skip_and_eof() {
        let mut source = ReadSource::new(Cursor::new(vec![0u8; 100]));
        source.skip(60).unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(source.read(&mut buf).unwrap(), 40);
        assert!(source.skip(1).is_err());
    }

    #[test]
    fn file_source_skip_bounds() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[7u8; 32]).unwrap();
        let mut source = FileSource::open(tmp.path()).unwrap();
        assert_eq!(source.size(), Some(32));
        source.skip(16).unwrap();
        assert_eq!(source.position(), 16);
        let mut buf = [0u8; 8];
        assert_eq!(source.read(&mut buf).unwrap(), 8);
        assert_eq!(buf, [7u8; 8]);
        assert!(source.skip(100).is_err());
        source.seek(32).unwrap();
        assert!(source.at_end());
    }

    #[test]
    fn mapped_source_empty_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut source = MappedSource::open(tmp.path()).unwrap();
        assert!(source.at_end());
        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn mapped_source_read_and_seek() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        let mut source = MappedSource::open(tmp.path()).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"0123");
        source.skip(2).unwrap();
        assert_eq!(source.position(), 6);
        source.seek(8).unwrap();
        assert_eq!(source.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"89");
        assert!(source.skip(1).is_err());
    }
}
