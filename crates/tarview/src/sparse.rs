//! GNU sparse file support.
//!
//! Sparse members arrive in three shapes: the old 0.x in-header map (four
//! descriptors in the header's trailing region, chained through extension
//! blocks), the PAX 0.x inline `GNU.sparse.map` value, and the PAX 1.0
//! variant whose decimal map occupies the first block of the entry's data
//! region. All three converge on [`SparseMap`]: an ordered list of stored
//! data runs over a logical file of `real_size` bytes, everything outside
//! the runs reading as zeroes.

use tarview_header::{GnuExtSparseBlock, GnuHeader, BLOCK_SIZE};

use crate::error::{Error, Result};

/// One stored data run of a sparse file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparseSegment {
    /// Byte offset of the run within the logical file.
    pub offset: u64,
    /// Length of the run in bytes.
    pub size: u64,
}

/// An ordered, non-overlapping sparse map.
#[derive(Debug, Clone)]
pub struct SparseMap {
    segments: Vec<SparseSegment>,
    real_size: u64,
}

impl SparseMap {
    /// Build a map, validating that segments are ordered, non-overlapping,
    /// and that all stored data fits inside `real_size`. An empty segment
    /// list describes an entirely-zero file.
    pub(crate) fn new(segments: Vec<SparseSegment>, real_size: u64) -> Result<Self> {
        let mut previous_end = 0u64;
        for seg in &segments {
            if seg.offset < previous_end {
                return Err(Error::CorruptArchive(format!(
                    "sparse segments overlap or are unordered at offset {}",
                    seg.offset
                )));
            }
            previous_end = seg.offset.checked_add(seg.size).ok_or_else(|| {
                Error::CorruptArchive("sparse segment extent overflows".into())
            })?;
        }
        if previous_end > real_size {
            return Err(Error::CorruptArchive(format!(
                "sparse data extends to {previous_end} past the real size {real_size}"
            )));
        }
        Ok(Self {
            segments,
            real_size,
        })
    }

    /// The stored data runs, in file order.
    #[must_use]
    pub fn segments(&self) -> &[SparseSegment] {
        &self.segments
    }

    /// The logical file size.
    #[must_use]
    pub fn real_size(&self) -> u64 {
        self.real_size
    }

    /// Total bytes physically stored in the archive for this member.
    #[must_use]
    pub fn stored_size(&self) -> u64 {
        self.segments.iter().map(|s| s.size).sum()
    }

    /// Read `length` logical bytes starting at `offset`, materialising
    /// holes as zeroes. `fetch` is called with increasing stored offsets to
    /// supply the bytes of each overlapping data run, which keeps the
    /// access pattern sequential for streaming backings.
    pub(crate) fn read_logical(
        &self,
        offset: u64,
        length: u64,
        fetch: &mut dyn FnMut(u64, &mut [u8]) -> Result<()>,
    ) -> Result<Vec<u8>> {
        if offset >= self.real_size {
            return Ok(Vec::new());
        }
        let length = length.min(self.real_size - offset);
        let end = offset + length;
        let mut out = vec![0u8; length as usize];

        let mut stored_base = 0u64;
        for seg in &self.segments {
            let seg_end = seg.offset + seg.size;
            if seg_end > offset && seg.offset < end {
                let from = offset.max(seg.offset);
                let to = end.min(seg_end);
                let stored_off = stored_base + (from - seg.offset);
                fetch(
                    stored_off,
                    &mut out[(from - offset) as usize..(to - offset) as usize],
                )?;
            }
            stored_base += seg.size;
            if seg.offset >= end {
                break;
            }
        }
        Ok(out)
    }
}

/// Tolerant octal parser for the GNU sparse fields only.
///
/// Producers leave junk bytes around the digits in these fields, so this
/// takes the longest contiguous run of octal digits anywhere in the field
/// (the first on a tie). The strict field decoder stays in force for every
/// other numeric field; do not use this outside sparse parsing.
fn sparse_octal(field: &[u8]) -> Option<u64> {
    let mut best: Option<(usize, u64)> = None;
    let mut i = 0;
    while i < field.len() {
        if matches!(field[i], b'0'..=b'7') {
            let start = i;
            let mut value = 0u64;
            while i < field.len() && matches!(field[i], b'0'..=b'7') {
                value = value * 8 + u64::from(field[i] - b'0');
                i += 1;
            }
            let len = i - start;
            if best.is_none_or(|(best_len, _)| len > best_len) {
                best = Some((len, value));
            }
        } else {
            i += 1;
        }
    }
    best.map(|(_, value)| value)
}

/// The sparse information carried inside a GNU header block.
#[derive(Debug)]
pub(crate) struct InHeaderSparse {
    /// Decoded descriptors, in file order.
    pub segments: Vec<SparseSegment>,
    /// The header's `realsize` field, when it decodes.
    pub real_size: Option<u64>,
    /// True when extension sparse blocks follow the header.
    pub extended: bool,
}

/// Decode the in-header sparse region of a GNU header.
pub(crate) fn parse_in_header(gnu: &GnuHeader) -> InHeaderSparse {
    let mut segments = Vec::new();
    for descriptor in &gnu.sparse {
        let offset = sparse_octal(&descriptor.offset);
        let size = sparse_octal(&descriptor.numbytes);
        match (offset, size) {
            (Some(offset), Some(size)) if size != 0 => {
                segments.push(SparseSegment { offset, size });
            }
            _ => break,
        }
    }
    InHeaderSparse {
        segments,
        real_size: sparse_octal(&gnu.realsize),
        extended: gnu.isextended == b'1',
    }
}

/// Decode one sparse extension block. Returns the descriptors it holds and
/// whether another extension block follows.
pub(crate) fn parse_extension_block(block: &[u8; BLOCK_SIZE]) -> (Vec<SparseSegment>, bool) {
    let ext = GnuExtSparseBlock::from_block(block);
    let mut segments = Vec::new();
    for descriptor in &ext.sparse {
        let offset = sparse_octal(&descriptor.offset);
        let size = sparse_octal(&descriptor.numbytes);
        match (offset, size) {
            (Some(offset), Some(size)) if size != 0 => {
                segments.push(SparseSegment { offset, size });
            }
            _ => break,
        }
    }
    (segments, ext.isextended == b'1')
}

/// Parse the PAX sparse 1.0 map from the first block of an entry's data
/// region: ASCII decimal numbers separated by whitespace, laid out as a
/// segment count followed by that many `offset`/`size` pairs (some
/// producers append further numbers, which are ignored).
///
/// # Errors
///
/// [`Error::CorruptArchive`] when the block holds fewer numbers than the
/// count announces or the resulting map violates the sparse invariants.
pub(crate) fn parse_data_block_map(block: &[u8; BLOCK_SIZE], real_size: u64) -> Result<SparseMap> {
    let mut numbers = Vec::new();
    let mut i = 0;
    while i < block.len() {
        match block[i] {
            b' ' | b'\t' | b'\n' | b'\r' => i += 1,
            b'0'..=b'9' => {
                let mut value: u64 = 0;
                while i < block.len() && block[i].is_ascii_digit() {
                    value = value
                        .checked_mul(10)
                        .and_then(|v| v.checked_add(u64::from(block[i] - b'0')))
                        .ok_or_else(|| {
                            Error::CorruptArchive("sparse map number overflows".into())
                        })?;
                    i += 1;
                }
                numbers.push(value);
            }
            _ => break,
        }
    }

    let Some((&count, rest)) = numbers.split_first() else {
        return Err(Error::CorruptArchive(
            "sparse 1.0 map block holds no numbers".into(),
        ));
    };
    let count = usize::try_from(count)
        .ok()
        .filter(|&c| rest.len() >= c * 2)
        .ok_or_else(|| {
            Error::CorruptArchive(format!(
                "sparse 1.0 map announces {count} segments but holds {}",
                rest.len() / 2
            ))
        })?;

    let segments = rest[..count * 2]
        .chunks_exact(2)
        .map(|pair| SparseSegment {
            offset: pair[0],
            size: pair[1],
        })
        .collect();
    SparseMap::new(segments, real_size)
}
