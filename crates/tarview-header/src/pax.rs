//! PAX extended-header record framing.
//!
//! A PAX payload is a sequence of records of the form
//! `LEN SP KEY '=' VALUE LF`, where `LEN` is the decimal byte length of the
//! whole record including the length digits, the space, the equals sign,
//! the value and the trailing line feed. Because records are carved by
//! length, values may contain embedded line feeds.

use thiserror::Error;

/// Errors produced while framing PAX records.
#[derive(Debug, Error)]
pub enum PaxError {
    /// A record violates the `LEN SP KEY=VALUE LF` shape.
    #[error("malformed PAX record: {0}")]
    Malformed(String),

    /// A record's declared length runs past the end of the payload.
    #[error("PAX record length {len} exceeds remaining payload ({remaining} bytes)")]
    Truncated {
        /// Declared record length.
        len: usize,
        /// Bytes left in the payload.
        remaining: usize,
    },

    /// A record key is not valid UTF-8.
    #[error("PAX key is not valid UTF-8")]
    InvalidKey(#[from] std::str::Utf8Error),
}

/// One parsed `key=value` pair. The key is required to be UTF-8 by the PAX
/// specification; the value is an arbitrary byte string.
#[derive(Debug, Clone)]
pub struct PaxRecord<'a> {
    key: &'a [u8],
    value: &'a [u8],
}

impl<'a> PaxRecord<'a> {
    /// The key as a string.
    ///
    /// # Errors
    ///
    /// [`PaxError::InvalidKey`] when the key bytes are not UTF-8.
    pub fn key(&self) -> Result<&'a str, PaxError> {
        Ok(std::str::from_utf8(self.key)?)
    }

    /// The raw key bytes.
    #[must_use]
    pub fn key_bytes(&self) -> &'a [u8] {
        self.key
    }

    /// The raw value bytes.
    #[must_use]
    pub fn value_bytes(&self) -> &'a [u8] {
        self.value
    }
}

/// Iterator over the records of a PAX payload.
///
/// # Example
///
/// ```
/// use tarview_header::PaxRecords;
///
/// let payload = b"20 path=foo/bar.txt\n10 size=7\n";
/// let records: Vec<_> = PaxRecords::new(payload)
///     .map(|r| r.unwrap())
///     .map(|r| (r.key().unwrap().to_owned(), r.value_bytes().to_vec()))
///     .collect();
/// assert_eq!(records[0], ("path".to_owned(), b"foo/bar.txt".to_vec()));
/// assert_eq!(records[1], ("size".to_owned(), b"7".to_vec()));
/// ```
#[derive(Debug)]
pub struct PaxRecords<'a> {
    data: &'a [u8],
}

impl<'a> PaxRecords<'a> {
    /// Iterate over the records of a raw PAX payload.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn parse_next(&mut self) -> Result<PaxRecord<'a>, PaxError> {
        // Decimal length digits, then exactly one space.
        let digits_end = self
            .data
            .iter()
            .position(|b| !b.is_ascii_digit())
            .unwrap_or(self.data.len());
        if digits_end == 0 {
            return Err(PaxError::Malformed(format!(
                "expected decimal length, found {:?}",
                String::from_utf8_lossy(&self.data[..self.data.len().min(16)])
            )));
        }
        if self.data.get(digits_end) != Some(&b' ') {
            return Err(PaxError::Malformed(
                "length field not followed by a space".into(),
            ));
        }

        let len: usize = std::str::from_utf8(&self.data[..digits_end])
            .expect("digits are ASCII")
            .parse()
            .map_err(|_| PaxError::Malformed("length field overflows".into()))?;
        if len == 0 {
            return Err(PaxError::Malformed("record length of zero".into()));
        }
        if len > self.data.len() {
            return Err(PaxError::Truncated {
                len,
                remaining: self.data.len(),
            });
        }
        // The declared length covers the digits and separator as well.
        if len < digits_end + 2 {
            return Err(PaxError::Malformed(format!(
                "record length {len} shorter than its own framing"
            )));
        }

        let record = &self.data[..len];
        if record[len - 1] != b'\n' {
            return Err(PaxError::Malformed(
                "record does not end with a line feed".into(),
            ));
        }

        let kv = &record[digits_end + 1..len - 1];
        let eq = kv
            .iter()
            .position(|&b| b == b'=')
            .ok_or_else(|| PaxError::Malformed("record has no '=' separator".into()))?;

        let (key, value) = (&kv[..eq], &kv[eq + 1..]);
        self.data = &self.data[len..];
        Ok(PaxRecord { key, value })
    }
}

impl<'a> Iterator for PaxRecords<'a> {
    type Item = Result<PaxRecord<'a>, PaxError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        match self.parse_next() {
            Ok(record) => Some(Ok(record)),
            Err(e) => {
                // Stop after the first framing error.
                self.data = &[];
                Some(Err(e))
            }
        }
    }
}
