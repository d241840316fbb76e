//! Semantic layer over PAX extended-header records.
//!
//! The header crate frames the raw `len key=value\n` records; this module
//! gives them meaning: the standard per-entry overrides, the GNU sparse
//! marker keys, extended attributes and ACL payloads. Records accumulate
//! into an ordered latest-wins mapping, mirroring how repeated keys behave
//! in real archives.

use std::collections::BTreeMap;
use std::ffi::OsString;

use tarview_header::PaxRecords;

use crate::acl::{parse_acl_text, AclEntry};
use crate::error::{Error, Result};
use crate::sparse::SparseSegment;

/// Xattr key prefixes recognised in PAX records.
const XATTR_PREFIXES: [&str; 2] = ["SCHILY.xattr.", "LIBARCHIVE.xattr."];

/// A parsed PAX record set pending application to the next real entry.
#[derive(Debug, Default)]
pub(crate) struct PaxBundle {
    records: BTreeMap<String, Vec<u8>>,
}

impl PaxBundle {
    /// Parse a raw PAX payload into a bundle. Duplicate keys keep the last
    /// value.
    pub(crate) fn parse(data: &[u8]) -> Result<Self> {
        let mut records = BTreeMap::new();
        for record in PaxRecords::new(data) {
            let record = record?;
            records.insert(record.key()?.to_owned(), record.value_bytes().to_vec());
        }
        Ok(Self { records })
    }

    fn get(&self, key: &str) -> Option<&[u8]> {
        self.records.get(key).map(Vec::as_slice)
    }

    fn get_str(&self, key: &str) -> Result<Option<&str>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => std::str::from_utf8(value).map(Some).map_err(|_| {
                Error::InvalidHeader(format!("PAX {key} value is not valid UTF-8"))
            }),
        }
    }

    /// Decode a decimal integer value.
    pub(crate) fn decimal(&self, key: &str) -> Result<Option<u64>> {
        match self.get_str(key)? {
            None => Ok(None),
            Some(text) => text.parse().map(Some).map_err(|_| {
                Error::InvalidHeader(format!("PAX {key} value {text:?} is not a decimal integer"))
            }),
        }
    }

    /// `path` override.
    pub(crate) fn path(&self) -> Option<&[u8]> {
        self.get("path")
    }

    /// `linkpath` override.
    pub(crate) fn link_path(&self) -> Option<&[u8]> {
        self.get("linkpath")
    }

    /// `uname` override.
    pub(crate) fn uname(&self) -> Option<&[u8]> {
        self.get("uname")
    }

    /// `gname` override.
    pub(crate) fn gname(&self) -> Option<&[u8]> {
        self.get("gname")
    }

    /// `mtime` override. PAX allows sub-second precision; the fractional
    /// part is truncated.
    pub(crate) fn mtime(&self) -> Result<Option<u64>> {
        match self.get_str("mtime")? {
            None => Ok(None),
            Some(text) => {
                let seconds = text.split('.').next().unwrap_or(text);
                seconds.parse().map(Some).map_err(|_| {
                    Error::InvalidHeader(format!("PAX mtime value {text:?} is not a timestamp"))
                })
            }
        }
    }

    /// True when any GNU sparse marker key is present, forcing sparse
    /// interpretation of the following entry.
    pub(crate) fn has_sparse_markers(&self) -> bool {
        self.records.contains_key("GNU.sparse.major")
            || self.records.contains_key("GNU.sparse.minor")
            || self.records.contains_key("GNU.sparse.map")
    }

    /// The `(major, minor)` sparse format version, defaulting to zero.
    pub(crate) fn sparse_version(&self) -> Result<(u64, u64)> {
        Ok((
            self.decimal("GNU.sparse.major")?.unwrap_or(0),
            self.decimal("GNU.sparse.minor")?.unwrap_or(0),
        ))
    }

    /// The logical file size: `GNU.sparse.realsize` (1.0) or
    /// `GNU.sparse.size` (0.x).
    pub(crate) fn sparse_real_size(&self) -> Result<Option<u64>> {
        match self.decimal("GNU.sparse.realsize")? {
            Some(size) => Ok(Some(size)),
            None => self.decimal("GNU.sparse.size"),
        }
    }

    /// `GNU.sparse.name`: the unmangled member path of a sparse entry.
    pub(crate) fn sparse_name(&self) -> Option<&[u8]> {
        self.get("GNU.sparse.name")
    }

    /// The inline 0.x sparse map: comma-separated decimal
    /// `offset,size,offset,size,...` pairs.
    pub(crate) fn sparse_inline_map(&self) -> Result<Option<Vec<SparseSegment>>> {
        let Some(text) = self.get_str("GNU.sparse.map")? else {
            return Ok(None);
        };
        let numbers = text
            .split(',')
            .map(|n| {
                n.parse::<u64>().map_err(|_| {
                    Error::InvalidHeader(format!("GNU.sparse.map value {n:?} is not decimal"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        if numbers.len() % 2 != 0 {
            return Err(Error::InvalidHeader(
                "GNU.sparse.map holds an odd number of values".into(),
            ));
        }
        Ok(Some(
            numbers
                .chunks_exact(2)
                .map(|pair| SparseSegment {
                    offset: pair[0],
                    size: pair[1],
                })
                .collect(),
        ))
    }

    /// Extended attributes, with the recognised key prefixes stripped.
    /// Ordered by attribute name; `SCHILY` wins over `LIBARCHIVE` for the
    /// same name only by map order of the full keys.
    pub(crate) fn xattrs(&self) -> BTreeMap<OsString, Vec<u8>> {
        let mut xattrs = BTreeMap::new();
        for (key, value) in &self.records {
            for prefix in XATTR_PREFIXES {
                if let Some(name) = key.strip_prefix(prefix) {
                    xattrs.insert(OsString::from(name), value.clone());
                }
            }
        }
        xattrs
    }

    /// The `(access, default)` ACL lists from `SCHILY.acl.*` records.
    pub(crate) fn acls(&self) -> Result<(Vec<AclEntry>, Vec<AclEntry>)> {
        let parse = |key: &str| -> Result<Vec<AclEntry>> {
            match self.get_str(key)? {
                None => Ok(Vec::new()),
                Some(text) => parse_acl_text(text),
            }
        };
        Ok((parse("SCHILY.acl.access")?, parse("SCHILY.acl.default")?))
    }

    #[cfg(test)]
    fn records(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::AclTag;

    /// Emit a record set in `LEN SP KEY=VALUE LF` form.
    fn emit(records: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (key, value) in records {
            // LEN counts its own digits, so grow until stable.
            let body = key.len() + value.len() + 3; // space, '=', LF
            let mut len = body + 1;
            while len.to_string().len() + body != len {
                len = len.to_string().len() + body;
            }
            out.extend_from_slice(len.to_string().as_bytes());
            out.push(b' ');
            out.extend_from_slice(key.as_bytes());
            out.push(b'=');
            out.extend_from_slice(value);
            out.push(b'\n');
        }
        out
    }

    #[test]
    fn standard_overrides() {
        let data = emit(&[
            ("path", b"dir/renamed"),
            ("size", b"7"),
            ("uid", b"1000"),
            ("mtime", b"1234567890.5"),
        ]);
        let bundle = PaxBundle::parse(&data).unwrap();
        assert_eq!(bundle.path(), Some(b"dir/renamed".as_slice()));
        assert_eq!(bundle.decimal("size").unwrap(), Some(7));
        assert_eq!(bundle.decimal("uid").unwrap(), Some(1000));
        assert_eq!(bundle.mtime().unwrap(), Some(1234567890));
    }

    #[test]
    fn duplicate_keys_latest_wins() {
        let data = emit(&[("path", b"first"), ("path", b"second")]);
        let bundle = PaxBundle::parse(&data).unwrap();
        assert_eq!(bundle.path(), Some(b"second".as_slice()));
    }

    #[test]
    fn reemit_and_reparse_is_identity() {
        let data = emit(&[
            ("path", b"a/b"),
            ("size", b"1234"),
            ("SCHILY.xattr.user.comment", b"hello world"),
            ("GNU.sparse.major", b"1"),
        ]);
        let bundle = PaxBundle::parse(&data).unwrap();

        let reemitted: Vec<(String, Vec<u8>)> = bundle
            .records()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let pairs: Vec<(&str, &[u8])> = reemitted
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
            .collect();
        let again = PaxBundle::parse(&emit(&pairs)).unwrap();
        assert_eq!(bundle.records(), again.records());
    }

    #[test]
    fn sparse_markers() {
        let data = emit(&[
            ("GNU.sparse.major", b"1"),
            ("GNU.sparse.minor", b"0"),
            ("GNU.sparse.realsize", b"1000"),
            ("GNU.sparse.name", b"big.img"),
        ]);
        let bundle = PaxBundle::parse(&data).unwrap();
        assert!(bundle.has_sparse_markers());
        assert_eq!(bundle.sparse_version().unwrap(), (1, 0));
        assert_eq!(bundle.sparse_real_size().unwrap(), Some(1000));
        assert_eq!(bundle.sparse_name(), Some(b"big.img".as_slice()));
    }

    #[test]
    fn sparse_inline_map() {
        let data = emit(&[("GNU.sparse.map", b"0,100,200,100")]);
        let bundle = PaxBundle::parse(&data).unwrap();
        assert!(bundle.has_sparse_markers());
        assert_eq!(bundle.sparse_version().unwrap(), (0, 0));
        let map = bundle.sparse_inline_map().unwrap().unwrap();
        assert_eq!(
            map,
            vec![
                SparseSegment {
                    offset: 0,
                    size: 100
                },
                SparseSegment {
                    offset: 200,
                    size: 100
                },
            ]
        );

        let odd = emit(&[("GNU.sparse.map", b"0,100,200")]);
        let bundle = PaxBundle::parse(&odd).unwrap();
        assert!(bundle.sparse_inline_map().is_err());
    }

    #[test]
    fn xattrs_strip_both_prefixes() {
        let data = emit(&[
            ("SCHILY.xattr.user.a", b"1"),
            ("LIBARCHIVE.xattr.user.b", b"2"),
            ("unrelated", b"3"),
        ]);
        let bundle = PaxBundle::parse(&data).unwrap();
        let xattrs = bundle.xattrs();
        assert_eq!(xattrs.len(), 2);
        assert_eq!(xattrs[&OsString::from("user.a")], b"1");
        assert_eq!(xattrs[&OsString::from("user.b")], b"2");
    }

    #[test]
    fn acl_records() {
        let data = emit(&[
            ("SCHILY.acl.access", b"user::rw-,other::r--"),
            ("SCHILY.acl.default", b"group::r-x"),
        ]);
        let bundle = PaxBundle::parse(&data).unwrap();
        let (access, default) = bundle.acls().unwrap();
        assert_eq!(access.len(), 2);
        assert_eq!(access[0].tag, AclTag::UserObj);
        assert_eq!(default.len(), 1);
        assert_eq!(default[0].tag, AclTag::GroupObj);
    }

    #[test]
    fn bad_numbers_are_loud() {
        let data = emit(&[("size", b"12x4")]);
        let bundle = PaxBundle::parse(&data).unwrap();
        assert!(bundle.decimal("size").is_err());
    }
}
