//! POSIX ACL text parsing.
//!
//! PAX archives carry ACLs as the short text form in `SCHILY.acl.access`
//! and `SCHILY.acl.default`: comma-separated `kind[:id]:rwx` tokens, e.g.
//! `user::rw-,group::r--,user:1000:rwx,mask::rwx,other::r--`.

use std::fmt;

use crate::error::{Error, Result};

/// Which principal an ACL entry applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclTag {
    /// The owning user (`user::`).
    UserObj,
    /// A named user (`user:<uid>:`).
    User,
    /// The owning group (`group::`).
    GroupObj,
    /// A named group (`group:<gid>:`).
    Group,
    /// The mask entry (`mask::`).
    Mask,
    /// Everyone else (`other::`).
    Other,
}

/// An `rwx` permission triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AclPerms {
    /// Read permission.
    pub read: bool,
    /// Write permission.
    pub write: bool,
    /// Execute permission.
    pub execute: bool,
}

impl fmt::Display for AclPerms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            if self.read { 'r' } else { '-' },
            if self.write { 'w' } else { '-' },
            if self.execute { 'x' } else { '-' },
        )
    }
}

/// One parsed ACL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AclEntry {
    /// Principal kind.
    pub tag: AclTag,
    /// uid/gid for named user/group entries; `None` otherwise.
    pub id: Option<u32>,
    /// Permission triple.
    pub perms: AclPerms,
}

fn parse_perms(token: &str, perms: &str) -> Result<AclPerms> {
    let bytes = perms.as_bytes();
    let ok = bytes.len() == 3
        && matches!(bytes[0], b'r' | b'-')
        && matches!(bytes[1], b'w' | b'-')
        && matches!(bytes[2], b'x' | b'-');
    if !ok {
        return Err(Error::InvalidHeader(format!(
            "bad ACL permissions {perms:?} in {token:?}"
        )));
    }
    Ok(AclPerms {
        read: bytes[0] == b'r',
        write: bytes[1] == b'w',
        execute: bytes[2] == b'x',
    })
}

/// Parse the comma-separated short text form into ordered entries.
///
/// # Errors
///
/// [`Error::InvalidHeader`] for unknown kinds, malformed permission
/// triples, ids that are not decimal integers, or ids attached to `mask`
/// or `other` entries.
pub fn parse_acl_text(text: &str) -> Result<Vec<AclEntry>> {
    let mut entries = Vec::new();

    for token in text.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        let mut fields = token.splitn(3, ':');
        let (kind, id, perms) = match (fields.next(), fields.next(), fields.next()) {
            (Some(kind), Some(id), Some(perms)) => (kind, id, perms),
            _ => {
                return Err(Error::InvalidHeader(format!(
                    "ACL entry {token:?} is not kind:id:perms"
                )))
            }
        };

        let tag = match (kind, id.is_empty()) {
            ("user", true) => AclTag::UserObj,
            ("user", false) => AclTag::User,
            ("group", true) => AclTag::GroupObj,
            ("group", false) => AclTag::Group,
            ("mask", true) => AclTag::Mask,
            ("other", true) => AclTag::Other,
            ("mask" | "other", false) => {
                return Err(Error::InvalidHeader(format!(
                    "ACL {kind} entry {token:?} must not carry an id"
                )))
            }
            _ => {
                return Err(Error::InvalidHeader(format!(
                    "unknown ACL entry kind {kind:?}"
                )))
            }
        };

        let id = if id.is_empty() {
            None
        } else {
            Some(id.parse::<u32>().map_err(|_| {
                Error::InvalidHeader(format!("ACL id {id:?} is not a decimal integer"))
            })?)
        };

        entries.push(AclEntry {
            tag,
            id,
            perms: parse_perms(token, perms)?,
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typical_access_acl() {
        let entries =
            parse_acl_text("user::rw-,group::r--,user:1000:rwx,mask::rwx,other::r--").unwrap();
        assert_eq!(entries.len(), 5);

        assert_eq!(entries[0].tag, AclTag::UserObj);
        assert_eq!(entries[0].id, None);
        assert_eq!(entries[0].perms.to_string(), "rw-");

        assert_eq!(entries[2].tag, AclTag::User);
        assert_eq!(entries[2].id, Some(1000));
        assert!(entries[2].perms.execute);

        assert_eq!(entries[3].tag, AclTag::Mask);
        assert_eq!(entries[4].tag, AclTag::Other);
    }

    #[test]
    fn named_group() {
        let entries = parse_acl_text("group:50:r-x").unwrap();
        assert_eq!(entries[0].tag, AclTag::Group);
        assert_eq!(entries[0].id, Some(50));
        assert_eq!(
            entries[0].perms,
            AclPerms {
                read: true,
                write: false,
                execute: true
            }
        );
    }

    #[test]
    fn whitespace_and_empty_tokens_tolerated() {
        let entries = parse_acl_text(" user::rwx , ,other::--- ").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].perms.to_string(), "---");
    }

    #[test]
    fn malformed_entries_rejected() {
        assert!(parse_acl_text("user::rw").is_err()); // too short
        assert!(parse_acl_text("user::rwxs").is_err()); // too long
        assert!(parse_acl_text("user::wrx").is_err()); // wrong order
        assert!(parse_acl_text("user:abc:rwx").is_err()); // non-decimal id
        assert!(parse_acl_text("wheel::rwx").is_err()); // unknown kind
        assert!(parse_acl_text("mask:5:rwx").is_err()); // id on mask
        assert!(parse_acl_text("other").is_err()); // missing fields
    }
}
