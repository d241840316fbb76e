//! Filesystem extraction adapter.
//!
//! A thin writer driven purely by the canonical metadata and the entry's
//! data accessor. Policy decisions live here, outside the format core:
//! permission bits are applied best-effort, ownership is never changed,
//! sparse files are recreated with their holes, and [`safe_join`] is the
//! sanitiser callers use to keep member paths inside an extraction root.

use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use rustix::fs::{makedev, mknodat, FileType, Mode, CWD};
use tarview_header::EntryType;

use crate::entry::Entry;
use crate::error::{Error, Result};

/// Join a member path onto an extraction root, refusing paths that could
/// escape it.
///
/// # Errors
///
/// [`Error::InvalidOperation`] for absolute paths and any `..` component.
pub fn safe_join(root: &Path, member: &Path) -> Result<PathBuf> {
    let mut joined = root.to_path_buf();
    for component in member.components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) | Component::ParentDir => {
                return Err(Error::InvalidOperation(format!(
                    "member path {:?} escapes the extraction root",
                    member
                )));
            }
        }
    }
    Ok(joined)
}

impl Entry {
    /// Materialise this entry at `dest`.
    ///
    /// Parent directories are created as needed. Regular files are written
    /// from the data accessor (sparse members via seeks, so holes stay
    /// holes); directories, symlinks, hard links, FIFOs and device nodes
    /// are created with the matching primitives. Permission bits are
    /// applied best-effort; ownership and timestamps are left alone.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] for filesystem failures, [`Error::InvalidOperation`]
    /// for link entries without a target, [`Error::UnsupportedFeature`]
    /// for entry types that cannot be extracted.
    pub fn extract_to_path(&self, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let metadata = self.metadata();
        tracing::debug!(path = ?metadata.path, dest = ?dest, kind = ?metadata.entry_type, "extracting");

        match metadata.entry_type {
            EntryType::Regular | EntryType::Contiguous => {
                let mut file = fs::File::create(dest)?;
                match &metadata.sparse {
                    Some(map) => {
                        // Recreate holes instead of writing zeroes.
                        for segment in map.segments() {
                            let data = self.read_data(segment.offset, segment.size)?;
                            file.seek(SeekFrom::Start(segment.offset))?;
                            file.write_all(&data)?;
                        }
                        file.set_len(map.real_size())?;
                    }
                    None => {
                        self.copy_data_to(&mut file)?;
                    }
                }
            }
            EntryType::Directory => {
                fs::create_dir_all(dest)?;
            }
            EntryType::Symlink => {
                let target = self.require_link_target()?;
                std::os::unix::fs::symlink(target, dest)?;
                // Permission bits do not apply to the link itself.
                return Ok(());
            }
            EntryType::HardLink => {
                let target = self.require_link_target()?;
                fs::hard_link(target, dest)?;
                return Ok(());
            }
            EntryType::Fifo => {
                mknodat(
                    CWD,
                    dest,
                    FileType::Fifo,
                    Mode::from_raw_mode(metadata.mode),
                    0,
                )
                .map_err(std::io::Error::from)?;
            }
            EntryType::CharDevice | EntryType::BlockDevice => {
                let (major, minor) = metadata.device.ok_or_else(|| {
                    Error::InvalidOperation(format!(
                        "device entry {:?} carries no device numbers",
                        metadata.path
                    ))
                })?;
                let file_type = if metadata.entry_type == EntryType::CharDevice {
                    FileType::CharacterDevice
                } else {
                    FileType::BlockDevice
                };
                mknodat(
                    CWD,
                    dest,
                    file_type,
                    Mode::from_raw_mode(metadata.mode),
                    makedev(major, minor),
                )
                .map_err(std::io::Error::from)?;
            }
            other => {
                return Err(Error::UnsupportedFeature(format!(
                    "cannot extract {other:?} entry {:?}",
                    metadata.path
                )));
            }
        }

        if let Err(err) = fs::set_permissions(dest, fs::Permissions::from_mode(metadata.mode)) {
            tracing::debug!(dest = ?dest, %err, "could not apply permissions");
        }
        Ok(())
    }

    fn require_link_target(&self) -> Result<&Path> {
        self.metadata()
            .link_target
            .as_deref()
            .ok_or_else(|| {
                Error::InvalidOperation(format!(
                    "link entry {:?} carries no target",
                    self.metadata().path
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_join_accepts_normal_paths() {
        let root = Path::new("/tmp/out");
        assert_eq!(
            safe_join(root, Path::new("a/b/c.txt")).unwrap(),
            PathBuf::from("/tmp/out/a/b/c.txt")
        );
        assert_eq!(
            safe_join(root, Path::new("./a/./b")).unwrap(),
            PathBuf::from("/tmp/out/a/b")
        );
    }

    #[test]
    fn safe_join_rejects_escapes() {
        let root = Path::new("/tmp/out");
        assert!(safe_join(root, Path::new("/etc/passwd")).is_err());
        assert!(safe_join(root, Path::new("../up")).is_err());
        assert!(safe_join(root, Path::new("a/../../up")).is_err());
    }
}
