//! Cross-checks against archives produced and parsed by the `tar` crate.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use tarview::{Archive, EntryType};

/// Build a tar archive in memory with the `tar` crate.
fn create_tar_with<F>(f: F) -> Vec<u8>
where
    F: FnOnce(&mut tar::Builder<&mut Vec<u8>>),
{
    let mut data = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut data);
        f(&mut builder);
        builder.finish().unwrap();
    }
    data
}

fn append_file(builder: &mut tar::Builder<&mut Vec<u8>>, path: &str, content: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_mode(0o644);
    header.set_uid(1000);
    header.set_gid(1000);
    header.set_mtime(1234567890);
    header.set_size(content.len() as u64);
    header.set_entry_type(tar::EntryType::Regular);
    builder.append_data(&mut header, path, content).unwrap();
}

#[test]
fn empty_tar() {
    let data = create_tar_with(|_| {});
    let mut archive = Archive::from_reader(Cursor::new(data));
    assert!(archive.next_entry().unwrap().is_none());
    assert!(!archive.errored());
}

#[test]
fn single_file_fields_match() {
    let data = create_tar_with(|b| {
        append_file(b, "hello.txt", b"Hello, World!");
    });

    let mut archive = Archive::from_reader(Cursor::new(data));
    let entry = archive.next_entry().unwrap().unwrap();
    assert_eq!(entry.path(), Path::new("hello.txt"));
    assert_eq!(entry.entry_type(), EntryType::Regular);
    assert_eq!(entry.size(), 13);

    let meta = entry.metadata();
    assert_eq!(meta.mode, 0o644);
    assert_eq!(meta.uid, 1000);
    assert_eq!(meta.gid, 1000);
    assert_eq!(meta.mtime, 1234567890);

    assert_eq!(&*entry.read_data(0, 13).unwrap(), b"Hello, World!");
    assert!(archive.next_entry().unwrap().is_none());
}

#[test]
fn multiple_files_in_order() {
    let data = create_tar_with(|b| {
        for i in 1..=3 {
            append_file(b, &format!("file{i}.txt"), format!("Content {i}").as_bytes());
        }
    });

    let mut archive = Archive::from_reader(Cursor::new(data));
    for i in 1..=3 {
        let entry = archive.next_entry().unwrap().unwrap();
        assert_eq!(entry.path(), PathBuf::from(format!("file{i}.txt")));
        assert_eq!(
            &*entry.read_data(0, entry.size()).unwrap(),
            format!("Content {i}").as_bytes()
        );
    }
    assert!(archive.next_entry().unwrap().is_none());
}

#[test]
fn directory_symlink_and_hardlink() {
    let data = create_tar_with(|b| {
        let mut dir = tar::Header::new_gnu();
        dir.set_mode(0o755);
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_size(0);
        b.append_data(&mut dir, "mydir/", std::io::empty()).unwrap();

        append_file(b, "original.txt", b"content");

        let mut link = tar::Header::new_gnu();
        link.set_mode(0o644);
        link.set_entry_type(tar::EntryType::Link);
        link.set_size(0);
        b.append_link(&mut link, "hardlink.txt", "original.txt")
            .unwrap();

        let mut sym = tar::Header::new_gnu();
        sym.set_mode(0o777);
        sym.set_entry_type(tar::EntryType::Symlink);
        sym.set_size(0);
        b.append_link(&mut sym, "symlink", "original.txt").unwrap();
    });

    let mut archive = Archive::from_reader(Cursor::new(data));

    let dir = archive.next_entry().unwrap().unwrap();
    assert!(dir.metadata().is_dir());

    let file = archive.next_entry().unwrap().unwrap();
    assert_eq!(file.path(), Path::new("original.txt"));

    let hard = archive.next_entry().unwrap().unwrap();
    assert!(hard.metadata().is_hard_link());
    assert_eq!(
        hard.metadata().link_target.as_deref(),
        Some(Path::new("original.txt"))
    );

    let sym = archive.next_entry().unwrap().unwrap();
    assert!(sym.metadata().is_symlink());
    assert_eq!(
        sym.metadata().link_target.as_deref(),
        Some(Path::new("original.txt"))
    );

    assert!(archive.next_entry().unwrap().is_none());
}

#[test]
fn long_paths_match_tar_crate() {
    let paths = vec![
        "short.txt".to_string(),
        format!("medium/{}", "m".repeat(80)),
        format!("long/{}", "l".repeat(150)),
        format!("{}/{}", "deep/".repeat(40), "leaf.txt"),
    ];

    let data = create_tar_with(|b| {
        for path in &paths {
            append_file(b, path, b"content");
        }
    });

    // Parse with the tar crate.
    let mut tar_archive = tar::Archive::new(Cursor::new(data.clone()));
    let tar_paths: Vec<_> = tar_archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_path_buf())
        .collect();

    // Parse with ours.
    let mut archive = Archive::from_reader(Cursor::new(data));
    let mut our_paths = Vec::new();
    while let Some(entry) = archive.next_entry().unwrap() {
        our_paths.push(entry.path().to_path_buf());
    }

    assert_eq!(tar_paths, our_paths);
    assert_eq!(our_paths.len(), paths.len());
}

#[test]
fn ustar_prefix_is_composed() {
    let dir = "usr/share/some-quite-long-package-directory-name/nested/further/down/the/tree";
    let name = "file-with-a-reasonably-long-name.conf";
    let full = format!("{dir}/{name}");
    assert!(full.len() > 100 && full.len() < 256);

    let data = create_tar_with(|b| {
        let mut header = tar::Header::new_ustar();
        header.set_mode(0o644);
        header.set_size(4);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_path(&full).unwrap();
        header.set_cksum();
        b.append(&header, b"test".as_slice()).unwrap();
    });

    // The prefix field must actually be in play for this test to mean
    // anything.
    assert!(data[345] != 0);

    let mut archive = Archive::from_reader(Cursor::new(data));
    let entry = archive.next_entry().unwrap().unwrap();
    assert_eq!(entry.path(), PathBuf::from(&full));
}

#[test]
fn mapped_and_streamed_agree() {
    let data = create_tar_with(|b| {
        append_file(b, "a.bin", &[0xAAu8; 700]);
        append_file(b, "b.bin", b"small");
    });

    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut tmp, &data).unwrap();

    let mut streamed = Archive::from_reader(Cursor::new(data));
    let mut mapped = Archive::open_mapped(tmp.path()).unwrap();

    loop {
        let from_stream = streamed.next_entry().unwrap();
        let from_map = mapped.next_entry().unwrap();
        match (from_stream, from_map) {
            (None, None) => break,
            (Some(s), Some(m)) => {
                assert_eq!(s.path(), m.path());
                assert_eq!(s.size(), m.size());
                assert_eq!(
                    s.read_data(0, s.size()).unwrap(),
                    m.read_data(0, m.size()).unwrap()
                );
            }
            _ => panic!("backings disagree on entry count"),
        }
    }
}

mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    fn path_strategy() -> impl Strategy<Value = String> {
        proptest::string::string_regex("[a-zA-Z0-9_][a-zA-Z0-9_.+-]{0,50}")
            .expect("valid regex")
            .prop_filter("non-empty", |s| !s.is_empty())
    }

    fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(any::<u8>(), 0..1024)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn roundtrip_single_file(path in path_strategy(), content in content_strategy()) {
            let data = create_tar_with(|b| {
                append_file(b, &path, &content);
            });

            let mut archive = Archive::from_reader(Cursor::new(data));
            let entry = archive.next_entry().unwrap().expect("one entry");
            prop_assert_eq!(entry.path(), Path::new(&path));
            prop_assert_eq!(entry.size(), content.len() as u64);
            prop_assert_eq!(&*entry.read_data(0, entry.size()).unwrap(), &content[..]);
            drop(entry);
            prop_assert!(archive.next_entry().unwrap().is_none());
        }

        #[test]
        fn entry_count_matches_tar_crate(
            paths in prop::collection::vec(path_strategy(), 1..8)
        ) {
            let data = create_tar_with(|b| {
                for (i, path) in paths.iter().enumerate() {
                    append_file(b, path, format!("content{i}").as_bytes());
                }
            });

            let mut tar_archive = tar::Archive::new(Cursor::new(data.clone()));
            let tar_count = tar_archive.entries().unwrap().count();

            let mut archive = Archive::from_reader(Cursor::new(data));
            let mut our_count = 0;
            while archive.next_entry().unwrap().is_some() {
                our_count += 1;
            }

            prop_assert_eq!(tar_count, our_count);
            prop_assert_eq!(our_count, paths.len());
        }
    }
}
