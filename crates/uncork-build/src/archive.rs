//! Deterministic archive primitives shared by the format builders.
//!
//! Determinism guarantees:
//! - Entries sorted lexicographically by relative path (with optional
//!   explicitly-ordered leading entries for formats that expect metadata
//!   files first)
//! - All timestamps set to 0 (Unix epoch)
//! - All ownership set to 0:0 (root:root)
//! - Permissions preserved as-is from source

use crate::BuildError;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Create a deterministic tar archive from a directory.
///
/// `leading` names top-level entries emitted before everything else (e.g.
/// `.PKGINFO` for pacman); `exclude` names top-level entries omitted
/// entirely (e.g. `DEBIAN` for the deb data archive). `prefix` is prepended
/// to every entry path (`./` for deb archives).
pub fn pack_tree(
    source_dir: &Path,
    leading: &[&str],
    exclude: &[&str],
    prefix: &str,
) -> Result<Vec<u8>, BuildError> {
    let mut entries = collect_entries(source_dir, source_dir)?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let excluded = |rel: &str| {
        exclude
            .iter()
            .any(|e| rel == *e || rel.starts_with(&format!("{e}/")))
    };

    let mut ordered: Vec<(String, PathBuf)> = Vec::with_capacity(entries.len());
    for lead in leading {
        if let Some(pos) = entries.iter().position(|(rel, _)| rel == lead) {
            ordered.push(entries.remove(pos));
        }
    }
    ordered.extend(entries.into_iter().filter(|(rel, _)| !excluded(rel)));

    let mut ar = tar::Builder::new(Vec::new());
    ar.follow_symlinks(false);

    for (rel_path, full_path) in &ordered {
        let name = format!("{prefix}{rel_path}");
        let ft = full_path.symlink_metadata()?.file_type();
        if ft.is_file() {
            append_file(&mut ar, &name, full_path)?;
        } else if ft.is_dir() {
            append_dir(&mut ar, &name, full_path)?;
        } else if ft.is_symlink() {
            append_symlink(&mut ar, &name, full_path)?;
        }
    }

    Ok(ar.into_inner()?)
}

/// Gzip-compress with a zeroed header timestamp.
pub fn gzip(data: &[u8]) -> Result<Vec<u8>, BuildError> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Zstd-compress at the given level.
pub fn zstd_compress(data: &[u8], level: i32) -> Result<Vec<u8>, BuildError> {
    zstd::encode_all(data, level).map_err(BuildError::Io)
}

/// Write a deterministic `ar` archive (the outer container of a `.deb`):
/// fixed epoch timestamps, 0:0 ownership, mode 100644.
pub fn write_ar(output: &Path, members: &[(&str, &[u8])]) -> Result<(), BuildError> {
    let mut f = std::fs::File::create(output)?;
    f.write_all(b"!<arch>\n")?;

    for (name, data) in members {
        // Header: name(16) mtime(12) uid(6) gid(6) mode(8) size(10) magic(2)
        let header = format!(
            "{:<16}{:<12}{:<6}{:<6}{:<8}{:<10}`\n",
            name,
            0,
            0,
            0,
            "100644",
            data.len()
        );
        f.write_all(header.as_bytes())?;
        f.write_all(data)?;
        if data.len() % 2 == 1 {
            f.write_all(b"\n")?;
        }
    }
    f.sync_all()?;
    Ok(())
}

fn collect_entries(root: &Path, current: &Path) -> Result<Vec<(String, PathBuf)>, BuildError> {
    let mut result = Vec::new();
    if !current.exists() {
        return Ok(result);
    }
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let full = entry.path();
        let rel = full
            .strip_prefix(root)
            .map_err(|e| std::io::Error::other(format!("path strip: {e}")))?
            .to_string_lossy()
            .into_owned();

        let meta = full.symlink_metadata()?;
        if meta.is_dir() {
            result.push((rel.clone(), full.clone()));
            result.extend(collect_entries(root, &full)?);
        } else {
            result.push((rel, full));
        }
    }
    Ok(result)
}

fn make_header(full_path: &Path, entry_type: tar::EntryType) -> Result<tar::Header, BuildError> {
    let meta = full_path.symlink_metadata()?;
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(meta.permissions().mode());
    Ok(header)
}

fn append_file(
    ar: &mut tar::Builder<Vec<u8>>,
    name: &str,
    full_path: &Path,
) -> Result<(), BuildError> {
    let data = std::fs::read(full_path)?;
    let mut header = make_header(full_path, tar::EntryType::Regular)?;
    header.set_size(data.len() as u64);
    header.set_cksum();
    ar.append_data(&mut header, name, data.as_slice())?;
    Ok(())
}

fn append_dir(
    ar: &mut tar::Builder<Vec<u8>>,
    name: &str,
    full_path: &Path,
) -> Result<(), BuildError> {
    let mut header = make_header(full_path, tar::EntryType::Directory)?;
    header.set_size(0);
    header.set_cksum();
    let path = if name.ends_with('/') {
        name.to_owned()
    } else {
        format!("{name}/")
    };
    ar.append_data(&mut header, &path, &[] as &[u8])?;
    Ok(())
}

fn append_symlink(
    ar: &mut tar::Builder<Vec<u8>>,
    name: &str,
    full_path: &Path,
) -> Result<(), BuildError> {
    let target = std::fs::read_link(full_path)?;
    let mut header = make_header(full_path, tar::EntryType::Symlink)?;
    header.set_size(0);
    header.set_cksum();
    ar.append_link(&mut header, name, &target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sample_tree(root: &Path) {
        fs::create_dir_all(root.join("opt/app/bin")).unwrap();
        fs::write(root.join("opt/app/bin/run"), b"#!/bin/sh\n").unwrap();
        fs::write(root.join("opt/app/data.bin"), b"payload").unwrap();
        fs::create_dir_all(root.join("usr/bin")).unwrap();
        std::os::unix::fs::symlink("/opt/app/bin/run", root.join("usr/bin/app")).unwrap();
    }

    #[test]
    fn pack_tree_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        sample_tree(dir.path());
        let a = pack_tree(dir.path(), &[], &[], "").unwrap();
        let b = pack_tree(dir.path(), &[], &[], "").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn identical_trees_pack_identically_across_directories() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        sample_tree(a.path());
        sample_tree(b.path());
        assert_eq!(
            pack_tree(a.path(), &[], &[], "").unwrap(),
            pack_tree(b.path(), &[], &[], "").unwrap()
        );
    }

    #[test]
    fn leading_entries_come_first() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".PKGINFO"), b"pkgname = x\n").unwrap();
        fs::write(dir.path().join(".INSTALL"), b"post_install() { :; }\n").unwrap();
        fs::create_dir_all(dir.path().join("opt")).unwrap();

        let data = pack_tree(dir.path(), &[".PKGINFO", ".INSTALL"], &[], "").unwrap();
        let mut ar = tar::Archive::new(data.as_slice());
        let names: Vec<String> = ar
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names[0], ".PKGINFO");
        assert_eq!(names[1], ".INSTALL");
    }

    #[test]
    fn excluded_entries_are_omitted() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("DEBIAN")).unwrap();
        fs::write(dir.path().join("DEBIAN/control"), b"Package: x\n").unwrap();
        fs::create_dir_all(dir.path().join("opt")).unwrap();
        fs::write(dir.path().join("opt/file"), b"y").unwrap();

        let data = pack_tree(dir.path(), &[], &["DEBIAN"], "./").unwrap();
        let mut ar = tar::Archive::new(data.as_slice());
        let names: Vec<String> = ar
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| !n.contains("DEBIAN")));
        assert!(names.contains(&"./opt/file".to_owned()));
    }

    #[test]
    fn tar_headers_are_normalized() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("file"), b"data").unwrap();
        let data = pack_tree(dir.path(), &[], &[], "").unwrap();
        let mut ar = tar::Archive::new(data.as_slice());
        let entry = ar.entries().unwrap().next().unwrap().unwrap();
        let header = entry.header();
        assert_eq!(header.mtime().unwrap(), 0);
        assert_eq!(header.uid().unwrap(), 0);
        assert_eq!(header.gid().unwrap(), 0);
    }

    #[test]
    fn gzip_is_deterministic() {
        let a = gzip(b"same content").unwrap();
        let b = gzip(b"same content").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn zstd_roundtrip() {
        let compressed = zstd_compress(b"hello zstd", 19).unwrap();
        let restored = zstd::decode_all(compressed.as_slice()).unwrap();
        assert_eq!(restored, b"hello zstd");
    }

    #[test]
    fn ar_archive_layout() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("test.deb");
        write_ar(
            &out,
            &[
                ("debian-binary", b"2.0\n"),
                ("control.tar.gz", b"ctrl"),
                ("data.tar.gz", b"data!"),
            ],
        )
        .unwrap();

        let content = fs::read(&out).unwrap();
        assert!(content.starts_with(b"!<arch>\n"));
        let text = String::from_utf8_lossy(&content);
        assert!(text.contains("debian-binary"));
        assert!(text.contains("control.tar.gz"));
        // Odd-sized member is padded to an even boundary.
        assert_eq!(content.len() % 2, 0);
    }

    #[test]
    fn ar_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.deb");
        let b = dir.path().join("b.deb");
        let members: &[(&str, &[u8])] = &[("debian-binary", b"2.0\n"), ("data.tar.gz", b"xyz")];
        write_ar(&a, members).unwrap();
        write_ar(&b, members).unwrap();
        assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap());
    }
}
