//! Content digest of the normalized prefix template.
//!
//! The digest is stable across rebuilds of the same tree: entries are sorted
//! by relative path and each contributes its path, a length prefix, and its
//! content (or symlink target). Recorded in the manifest so downstream
//! builders and CI can verify the template they consume.

use std::path::Path;

pub fn hash_tree(root: &Path) -> std::io::Result<String> {
    let mut entries = collect(root, root)?;
    entries.sort();

    let mut hasher = blake3::Hasher::new();
    for rel in &entries {
        let full = root.join(rel);
        hasher.update(rel.as_bytes());
        hasher.update(&[0]);

        let meta = full.symlink_metadata()?;
        if meta.file_type().is_symlink() {
            let target = std::fs::read_link(&full)?;
            let target = target.to_string_lossy();
            hasher.update(b"link");
            hasher.update(&(target.len() as u64).to_le_bytes());
            hasher.update(target.as_bytes());
        } else if meta.is_file() {
            let data = std::fs::read(&full)?;
            hasher.update(b"file");
            hasher.update(&(data.len() as u64).to_le_bytes());
            hasher.update(&data);
        } else {
            hasher.update(b"dir");
        }
    }

    Ok(hasher.finalize().to_hex().to_string())
}

fn collect(root: &Path, current: &Path) -> std::io::Result<Vec<String>> {
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
            result.push(rel);
            result.extend(collect(root, &full)?);
        } else {
            result.push(rel);
        }
    }
    Ok(result)
}
