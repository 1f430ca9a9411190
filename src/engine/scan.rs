use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Recursively collect files under `root` whose extension is in `extensions`.
///
/// Matching is case-insensitive and ignores a leading dot; an empty list
/// accepts every file. A `root` that is itself a file is returned as-is when
/// it matches. Results are sorted for a stable import order.
pub(crate) fn find_files(root: &Path, extensions: &[String]) -> io::Result<Vec<PathBuf>> {
    let wanted: Vec<String> = extensions
        .iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect();
    let mut found = Vec::new();
    if root.is_file() {
        if has_wanted_extension(root, &wanted) {
            found.push(root.to_path_buf());
        }
        return Ok(found);
    }
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() && has_wanted_extension(&path, &wanted) {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

fn has_wanted_extension(path: &Path, wanted: &[String]) -> bool {
    if wanted.is_empty() {
        return true;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| wanted.iter().any(|want| want.eq_ignore_ascii_case(ext)))
}
