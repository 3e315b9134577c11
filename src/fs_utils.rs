use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path)
}

pub fn is_non_empty_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    path.is_file()
}

// Recursively collects files whose extension matches one of `extensions` (lowercase, no dot).
pub fn files_with_extensions(root: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_lowercase();
                extensions.iter().any(|wanted| *wanted == ext)
            })
            .unwrap_or(false);
        if matches {
            out.push(entry.into_path());
        }
    }
    out.sort();
    out
}

/// Returns `dir/stem.ext`, or the first free `dir/stem (n).ext` when that name is taken.
pub fn next_available_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let file_name = |suffix: Option<u32>| {
        let base = match suffix {
            Some(idx) => format!("{stem} ({idx})"),
            None => stem.to_string(),
        };
        if ext.is_empty() {
            base
        } else {
            format!("{base}.{ext}")
        }
    };

    let first = dir.join(file_name(None));
    if !first.exists() {
        return first;
    }
    let mut idx = 1u32;
    loop {
        let candidate = dir.join(file_name(Some(idx)));
        if !candidate.exists() {
            return candidate;
        }
        idx += 1;
    }
}
