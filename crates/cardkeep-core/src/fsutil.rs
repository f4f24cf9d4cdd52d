//! Filesystem helpers shared by the stores.
//!
//! Every id that reaches the filesystem goes through [`normalize_id`] first:
//! ids are relative, `/`-separated, and may never climb out of their root.

use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::error::StoreError;

/// Normalize a client-supplied relative id and reject anything that could
/// escape the root directory.
///
/// Backslashes are treated as separators, empty segments and `.` segments
/// are dropped.
///
/// # Errors
///
/// Returns [`StoreError::InvalidId`] for empty ids, absolute paths, drive
/// prefixes, `..` segments and NUL bytes.
pub fn normalize_id(id: &str) -> Result<String, StoreError> {
    let invalid = |reason: &str| StoreError::InvalidId {
        id: id.to_owned(),
        reason: reason.to_owned(),
    };

    if id.contains('\0') {
        return Err(invalid("null bytes are not allowed"));
    }
    let unified = id.replace('\\', "/");
    if unified.starts_with('/') {
        return Err(invalid("absolute paths are not allowed"));
    }
    if unified.split('/').next().is_some_and(|s| s.contains(':')) {
        return Err(invalid("drive prefixes are not allowed"));
    }

    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(invalid("path traversal (..) is not allowed")),
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return Err(invalid("id must not be empty"));
    }
    Ok(segments.join("/"))
}

/// Normalize an id and require a `.json` extension (case-insensitive).
///
/// # Errors
///
/// Same as [`normalize_id`], plus [`StoreError::InvalidId`] when the
/// extension is missing.
pub fn normalize_json_id(id: &str) -> Result<String, StoreError> {
    let id = normalize_id(id)?;
    if !has_extension(Path::new(&id), "json") {
        return Err(StoreError::InvalidId {
            id,
            reason: "expected a .json file".to_owned(),
        });
    }
    Ok(id)
}

/// Normalize an optional folder id. Empty means the root.
///
/// # Errors
///
/// Same as [`normalize_id`] for non-empty input.
pub fn normalize_folder(folder: &str) -> Result<String, StoreError> {
    if folder.trim_matches(|c| c == '/' || c == '\\').trim().is_empty() {
        return Ok(String::new());
    }
    normalize_id(folder)
}

/// Join a normalized id onto its root.
#[must_use]
pub fn resolve(root: &Path, id: &str) -> PathBuf {
    id.split('/').fold(root.to_path_buf(), |acc, seg| acc.join(seg))
}

/// The id of `path` relative to `root`, `/`-separated.
#[must_use]
pub fn relative_id(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether `path` has the given extension, ignoring case.
#[must_use]
pub fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// Reduce a user-supplied name to a safe single path segment.
///
/// Keeps Unicode letters and digits plus `-`, `_`, `.` and maps whitespace to
/// `_`. Leading dots are stripped so the result is never hidden or `..`.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .trim()
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                Some(c)
            } else if c.is_whitespace() {
                Some('_')
            } else {
                None
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_owned();
    if cleaned.is_empty() {
        "unnamed".to_owned()
    } else {
        cleaned
    }
}

/// First free path in `dir` for `file_name`, appending `_1`, `_2`, ... to
/// the stem on collision.
#[must_use]
pub fn unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = split_name(file_name);
    let mut counter = 1u32;
    loop {
        let candidate = dir.join(format!("{stem}_{counter}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        counter = counter.saturating_add(1);
    }
}

/// Split `name.ext` into (`name`, `.ext`). Names without a dot keep an empty
/// extension.
fn split_name(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => file_name.split_at(idx),
        _ => (file_name, ""),
    }
}

/// Write `bytes` to `path` through a temporary sibling and a rename, so
/// readers never observe a half-written file.
///
/// # Errors
///
/// Returns [`StoreError::Io`] if the parent cannot be created or the write
/// or rename fails.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(parent, &e))?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(
        ".{file_name}.{}.tmp",
        uuid::Uuid::new_v4().as_simple()
    ));
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| StoreError::io(&tmp, &e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StoreError::io(path, &e));
    }
    Ok(())
}

/// Move a file or directory into `trash_dir` under a timestamped name and
/// return its new location.
///
/// Falls back to copy-and-remove when a rename crosses filesystems.
///
/// # Errors
///
/// Returns [`StoreError::Io`] if the trash directory cannot be created or
/// the move fails.
pub fn move_to_trash(path: &Path, trash_dir: &Path) -> Result<PathBuf, StoreError> {
    std::fs::create_dir_all(trash_dir).map_err(|e| StoreError::io(trash_dir, &e))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_owned());
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let target = unique_path(trash_dir, &format!("{stamp}_{name}"));

    if std::fs::rename(path, &target).is_err() {
        if path.is_dir() {
            copy_dir_all(path, &target).map_err(|e| StoreError::io(path, &e))?;
            std::fs::remove_dir_all(path).map_err(|e| StoreError::io(path, &e))?;
        } else {
            std::fs::copy(path, &target).map_err(|e| StoreError::io(path, &e))?;
            std::fs::remove_file(path).map_err(|e| StoreError::io(path, &e))?;
        }
    }
    tracing::debug!(from = %path.display(), to = %target.display(), "moved to trash");
    Ok(target)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// Entries below `root` (excluding `root`), skipping hidden entries and
/// everything beneath them. Symlinks are not followed. Unreadable entries
/// are skipped, and a missing root yields nothing.
pub fn visible_entries(root: &Path) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .filter_map(Result::ok)
}

/// Recursively collect files under `root` with the given extension,
/// skipping hidden files and directories.
#[must_use]
pub fn walk_files(root: &Path, ext: &str) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = visible_entries(root)
        .filter(|e| e.file_type().is_file() && has_extension(e.path(), ext))
        .map(DirEntry::into_path)
        .collect();
    out.sort();
    out
}

/// Recursively collect sub-directories of `root` (excluding `root`),
/// skipping hidden ones.
#[must_use]
pub fn walk_dirs(root: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = visible_entries(root)
        .filter(|e| e.file_type().is_dir())
        .map(DirEntry::into_path)
        .collect();
    out.sort();
    out
}

/// Copy a directory tree, returning `(file_count, total_bytes)`.
///
/// Hidden entries are copied. Symlinks are skipped, never followed.
///
/// # Errors
///
/// Propagates the first I/O error.
pub fn copy_dir_all(src: &Path, dst: &Path) -> std::io::Result<(u64, u64)> {
    copy_tree(src, dst, |_, _| true)
}

/// Copy the regular files under `src` accepted by `filter`, given the
/// file's relative id and metadata. Returns `(file_count, total_bytes)`.
///
/// Directories are created as they are reached, so an accepted file always
/// has its parent. Symlinks are skipped.
///
/// # Errors
///
/// Propagates the first I/O or traversal error.
pub fn copy_tree(
    src: &Path,
    dst: &Path,
    mut filter: impl FnMut(&str, &std::fs::Metadata) -> bool,
) -> std::io::Result<(u64, u64)> {
    std::fs::create_dir_all(dst)?;
    let mut files = 0u64;
    let mut bytes = 0u64;
    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(std::io::Error::other)?;
        let to = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&to)?;
        } else if file_type.is_file() {
            let meta = entry.metadata()?;
            if filter(&relative_id(src, entry.path()), &meta) {
                bytes += std::fs::copy(entry.path(), &to)?;
                files += 1;
            }
        } else {
            tracing::debug!(path = %entry.path().display(), "symlink skipped");
        }
    }
    Ok((files, bytes))
}
