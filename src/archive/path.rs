use std::path::{Component, Path, PathBuf};

use crate::error::{AgentError, Result};

fn has_windows_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

/// Convert an archive entry name to a relative path.
///
/// Returns `None` for empty names, absolute names, drive-prefixed names and any
/// name containing a `..` segment.
pub(crate) fn entry_rel_path(raw: &str) -> Option<PathBuf> {
    let normalized = raw.replace('\\', "/");
    if normalized.starts_with('/') || has_windows_drive_prefix(&normalized) {
        return None;
    }

    let mut relative = PathBuf::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => {}
            ".." => return None,
            _ => relative.push(part),
        }
    }

    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

/// Join a relative entry path onto `dest_dir`, refusing anything that would land outside it.
pub(super) fn contained_path(dest_dir: &Path, relative: &Path) -> Result<PathBuf> {
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(AgentError::io(format!(
            "archive entry {:?} escapes the destination directory",
            relative
        )));
    }
    Ok(dest_dir.join(relative))
}
