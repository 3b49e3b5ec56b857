use std::fs;
use std::io;
use std::path::Path;

use crate::error::{AgentError, Result};

use super::extract::write_entry;
use super::path::{contained_path, entry_rel_path};

/// Append a directory recursively to a zip archive under the provided prefix.
pub(crate) fn append_dir_tree_to_zip<W: io::Write + io::Seek>(
    writer: &mut zip::ZipWriter<W>,
    dir: &Path,
    prefix: &str,
    options: zip::write::SimpleFileOptions,
) -> Result<()> {
    for entry in walkdir::WalkDir::new(dir) {
        let entry = entry?;
        let path = entry.path();
        let relative = path
            .strip_prefix(dir)
            .map_err(|e| AgentError::io(e.to_string()))?;
        let relative = relative.to_string_lossy().replace('\\', "/");
        let archive_path = if relative.is_empty() {
            prefix.to_string()
        } else {
            format!("{prefix}/{relative}")
        };

        if entry.file_type().is_dir() && path != dir {
            writer.add_directory(archive_path.as_str(), options)?;
        } else if entry.file_type().is_file() {
            writer.start_file(archive_path.as_str(), options)?;
            let mut f = fs::File::open(path)?;
            io::copy(&mut f, writer)?;
        }
    }

    Ok(())
}

/// Extract a zip archive into `dest_dir`, rejecting entries that escape it.
pub(crate) fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    fs::create_dir_all(dest_dir)?;
    let file = fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let raw_name = entry.name().to_string();

        let relative = entry_rel_path(&raw_name).ok_or_else(|| {
            AgentError::io(format!("archive contains unsafe zip path: {raw_name:?}"))
        })?;
        let out_path = contained_path(dest_dir, &relative)?;

        if entry.is_symlink() {
            log::warn!("Skipping symlink zip entry {:?}", raw_name);
            continue;
        }

        let is_dir = entry.is_dir();
        let unix_mode = entry.unix_mode();
        write_entry(&out_path, is_dir, &mut entry, unix_mode)?;
    }

    Ok(())
}
