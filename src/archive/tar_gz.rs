use std::fs;
use std::path::Path;

use crate::error::{AgentError, Result};

use super::extract::write_entry;
use super::path::{contained_path, entry_rel_path};

/// Extract a tar.gz archive into `dest_dir`.
///
/// Only regular files and directories are materialized; link entries are skipped.
pub(crate) fn extract_tar_gz(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    fs::create_dir_all(dest_dir).map_err(|e| AgentError::io(e.to_string()))?;
    let file = fs::File::open(archive_path).map_err(|e| AgentError::io(e.to_string()))?;
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));

    for entry in archive.entries().map_err(|e| AgentError::io(e.to_string()))? {
        let mut entry = entry.map_err(|e| AgentError::io(e.to_string()))?;

        let raw_path = entry
            .path()
            .map_err(|e| AgentError::io(e.to_string()))?
            .to_string_lossy()
            .into_owned();
        let Some(relative) = entry_rel_path(&raw_path) else {
            if raw_path.trim_matches(|c| c == '.' || c == '/').is_empty() {
                continue;
            }
            return Err(AgentError::io(format!(
                "archive contains unsafe entry path: {raw_path:?}"
            )));
        };
        let out_path = contained_path(dest_dir, &relative)?;

        let entry_type = entry.header().entry_type();
        if !entry_type.is_dir() && !entry_type.is_file() {
            log::warn!("Skipping unsupported tar entry {:?} ({:?})", raw_path, entry_type);
            continue;
        }

        let unix_mode = entry.header().mode().ok();
        write_entry(&out_path, entry_type.is_dir(), &mut entry, unix_mode)?;
    }

    Ok(())
}
