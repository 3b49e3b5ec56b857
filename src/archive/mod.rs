//! Archive extraction for SteamCMD bootstrap bundles and zip writing for backups.

mod extract;
mod path;
mod tar_gz;
mod zip_ops;

use std::path::Path;

use crate::error::{AgentError, Result};

use tar_gz::extract_tar_gz;
pub(crate) use zip_ops::append_dir_tree_to_zip;
use zip_ops::extract_zip;

/// Extract a `.zip` or `.tar.gz` archive into `dest_dir`, chosen by file name.
pub(crate) fn extract_archive(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let name = archive_path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        extract_tar_gz(archive_path, dest_dir)
    } else if name.ends_with(".zip") {
        extract_zip(archive_path, dest_dir)
    } else {
        Err(AgentError::io(format!(
            "unsupported archive format: {:?}",
            archive_path
        )))
    }
}
