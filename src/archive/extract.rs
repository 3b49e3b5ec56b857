use std::fs;
use std::io;
use std::path::Path;

use crate::error::{AgentError, Result};

#[cfg(unix)]
fn apply_unix_mode(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt as _;

    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| AgentError::io(format!("failed to set permissions on {path:?}: {e}")))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_unix_mode(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}

/// Write one archive entry to disk, creating parents as needed.
///
/// Unix permission bits matter here: `steamcmd.sh` and `linux32/steamcmd` must
/// stay executable after extraction.
pub(super) fn write_entry<R>(
    out_path: &Path,
    is_dir: bool,
    reader: &mut R,
    unix_mode: Option<u32>,
) -> Result<()>
where
    R: io::Read,
{
    if is_dir {
        fs::create_dir_all(out_path)
            .map_err(|e| AgentError::io(format!("failed to create directory {out_path:?}: {e}")))?;
        return Ok(());
    }

    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AgentError::io(format!("failed to create directory {parent:?}: {e}")))?;
    }

    let mut outfile = fs::File::create(out_path)
        .map_err(|e| AgentError::io(format!("failed to create {out_path:?}: {e}")))?;
    io::copy(reader, &mut outfile)
        .map_err(|e| AgentError::io(format!("failed to write {out_path:?}: {e}")))?;
    apply_unix_mode(out_path, unix_mode)
}
