//! JSON state snapshots written next to the config.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AgentError, Result};

/// Write `value` as pretty JSON through a temp file and rename.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AgentError::io(format!("Failed to create {:?}: {}", parent, e)))?;
    }
    let content = serde_json::to_vec_pretty(value)
        .map_err(|e| AgentError::io(format!("Failed to serialize {:?}: {}", path, e)))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)
        .map_err(|e| AgentError::io(format!("Failed to write {:?}: {}", tmp, e)))?;
    fs::rename(&tmp, path)
        .map_err(|e| AgentError::io(format!("Failed to replace {:?}: {}", path, e)))
}

/// Read a snapshot, falling back to `T::default()` when the file is missing or
/// unreadable. The fallback is written back immediately.
pub fn read_json_or_default<T>(path: &Path) -> T
where
    T: Serialize + DeserializeOwned + Default,
{
    let loaded = match fs::read(path) {
        Ok(bytes) => match serde_json::from_slice::<T>(&bytes) {
            Ok(value) => return value,
            Err(e) => {
                log::warn!("Snapshot {:?} is corrupt ({}), starting empty", path, e);
                T::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::info!("No snapshot at {:?}, starting empty", path);
            T::default()
        }
        Err(e) => {
            log::warn!("Failed to read snapshot {:?} ({}), starting empty", path, e);
            T::default()
        }
    };
    if let Err(e) = write_json(path, &loaded) {
        log::warn!("Failed to write fresh snapshot {:?}: {}", path, e);
    }
    loaded
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;

    use super::{read_json_or_default, write_json};

    #[test]
    fn corrupt_snapshot_is_replaced_with_default() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state").join("WorkQueue.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{not json").unwrap();

        let loaded: Vec<u32> = read_json_or_default(&path);
        assert!(loaded.is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), "[]");
    }

    #[test]
    fn missing_snapshot_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state").join("GameServerState.json");
        let loaded: BTreeMap<String, u32> = read_json_or_default(&path);
        assert!(loaded.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn written_snapshot_reads_back() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("q.json");
        write_json(&path, &vec![1u32, 2, 3]).unwrap();
        let loaded: Vec<u32> = read_json_or_default(&path);
        assert_eq!(loaded, vec![1, 2, 3]);
    }
}
