//! Save-data backups for game server instances.

use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::archive::append_dir_tree_to_zip;
use crate::error::{AgentError, Result};
use crate::instance::{GameServerInstance, ResourceRole};

/// Metadata stored as `backup.toml` at the root of every archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub created_at: String,
    pub instance_id: String,
    pub instance_name: String,
    pub save_root: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackupReport {
    pub created: Vec<PathBuf>,
    /// Save roots already backed up today.
    pub skipped: usize,
    pub pruned: usize,
}

/// File-name-safe label for a save root path.
fn root_label(path: &Path) -> String {
    let label: String = path
        .to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let label = label.trim_matches('_');
    if label.is_empty() {
        "root".to_string()
    } else {
        label.to_string()
    }
}

fn is_backup_archive(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

fn has_backup_for_day(backup_dir: &Path, label: &str, day: &str) -> Result<bool> {
    if !backup_dir.exists() {
        return Ok(false);
    }
    let prefix = format!("{label}-{day}_");
    for entry in fs::read_dir(backup_dir)
        .map_err(|e| AgentError::backup(format!("Failed to read backups dir: {}", e)))?
    {
        let entry = entry.map_err(|e| AgentError::backup(e.to_string()))?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(&prefix) && is_backup_archive(&entry.path()) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn create_backup_archive(
    instance: &GameServerInstance,
    source_dir: &Path,
    save_root: &Path,
    archive_path: &Path,
) -> Result<()> {
    let metadata = BackupMetadata {
        created_at: chrono::Utc::now().to_rfc3339(),
        instance_id: instance.id.to_string(),
        instance_name: instance.name.clone(),
        save_root: save_root.to_string_lossy().into_owned(),
    };

    let file = File::create(archive_path)
        .map_err(|e| AgentError::backup(format!("Failed to create backup archive: {}", e)))?;
    let mut writer = zip::ZipWriter::new(file);

    let metadata_toml = toml::to_string_pretty(&metadata)
        .map_err(|e| AgentError::backup(format!("Failed to serialize metadata: {}", e)))?;
    let options = zip::write::SimpleFileOptions::default();
    writer
        .start_file("backup.toml", options)
        .map_err(|e| AgentError::backup(format!("Failed to add metadata: {}", e)))?;
    writer
        .write_all(metadata_toml.as_bytes())
        .map_err(|e| AgentError::backup(format!("Failed to write metadata: {}", e)))?;

    append_dir_tree_to_zip(&mut writer, source_dir, "data", options)
        .map_err(|e| AgentError::backup(format!("Failed to add save data: {}", e)))?;

    writer
        .finish()
        .map_err(|e| AgentError::backup(format!("Failed to finalize backup archive: {}", e)))?;
    Ok(())
}

/// Back up every save root of `instance` into `backup_dir`, then prune to `retention`.
///
/// A save root that already has an archive from today is skipped.
pub fn backup_instance(
    instance: &GameServerInstance,
    install_dir: &Path,
    backup_dir: &Path,
    retention: usize,
) -> Result<BackupReport> {
    fs::create_dir_all(backup_dir)
        .map_err(|e| AgentError::backup(format!("Failed to create backups dir: {}", e)))?;

    let now = Local::now();
    let day = now.format("%Y%m%d").to_string();
    let stamp = now.format("%Y%m%d_%H%M%S").to_string();
    let mut report = BackupReport::default();

    for resource in instance.resources_with_role(ResourceRole::SaveRoot) {
        let label = root_label(&resource.path);
        if has_backup_for_day(backup_dir, &label, &day)? {
            log::info!("Save root {:?} already backed up today, skipping", resource.path);
            report.skipped += 1;
            continue;
        }

        let source = GameServerInstance::resolve(install_dir, resource)?;
        if !source.is_dir() {
            return Err(AgentError::backup(format!(
                "Save root {:?} does not exist",
                source
            )));
        }

        let archive_path = backup_dir.join(format!("{label}-{stamp}.zip"));
        if let Err(e) = create_backup_archive(instance, &source, &resource.path, &archive_path) {
            let _ = fs::remove_file(&archive_path);
            return Err(e);
        }
        log::info!("Created backup {:?}", archive_path);
        report.created.push(archive_path);
    }

    report.pruned = prune_backups(backup_dir, retention)?;
    Ok(report)
}

/// Delete all but the `retention` most recently written archives. Returns the number removed.
pub fn prune_backups(backup_dir: &Path, retention: usize) -> Result<usize> {
    if !backup_dir.exists() {
        return Ok(0);
    }

    let mut archives: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(backup_dir)
        .map_err(|e| AgentError::backup(format!("Failed to read backups dir: {}", e)))?
    {
        let entry = entry.map_err(|e| AgentError::backup(e.to_string()))?;
        let path = entry.path();
        if !is_backup_archive(&path) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        archives.push((modified, path));
    }

    if archives.len() <= retention {
        return Ok(0);
    }

    archives.sort_by(|a, b| b.0.cmp(&a.0));
    let mut removed = 0;
    for (_, path) in archives.into_iter().skip(retention) {
        match fs::remove_file(&path) {
            Ok(()) => {
                log::info!("Pruned old backup {:?}", path);
                removed += 1;
            }
            Err(e) => log::warn!("Failed to prune backup {:?}: {}", path, e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use std::fs::{self, File};
    use std::io::Read as _;
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime};

    use uuid::Uuid;

    use super::{backup_instance, prune_backups, root_label, BackupMetadata};
    use crate::error::ErrorKind;
    use crate::instance::{GameServerInstance, LocationPointer, ResourceRole};

    fn with_save_root(path: &str) -> GameServerInstance {
        let mut instance = GameServerInstance::new(Uuid::new_v4(), "backup-test");
        instance.resources.push(LocationPointer {
            role: ResourceRole::SaveRoot,
            path: PathBuf::from(path),
            startup: false,
            config: None,
        });
        instance
    }

    #[test]
    fn keeps_the_newest_archives() {
        let tmp = tempfile::tempdir().unwrap();
        let base = SystemTime::now() - Duration::from_secs(3600);
        for i in 0..55u64 {
            let path = tmp.path().join(format!("saves-{i:02}.zip"));
            let file = File::create(&path).unwrap();
            file.set_modified(base + Duration::from_secs(i)).unwrap();
        }

        assert_eq!(prune_backups(tmp.path(), 50).unwrap(), 5);

        let mut left: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left.len(), 50);
        assert_eq!(left[0], "saves-05.zip");
        assert_eq!(left[49], "saves-54.zip");
    }

    #[test]
    fn archives_each_save_root_once_per_day() {
        let install = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();
        fs::create_dir_all(install.path().join("Saved/Worlds")).unwrap();
        fs::write(install.path().join("Saved/Worlds/world.db"), b"world").unwrap();
        let instance = with_save_root("Saved");

        let first = backup_instance(&instance, install.path(), backups.path(), 10).unwrap();
        assert_eq!(first.created.len(), 1);
        assert_eq!(first.skipped, 0);

        let mut archive = zip::ZipArchive::new(File::open(&first.created[0]).unwrap()).unwrap();
        let mut meta = String::new();
        archive
            .by_name("backup.toml")
            .unwrap()
            .read_to_string(&mut meta)
            .unwrap();
        let meta: BackupMetadata = toml::from_str(&meta).unwrap();
        assert_eq!(meta.instance_id, instance.id.to_string());
        assert!(archive.by_name("data/Worlds/world.db").is_ok());

        let second = backup_instance(&instance, install.path(), backups.path(), 10).unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.skipped, 1);
    }

    #[test]
    fn missing_save_root_is_a_backup_error() {
        let install = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();
        let err = backup_instance(&with_save_root("nope"), install.path(), backups.path(), 5)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Backup);
    }

    #[test]
    fn labels_are_file_name_safe() {
        assert_eq!(root_label(&PathBuf::from("ShooterGame/Saved")), "ShooterGame_Saved");
        assert_eq!(root_label(&PathBuf::from("/")), "root");
    }
}
