//! SteamCMD install tree: bootstrap download, fresh reset and cache cleanup.

use std::fs;
use std::path::Path;

use reqwest::Client;

use super::SteamCmd;
use crate::archive::extract_archive;
use crate::download::download_file;
use crate::error::{AgentError, Result};
use crate::paths::AgentPaths;

#[cfg(target_os = "windows")]
const STEAMCMD_ARCHIVE_URL: &str = "https://steamcdn-a.akamaihd.net/client/installer/steamcmd.zip";
#[cfg(target_os = "macos")]
const STEAMCMD_ARCHIVE_URL: &str =
    "https://steamcdn-a.akamaihd.net/client/installer/steamcmd_osx.tar.gz";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const STEAMCMD_ARCHIVE_URL: &str =
    "https://steamcdn-a.akamaihd.net/client/installer/steamcmd_linux.tar.gz";

/// Directories SteamCMD rebuilds on demand.
const CACHE_DIRS: [&str; 4] = ["appcache", "depotcache", "logs", "dumps"];

/// Result of a best-effort delete sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub failed: usize,
}

impl SweepReport {
    fn record(&mut self, path: &Path, result: std::io::Result<()>) {
        match result {
            Ok(()) => self.removed += 1,
            Err(e) => {
                self.failed += 1;
                log::warn!("Failed to remove {:?}: {}", path, e);
            }
        }
    }
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Make sure SteamCMD exists and can log in; any failure here aborts agent startup.
pub async fn ensure_installed(client: &Client, paths: &AgentPaths, steam: &SteamCmd) -> Result<()> {
    let dir = paths.steamcmd_dir();
    if !paths.steamcmd_exe().exists() {
        log::info!("SteamCMD not found in {:?}, downloading", dir);
        fs::create_dir_all(&dir)
            .map_err(|e| AgentError::io(format!("Failed to create SteamCMD dir: {}", e)))?;

        let file_name = STEAMCMD_ARCHIVE_URL
            .rsplit('/')
            .next()
            .unwrap_or("steamcmd.zip");
        let archive_path = dir.join(file_name);
        download_file(client, STEAMCMD_ARCHIVE_URL, &archive_path).await?;

        let extract_from = archive_path.clone();
        tokio::task::spawn_blocking(move || extract_archive(&extract_from, &dir))
            .await??;

        if let Err(e) = fs::remove_file(&archive_path) {
            log::warn!("Failed to remove archive {:?}: {}", archive_path, e);
        }
        if !paths.steamcmd_exe().exists() {
            return Err(AgentError::steamcmd(format!(
                "SteamCMD extracted but executable not found: {:?}",
                paths.steamcmd_exe()
            )));
        }
    }

    steam.self_update().await?;
    log::info!("SteamCMD ready at {:?}", paths.steamcmd_exe());
    Ok(())
}

/// Remove every entry of the SteamCMD directory, then install it again.
pub async fn fresh_reset(client: &Client, paths: &AgentPaths, steam: &SteamCmd) -> Result<SweepReport> {
    let dir = paths.steamcmd_dir();
    let report = tokio::task::spawn_blocking(move || sweep_dir_entries(&dir)).await?;
    log::info!(
        "SteamCMD reset removed {} entries ({} failures)",
        report.removed,
        report.failed
    );
    ensure_installed(client, paths, steam).await?;
    Ok(report)
}

/// Delete SteamCMD's cache directories, skipping anything that cannot be removed.
pub fn cleanup_cache(steamcmd_dir: &Path) -> SweepReport {
    let mut report = SweepReport::default();
    for name in CACHE_DIRS {
        let path = steamcmd_dir.join(name);
        if !path.exists() {
            continue;
        }
        match fs::read_dir(&path) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let entry_path = entry.path();
                    let result = remove_path(&entry_path);
                    report.record(&entry_path, result);
                }
            }
            Err(e) => {
                report.failed += 1;
                log::warn!("Failed to read cache dir {:?}: {}", path, e);
            }
        }
    }
    report
}

fn sweep_dir_entries(dir: &Path) -> SweepReport {
    let mut report = SweepReport::default();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Failed to read {:?}: {}", dir, e);
            return report;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let result = remove_path(&path);
        report.record(&path, result);
    }
    report
}
