//! Centralized path layout for the agent's data directory.

use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{AgentError, Result};

/// Environment variable overriding the default data directory.
pub const DATA_DIR_ENV: &str = "GSM_AGENT_HOME";

/// File name of the instance registry snapshot.
pub const GAME_SERVER_STATE_FILE: &str = "GameServerState.json";

/// File name of the waiting work queue snapshot.
pub const WORK_QUEUE_FILE: &str = "WorkQueue.json";

/// Resolve the default data directory (`$GSM_AGENT_HOME` or `~/.gsm_agent`).
pub fn default_data_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let home = dirs::home_dir().ok_or_else(|| AgentError::config("Cannot find home directory"))?;
    Ok(home.join(".gsm_agent"))
}

/// Directory layout rooted at one data directory.
///
/// ```text
/// <root>/config.toml
/// <root>/state/{GameServerState,WorkQueue}.json
/// <root>/steamcmd/
/// <root>/servers/<instance id>/
/// <root>/backups/<instance id>/
/// ```
#[derive(Debug, Clone)]
pub struct AgentPaths {
    root: PathBuf,
}

impl AgentPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    pub fn game_server_state_path(&self) -> PathBuf {
        self.state_dir().join(GAME_SERVER_STATE_FILE)
    }

    pub fn work_queue_path(&self) -> PathBuf {
        self.state_dir().join(WORK_QUEUE_FILE)
    }

    pub fn steamcmd_dir(&self) -> PathBuf {
        self.root.join("steamcmd")
    }

    /// Get the SteamCMD executable inside the SteamCMD directory.
    pub fn steamcmd_exe(&self) -> PathBuf {
        #[cfg(target_os = "windows")]
        {
            self.steamcmd_dir().join("steamcmd.exe")
        }
        #[cfg(not(target_os = "windows"))]
        {
            self.steamcmd_dir().join("steamcmd.sh")
        }
    }

    pub fn servers_dir(&self) -> PathBuf {
        self.root.join("servers")
    }

    /// Get the install root for a game server instance.
    pub fn instance_dir(&self, instance_id: &Uuid) -> PathBuf {
        self.servers_dir().join(instance_id.to_string())
    }

    /// Workshop content root for a given game inside an install root.
    pub fn workshop_content_dir(install_dir: &Path, steam_game_id: u32) -> PathBuf {
        install_dir
            .join("steamapps")
            .join("workshop")
            .join("content")
            .join(steam_game_id.to_string())
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    /// Get the backup directory for one instance.
    pub fn instance_backup_dir(&self, instance_id: &Uuid) -> PathBuf {
        self.backups_dir().join(instance_id.to_string())
    }

    /// Ensure all required data directories exist.
    pub fn ensure_data_dirs(&self) -> Result<()> {
        let dirs = [
            self.root.clone(),
            self.state_dir(),
            self.steamcmd_dir(),
            self.servers_dir(),
            self.backups_dir(),
        ];
        for dir in &dirs {
            fs::create_dir_all(dir)
                .map_err(|e| AgentError::io(format!("Failed to create {:?}: {}", dir, e)))?;
        }
        Ok(())
    }
}
