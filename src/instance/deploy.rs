//! Install, update and uninstall through SteamCMD.

use std::fs;
use std::path::Path;

use super::reporter::StatusReporter;
use super::types::{GameServerInstance, ServerState};
use super::LifecycleEngine;
use crate::error::{AgentError, Result};
use crate::paths::AgentPaths;

/// Remove workshop item directories that are no longer in `mod_list`.
fn prune_workshop_content(install_dir: &Path, steam_game_id: u32, mod_list: &[u64]) -> usize {
    let content_dir = AgentPaths::workshop_content_dir(install_dir, steam_game_id);
    let Ok(entries) = fs::read_dir(&content_dir) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let keep = entry
            .file_name()
            .to_str()
            .and_then(|n| n.parse::<u64>().ok())
            .is_some_and(|id| mod_list.contains(&id));
        if keep {
            continue;
        }
        match fs::remove_dir_all(&path) {
            Ok(()) => {
                log::info!("Removed orphaned workshop content {:?}", path);
                removed += 1;
            }
            Err(e) => log::warn!("Failed to remove workshop content {:?}: {}", path, e),
        }
    }
    removed
}

impl LifecycleEngine {
    /// Download the app and, for modded servers, every workshop item.
    async fn deploy(
        &self,
        instance: &GameServerInstance,
        validate: bool,
        reporter: &StatusReporter,
    ) -> Result<()> {
        let install_dir = self.install_dir(&instance.id);
        fs::create_dir_all(&install_dir).map_err(|e| {
            AgentError::io(format!("Failed to create install dir {:?}: {}", install_dir, e))
        })?;

        reporter.progress(format!(
            "Running SteamCMD app_update {} for {}",
            instance.steam_tool_id, instance.name
        ));
        self.steam
            .app_update(&install_dir, instance.steam_tool_id, validate)
            .await?;

        if instance.modded {
            self.install_mods(instance, &install_dir, validate, reporter)
                .await?;
        }
        Ok(())
    }

    async fn install_mods(
        &self,
        instance: &GameServerInstance,
        install_dir: &Path,
        validate: bool,
        reporter: &StatusReporter,
    ) -> Result<()> {
        let total = instance.mod_list.len();
        let mut failed = Vec::new();
        for (index, mod_id) in instance.mod_list.iter().enumerate() {
            reporter.progress(format!(
                "Downloading workshop item {} ({}/{})",
                mod_id,
                index + 1,
                total
            ));
            if let Err(e) = self
                .steam
                .workshop_download(install_dir, instance.steam_game_id, *mod_id, validate)
                .await
            {
                log::warn!("Workshop item {} failed: {}", mod_id, e);
                failed.push(*mod_id);
            }
        }

        let dir = install_dir.to_path_buf();
        let game_id = instance.steam_game_id;
        let mods = instance.mod_list.clone();
        let pruned =
            tokio::task::spawn_blocking(move || prune_workshop_content(&dir, game_id, &mods))
                .await?;
        if pruned > 0 {
            reporter.progress(format!("Removed {} unused workshop item(s)", pruned));
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(AgentError::steamcmd(format!(
                "{} of {} workshop item(s) failed: {:?}",
                failed.len(),
                total,
                failed
            )))
        }
    }

    /// Install a new game server from the work payload. Leaves it `Shutdown`.
    pub async fn install(
        &self,
        payload: &GameServerInstance,
        validate: bool,
        reporter: &StatusReporter,
    ) -> Result<String> {
        let id = payload.id;
        if !payload.has_requirements_to_install() {
            return Err(AgentError::missing_requirements(
                &id.to_string(),
                "instance id and steam tool id",
            ));
        }

        let mut instance = payload.clone();
        match self.registry.get(&id) {
            Some(existing) => {
                self.ensure_ready_to_update(&existing)?;
                instance.server_state = existing.server_state;
                instance.last_state_update = existing.last_state_update;
            }
            None => instance.server_state = ServerState::Unknown,
        }
        self.registry.upsert(instance.clone());
        self.transition(&id, ServerState::Installing, reporter)?;

        match self.deploy(&instance, validate, reporter).await {
            Ok(()) => {
                self.transition(&id, ServerState::Shutdown, reporter)?;
                Ok(format!("Installed {} (app {})", instance.name, instance.steam_tool_id))
            }
            Err(e) => {
                self.transition(&id, ServerState::Unknown, reporter)?;
                Err(e)
            }
        }
    }

    /// Update an installed game server. The payload's definition replaces the
    /// registered one unless it is only an id reference.
    pub async fn update(
        &self,
        payload: &GameServerInstance,
        validate: bool,
        reporter: &StatusReporter,
    ) -> Result<String> {
        let existing = self.resolve(payload);
        self.ensure_ready_to_update(&existing)?;

        let mut instance = if payload.steam_tool_id != 0 {
            payload.clone()
        } else {
            existing.clone()
        };
        if instance.steam_tool_id == 0 {
            return Err(AgentError::missing_requirements(
                &instance.id.to_string(),
                "steam tool id",
            ));
        }
        instance.server_state = existing.server_state;
        instance.last_state_update = existing.last_state_update;
        self.registry.upsert(instance.clone());

        let previous = self.transition(&instance.id, ServerState::Updating, reporter)?;
        match self.deploy(&instance, validate, reporter).await {
            Ok(()) => {
                self.transition(&instance.id, ServerState::Shutdown, reporter)?;
                Ok(format!("Updated {} (app {})", instance.name, instance.steam_tool_id))
            }
            Err(e) => {
                self.transition(&instance.id, previous, reporter)?;
                Err(e)
            }
        }
    }

    /// Stop the server if running and delete its install root. Safe to repeat.
    pub async fn uninstall(
        &self,
        payload: &GameServerInstance,
        reporter: &StatusReporter,
    ) -> Result<String> {
        let id = payload.id;
        let instance = self.registry.get(&id).unwrap_or_else(|| payload.clone());
        let install_dir = self.install_dir(&id);

        if self.registry.contains(&id) {
            self.transition(&id, ServerState::Uninstalling, reporter)?;
        }

        if !instance.process_name.is_empty() {
            if let Some(process) = self
                .processes
                .find_running(&instance.process_name, &install_dir)
                .await?
            {
                reporter.progress(format!("Stopping {} before uninstall", instance.name));
                self.processes
                    .terminate(&process, self.settings.stop_grace_period)
                    .await?;
            }
        }

        if install_dir.exists() {
            reporter.progress(format!("Deleting {:?}", install_dir));
            let dir = install_dir.clone();
            tokio::task::spawn_blocking(move || fs::remove_dir_all(&dir))
                .await?
                .map_err(|e| {
                    AgentError::io(format!("Failed to delete {:?}: {}", install_dir, e))
                })?;
        }

        self.registry.remove(&id);
        reporter.server_state(id, ServerState::Uninstalled);
        Ok(format!("Uninstalled {}", instance.name))
    }
}
