//! Game server lifecycle: start, stop, restart, backup, status refresh.

use std::path::Path;

use chrono::Utc;
use uuid::Uuid;

use super::config_files::enforce_config_files;
use super::connectivity::is_internally_connectable;
use super::reporter::StatusReporter;
use super::types::{GameServerInstance, ServerState};
use super::LifecycleEngine;
use crate::backup::backup_instance;
use crate::error::{AgentError, ErrorKind, Result};
use crate::process::{LaunchSpec, RunningProcess};

/// Substitute the launch template placeholders.
pub(crate) fn render_template(
    template: &str,
    instance: &GameServerInstance,
    install_dir: &Path,
) -> String {
    template
        .replace("%PASSWORD%", &instance.server_password)
        .replace("%PORTGAME%", &instance.game_port.to_string())
        .replace("%PORTQUERY%", &instance.query_port.to_string())
        .replace("%PORTRCON%", &instance.rcon_port.to_string())
        .replace("%SERVERNAME%", &instance.name)
        .replace("%MAXPLAYERS%", &instance.max_players.to_string())
        .replace("%INSTALLDIR%", &install_dir.to_string_lossy())
}

/// Split a command line on whitespace, keeping double-quoted runs together.
pub(crate) fn split_args(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        args.push(current);
    }
    args
}

/// States a refresh never overrides: some other operation owns the instance.
fn owned_by_operation(state: ServerState) -> bool {
    matches!(
        state,
        ServerState::Installing
            | ServerState::Updating
            | ServerState::Uninstalling
            | ServerState::Uninstalled
            | ServerState::Restarting
            | ServerState::ShuttingDown
    )
}

impl LifecycleEngine {
    async fn find_process(
        &self,
        instance: &GameServerInstance,
    ) -> Result<Option<RunningProcess>> {
        if instance.process_name.trim().is_empty() {
            return Ok(None);
        }
        self.processes
            .find_running(&instance.process_name, &self.install_dir(&instance.id))
            .await
    }

    /// Start the game server. Returns the already-running process when there is one.
    pub async fn start(
        &self,
        payload: &GameServerInstance,
        reporter: &StatusReporter,
    ) -> Result<RunningProcess> {
        let instance = self.resolve(payload);
        let id = instance.id.to_string();
        if !instance.ready_to_start() {
            return Err(AgentError::instance_busy(&id, instance.server_state.name()));
        }
        if !instance.has_requirements_to_run() {
            return Err(AgentError::missing_requirements(
                &id,
                "process name, exactly one startup resource, game and query ports",
            ));
        }
        let startup = instance
            .startup_resource()
            .ok_or_else(|| AgentError::missing_requirements(&id, "startup resource"))?;

        let install_dir = self.install_dir(&instance.id);
        let config_dir = install_dir.clone();
        let config_instance = instance.clone();
        let rewritten = tokio::task::spawn_blocking(move || {
            enforce_config_files(&config_dir, &config_instance)
        })
        .await??;
        if rewritten > 0 {
            reporter.progress(format!("Updated {} config file(s)", rewritten));
        }

        if let Some(process) = self.find_process(&instance).await? {
            log::info!(
                "Game server {} already running (pid: {})",
                instance.name,
                process.pid
            );
            if !instance.server_state.is_running() {
                self.transition(&instance.id, ServerState::SpinningUp, reporter)?;
            }
            return Ok(process);
        }

        let rendered = render_template(&instance.launch_args, &instance, &install_dir);
        let spec = LaunchSpec {
            program: GameServerInstance::resolve(&install_dir, startup)?,
            args: split_args(&rendered),
            cwd: install_dir,
            label: instance.name.clone(),
        };
        reporter.progress(format!("Launching {}", instance.name));
        let process = self.processes.spawn(&spec).await?;
        log::info!("Started {} (pid: {})", instance.name, process.pid);
        self.transition(&instance.id, ServerState::SpinningUp, reporter)?;
        Ok(process)
    }

    /// Stop the game server. A server that is not running counts as stopped.
    pub async fn stop(
        &self,
        payload: &GameServerInstance,
        reporter: &StatusReporter,
    ) -> Result<bool> {
        let instance = self.resolve(payload);
        let Some(process) = self.find_process(&instance).await? else {
            log::info!("Game server {} is not running", instance.name);
            self.transition(&instance.id, ServerState::Shutdown, reporter)?;
            return Ok(false);
        };

        self.transition(&instance.id, ServerState::ShuttingDown, reporter)?;
        reporter.progress(format!("Stopping {} (pid: {})", instance.name, process.pid));
        if let Err(e) = self
            .processes
            .terminate(&process, self.settings.stop_grace_period)
            .await
        {
            self.transition(&instance.id, ServerState::Unknown, reporter)?;
            return Err(e);
        }
        self.transition(&instance.id, ServerState::Shutdown, reporter)?;
        Ok(true)
    }

    /// Stop then start.
    pub async fn restart(
        &self,
        payload: &GameServerInstance,
        reporter: &StatusReporter,
    ) -> Result<RunningProcess> {
        let instance = self.resolve(payload);
        if !instance.ready_to_start() {
            return Err(AgentError::instance_busy(
                &instance.id.to_string(),
                instance.server_state.name(),
            ));
        }
        self.transition(&instance.id, ServerState::Restarting, reporter)?;
        if let Err(e) = self.stop(&instance, reporter).await {
            self.transition(&instance.id, ServerState::Unknown, reporter)?;
            return Err(e);
        }
        self.start(&instance, reporter).await
    }

    /// Archive the save roots and prune old archives.
    pub async fn backup(
        &self,
        payload: &GameServerInstance,
        reporter: &StatusReporter,
    ) -> Result<String> {
        let instance = self.resolve(payload);
        if !instance.has_requirements_to_backup() {
            return Err(AgentError::missing_requirements(
                &instance.id.to_string(),
                "save root resource",
            ));
        }
        let retention = if instance.backup_retention > 0 {
            instance.backup_retention
        } else {
            self.settings.default_backup_retention
        };

        reporter.progress(format!("Backing up {}", instance.name));
        let install_dir = self.install_dir(&instance.id);
        let backup_dir = self.paths.instance_backup_dir(&instance.id);
        let name = instance.name.clone();
        let report = tokio::task::spawn_blocking(move || {
            backup_instance(&instance, &install_dir, &backup_dir, retention)
        })
        .await??;

        Ok(format!(
            "Backed up {}: {} created, {} skipped, {} pruned",
            name,
            report.created.len(),
            report.skipped,
            report.pruned
        ))
    }

    /// Ask SteamCMD whether a newer build is available.
    pub async fn update_check(
        &self,
        payload: &GameServerInstance,
        reporter: &StatusReporter,
    ) -> Result<String> {
        let instance = self.resolve(payload);
        if instance.steam_tool_id == 0 {
            return Err(AgentError::missing_requirements(
                &instance.id.to_string(),
                "steam tool id",
            ));
        }
        reporter.progress(format!("Checking {} for updates", instance.name));
        let required = self
            .steam
            .check_for_update(&self.install_dir(&instance.id), instance.steam_tool_id)
            .await?;
        Ok(if required {
            format!("{}: update required", instance.name)
        } else {
            format!("{}: up to date", instance.name)
        })
    }

    /// Recompute the lifecycle state from the live process and connectivity.
    ///
    /// Only registered instances are refreshed; an unknown id fails with
    /// `InstanceNotFound` and is never registered here.
    pub async fn refresh_status(
        &self,
        payload: &GameServerInstance,
        reporter: &StatusReporter,
    ) -> Result<ServerState> {
        let instance = self.registry.require(&payload.id)?;
        let current = instance.server_state;
        if owned_by_operation(current) {
            return Ok(current);
        }

        let next = match self.find_process(&instance).await? {
            None => match current {
                s if s.is_running() || s == ServerState::Stalled => ServerState::Shutdown,
                ServerState::Unknown if self.install_dir(&instance.id).is_dir() => {
                    ServerState::Shutdown
                }
                s => s,
            },
            Some(_) => {
                if is_internally_connectable(&instance, self.settings.query_timeout).await {
                    match current {
                        ServerState::Connectable | ServerState::ExternallyConnectable => current,
                        _ => ServerState::InternallyConnectable,
                    }
                } else {
                    match current {
                        ServerState::SpinningUp if self.spinning_up_too_long(&instance) => {
                            ServerState::Stalled
                        }
                        s if s.is_running() || s == ServerState::Stalled => s,
                        _ => ServerState::SpinningUp,
                    }
                }
            }
        };

        if next != current {
            self.transition(&instance.id, next, reporter)?;
        }
        Ok(next)
    }

    fn spinning_up_too_long(&self, instance: &GameServerInstance) -> bool {
        let Some(since) = instance.last_state_update else {
            return false;
        };
        let elapsed = Utc::now().signed_duration_since(since);
        elapsed.to_std().is_ok_and(|e| e > self.settings.startup_stall)
    }

    /// Refresh every registered instance, logging per-instance failures.
    ///
    /// Instances removed while the pass is running are skipped.
    pub async fn refresh_all(&self, reporter: &StatusReporter) -> Vec<(Uuid, ServerState)> {
        let mut states = Vec::new();
        for instance in self.registry.list() {
            match self.refresh_status(&instance, reporter).await {
                Ok(state) => states.push((instance.id, state)),
                Err(e) if e.kind() == ErrorKind::InstanceNotFound => {
                    log::debug!("Game server {} was removed during refresh", instance.id);
                }
                Err(e) => log::warn!("Status refresh for {} failed: {}", instance.id, e),
            }
        }
        states
    }
}
