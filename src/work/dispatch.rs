//! Routes work items to the host services or the lifecycle engine by target type.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{TargetCategory, TargetType, WorkExecutor, WorkItem};
use crate::error::{AgentError, Result};
use crate::instance::{GameServerInstance, LifecycleEngine, StatusReporter};
use crate::outbound::OutboundQueue;
use crate::paths::AgentPaths;
use crate::steamcmd::{cleanup_cache, fresh_reset, SteamCmd};
use crate::telemetry::ResourcePoller;

/// Payload of every game-server work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameServerOrder {
    pub instance: GameServerInstance,
    /// Ask SteamCMD to verify files during install and update.
    #[serde(default)]
    pub validate: bool,
}

/// Optional payload of a status update; every instance is refreshed without one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateOrder {
    #[serde(default)]
    pub server_id: Option<Uuid>,
}

fn misrouted(target: TargetType, category: TargetCategory) -> AgentError {
    AgentError::invalid_payload(format!(
        "target type {} ({:?}) is not a {:?} target",
        target.code(),
        target,
        category
    ))
}

pub struct AgentWorkExecutor {
    engine: Arc<LifecycleEngine>,
    poller: Arc<ResourcePoller>,
    outbound: Arc<OutboundQueue>,
    client: Client,
    paths: AgentPaths,
    steam: SteamCmd,
}

impl AgentWorkExecutor {
    pub fn new(
        engine: Arc<LifecycleEngine>,
        poller: Arc<ResourcePoller>,
        outbound: Arc<OutboundQueue>,
        client: Client,
        paths: AgentPaths,
        steam: SteamCmd,
    ) -> Self {
        Self {
            engine,
            poller,
            outbound,
            client,
            paths,
            steam,
        }
    }

    async fn execute_host(&self, target: TargetType) -> Result<String> {
        match target {
            TargetType::HostSteamCmdReset => {
                let report = fresh_reset(&self.client, &self.paths, &self.steam).await?;
                Ok(format!(
                    "SteamCMD reinstalled ({} entries removed, {} failed)",
                    report.removed, report.failed
                ))
            }
            TargetType::HostCacheCleanup => {
                let dir = self.paths.steamcmd_dir();
                let report = tokio::task::spawn_blocking(move || cleanup_cache(&dir)).await?;
                Ok(format!(
                    "Removed {} cache entries ({} failed)",
                    report.removed, report.failed
                ))
            }
            TargetType::HostStatusRefresh => {
                let sample = self.poller.sample_now();
                Ok(format!(
                    "Host status: cpu {:.1}%, ram {:.1}%, up {}s",
                    sample.cpu_usage, sample.ram_usage, sample.uptime
                ))
            }
            TargetType::Install
            | TargetType::Update
            | TargetType::Start
            | TargetType::Stop
            | TargetType::Restart
            | TargetType::Uninstall
            | TargetType::Backup
            | TargetType::UpdateCheck
            | TargetType::StatusRefresh
            | TargetType::StatusUpdate => Err(misrouted(target, TargetCategory::Host)),
        }
    }

    async fn execute_game_server(
        &self,
        target: TargetType,
        order: &GameServerOrder,
        reporter: &StatusReporter,
    ) -> Result<String> {
        let instance = &order.instance;
        let engine = &self.engine;
        match target {
            TargetType::Install => engine.install(instance, order.validate, reporter).await,
            TargetType::Update => engine.update(instance, order.validate, reporter).await,
            TargetType::Start => {
                let process = engine.start(instance, reporter).await?;
                Ok(format!("Started {} (pid: {})", instance.name, process.pid))
            }
            TargetType::Stop => Ok(if engine.stop(instance, reporter).await? {
                format!("Stopped {}", instance.name)
            } else {
                format!("{} was not running", instance.name)
            }),
            TargetType::Restart => {
                let process = engine.restart(instance, reporter).await?;
                Ok(format!("Restarted {} (pid: {})", instance.name, process.pid))
            }
            TargetType::Uninstall => engine.uninstall(instance, reporter).await,
            TargetType::Backup => engine.backup(instance, reporter).await,
            TargetType::UpdateCheck => engine.update_check(instance, reporter).await,
            TargetType::StatusRefresh => {
                let state = engine.refresh_status(instance, reporter).await?;
                Ok(format!("{} is {}", instance.name, state.name()))
            }
            TargetType::HostStatusRefresh
            | TargetType::HostSteamCmdReset
            | TargetType::HostCacheCleanup
            | TargetType::StatusUpdate => Err(misrouted(target, TargetCategory::GameServer)),
        }
    }

    async fn execute_status_update(
        &self,
        order: &StatusUpdateOrder,
        reporter: &StatusReporter,
    ) -> Result<String> {
        let states = match order.server_id {
            Some(id) => {
                let instance = self.engine.registry().require(&id)?;
                let state = self.engine.refresh_status(&instance, reporter).await?;
                vec![(id, state)]
            }
            None => self.engine.refresh_all(reporter).await,
        };
        for (id, state) in &states {
            reporter.server_state(*id, *state);
        }
        Ok(format!("Reported state of {} game server(s)", states.len()))
    }
}

#[async_trait]
impl WorkExecutor for AgentWorkExecutor {
    async fn execute(&self, item: &WorkItem) -> Result<String> {
        let target = item.target()?;
        let reporter = StatusReporter::new(Arc::clone(&self.outbound), Some(item.id));
        log::info!("Executing work item {} ({:?})", item.id, target);

        match target.category() {
            TargetCategory::Host => self.execute_host(target).await,
            TargetCategory::GameServer => {
                let order: GameServerOrder = item.payload()?;
                self.execute_game_server(target, &order, &reporter).await
            }
            TargetCategory::StatusUpdate => {
                let order = if item.work_data.is_empty() {
                    StatusUpdateOrder::default()
                } else {
                    item.payload()?
                };
                self.execute_status_update(&order, &reporter).await
            }
        }
    }
}
