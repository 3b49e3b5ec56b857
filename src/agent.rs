//! Composition of the agent's long-running loops.
//!
//! The agent owns every shared queue and service and hands out `Arc` handles to
//! the dispatch, broker, host control and snapshot loops. All loops stop on the
//! shared shutdown signal; snapshots are written once more on the way out.

use std::sync::Arc;

use reqwest::Client;
use tokio::task::JoinHandle;

use crate::broker::{BrokerSettings, CommunicationBroker, ControlPlane};
use crate::config::AgentConfig;
use crate::error::Result;
use crate::instance::{EngineSettings, InstanceRegistry, LifecycleEngine, StatusReporter};
use crate::outbound::OutboundQueue;
use crate::pacer::{IntervalPacer, Shutdown};
use crate::paths::AgentPaths;
use crate::process::ProcessControl;
use crate::steamcmd::SteamCmd;
use crate::telemetry::ResourcePoller;
use crate::work::{AgentWorkExecutor, WorkExecutor, WorkQueue};

pub struct Agent {
    config: AgentConfig,
    paths: AgentPaths,
    outbound: Arc<OutboundQueue>,
    work: Arc<WorkQueue>,
    registry: Arc<InstanceRegistry>,
    engine: Arc<LifecycleEngine>,
    poller: Arc<ResourcePoller>,
    broker: Arc<CommunicationBroker>,
    executor: Arc<dyn WorkExecutor>,
}

impl Agent {
    /// Wire the services together and restore both snapshots from the state dir.
    pub fn assemble(
        config: AgentConfig,
        paths: AgentPaths,
        client: Client,
        steam: SteamCmd,
        processes: Arc<dyn ProcessControl>,
        control: Arc<dyn ControlPlane>,
    ) -> Self {
        let outbound = Arc::new(OutboundQueue::new());
        let registry = Arc::new(InstanceRegistry::load_snapshot(
            &paths.game_server_state_path(),
        ));
        let work = Arc::new(WorkQueue::load_snapshot(
            &paths.work_queue_path(),
            Arc::clone(&outbound),
        ));
        let engine = Arc::new(LifecycleEngine::new(
            paths.clone(),
            steam.clone(),
            processes,
            Arc::clone(&registry),
            EngineSettings::from(&config),
        ));
        let poller = Arc::new(ResourcePoller::new(
            Arc::clone(&outbound),
            config.poll_interval(),
        ));
        let broker = Arc::new(CommunicationBroker::new(
            control,
            Arc::clone(&work),
            Arc::clone(&outbound),
            BrokerSettings::from(&config),
        ));
        let executor: Arc<dyn WorkExecutor> = Arc::new(AgentWorkExecutor::new(
            Arc::clone(&engine),
            Arc::clone(&poller),
            Arc::clone(&outbound),
            client,
            paths.clone(),
            steam,
        ));

        Self {
            config,
            paths,
            outbound,
            work,
            registry,
            engine,
            poller,
            broker,
            executor,
        }
    }

    pub fn registry(&self) -> Arc<InstanceRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn work_queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.work)
    }

    pub fn outbound(&self) -> Arc<OutboundQueue> {
        Arc::clone(&self.outbound)
    }

    /// Write both snapshots. Failures are logged, not returned.
    pub fn save_snapshots(&self) {
        if let Err(e) = self
            .registry
            .save_snapshot(&self.paths.game_server_state_path())
        {
            log::error!("Failed to save game server state: {}", e);
        }
        if let Err(e) = self.work.save_snapshot(&self.paths.work_queue_path()) {
            log::error!("Failed to save work queue: {}", e);
        }
    }

    fn spawn_dispatch_loop(&self, mut shutdown: Shutdown) -> JoinHandle<()> {
        let work = Arc::clone(&self.work);
        let executor = Arc::clone(&self.executor);
        let max_concurrent = self.config.max_concurrent_work;
        let mut pacer = IntervalPacer::new(self.config.dispatch_interval());
        tokio::spawn(async move {
            loop {
                let started = work.try_dispatch(max_concurrent, &executor);
                if started > 0 {
                    log::debug!(
                        "Dispatched {} work item(s), {} in progress",
                        started,
                        work.in_progress()
                    );
                }
                if !pacer.pace(&mut shutdown).await {
                    break;
                }
            }
            log::info!("Work dispatch stopped");
        })
    }

    fn spawn_host_control_loop(&self, mut shutdown: Shutdown) -> JoinHandle<()> {
        let poller = Arc::clone(&self.poller);
        let engine = Arc::clone(&self.engine);
        let reporter = StatusReporter::detached(Arc::clone(&self.outbound));
        let stale_after = self.config.poller_stale_after();
        let mut pacer = IntervalPacer::new(self.config.host_loop_interval());
        tokio::spawn(async move {
            loop {
                poller.ensure_running(stale_after, &shutdown);
                engine.refresh_all(&reporter).await;
                if !pacer.pace(&mut shutdown).await {
                    break;
                }
            }
            log::info!("Host control loop stopped");
        })
    }

    fn spawn_snapshot_loop(self: &Arc<Self>, mut shutdown: Shutdown) -> JoinHandle<()> {
        let agent = Arc::clone(self);
        let mut pacer = IntervalPacer::new(self.config.snapshot_interval());
        tokio::spawn(async move {
            while pacer.pace(&mut shutdown).await {
                agent.save_snapshots();
            }
        })
    }

    /// Run every loop until `shutdown` fires, then persist state.
    pub async fn run(self: Arc<Self>, mut shutdown: Shutdown) -> Result<()> {
        log::info!(
            "Agent running from {:?} ({} work item(s) queued, {} game server(s) known)",
            self.paths.root(),
            self.work.len(),
            self.registry.len()
        );

        self.poller.start(shutdown.clone());
        let broker = Arc::clone(&self.broker).run(self.config.broker_interval(), shutdown.clone());
        let tasks = vec![
            self.spawn_dispatch_loop(shutdown.clone()),
            tokio::spawn(broker),
            self.spawn_host_control_loop(shutdown.clone()),
            self.spawn_snapshot_loop(shutdown.clone()),
        ];

        shutdown.triggered().await;
        log::info!("Shutting down");

        for task in tasks {
            if let Err(e) = task.await {
                log::warn!("Agent loop ended abnormally: {}", e);
            }
        }
        self.poller.stop();

        let flushed = self.broker.flush().await;
        if flushed.sent > 0 {
            log::info!("Delivered {} queued report(s) before exit", flushed.sent);
        }
        self.save_snapshots();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use reqwest::Client;

    use super::Agent;
    use crate::broker::testing::FakeControlPlane;
    use crate::config::AgentConfig;
    use crate::instance::testing::{runnable_instance, FakeProcesses};
    use crate::instance::ServerState;
    use crate::pacer::shutdown_channel;
    use crate::paths::AgentPaths;
    use crate::snapshot::read_json_or_default;
    use crate::steamcmd::testing::FakeSteamCmd;
    use crate::steamcmd::SteamCmd;
    use crate::work::{TargetType, WorkItem};

    fn agent(paths: &AgentPaths) -> Agent {
        let config = AgentConfig {
            dispatch_interval_ms: 10,
            broker_interval_ms: 10,
            host_loop_interval_ms: 10,
            ..AgentConfig::default()
        };
        Agent::assemble(
            config,
            paths.clone(),
            Client::new(),
            SteamCmd::new(Arc::new(FakeSteamCmd::default()), ""),
            Arc::new(FakeProcesses::default()),
            Arc::new(FakeControlPlane::default()),
        )
    }

    #[tokio::test]
    async fn state_survives_a_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AgentPaths::new(tmp.path());
        paths.ensure_data_dirs().unwrap();

        let first = agent(&paths);
        let mut instance = runnable_instance();
        instance.server_state = ServerState::Shutdown;
        first.registry().upsert(instance.clone());
        let pending = WorkItem::new(TargetType::Backup, Vec::new());
        first.work_queue().enqueue(pending);
        first.save_snapshots();

        let saved: Vec<WorkItem> = read_json_or_default(&paths.work_queue_path());
        assert_eq!(saved.len(), 1);

        let second = agent(&paths);
        assert_eq!(
            second.registry().get(&instance.id).unwrap().server_state,
            ServerState::Shutdown
        );
        assert_eq!(second.work_queue().len(), 1);
    }

    #[tokio::test]
    async fn run_returns_after_shutdown_and_writes_snapshots() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AgentPaths::new(tmp.path());
        paths.ensure_data_dirs().unwrap();

        let agent = Arc::new(agent(&paths));
        let (trigger, shutdown) = shutdown_channel();
        let running = tokio::spawn(Arc::clone(&agent).run(shutdown));

        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert!(paths.game_server_state_path().exists());
        assert!(paths.work_queue_path().exists());
    }
}
