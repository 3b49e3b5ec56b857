//! Game server lifecycle engine.
//!
//! Install roots live under `servers/{id}/`; the registry keeps the last known
//! lifecycle state of every instance and is snapshotted to
//! `state/GameServerState.json`.

mod config_files;
mod connectivity;
mod deploy;
mod lifecycle;
mod registry;
mod reporter;
mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

pub use config_files::{enforce_config_files, merge_ini, merge_json};
pub use connectivity::{is_internally_connectable, query_a2s_info};
pub use registry::InstanceRegistry;
pub use reporter::StatusReporter;
pub use types::{
    ConfigEntry, ConfigFormat, ConfigSet, GameServerInstance, InstanceSource, LocationPointer,
    ResourceRole, ServerState,
};

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::paths::AgentPaths;
use crate::process::ProcessControl;
use crate::steamcmd::SteamCmd;

/// Timing and retention knobs the engine takes from the agent config.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub stop_grace_period: Duration,
    pub startup_stall: Duration,
    pub query_timeout: Duration,
    pub default_backup_retention: usize,
}

impl From<&AgentConfig> for EngineSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            stop_grace_period: config.stop_grace_period(),
            startup_stall: config.startup_stall(),
            query_timeout: config.query_timeout(),
            default_backup_retention: config.default_backup_retention,
        }
    }
}

/// Executes lifecycle operations against the registry, SteamCMD and the OS.
pub struct LifecycleEngine {
    paths: AgentPaths,
    steam: SteamCmd,
    processes: Arc<dyn ProcessControl>,
    registry: Arc<InstanceRegistry>,
    settings: EngineSettings,
}

impl LifecycleEngine {
    pub fn new(
        paths: AgentPaths,
        steam: SteamCmd,
        processes: Arc<dyn ProcessControl>,
        registry: Arc<InstanceRegistry>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            paths,
            steam,
            processes,
            registry,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn install_dir(&self, id: &Uuid) -> PathBuf {
        self.paths.instance_dir(id)
    }

    /// The registered copy of an instance, registering the payload when unknown.
    fn resolve(&self, payload: &GameServerInstance) -> GameServerInstance {
        if let Some(known) = self.registry.get(&payload.id) {
            return known;
        }
        log::info!("Registering game server {} ({})", payload.id, payload.name);
        self.registry.upsert(payload.clone());
        payload.clone()
    }

    /// Set the registered state and report it. Returns the previous state.
    fn transition(
        &self,
        id: &Uuid,
        state: ServerState,
        reporter: &StatusReporter,
    ) -> Result<ServerState> {
        let previous = self.registry.update(id, |i| i.set_state(state))?;
        if previous != state {
            reporter.server_state(*id, state);
        }
        Ok(previous)
    }

    fn ensure_ready_to_update(&self, instance: &GameServerInstance) -> Result<()> {
        if instance.ready_to_update() {
            Ok(())
        } else {
            Err(AgentError::instance_busy(
                &instance.id.to_string(),
                instance.server_state.name(),
            ))
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::{
        EngineSettings, GameServerInstance, InstanceRegistry, LifecycleEngine, LocationPointer,
        ResourceRole,
    };
    use crate::error::Result;
    use crate::paths::AgentPaths;
    use crate::process::{LaunchSpec, ProcessControl, RunningProcess};
    use crate::steamcmd::testing::FakeSteamCmd;
    use crate::steamcmd::SteamCmd;

    /// Tracks launched processes in memory, keyed by install dir.
    #[derive(Default)]
    pub struct FakeProcesses {
        pub running: Mutex<HashMap<PathBuf, RunningProcess>>,
        pub launches: Mutex<Vec<LaunchSpec>>,
        pub terminated: Mutex<Vec<u32>>,
        next_pid: AtomicU32,
    }

    #[async_trait]
    impl ProcessControl for FakeProcesses {
        async fn find_running(
            &self,
            _process_name: &str,
            install_dir: &Path,
        ) -> Result<Option<RunningProcess>> {
            Ok(self.running.lock().unwrap().get(install_dir).cloned())
        }

        async fn spawn(&self, spec: &LaunchSpec) -> Result<RunningProcess> {
            let process = RunningProcess {
                pid: 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst),
                name: "server".into(),
                exe: Some(spec.program.clone()),
            };
            self.launches.lock().unwrap().push(spec.clone());
            self.running
                .lock()
                .unwrap()
                .insert(spec.cwd.clone(), process.clone());
            Ok(process)
        }

        async fn terminate(&self, process: &RunningProcess, _grace: Duration) -> Result<()> {
            self.terminated.lock().unwrap().push(process.pid);
            self.running
                .lock()
                .unwrap()
                .retain(|_, p| p.pid != process.pid);
            Ok(())
        }
    }

    pub struct Harness {
        pub _tmp: tempfile::TempDir,
        pub paths: AgentPaths,
        pub steam: Arc<FakeSteamCmd>,
        pub processes: Arc<FakeProcesses>,
        pub registry: Arc<InstanceRegistry>,
        pub engine: Arc<LifecycleEngine>,
    }

    pub fn harness() -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AgentPaths::new(tmp.path());
        paths.ensure_data_dirs().unwrap();
        let steam = Arc::new(FakeSteamCmd::default());
        let processes = Arc::new(FakeProcesses::default());
        let registry = Arc::new(InstanceRegistry::new());
        let engine = Arc::new(LifecycleEngine::new(
            paths.clone(),
            SteamCmd::new(Arc::clone(&steam) as _, ""),
            Arc::clone(&processes) as _,
            Arc::clone(&registry),
            EngineSettings {
                stop_grace_period: Duration::from_millis(10),
                startup_stall: Duration::from_secs(600),
                query_timeout: Duration::from_millis(50),
                default_backup_retention: 5,
            },
        ));
        Harness {
            _tmp: tmp,
            paths,
            steam,
            processes,
            registry,
            engine,
        }
    }

    /// An instance that satisfies every install and run requirement.
    pub fn runnable_instance() -> GameServerInstance {
        let mut instance = GameServerInstance::new(Uuid::new_v4(), "Valheim");
        instance.process_name = "valheim_server".into();
        instance.game_port = 2456;
        instance.query_port = 2457;
        instance.steam_tool_id = 896660;
        instance.steam_game_id = 892970;
        instance.launch_args = "-name %SERVERNAME% -port %PORTGAME% -password %PASSWORD%".into();
        instance.server_password = "secret".into();
        instance.resources.push(LocationPointer {
            role: ResourceRole::Executable,
            path: PathBuf::from("valheim_server.x86_64"),
            startup: true,
            config: None,
        });
        instance
    }
}
