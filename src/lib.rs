mod agent;
mod archive;
mod backup;
mod broker;
mod config;
mod download;
mod error;
mod instance;
mod outbound;
mod pacer;
mod paths;
mod process;
mod snapshot;
mod steamcmd;
mod telemetry;
mod validation;
mod work;

use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Client;

pub use agent::Agent;
pub use broker::{
    BrokerSettings, CommunicationBroker, ControlPlane, DrainReport, HttpControlPlane,
};
pub use config::{load_config, save_config, AgentConfig};
pub use error::{AgentError, ErrorKind, Result};
pub use instance::{
    enforce_config_files, is_internally_connectable, merge_ini, merge_json, query_a2s_info,
    ConfigEntry, ConfigFormat, ConfigSet, EngineSettings, GameServerInstance, InstanceRegistry,
    InstanceSource, LifecycleEngine, LocationPointer, ResourceRole, ServerState, StatusReporter,
};
pub use outbound::{
    HostCheckIn, OutboundMessage, OutboundQueue, RetryableOutboundMessage, ServerStateReport,
    WorkStatusUpdate,
};
pub use pacer::{shutdown_channel, IntervalPacer, Shutdown, ShutdownTrigger};
pub use paths::{default_data_dir, AgentPaths};
pub use process::{
    force_kill, graceful_shutdown, is_port_bound, is_process_alive, run_process, LaunchSpec,
    ProcessControl, RunOutcome, RunRequest, RunningProcess, SystemProcessControl,
};
pub use steamcmd::{
    cleanup_cache, ensure_installed, fresh_reset, SteamCmd, SteamCmdCommand, SteamCmdExecutor,
    SteamCmdProcess, SweepReport,
};
pub use telemetry::ResourcePoller;
pub use validation::{parse_registration_url, Registration};
pub use work::{
    AgentWorkExecutor, GameServerOrder, StatusUpdateOrder, TargetCategory, TargetType,
    WorkExecutor, WorkItem, WorkQueue, WorkStatus,
};

/// Options taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Data directory; `$GSM_AGENT_HOME` or `~/.gsm_agent` when absent.
    pub data_dir: Option<PathBuf>,
}

/// Start the agent and block until Ctrl-C.
///
/// Fails before any loop starts when the config or registration URL is
/// invalid, or when SteamCMD cannot be installed.
pub async fn run(options: RunOptions) -> Result<()> {
    let root = match options.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    let paths = AgentPaths::new(root);
    paths.ensure_data_dirs()?;
    let config = load_config(&paths)?;

    let client = Client::builder().timeout(config.http_timeout()).build()?;
    let control = Arc::new(HttpControlPlane::from_config(client.clone(), &config)?);
    let steam = SteamCmd::new(
        Arc::new(SteamCmdProcess::new(paths.steamcmd_exe())),
        config.steam_username.clone(),
    );

    log::info!("Bootstrapping SteamCMD in {:?}", paths.steamcmd_dir());
    ensure_installed(&client, &paths, &steam).await?;

    let agent = Arc::new(Agent::assemble(
        config,
        paths,
        client,
        steam,
        Arc::new(SystemProcessControl::new()),
        control,
    ));

    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => log::info!("Received Ctrl-C"),
            Err(e) => log::error!("Failed to listen for Ctrl-C: {}", e),
        }
        trigger.trigger();
    });

    agent.run(shutdown).await
}
