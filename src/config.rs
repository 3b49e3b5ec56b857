use std::fs;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::paths::AgentPaths;

/// Load the agent config, writing a default one when none exists yet.
pub fn load_config(paths: &AgentPaths) -> Result<AgentConfig> {
    let path = paths.config_path();
    if !path.exists() {
        let config = AgentConfig::default();
        save_config(paths, &config)?;
        return Ok(config);
    }
    let content = fs::read_to_string(&path).map_err(|e| AgentError::config(e.to_string()))?;
    let config: AgentConfig =
        toml::from_str(&content).map_err(|e| AgentError::config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

pub fn save_config(paths: &AgentPaths, config: &AgentConfig) -> Result<()> {
    paths.ensure_data_dirs()?;
    let content = toml::to_string_pretty(config).map_err(|e| AgentError::config(e.to_string()))?;
    fs::write(paths.config_path(), content).map_err(|e| AgentError::config(e.to_string()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base URL of the control server API.
    #[serde(default)]
    pub control_server_url: String,
    /// Registration URL handed out by the control server (`?host=<uuid>&key=<key>`).
    #[serde(default)]
    pub registration_url: String,
    #[serde(default = "default_max_concurrent_work")]
    pub max_concurrent_work: usize,
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,
    #[serde(default = "default_broker_interval_ms")]
    pub broker_interval_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_host_loop_interval_ms")]
    pub host_loop_interval_ms: u64,
    #[serde(default = "default_poller_stale_after_secs")]
    pub poller_stale_after_secs: u64,
    #[serde(default = "default_queue_max_per_run")]
    pub queue_max_per_run: usize,
    #[serde(default = "default_max_queue_attempts")]
    pub max_queue_attempts: u32,
    /// Drop check-ins whose metrics are all zero instead of sending them.
    #[serde(default)]
    pub drop_empty_checkins: bool,
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
    #[serde(default = "default_stop_grace_period_secs")]
    pub stop_grace_period_secs: u64,
    #[serde(default = "default_startup_stall_secs")]
    pub startup_stall_secs: u64,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    #[serde(default = "default_backup_retention")]
    pub default_backup_retention: usize,
    /// SteamCMD login; anonymous when empty.
    #[serde(default)]
    pub steam_username: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_max_concurrent_work() -> usize {
    4
}

fn default_dispatch_interval_ms() -> u64 {
    1_000
}

fn default_broker_interval_ms() -> u64 {
    5_000
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_host_loop_interval_ms() -> u64 {
    5_000
}

fn default_poller_stale_after_secs() -> u64 {
    20
}

fn default_queue_max_per_run() -> usize {
    50
}

fn default_max_queue_attempts() -> u32 {
    10
}

fn default_snapshot_interval_secs() -> u64 {
    60
}

fn default_stop_grace_period_secs() -> u64 {
    10
}

fn default_startup_stall_secs() -> u64 {
    600
}

fn default_query_timeout_ms() -> u64 {
    500
}

fn default_backup_retention() -> usize {
    50
}

fn default_http_timeout_secs() -> u64 {
    15
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            control_server_url: String::new(),
            registration_url: String::new(),
            max_concurrent_work: default_max_concurrent_work(),
            dispatch_interval_ms: default_dispatch_interval_ms(),
            broker_interval_ms: default_broker_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            host_loop_interval_ms: default_host_loop_interval_ms(),
            poller_stale_after_secs: default_poller_stale_after_secs(),
            queue_max_per_run: default_queue_max_per_run(),
            max_queue_attempts: default_max_queue_attempts(),
            drop_empty_checkins: false,
            snapshot_interval_secs: default_snapshot_interval_secs(),
            stop_grace_period_secs: default_stop_grace_period_secs(),
            startup_stall_secs: default_startup_stall_secs(),
            query_timeout_ms: default_query_timeout_ms(),
            default_backup_retention: default_backup_retention(),
            steam_username: String::new(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_work == 0 {
            return Err(AgentError::config("max_concurrent_work must be at least 1"));
        }
        if self.max_queue_attempts == 0 {
            return Err(AgentError::config("max_queue_attempts must be at least 1"));
        }
        if self.queue_max_per_run == 0 {
            return Err(AgentError::config("queue_max_per_run must be at least 1"));
        }
        let intervals = [
            ("dispatch_interval_ms", self.dispatch_interval_ms),
            ("broker_interval_ms", self.broker_interval_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("host_loop_interval_ms", self.host_loop_interval_ms),
            ("poller_stale_after_secs", self.poller_stale_after_secs),
            ("snapshot_interval_secs", self.snapshot_interval_secs),
            ("query_timeout_ms", self.query_timeout_ms),
            ("http_timeout_secs", self.http_timeout_secs),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(AgentError::config(format!("{name} must be greater than zero")));
        }
        Ok(())
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn broker_interval(&self) -> Duration {
        Duration::from_millis(self.broker_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn host_loop_interval(&self) -> Duration {
        Duration::from_millis(self.host_loop_interval_ms)
    }

    pub fn poller_stale_after(&self) -> Duration {
        Duration::from_secs(self.poller_stale_after_secs)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }

    pub fn stop_grace_period(&self) -> Duration {
        Duration::from_secs(self.stop_grace_period_secs)
    }

    pub fn startup_stall(&self) -> Duration {
        Duration::from_secs(self.startup_stall_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
