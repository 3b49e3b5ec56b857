//! Game server instance types and lifecycle guards.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AgentError, Result};

/// Lifecycle state of a game server instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerState {
    #[default]
    Unknown,
    Installing,
    Updating,
    Uninstalling,
    Uninstalled,
    SpinningUp,
    InternallyConnectable,
    Connectable,
    ExternallyConnectable,
    ShuttingDown,
    Shutdown,
    Restarting,
    Stalled,
}

impl ServerState {
    /// States in which a server process is expected to be up.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            Self::SpinningUp
                | Self::InternallyConnectable
                | Self::Connectable
                | Self::ExternallyConnectable
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Installing => "Installing",
            Self::Updating => "Updating",
            Self::Uninstalling => "Uninstalling",
            Self::Uninstalled => "Uninstalled",
            Self::SpinningUp => "SpinningUp",
            Self::InternallyConnectable => "InternallyConnectable",
            Self::Connectable => "Connectable",
            Self::ExternallyConnectable => "ExternallyConnectable",
            Self::ShuttingDown => "ShuttingDown",
            Self::Shutdown => "Shutdown",
            Self::Restarting => "Restarting",
            Self::Stalled => "Stalled",
        }
    }
}

/// Where the game files came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceSource {
    #[default]
    Steam,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceRole {
    Executable,
    ConfigFile,
    SaveRoot,
    LogRoot,
    Script,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigFormat {
    Ini,
    Json,
}

/// One enforced key. `category` is the INI section or a dotted JSON object path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigEntry {
    #[serde(default)]
    pub category: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSet {
    pub format: ConfigFormat,
    #[serde(default)]
    pub entries: Vec<ConfigEntry>,
}

/// A file or directory inside the install root with a known purpose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPointer {
    pub role: ResourceRole,
    /// Relative to the install root.
    pub path: PathBuf,
    #[serde(default)]
    pub startup: bool,
    #[serde(default)]
    pub config: Option<ConfigSet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameServerInstance {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub server_state: ServerState,
    #[serde(default)]
    pub process_name: String,
    #[serde(default)]
    pub game_port: u16,
    #[serde(default)]
    pub query_port: u16,
    #[serde(default)]
    pub rcon_port: u16,
    #[serde(default)]
    pub resources: Vec<LocationPointer>,
    #[serde(default)]
    pub mod_list: Vec<u64>,
    #[serde(default)]
    pub steam_tool_id: u32,
    #[serde(default)]
    pub steam_game_id: u32,
    #[serde(default)]
    pub modded: bool,
    #[serde(default)]
    pub source: InstanceSource,
    #[serde(default)]
    pub launch_args: String,
    #[serde(default)]
    pub server_password: String,
    #[serde(default)]
    pub max_players: u32,
    /// Number of backup archives to keep; 0 uses the agent default.
    #[serde(default)]
    pub backup_retention: usize,
    #[serde(default)]
    pub last_state_update: Option<DateTime<Utc>>,
}

impl GameServerInstance {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            server_state: ServerState::Unknown,
            process_name: String::new(),
            game_port: 0,
            query_port: 0,
            rcon_port: 0,
            resources: Vec::new(),
            mod_list: Vec::new(),
            steam_tool_id: 0,
            steam_game_id: 0,
            modded: false,
            source: InstanceSource::Steam,
            launch_args: String::new(),
            server_password: String::new(),
            max_players: 0,
            backup_retention: 0,
            last_state_update: None,
        }
    }

    /// Set the state and stamp the change. Returns the previous state.
    pub fn set_state(&mut self, state: ServerState) -> ServerState {
        let previous = self.server_state;
        self.server_state = state;
        self.last_state_update = Some(Utc::now());
        previous
    }

    pub fn ready_to_start(&self) -> bool {
        !matches!(
            self.server_state,
            ServerState::Installing
                | ServerState::Restarting
                | ServerState::Stalled
                | ServerState::Updating
        )
    }

    pub fn ready_to_update(&self) -> bool {
        self.ready_to_start() && !self.server_state.is_running()
    }

    pub fn has_requirements_to_run(&self) -> bool {
        !self.process_name.trim().is_empty()
            && self.startup_resources().count() == 1
            && self.game_port != 0
            && self.query_port != 0
    }

    pub fn has_requirements_to_install(&self) -> bool {
        !self.id.is_nil() && self.steam_tool_id != 0
    }

    pub fn has_requirements_to_backup(&self) -> bool {
        self.resources_with_role(ResourceRole::SaveRoot).next().is_some()
    }

    fn startup_resources(&self) -> impl Iterator<Item = &LocationPointer> {
        self.resources.iter().filter(|r| r.startup)
    }

    /// The single startup resource, if exactly one is declared.
    pub fn startup_resource(&self) -> Option<&LocationPointer> {
        let mut iter = self.startup_resources();
        let first = iter.next()?;
        iter.next().is_none().then_some(first)
    }

    pub fn resources_with_role(&self, role: ResourceRole) -> impl Iterator<Item = &LocationPointer> {
        self.resources.iter().filter(move |r| r.role == role)
    }

    /// Resolve a resource path against the install root.
    ///
    /// Absolute paths and `..` segments are rejected so a resource can never
    /// point outside the install root.
    pub fn resolve(install_dir: &Path, resource: &LocationPointer) -> Result<PathBuf> {
        if resource
            .path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(AgentError::invalid_payload(format!(
                "resource path {:?} escapes the install directory",
                resource.path
            )));
        }
        Ok(install_dir.join(&resource.path))
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use uuid::Uuid;

    use super::{GameServerInstance, LocationPointer, ResourceRole, ServerState};
    use crate::error::ErrorKind;

    fn runnable() -> GameServerInstance {
        let mut instance = GameServerInstance::new(Uuid::new_v4(), "test");
        instance.process_name = "valheim_server".into();
        instance.game_port = 2456;
        instance.query_port = 2457;
        instance.resources.push(LocationPointer {
            role: ResourceRole::Executable,
            path: PathBuf::from("valheim_server.x86_64"),
            startup: true,
            config: None,
        });
        instance
    }

    #[test]
    fn start_and_update_guards() {
        let mut instance = runnable();
        for state in [
            ServerState::Installing,
            ServerState::Restarting,
            ServerState::Stalled,
            ServerState::Updating,
        ] {
            instance.server_state = state;
            assert!(!instance.ready_to_start(), "{state:?}");
            assert!(!instance.ready_to_update(), "{state:?}");
        }

        instance.server_state = ServerState::Connectable;
        assert!(instance.ready_to_start());
        assert!(!instance.ready_to_update());

        instance.server_state = ServerState::Shutdown;
        assert!(instance.ready_to_update());
    }

    #[test]
    fn run_requirements_need_exactly_one_startup_resource() {
        let mut instance = runnable();
        assert!(instance.has_requirements_to_run());

        instance.resources.push(LocationPointer {
            role: ResourceRole::Script,
            path: PathBuf::from("start.sh"),
            startup: true,
            config: None,
        });
        assert!(!instance.has_requirements_to_run());
        assert!(instance.startup_resource().is_none());

        instance.resources.clear();
        assert!(!instance.has_requirements_to_run());

        let mut no_port = runnable();
        no_port.query_port = 0;
        assert!(!no_port.has_requirements_to_run());
    }

    #[test]
    fn install_and_backup_requirements() {
        let mut instance = GameServerInstance::new(Uuid::nil(), "x");
        instance.steam_tool_id = 896660;
        assert!(!instance.has_requirements_to_install());
        instance.id = Uuid::new_v4();
        assert!(instance.has_requirements_to_install());

        assert!(!instance.has_requirements_to_backup());
        instance.resources.push(LocationPointer {
            role: ResourceRole::SaveRoot,
            path: PathBuf::from("saves"),
            startup: false,
            config: None,
        });
        assert!(instance.has_requirements_to_backup());
    }

    #[test]
    fn resource_paths_stay_inside_the_install_root() {
        let root = Path::new("/srv/servers/x");
        let pointer = |path: &str| LocationPointer {
            role: ResourceRole::ConfigFile,
            path: PathBuf::from(path),
            startup: false,
            config: None,
        };

        assert_eq!(
            GameServerInstance::resolve(root, &pointer("./cfg/server.ini")).unwrap(),
            root.join("./cfg/server.ini")
        );
        for escaping in ["../../escaped.ini", "cfg/../../x", "/etc/passwd"] {
            let err = GameServerInstance::resolve(root, &pointer(escaping)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidPayload, "{escaping}");
        }
    }
}
