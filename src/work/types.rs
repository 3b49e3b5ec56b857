//! Work order types exchanged with the control server.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AgentError, Result};

/// Lifecycle of a work order. Only ever moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkStatus {
    #[default]
    Waiting,
    PickedUp,
    InProgress,
    Completed,
    Failed,
}

impl WorkStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Waiting => 0,
            Self::PickedUp => 1,
            Self::InProgress => 2,
            Self::Completed | Self::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a transition from `self` to `next` keeps the status moving forward.
    pub fn can_advance_to(self, next: Self) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

/// A work order as received from the control server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: Uuid,
    pub target_type: u16,
    #[serde(default)]
    pub status: WorkStatus,
    /// Opaque payload, deserialized per target type.
    #[serde(default, with = "base64_bytes")]
    pub work_data: Vec<u8>,
    #[serde(default)]
    pub attempt_count: u32,
}

impl WorkItem {
    pub fn new(target: TargetType, work_data: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_type: target.code(),
            status: WorkStatus::Waiting,
            work_data,
            attempt_count: 0,
        }
    }

    /// Move to `next`, refusing backwards or post-terminal transitions.
    pub fn advance(&mut self, next: WorkStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            log::warn!(
                "Ignoring work item {} status change {:?} -> {:?}",
                self.id,
                self.status,
                next
            );
            false
        }
    }

    pub fn target(&self) -> Result<TargetType> {
        TargetType::try_from(self.target_type)
    }

    /// Decode `work_data` as JSON.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        if self.work_data.is_empty() {
            return Err(AgentError::invalid_payload(format!(
                "work item {} carries no payload",
                self.id
            )));
        }
        Ok(serde_json::from_slice(&self.work_data)?)
    }
}

/// Which side of the agent a target type addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetCategory {
    Host,
    GameServer,
    StatusUpdate,
}

impl TargetCategory {
    /// Category by range membership: 100-199 host, 200-299 game server, 300-399 status update.
    pub fn of(raw: u16) -> Option<Self> {
        match raw {
            100..=199 => Some(Self::Host),
            200..=299 => Some(Self::GameServer),
            300..=399 => Some(Self::StatusUpdate),
            _ => None,
        }
    }
}

/// Every target type the agent knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetType {
    HostStatusRefresh,
    HostSteamCmdReset,
    HostCacheCleanup,
    Install,
    Update,
    Start,
    Stop,
    Restart,
    Uninstall,
    Backup,
    UpdateCheck,
    StatusRefresh,
    StatusUpdate,
}

impl TargetType {
    pub fn code(self) -> u16 {
        match self {
            Self::HostStatusRefresh => 100,
            Self::HostSteamCmdReset => 101,
            Self::HostCacheCleanup => 102,
            Self::Install => 200,
            Self::Update => 201,
            Self::Start => 202,
            Self::Stop => 203,
            Self::Restart => 204,
            Self::Uninstall => 205,
            Self::Backup => 206,
            Self::UpdateCheck => 207,
            Self::StatusRefresh => 208,
            Self::StatusUpdate => 300,
        }
    }

    pub fn category(self) -> TargetCategory {
        match self {
            Self::HostStatusRefresh | Self::HostSteamCmdReset | Self::HostCacheCleanup => {
                TargetCategory::Host
            }
            Self::Install
            | Self::Update
            | Self::Start
            | Self::Stop
            | Self::Restart
            | Self::Uninstall
            | Self::Backup
            | Self::UpdateCheck
            | Self::StatusRefresh => TargetCategory::GameServer,
            Self::StatusUpdate => TargetCategory::StatusUpdate,
        }
    }
}

impl TryFrom<u16> for TargetType {
    type Error = AgentError;

    fn try_from(raw: u16) -> Result<Self> {
        let category = TargetCategory::of(raw)
            .ok_or_else(|| AgentError::invalid_payload(format!("target type {raw} is out of range")))?;
        let target = match (category, raw) {
            (TargetCategory::Host, 100) => Self::HostStatusRefresh,
            (TargetCategory::Host, 101) => Self::HostSteamCmdReset,
            (TargetCategory::Host, 102) => Self::HostCacheCleanup,
            (TargetCategory::GameServer, 200) => Self::Install,
            (TargetCategory::GameServer, 201) => Self::Update,
            (TargetCategory::GameServer, 202) => Self::Start,
            (TargetCategory::GameServer, 203) => Self::Stop,
            (TargetCategory::GameServer, 204) => Self::Restart,
            (TargetCategory::GameServer, 205) => Self::Uninstall,
            (TargetCategory::GameServer, 206) => Self::Backup,
            (TargetCategory::GameServer, 207) => Self::UpdateCheck,
            (TargetCategory::GameServer, 208) => Self::StatusRefresh,
            (TargetCategory::StatusUpdate, 300) => Self::StatusUpdate,
            _ => {
                return Err(AgentError::invalid_payload(format!(
                    "target type {raw} is not assigned in the {category:?} range"
                )))
            }
        };
        Ok(target)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize as _, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD
            .decode(encoded.trim())
            .map_err(serde::de::Error::custom)
    }
}
