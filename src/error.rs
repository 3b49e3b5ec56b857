//! Agent error types.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Agent error carrying a stable kind and a small key/value payload.
#[derive(Debug)]
pub struct AgentError {
    payload: HashMap<String, String>,
    kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Game server instance not found
    InstanceNotFound,
    /// Instance state forbids the operation right now
    InstanceBusy,
    /// Instance lacks the data needed for the operation
    MissingRequirements,
    /// Work payload absent, malformed or of an unknown target type
    InvalidPayload,
    /// Configuration error
    Config,
    /// File system error
    Io,
    /// Network error
    Network,
    /// Control server rejected or failed a call
    ControlServer,
    /// Registration URL or handshake error
    Registration,
    /// Process error
    Process,
    /// SteamCMD reported a failure
    SteamCmd,
    /// Backup error
    Backup,
    /// General error
    Other,
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            Self::InstanceNotFound => 1001,
            Self::InstanceBusy => 1002,
            Self::MissingRequirements => 1003,
            Self::InvalidPayload => 1004,
            Self::Config => 2001,
            Self::Io => 2002,
            Self::Network => 2003,
            Self::ControlServer => 2004,
            Self::Registration => 2005,
            Self::Process => 3001,
            Self::SteamCmd => 3002,
            Self::Backup => 4001,
            Self::Other => 9999,
        }
    }
}

impl AgentError {
    pub fn new(kind: ErrorKind, payload: HashMap<String, String>) -> Self {
        Self { payload, kind }
    }

    /// Create an error with a single "detail" key from a non-empty string,
    /// or an empty payload if the string is empty.
    fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let payload = if detail.is_empty() {
            HashMap::new()
        } else {
            HashMap::from([("detail".to_string(), detail)])
        };
        Self::new(kind, payload)
    }

    pub fn instance_not_found(id: &str) -> Self {
        Self::new(
            ErrorKind::InstanceNotFound,
            HashMap::from([("id".to_string(), id.to_string())]),
        )
    }

    pub fn instance_busy(id: &str, state: &str) -> Self {
        Self::new(
            ErrorKind::InstanceBusy,
            HashMap::from([
                ("id".to_string(), id.to_string()),
                ("state".to_string(), state.to_string()),
            ]),
        )
    }

    pub fn missing_requirements(id: &str, requirement: &str) -> Self {
        Self::new(
            ErrorKind::MissingRequirements,
            HashMap::from([
                ("id".to_string(), id.to_string()),
                ("requirement".to_string(), requirement.to_string()),
            ]),
        )
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::InvalidPayload, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Io, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Network, message)
    }

    pub fn control_server(url: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::ControlServer,
            HashMap::from([
                ("url".to_string(), url.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn registration(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Registration, message)
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Process, message)
    }

    pub fn steamcmd(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::SteamCmd, message)
    }

    pub fn backup(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Backup, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Other, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            let mut pairs: Vec<String> = self
                .payload
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            pairs.sort();
            write!(f, "{:?}: {}", self.kind, pairs.join(", "))
        }
    }
}

impl std::error::Error for AgentError {}

impl Serialize for AgentError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("AgentError", 2)?;
        s.serialize_field("code", &self.kind.code())?;
        s.serialize_field("payload", &self.payload)?;
        s.end()
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<toml::de::Error> for AgentError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<toml::ser::Error> for AgentError {
    fn from(err: toml::ser::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::network(err.to_string())
    }
}

impl From<zip::result::ZipError> for AgentError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::io(err.to_string())
    }
}

impl From<walkdir::Error> for AgentError {
    fn from(err: walkdir::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_payload(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AgentError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::other(format!("background task failed: {err}"))
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::{AgentError, ErrorKind};

    #[test]
    fn display_lists_payload_pairs_in_stable_order() {
        let err = AgentError::instance_busy("abc", "Updating");
        assert_eq!(err.to_string(), "InstanceBusy: id=abc, state=Updating");
    }

    #[test]
    fn serializes_code_and_payload() {
        let err = AgentError::registration("missing key");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], 2005);
        assert_eq!(json["payload"]["detail"], "missing key");
        assert_eq!(err.kind(), ErrorKind::Registration);
    }

    #[test]
    fn empty_detail_yields_bare_kind() {
        assert_eq!(AgentError::other("").to_string(), "Other");
    }
}
