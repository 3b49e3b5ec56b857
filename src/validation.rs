use reqwest::Url;
use uuid::Uuid;

use crate::error::{AgentError, Result};

/// Host identity extracted from a registration URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub host_id: Uuid,
    pub key: String,
    /// Registration URL without its query string.
    pub endpoint: String,
}

/// Parse a registration URL of the form `<endpoint>?host=<uuid>&key=<key>`.
///
/// Rejected locally, before any network call, when either parameter is missing
/// or the host id is not a UUID.
pub fn parse_registration_url(raw: &str) -> Result<Registration> {
    let url = Url::parse(raw.trim())
        .map_err(|e| AgentError::registration(format!("Invalid registration url: {}", e)))?;

    let mut host = None;
    let mut key = None;
    for (name, value) in url.query_pairs() {
        match name.as_ref() {
            "host" => host = Some(value.into_owned()),
            "key" => key = Some(value.into_owned()),
            _ => {}
        }
    }

    let host = host
        .filter(|h| !h.is_empty())
        .ok_or_else(|| AgentError::registration("Registration url is missing the host id"))?;
    let key = key
        .filter(|k| !k.is_empty())
        .ok_or_else(|| AgentError::registration("Registration url is missing the key"))?;
    let host_id = Uuid::parse_str(&host)
        .map_err(|_| AgentError::registration("Registration host id is not a valid id"))?;

    let mut endpoint = url.clone();
    endpoint.set_query(None);

    Ok(Registration {
        host_id,
        key,
        endpoint: endpoint.to_string(),
    })
}
