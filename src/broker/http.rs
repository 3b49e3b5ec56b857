use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::ControlPlane;
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::outbound::{HostCheckIn, ServerStateReport, WorkStatusUpdate};
use crate::validation::{parse_registration_url, Registration};
use crate::work::WorkItem;

const USER_AGENT: &str = "gsm-agent";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationConfirm<'a> {
    host_id: String,
    key: &'a str,
    agent_version: &'static str,
}

/// JSON over HTTP implementation of [`ControlPlane`].
pub struct HttpControlPlane {
    client: Client,
    base_url: String,
    registration: Registration,
}

impl HttpControlPlane {
    pub fn new(client: Client, base_url: &str, registration: Registration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            registration,
        }
    }

    /// Build from config. Without an explicit `control_server_url` the origin of
    /// the registration URL is used.
    pub fn from_config(client: Client, config: &AgentConfig) -> Result<Self> {
        let registration = parse_registration_url(&config.registration_url)?;
        let base_url = if config.control_server_url.trim().is_empty() {
            let endpoint = Url::parse(&registration.endpoint)
                .map_err(|e| AgentError::config(format!("Invalid registration url: {}", e)))?;
            endpoint.origin().ascii_serialization()
        } else {
            config.control_server_url.trim().to_string()
        };
        Ok(Self::new(client, &base_url, registration))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/host/{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("User-Agent", USER_AGENT)
            .header("X-Host-Id", self.registration.host_id.to_string())
            .header("X-Host-Key", &self.registration.key)
    }

    async fn send(&self, url: &str, request: RequestBuilder) -> Result<Response> {
        let resp = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| AgentError::control_server(url, e.to_string()))?;
        if !resp.status().is_success() {
            return Err(AgentError::control_server(
                url,
                format!("returned status: {}", resp.status()),
            ));
        }
        Ok(resp)
    }

    async fn post<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<()> {
        let url = self.url(path);
        self.send(&url, self.client.post(&url).json(body)).await?;
        Ok(())
    }

    async fn get<T: DeserializeOwned + Send>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let resp = self.send(&url, self.client.get(&url)).await?;
        resp.json::<T>()
            .await
            .map_err(|e| AgentError::control_server(&url, format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn ping(&self) -> Result<()> {
        let url = self.url("ping");
        self.send(&url, self.client.get(&url)).await?;
        Ok(())
    }

    async fn confirm_registration(&self) -> Result<()> {
        let body = RegistrationConfirm {
            host_id: self.registration.host_id.to_string(),
            key: &self.registration.key,
            agent_version: env!("CARGO_PKG_VERSION"),
        };
        let url = self.registration.endpoint.clone();
        self.send(&url, self.client.post(&url).json(&body))
            .await
            .map_err(|e| AgentError::registration(e.to_string()))?;
        Ok(())
    }

    async fn fetch_work(&self) -> Result<Vec<WorkItem>> {
        self.get("work").await
    }

    async fn send_work_status(&self, update: &WorkStatusUpdate) -> Result<()> {
        self.post("work/status", update).await
    }

    async fn send_check_in(&self, check_in: &HostCheckIn) -> Result<()> {
        self.post("checkin", check_in).await
    }

    async fn send_server_state(&self, report: &ServerStateReport) -> Result<()> {
        self.post("server-state", report).await
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Client;

    use super::HttpControlPlane;
    use crate::config::AgentConfig;
    use crate::error::ErrorKind;

    const REGISTRATION: &str =
        "https://cp.example:8443/api/register?host=6f1c9c3e-3a0a-4a83-9d57-0e1b2d0c2f11&key=abc";

    #[test]
    fn base_url_defaults_to_registration_origin() {
        let config = AgentConfig {
            registration_url: REGISTRATION.into(),
            ..AgentConfig::default()
        };
        let control = HttpControlPlane::from_config(Client::new(), &config).unwrap();
        assert_eq!(control.url("ping"), "https://cp.example:8443/api/host/ping");
    }

    #[test]
    fn explicit_base_url_wins() {
        let config = AgentConfig {
            registration_url: REGISTRATION.into(),
            control_server_url: "http://10.0.0.5:5000/".into(),
            ..AgentConfig::default()
        };
        let control = HttpControlPlane::from_config(Client::new(), &config).unwrap();
        assert_eq!(control.url("work/status"), "http://10.0.0.5:5000/api/host/work/status");
    }

    #[test]
    fn missing_registration_is_rejected() {
        let err = HttpControlPlane::from_config(Client::new(), &AgentConfig::default())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Registration);
    }
}
