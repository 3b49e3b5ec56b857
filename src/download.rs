use std::fs;
use std::io::Write as _;
use std::path::Path;

use futures_util::StreamExt as _;
use reqwest::Client;

use crate::error::{AgentError, Result};

/// Stream `url` to `dest`, creating parent directories. A partial file is removed on failure.
pub async fn download_file(client: &Client, url: &str, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| AgentError::io(e.to_string()))?;
    }

    let result = stream_to_file(client, url, dest).await;
    if result.is_err() && dest.exists() {
        if let Err(e) = fs::remove_file(dest) {
            log::warn!("Failed to remove partial download {:?}: {}", dest, e);
        }
    }
    result
}

async fn stream_to_file(client: &Client, url: &str, dest: &Path) -> Result<()> {
    let resp = client
        .get(url)
        .header("User-Agent", "gsm-agent")
        .send()
        .await
        .map_err(|e| AgentError::network(format!("GET {}: {}", url, e)))?;

    if !resp.status().is_success() {
        return Err(AgentError::network(format!("GET {}: {}", url, resp.status())));
    }

    let mut file = fs::File::create(dest).map_err(|e| AgentError::io(e.to_string()))?;
    let mut stream = resp.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AgentError::network(e.to_string()))?;
        file.write_all(&chunk)
            .map_err(|e| AgentError::io(e.to_string()))?;
    }

    file.flush().map_err(|e| AgentError::io(e.to_string()))?;
    Ok(())
}
