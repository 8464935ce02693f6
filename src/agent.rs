//! Client for the resident shutdown agent.
//!
//! One JSON line out, one JSON line back, over a short-lived TCP
//! connection to `address:port`. A refused connection means the agent
//! is not running; the caller classifies that, this module only
//! surfaces the raw failure.

use crate::models::Host;
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct AgentCommand<'a> {
    command_id: String,
    command: &'a str,
}

#[derive(Debug, Deserialize)]
struct AgentResponse {
    status: String,
    error: Option<String>,
}

/// Asks the agent on `host` to shut the machine down. The whole
/// exchange is bounded by `timeout`.
pub async fn send_shutdown(host: &Host, timeout: Duration) -> Result<()> {
    let command_id = Uuid::new_v4().to_string();
    debug!("shutdown command {command_id} -> {}:{}", host.address, host.port);

    tokio::time::timeout(timeout, exchange(host, &command_id))
        .await
        .map_err(|_| anyhow!("shutdown agent call timed out"))?
}

async fn exchange(host: &Host, command_id: &str) -> Result<()> {
    let mut stream = TcpStream::connect((host.address.as_str(), host.port))
        .await
        .with_context(|| format!("connecting to shutdown agent at {}:{}", host.address, host.port))?;

    let cmd = AgentCommand { command_id: command_id.to_string(), command: "shutdown" };
    let mut payload = serde_json::to_vec(&cmd)?;
    payload.push(b'\n');
    stream.write_all(&payload).await.context("sending shutdown command")?;

    let mut line = String::new();
    BufReader::new(stream)
        .read_line(&mut line)
        .await
        .context("reading agent response")?;
    if line.trim().is_empty() {
        bail!("agent closed the connection without a response");
    }

    let response: AgentResponse =
        serde_json::from_str(line.trim()).context("parsing agent response")?;
    if response.status == "ok" {
        Ok(())
    } else {
        bail!(response.error.unwrap_or_else(|| format!("agent answered {}", response.status)))
    }
}
