//! MAC address resolution through the kernel neighbour table.
//!
//! Wake-on-LAN needs a MAC, users enter an IP. A single ping primes the
//! ARP cache, then `ip neigh` (with `arp -n` as fallback for older
//! systems) is parsed for a MAC-looking token.

use anyhow::{bail, Context, Result};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const CMD_TIMEOUT: Duration = Duration::from_secs(2);

fn looks_like_mac(token: &str) -> bool {
    let groups: Vec<&str> = token.split([':', '-']).collect();
    groups.len() == 6
        && groups
            .iter()
            .all(|g| g.len() == 2 && g.chars().all(|c| c.is_ascii_hexdigit()))
}

/// First MAC-looking token on any line mentioning `address`.
fn find_mac_token(output: &str, address: &str) -> Option<String> {
    output
        .lines()
        .filter(|line| line.contains(address))
        .flat_map(|line| line.split_whitespace())
        .find(|token| looks_like_mac(token))
        .map(|token| token.to_ascii_lowercase())
}

async fn run(cmd: &str, args: &[&str]) -> Result<String> {
    let output = tokio::time::timeout(CMD_TIMEOUT, Command::new(cmd).args(args).output())
        .await
        .with_context(|| format!("{cmd} timed out"))?
        .with_context(|| format!("running {cmd}"))?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Resolves the MAC for `address`, or an error when the host is not in
/// the neighbour table and does not answer a ping.
pub async fn resolve_mac(address: &str) -> Result<String> {
    // Prime the ARP cache; the ping result itself does not matter.
    let _ = run("ping", &["-c", "1", "-W", "1", address]).await;

    if let Ok(out) = run("ip", &["neigh", "show", address]).await {
        if let Some(mac) = find_mac_token(&out, address) {
            debug!("resolved MAC {mac} for {address} via ip neigh");
            return Ok(mac);
        }
    }

    if let Ok(out) = run("arp", &["-n", address]).await {
        if let Some(mac) = find_mac_token(&out, address) {
            debug!("resolved MAC {mac} for {address} via arp");
            return Ok(mac);
        }
    }

    bail!("could not find MAC address for {address}, make sure the host is reachable")
}
