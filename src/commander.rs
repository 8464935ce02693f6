//! The real power primitives behind the dispatcher: Wake-on-LAN over
//! UDP and the shutdown agent over TCP.

use crate::agent;
use crate::arp;
use crate::dispatch::PowerCommander;
use crate::models::Host;
use crate::registry::SharedHostRegistry;
use crate::wol;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

pub struct LanCommander {
    registry: SharedHostRegistry,
    broadcast_hint: Option<String>,
    agent_timeout: Duration,
}

impl LanCommander {
    pub fn new(
        registry: SharedHostRegistry,
        broadcast_hint: Option<String>,
        agent_timeout: Duration,
    ) -> Self {
        Self { registry, broadcast_hint, agent_timeout }
    }

    /// Freshly resolved MAC when the neighbour table has one (the IP
    /// may have been reassigned since registration), otherwise the
    /// stored MAC.
    async fn effective_mac(&self, host: &Host) -> Result<String> {
        match arp::resolve_mac(&host.address).await {
            Ok(mac) => {
                if host.mac.as_deref() != Some(mac.as_str()) {
                    if let Err(e) = self.registry.set_mac(host.id, mac.clone()).await {
                        warn!("failed to persist refreshed MAC for host {}: {e:#}", host.id);
                    }
                }
                Ok(mac)
            }
            Err(e) => match &host.mac {
                Some(stored) => {
                    warn!("could not refresh MAC for {}, using stored value: {e:#}", host.name);
                    Ok(stored.clone())
                }
                None => bail!("no MAC address available for host {}", host.name),
            },
        }
    }
}

#[async_trait]
impl PowerCommander for LanCommander {
    async fn send_wake(&self, host: &Host) -> Result<()> {
        let mac = self.effective_mac(host).await?;
        let target = Host { mac: Some(mac), ..host.clone() };
        wol::send_wake(&target, self.broadcast_hint.as_deref())
    }

    async fn send_shutdown(&self, host: &Host) -> Result<()> {
        agent::send_shutdown(host, self.agent_timeout).await
    }
}
