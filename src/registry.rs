//! Persisted host registry.
//!
//! Owns the set of registered machines: CRUD with JSON persistence
//! under `data/hosts.json`. The prober and dispatcher only ever read
//! snapshots; all mutation goes through here.

use crate::models::{Host, HostId};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub type HostsMap = HashMap<HostId, Host>;

pub struct HostRegistry {
    hosts: RwLock<HostsMap>,
    data_file: String,
}

pub type SharedHostRegistry = Arc<HostRegistry>;

impl HostRegistry {
    pub fn new(data_file: &str) -> Self {
        Self {
            hosts: RwLock::new(HashMap::new()),
            data_file: data_file.to_string(),
        }
    }

    /// Loads hosts from the JSON data file, starting fresh when absent.
    pub async fn load(&self) -> Result<()> {
        if !std::path::Path::new(&self.data_file).exists() {
            info!("no existing hosts file, starting fresh");
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&self.data_file)
            .await
            .with_context(|| format!("reading {}", self.data_file))?;
        let loaded: HostsMap = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", self.data_file))?;

        let mut hosts = self.hosts.write().await;
        info!("loaded {} hosts from {}", loaded.len(), self.data_file);
        *hosts = loaded;
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        let hosts = self.hosts.read().await;
        let content = serde_json::to_string_pretty(&*hosts)?;
        if let Some(dir) = std::path::Path::new(&self.data_file).parent() {
            tokio::fs::create_dir_all(dir).await.ok();
        }
        tokio::fs::write(&self.data_file, content)
            .await
            .with_context(|| format!("writing {}", self.data_file))?;
        Ok(())
    }

    /// Snapshot of all registered hosts, sorted by id for stable listings.
    pub async fn list(&self) -> Vec<Host> {
        let mut list: Vec<Host> = self.hosts.read().await.values().cloned().collect();
        list.sort_by_key(|h| h.id);
        list
    }

    pub async fn get(&self, id: HostId) -> Option<Host> {
        self.hosts.read().await.get(&id).cloned()
    }

    pub async fn count(&self) -> usize {
        self.hosts.read().await.len()
    }

    /// Registers a new host; ids are monotonic and never reused within
    /// a registry file's lifetime while higher ids exist.
    pub async fn add(
        &self,
        name: String,
        address: String,
        port: u16,
        mac: Option<String>,
    ) -> Result<Host> {
        let host = {
            let mut hosts = self.hosts.write().await;
            let id = hosts.keys().max().copied().map_or(1, |max| max + 1);
            let host = Host { id, name, address, port, mac };
            hosts.insert(id, host.clone());
            host
        };

        if let Err(e) = self.save().await {
            warn!("failed to save hosts after add: {e:#}");
        }
        info!("added host {} ({} -> {}:{})", host.id, host.name, host.address, host.port);
        Ok(host)
    }

    /// Updates an existing host in place; returns `None` for unknown ids.
    pub async fn update(
        &self,
        id: HostId,
        name: String,
        address: String,
        port: u16,
        mac: Option<String>,
    ) -> Result<Option<Host>> {
        let updated = {
            let mut hosts = self.hosts.write().await;
            match hosts.get_mut(&id) {
                Some(host) => {
                    host.name = name;
                    host.address = address;
                    host.port = port;
                    // Keep the stored MAC when the update does not carry one.
                    if mac.is_some() {
                        host.mac = mac;
                    }
                    Some(host.clone())
                }
                None => None,
            }
        };

        if let Some(ref host) = updated {
            if let Err(e) = self.save().await {
                warn!("failed to save hosts after update: {e:#}");
            }
            info!("updated host {} ({})", host.id, host.name);
        }
        Ok(updated)
    }

    /// Records a freshly resolved MAC (e.g. refreshed before a wake).
    pub async fn set_mac(&self, id: HostId, mac: String) -> Result<()> {
        {
            let mut hosts = self.hosts.write().await;
            let Some(host) = hosts.get_mut(&id) else { return Ok(()) };
            if host.mac.as_deref() == Some(mac.as_str()) {
                return Ok(());
            }
            host.mac = Some(mac);
        }
        self.save().await
    }

    /// Removes a host; returns whether it existed. The caller is
    /// responsible for evicting the matching status-cache entry.
    pub async fn remove(&self, id: HostId) -> Result<bool> {
        let existed = self.hosts.write().await.remove(&id).is_some();
        if existed {
            if let Err(e) = self.save().await {
                warn!("failed to save hosts after remove: {e:#}");
            }
            info!("removed host {id}");
        }
        Ok(existed)
    }
}
