//! Lanward - LAN power-control kernel
//!
//! Keeps a registry of machines on the local network, probes their
//! reachability on a fixed cadence, and dispatches single-flight power
//! commands: Wake-on-LAN to switch a machine on, a resident shutdown
//! agent to switch it off. A REST API exposes the status map and the
//! dispatch calls to presentation layers.

pub mod agent;
pub mod arp;
pub mod commander;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod http;
pub mod models;
pub mod probe;
pub mod registry;
pub mod state;
pub mod status;
pub mod wol;
