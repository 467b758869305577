//! Layered command policy for the tether gateway.
//!
//! Every inbound command passes a remote kill-switch, the local maintenance
//! flag, and (for privileged commands) a capability check plus a per-tier
//! cooldown before its handler runs.

pub mod cooldown;
pub mod error;
pub mod gate;
pub mod maintenance;
pub mod remote;

pub use {
    cooldown::{CooldownConfig, CooldownRegistry, Tier},
    error::{Error, Result},
    gate::GateBlock,
    maintenance::{LocalMaintenance, MaintenanceFlag},
    remote::{ConfigFetcher, HttpFetcher, RemoteConfigCache, RemoteMaintenance},
};
