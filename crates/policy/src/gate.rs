//! Command gate decision pipeline.
//!
//! Evaluation order, short-circuiting on the first block: remote kill-switch,
//! then the local maintenance flag. The two are independently operable (a
//! fleet operator vs. a single-instance operator) and compose without either
//! overriding the other's block; only the remote tier carries a bypass.

use crate::{cooldown::Tier, remote::RemoteMaintenance};

/// Commands that stay available while remote maintenance is active.
pub const MAINTENANCE_ALLOWED_COMMANDS: &[&str] = &["/status", "/start"];

/// Why a command was blocked. A designed control-flow outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateBlock {
    /// Remote kill-switch is active; carries the published reason.
    RemoteMaintenance { reason: String },
    /// Local maintenance flag is on.
    LocalMaintenance,
}

/// Decide whether `command` may run for an actor.
pub fn evaluate(
    remote: &RemoteMaintenance,
    local_enabled: bool,
    is_operator: bool,
    command: &str,
) -> Result<(), GateBlock> {
    if remote.enabled && !MAINTENANCE_ALLOWED_COMMANDS.contains(&command) {
        let bypass = remote.allow_operator_bypass && is_operator;
        if !bypass {
            return Err(GateBlock::RemoteMaintenance {
                reason: remote.reason.clone(),
            });
        }
    }

    if local_enabled && !is_operator {
        return Err(GateBlock::LocalMaintenance);
    }

    Ok(())
}

/// Resolve an actor's tier. Operator wins over premium.
pub fn resolve_tier(is_operator: bool, is_premium: bool) -> Tier {
    if is_operator {
        Tier::Operator
    } else if is_premium {
        Tier::Premium
    } else {
        Tier::Free
    }
}
