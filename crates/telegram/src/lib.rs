//! Telegram control surface for the tether gateway.
//!
//! Receives operator/user commands over the Bot API, gates them through the
//! policy pipeline, and drives sessions, broadcasts, and progress edits.

pub mod bot;
pub mod broadcast;
pub mod commands;
pub mod config;
pub mod error;
pub mod handlers;
pub mod outbound;
pub mod progress;

pub use {
    broadcast::{BroadcastEngine, BroadcastPayload, BroadcastReport},
    commands::{Capability, Command},
    config::TetherConfig,
    error::{Error, Result},
    handlers::HandlerContext,
    outbound::TelegramSink,
    progress::{EditOutcome, EditSink, EditTarget, ProgressReporter},
};
