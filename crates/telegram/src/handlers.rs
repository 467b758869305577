//! Inbound command handling.
//!
//! Every message runs the same pipeline: record actor history, consult the
//! remote kill-switch and the local maintenance flag, enforce the command's
//! capability, then dispatch. Handler faults are caught here — one
//! misbehaving command must not crash the gateway or leave the chat
//! unanswered.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Instant,
};

use {
    chrono::Utc,
    teloxide::{
        payloads::{EditMessageTextSetters, SendMessageSetters},
        prelude::*,
        types::{
            CallbackQuery, ChatId, ForceReply, InlineKeyboardButton, InlineKeyboardMarkup,
            MaybeInaccessibleMessage, Message,
        },
    },
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use {
    tether_policy::{
        CooldownRegistry, MaintenanceFlag, RemoteConfigCache, RemoteMaintenance,
        cooldown::{self, Tier},
        gate::{self, GateBlock},
    },
    tether_sessions::{PairingUpdate, SessionOrchestrator, SessionStatus},
    tether_store::{AdminStore, ErrorLog, HistoryStore, TierStore, json},
};

use crate::{
    broadcast::{BroadcastEngine, BroadcastPayload, MAX_BUTTONS, UrlButton},
    commands::{Capability, ClearTarget, Command},
    config::TetherConfig,
    outbound::TelegramSink,
    progress::{EditSink, EditTarget, ProgressReporter},
};

const HISTORY_PER_PAGE: usize = 5;

/// Shared services injected into every handler.
pub struct HandlerContext {
    pub bot: Bot,
    pub config: TetherConfig,
    pub sink: Arc<TelegramSink>,
    pub history: Arc<HistoryStore>,
    pub tiers: Arc<TierStore>,
    pub admins: Arc<AdminStore>,
    pub cooldowns: Arc<CooldownRegistry>,
    pub remote: Option<Arc<RemoteConfigCache>>,
    pub maintenance: Arc<MaintenanceFlag>,
    pub orchestrator: SessionOrchestrator,
    pub progress: Arc<ProgressReporter>,
    pub broadcast: Arc<BroadcastEngine>,
    pub error_log: Arc<ErrorLog>,
    pub started_at: Instant,
    pub pending_broadcasts: Mutex<HashMap<(i64, i32), BroadcastPayload>>,
}

pub type SharedContext = Arc<HandlerContext>;

/// Handle a single inbound message from the polling loop.
pub async fn handle_message(ctx: &SharedContext, msg: Message) -> anyhow::Result<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let actor_id = from.id.0 as i64;
    let username = from.username.clone();
    let chat_id = msg.chat.id;
    let is_operator = ctx.config.is_operator(actor_id);

    // A reply to a pending broadcast confirmation?
    if let Some(replied) = msg.reply_to_message() {
        let pending = {
            let mut pending = ctx
                .pending_broadcasts
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            pending.remove(&(chat_id.0, replied.id.0))
        };
        if let Some(payload) = pending {
            ctx.history
                .record_activity(actor_id, username.as_deref())
                .await;
            if is_operator {
                confirm_broadcast(ctx, chat_id, msg.text(), payload).await;
            }
            return Ok(());
        }
    }

    let Some(text) = msg.text() else {
        return Ok(());
    };
    let Some(command) = Command::parse(text) else {
        debug!(actor_id, "ignoring non-command message");
        return Ok(());
    };

    // History first: blocked commands still count as activity.
    ctx.history
        .record_activity(actor_id, username.as_deref())
        .await;

    // Remote kill-switch. When the very first fetch fails there is no known
    // state; fail open rather than refusing service on a network blip.
    let remote = match &ctx.remote {
        Some(cache) => match cache.maintenance().await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "remote maintenance state unknown, failing open");
                RemoteMaintenance::default()
            },
        },
        None => RemoteMaintenance::default(),
    };

    if let Err(block) = gate::evaluate(
        &remote,
        ctx.maintenance.is_enabled(),
        is_operator,
        command.name(),
    ) {
        info!(actor_id, command = command.name(), ?block, "command blocked");
        let notice = match block {
            GateBlock::RemoteMaintenance { reason } => {
                format!("System maintenance in progress.\nReason: {reason}")
            },
            GateBlock::LocalMaintenance => {
                "Maintenance mode is on. Please wait until it completes.".to_string()
            },
        };
        ctx.sink.send_text_best_effort(chat_id.0, &notice).await;
        return Ok(());
    }

    // Capability tier.
    let allowed = match command.capability() {
        Capability::Everyone => true,
        Capability::Privileged => true, // checked inside the handler, see cmd_send
        Capability::Admin => is_operator || ctx.admins.contains(actor_id),
        Capability::Operator => is_operator,
    };
    if !allowed {
        ctx.sink
            .send_text_best_effort(chat_id.0, "You are not authorized to use this command.")
            .await;
        return Ok(());
    }

    // Backstop: a handler fault is logged and answered, never propagated to
    // the polling loop.
    if let Err(e) = dispatch(ctx, &msg, actor_id, is_operator, username, command.clone()).await {
        warn!(actor_id, command = command.name(), error = %e, "command handler failed");
        ctx.error_log.record(command.name(), format!("{e:#}")).await;
        ctx.sink
            .send_text_best_effort(chat_id.0, "Something went wrong while handling that command.")
            .await;
    }
    Ok(())
}

async fn dispatch(
    ctx: &SharedContext,
    msg: &Message,
    actor_id: i64,
    is_operator: bool,
    username: Option<String>,
    command: Command,
) -> anyhow::Result<()> {
    let chat_id = msg.chat.id;
    match command {
        Command::Start => cmd_start(ctx, chat_id).await,
        Command::Status => cmd_status(ctx, chat_id).await,
        Command::Pair { number } => cmd_pair(ctx, chat_id, actor_id, username, number).await,
        Command::Sessions => cmd_sessions(ctx, chat_id, actor_id, is_operator).await,
        Command::Clear { target } => cmd_clear(ctx, chat_id, actor_id, is_operator, target).await,
        Command::Send { number, text } => {
            cmd_send(ctx, chat_id, actor_id, is_operator, &number, &text).await
        },
        Command::History { page } => cmd_history(ctx, chat_id, page).await,
        Command::Stats => cmd_stats(ctx, chat_id).await,
        Command::Maintenance { action } => cmd_maintenance(ctx, chat_id, action).await,
        Command::Broadcast { args } => cmd_broadcast(ctx, msg, &args).await,
        Command::SetCooldown { args } => cmd_setcooldown(ctx, chat_id, &args).await,
        Command::Grant { args } => cmd_grant(ctx, chat_id, &args).await,
        Command::Revoke { args } => cmd_revoke(ctx, chat_id, &args).await,
        Command::PremiumList => cmd_premium_list(ctx, chat_id).await,
        Command::Promote { args } => cmd_promote(ctx, chat_id, &args).await,
        Command::Demote { args } => cmd_demote(ctx, chat_id, &args).await,
    }
}

// ── Access helpers ──────────────────────────────────────────────────────────

/// Why a privileged command was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SendDenied {
    /// Not operator, not premium, no connected session of their own.
    Capability,
    /// Cooldown window still running; remaining whole seconds.
    Cooldown(u64),
}

/// Capability check first, cooldown second: an actor without the capability
/// must get the capability denial, and the blocked attempt must not reserve a
/// cooldown slot.
fn check_privileged_access(
    cooldowns: &CooldownRegistry,
    actor_id: i64,
    is_operator: bool,
    is_premium: bool,
    own_connected: bool,
) -> Result<Tier, SendDenied> {
    if !(is_operator || is_premium || own_connected) {
        return Err(SendDenied::Capability);
    }
    let tier = gate::resolve_tier(is_operator, is_premium);
    let remaining = cooldowns.check_and_reserve(actor_id, tier);
    if remaining > 0 {
        return Err(SendDenied::Cooldown(remaining));
    }
    Ok(tier)
}

// ── Command handlers ────────────────────────────────────────────────────────

async fn cmd_start(ctx: &SharedContext, chat_id: ChatId) -> anyhow::Result<()> {
    let text = "Tether gateway.\n\n\
        /pair <number> — link your messenger account\n\
        /sessions — show your session\n\
        /send <number> <text> — send through your session\n\
        /clear — remove your session\n\
        /status — gateway status";
    ctx.bot.send_message(chat_id, text).await?;
    Ok(())
}

async fn cmd_status(ctx: &SharedContext, chat_id: ChatId) -> anyhow::Result<()> {
    let remote = ctx
        .remote
        .as_ref()
        .and_then(|c| c.last_known())
        .unwrap_or_default();
    let local = ctx.maintenance.snapshot();

    let mut text = String::from("Gateway status\n");
    text.push_str(&format!(
        "Local maintenance: {}\n",
        if local.enabled { "ON" } else { "OFF" }
    ));
    text.push_str(&format!(
        "Remote maintenance: {}\n",
        if remote.enabled { "ON" } else { "OFF" }
    ));
    if remote.enabled {
        text.push_str(&format!("Reason: {}\n", remote.reason));
        text.push_str(&format!(
            "Operator bypass: {}\n",
            if remote.allow_operator_bypass { "yes" } else { "no" }
        ));
    }
    text.push_str(&format!(
        "Uptime: {}\n",
        format_uptime(ctx.started_at.elapsed().as_secs())
    ));
    text.push_str(&format!("Known actors: {}\n", ctx.history.len()));
    text.push_str(&format!("Live sessions: {}", ctx.orchestrator.live_count()));

    ctx.bot.send_message(chat_id, text).await?;
    Ok(())
}

async fn cmd_pair(
    ctx: &SharedContext,
    chat_id: ChatId,
    actor_id: i64,
    username: Option<String>,
    number: String,
) -> anyhow::Result<()> {
    let sent = ctx
        .bot
        .send_message(chat_id, format!("Number: {number}\nStatus: initializing..."))
        .await?;
    let target = EditTarget {
        chat_id: chat_id.0,
        message_id: sent.id.0,
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Err(e) = ctx
        .orchestrator
        .connect(actor_id, &number, username, Some(tx))
        .await
    {
        warn!(actor_id, error = %e, "pairing connect failed");
        let _ = ctx
            .sink
            .edit_text(target, &format!("Number: {number}\nStatus: failed to connect"))
            .await;
        return Ok(());
    }

    // Reflect pairing progress on the status message until the lifecycle
    // settles.
    let sink = Arc::clone(&ctx.sink);
    tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            let text = match update {
                PairingUpdate::PairingCode(code) => format!(
                    "Number: {number}\nStatus: pairing\nCode: {}",
                    format_pairing_code(&code)
                ),
                PairingUpdate::PairingFailed(reason) => {
                    format!("Number: {number}\nStatus: pairing failed\n{reason}")
                },
                PairingUpdate::Connected => {
                    format!("Number: {number}\nStatus: connected")
                },
                PairingUpdate::Closed => {
                    format!("Number: {number}\nStatus: connection closed")
                },
            };
            let _ = sink.edit_text(target, &text).await;
        }
    });

    Ok(())
}

async fn cmd_sessions(
    ctx: &SharedContext,
    chat_id: ChatId,
    actor_id: i64,
    is_operator: bool,
) -> anyhow::Result<()> {
    if is_operator {
        let records = ctx.orchestrator.records();
        if records.is_empty() {
            ctx.bot.send_message(chat_id, "No sessions.").await?;
            return Ok(());
        }
        let mut text = String::from("All sessions:\n\n");
        for record in records {
            let who = record
                .username
                .as_ref()
                .map(|u| format!("@{u}"))
                .unwrap_or_else(|| record.actor_id.to_string());
            text.push_str(&format!(
                "{who}\n  number: {}\n  status: {}\n\n",
                record.number, record.status
            ));
        }
        ctx.bot.send_message(chat_id, text.trim_end()).await?;
    } else {
        match ctx.orchestrator.get(actor_id) {
            Some(record) => {
                ctx.bot
                    .send_message(
                        chat_id,
                        format!(
                            "Your session:\n  number: {}\n  status: {}",
                            record.number, record.status
                        ),
                    )
                    .await?;
            },
            None => {
                ctx.bot
                    .send_message(chat_id, "No session yet. Use /pair <number>.")
                    .await?;
            },
        }
    }
    Ok(())
}

async fn cmd_clear(
    ctx: &SharedContext,
    chat_id: ChatId,
    actor_id: i64,
    is_operator: bool,
    target: ClearTarget,
) -> anyhow::Result<()> {
    match target {
        ClearTarget::Own => {
            if ctx.orchestrator.teardown(actor_id).await {
                ctx.bot.send_message(chat_id, "Your session was removed.").await?;
            } else {
                ctx.bot.send_message(chat_id, "You have no session.").await?;
            }
        },
        ClearTarget::All => {
            if !is_operator {
                ctx.bot
                    .send_message(chat_id, "Only operators can clear other sessions.")
                    .await?;
                return Ok(());
            }
            let ids = ctx.orchestrator.actor_ids();
            let mut cleared = 0usize;
            for id in ids {
                if ctx.orchestrator.teardown(id).await {
                    cleared += 1;
                }
            }
            ctx.bot
                .send_message(chat_id, format!("Removed {cleared} sessions."))
                .await?;
        },
        ClearTarget::Id(id) => {
            clear_one(ctx, chat_id, is_operator, id).await?;
        },
        ClearTarget::Username(name) => {
            if !is_operator {
                ctx.bot
                    .send_message(chat_id, "Only operators can clear other sessions.")
                    .await?;
                return Ok(());
            }
            match ctx.orchestrator.find_by_username(&name) {
                Some(id) => clear_one(ctx, chat_id, true, id).await?,
                None => {
                    ctx.bot
                        .send_message(chat_id, format!("No session for @{name}."))
                        .await?;
                },
            }
        },
    }
    Ok(())
}

async fn clear_one(
    ctx: &SharedContext,
    chat_id: ChatId,
    is_operator: bool,
    id: i64,
) -> anyhow::Result<()> {
    if !is_operator {
        ctx.bot
            .send_message(chat_id, "Only operators can clear other sessions.")
            .await?;
        return Ok(());
    }
    if ctx.orchestrator.teardown(id).await {
        ctx.bot
            .send_message(chat_id, format!("Session of {id} was removed."))
            .await?;
    } else {
        ctx.bot
            .send_message(chat_id, format!("No session for {id}."))
            .await?;
    }
    Ok(())
}

async fn cmd_send(
    ctx: &SharedContext,
    chat_id: ChatId,
    actor_id: i64,
    is_operator: bool,
    number: &str,
    text: &str,
) -> anyhow::Result<()> {
    let is_premium = ctx.tiers.is_premium(actor_id, Utc::now());
    let own_connected = ctx
        .orchestrator
        .get(actor_id)
        .is_some_and(|r| r.status == SessionStatus::Connected);

    match check_privileged_access(&ctx.cooldowns, actor_id, is_operator, is_premium, own_connected)
    {
        Err(SendDenied::Capability) => {
            ctx.bot
                .send_message(
                    chat_id,
                    "You don't have access to this command. Pair a session with /pair or ask an admin for premium.",
                )
                .await?;
            return Ok(());
        },
        Err(SendDenied::Cooldown(remaining)) => {
            ctx.bot
                .send_message(
                    chat_id,
                    format!(
                        "Cooldown active. Try again in {}.",
                        cooldown::format_window(remaining)
                    ),
                )
                .await?;
            return Ok(());
        },
        Ok(_) => {},
    }

    let Some(connection) = ctx.orchestrator.connection_for(actor_id, is_operator) else {
        ctx.bot
            .send_message(chat_id, "No live session. Use /pair <number> first.")
            .await?;
        return Ok(());
    };

    let sent = ctx
        .bot
        .send_message(chat_id, format!("Sending to {number}..."))
        .await?;
    let target = EditTarget {
        chat_id: chat_id.0,
        message_id: sent.id.0,
    };

    ctx.progress
        .update(target, 0, &format!("Sending to {number}"))
        .await;
    for percent in [25u8, 50, 75] {
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        ctx.progress
            .update(target, percent, &format!("Sending to {number}"))
            .await;
    }

    match connection.send_text(number, text).await {
        Ok(()) => {
            ctx.progress.update(target, 100, "Delivered").await;
        },
        Err(e) => {
            warn!(actor_id, number, error = %e, "send over session failed");
            ctx.error_log
                .record("/send", format!("to {number}: {e}"))
                .await;
            ctx.progress.update(target, 100, "Failed to deliver").await;
        },
    }
    ctx.progress.forget(target);
    Ok(())
}

async fn cmd_history(ctx: &SharedContext, chat_id: ChatId, page: usize) -> anyhow::Result<()> {
    let (text, markup) = history_page(ctx, page);
    let mut request = ctx.bot.send_message(chat_id, text);
    if let Some(markup) = markup {
        request = request.reply_markup(markup);
    }
    request.await?;
    Ok(())
}

fn history_page(ctx: &SharedContext, page: usize) -> (String, Option<InlineKeyboardMarkup>) {
    let page = page.max(1);
    let (records, total_pages) = ctx.history.page(page, HISTORY_PER_PAGE);
    if records.is_empty() {
        return ("No actors recorded yet.".into(), None);
    }

    let mut text = format!("Actor history (page {page}/{total_pages})\n\n");
    let start = (page - 1) * HISTORY_PER_PAGE;
    for (i, record) in records.iter().enumerate() {
        let who = record
            .username
            .as_ref()
            .map(|u| format!("@{u}"))
            .unwrap_or_else(|| record.actor_id.to_string());
        text.push_str(&format!(
            "{}. {who}\n   id: {}\n   first seen: {}\n   last active: {}\n\n",
            start + i + 1,
            record.actor_id,
            record.first_seen.format("%Y-%m-%d"),
            record.last_active.format("%Y-%m-%d %H:%M"),
        ));
    }

    let mut row = Vec::new();
    if page > 1 {
        row.push(InlineKeyboardButton::callback(
            "⬅ Prev",
            format!("history:{}", page - 1),
        ));
    }
    if page < total_pages {
        row.push(InlineKeyboardButton::callback(
            "Next ➡",
            format!("history:{}", page + 1),
        ));
    }
    let markup = (!row.is_empty()).then(|| InlineKeyboardMarkup::new(vec![row]));
    (text.trim_end().to_string(), markup)
}

/// Handle a callback-button press (history pagination).
pub async fn handle_callback(ctx: &SharedContext, query: CallbackQuery) -> anyhow::Result<()> {
    let actor_id = query.from.id.0 as i64;
    // Answer first to dismiss the loading spinner.
    ctx.bot.answer_callback_query(&query.id).await?;

    if !ctx.config.is_operator(actor_id) {
        return Ok(());
    }
    let Some(data) = query.data.as_deref() else {
        return Ok(());
    };
    let Some(page) = data.strip_prefix("history:").and_then(|p| p.parse().ok()) else {
        debug!(data, "ignoring unknown callback");
        return Ok(());
    };
    let Some(MaybeInaccessibleMessage::Regular(message)) = query.message else {
        return Ok(());
    };

    let (text, markup) = history_page(ctx, page);
    let mut request = ctx.bot.edit_message_text(message.chat.id, message.id, text);
    if let Some(markup) = markup {
        request = request.reply_markup(markup);
    }
    request.await?;
    Ok(())
}

async fn cmd_stats(ctx: &SharedContext, chat_id: ChatId) -> anyhow::Result<()> {
    let now = Utc::now();
    let total = ctx.history.len();
    let active_today = ctx.history.active_on(now.date_naive());
    let premium = ctx.tiers.active_count(now);
    let free = total.saturating_sub(premium);
    let live = ctx.orchestrator.live_count();

    let text = format!(
        "Statistics\n\n\
        Actors\n  total: {total}\n  active today: {active_today}\n  premium: {premium}\n  free: {free}\n\n\
        Sessions\n  live: {live}\n\n\
        Gateway\n  uptime: {}\n  recent errors: {}",
        format_uptime(ctx.started_at.elapsed().as_secs()),
        ctx.error_log.len(),
    );
    ctx.bot.send_message(chat_id, text).await?;
    Ok(())
}

async fn cmd_maintenance(
    ctx: &SharedContext,
    chat_id: ChatId,
    action: Option<bool>,
) -> anyhow::Result<()> {
    let Some(enable) = action else {
        let state = ctx.maintenance.snapshot();
        let mut text = format!(
            "Local maintenance: {}\n",
            if state.enabled { "ON" } else { "OFF" }
        );
        if let Some(since) = state.since {
            text.push_str(&format!("Since: {}\n", since.format("%Y-%m-%d %H:%M UTC")));
        }
        text.push_str("\nUse /maintenance on or /maintenance off.");
        ctx.bot.send_message(chat_id, text).await?;
        return Ok(());
    };

    let changed = if enable {
        ctx.maintenance.enable()
    } else {
        ctx.maintenance.disable()
    };
    if !changed {
        ctx.bot
            .send_message(
                chat_id,
                format!("Maintenance already {}.", if enable { "ON" } else { "OFF" }),
            )
            .await?;
        return Ok(());
    }

    json::save(&ctx.config.maintenance_path(), &ctx.maintenance.snapshot()).await?;
    ctx.bot
        .send_message(
            chat_id,
            format!("Maintenance mode {}.", if enable { "ON" } else { "OFF" }),
        )
        .await?;

    // Let every known actor hear about the toggle.
    let notice = if enable {
        "The gateway is entering maintenance. Please wait until it completes."
    } else {
        "Maintenance is over. The gateway is back online."
    };
    let payload = BroadcastPayload {
        text: notice.into(),
        ..Default::default()
    };
    run_broadcast(ctx, chat_id, &payload).await?;
    Ok(())
}

async fn cmd_broadcast(ctx: &SharedContext, msg: &Message, args: &str) -> anyhow::Result<()> {
    let chat_id = msg.chat.id;
    let (mut text, buttons) = parse_broadcast_args(args);

    // A reply supplies the photo and, when no inline text was given, the
    // message body.
    let mut photo = None;
    if let Some(replied) = msg.reply_to_message() {
        photo = replied
            .photo()
            .and_then(|sizes| sizes.last())
            .map(|p| p.file.id.clone());
        if text.is_empty() {
            if let Some(body) = replied.caption().or_else(|| replied.text()) {
                text = body.to_string();
            }
        }
    }

    let payload = BroadcastPayload {
        text,
        photo,
        buttons,
    };
    if payload.is_empty() {
        ctx.bot
            .send_message(
                chat_id,
                "Broadcast usage:\n\
                /broadcast <text>\n\
                /broadcast <text> | <url> | <label>\n\
                Reply to a message (optionally with photo) and type /broadcast",
            )
            .await?;
        return Ok(());
    }

    let recipients = ctx.history.len();
    let confirm = ctx
        .bot
        .send_message(
            chat_id,
            format!(
                "Confirm broadcast\n\nText: {}\nButtons: {}\nPhoto: {}\nRecipients: {recipients}\n\nReply CONFIRM to proceed, anything else to cancel.",
                truncate(&payload.text, 100),
                payload.buttons.len(),
                if payload.photo.is_some() { "yes" } else { "no" },
            ),
        )
        .reply_markup(ForceReply::new())
        .await?;

    let mut pending = ctx
        .pending_broadcasts
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    pending.insert((chat_id.0, confirm.id.0), payload);
    Ok(())
}

async fn confirm_broadcast(
    ctx: &SharedContext,
    chat_id: ChatId,
    reply_text: Option<&str>,
    payload: BroadcastPayload,
) {
    let confirmed = reply_text
        .map(|t| t.trim().eq_ignore_ascii_case("confirm"))
        .unwrap_or(false);
    if !confirmed {
        ctx.sink
            .send_text_best_effort(chat_id.0, "Broadcast cancelled.")
            .await;
        return;
    }
    if let Err(e) = run_broadcast(ctx, chat_id, &payload).await {
        warn!(error = %e, "broadcast failed to start");
        ctx.error_log.record("/broadcast", format!("{e:#}")).await;
        ctx.sink
            .send_text_best_effort(chat_id.0, "Broadcast failed to start.")
            .await;
    }
}

/// Seed a progress message in the invoking chat and fan the payload out to
/// every known actor.
async fn run_broadcast(
    ctx: &SharedContext,
    chat_id: ChatId,
    payload: &BroadcastPayload,
) -> anyhow::Result<()> {
    let recipients = ctx.history.recipient_ids();
    let seed = ctx
        .bot
        .send_message(
            chat_id,
            format!("Broadcast started. Recipients: {}", recipients.len()),
        )
        .await?;
    let target = EditTarget {
        chat_id: chat_id.0,
        message_id: seed.id.0,
    };

    let report = ctx.broadcast.send(payload, &recipients, Some(target)).await;
    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        total = report.total,
        "broadcast finished"
    );
    ctx.progress.forget(target);
    Ok(())
}

async fn cmd_setcooldown(ctx: &SharedContext, chat_id: ChatId, args: &str) -> anyhow::Result<()> {
    let current = ctx.cooldowns.config();
    if args.is_empty() {
        ctx.bot
            .send_message(
                chat_id,
                format!(
                    "Cooldown windows\n\nFree: {}\nPremium: {}\nOperator: {}\n\n\
                    Change with: /setcooldown free:5m premium:1m operator:0\n\
                    Units: s, m, h, d (bare number = seconds).",
                    cooldown::format_window(current.free),
                    cooldown::format_window(current.premium),
                    cooldown::format_window(current.operator),
                ),
            )
            .await?;
        return Ok(());
    }

    let update = cooldown::parse_window_update(args);
    if update.is_empty() {
        ctx.bot
            .send_message(
                chat_id,
                "No valid fields. Use: /setcooldown free:5m premium:1m operator:0",
            )
            .await?;
        return Ok(());
    }

    let mut config = current;
    if let Some(secs) = update.free {
        config.free = secs;
    }
    if let Some(secs) = update.premium {
        config.premium = secs;
    }
    if let Some(secs) = update.operator {
        config.operator = secs;
    }
    ctx.cooldowns.set_config(config);
    json::save(&ctx.config.cooldown_path(), &config).await?;

    let mut text = format!(
        "Cooldown updated.\n\nFree: {}\nPremium: {}\nOperator: {}",
        cooldown::format_window(config.free),
        cooldown::format_window(config.premium),
        cooldown::format_window(config.operator),
    );
    if !update.rejected.is_empty() {
        text.push_str(&format!("\n\nIgnored invalid fields: {}", update.rejected.join(", ")));
    }
    ctx.bot.send_message(chat_id, text).await?;
    Ok(())
}

async fn cmd_grant(ctx: &SharedContext, chat_id: ChatId, args: &str) -> anyhow::Result<()> {
    let mut parts = args.split_whitespace();
    let (Some(id), Some(duration)) = (parts.next(), parts.next()) else {
        ctx.bot
            .send_message(chat_id, "Usage: /grant <actor id> <duration>, e.g. /grant 123456 30d")
            .await?;
        return Ok(());
    };
    let Ok(actor_id) = id.parse::<i64>() else {
        ctx.bot.send_message(chat_id, "Actor id must be a number.").await?;
        return Ok(());
    };
    let Some(secs) = cooldown::parse_duration_secs(duration) else {
        ctx.bot
            .send_message(chat_id, "Invalid duration. Use s, m, h or d, e.g. 30d.")
            .await?;
        return Ok(());
    };

    let expires_at = Utc::now() + chrono::Duration::seconds(secs as i64);
    let extended = ctx.tiers.grant(actor_id, expires_at).await;
    info!(actor_id, %expires_at, extended, "premium granted");
    ctx.bot
        .send_message(
            chat_id,
            format!(
                "{} premium for {actor_id} until {}.",
                if extended { "Extended" } else { "Granted" },
                expires_at.format("%Y-%m-%d %H:%M UTC")
            ),
        )
        .await?;
    Ok(())
}

async fn cmd_revoke(ctx: &SharedContext, chat_id: ChatId, args: &str) -> anyhow::Result<()> {
    let Ok(actor_id) = args.trim().parse::<i64>() else {
        ctx.bot
            .send_message(chat_id, "Usage: /revoke <actor id>")
            .await?;
        return Ok(());
    };
    if ctx.tiers.revoke(actor_id).await {
        info!(actor_id, "premium revoked");
        ctx.bot
            .send_message(chat_id, format!("Premium removed for {actor_id}."))
            .await?;
    } else {
        ctx.bot
            .send_message(chat_id, format!("{actor_id} is not on the premium list."))
            .await?;
    }
    Ok(())
}

async fn cmd_premium_list(ctx: &SharedContext, chat_id: ChatId) -> anyhow::Result<()> {
    let entries = ctx.tiers.list();
    if entries.is_empty() {
        ctx.bot.send_message(chat_id, "No premium actors.").await?;
        return Ok(());
    }
    let now = Utc::now();
    let mut text = String::from("Premium actors:\n\n");
    for (i, entry) in entries.iter().enumerate() {
        let state = if entry.expires_at > now {
            format!("until {}", entry.expires_at.format("%Y-%m-%d %H:%M UTC"))
        } else {
            "expired".to_string()
        };
        text.push_str(&format!("{}. {} — {state}\n", i + 1, entry.actor_id));
    }
    ctx.bot.send_message(chat_id, text.trim_end()).await?;
    Ok(())
}

async fn cmd_promote(ctx: &SharedContext, chat_id: ChatId, args: &str) -> anyhow::Result<()> {
    let Ok(actor_id) = args.trim().parse::<i64>() else {
        ctx.bot
            .send_message(chat_id, "Usage: /promote <actor id>")
            .await?;
        return Ok(());
    };
    if ctx.admins.add(actor_id).await {
        info!(actor_id, "admin added");
        ctx.bot
            .send_message(chat_id, format!("{actor_id} is now an admin."))
            .await?;
    } else {
        ctx.bot
            .send_message(chat_id, format!("{actor_id} is already an admin."))
            .await?;
    }
    Ok(())
}

async fn cmd_demote(ctx: &SharedContext, chat_id: ChatId, args: &str) -> anyhow::Result<()> {
    let Ok(actor_id) = args.trim().parse::<i64>() else {
        ctx.bot
            .send_message(chat_id, "Usage: /demote <actor id>")
            .await?;
        return Ok(());
    };
    if ctx.admins.remove(actor_id).await {
        info!(actor_id, "admin removed");
        ctx.bot
            .send_message(chat_id, format!("{actor_id} is no longer an admin."))
            .await?;
    } else {
        ctx.bot
            .send_message(chat_id, format!("{actor_id} is not an admin."))
            .await?;
    }
    Ok(())
}

// ── Formatting helpers ──────────────────────────────────────────────────────

fn parse_broadcast_args(args: &str) -> (String, Vec<UrlButton>) {
    let mut parts = args.split('|').map(str::trim);
    let text = parts.next().unwrap_or("").to_string();
    let rest: Vec<&str> = parts.collect();

    let mut buttons = Vec::new();
    for pair in rest.chunks(2) {
        if buttons.len() >= MAX_BUTTONS {
            break;
        }
        if let [url, label] = pair
            && !label.is_empty()
            && url.parse::<reqwest::Url>().is_ok()
        {
            buttons.push(UrlButton {
                url: (*url).to_string(),
                label: (*label).to_string(),
            });
        }
    }
    (text, buttons)
}

/// Group a pairing code into dashed blocks of four.
fn format_pairing_code(code: &str) -> String {
    code.chars()
        .collect::<Vec<_>>()
        .chunks(4)
        .map(|c| c.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}

fn format_uptime(secs: u64) -> String {
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    format!("{days}d {hours}h {minutes}m {seconds}s")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{head}...")
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use {tether_policy::CooldownConfig, super::*};

    fn registry() -> CooldownRegistry {
        CooldownRegistry::new(CooldownConfig {
            free: 300,
            premium: 60,
            operator: 0,
        })
    }

    #[test]
    fn no_tier_no_session_gets_capability_denial_not_cooldown() {
        let cooldowns = registry();
        // Even when a cooldown would otherwise apply, the capability check
        // comes first.
        assert_eq!(
            check_privileged_access(&cooldowns, 1, false, false, false),
            Err(SendDenied::Capability)
        );
        // The denied attempt must not have reserved a slot: once the actor
        // gains a session, the first use passes immediately.
        assert_eq!(
            check_privileged_access(&cooldowns, 1, false, false, true),
            Ok(Tier::Free)
        );
    }

    #[test]
    fn cooldown_denial_reports_remaining() {
        let cooldowns = registry();
        assert!(check_privileged_access(&cooldowns, 1, false, true, false).is_ok());
        match check_privileged_access(&cooldowns, 1, false, true, false) {
            Err(SendDenied::Cooldown(remaining)) => {
                assert!(remaining > 0 && remaining <= 60);
            },
            other => panic!("expected cooldown denial, got {other:?}"),
        }
    }

    #[test]
    fn operator_never_hits_cooldown_by_default() {
        let cooldowns = registry();
        for _ in 0..3 {
            assert_eq!(
                check_privileged_access(&cooldowns, 9, true, false, false),
                Ok(Tier::Operator)
            );
        }
    }

    #[test]
    fn broadcast_args_parse_buttons_in_pairs() {
        let (text, buttons) = parse_broadcast_args(
            "Big update | https://example.com/a | Site A | https://example.com/b | Site B",
        );
        assert_eq!(text, "Big update");
        assert_eq!(buttons.len(), 2);
        assert_eq!(buttons[0].label, "Site A");
        assert_eq!(buttons[1].url, "https://example.com/b");
    }

    #[test]
    fn broadcast_args_skip_invalid_urls_and_cap_buttons() {
        let (_, buttons) = parse_broadcast_args("hi | not-a-url | X | https://ok.example | Y");
        assert_eq!(buttons.len(), 1);
        assert_eq!(buttons[0].label, "Y");

        let many = "hi | https://a.example | 1 | https://b.example | 2 | https://c.example | 3 \
                    | https://d.example | 4 | https://e.example | 5";
        let (_, buttons) = parse_broadcast_args(many);
        assert_eq!(buttons.len(), MAX_BUTTONS);
    }

    #[test]
    fn broadcast_args_text_only() {
        let (text, buttons) = parse_broadcast_args("hello world");
        assert_eq!(text, "hello world");
        assert!(buttons.is_empty());
    }

    #[test]
    fn pairing_code_grouping() {
        assert_eq!(format_pairing_code("ABCD1234"), "ABCD-1234");
        assert_eq!(format_pairing_code("ABCDE"), "ABCD-E");
        assert_eq!(format_pairing_code(""), "");
    }

    #[test]
    fn uptime_formatting() {
        assert_eq!(format_uptime(0), "0d 0h 0m 0s");
        assert_eq!(format_uptime(90061), "1d 1h 1m 1s");
    }

    #[test]
    fn truncation_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("0123456789abc", 10), "0123456789...");
    }
}
