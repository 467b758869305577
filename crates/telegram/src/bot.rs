//! Bot API polling loop.
//!
//! Manual `get_updates` long polling with offset tracking. Conflict errors
//! (another process polling the same token) stop the loop; transient errors
//! back off and retry.

use std::sync::Arc;

use {
    secrecy::ExposeSecret,
    teloxide::{
        ApiError, RequestError,
        prelude::*,
        types::{AllowedUpdate, BotCommand, UpdateKind},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    config::TetherConfig,
    handlers::{self, SharedContext},
};

/// Build the bot for `config`, with a client timeout above the long-polling
/// timeout (30s) so the HTTP client does not abort the request before the
/// platform responds.
pub fn build_bot(config: &TetherConfig) -> anyhow::Result<Bot> {
    let client = teloxide::net::default_reqwest_settings()
        .timeout(std::time::Duration::from_secs(45))
        .build()?;
    Ok(Bot::with_client(config.token.expose_secret(), client))
}

/// Start polling for updates.
///
/// Spawns a background task that processes updates until the returned
/// `CancellationToken` is cancelled.
pub async fn start_polling(ctx: SharedContext) -> anyhow::Result<CancellationToken> {
    let bot = ctx.bot.clone();

    // Verify credentials and get the bot username.
    let me = bot.get_me().await?;

    // Delete any existing webhook so long polling works.
    bot.delete_webhook().send().await?;

    let commands = vec![
        BotCommand::new("start", "Show the command menu"),
        BotCommand::new("status", "Gateway status"),
        BotCommand::new("pair", "Link your messenger account"),
        BotCommand::new("sessions", "Show your session"),
        BotCommand::new("send", "Send through your session"),
        BotCommand::new("clear", "Remove your session"),
    ];
    if let Err(e) = bot.set_my_commands(commands).await {
        warn!("failed to register bot commands: {e}");
    }

    info!(username = ?me.username, "bot connected (webhook cleared)");

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let ctx = Arc::clone(&ctx);

    tokio::spawn(async move {
        info!("starting polling loop");
        let mut offset: i32 = 0;

        loop {
            if cancel_clone.is_cancelled() {
                info!("polling stopped");
                break;
            }

            let result = bot
                .get_updates()
                .offset(offset)
                .timeout(30)
                .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::CallbackQuery])
                .await;

            match result {
                Ok(updates) => {
                    debug!(count = updates.len(), "got updates");
                    for update in updates {
                        offset = update.id.as_offset();
                        match update.kind {
                            UpdateKind::Message(msg) => {
                                if let Err(e) = handlers::handle_message(&ctx, msg).await {
                                    error!(error = %e, "error handling message");
                                }
                            },
                            UpdateKind::CallbackQuery(query) => {
                                if let Err(e) = handlers::handle_callback(&ctx, query).await {
                                    error!(error = %e, "error handling callback query");
                                }
                            },
                            other => {
                                debug!("ignoring update kind: {other:?}");
                            },
                        }
                    }
                },
                Err(e) => {
                    // Another instance is polling with the same token; this
                    // one has to stand down.
                    let is_conflict =
                        matches!(&e, RequestError::Api(ApiError::TerminatedByOtherGetUpdates));
                    if is_conflict {
                        error!("another bot instance is already running with this token, stopping");
                        cancel_clone.cancel();
                        break;
                    }

                    warn!(error = %e, "getUpdates failed");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                },
            }
        }
    });

    Ok(cancel)
}
