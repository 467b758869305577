//! Teloxide-backed transport sinks.
//!
//! Maps the Bot API's error taxonomy onto the gateway's benign/fatal split:
//! "message is not modified" and "message to edit not found" are expected
//! outcomes of throttled edits, everything else is a loggable error.

use {
    anyhow::Result,
    async_trait::async_trait,
    teloxide::{
        ApiError, RequestError,
        payloads::{SendMessageSetters, SendPhotoSetters},
        prelude::*,
        types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId},
    },
    tracing::warn,
};

use crate::{
    broadcast::{BroadcastPayload, BroadcastSink, UrlButton},
    progress::{EditOutcome, EditSink, EditTarget},
};

/// Shared sink over a single bot.
pub struct TelegramSink {
    bot: Bot,
}

impl TelegramSink {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Send a plain message, logging (not propagating) failures. Used for
    /// policy-block notices and other best-effort replies.
    pub async fn send_text_best_effort(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.bot.send_message(ChatId(chat_id), text).await {
            warn!(chat_id, error = %e, "failed to send message");
        }
    }
}

#[async_trait]
impl EditSink for TelegramSink {
    async fn edit_text(&self, target: EditTarget, text: &str) -> Result<EditOutcome> {
        let result = self
            .bot
            .edit_message_text(ChatId(target.chat_id), MessageId(target.message_id), text)
            .await;
        match result {
            Ok(_) => Ok(EditOutcome::Applied),
            Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(EditOutcome::Unchanged),
            Err(RequestError::Api(ApiError::MessageToEditNotFound)) => Ok(EditOutcome::Missing),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl BroadcastSink for TelegramSink {
    async fn deliver(&self, recipient: i64, payload: &BroadcastPayload) -> Result<()> {
        let chat_id = ChatId(recipient);
        let markup = buttons_markup(&payload.buttons)?;

        if let Some(photo) = &payload.photo {
            let input = photo_input(photo)?;
            let mut request = self.bot.send_photo(chat_id, input);
            if !payload.text.is_empty() {
                request = request.caption(payload.text.as_str());
            }
            if let Some(markup) = markup {
                request = request.reply_markup(markup);
            }
            request.await?;
        } else {
            let mut request = self.bot.send_message(chat_id, payload.text.as_str());
            if let Some(markup) = markup {
                request = request.reply_markup(markup);
            }
            request.await?;
        }
        Ok(())
    }
}

fn photo_input(photo: &str) -> Result<InputFile> {
    if photo.starts_with("http://") || photo.starts_with("https://") {
        Ok(InputFile::url(photo.parse()?))
    } else {
        // A platform file id (e.g. a photo the operator replied to).
        Ok(InputFile::file_id(photo))
    }
}

fn buttons_markup(buttons: &[UrlButton]) -> Result<Option<InlineKeyboardMarkup>> {
    if buttons.is_empty() {
        return Ok(None);
    }
    let row = buttons
        .iter()
        .map(|b| Ok(InlineKeyboardButton::url(b.label.clone(), b.url.parse()?)))
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(InlineKeyboardMarkup::new(vec![row])))
}
