//! Telegram update handlers.
//!
//! Translates a teloxide `Message` into the core `IncomingUpdate` model and
//! hands it to the application service. All replies go through the
//! `MessagingPort`, never through `bot` directly.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{Message, MessageKind},
};

use icb_core::{
    domain::{ChatId, UserId},
    messaging::types::{Command, IncomingUpdate, TextMessage, WebAppData},
};

use crate::router::AppState;

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };

    let update = to_incoming(
        ChatId(msg.chat.id.0),
        UserId(user.id.0 as i64),
        user.username.clone(),
        msg.text(),
        match &msg.kind {
            MessageKind::WebAppData(d) => Some(d.web_app_data.data.as_str()),
            _ => None,
        },
    );

    match update {
        Some(update) => state.app.handle(update).await,
        None => tracing::debug!(chat_id = msg.chat.id.0, "ignoring unsupported message"),
    }
    Ok(())
}

/// Mini-app data wins over text; text starting with `/` is a command.
fn to_incoming(
    chat_id: ChatId,
    user_id: UserId,
    username: Option<String>,
    text: Option<&str>,
    web_app_data: Option<&str>,
) -> Option<IncomingUpdate> {
    if let Some(data) = web_app_data {
        return Some(IncomingUpdate::WebApp(WebAppData {
            chat_id,
            user_id,
            data: data.to_string(),
        }));
    }

    let text = text?;
    if text.trim_start().starts_with('/') {
        return Command::parse(chat_id, user_id, username, text).map(IncomingUpdate::Command);
    }

    Some(IncomingUpdate::Text(TextMessage {
        chat_id,
        user_id,
        username,
        text: text.to_string(),
    }))
}
