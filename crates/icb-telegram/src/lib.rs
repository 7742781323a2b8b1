//! Telegram adapter (teloxide).
//!
//! This crate implements the `icb-core` MessagingPort over Telegram Bot API.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{ButtonRequest, KeyboardButton, KeyboardMarkup, ParseMode, WebAppInfo},
};

use tokio::time::sleep;

pub mod handlers;
pub mod router;

use icb_core::{
    domain::{ChatId, UserId},
    errors::Error,
    messaging::{port::MessagingPort, types::WebAppButton},
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

/// Persistent reply keyboard holding a single mini-app button.
fn web_app_keyboard(button: &WebAppButton) -> Result<KeyboardMarkup> {
    let url = reqwest::Url::parse(&button.url)
        .map_err(|e| Error::Config(format!("invalid web app url {:?}: {e}", button.url)))?;
    let key = KeyboardButton::new(button.label.clone()).request(ButtonRequest::WebApp(WebAppInfo { url }));
    Ok(KeyboardMarkup::new(vec![vec![key]]).resize_keyboard(true))
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .send_message(Self::tg_chat(chat_id), html.to_string())
                .parse_mode(ParseMode::Html)
        })
        .await?;
        Ok(())
    }

    async fn send_html_with_web_app(
        &self,
        chat_id: ChatId,
        html: &str,
        button: &WebAppButton,
    ) -> Result<()> {
        let markup = web_app_keyboard(button)?;
        self.with_retry(|| {
            self.bot
                .send_message(Self::tg_chat(chat_id), html.to_string())
                .parse_mode(ParseMode::Html)
                .reply_markup(markup.clone())
        })
        .await?;
        Ok(())
    }

    async fn username_of(&self, user_id: UserId) -> Result<Option<String>> {
        let chat = self
            .with_retry(|| self.bot.get_chat(teloxide::types::ChatId(user_id.0)))
            .await?;
        Ok(chat.username().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn web_app_keyboard_requires_a_valid_url() {
        let ok = WebAppButton {
            label: "Open".to_string(),
            url: "https://example.org/app".to_string(),
        };
        let markup = web_app_keyboard(&ok).unwrap();
        assert_eq!(markup.keyboard.len(), 1);
        assert_eq!(markup.keyboard[0][0].text, "Open");

        let bad = WebAppButton {
            label: "Open".to_string(),
            url: "not a url".to_string(),
        };
        assert!(matches!(web_app_keyboard(&bad), Err(Error::Config(_))));
    }
}
