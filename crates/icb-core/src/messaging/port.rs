use async_trait::async_trait;

use crate::{
    domain::{ChatId, UserId},
    messaging::types::WebAppButton,
    Result,
};

/// Outbound side of the Messaging Gateway.
///
/// Replies are Telegram-style HTML; rendering beyond that is the adapter's
/// concern.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<()>;

    /// Send a message with a persistent keyboard button that opens the mini-app.
    async fn send_html_with_web_app(
        &self,
        chat_id: ChatId,
        html: &str,
        button: &WebAppButton,
    ) -> Result<()>;

    /// Public handle (`@username`) of a user, when the gateway can resolve it.
    async fn username_of(&self, user_id: UserId) -> Result<Option<String>>;
}
