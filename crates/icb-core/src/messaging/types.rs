use crate::domain::{ChatId, SessionKey, UserId};

/// Inbound update model, independent of the Telegram adapter.
#[derive(Clone, Debug)]
pub enum IncomingUpdate {
    Command(Command),
    Text(TextMessage),
    WebApp(WebAppData),
}

impl IncomingUpdate {
    pub fn chat_id(&self) -> ChatId {
        match self {
            IncomingUpdate::Command(c) => c.chat_id,
            IncomingUpdate::Text(t) => t.chat_id,
            IncomingUpdate::WebApp(w) => w.chat_id,
        }
    }

    pub fn user_id(&self) -> UserId {
        match self {
            IncomingUpdate::Command(c) => c.user_id,
            IncomingUpdate::Text(t) => t.user_id,
            IncomingUpdate::WebApp(w) => w.user_id,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Command {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub username: Option<String>,
    pub name: String,
    pub args: Vec<String>,
}

impl Command {
    /// Parse `/cmd@botname arg1 arg2`. Returns `None` for non-command text.
    pub fn parse(chat_id: ChatId, user_id: UserId, username: Option<String>, text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;

        let mut parts = rest.split_whitespace();
        let first = parts.next().unwrap_or("");
        let name = first.split('@').next().unwrap_or("").to_lowercase();
        if name.is_empty() {
            return None;
        }

        Some(Self {
            chat_id,
            user_id,
            username,
            name,
            args: parts.map(str::to_string).collect(),
        })
    }

    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(self.user_id, self.chat_id)
    }
}

#[derive(Clone, Debug)]
pub struct TextMessage {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub username: Option<String>,
    pub text: String,
}

impl TextMessage {
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(self.user_id, self.chat_id)
    }
}

/// Raw JSON string posted by the mini-app.
#[derive(Clone, Debug)]
pub struct WebAppData {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub data: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebAppButton {
    pub label: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Option<Command> {
        Command::parse(ChatId(1), UserId(1), None, text)
    }

    #[test]
    fn parses_name_and_args() {
        let c = parse("/admin_add_credits 123456789 10").unwrap();
        assert_eq!(c.name, "admin_add_credits");
        assert_eq!(c.args, vec!["123456789", "10"]);
    }

    #[test]
    fn strips_bot_mention_and_lowercases() {
        let c = parse("/Balance@imei_checker_bot").unwrap();
        assert_eq!(c.name, "balance");
        assert!(c.args.is_empty());
    }

    #[test]
    fn plain_text_is_not_a_command() {
        assert!(parse("35699900123456").is_none());
        assert!(parse("/").is_none());
        assert!(parse("/@bot").is_none());
    }
}
