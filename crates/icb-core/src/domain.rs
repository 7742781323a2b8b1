use std::fmt;

/// Telegram user id (numeric). Also the ledger identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<UserId> for ChatId {
    /// Private chats share the user's id.
    fn from(u: UserId) -> Self {
        ChatId(u.0)
    }
}

/// Conversation scope: one session per (user, chat) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub user_id: UserId,
    pub chat_id: ChatId,
}

impl SessionKey {
    pub fn new(user_id: UserId, chat_id: ChatId) -> Self {
        Self { user_id, chat_id }
    }
}

pub const IDENTIFIER_MIN_DIGITS: usize = 14;
pub const IDENTIFIER_MAX_DIGITS: usize = 16;

/// A device identifier (IMEI / serial) in normalized form: 14-16 ASCII digits.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Identifier(String);

impl Identifier {
    /// Strip every non-digit character, then require 14-16 digits.
    pub fn parse(raw: &str) -> Option<Self> {
        let digits = normalize_digits(raw);
        if (IDENTIFIER_MIN_DIGITS..=IDENTIFIER_MAX_DIGITS).contains(&digits.len()) {
            Some(Self(digits))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn normalize_digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_separators_before_length_check() {
        let id = Identifier::parse("123-456 789012345").unwrap();
        assert_eq!(id.as_str(), "123456789012345");

        let id = Identifier::parse("35 699900-123456").unwrap();
        assert_eq!(id.as_str(), "35699900123456");
    }

    #[test]
    fn rejects_wrong_digit_counts() {
        assert!(Identifier::parse("1234567890123").is_none()); // 13
        assert!(Identifier::parse("12345678901234567").is_none()); // 17
        assert!(Identifier::parse("").is_none());
        assert!(Identifier::parse("abc-def").is_none());
    }

    #[test]
    fn accepts_boundaries() {
        assert!(Identifier::parse(&"1".repeat(14)).is_some());
        assert!(Identifier::parse(&"9".repeat(16)).is_some());
    }

    #[test]
    fn letters_do_not_count_towards_length() {
        // 14 digits mixed with letters still normalizes to a valid identifier.
        let id = Identifier::parse("IMEI: 35a6999b00123456").unwrap();
        assert_eq!(id.as_str(), "35699900123456");
    }
}
