//! Conversation Controller: collects an identifier over multiple turns.
//!
//! Sessions are explicit values keyed by (user, chat) and owned by the
//! controller. A session only exists while `AwaitingIdentifier`; `Idle` is the
//! absence of a session.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use crate::{
    domain::{Identifier, SessionKey},
    workflow::{CheckWorkflow, Rejection},
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    AwaitingIdentifier,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BeginOutcome {
    /// Session opened (or replaced); prompt the user for an identifier.
    AwaitingIdentifier,
    /// Pre-check failed; no session exists.
    Rejected(Rejection),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TextOutcome {
    /// No session for this (user, chat); the text is not ours.
    NoSession,
    /// Input did not validate; the session stays open. Re-prompt.
    Reprompt,
    /// Input validated; the session is closed and the check should run.
    Accepted(Identifier),
}

pub struct ConversationController {
    workflow: Arc<CheckWorkflow>,
    sessions: Mutex<HashMap<SessionKey, ConversationState>>,
}

impl ConversationController {
    pub fn new(workflow: Arc<CheckWorkflow>) -> Self {
        Self {
            workflow,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn state(&self, key: SessionKey) -> ConversationState {
        self.sessions
            .lock()
            .await
            .get(&key)
            .copied()
            .unwrap_or(ConversationState::Idle)
    }

    /// Entry point. Opens a session only if the balance covers one check;
    /// any existing session for `key` is replaced or dropped.
    pub async fn begin(&self, key: SessionKey) -> Result<BeginOutcome> {
        let precheck = self.workflow.precheck(key.user_id).await;

        let mut sessions = self.sessions.lock().await;
        match precheck {
            Ok(None) => {
                sessions.insert(key, ConversationState::AwaitingIdentifier);
                Ok(BeginOutcome::AwaitingIdentifier)
            }
            Ok(Some(rejection)) => {
                sessions.remove(&key);
                Ok(BeginOutcome::Rejected(rejection))
            }
            Err(e) => {
                sessions.remove(&key);
                Err(e)
            }
        }
    }

    /// Returns whether a session was open.
    pub async fn cancel(&self, key: SessionKey) -> bool {
        self.sessions.lock().await.remove(&key).is_some()
    }

    /// Feed free text to an open session.
    pub async fn handle_text(&self, key: SessionKey, text: &str) -> TextOutcome {
        let mut sessions = self.sessions.lock().await;
        if !matches!(sessions.get(&key), Some(ConversationState::AwaitingIdentifier)) {
            return TextOutcome::NoSession;
        }

        match CheckWorkflow::validate(text.trim()) {
            Ok(identifier) => {
                // Close before the check runs so a second message cannot start another one.
                sessions.remove(&key);
                TextOutcome::Accepted(identifier)
            }
            Err(_) => TextOutcome::Reprompt,
        }
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
