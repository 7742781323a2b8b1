//! Append-only audit trail of ledger mutations and check outcomes.
//!
//! The ledger itself is a single counter per identity; this file is the only
//! record of how a balance got where it is.

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;

use crate::{domain::UserId, errors::Error, formatting::truncate_text, Result};

const AUDIT_MAX_TEXT: usize = 500;

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,
    pub user_id: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    fn new(event: &str, user_id: UserId) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event: event.to_string(),
            user_id: user_id.0,
            amount: None,
            balance: None,
            identifier: None,
            actor: None,
            reason: None,
        }
    }

    pub fn account_created(user_id: UserId) -> Self {
        Self {
            balance: Some(0),
            ..Self::new("account_created", user_id)
        }
    }

    pub fn debit(user_id: UserId, amount: i64, identifier: &str) -> Self {
        Self {
            amount: Some(amount),
            identifier: Some(identifier.to_string()),
            ..Self::new("debit", user_id)
        }
    }

    pub fn refund(user_id: UserId, amount: i64, balance: i64, identifier: &str, reason: &str) -> Self {
        Self {
            amount: Some(amount),
            balance: Some(balance),
            identifier: Some(identifier.to_string()),
            reason: Some(reason.to_string()),
            ..Self::new("refund", user_id)
        }
    }

    pub fn check_succeeded(user_id: UserId, balance: i64, identifier: &str) -> Self {
        Self {
            balance: Some(balance),
            identifier: Some(identifier.to_string()),
            ..Self::new("check_succeeded", user_id)
        }
    }

    pub fn admin_credit(actor: UserId, user_id: UserId, amount: i64, balance: i64) -> Self {
        Self {
            amount: Some(amount),
            balance: Some(balance),
            actor: Some(actor.0),
            ..Self::new("admin_credit", user_id)
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        if let Some(s) = &event.reason {
            event.reason = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        // Plain text format for readability.
        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            match v {
                serde_json::Value::String(s) => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }

    /// Write, logging instead of failing. Audit problems never fail a request.
    pub fn record(&self, event: AuditEvent) {
        let name = event.event.clone();
        if let Err(e) = self.write(event) {
            tracing::warn!(event = %name, error = %e, "failed to write audit event");
        }
    }
}
