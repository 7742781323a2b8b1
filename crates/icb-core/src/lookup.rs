//! Lookup Service port and its normalized result model.

use async_trait::async_trait;
use serde_json::Value;

use crate::{domain::Identifier, errors::Error, Result};

pub const INVALID_DATA_REASON: &str =
    "API returned invalid or empty data. Please check the lookup service account status or try again.";
pub const UNKNOWN_ERROR_REASON: &str = "An unknown error occurred with the lookup service.";

/// Detail fields of a successful lookup, in the order the service sent them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LookupDetails {
    pub fields: Vec<(String, String)>,
    pub status: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection error, timeout or non-2xx HTTP status.
    Transport,
    /// Body did not parse as the expected structured format.
    Format,
    /// The service answered with a status other than `success`.
    Business,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl LookupFailure {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self {
            kind: FailureKind::Transport,
            reason: format!("network error: {err}"),
        }
    }

    pub fn format() -> Self {
        Self {
            kind: FailureKind::Format,
            reason: INVALID_DATA_REASON.to_string(),
        }
    }

    pub fn business(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Business,
            reason: reason.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LookupResult {
    Success(LookupDetails),
    Failure(LookupFailure),
}

impl LookupResult {
    pub fn is_success(&self) -> bool {
        matches!(self, LookupResult::Success(_))
    }
}

/// Hexagonal port for the external device-information service.
///
/// Implementations perform exactly one round trip per call and never retry.
/// Every failure mode is folded into [`LookupResult::Failure`].
#[async_trait]
pub trait LookupClient: Send + Sync {
    async fn check(&self, identifier: &Identifier, service_code: &str) -> LookupResult;

    /// Remaining funds on the service account itself, if the service exposes them.
    async fn account_balance(&self) -> Result<f64> {
        Err(Error::External(
            "lookup service does not report an account balance".to_string(),
        ))
    }
}

/// Map a structured response body into a [`LookupResult`].
///
/// `status == "success"` is a success; `result` may be an object (detail
/// fields) or a string. Any other status is a business failure whose reason
/// is the service's own `result` message.
pub fn interpret_response(body: &str) -> LookupResult {
    let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(body) else {
        return LookupResult::Failure(LookupFailure::format());
    };

    let status = obj.get("status").and_then(Value::as_str);
    if status != Some("success") {
        let reason = obj
            .get("result")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_ERROR_REASON);
        return LookupResult::Failure(LookupFailure::business(reason));
    }

    let mut fields = Vec::new();
    match obj.get("result") {
        Some(Value::Object(map)) => {
            for (k, v) in map {
                fields.push((k.clone(), value_to_display(v)));
            }
        }
        Some(Value::String(s)) => fields.push(("result".to_string(), s.clone())),
        Some(other) if !other.is_null() => fields.push(("result".to_string(), value_to_display(other))),
        _ => {
            if let Some(imei) = obj.get("imei") {
                fields.push(("IMEI".to_string(), value_to_display(imei)));
            }
        }
    }

    LookupResult::Success(LookupDetails {
        fields,
        status: status.map(str::to_string),
    })
}

fn value_to_display(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
