//! Payloads sent by the embedded mini-application.

use serde::Deserialize;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WebAppRequest {
    #[serde(alias = "check_imei")]
    CheckIdentifier {
        #[serde(default, alias = "imei")]
        identifier: Option<String>,
    },
    RequestBalance,
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("unknown action or missing data: {0}")]
    UnknownAction(serde_json::Error),
}

pub fn parse_payload(raw: &str) -> std::result::Result<WebAppRequest, PayloadError> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(PayloadError::InvalidJson)?;
    serde_json::from_value(value).map_err(PayloadError::UnknownAction)
}
