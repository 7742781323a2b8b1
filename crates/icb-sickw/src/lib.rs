//! SICKW adapter (device lookup).
//!
//! One GET per check against the service's `api.php`; the response body is
//! interpreted by [`icb_core::lookup::interpret_response`].

use std::time::Duration;

use async_trait::async_trait;
use icb_core::{
    domain::Identifier,
    errors::Error,
    lookup::{interpret_response, LookupClient, LookupFailure, LookupResult},
    Result,
};

const BALANCE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct SickwClient {
    api_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl SickwClient {
    /// `timeout` bounds a single check request end to end.
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("sickw client build error: {e}")))?;
        Ok(Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            http,
        })
    }

    fn check_params<'a>(&'a self, identifier: &'a Identifier, service_code: &'a str) -> [(&'static str, &'a str); 4] {
        [
            ("format", "BETA"),
            ("key", self.api_key.as_str()),
            ("imei", identifier.as_str()),
            ("service", service_code),
        ]
    }
}

#[async_trait]
impl LookupClient for SickwClient {
    async fn check(&self, identifier: &Identifier, service_code: &str) -> LookupResult {
        let resp = match self
            .http
            .get(&self.api_url)
            .query(&self.check_params(identifier, service_code))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(identifier = %identifier, error = %e, "sickw request failed");
                return LookupResult::Failure(LookupFailure::transport(e));
            }
        };

        let status = resp.status();
        if !status.is_success() {
            tracing::error!(identifier = %identifier, %status, "sickw returned non-success status");
            return LookupResult::Failure(LookupFailure::transport(format!("HTTP {status}")));
        }

        let body = match resp.text().await {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(identifier = %identifier, error = %e, "sickw body read failed");
                return LookupResult::Failure(LookupFailure::transport(e));
            }
        };
        tracing::debug!(identifier = %identifier, %status, body = %body, "sickw raw response");

        let result = interpret_response(&body);
        if let LookupResult::Failure(f) = &result {
            tracing::warn!(identifier = %identifier, kind = ?f.kind, reason = %f.reason, "sickw check unsuccessful");
        }
        result
    }

    async fn account_balance(&self) -> Result<f64> {
        let resp = self
            .http
            .get(&self.api_url)
            .query(&[("action", "balance"), ("key", self.api_key.as_str())])
            .timeout(BALANCE_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::External(format!("sickw request error: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::External(format!(
                "sickw balance failed: {}",
                resp.status()
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| Error::External(format!("sickw body error: {e}")))?;
        parse_balance(&body)
    }
}

fn parse_balance(body: &str) -> Result<f64> {
    body.trim().parse::<f64>().map_err(|_| {
        Error::External(format!(
            "sickw balance is not a number: {}",
            body.chars().take(200).collect::<String>()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_query_carries_key_identifier_and_service() {
        let client =
            SickwClient::new("https://sickw.example/api.php", "secret", Duration::from_secs(60)).unwrap();
        let id = Identifier::parse("35699900123456").unwrap();

        assert_eq!(
            client.check_params(&id, "61"),
            [
                ("format", "BETA"),
                ("key", "secret"),
                ("imei", "35699900123456"),
                ("service", "61"),
            ]
        );
    }

    #[test]
    fn balance_is_a_bare_number() {
        assert_eq!(parse_balance(" 12.34\n").unwrap(), 12.34);
        assert_eq!(parse_balance("0").unwrap(), 0.0);
        assert!(matches!(parse_balance("Invalid API key"), Err(Error::External(_))));
        assert!(matches!(parse_balance(""), Err(Error::External(_))));
    }

    #[tokio::test]
    async fn unreachable_service_is_a_transport_failure() {
        // Port 9 (discard) on localhost; nothing should be listening.
        let client = SickwClient::new("http://127.0.0.1:9/api.php", "k", Duration::from_secs(2)).unwrap();
        let id = Identifier::parse("35699900123456").unwrap();

        let LookupResult::Failure(f) = client.check(&id, "61").await else {
            panic!("expected failure");
        };
        assert_eq!(f.kind, icb_core::lookup::FailureKind::Transport);
        assert!(f.reason.starts_with("network error:"));
    }
}
