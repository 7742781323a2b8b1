//! Out-of-band administrative credit top-up.

use crate::{
    audit::{AuditEvent, AuditLogger},
    config::Config,
    domain::UserId,
    ledger::LedgerStore,
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted { target: UserId, amount: i64, balance: i64 },
    NotAuthorized,
    NonPositiveAmount,
    UnknownAccount(UserId),
}

/// Credit `amount` to `target` on behalf of `actor`.
///
/// Only the configured administrator may do this; the amount must be
/// positive and the target account must already exist.
pub async fn grant_credits(
    cfg: &Config,
    ledger: &dyn LedgerStore,
    audit: Option<&AuditLogger>,
    actor: UserId,
    target: UserId,
    amount: i64,
) -> Result<GrantOutcome> {
    if !cfg.is_admin(actor) {
        tracing::warn!(actor = %actor, "unauthorized admin credit attempt");
        return Ok(GrantOutcome::NotAuthorized);
    }
    if amount <= 0 {
        return Ok(GrantOutcome::NonPositiveAmount);
    }
    let Some(balance) = ledger.credit(target, amount).await? else {
        return Ok(GrantOutcome::UnknownAccount(target));
    };
    tracing::info!(actor = %actor, target = %target, amount, balance, "admin credit applied");
    if let Some(audit) = audit {
        audit.record(AuditEvent::admin_credit(actor, target, amount, balance));
    }

    Ok(GrantOutcome::Granted {
        target,
        amount,
        balance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::DEFAULT_SICKW_API_URL, ledger::SqliteLedger};
    use std::time::Duration;

    const ADMIN: UserId = UserId(999);

    fn cfg() -> Config {
        Config {
            telegram_bot_token: "x".to_string(),
            admin_user_id: Some(ADMIN),
            web_app_url: None,
            sickw_api_key: "k".to_string(),
            sickw_api_url: DEFAULT_SICKW_API_URL.to_string(),
            service_id: "svc".to_string(),
            lookup_timeout: Duration::from_secs(60),
            credit_price: 1,
            database_url: "sqlite::memory:".to_string(),
            audit_log_path: "/tmp/a.log".into(),
            audit_log_json: true,
        }
    }

    #[tokio::test]
    async fn admin_can_credit_existing_account() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        ledger.ensure_account(UserId(5)).await.unwrap();

        let out = grant_credits(&cfg(), &ledger, None, ADMIN, UserId(5), 10)
            .await
            .unwrap();
        assert_eq!(
            out,
            GrantOutcome::Granted {
                target: UserId(5),
                amount: 10,
                balance: 10
            }
        );
    }

    #[tokio::test]
    async fn unknown_target_is_rejected_without_creating_it() {
        let ledger = SqliteLedger::in_memory().await.unwrap();

        let out = grant_credits(&cfg(), &ledger, None, ADMIN, UserId(5), 10)
            .await
            .unwrap();
        assert_eq!(out, GrantOutcome::UnknownAccount(UserId(5)));
        assert!(!ledger.exists(UserId(5)).await.unwrap());
        assert_eq!(ledger.balance(UserId(5)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn non_admin_and_non_positive_amounts_are_rejected() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        ledger.ensure_account(UserId(5)).await.unwrap();

        assert_eq!(
            grant_credits(&cfg(), &ledger, None, UserId(5), UserId(5), 10)
                .await
                .unwrap(),
            GrantOutcome::NotAuthorized
        );
        for amount in [0, -3] {
            assert_eq!(
                grant_credits(&cfg(), &ledger, None, ADMIN, UserId(5), amount)
                    .await
                    .unwrap(),
                GrantOutcome::NonPositiveAmount
            );
        }
        assert_eq!(ledger.balance(UserId(5)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn no_admin_configured_means_nobody_is_admin() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        ledger.ensure_account(UserId(5)).await.unwrap();
        let mut cfg = cfg();
        cfg.admin_user_id = None;

        assert_eq!(
            grant_credits(&cfg, &ledger, None, ADMIN, UserId(5), 1)
                .await
                .unwrap(),
            GrantOutcome::NotAuthorized
        );
    }
}
