//! Check Workflow: reserve a credit, call the lookup service, reconcile.
//!
//! ```text
//! Start -> Validated -> Reserved(debited) -> { Succeeded | Refunded }
//!   \-> Rejected(InvalidIdentifier)
//!              \-> Rejected(InsufficientCredits)
//! ```
//!
//! The sufficiency check and the debit are one conditional `UPDATE`
//! ([`LedgerStore::try_debit`]), so concurrent checks for the same identity
//! cannot drive the balance negative.

use std::sync::Arc;

use crate::{
    audit::{AuditEvent, AuditLogger},
    domain::{Identifier, UserId},
    errors::Error,
    ledger::LedgerStore,
    lookup::{LookupClient, LookupDetails, LookupFailure, LookupResult},
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    InvalidIdentifier,
    InsufficientCredits { balance: i64, cost: i64 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckOutcome {
    Rejected(Rejection),
    Succeeded {
        identifier: Identifier,
        details: LookupDetails,
        balance: i64,
    },
    Refunded {
        identifier: Identifier,
        failure: LookupFailure,
        balance: i64,
    },
}

/// Credits already debited for one check. Must be handed to
/// [`CheckWorkflow::settle`], which either keeps the debit or refunds it.
#[must_use = "a reservation holds debited credits; settle it"]
#[derive(Debug)]
pub struct Reservation {
    user_id: UserId,
    identifier: Identifier,
    cost: i64,
    balance_after_debit: i64,
}

impl Reservation {
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub fn cost(&self) -> i64 {
        self.cost
    }

    pub fn balance_after_debit(&self) -> i64 {
        self.balance_after_debit
    }
}

#[derive(Debug)]
pub enum Authorization {
    Reserved(Reservation),
    Rejected(Rejection),
}

pub struct CheckWorkflow {
    ledger: Arc<dyn LedgerStore>,
    lookup: Arc<dyn LookupClient>,
    audit: Option<Arc<AuditLogger>>,
    service_code: String,
    cost: i64,
}

impl CheckWorkflow {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        lookup: Arc<dyn LookupClient>,
        service_code: impl Into<String>,
        cost: i64,
    ) -> Self {
        Self {
            ledger,
            lookup,
            audit: None,
            service_code: service_code.into(),
            cost,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn cost(&self) -> i64 {
        self.cost
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    pub fn lookup(&self) -> &Arc<dyn LookupClient> {
        &self.lookup
    }

    /// Step 1: normalize and validate. No side effects.
    pub fn validate(raw: &str) -> std::result::Result<Identifier, Rejection> {
        Identifier::parse(raw).ok_or(Rejection::InvalidIdentifier)
    }

    /// Read-only sufficiency check, used by the conversation entry point.
    /// Not a lock: the binding check happens again in [`Self::reserve`].
    pub async fn precheck(&self, user_id: UserId) -> Result<Option<Rejection>> {
        let balance = self.ledger.balance(user_id).await?;
        if balance < self.cost {
            return Ok(Some(Rejection::InsufficientCredits {
                balance,
                cost: self.cost,
            }));
        }
        Ok(None)
    }

    /// Steps 2+3: atomically debit `cost` if the balance covers it.
    ///
    /// Once the debit commits nothing else can fail here: the post-debit
    /// balance comes back from the same statement.
    pub async fn reserve(&self, user_id: UserId, identifier: Identifier) -> Result<Authorization> {
        let Some(balance_after_debit) = self.ledger.try_debit(user_id, self.cost).await? else {
            let balance = self.ledger.balance(user_id).await?;
            tracing::info!(user_id = %user_id, balance, cost = self.cost, "check rejected: insufficient credits");
            return Ok(Authorization::Rejected(Rejection::InsufficientCredits {
                balance,
                cost: self.cost,
            }));
        };

        self.audit(AuditEvent::debit(user_id, self.cost, identifier.as_str()));
        tracing::info!(user_id = %user_id, identifier = %identifier, balance = balance_after_debit, "credits reserved for check");

        Ok(Authorization::Reserved(Reservation {
            user_id,
            identifier,
            cost: self.cost,
            balance_after_debit,
        }))
    }

    /// Steps 4+5: call the lookup service, refund on failure.
    ///
    /// The only fallible ledger call is the refund itself.
    pub async fn settle(&self, reservation: Reservation) -> Result<CheckOutcome> {
        let Reservation {
            user_id,
            identifier,
            cost,
            balance_after_debit,
        } = reservation;

        match self.lookup.check(&identifier, &self.service_code).await {
            LookupResult::Success(details) => {
                let balance = balance_after_debit;
                tracing::info!(user_id = %user_id, identifier = %identifier, balance, "check succeeded");
                self.audit(AuditEvent::check_succeeded(user_id, balance, identifier.as_str()));
                Ok(CheckOutcome::Succeeded {
                    identifier,
                    details,
                    balance,
                })
            }
            LookupResult::Failure(failure) => {
                tracing::warn!(
                    user_id = %user_id,
                    identifier = %identifier,
                    kind = ?failure.kind,
                    reason = %failure.reason,
                    "lookup failed, refunding"
                );
                let balance = match self.ledger.credit(user_id, cost).await {
                    Ok(Some(balance)) => balance,
                    Ok(None) => {
                        tracing::error!(user_id = %user_id, identifier = %identifier, cost, "refund found no account; debit left unreconciled");
                        return Err(Error::External(format!(
                            "refund of {cost} for {user_id} found no account"
                        )));
                    }
                    Err(e) => {
                        tracing::error!(user_id = %user_id, identifier = %identifier, cost, error = %e, "refund failed; debit left unreconciled");
                        return Err(e);
                    }
                };
                self.audit(AuditEvent::refund(
                    user_id,
                    cost,
                    balance,
                    identifier.as_str(),
                    &failure.reason,
                ));
                Ok(CheckOutcome::Refunded {
                    identifier,
                    failure,
                    balance,
                })
            }
        }
    }

    /// Steps 2-5 for an already validated identifier.
    pub async fn run_validated(&self, user_id: UserId, identifier: Identifier) -> Result<CheckOutcome> {
        match self.reserve(user_id, identifier).await? {
            Authorization::Rejected(r) => Ok(CheckOutcome::Rejected(r)),
            Authorization::Reserved(reservation) => self.settle(reservation).await,
        }
    }

    /// The whole workflow for raw user input.
    pub async fn run(&self, user_id: UserId, raw: &str) -> Result<CheckOutcome> {
        match Self::validate(raw) {
            Ok(identifier) => self.run_validated(user_id, identifier).await,
            Err(r) => Ok(CheckOutcome::Rejected(r)),
        }
    }

    fn audit(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            audit.record(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SqliteLedger;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeLookup {
        result: LookupResult,
        calls: AtomicUsize,
    }

    impl FakeLookup {
        fn new(result: LookupResult) -> Self {
            Self {
                result,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LookupClient for FakeLookup {
        async fn check(&self, _identifier: &Identifier, service_code: &str) -> LookupResult {
            assert_eq!(service_code, "svc");
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn success() -> LookupResult {
        LookupResult::Success(LookupDetails {
            fields: vec![("carrier".to_string(), "Unlocked".to_string())],
            status: Some("success".to_string()),
        })
    }

    async fn setup(balance: i64, result: LookupResult) -> (CheckWorkflow, Arc<SqliteLedger>, Arc<FakeLookup>) {
        let ledger = Arc::new(SqliteLedger::in_memory().await.unwrap());
        ledger.ensure_account(UserId(1)).await.unwrap();
        if balance > 0 {
            ledger.credit(UserId(1), balance).await.unwrap();
        }
        let lookup = Arc::new(FakeLookup::new(result));
        let wf = CheckWorkflow::new(ledger.clone(), lookup.clone(), "svc", 1);
        (wf, ledger, lookup)
    }

    #[tokio::test]
    async fn invalid_identifier_has_no_side_effects() {
        let (wf, ledger, lookup) = setup(3, success()).await;

        for raw in ["123", "12345678901234567", "not an imei"] {
            let out = wf.run(UserId(1), raw).await.unwrap();
            assert_eq!(out, CheckOutcome::Rejected(Rejection::InvalidIdentifier));
        }
        assert_eq!(ledger.balance(UserId(1)).await.unwrap(), 3);
        assert_eq!(lookup.calls(), 0);
    }

    #[tokio::test]
    async fn insufficient_credits_has_no_side_effects() {
        let (wf, ledger, lookup) = setup(0, success()).await;

        let out = wf.run(UserId(1), "35699900123456").await.unwrap();
        assert_eq!(
            out,
            CheckOutcome::Rejected(Rejection::InsufficientCredits { balance: 0, cost: 1 })
        );
        assert_eq!(ledger.balance(UserId(1)).await.unwrap(), 0);
        assert_eq!(lookup.calls(), 0);
    }

    #[tokio::test]
    async fn success_keeps_the_debit() {
        let (wf, ledger, lookup) = setup(5, success()).await;

        let out = wf.run(UserId(1), "35 699900-123456").await.unwrap();
        let CheckOutcome::Succeeded {
            identifier,
            details,
            balance,
        } = out
        else {
            panic!("expected success, got {out:?}");
        };
        assert_eq!(identifier.as_str(), "35699900123456");
        assert_eq!(details.fields[0].1, "Unlocked");
        assert_eq!(balance, 4);
        assert_eq!(ledger.balance(UserId(1)).await.unwrap(), 4);
        assert_eq!(lookup.calls(), 1);
    }

    #[tokio::test]
    async fn failure_refunds_the_debit() {
        let (wf, ledger, _lookup) =
            setup(2, LookupResult::Failure(LookupFailure::transport("connection refused"))).await;

        let out = wf.run(UserId(1), "356999001234567").await.unwrap();
        let CheckOutcome::Refunded { failure, balance, .. } = out else {
            panic!("expected refund, got {out:?}");
        };
        assert_eq!(failure.reason, "network error: connection refused");
        assert_eq!(balance, 2);
        assert_eq!(ledger.balance(UserId(1)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn reservation_reports_post_debit_balance() {
        let (wf, ledger, lookup) = setup(3, success()).await;
        let id = CheckWorkflow::validate("35699900123456").unwrap();

        let Authorization::Reserved(r) = wf.reserve(UserId(1), id).await.unwrap() else {
            panic!("expected reservation");
        };
        assert_eq!(r.balance_after_debit(), 2);
        assert_eq!(ledger.balance(UserId(1)).await.unwrap(), 2);
        assert_eq!(lookup.calls(), 0);

        let out = wf.settle(r).await.unwrap();
        assert!(matches!(out, CheckOutcome::Succeeded { balance: 2, .. }));
    }

    #[tokio::test]
    async fn precheck_is_read_only() {
        let (wf, ledger, _lookup) = setup(1, success()).await;
        assert_eq!(wf.precheck(UserId(1)).await.unwrap(), None);
        assert_eq!(
            wf.precheck(UserId(2)).await.unwrap(),
            Some(Rejection::InsufficientCredits { balance: 0, cost: 1 })
        );
        assert_eq!(ledger.balance(UserId(1)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn audit_records_debit_and_refund() {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(AuditLogger::new(dir.path().join("audit.log"), true));
        let (wf, _ledger, _lookup) =
            setup(1, LookupResult::Failure(LookupFailure::business("Error S03"))).await;
        let wf = wf.with_audit(audit.clone());

        wf.run(UserId(1), "35699900123456").await.unwrap();

        let written = std::fs::read_to_string(audit.path()).unwrap();
        let events: Vec<String> = written
            .lines()
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l).unwrap();
                v["event"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(events, vec!["debit", "refund"]);
    }

    /// Delegates to a real ledger; reads and credits can be switched to fail.
    struct FaultyLedger {
        inner: Arc<SqliteLedger>,
        fail_reads: AtomicBool,
        fail_credits: AtomicBool,
    }

    impl FaultyLedger {
        fn new(inner: Arc<SqliteLedger>) -> Self {
            Self {
                inner,
                fail_reads: AtomicBool::new(false),
                fail_credits: AtomicBool::new(false),
            }
        }

        fn io_error() -> Error {
            Error::External("disk I/O error".to_string())
        }
    }

    #[async_trait]
    impl LedgerStore for FaultyLedger {
        async fn ensure_account(&self, user_id: UserId) -> Result<bool> {
            self.inner.ensure_account(user_id).await
        }

        async fn balance(&self, user_id: UserId) -> Result<i64> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(Self::io_error());
            }
            self.inner.balance(user_id).await
        }

        async fn exists(&self, user_id: UserId) -> Result<bool> {
            self.inner.exists(user_id).await
        }

        async fn credit(&self, user_id: UserId, amount: i64) -> Result<Option<i64>> {
            if self.fail_credits.load(Ordering::SeqCst) {
                return Err(Self::io_error());
            }
            self.inner.credit(user_id, amount).await
        }

        async fn debit(&self, user_id: UserId, amount: i64) -> Result<()> {
            self.inner.debit(user_id, amount).await
        }

        async fn try_debit(&self, user_id: UserId, amount: i64) -> Result<Option<i64>> {
            self.inner.try_debit(user_id, amount).await
        }
    }

    async fn faulty_setup(balance: i64, result: LookupResult) -> (CheckWorkflow, Arc<FaultyLedger>, Arc<FakeLookup>) {
        let (_, inner, _) = setup(balance, success()).await;
        let ledger = Arc::new(FaultyLedger::new(inner));
        let lookup = Arc::new(FakeLookup::new(result));
        let wf = CheckWorkflow::new(ledger.clone(), lookup.clone(), "svc", 1);
        (wf, ledger, lookup)
    }

    #[tokio::test]
    async fn committed_debit_does_not_depend_on_balance_reads() {
        let (wf, ledger, lookup) = faulty_setup(2, success()).await;
        ledger.fail_reads.store(true, Ordering::SeqCst);

        let out = wf.run(UserId(1), "35699900123456").await.unwrap();

        assert!(matches!(out, CheckOutcome::Succeeded { balance: 1, .. }), "got {out:?}");
        assert_eq!(lookup.calls(), 1);
        assert_eq!(ledger.inner.balance(UserId(1)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn refund_reports_balance_without_a_separate_read() {
        let (wf, ledger, _lookup) =
            faulty_setup(2, LookupResult::Failure(LookupFailure::transport("timed out"))).await;
        ledger.fail_reads.store(true, Ordering::SeqCst);

        let out = wf.run(UserId(1), "35699900123456").await.unwrap();

        assert!(matches!(out, CheckOutcome::Refunded { balance: 2, .. }), "got {out:?}");
        assert_eq!(ledger.inner.balance(UserId(1)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn failed_refund_surfaces_as_error() {
        let (wf, ledger, lookup) =
            faulty_setup(2, LookupResult::Failure(LookupFailure::business("Error S03"))).await;
        ledger.fail_credits.store(true, Ordering::SeqCst);

        let res = wf.run(UserId(1), "35699900123456").await;

        assert!(matches!(res, Err(Error::External(_))), "got {res:?}");
        assert_eq!(lookup.calls(), 1);
        // The debit stays applied; the caller escalates.
        assert_eq!(ledger.inner.balance(UserId(1)).await.unwrap(), 1);
    }
}
