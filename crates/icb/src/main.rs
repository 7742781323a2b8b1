use std::sync::Arc;

use icb_sickw::SickwClient;

use icb_core::{audit::AuditLogger, config::Config, ledger::SqliteLedger, workflow::CheckWorkflow};

#[tokio::main]
async fn main() -> Result<(), icb_core::Error> {
    icb_core::logging::init("icb")?;

    let cfg = Arc::new(Config::load()?);

    let ledger = Arc::new(SqliteLedger::connect(&cfg.database_url).await?);
    tracing::info!(database = %cfg.database_url, "ledger ready");

    let lookup = Arc::new(SickwClient::new(
        cfg.sickw_api_url.clone(),
        cfg.sickw_api_key.clone(),
        cfg.lookup_timeout,
    )?);

    let audit = Arc::new(AuditLogger::new(
        cfg.audit_log_path.clone(),
        cfg.audit_log_json,
    ));

    let workflow = Arc::new(
        CheckWorkflow::new(ledger, lookup, cfg.service_id.clone(), cfg.credit_price)
            .with_audit(audit.clone()),
    );

    icb_telegram::router::run_polling(cfg, workflow, audit)
        .await
        .map_err(|e| icb_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
