use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use icb_core::{
    app::CheckBot, audit::AuditLogger, config::Config, messaging::port::MessagingPort,
    workflow::CheckWorkflow,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub app: Arc<CheckBot>,
}

pub async fn run_polling(
    cfg: Arc<Config>,
    workflow: Arc<CheckWorkflow>,
    audit: Arc<AuditLogger>,
) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => tracing::info!(username = %me.username(), "bot started"),
        Err(e) => tracing::warn!(error = %e, "get_me failed; continuing"),
    }
    tracing::info!(
        admin_configured = cfg.admin_user_id.is_some(),
        web_app = cfg.web_app_url.is_some(),
        price = workflow.cost(),
        "configuration loaded"
    );

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let app = Arc::new(CheckBot::new(cfg, workflow, messenger).with_audit(audit));

    let state = Arc::new(AppState { app: app.clone() });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    // Open conversations are in memory only and are lost here.
    let abandoned = app.conversations().active_sessions().await;
    tracing::info!(abandoned_sessions = abandoned, "dispatcher stopped");
    Ok(())
}
