//! Application service: routes inbound updates to the conversation
//! controller, the check workflow and the admin operations, and replies
//! through the [`MessagingPort`].

use std::sync::Arc;

use crate::{
    admin::{grant_credits, GrantOutcome},
    audit::{AuditEvent, AuditLogger},
    config::Config,
    conversation::{BeginOutcome, ConversationController, TextOutcome},
    domain::{normalize_digits, ChatId, Identifier, UserId},
    errors::Error,
    formatting::{escape_html, format_details, truncate_text},
    lookup::FailureKind,
    messaging::{
        port::MessagingPort,
        types::{Command, IncomingUpdate, TextMessage, WebAppButton, WebAppData},
    },
    webapp::{parse_payload, PayloadError, WebAppRequest},
    workflow::{Authorization, CheckOutcome, CheckWorkflow, Rejection},
    Result,
};

const WEB_APP_LABEL: &str = "Open IMEI Checker App";
const INTERNAL_ERROR_TEXT: &str =
    "An internal error occurred while processing your request. Please try again later.";

/// Where a check was requested from; only changes the wording of replies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CheckSource {
    Conversation,
    WebApp,
}

impl CheckSource {
    fn suffix(self) -> &'static str {
        match self {
            CheckSource::Conversation => "",
            CheckSource::WebApp => " (from Web App)",
        }
    }
}

pub struct CheckBot {
    cfg: Arc<Config>,
    workflow: Arc<CheckWorkflow>,
    conversations: ConversationController,
    messenger: Arc<dyn MessagingPort>,
    audit: Option<Arc<AuditLogger>>,
}

impl CheckBot {
    pub fn new(
        cfg: Arc<Config>,
        workflow: Arc<CheckWorkflow>,
        messenger: Arc<dyn MessagingPort>,
    ) -> Self {
        Self {
            cfg,
            conversations: ConversationController::new(workflow.clone()),
            workflow,
            messenger,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn conversations(&self) -> &ConversationController {
        &self.conversations
    }

    /// Handle one inbound update. Errors never escape: they are logged,
    /// answered with a sanitized message and forwarded to the administrator.
    pub async fn handle(&self, update: IncomingUpdate) {
        let chat_id = update.chat_id();
        let user_id = update.user_id();
        let context = describe(&update);

        let res = match update {
            IncomingUpdate::Command(cmd) => self.handle_command(cmd).await,
            IncomingUpdate::Text(msg) => self.handle_text(msg).await,
            IncomingUpdate::WebApp(data) => self.handle_web_app(data).await,
        };

        if let Err(e) = res {
            self.escalate(chat_id, user_id, &context, &e).await;
        }
    }

    async fn handle_command(&self, cmd: Command) -> Result<()> {
        let chat_id = cmd.chat_id;
        let user_id = cmd.user_id;

        match cmd.name.as_str() {
            "start" => {
                if self.workflow.ledger().ensure_account(user_id).await? {
                    tracing::info!(user_id = %user_id, username = ?cmd.username, "new user registered");
                    self.audit(AuditEvent::account_created(user_id));
                }
                let name = cmd
                    .username
                    .as_deref()
                    .map(|u| format!("@{}", escape_html(u)))
                    .unwrap_or_else(|| "there".to_string());
                let body = format!(
                    "Hi {name}! 👋\n\
I'm your IMEI Carrier Checker Bot.\n\n\
You can use me to check iPhone carrier and other information.\n\
Each check costs <b>{}</b>; failed checks are refunded automatically.\n\n\
✨ Tap the '{WEB_APP_LABEL}' button below for the interactive Web App, \
or use /check_imei to check right here in the chat.\n\n\
See /help for all commands.",
                    credits(self.workflow.cost())
                );
                self.send_with_app_button(chat_id, &body).await
            }

            "help" => {
                let body = "Here are the commands you can use:\n\
• /balance - Check your current credit balance.\n\
• /check_imei - Start an IMEI check (conversational).\n\
• /cancel - Cancel an IMEI check in progress.\n\
• /add_credits - Learn how to add more credits.\n\
• /open_app - Show the IMEI Checker Web App button.\n\
• /help - Get this message again.";
                self.send_with_app_button(chat_id, body).await
            }

            "open_app" => {
                if self.cfg.web_app_url.is_none() {
                    return self
                        .send(chat_id, "The Web App is not available right now. Use /check_imei instead.")
                        .await;
                }
                self.send_with_app_button(
                    chat_id,
                    "Tap the button below to open the IMEI Checker Web App.\n\
This button will stay at the bottom of your chat for easy access.",
                )
                .await
            }

            "balance" => {
                let balance = self.workflow.ledger().balance(user_id).await?;
                self.send(
                    chat_id,
                    &format!("Your current credit balance is: <b>{}</b>.", credits(balance)),
                )
                .await
            }

            "add_credits" => {
                let admin = self.admin_display().await;
                let body = format!(
                    "To add credits, please contact {admin} and tell them your Telegram User ID: <code>{user_id}</code>.\n\
Each check costs {}.\n\n\
Once payment is confirmed, the administrator will add credits to your account manually.",
                    credits(self.workflow.cost())
                );
                self.send(chat_id, &body).await
            }

            "check_imei" => match self.conversations.begin(cmd.session_key()).await? {
                BeginOutcome::AwaitingIdentifier => {
                    self.send(
                        chat_id,
                        "Please send me the IMEI or Serial number you want to check.\n\
It should be 14-16 digits long (spaces/hyphens will be removed automatically).\n\
Send /cancel to stop.",
                    )
                    .await
                }
                BeginOutcome::Rejected(r) => self.send(chat_id, &rejection_text(&r)).await,
            },

            "cancel" => {
                if self.conversations.cancel(cmd.session_key()).await {
                    self.send(
                        chat_id,
                        "IMEI check canceled. You can start a new one with /check_imei or by opening the Web App.",
                    )
                    .await
                } else {
                    self.send(chat_id, "There is no IMEI check in progress.")
                        .await
                }
            }

            "admin_add_credits" => self.admin_add_credits(&cmd).await,

            "api_balance" => {
                if !self.cfg.is_admin(user_id) {
                    return self
                        .send(chat_id, "You are not authorized to use this command.")
                        .await;
                }
                match self.workflow.lookup().account_balance().await {
                    Ok(funds) => {
                        self.send(chat_id, &format!("Lookup service account balance: <b>{funds:.2}</b>"))
                            .await
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to fetch lookup service balance");
                        self.send(
                            chat_id,
                            &format!(
                                "Could not fetch the lookup service balance: <code>{}</code>",
                                escape_html(&e.to_string())
                            ),
                        )
                        .await
                    }
                }
            }

            _ => {
                self.send(
                    chat_id,
                    "Sorry, I don't understand that command. Use /help for available commands.",
                )
                .await
            }
        }
    }

    async fn admin_add_credits(&self, cmd: &Command) -> Result<()> {
        let chat_id = cmd.chat_id;
        if !self.cfg.is_admin(cmd.user_id) {
            tracing::warn!(user_id = %cmd.user_id, "non-admin tried /admin_add_credits");
            return self
                .send(chat_id, "You are not authorized to use this command.")
                .await;
        }

        let [target, amount] = cmd.args.as_slice() else {
            return self
                .send(
                    chat_id,
                    "Usage: <code>/admin_add_credits &lt;user_id&gt; &lt;amount&gt;</code>\n\
Example: <code>/admin_add_credits 123456789 10</code>",
                )
                .await;
        };
        let (Ok(target), Ok(amount)) = (target.parse::<i64>(), amount.parse::<i64>()) else {
            return self
                .send(chat_id, "Invalid user ID or amount. Please provide numbers.")
                .await;
        };
        let target = UserId(target);

        let outcome = grant_credits(
            &self.cfg,
            self.workflow.ledger().as_ref(),
            self.audit.as_deref(),
            cmd.user_id,
            target,
            amount,
        )
        .await?;

        match outcome {
            GrantOutcome::Granted {
                target,
                amount,
                balance,
            } => {
                self.send(
                    chat_id,
                    &format!(
                        "Successfully added {} to user <code>{target}</code>. Their balance: {}.",
                        credits(amount),
                        credits(balance)
                    ),
                )
                .await?;

                let note = format!(
                    "🎉 {} have been added to your account by the administrator!\nYour new balance is: <b>{}</b>.",
                    credits(amount),
                    credits(balance)
                );
                if let Err(e) = self.messenger.send_html(ChatId::from(target), &note).await {
                    tracing::warn!(target = %target, error = %e, "could not notify user about credit top-up");
                }
                Ok(())
            }
            GrantOutcome::NotAuthorized => {
                self.send(chat_id, "You are not authorized to use this command.")
                    .await
            }
            GrantOutcome::NonPositiveAmount => {
                self.send(chat_id, "Amount must be a positive number.").await
            }
            GrantOutcome::UnknownAccount(target) => {
                self.send(
                    chat_id,
                    &format!("User with ID <code>{target}</code> not found in the database."),
                )
                .await
            }
        }
    }

    async fn handle_text(&self, msg: TextMessage) -> Result<()> {
        match self.conversations.handle_text(msg.session_key(), &msg.text).await {
            TextOutcome::NoSession => {
                tracing::debug!(user_id = %msg.user_id, "ignoring text outside a conversation");
                Ok(())
            }
            TextOutcome::Reprompt => {
                self.send(
                    msg.chat_id,
                    "The provided input does not look like a valid IMEI/Serial number.\n\
Please provide a 14-16 digit number. Try again, or send /cancel.",
                )
                .await
            }
            TextOutcome::Accepted(identifier) => {
                if msg.text.trim() != identifier.as_str() {
                    self.send_best_effort(
                        msg.chat_id,
                        &format!(
                            "Recognized IMEI: <code>{identifier}</code> (non-digit characters removed)."
                        ),
                    )
                    .await;
                }
                self.run_check(msg.chat_id, msg.user_id, identifier, CheckSource::Conversation)
                    .await
            }
        }
    }

    async fn handle_web_app(&self, data: WebAppData) -> Result<()> {
        tracing::info!(user_id = %data.user_id, payload = %truncate_text(&data.data, 200), "received web app data");

        let request = match parse_payload(&data.data) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(user_id = %data.user_id, error = %e, "malformed web app payload");
                let text = match e {
                    PayloadError::InvalidJson(_) => "Received invalid data from Web App.".to_string(),
                    PayloadError::UnknownAction(_) => format!(
                        "Unknown action or missing data from Web App: <code>{}</code>",
                        escape_html(&truncate_text(&data.data, 200))
                    ),
                };
                return self.send(data.chat_id, &text).await;
            }
        };

        match request {
            WebAppRequest::CheckIdentifier { identifier } => {
                let raw = identifier.unwrap_or_default();
                if raw.trim().is_empty() {
                    return self
                        .send(data.chat_id, "IMEI was not provided from Web App.")
                        .await;
                }
                match CheckWorkflow::validate(&raw) {
                    Ok(identifier) => {
                        self.run_check(data.chat_id, data.user_id, identifier, CheckSource::WebApp)
                            .await
                    }
                    Err(_) => {
                        tracing::info!(
                            user_id = %data.user_id,
                            digits = normalize_digits(&raw).len(),
                            "web app identifier rejected"
                        );
                        self.send(
                            data.chat_id,
                            "❌ Invalid IMEI/Serial format from Web App. Please enter a 14-16 digit number.",
                        )
                        .await
                    }
                }
            }
            WebAppRequest::RequestBalance => {
                let balance = self.workflow.ledger().balance(data.user_id).await?;
                self.send(
                    data.chat_id,
                    &format!(
                        "Your current credit balance (from Web App request) is: <b>{}</b>.",
                        credits(balance)
                    ),
                )
                .await
            }
        }
    }

    /// Reserve, announce, settle, report. Between reserve and settle nothing
    /// may bail out, or the debit would be left without its refund path.
    async fn run_check(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        identifier: Identifier,
        source: CheckSource,
    ) -> Result<()> {
        let reservation = match self.workflow.reserve(user_id, identifier).await? {
            Authorization::Rejected(r) => return self.send(chat_id, &rejection_text(&r)).await,
            Authorization::Reserved(r) => r,
        };

        self.send_best_effort(
            chat_id,
            &format!(
                "{} deducted. Your new balance: {}.\nChecking IMEI: <code>{}</code>{}. This may take a moment...",
                credits(reservation.cost()),
                credits(reservation.balance_after_debit()),
                reservation.identifier(),
                source.suffix()
            ),
        )
        .await;

        match self.workflow.settle(reservation).await? {
            CheckOutcome::Succeeded {
                identifier,
                details,
                balance,
            } => {
                self.send(
                    chat_id,
                    &format!(
                        "✅ <b>Check Result for IMEI <code>{identifier}</code>{}:</b>\n\n{}\n\nRemaining balance: {}.",
                        source.suffix(),
                        format_details(&details),
                        credits(balance)
                    ),
                )
                .await
            }
            CheckOutcome::Refunded {
                identifier,
                failure,
                balance,
            } => {
                if matches!(failure.kind, FailureKind::Transport | FailureKind::Format) {
                    self.notify_admin(&format!(
                        "⚠️ <b>Lookup service failure</b>\nUser: <code>{user_id}</code>\nIMEI: <code>{identifier}</code>\nReason: <code>{}</code>",
                        escape_html(&failure.reason)
                    ))
                    .await;
                }
                self.send(
                    chat_id,
                    &format!(
                        "❌ <b>Error during IMEI check for <code>{identifier}</code>{}:</b>\n{}\n\n\
Please try again or contact support if the issue persists.",
                        source.suffix(),
                        escape_html(&failure.reason)
                    ),
                )
                .await?;
                self.send(
                    chat_id,
                    &format!(
                        "Credits refunded due to check failure. Your balance: {}.",
                        credits(balance)
                    ),
                )
                .await
            }
            CheckOutcome::Rejected(r) => self.send(chat_id, &rejection_text(&r)).await,
        }
    }

    async fn escalate(&self, chat_id: ChatId, user_id: UserId, context: &str, err: &Error) {
        tracing::error!(chat_id = %chat_id, user_id = %user_id, context, error = %err, "update handling failed");

        self.send_best_effort(chat_id, INTERNAL_ERROR_TEXT).await;
        self.notify_admin(&format!(
            "⚠️ <b>An error occurred</b>: <code>{}</code>\nUser: <code>{user_id}</code>\nUpdate: <code>{}</code>",
            escape_html(&err.to_string()),
            escape_html(context)
        ))
        .await;
    }

    async fn notify_admin(&self, html: &str) {
        let Some(admin) = self.cfg.admin_user_id else {
            return;
        };
        if let Err(e) = self.messenger.send_html(ChatId::from(admin), html).await {
            tracing::warn!(error = %e, "could not notify administrator");
        }
    }

    async fn admin_display(&self) -> String {
        let Some(admin) = self.cfg.admin_user_id else {
            return "the administrator".to_string();
        };
        match self.messenger.username_of(admin).await {
            Ok(Some(username)) => format!("@{}", escape_html(&username)),
            Ok(None) => format!("the administrator (ID: <code>{admin}</code>)"),
            Err(e) => {
                tracing::debug!(error = %e, "could not resolve administrator username");
                format!("the administrator (ID: <code>{admin}</code>)")
            }
        }
    }

    async fn send(&self, chat_id: ChatId, html: &str) -> Result<()> {
        self.messenger.send_html(chat_id, html).await
    }

    async fn send_best_effort(&self, chat_id: ChatId, html: &str) {
        if let Err(e) = self.messenger.send_html(chat_id, html).await {
            tracing::warn!(chat_id = %chat_id, error = %e, "failed to deliver message");
        }
    }

    async fn send_with_app_button(&self, chat_id: ChatId, html: &str) -> Result<()> {
        match &self.cfg.web_app_url {
            Some(url) => {
                let button = WebAppButton {
                    label: WEB_APP_LABEL.to_string(),
                    url: url.clone(),
                };
                self.messenger
                    .send_html_with_web_app(chat_id, html, &button)
                    .await
            }
            None => self.send(chat_id, html).await,
        }
    }

    fn audit(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            audit.record(event);
        }
    }
}

fn rejection_text(r: &Rejection) -> String {
    match r {
        Rejection::InvalidIdentifier => {
            "The provided input does not look like a valid IMEI/Serial number. Please provide a 14-16 digit number."
                .to_string()
        }
        Rejection::InsufficientCredits { balance, cost } => format!(
            "You don't have enough credits for this check. You need {}, but you have {balance}.\n\
Please use /add_credits to top up.",
            credits(*cost)
        ),
    }
}

fn credits(n: i64) -> String {
    if n == 1 {
        "1 credit".to_string()
    } else {
        format!("{n} credits")
    }
}

fn describe(update: &IncomingUpdate) -> String {
    match update {
        IncomingUpdate::Command(c) => format!("command /{} {}", c.name, c.args.join(" ")),
        IncomingUpdate::Text(t) => format!("text {:?}", truncate_text(&t.text, 100)),
        IncomingUpdate::WebApp(w) => format!("web_app {}", truncate_text(&w.data, 100)),
    }
}
