use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use teloxide::errors::RequestError;
use teloxide::prelude::*;
use teloxide::types::{Me, Update, UpdateKind};
use teloxide::utils::command::{BotCommands, ParseError};
use url::Url;

use crate::dispatcher::{ReplyChannel, SendOutcome};
use crate::handler::AskRequest;

const WEBHOOK_ATTEMPTS: usize = 3;
const WEBHOOK_RETRY_PAUSE: Duration = Duration::from_secs(2);

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Bot commands")]
pub enum Command {
    #[command(description = "Ask Knoll a question", parse_with = join_args)]
    Ask(String),
}

fn join_args(input: String) -> Result<(String,), ParseError> {
    Ok((input.split_whitespace().collect::<Vec<_>>().join(" "),))
}

/// An `/ask` command pulled out of a webhook update, with the chat to answer in.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundAsk {
    pub chat_id: ChatId,
    pub request: AskRequest,
}

/// Returns the `/ask` command carried by `update`, if any.
///
/// Commands addressed to another bot (`/ask@other_bot`) and all non-message
/// updates are ignored.
pub fn extract_ask(update: &Update, bot_username: &str) -> Option<InboundAsk> {
    let UpdateKind::Message(msg) = &update.kind else {
        return None;
    };
    let text = msg.text()?;
    let Command::Ask(args) = Command::parse(text, bot_username).ok()?;
    let user = msg.from()?;
    let display_name = if user.first_name.is_empty() {
        "Unknown".to_string()
    } else {
        user.first_name.clone()
    };
    Some(InboundAsk {
        chat_id: msg.chat.id,
        request: AskRequest::new(user.id.0, display_name, &args),
    })
}

/// Plain-text replies into one Telegram chat.
pub struct ChatReply {
    bot: Bot,
    chat_id: ChatId,
}

impl ChatReply {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id }
    }
}

#[async_trait]
impl ReplyChannel for ChatReply {
    async fn send_text(&self, text: &str) -> SendOutcome {
        // No parse mode: answers must never be read as markup.
        match self.bot.send_message(self.chat_id, text).await {
            Ok(_) => SendOutcome::Sent,
            Err(RequestError::RetryAfter(wait)) => SendOutcome::Overloaded(wait),
            Err(e) => SendOutcome::Rejected(e.to_string()),
        }
    }
}

pub fn webhook_endpoint(base: &str) -> Result<Url, url::ParseError> {
    Url::parse(&format!("{}/webhook", base.trim_end_matches('/')))
}

pub async fn bot_identity(bot: &Bot) -> Result<Me, RequestError> {
    let me = bot.get_me().await?;
    log::info!("Telegram bot initialized as @{}", me.user.username.as_deref().unwrap_or("?"));
    Ok(me)
}

/// Points Telegram at `<base>/webhook`, retrying a few times.
pub async fn register_webhook(bot: &Bot, base: Option<&str>) -> bool {
    let Some(base) = base else {
        log::warn!("WEBHOOK_URL not set, webhook not configured");
        return false;
    };
    let endpoint = match webhook_endpoint(base) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            log::error!("Invalid webhook URL {}: {}", base, e);
            return false;
        }
    };

    for attempt in 1..=WEBHOOK_ATTEMPTS {
        match bot.get_webhook_info().await {
            Ok(info) => log::info!("Current webhook info: {:?}", info),
            Err(e) => log::warn!("Could not read webhook info: {}", e),
        }
        match bot.set_webhook(endpoint.clone()).await {
            Ok(_) => {
                log::info!("Webhook successfully set to: {}", endpoint);
                return true;
            }
            Err(e) => {
                log::warn!(
                    "Webhook setup failed, attempt {}/{}: {}",
                    attempt,
                    WEBHOOK_ATTEMPTS,
                    e
                );
                if attempt < WEBHOOK_ATTEMPTS {
                    tokio::time::sleep(WEBHOOK_RETRY_PAUSE).await;
                }
            }
        }
    }
    log::warn!("Failed to configure webhook after {} attempts", WEBHOOK_ATTEMPTS);
    false
}

pub async fn unregister_webhook(bot: &Bot) {
    match bot.delete_webhook().await {
        Ok(_) => log::info!("Webhook removed"),
        Err(e) => log::error!("Error removing webhook: {}", e),
    }
}

/// Summary of `getWebhookInfo` for the status endpoint.
pub async fn webhook_status(bot: &Bot) -> Value {
    let info = match bot.get_webhook_info().await {
        Ok(info) => info,
        Err(e) => {
            log::error!("Error checking webhook status: {}", e);
            return json!({ "error": e.to_string(), "webhook_configured": false });
        }
    };
    let info = serde_json::to_value(&info).unwrap_or(Value::Null);
    webhook_summary(&info)
}

fn webhook_summary(info: &Value) -> Value {
    let url = info
        .get("url")
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty());
    json!({
        "webhook_configured": url.is_some(),
        "webhook_url": url,
        "last_error_date": info.get("last_error_date"),
        "last_error_message": info.get("last_error_message"),
        "max_connections": info.get("max_connections"),
        "pending_update_count": info.get("pending_update_count"),
    })
}
