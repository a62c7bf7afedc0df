use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::agent::{AgentError, AgentRuntime};
use crate::dispatcher::{DeliveryOutcome, ReplyChannel, ResponseDispatcher, SendOutcome};
use crate::lifecycle::Lifecycle;
use crate::prompts::{self, AGENT_NAME};
use crate::rate_limiter::{Decision, RateGate};

pub const EMPTY_QUERY_REPLY: &str = "you forgot to ask ...";
pub const RATE_LIMIT_REPLY: &str = "Please wait a moment before asking another question...";

/// One parsed `/ask` request.
#[derive(Debug, Clone, PartialEq)]
pub struct AskRequest {
    pub user_id: u64,
    pub display_name: String,
    pub args: Vec<String>,
}

impl AskRequest {
    pub fn new(user_id: u64, display_name: impl Into<String>, text: &str) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            args: text.split_whitespace().map(str::to_string).collect(),
        }
    }

    pub fn query(&self) -> String {
        self.args.join(" ")
    }
}

/// How handling of one command ended.
#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    Dropped,
    EmptyQuery,
    RateLimited,
    AgentFailed(String),
    Dispatched(DeliveryOutcome),
}

pub fn agent_error_reply(err: &AgentError) -> String {
    match err {
        AgentError::RateLimited { retry_after } => format!(
            "Rate limit exceeded. Please wait {} seconds before trying again.",
            retry_after.as_secs()
        ),
        other => format!("{} encountered an error: {}", AGENT_NAME, other),
    }
}

pub struct RequestHandler {
    gate: RateGate<u64>,
    agent: Arc<dyn AgentRuntime>,
    dispatcher: ResponseDispatcher,
    lifecycle: Lifecycle,
    agent_timeout: Duration,
    epoch: Instant,
}

impl RequestHandler {
    pub fn new(
        gate: RateGate<u64>,
        agent: Arc<dyn AgentRuntime>,
        dispatcher: ResponseDispatcher,
        lifecycle: Lifecycle,
        agent_timeout: Duration,
    ) -> Self {
        Self {
            gate,
            agent,
            dispatcher,
            lifecycle,
            agent_timeout,
            epoch: Instant::now(),
        }
    }

    pub fn gate(&self) -> &RateGate<u64> {
        &self.gate
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Seconds on the monotonic clock the rate gate runs on.
    pub fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    pub async fn handle(&self, request: &AskRequest, channel: &dyn ReplyChannel) -> HandleOutcome {
        if self.lifecycle.is_draining() {
            log::info!("Ignoring message during shutdown");
            return HandleOutcome::Dropped;
        }

        let name = &request.display_name;
        log::info!("User {} (ID: {}) sent a command", name, request.user_id);

        let query = request.query();
        if query.is_empty() {
            log::info!("User {} sent an empty query", name);
            reply(channel, EMPTY_QUERY_REPLY).await;
            return HandleOutcome::EmptyQuery;
        }

        if let Decision::Deny(remaining) = self.gate.check(request.user_id, self.now()) {
            log::info!(
                "User {} hit rate limit - {:.1}s until next question",
                name,
                remaining
            );
            reply(channel, RATE_LIMIT_REPLY).await;
            return HandleOutcome::RateLimited;
        }

        let preview: String = query.chars().take(50).collect();
        log::info!("Processing query from {}: {}...", name, preview);

        let instructions = prompts::current_instructions();
        let answer = match tokio::time::timeout(
            self.agent_timeout,
            self.agent.run(&instructions, &query),
        )
        .await
        {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => return self.agent_failed(channel, name, e).await,
            Err(_) => {
                return self
                    .agent_failed(channel, name, AgentError::Timeout(self.agent_timeout))
                    .await
            }
        };

        log::info!(
            "Generated response for {} ({} characters)",
            name,
            answer.chars().count()
        );

        let outcome = self.dispatcher.send(channel, &answer).await;
        match &outcome {
            DeliveryOutcome::Delivered { chunks } => {
                log::info!("Delivered answer to {} in {} message(s)", name, chunks)
            }
            DeliveryOutcome::Overloaded {
                delivered,
                total,
                retry_after,
            } => log::warn!(
                "Delivery to {} stopped after {}/{} chunks, transport asked to wait {} seconds",
                name,
                delivered,
                total,
                retry_after.as_secs()
            ),
            DeliveryOutcome::Rejected { reason, .. } => {
                log::error!("Delivery to {} was rejected: {}", name, reason)
            }
        }
        HandleOutcome::Dispatched(outcome)
    }

    async fn agent_failed(
        &self,
        channel: &dyn ReplyChannel,
        name: &str,
        err: AgentError,
    ) -> HandleOutcome {
        match &err {
            AgentError::RateLimited { retry_after } => log::warn!(
                "Rate limit exceeded during agent execution for {}: {} seconds",
                name,
                retry_after.as_secs()
            ),
            other => log::error!("Error processing query for {}: {}", name, other),
        }
        reply(channel, &agent_error_reply(&err)).await;
        HandleOutcome::AgentFailed(err.to_string())
    }
}

/// Single best-effort reply; failures are logged and never retried.
async fn reply(channel: &dyn ReplyChannel, text: &str) {
    match channel.send_text(text).await {
        SendOutcome::Sent => {}
        SendOutcome::Overloaded(wait) => log::warn!(
            "Rate limit exceeded while sending reply: {} seconds",
            wait.as_secs()
        ),
        SendOutcome::Rejected(reason) => log::error!("Failed to send reply: {}", reason),
    }
}
