//! Webhook HTTP server powered by axum.
//!
//! Serves:
//! - `POST /webhook`        : Telegram updates
//! - `GET  /health`         : liveness, 503 while draining
//! - `GET  /`               : service banner
//! - `GET  /webhook-status` : current Telegram webhook registration

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::Update;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;

use crate::agent::OpenAiAgent;
use crate::config::Config;
use crate::dispatcher::ResponseDispatcher;
use crate::handler::RequestHandler;
use crate::lifecycle::Lifecycle;
use crate::rate_limiter::RateGate;
use crate::telegram::{self, ChatReply};
use crate::tools::WikipediaSearch;

/// Shared state for the webhook server.
#[derive(Clone)]
pub struct AppState {
    pub bot: Bot,
    pub bot_username: Arc<str>,
    pub telegram_ready: bool,
    pub handler: Arc<RequestHandler>,
    pub lifecycle: Lifecycle,
    pub tracker: TaskTracker,
    pub started: Instant,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/webhook-status", get(webhook_status))
        .route("/webhook", post(webhook))
        .with_state(state)
}

/// POST /webhook: parse the update and handle any `/ask` on a tracked task.
///
/// The body is parsed from raw bytes: teloxide's `Update` does not deserialize
/// correctly from an intermediate `serde_json::Value`. Malformed bodies still
/// answer 200 so Telegram does not redeliver them.
async fn webhook(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    if state.lifecycle.is_draining() {
        log::info!("Ignoring webhook during shutdown");
        return Json(json!({ "status": "shutting_down" }));
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            log::error!("Error processing webhook: {}", e);
            return Json(json!({ "status": "error", "message": e.to_string() }));
        }
    };
    log::info!("Received webhook update: {}", update.id);

    if let Some(ask) = telegram::extract_ask(&update, &state.bot_username) {
        let handler = state.handler.clone();
        let channel = ChatReply::new(state.bot.clone(), ask.chat_id);
        state.tracker.spawn(async move {
            handler.handle(&ask.request, &channel).await;
        });
    }

    log::info!("Successfully processed webhook update: {}", update.id);
    Json(json!({ "status": "ok" }))
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    if state.lifecycle.is_draining() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "shutting_down", "detail": "Service is shutting down" })),
        );
    }
    let telegram_status = if state.telegram_ready {
        "connected"
    } else {
        "not_initialized"
    };
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "knoll-bot",
            "uptime": state.started.elapsed().as_secs_f64(),
            "telegram_status": telegram_status,
            "in_flight": state.tracker.len(),
            "tracked_users": state.handler.gate().tracked_users(),
        })),
    )
}

/// GET /
async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "message": "Knoll Bot is running",
        "status": "healthy",
        "uptime": state.started.elapsed().as_secs_f64(),
        "shutdown": state.lifecycle.is_draining(),
    }))
}

/// GET /webhook-status
async fn webhook_status(State(state): State<AppState>) -> Json<Value> {
    Json(telegram::webhook_status(&state.bot).await)
}

async fn shutdown_signal(lifecycle: Lifecycle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("Received SIGINT, initiating graceful shutdown..."),
        _ = terminate => log::info!("Received SIGTERM, initiating graceful shutdown..."),
    }
    lifecycle.begin_draining();
}

/// Start the bot: register the webhook, serve until a shutdown signal, then
/// drain in-flight commands and unregister.
pub async fn run(config: Config) -> anyhow::Result<()> {
    config.validate()?;
    let addr = config.listen_addr()?;

    log::info!("Starting application...");
    let bot = Bot::new(&config.telegram_token);
    let lifecycle = Lifecycle::new();

    let http = reqwest::Client::builder()
        .user_agent(concat!("knoll-bot/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let agent = OpenAiAgent::new(
        http.clone(),
        config.agent_settings(),
        WikipediaSearch::new(http, &config.wikipedia_api_url),
    );
    let handler = Arc::new(RequestHandler::new(
        RateGate::with_capacity(config.min_interval_secs, config.gate_capacity),
        Arc::new(agent),
        ResponseDispatcher::new(config.dispatch_config()),
        lifecycle.clone(),
        config.agent_timeout(),
    ));

    let (bot_username, telegram_ready) = match telegram::bot_identity(&bot).await {
        Ok(me) => (me.user.username.clone().unwrap_or_default(), true),
        Err(e) => {
            log::warn!("Failed to initialize Telegram bot: {}", e);
            log::info!("Continuing without Telegram bot initialization");
            (String::new(), false)
        }
    };
    let webhook_configured = telegram_ready
        && telegram::register_webhook(&bot, config.webhook_url.as_deref()).await;

    let tracker = TaskTracker::new();
    let state = AppState {
        bot: bot.clone(),
        bot_username: bot_username.into(),
        telegram_ready,
        handler,
        lifecycle: lifecycle.clone(),
        tracker: tracker.clone(),
        started: Instant::now(),
    };

    log::info!("Knoll bot listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal(lifecycle.clone()))
        .await?;

    log::info!("Shutting down application...");
    tracker.close();
    if tokio::time::timeout(config.drain_timeout(), tracker.wait())
        .await
        .is_err()
    {
        log::warn!(
            "{} command(s) still running after {} seconds, abandoning them",
            tracker.len(),
            config.drain_timeout_secs
        );
    }
    if webhook_configured {
        telegram::unregister_webhook(&bot).await;
    }
    lifecycle.mark_stopped();
    log::info!("Shutdown complete");
    Ok(())
}
