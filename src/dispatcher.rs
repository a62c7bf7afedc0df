use async_trait::async_trait;
use std::time::Duration;

/// Telegram's hard limit on the length of a single text message.
pub const MAX_CHUNK: usize = 4096;

/// Result of handing one piece of text to the chat transport.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Sent,
    /// The transport asked us to back off for the given time.
    Overloaded(Duration),
    Rejected(String),
}

/// Where replies for one inbound command go.
#[async_trait]
pub trait ReplyChannel: Send + Sync {
    async fn send_text(&self, text: &str) -> SendOutcome;
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Delivered {
        chunks: usize,
    },
    /// Aborted after `delivered` of `total` chunks because the transport is overloaded.
    Overloaded {
        delivered: usize,
        total: usize,
        retry_after: Duration,
    },
    Rejected {
        delivered: usize,
        total: usize,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub max_chunk: usize,
    /// Applied once before the first chunk.
    pub lead_delay: Duration,
    /// Applied between consecutive chunks.
    pub chunk_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_chunk: MAX_CHUNK,
            lead_delay: Duration::from_secs(1),
            chunk_delay: Duration::from_secs(1),
        }
    }
}

/// Split `text` into pieces of at most `max_chars` characters.
///
/// Splits never land inside a UTF-8 sequence and ignore word boundaries.
/// Always yields at least one chunk.
///
/// Length is counted in `char`s, while Telegram counts UTF-16 code units. A
/// chunk dense with astral-plane characters (most emoji) can exceed the
/// transport limit and come back as `SendOutcome::Rejected`.
pub fn split_chunks(text: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in text.char_indices() {
        if count == max_chars {
            chunks.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    chunks.push(&text[start..]);
    chunks
}

pub fn overload_notice(retry_after: Duration) -> String {
    format!(
        "Response ready but rate limited. Please wait {} seconds before asking again.",
        retry_after.as_secs()
    )
}

/// Sends a finished answer over a reply channel, chunked and paced.
pub struct ResponseDispatcher {
    config: DispatchConfig,
}

impl ResponseDispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub async fn send(&self, channel: &dyn ReplyChannel, text: &str) -> DeliveryOutcome {
        tokio::time::sleep(self.config.lead_delay).await;

        let chunks = split_chunks(text, self.config.max_chunk);
        let total = chunks.len();
        if total > 1 {
            log::info!("Splitting response into {} chunks", total);
        }

        for (i, chunk) in chunks.iter().enumerate() {
            match channel.send_text(chunk).await {
                SendOutcome::Sent => {}
                SendOutcome::Overloaded(retry_after) => {
                    log::warn!(
                        "Rate limit exceeded while sending chunk {}/{}. Retry in {} seconds",
                        i + 1,
                        total,
                        retry_after.as_secs()
                    );
                    if total == 1 {
                        self.notify_overload(channel, retry_after).await;
                    }
                    return DeliveryOutcome::Overloaded {
                        delivered: i,
                        total,
                        retry_after,
                    };
                }
                SendOutcome::Rejected(reason) => {
                    log::error!("Failed to send chunk {}/{}: {}", i + 1, total, reason);
                    return DeliveryOutcome::Rejected {
                        delivered: i,
                        total,
                        reason,
                    };
                }
            }
            if i + 1 < total {
                tokio::time::sleep(self.config.chunk_delay).await;
            }
        }

        DeliveryOutcome::Delivered { chunks: total }
    }

    async fn notify_overload(&self, channel: &dyn ReplyChannel, retry_after: Duration) {
        match channel.send_text(&overload_notice(retry_after)).await {
            SendOutcome::Sent => {}
            SendOutcome::Overloaded(wait) => {
                log::warn!("Error sending rate limit message: retry in {} seconds", wait.as_secs())
            }
            SendOutcome::Rejected(reason) => {
                log::warn!("Error sending rate limit message: {}", reason)
            }
        }
    }
}

impl Default for ResponseDispatcher {
    fn default() -> Self {
        Self::new(DispatchConfig::default())
    }
}
