//! Telegram notifications for trade events.
//!
//! Disabled unless both `TELEGRAM_KEY` and `TELEGRAM_GROUP_ID` are set.
//! Sends never block the trading path and failures are only logged.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::Client;
use tracing::{debug, warn};

/// Identical messages within this window are sent once.
const DEDUP_WINDOW: Duration = Duration::from_secs(10);
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct Deduper {
    seen: HashMap<String, Instant>,
}

impl Deduper {
    /// True when `text` should be sent now. Records the send time.
    fn should_send(&mut self, text: &str) -> bool {
        let now = Instant::now();
        self.seen.retain(|_, sent| now.duration_since(*sent) < DEDUP_WINDOW);

        if self.seen.contains_key(text) {
            return false;
        }
        self.seen.insert(text.to_string(), now);
        true
    }
}

/// Telegram notifier. Cheap to clone via `Arc`.
pub struct Notifier {
    client: Client,
    token: Option<String>,
    chat_id: Option<String>,
    dedup: Mutex<Deduper>,
}

impl Notifier {
    /// Build from the environment. Always succeeds; missing credentials
    /// produce a disabled notifier.
    pub fn from_env() -> Result<Arc<Self>> {
        let client = Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Arc::new(Self {
            client,
            token: std::env::var("TELEGRAM_KEY").ok(),
            chat_id: std::env::var("TELEGRAM_GROUP_ID").ok(),
            dedup: Mutex::new(Deduper::default()),
        }))
    }

    pub fn enabled(&self) -> bool {
        self.token.is_some() && self.chat_id.is_some()
    }

    /// Fire-and-forget send. Returns immediately; the request runs on a
    /// detached task.
    pub fn notify(self: &Arc<Self>, text: String) {
        if !self.enabled() {
            debug!("notifications disabled, dropping message");
            return;
        }
        if !self.dedup.lock().unwrap().should_send(&text) {
            debug!("duplicate notification suppressed");
            return;
        }

        let notifier = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = notifier.send(&text).await {
                warn!(error = %err, "failed to send notification");
            }
        });
    }

    async fn send(&self, text: &str) -> Result<()> {
        let (Some(token), Some(chat_id)) = (&self.token, &self.chat_id) else {
            return Ok(());
        };

        let url = format!("https://api.telegram.org/bot{}/sendMessage", token);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": text,
            }))
            .send()
            .await
            .context("Telegram request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Telegram send failed: {} - {}", status, body);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deduper_suppresses_within_window() {
        let mut dedup = Deduper::default();
        assert!(dedup.should_send("opened LONG IP/USDT:USDT"));
        assert!(!dedup.should_send("opened LONG IP/USDT:USDT"));
        // a different message passes through
        assert!(dedup.should_send("closed LONG IP/USDT:USDT"));
    }

    #[test]
    fn test_deduper_forgets_old_entries() {
        let mut dedup = Deduper::default();
        dedup.seen.insert(
            "stale".to_string(),
            Instant::now() - DEDUP_WINDOW - Duration::from_secs(1),
        );
        assert!(dedup.should_send("stale"));
    }

    #[test]
    fn test_disabled_without_credentials() {
        // from_env may see real credentials; construct directly
        let notifier = Notifier {
            client: Client::new(),
            token: None,
            chat_id: None,
            dedup: Mutex::new(Deduper::default()),
        };
        assert!(!notifier.enabled());
    }
}
