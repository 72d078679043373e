//! Telegram notifier. Fire-and-forget: sends are spawned and delivery
//! failures only logged.

use crate::config::TelegramConfig;
use crate::domain::ports::Notifier;
use crate::infrastructure::http_client::HttpClientFactory;
use reqwest_middleware::ClientWithMiddleware;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct TelegramNotifier {
    http: Arc<ClientWithMiddleware>,
    bot_token: String,
    chat_id: String,
    enabled: bool,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            http: Arc::new(HttpClientFactory::create_client()),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
            enabled: config.enabled && !config.bot_token.is_empty() && !config.chat_id.is_empty(),
        }
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, message: String) {
        if !self.enabled {
            debug!("notification (telegram disabled): {message}");
            return;
        }
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let chat_id = self.chat_id.clone();
        let http = self.http.clone();
        tokio::spawn(async move {
            let body = serde_json::json!({
                "chat_id": chat_id,
                "text": message,
                "disable_web_page_preview": true,
            });
            match http.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => warn!("telegram send failed: HTTP {}", resp.status()),
                Err(e) => warn!("telegram send failed: {e}"),
            }
        });
    }
}

/// Log-only notifier for dry runs and tests.
#[derive(Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: String) {
        tracing::info!("notification: {message}");
    }
}
