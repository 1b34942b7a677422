// In app/src/notifier.rs

use anyhow::{Context, Result};
use app_config::types::NotifierSettings;
use core_types::{RecordKind, TradeRecord};
use events::{Alert, EngineEvent, Severity};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Pushes opens, closes and alerts to a Telegram chat.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    url: String,
    chat_id: String,
}

impl TelegramNotifier {
    /// `None` unless both the bot token and the chat id are configured.
    pub fn from_settings(settings: &NotifierSettings) -> Option<Self> {
        if !settings.is_configured() {
            return None;
        }
        let token = settings.telegram_bot_token.as_deref()?;
        let chat_id = settings.telegram_chat_id.as_deref()?;
        Some(Self::new(TELEGRAM_API, token, chat_id))
    }

    pub fn new(base_url: &str, token: &str, chat_id: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/bot{}/sendMessage", base_url.trim_end_matches('/'), token),
            chat_id: chat_id.to_string(),
        }
    }

    pub async fn send(&self, text: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&SendMessage { chat_id: &self.chat_id, text })
            .send()
            .await
            .context("telegram request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("telegram returned {status}: {body}");
        }
        Ok(())
    }

    /// Forwards engine events until `cancel` fires. Events already queued
    /// when it fires are still sent.
    pub async fn run(self, mut events: broadcast::Receiver<EngineEvent>, cancel: CancellationToken) {
        tracing::info!("Telegram notifier started.");
        loop {
            let event = tokio::select! {
                biased;
                event = events.recv() => event,
                _ = cancel.cancelled() => break,
            };
            match event {
                Ok(event) => {
                    let Some(text) = format_event(&event) else {
                        continue;
                    };
                    if let Err(e) = self.send(&text).await {
                        tracing::warn!(error = %e, "Notification not delivered.");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Notifier fell behind, events dropped.");
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::info!("Telegram notifier stopped.");
    }
}

/// The message for an event, if it is worth a notification.
pub fn format_event(event: &EngineEvent) -> Option<String> {
    match event {
        EngineEvent::TradeRecorded(record) => format_record(record),
        EngineEvent::Alert(alert) => format_alert(alert),
    }
}

fn format_record(record: &TradeRecord) -> Option<String> {
    let pos = &record.position;
    let side = pos.side.map(|s| s.to_string()).unwrap_or_default();
    let prefix = if record.simulated { "[DRY RUN] " } else { "" };
    let text = match record.kind {
        RecordKind::Opened => format!(
            "Opened {side} {} {} at {}\nStop {} / Take {} / Leverage x{}",
            pos.size,
            record.instrument,
            pos.entry_price.unwrap_or_default(),
            pos.stop_loss.unwrap_or_default(),
            pos.take_profit.unwrap_or_default(),
            pos.leverage
        ),
        RecordKind::Closed => {
            let reason = record.close_reason.map(|r| r.to_string()).unwrap_or_default();
            format!(
                "Closed {side} {} {} at {} ({reason})\nPnL {}",
                pos.size,
                record.instrument,
                pos.exit_price.unwrap_or_default(),
                pos.realized_pnl.unwrap_or_default().round_dp(2)
            )
        }
        RecordKind::Reconciled => format!("Reconciled {}: {}", record.instrument, record.detail),
        _ => return None,
    };
    Some(format!("{prefix}{text}"))
}

fn format_alert(alert: &Alert) -> Option<String> {
    (alert.severity >= Severity::Warning).then(|| format!("[{}] {}", alert.severity, alert.message))
}
