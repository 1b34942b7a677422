// In crates/app-config/src/types.rs

use core_types::Timeframe;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

pub use fusion::types::FusionSettings;
pub use risk::types::RiskSettings;

#[derive(Deserialize, Debug, Clone)]
pub struct Settings {
    /// The application's general settings.
    pub app: AppSettings,
    /// Settings for the Binance API.
    pub binance: BinanceSettings,
    /// Settings for the language-model oracle.
    pub oracle: OracleSettings,
    /// Settings for the trade ledger.
    pub ledger: LedgerSettings,
    pub engine: EngineSettings,
    pub fusion: FusionSettings,
    pub risk: RiskSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub simulation: SimulationSettings,
    #[serde(default)]
    pub notifier: NotifierSettings,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppSettings {
    /// The environment the application is running in (e.g., "development", "production").
    pub environment: String,
    /// The log level for the application.
    pub log_level: String,
    /// Directory for the daily rolling log file. No file logging when unset.
    #[serde(default)]
    pub log_dir: Option<String>,
    /// Simulate fills locally instead of sending orders to the exchange.
    #[serde(default = "default_true")]
    pub dry_run: bool,
}

#[derive(Deserialize, Debug, Clone)]
pub struct BinanceSettings {
    /// The API key for Binance.
    #[serde(default)]
    pub api_key: String,
    /// The secret key for Binance.
    #[serde(default)]
    pub secret_key: String,
    /// The REST API base URL for Binance futures.
    pub rest_base_url: String,
    /// Signed requests are rejected by the exchange after this many milliseconds.
    #[serde(default = "default_recv_window")]
    pub recv_window: u64,
    /// Per-request HTTP timeout.
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct OracleSettings {
    /// OpenRouter API key.
    #[serde(default)]
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_oracle_timeout")]
    pub timeout_secs: u64,
    /// Rationales longer than this are truncated.
    #[serde(default = "default_max_reasoning_length")]
    pub max_reasoning_length: usize,
    #[serde(default = "default_oracle_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

#[derive(Deserialize, Debug, Clone)]
pub struct LedgerSettings {
    /// SQLite connection URL, e.g. `sqlite://data/ledger.db?mode=rwc`.
    pub url: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct EngineSettings {
    /// The single traded instrument, e.g. `BTCUSDT`.
    pub symbol: String,
    /// Seconds between signal cycles (feed + oracle + fusion).
    pub signal_interval_secs: u64,
    /// Seconds between protective cycles (price + fills).
    pub price_interval_secs: u64,
    /// Bound on one indicator feed poll.
    #[serde(default = "default_feed_timeout")]
    pub feed_timeout_secs: u64,
    /// Bound on one gateway call.
    #[serde(default = "default_gateway_timeout")]
    pub gateway_timeout_secs: u64,
    /// An order still not filled after this long is cancelled.
    #[serde(default = "default_fill_timeout")]
    pub fill_timeout_secs: u64,
    /// Open positions older than this are force-closed. Disabled when unset.
    #[serde(default)]
    pub max_hold_secs: Option<u64>,
    /// Candles fetched per timeframe.
    #[serde(default = "default_kline_limit")]
    pub kline_limit: u16,
    /// How long a timeframe's snapshot is reused before it is refetched.
    #[serde(default)]
    pub cache_ttl: Vec<CacheTtl>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct CacheTtl {
    pub timeframe: Timeframe,
    pub ttl_secs: u64,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RetrySettings {
    /// Total attempts per submission, the first one included.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_attempts: 3, initial_backoff_ms: 500, max_backoff_ms: 8_000 }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SimulationSettings {
    /// Starting quote balance of the simulated account.
    pub initial_balance: Decimal,
    /// The taker fee for the exchange (e.g., 0.0004 for 0.04%).
    pub taker_fee: Decimal,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self { initial_balance: dec!(10000), taker_fee: dec!(0.0004) }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct NotifierSettings {
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
}

impl NotifierSettings {
    pub fn is_configured(&self) -> bool {
        matches!((&self.telegram_bot_token, &self.telegram_chat_id), (Some(t), Some(c)) if !t.is_empty() && !c.is_empty())
    }
}

/// Helper functions for serde defaults
fn default_true() -> bool { true }
fn default_recv_window() -> u64 { 5_000 }
fn default_http_timeout() -> u64 { 10 }
fn default_oracle_timeout() -> u64 { 45 }
fn default_max_reasoning_length() -> usize { 1_000 }
fn default_oracle_attempts() -> u32 { 3 }
fn default_temperature() -> f32 { 0.2 }
fn default_feed_timeout() -> u64 { 20 }
fn default_gateway_timeout() -> u64 { 10 }
fn default_fill_timeout() -> u64 { 30 }
fn default_kline_limit() -> u16 { 100 }
