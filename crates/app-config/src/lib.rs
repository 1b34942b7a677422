// In crates/app-config/src/lib.rs

use config::{Config, Environment, File};

pub mod error;
pub mod types;

// Re-export the most important types for easy access.
pub use error::{Error, Result};
pub use types::Settings;

/// Loads the application settings from various sources.
///
/// This function orchestrates the layered configuration loading:
/// 1. Reads from a default `base.toml` file.
/// 2. Merges settings from an environment-specific file (e.g., `production.toml`).
/// 3. Merges settings from environment variables (`APP__ENGINE__SYMBOL=ETHUSDT`).
///
/// The result is validated before it is returned.
pub fn load_settings() -> Result<Settings> {
    // Get the current environment. Default to "development" if not set.
    let environment = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "development".into());
    load_settings_from("config", &environment)
}

/// Same as [`load_settings`] with an explicit config directory and environment.
pub fn load_settings_from(dir: &str, environment: &str) -> Result<Settings> {
    let settings = Config::builder()
        .add_source(File::with_name(&format!("{}/base", dir)))
        .add_source(File::with_name(&format!("{}/{}", dir, environment)).required(false))
        .add_source(Environment::with_prefix("APP").prefix_separator("__").separator("__"))
        .build()?;

    let settings: Settings = settings.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

impl Settings {
    /// Checks cross-field constraints the type system cannot express.
    pub fn validate(&self) -> Result<()> {
        self.fusion.validate()?;

        if self.engine.symbol.trim().is_empty() {
            return Err(Error::Invalid("engine.symbol must not be empty".into()));
        }
        if self.engine.signal_interval_secs == 0 || self.engine.price_interval_secs == 0 {
            return Err(Error::Invalid("engine intervals must be positive".into()));
        }
        if self.engine.price_interval_secs > self.engine.signal_interval_secs {
            return Err(Error::Invalid(
                "engine.price_interval_secs must not exceed engine.signal_interval_secs".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if !self.app.dry_run && (self.binance.api_key.is_empty() || self.binance.secret_key.is_empty()) {
            return Err(Error::Invalid("live trading requires binance.api_key and binance.secret_key".into()));
        }
        Ok(())
    }
}
