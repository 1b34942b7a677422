// In crates/feed/src/lib.rs

use api_client::ApiClient;
use app_config::types::EngineSettings;
use async_trait::async_trait;
use chrono::Utc;
use core_types::{IndicatorSnapshot, Kline, Symbol, Timeframe};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};

pub mod error;
pub mod indicators;

pub use error::{Error, Result};

/// Supplies the latest indicator snapshot per timeframe.
#[async_trait]
pub trait IndicatorFeed: Send + Sync {
    /// Timeframes that could not be refreshed are left out of the map.
    async fn snapshots(&self) -> BTreeMap<Timeframe, IndicatorSnapshot>;
}

/// Where candles come from.
#[async_trait]
pub trait KlineSource: Send + Sync {
    async fn klines(&self, symbol: &Symbol, timeframe: Timeframe, limit: u16) -> Result<Vec<Kline>>;
}

#[async_trait]
impl KlineSource for ApiClient {
    async fn klines(&self, symbol: &Symbol, timeframe: Timeframe, limit: u16) -> Result<Vec<Kline>> {
        Ok(self.get_klines(symbol, timeframe, Some(limit)).await?)
    }
}

#[derive(Debug, Clone)]
struct Cached {
    snapshot: IndicatorSnapshot,
    fetched_at: Instant,
}

/// Computes snapshots from exchange candles, reusing each timeframe's last
/// snapshot until its TTL runs out.
pub struct KlineIndicatorFeed {
    source: Arc<dyn KlineSource>,
    symbol: Symbol,
    timeframes: Vec<Timeframe>,
    limit: u16,
    ttl: HashMap<Timeframe, Duration>,
    cache: Mutex<HashMap<Timeframe, Cached>>,
}

impl KlineIndicatorFeed {
    pub fn new(source: Arc<dyn KlineSource>, settings: &EngineSettings, timeframes: Vec<Timeframe>) -> Self {
        let ttl = settings
            .cache_ttl
            .iter()
            .map(|c| (c.timeframe, Duration::from_secs(c.ttl_secs)))
            .collect();
        Self {
            source,
            symbol: Symbol::new(&settings.symbol),
            timeframes,
            limit: settings.kline_limit,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, timeframe: Timeframe) -> Option<Cached> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.get(&timeframe).cloned()
    }

    fn store(&self, snapshot: IndicatorSnapshot) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(snapshot.timeframe, Cached { snapshot, fetched_at: Instant::now() });
    }

    async fn refresh(&self, timeframe: Timeframe, previous: Option<&IndicatorSnapshot>) -> Result<IndicatorSnapshot> {
        let now_ms = Utc::now().timestamp_millis();
        let mut klines = self.source.klines(&self.symbol, timeframe, self.limit).await?;
        // The exchange includes the candle still being formed.
        klines.retain(|k| k.close_time < now_ms);

        let snapshot = indicators::snapshot(timeframe, &klines)?;
        if let Some(prev) = previous {
            if snapshot.timestamp < prev.timestamp {
                return Err(Error::NonMonotonic { timeframe });
            }
        }
        Ok(snapshot)
    }
}

#[async_trait]
impl IndicatorFeed for KlineIndicatorFeed {
    async fn snapshots(&self) -> BTreeMap<Timeframe, IndicatorSnapshot> {
        let mut out = BTreeMap::new();
        for &timeframe in &self.timeframes {
            let cached = self.cached(timeframe);
            let ttl = self.ttl.get(&timeframe).copied().unwrap_or_default();
            if let Some(c) = &cached {
                if c.fetched_at.elapsed() < ttl {
                    out.insert(timeframe, c.snapshot.clone());
                    continue;
                }
            }

            match self.refresh(timeframe, cached.as_ref().map(|c| &c.snapshot)).await {
                Ok(snapshot) => {
                    tracing::debug!(%timeframe, close = %snapshot.close, trend = ?snapshot.trend, "Indicator snapshot refreshed.");
                    self.store(snapshot.clone());
                    out.insert(timeframe, snapshot);
                }
                Err(Error::NonMonotonic { .. }) => {
                    tracing::warn!(%timeframe, "Exchange returned an older candle, keeping the previous snapshot.");
                    if let Some(c) = cached {
                        out.insert(timeframe, c.snapshot);
                    }
                }
                Err(e) => {
                    tracing::warn!(%timeframe, error = %e, "Timeframe unavailable this cycle.");
                }
            }
        }
        out
    }
}
