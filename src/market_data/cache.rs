// =============================================================================
// Candle Cache — advisory last-known series per symbol+interval
// =============================================================================
//
// Lets a consumer render the last-known bars before the history fetch
// resolves. The cache is never authoritative: a load failure is a miss, and
// fresh data always overwrites it. Writes use the tmp + rename pattern.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::market_data::series::{Candle, CandleKey};

/// On-disk payload for one series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSeries {
    pub symbol: String,
    pub interval: String,
    pub saved_at: DateTime<Utc>,
    pub candles: Vec<Candle>,
}

impl CachedSeries {
    pub fn volumes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.volume).collect()
    }
}

#[derive(Debug, Clone)]
pub struct CandleCache {
    dir: PathBuf,
}

impl CandleCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the series for `key`, e.g. `BTCUSDT_1m.json`.
    pub fn path_for(&self, key: &CandleKey) -> PathBuf {
        self.dir.join(format!("{}_{}.json", key.symbol, key.interval))
    }

    /// Load the cached series, treating any failure as a miss.
    pub fn load(&self, key: &CandleKey) -> Option<CachedSeries> {
        let path = self.path_for(key);
        if !path.exists() {
            debug!(key = %key, "no cached series");
            return None;
        }
        match self.try_load(&path) {
            Ok(series) if series.symbol == key.symbol && series.interval == key.interval => {
                debug!(key = %key, bars = series.candles.len(), saved_at = %series.saved_at, "cached series loaded");
                Some(series)
            }
            Ok(_) => {
                warn!(key = %key, path = %path.display(), "cached series belongs to another key; ignoring");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "failed to read cached series; ignoring");
                None
            }
        }
    }

    fn try_load(&self, path: &Path) -> Result<CachedSeries> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Persist `candles` for `key`, replacing whatever was cached before.
    pub fn save(&self, key: &CandleKey, candles: &[Candle]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create cache dir {}", self.dir.display()))?;

        let series = CachedSeries {
            symbol: key.symbol.clone(),
            interval: key.interval.clone(),
            saved_at: Utc::now(),
            candles: candles.to_vec(),
        };
        let content = serde_json::to_string(&series).context("failed to serialise cached series")?;

        let path = self.path_for(key);
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &path)
            .with_context(|| format!("failed to rename {} to {}", tmp_path.display(), path.display()))?;

        info!(key = %key, bars = candles.len(), "series cached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CandleKey {
        CandleKey::new("btcusdt", "1m")
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CandleCache::new(dir.path());
        let candles = vec![
            Candle::new(60, 1.0, 2.0, 0.5, 1.5, 10.0),
            Candle::new(120, 1.5, 2.5, 1.0, 2.0, 12.0),
        ];
        cache.save(&key(), &candles).unwrap();
        assert!(cache.path_for(&key()).ends_with("BTCUSDT_1m.json"));

        let loaded = cache.load(&key()).unwrap();
        assert_eq!(loaded.candles, candles);
        assert_eq!(loaded.volumes(), vec![10.0, 12.0]);
    }

    #[test]
    fn fresh_save_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CandleCache::new(dir.path());
        cache.save(&key(), &[Candle::new(60, 1.0, 1.0, 1.0, 1.0, 1.0)]).unwrap();
        cache.save(&key(), &[Candle::new(120, 2.0, 2.0, 2.0, 2.0, 2.0)]).unwrap();
        let loaded = cache.load(&key()).unwrap();
        assert_eq!(loaded.candles.len(), 1);
        assert_eq!(loaded.candles[0].time, 120);
    }

    #[test]
    fn missing_or_corrupt_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CandleCache::new(dir.path());
        assert!(cache.load(&key()).is_none());

        std::fs::write(cache.path_for(&key()), "{not json").unwrap();
        assert!(cache.load(&key()).is_none());
    }
}
