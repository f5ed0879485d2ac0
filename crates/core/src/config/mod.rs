use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{PlayerError, Result};

/// Top-level configuration structure for a player.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Nominal display refreshes per second.
    pub display_refresh_rate: f64,
    pub cache: CacheConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            display_refresh_rate: 60.0,
            cache: CacheConfig::default(),
        }
    }
}

impl PlayerConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.display_refresh_rate.is_finite() || self.display_refresh_rate <= 0.0 {
            return Err(PlayerError::Config(format!(
                "display_refresh_rate must be positive, got {}",
                self.display_refresh_rate
            )));
        }
        self.cache.validate()
    }
}

/// Configuration specific to the frame cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Intrinsic cache size. `None` derives it from the sequence's decoded size.
    pub optimal_frame_cache_size: Option<usize>,
    /// Caller-set ceiling. `None` means unlimited.
    pub max_frame_cache_size: Option<usize>,
    /// Premultiply alpha at decode time.
    pub predraw: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            optimal_frame_cache_size: None,
            max_frame_cache_size: None,
            predraw: true,
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<()> {
        if self.optimal_frame_cache_size == Some(0) {
            return Err(PlayerError::Config(
                "optimal_frame_cache_size must be at least 1".into(),
            ));
        }
        if self.max_frame_cache_size == Some(0) {
            return Err(PlayerError::Config(
                "max_frame_cache_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = PlayerConfig::from_json_str(r#"{ "cache": { "max_frame_cache_size": 4 } }"#)
            .unwrap();

        assert_eq!(config.display_refresh_rate, 60.0);
        assert_eq!(config.cache.max_frame_cache_size, Some(4));
        assert!(config.cache.predraw);
        assert_eq!(config.cache.optimal_frame_cache_size, None);
    }

    #[test]
    fn rejects_non_positive_refresh_rate() {
        let err = PlayerConfig::from_json_str(r#"{ "display_refresh_rate": 0.0 }"#).unwrap_err();
        assert!(format!("{err}").contains("display_refresh_rate"));
    }

    #[test]
    fn rejects_zero_ceiling() {
        let err =
            PlayerConfig::from_json_str(r#"{ "cache": { "max_frame_cache_size": 0 } }"#).unwrap_err();
        assert!(matches!(err, PlayerError::Config(_)));
    }
}
