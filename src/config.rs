//! Game configuration
//!
//! All timing constants of the game are policy values, not computed: the
//! pre-roll before playback, the settle delay after it, the feedback and reset
//! delays after evaluation, the set of pattern lengths and pulse gaps, and the
//! matching tolerance. Defaults reproduce the shipped game exactly; a TOML
//! file under the user config directory can override them.
//!
//! Loading is fail-safe: a missing or unparsable file degrades to defaults
//! with a warning rather than preventing startup.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = ".config/vibeup";
const CONFIG_FILE: &str = "config.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field failed validation
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Delays around playback and evaluation, all in milliseconds.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct TimingConfig {
    /// Pause between the starting tap and the first pulse of playback
    pub preroll_ms: u64,
    /// Pause after the last pulse before input is accepted
    pub settle_ms: u64,
    /// Pause between evaluation and the feedback effect
    pub feedback_delay_ms: u64,
    /// Pause between evaluation and the reset to idle
    pub reset_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            preroll_ms: 500,
            settle_ms: 500,
            feedback_delay_ms: 750,
            reset_delay_ms: 1000,
        }
    }
}

/// Shape of generated patterns and the matching tolerance.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct PatternConfig {
    /// Allowed pattern lengths; one is drawn uniformly per round
    pub sizes: Vec<usize>,
    /// Allowed inter-pulse gaps in milliseconds
    pub gaps_ms: Vec<u64>,
    /// Maximum absolute per-element deviation that still counts as a match
    pub tolerance_ms: u64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            sizes: vec![2, 3, 4],
            gaps_ms: vec![250, 500, 750, 1000],
            tolerance_ms: 100,
        }
    }
}

/// Failure feedback effect parameters.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct FeedbackConfig {
    /// Length of the failure buzz in milliseconds
    pub fail_buzz_ms: u64,
    /// Buzz strength, 0-255
    pub fail_buzz_intensity: u8,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            fail_buzz_ms: 750,
            fail_buzz_intensity: 25,
        }
    }
}

/// Complete game configuration.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
pub struct GameConfig {
    pub timing: TimingConfig,
    pub pattern: PatternConfig,
    pub feedback: FeedbackConfig,
}

impl GameConfig {
    /// Checks that the configuration describes a playable game.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pattern.sizes.is_empty() {
            return Err(ConfigError::ValidationError(
                "Pattern size set cannot be empty".to_string(),
            ));
        }
        // Length 1 would evaluate on the first tap before anything is recorded
        if let Some(size) = self.pattern.sizes.iter().find(|s| **s < 2) {
            return Err(ConfigError::ValidationError(format!(
                "Pattern size {} is too short, minimum is 2",
                size
            )));
        }
        if self.pattern.gaps_ms.is_empty() {
            return Err(ConfigError::ValidationError(
                "Pulse gap set cannot be empty".to_string(),
            ));
        }
        if self.pattern.tolerance_ms == 0 {
            return Err(ConfigError::ValidationError(
                "Tolerance of 0ms makes the game unwinnable".to_string(),
            ));
        }
        Ok(())
    }

    /// Loads the config file if present, falling back to defaults on any error.
    pub fn load_or_default() -> Self {
        let path = match Self::config_path() {
            Some(path) => path,
            None => {
                warn!("Could not determine home directory, using default config");
                return Self::default();
            }
        };

        if !path.exists() {
            debug!("No config file at {:?}, using defaults", path);
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str::<GameConfig>(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!(
                        "Failed to parse config file {:?}: {}, using defaults",
                        path, e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                warn!(
                    "Failed to read config file {:?}: {}, using defaults",
                    path, e
                );
                Self::default()
            }
        }
    }

    fn config_path() -> Option<PathBuf> {
        let mut path = dirs::home_dir()?;
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        Some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = GameConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timing.preroll_ms, 500);
        assert_eq!(config.pattern.tolerance_ms, 100);
        assert_eq!(config.feedback.fail_buzz_intensity, 25);
    }

    #[test]
    fn rejects_empty_size_set() {
        let mut config = GameConfig::default();
        config.pattern.sizes.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_single_element_patterns() {
        let mut config = GameConfig::default();
        config.pattern.sizes = vec![1, 2];
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_tolerance() {
        let mut config = GameConfig::default();
        config.pattern.tolerance_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: GameConfig = toml::from_str(
            r#"
            [pattern]
            sizes = [3]
            gaps_ms = [500]
            tolerance_ms = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.pattern.sizes, vec![3]);
        assert_eq!(config.pattern.tolerance_ms, 50);
        // Untouched sections keep their defaults
        assert_eq!(config.timing.reset_delay_ms, 1000);
        assert_eq!(config.feedback.fail_buzz_ms, 750);
    }
}
