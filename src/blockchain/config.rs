//! Chain configuration

use serde::Deserialize;
use thiserror::Error;

use std::path::Path;

/// Largest satisfiable difficulty: every hex digit of a SHA-256 hash is zero
pub const MAX_DIFFICULTY: u8 = 64;

/// Errors raised by invalid configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Difficulty {0} exceeds the maximum of 64")]
    DifficultyTooHigh(u8),

    #[error("Invalid reward amount: {0}")]
    InvalidReward(f64),

    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Constants fixed at blockchain construction
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChainConfig {
    /// Number of leading zero hex digits a block hash must have
    #[serde(default = "default_difficulty")]
    pub difficulty: u8,

    /// Amount credited to the miners of each block, before fees
    #[serde(default = "default_reward_amount")]
    pub reward_amount: f64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            difficulty: default_difficulty(),
            reward_amount: default_reward_amount(),
        }
    }
}

impl ChainConfig {
    pub fn new(difficulty: u8, reward_amount: f64) -> Self {
        ChainConfig {
            difficulty,
            reward_amount,
        }
    }

    /// Loads a JSON config file; missing fields fall back to defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: ChainConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would make mining unsatisfiable or rewards meaningless
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::DifficultyTooHigh(self.difficulty));
        }

        if !self.reward_amount.is_finite() || self.reward_amount < 0.0 {
            return Err(ConfigError::InvalidReward(self.reward_amount));
        }

        Ok(())
    }
}

fn default_difficulty() -> u8 {
    4
}

fn default_reward_amount() -> f64 {
    50.0
}
