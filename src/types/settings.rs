use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConsoleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    #[default]
    Paper,
    Live,
}

impl TradingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingMode::Paper => "paper",
            TradingMode::Live => "live",
        }
    }
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TradingMode {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "paper" => Ok(TradingMode::Paper),
            "live" => Ok(TradingMode::Live),
            _ => Err(ConsoleError::request(format!(
                "Unknown trading mode: {} (expected paper or live)",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingStrategy {
    /// Models change only on a manual retrain.
    #[default]
    Static,
    /// The service retrains on its own schedule.
    Dynamic,
}

impl TrainingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingStrategy::Static => "static",
            TrainingStrategy::Dynamic => "dynamic",
        }
    }
}

impl fmt::Display for TrainingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TrainingStrategy {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "static" => Ok(TrainingStrategy::Static),
            "dynamic" => Ok(TrainingStrategy::Dynamic),
            _ => Err(ConsoleError::request(format!(
                "Unknown training strategy: {} (expected static or dynamic)",
                s
            ))),
        }
    }
}

/// User settings as stored by the remote service. The client only caches it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub paper_api_key: Option<String>,
    #[serde(default)]
    pub paper_api_secret: Option<String>,
    #[serde(default)]
    pub live_api_key: Option<String>,
    #[serde(default)]
    pub live_api_secret: Option<String>,
    #[serde(default)]
    pub default_symbol: Option<String>,
    #[serde(default)]
    pub default_strategy: Option<String>,
    #[serde(default)]
    pub max_daily_drawdown_pct: Option<f64>,
    #[serde(default)]
    pub trading_mode: TradingMode,
    #[serde(default)]
    pub training_strategy: TrainingStrategy,
}

impl Settings {
    pub fn symbol(&self) -> Option<&str> {
        self.default_symbol
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn strategy(&self) -> Option<&str> {
        self.default_strategy
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Keys for the active trading mode, if both halves are filled in.
    pub fn active_credentials(&self) -> Option<(&str, &str)> {
        let (key, secret) = match self.trading_mode {
            TradingMode::Paper => (&self.paper_api_key, &self.paper_api_secret),
            TradingMode::Live => (&self.live_api_key, &self.live_api_secret),
        };
        match (key.as_deref(), secret.as_deref()) {
            (Some(k), Some(s)) if !k.is_empty() && !s.is_empty() => Some((k, s)),
            _ => None,
        }
    }
}
