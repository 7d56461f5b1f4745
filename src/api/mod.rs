pub mod client;

pub use client::*;

use async_trait::async_trait;

use crate::auth::Credential;
use crate::error::Result;
use crate::types::{BacktestReport, BotRequest, Settings, TradeRecord, TradingMode, TrainingStrategy};

/// Everything the console can ask of the remote trading service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BotApi: Send + Sync {
    /// Attach `credential` to every following request.
    fn set_credential(&self, credential: &Credential);
    fn clear_credential(&self);
    fn has_credential(&self) -> bool;

    async fn issue_token(&self, username: &str, password: &str) -> Result<Credential>;
    async fn register(&self, username: &str, password: &str) -> Result<String>;

    async fn get_settings(&self) -> Result<Settings>;
    async fn save_settings(&self, settings: &Settings) -> Result<Settings>;
    async fn set_trading_mode(&self, mode: TradingMode) -> Result<TradingMode>;
    async fn set_training_strategy(&self, strategy: TrainingStrategy) -> Result<TrainingStrategy>;

    async fn bot_status(&self, exchange: &str, symbol: &str) -> Result<bool>;
    async fn start_bot(&self, request: &BotRequest) -> Result<()>;
    async fn stop_bot(&self, request: &BotRequest) -> Result<()>;

    async fn trade_history(&self) -> Result<Vec<TradeRecord>>;
    async fn run_backtest(&self, exchange: &str, symbol: &str) -> Result<BacktestReport>;
    async fn download_data(&self, exchange: &str, symbol: &str) -> Result<String>;
    async fn train_model(&self) -> Result<String>;
    async fn list_models(&self) -> Result<Vec<String>>;
    async fn delete_model(&self, name: &str) -> Result<()>;
}
