use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Body of `/bot/start` and `/bot/stop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotRequest {
    pub exchange: String,
    pub symbol: String,
    pub strategy: String,
}

impl BotRequest {
    pub fn new(
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        strategy: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
            strategy: strategy.into(),
        }
    }
}

impl fmt::Display for BotRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.exchange, self.symbol, self.strategy)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: i64,
    pub symbol: String,
    #[serde(default)]
    pub entry_reason: Option<String>,
    pub entry_price: Decimal,
    pub entry_timestamp: NaiveDateTime,
    #[serde(default)]
    pub exit_price: Option<Decimal>,
    #[serde(default)]
    pub exit_timestamp: Option<NaiveDateTime>,
    #[serde(default)]
    pub profit_loss_pct: Option<Decimal>,
}

impl TradeRecord {
    pub fn is_open(&self) -> bool {
        self.exit_timestamp.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TradeSummary {
    pub total_trades: usize,
    pub open_trades: usize,
    pub closed_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub total_pnl_pct: Decimal,
}

impl TradeSummary {
    pub fn from_trades(trades: &[TradeRecord]) -> Self {
        let mut summary = TradeSummary {
            total_trades: trades.len(),
            ..Default::default()
        };

        for trade in trades {
            if trade.is_open() {
                summary.open_trades += 1;
                continue;
            }
            summary.closed_trades += 1;

            let pnl = trade.profit_loss_pct.unwrap_or(Decimal::ZERO);
            if pnl > Decimal::ZERO {
                summary.winning_trades += 1;
            } else if pnl < Decimal::ZERO {
                summary.losing_trades += 1;
            }
            summary.total_pnl_pct += pnl;
        }

        summary
    }

    /// Percentage of closed trades that made money.
    pub fn win_rate(&self) -> Decimal {
        if self.closed_trades == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(self.winning_trades) / Decimal::from(self.closed_trades)
                * Decimal::from(100)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub total_return: f64,
    pub trades: u32,
    pub win_rate: f64,
    #[serde(default)]
    pub timestamps: Vec<String>,
    #[serde(default)]
    pub pnl_curve: Vec<f64>,
}

impl BacktestReport {
    /// Lowest point of the cumulative P&L curve, in percent.
    pub fn worst_drawdown(&self) -> Option<f64> {
        self.pnl_curve.iter().copied().reduce(f64::min)
    }
}
