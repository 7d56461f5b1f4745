use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bot_console::config::ClientConfig;
use bot_console::session::SessionContext;
use bot_console::types::{Settings, TradeSummary, TradingMode, TrainingStrategy};

#[derive(Parser)]
#[command(name = "bot-console")]
#[command(version)]
#[command(about = "Command-line console for a remote trading bot service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (default: bot_console.toml, if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and persist the session token
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// Create a new account
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// Forget the persisted session
    Logout,
    /// Show session, settings and bot state
    Status,
    /// Start the bot
    Start {
        #[arg(short, long)]
        exchange: Option<String>,
        #[arg(short, long)]
        symbol: Option<String>,
        #[arg(long)]
        strategy: Option<String>,
    },
    /// Stop the bot
    Stop {
        #[arg(short, long)]
        exchange: Option<String>,
        #[arg(short, long)]
        symbol: Option<String>,
        #[arg(long)]
        strategy: Option<String>,
    },
    /// Show the stored settings
    Settings,
    /// Update some settings; unset flags keep their current value
    Configure {
        #[arg(long)]
        paper_api_key: Option<String>,
        #[arg(long)]
        paper_api_secret: Option<String>,
        #[arg(long)]
        live_api_key: Option<String>,
        #[arg(long)]
        live_api_secret: Option<String>,
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long)]
        strategy: Option<String>,
        #[arg(long)]
        max_daily_drawdown: Option<f64>,
    },
    /// Switch between paper and live trading
    Mode {
        /// paper or live
        mode: TradingMode,
    },
    /// Switch between static and dynamic model training
    Training {
        /// static or dynamic
        strategy: TrainingStrategy,
    },
    /// Show trade history and a summary
    Trades,
    /// Run a backtest on the service
    Backtest {
        #[arg(short, long)]
        exchange: Option<String>,
        #[arg(short, long)]
        symbol: Option<String>,
    },
    /// Ask the service to download market data
    Download {
        #[arg(short, long)]
        exchange: Option<String>,
        #[arg(short, long)]
        symbol: Option<String>,
    },
    /// Train the service's models
    Train,
    /// List trained models
    Models,
    /// Delete a trained model by file name
    DeleteModel { name: String },
    /// Follow the live log stream until Ctrl-C
    Logs,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs)?;

    let config = ClientConfig::load(cli.config.as_deref())?;

    if let Commands::Config = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let session = SessionContext::from_config(&config)?;
    let restores = !matches!(cli.command, Commands::Login { .. } | Commands::Register { .. });
    if restores {
        session.restore().await?;
    }

    let result = run(&session, cli.command).await;
    session.shutdown().await;
    result
}

fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

async fn require_login(session: &SessionContext) -> Result<()> {
    if session.is_authenticated().await {
        Ok(())
    } else {
        Err(anyhow!("Not logged in. Run `bot-console login` first."))
    }
}

async fn run(session: &SessionContext, command: Commands) -> Result<()> {
    match command {
        Commands::Login { username, password } => {
            session.login(&username, &password).await?;
            println!("Logged in as {}", username);
            print_status(session).await;
        }
        Commands::Register { username, password } => {
            let message = session.register(&username, &password).await?;
            println!("{}", message);
        }
        Commands::Logout => {
            session.logout().await;
            println!("Logged out");
        }
        Commands::Status => {
            require_login(session).await?;
            print_status(session).await;
        }
        Commands::Start { exchange, symbol, strategy } => {
            require_login(session).await?;
            let request = session.bot_request(exchange, symbol, strategy).await;
            session.start_bot(&request).await?;
            println!("Bot started: {}", request);
        }
        Commands::Stop { exchange, symbol, strategy } => {
            require_login(session).await?;
            let request = session.bot_request(exchange, symbol, strategy).await;
            session.stop_bot(&request).await?;
            println!("Bot stopped: {}", request);
        }
        Commands::Settings => {
            require_login(session).await?;
            match session.snapshot().await.settings {
                Some(settings) => print_settings(&settings),
                None => println!("Settings unavailable"),
            }
        }
        Commands::Configure {
            paper_api_key,
            paper_api_secret,
            live_api_key,
            live_api_secret,
            symbol,
            strategy,
            max_daily_drawdown,
        } => {
            require_login(session).await?;
            let mut settings = match session.snapshot().await.settings {
                Some(settings) => settings,
                None => session.api().get_settings().await?,
            };

            settings.paper_api_key = paper_api_key.or(settings.paper_api_key);
            settings.paper_api_secret = paper_api_secret.or(settings.paper_api_secret);
            settings.live_api_key = live_api_key.or(settings.live_api_key);
            settings.live_api_secret = live_api_secret.or(settings.live_api_secret);
            settings.default_symbol = symbol.or(settings.default_symbol);
            settings.default_strategy = strategy.or(settings.default_strategy);
            settings.max_daily_drawdown_pct = max_daily_drawdown.or(settings.max_daily_drawdown_pct);

            let saved = session.save_settings(&settings).await?;
            println!("Settings saved");
            print_settings(&saved);
        }
        Commands::Mode { mode } => {
            require_login(session).await?;
            let mode = session.set_trading_mode(mode).await?;
            println!("Trading mode: {}", mode);
        }
        Commands::Training { strategy } => {
            require_login(session).await?;
            let strategy = session.set_training_strategy(strategy).await?;
            println!("Training strategy: {}", strategy);
        }
        Commands::Trades => {
            require_login(session).await?;
            let trades = session.api().trade_history().await?;
            print_trades(&trades);
        }
        Commands::Backtest { exchange, symbol } => {
            require_login(session).await?;
            let request = session.bot_request(exchange, symbol, None).await;
            info!("Running backtest for {} {}", request.exchange, request.symbol);
            let report = session
                .api()
                .run_backtest(&request.exchange, &request.symbol)
                .await?;

            println!("\n=== Backtest {} {} ===", request.exchange, request.symbol);
            println!("Total Return: {:.2}%", report.total_return);
            println!("Trades: {}", report.trades);
            println!("Win Rate: {:.1}%", report.win_rate);
            if let Some(low) = report.worst_drawdown() {
                println!("Lowest P&L: {:.2}%", low);
            }
        }
        Commands::Download { exchange, symbol } => {
            require_login(session).await?;
            let request = session.bot_request(exchange, symbol, None).await;
            let message = session
                .api()
                .download_data(&request.exchange, &request.symbol)
                .await?;
            println!("{}", message);
        }
        Commands::Train => {
            require_login(session).await?;
            let message = session.api().train_model().await?;
            println!("{}", message);
        }
        Commands::Models => {
            require_login(session).await?;
            let models = session.api().list_models().await?;
            if models.is_empty() {
                println!("No trained models");
            }
            for model in models {
                println!("{}", model);
            }
        }
        Commands::DeleteModel { name } => {
            require_login(session).await?;
            session.api().delete_model(&name).await?;
            println!("Deleted {}", name);
        }
        Commands::Logs => {
            require_login(session).await?;
            tail_logs(session).await;
        }
        Commands::Config => {}
    }

    Ok(())
}

async fn tail_logs(session: &SessionContext) {
    let mut lines = session.subscribe_logs();
    for line in session.logs().await {
        print_line(&line);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = lines.recv() => match received {
                Ok(line) => print_line(&line),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} log lines", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }
}

fn print_line(line: &bot_console::live::LogLine) {
    let stamp = line.received_at.format("%H:%M:%S");
    if line.is_error() {
        eprintln!("[{}] {}", stamp, line.text);
    } else {
        println!("[{}] {}", stamp, line.text);
    }
}

async fn print_status(session: &SessionContext) {
    let snapshot = session.snapshot().await;
    println!("\n=== Session ===");
    println!("Authenticated: {}", snapshot.authenticated);
    println!("Log stream: {}", snapshot.connection);
    println!(
        "Bot: {}",
        match (snapshot.bot_status_phase, snapshot.bot_running) {
            (bot_console::session::BotStatusPhase::Loading, _) => "loading",
            (_, true) => "running",
            (_, false) => "stopped",
        }
    );
    if let Some(settings) = &snapshot.settings {
        println!("Mode: {}", settings.trading_mode);
        println!("Symbol: {}", settings.symbol().unwrap_or(&session.defaults().symbol));
    }
}

fn print_settings(settings: &Settings) {
    fn mask(value: &Option<String>) -> String {
        match value.as_deref() {
            Some(v) if v.chars().count() > 4 => format!("{}****", v.chars().take(4).collect::<String>()),
            Some(v) if !v.is_empty() => "****".to_string(),
            _ => "-".to_string(),
        }
    }

    println!("\n=== Settings ===");
    println!("Trading mode: {}", settings.trading_mode);
    println!("Training strategy: {}", settings.training_strategy);
    println!("Default symbol: {}", settings.symbol().unwrap_or("-"));
    println!("Default strategy: {}", settings.strategy().unwrap_or("-"));
    match settings.max_daily_drawdown_pct {
        Some(pct) => println!("Max daily drawdown: {:.2}%", pct),
        None => println!("Max daily drawdown: -"),
    }
    println!("Paper key: {}  secret: {}", mask(&settings.paper_api_key), mask(&settings.paper_api_secret));
    println!("Live key: {}  secret: {}", mask(&settings.live_api_key), mask(&settings.live_api_secret));
    if settings.active_credentials().is_none() {
        println!("No exchange keys set for {} mode", settings.trading_mode);
    }
}

fn print_trades(trades: &[bot_console::types::TradeRecord]) {
    println!(
        "\n{:<6} {:<10} {:>12} {:>12} {:>9} {:<20}",
        "ID", "Symbol", "Entry", "Exit", "P&L %", "Opened"
    );
    println!("{}", "-".repeat(74));
    for trade in trades {
        let exit = trade
            .exit_price
            .map(|p| format!("{:.2}", p))
            .unwrap_or_else(|| "open".to_string());
        let pnl = trade
            .profit_loss_pct
            .map(|p| format!("{:.2}", p))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} {:<10} {:>12.2} {:>12} {:>9} {:<20}",
            trade.id,
            trade.symbol,
            trade.entry_price,
            exit,
            pnl,
            trade.entry_timestamp.format("%Y-%m-%d %H:%M")
        );
    }

    let summary = TradeSummary::from_trades(trades);
    println!("\n=== Summary ===");
    println!("Total: {}  Open: {}  Closed: {}", summary.total_trades, summary.open_trades, summary.closed_trades);
    println!("Winners: {}  Losers: {}", summary.winning_trades, summary.losing_trades);
    println!("Win Rate: {:.1}%", summary.win_rate());
    println!("Cumulative P&L: {:.2}%", summary.total_pnl_pct);
}
