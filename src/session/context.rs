use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, info, warn};

use crate::api::{ApiClient, BotApi};
use crate::auth::{Credential, SledTokenStore, TokenStore};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::live::{ConnectionState, LiveConnection, LogLine};
use crate::types::{BotRequest, Settings, TradingMode, TrainingStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BotStatusPhase {
    Loading,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SessionEvent {
    LoggedIn,
    LoggedOut,
    SettingsUpdated(Settings),
    BotStatusChanged { running: bool },
}

/// Fallbacks used when the cached settings don't name a market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotDefaults {
    pub exchange: String,
    pub symbol: String,
    pub strategy: String,
}

impl BotDefaults {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            exchange: config.default_exchange.clone(),
            symbol: config.default_symbol.clone(),
            strategy: config.default_strategy.clone(),
        }
    }
}

impl Default for BotDefaults {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub authenticated: bool,
    pub settings: Option<Settings>,
    pub bot_running: bool,
    pub bot_status_phase: BotStatusPhase,
    pub connection: ConnectionState,
}

#[derive(Debug)]
struct SessionState {
    credential: Option<Credential>,
    settings: Option<Settings>,
    bot_running: bool,
    phase: BotStatusPhase,
    /// Bumped on every login and logout; refreshes started under an older
    /// epoch drop their results.
    epoch: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            credential: None,
            settings: None,
            bot_running: false,
            // nothing to load until someone logs in
            phase: BotStatusPhase::Ready,
            epoch: 0,
        }
    }
}

/// Single source of truth for the console: who is logged in, the cached
/// settings, whether the bot runs, and the live log stream.
#[derive(Clone)]
pub struct SessionContext {
    state: Arc<RwLock<SessionState>>,
    api: Arc<dyn BotApi>,
    tokens: Arc<dyn TokenStore>,
    live: LiveConnection,
    defaults: BotDefaults,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionContext {
    pub fn new(
        api: Arc<dyn BotApi>,
        tokens: Arc<dyn TokenStore>,
        live: LiveConnection,
        defaults: BotDefaults,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Arc::new(RwLock::new(SessionState::default())),
            api,
            tokens,
            live,
            defaults,
            events,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let api = ApiClient::from_config(config)?;
        let tokens = SledTokenStore::open(&config.token_path)?;
        let live = LiveConnection::from_config(config)?;

        Ok(Self::new(
            Arc::new(api),
            Arc::new(tokens),
            live,
            BotDefaults::from_config(config),
        ))
    }

    /// Picks up a credential persisted by an earlier run, if any.
    pub async fn restore(&self) -> Result<bool> {
        match self.tokens.get()? {
            Some(credential) => {
                info!("Restoring persisted session");
                self.establish(credential).await;
                Ok(true)
            }
            None => {
                debug!("No persisted credential");
                Ok(false)
            }
        }
    }

    /// Exchanges username and password for a credential and brings the
    /// session up with it. A rejected login leaves any current session as is.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let credential = self.api.issue_token(username, password).await?;
        self.tokens.set(&credential)?;
        info!("Logged in as {}", username);
        self.establish(credential).await;
        Ok(())
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<String> {
        self.api.register(username, password).await
    }

    /// Clears the credential everywhere and resets the cached state. The live
    /// channel is closed and no reconnect follows.
    pub async fn logout(&self) {
        {
            let mut state = self.state.write().await;
            let epoch = state.epoch + 1;
            *state = SessionState {
                epoch,
                ..SessionState::default()
            };

            if let Err(e) = self.tokens.clear() {
                warn!("Failed to clear persisted credential: {}", e);
            }
            self.api.clear_credential();
        }

        self.live.disconnect().await;
        info!("Logged out");
        let _ = self.events.send(SessionEvent::LoggedOut);
    }

    /// Closes the live channel for process exit. The persisted credential
    /// stays so the next run can restore the session.
    pub async fn shutdown(&self) {
        self.live.disconnect().await;
    }

    /// Re-runs the settings-then-status refresh for the current session.
    pub async fn refresh(&self) {
        let epoch = {
            let mut state = self.state.write().await;
            if state.credential.is_none() {
                return;
            }
            state.phase = BotStatusPhase::Loading;
            state.epoch
        };
        self.refresh_for(epoch).await;
    }

    /// Starts the bot and flips the cached flag on success. A success that
    /// lands after a logout leaves the reset state alone.
    pub async fn start_bot(&self, request: &BotRequest) -> Result<()> {
        let epoch = self.state.read().await.epoch;
        self.api.start_bot(request).await?;
        self.set_bot_running(epoch, true).await;
        Ok(())
    }

    pub async fn stop_bot(&self, request: &BotRequest) -> Result<()> {
        let epoch = self.state.read().await.epoch;
        self.api.stop_bot(request).await?;
        self.set_bot_running(epoch, false).await;
        Ok(())
    }

    /// Saves `settings`, then reloads them so the cache holds the server's
    /// view rather than what was sent.
    pub async fn save_settings(&self, settings: &Settings) -> Result<Settings> {
        self.api.save_settings(settings).await?;
        let saved = self.api.get_settings().await?;
        self.cache_settings(saved.clone()).await;
        Ok(saved)
    }

    pub async fn set_trading_mode(&self, mode: TradingMode) -> Result<TradingMode> {
        let mode = self.api.set_trading_mode(mode).await?;
        self.update_cached(|settings| settings.trading_mode = mode).await;
        Ok(mode)
    }

    pub async fn set_training_strategy(&self, strategy: TrainingStrategy) -> Result<TrainingStrategy> {
        let strategy = self.api.set_training_strategy(strategy).await?;
        self.update_cached(|settings| settings.training_strategy = strategy)
            .await;
        Ok(strategy)
    }

    /// Fills unset parts of a bot request from the cached settings, then
    /// from the configured defaults.
    pub async fn bot_request(
        &self,
        exchange: Option<String>,
        symbol: Option<String>,
        strategy: Option<String>,
    ) -> BotRequest {
        let state = self.state.read().await;
        let settings = state.settings.as_ref();

        let symbol = symbol
            .or_else(|| settings.and_then(Settings::symbol).map(str::to_string))
            .unwrap_or_else(|| self.defaults.symbol.clone());
        let strategy = strategy
            .or_else(|| settings.and_then(Settings::strategy).map(str::to_string))
            .unwrap_or_else(|| self.defaults.strategy.clone());
        let exchange = exchange.unwrap_or_else(|| self.defaults.exchange.clone());

        BotRequest::new(exchange, symbol, strategy)
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.read().await;
        SessionSnapshot {
            authenticated: state.credential.is_some(),
            settings: state.settings.clone(),
            bot_running: state.bot_running,
            bot_status_phase: state.phase,
            connection: self.live.state(),
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state.read().await.credential.is_some()
    }

    pub async fn credential(&self) -> Option<Credential> {
        self.state.read().await.credential.clone()
    }

    pub async fn logs(&self) -> Vec<LogLine> {
        self.live.logs().await
    }

    pub async fn clear_logs(&self) {
        self.live.clear_logs().await;
    }

    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogLine> {
        self.live.subscribe_lines()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.live.subscribe_state()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Direct access for resources the session doesn't cache.
    pub fn api(&self) -> Arc<dyn BotApi> {
        self.api.clone()
    }

    pub fn defaults(&self) -> &BotDefaults {
        &self.defaults
    }

    async fn establish(&self, credential: Credential) {
        let epoch = {
            let mut state = self.state.write().await;
            state.epoch += 1;
            state.credential = Some(credential.clone());
            state.settings = None;
            state.bot_running = false;
            state.phase = BotStatusPhase::Loading;
            state.epoch
        };

        self.api.set_credential(&credential);
        self.live.connect(credential).await;
        let _ = self.events.send(SessionEvent::LoggedIn);

        self.refresh_for(epoch).await;
    }

    /// Settings first, then bot status for the symbol those settings name.
    /// Failures degrade to defaults and never end the session.
    async fn refresh_for(&self, epoch: u64) {
        let settings = match self.api.get_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Settings fetch failed: {}", e);
                let mut state = self.state.write().await;
                if state.epoch == epoch {
                    state.phase = BotStatusPhase::Ready;
                }
                return;
            }
        };

        {
            let mut state = self.state.write().await;
            if state.epoch != epoch {
                debug!("Discarding settings from a previous session");
                return;
            }
            state.settings = Some(settings.clone());
        }
        let _ = self.events.send(SessionEvent::SettingsUpdated(settings.clone()));

        let symbol = settings.symbol().unwrap_or(&self.defaults.symbol);
        let status = self.api.bot_status(&self.defaults.exchange, symbol).await;

        let mut state = self.state.write().await;
        if state.epoch != epoch {
            debug!("Discarding bot status from a previous session");
            return;
        }
        state.phase = BotStatusPhase::Ready;
        match status {
            Ok(running) => {
                let changed = state.bot_running != running;
                state.bot_running = running;
                drop(state);
                if changed {
                    let _ = self.events.send(SessionEvent::BotStatusChanged { running });
                }
            }
            Err(e) => warn!("Bot status fetch failed for {}: {}", symbol, e),
        }
    }

    async fn set_bot_running(&self, epoch: u64, running: bool) {
        {
            let mut state = self.state.write().await;
            if state.epoch != epoch {
                debug!("Dropping stale bot status update");
                return;
            }
            state.bot_running = running;
        }
        let _ = self.events.send(SessionEvent::BotStatusChanged { running });
    }

    async fn cache_settings(&self, settings: Settings) {
        self.state.write().await.settings = Some(settings.clone());
        let _ = self.events.send(SessionEvent::SettingsUpdated(settings));
    }

    async fn update_cached(&self, apply: impl FnOnce(&mut Settings)) {
        let updated = {
            let mut state = self.state.write().await;
            match state.settings.as_mut() {
                Some(settings) => {
                    apply(settings);
                    settings.clone()
                }
                None => return,
            }
        };
        let _ = self.events.send(SessionEvent::SettingsUpdated(updated));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockBotApi;
    use crate::auth::MemoryTokenStore;
    use crate::error::ConsoleError;
    use crate::live::connection::testing::{wait_for_lines, wait_for_state, Event, ScriptedConnector};
    use crate::live::CONNECTED_MESSAGE;
    use mockall::predicate::eq;
    use mockall::Sequence;
    use std::time::Duration;
    use tokio_test::assert_ok;

    const FAST_RECONNECT: Duration = Duration::from_millis(50);

    struct Harness {
        session: SessionContext,
        tokens: Arc<MemoryTokenStore>,
        connector: Arc<ScriptedConnector>,
        live: LiveConnection,
    }

    fn harness(api: MockBotApi, tokens: MemoryTokenStore) -> Harness {
        let tokens = Arc::new(tokens);
        let connector = Arc::new(ScriptedConnector::default());
        let live = LiveConnection::new(
            "http://localhost:8000",
            connector.clone(),
            200,
            FAST_RECONNECT,
        )
        .unwrap();
        let session = SessionContext::new(
            Arc::new(api),
            tokens.clone(),
            live.clone(),
            BotDefaults::default(),
        );
        Harness {
            session,
            tokens,
            connector,
            live,
        }
    }

    fn eth_settings() -> Settings {
        Settings {
            default_symbol: Some("ETH/USDT".to_string()),
            default_strategy: Some("momentum".to_string()),
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn test_login_fetches_settings_then_status() {
        let mut api = MockBotApi::new();
        let mut seq = Sequence::new();
        api.expect_issue_token()
            .withf(|u, p| u == "alice" && p == "secret")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Credential::new("tok123")));
        api.expect_set_credential()
            .withf(|c| c.bearer() == "Bearer tok123")
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        api.expect_get_settings()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(eth_settings()));
        api.expect_bot_status()
            .withf(|e, s| e == "binance" && s == "ETH/USDT")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(true));

        let h = harness(api, MemoryTokenStore::new());
        let _server = h.connector.push_channel();

        h.session.login("alice", "secret").await.unwrap();

        let snapshot = h.session.snapshot().await;
        assert!(snapshot.authenticated);
        assert!(snapshot.bot_running);
        assert_eq!(snapshot.bot_status_phase, BotStatusPhase::Ready);
        assert_eq!(snapshot.settings.unwrap().symbol(), Some("ETH/USDT"));
        assert_eq!(h.tokens.get().unwrap(), Some(Credential::new("tok123")));

        wait_for_state(&h.live, ConnectionState::Open).await;
        let urls = h.connector.urls.lock().unwrap().clone();
        assert_eq!(urls[0].query(), Some("token=tok123"));
    }

    #[tokio::test]
    async fn test_rejected_login_keeps_unauthenticated() {
        let mut api = MockBotApi::new();
        api.expect_issue_token()
            .returning(|_, _| Err(ConsoleError::Auth("Incorrect username or password".to_string())));

        let h = harness(api, MemoryTokenStore::new());
        let err = h.session.login("alice", "wrong").await.unwrap_err();

        assert!(matches!(err, ConsoleError::Auth(_)));
        assert!(!h.session.is_authenticated().await);
        assert_eq!(h.tokens.get().unwrap(), None);
        assert_eq!(h.connector.attempts(), 0);
    }

    #[tokio::test]
    async fn test_restore_without_credential_does_nothing() {
        // any call on an expectation-free mock panics
        let h = harness(MockBotApi::new(), MemoryTokenStore::new());

        let restored = h.session.restore().await.unwrap();
        assert!(!restored);

        let snapshot = h.session.snapshot().await;
        assert!(!snapshot.authenticated);
        assert!(!snapshot.bot_running);
        assert_eq!(snapshot.bot_status_phase, BotStatusPhase::Ready);
        assert_eq!(snapshot.connection, ConnectionState::Disconnected);
        assert_eq!(h.connector.attempts(), 0);
    }

    #[tokio::test]
    async fn test_restore_with_settings_failure_resolves_ready() {
        let mut api = MockBotApi::new();
        api.expect_set_credential().times(1).return_const(());
        api.expect_get_settings()
            .times(1)
            .returning(|| Err(ConsoleError::request("Internal Server Error")));
        api.expect_bot_status().times(0);

        let h = harness(api, MemoryTokenStore::with_credential(Credential::new("tok123")));
        let _server = h.connector.push_channel();

        assert!(h.session.restore().await.unwrap());

        let snapshot = h.session.snapshot().await;
        assert!(snapshot.authenticated);
        assert!(!snapshot.bot_running);
        assert!(snapshot.settings.is_none());
        assert_eq!(snapshot.bot_status_phase, BotStatusPhase::Ready);
        wait_for_state(&h.live, ConnectionState::Open).await;
    }

    #[tokio::test]
    async fn test_status_symbol_falls_back_to_defaults() {
        let mut api = MockBotApi::new();
        api.expect_set_credential().return_const(());
        api.expect_get_settings().returning(|| Ok(Settings::default()));
        api.expect_bot_status()
            .withf(|e, s| e == "binance" && s == "BTC/USDT")
            .times(1)
            .returning(|_, _| Ok(false));

        let h = harness(api, MemoryTokenStore::with_credential(Credential::new("tok123")));
        h.connector.push_refusal();
        h.session.restore().await.unwrap();

        assert_eq!(h.session.snapshot().await.bot_status_phase, BotStatusPhase::Ready);
    }

    #[tokio::test]
    async fn test_start_then_failed_stop_keeps_flag() {
        let mut api = MockBotApi::new();
        api.expect_start_bot().times(1).returning(|_| Ok(()));
        api.expect_stop_bot().times(1).returning(|_| {
            Err(ConsoleError::Request {
                status: Some(400),
                message: "Bot is not running".to_string(),
            })
        });

        let h = harness(api, MemoryTokenStore::new());
        let request = BotRequest::new("binance", "BTC/USDT", "default");

        assert_ok!(h.session.start_bot(&request).await);
        assert!(h.session.snapshot().await.bot_running);

        let err = h.session.stop_bot(&request).await.unwrap_err();
        assert_eq!(err.to_string(), "Bot is not running");
        assert!(h.session.snapshot().await.bot_running);
    }

    #[tokio::test]
    async fn test_failed_start_leaves_flag_unchanged() {
        let mut api = MockBotApi::new();
        api.expect_start_bot().returning(|_| {
            Err(ConsoleError::request(
                "Model 'regime_model.pkl' not found. Please train models first.",
            ))
        });

        let h = harness(api, MemoryTokenStore::new());
        let mut events = h.session.subscribe_events();
        let request = BotRequest::new("binance", "BTC/USDT", "default");

        assert!(h.session.start_bot(&request).await.is_err());
        assert!(!h.session.snapshot().await.bot_running);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_save_settings_caches_server_view() {
        let mut api = MockBotApi::new();
        let mut seq = Sequence::new();
        api.expect_save_settings()
            .withf(|s| s.default_symbol.as_deref() == Some("ETH/USDT"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|s| Ok(s.clone()));
        api.expect_get_settings()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| {
                Ok(Settings {
                    max_daily_drawdown_pct: Some(5.0),
                    ..eth_settings()
                })
            });

        let h = harness(api, MemoryTokenStore::new());
        let saved = h.session.save_settings(&eth_settings()).await.unwrap();

        assert_eq!(saved.max_daily_drawdown_pct, Some(5.0));
        assert_eq!(h.session.snapshot().await.settings, Some(saved));
    }

    #[tokio::test]
    async fn test_mode_switch_updates_cache() {
        let mut api = MockBotApi::new();
        api.expect_save_settings().returning(|s| Ok(s.clone()));
        api.expect_get_settings().returning(|| Ok(eth_settings()));
        api.expect_set_trading_mode()
            .with(eq(TradingMode::Live))
            .returning(|mode| Ok(mode));
        api.expect_set_training_strategy()
            .returning(|strategy| Ok(strategy));

        let h = harness(api, MemoryTokenStore::new());
        h.session.save_settings(&eth_settings()).await.unwrap();

        h.session.set_trading_mode(TradingMode::Live).await.unwrap();
        h.session
            .set_training_strategy(TrainingStrategy::Dynamic)
            .await
            .unwrap();

        let cached = h.session.snapshot().await.settings.unwrap();
        assert_eq!(cached.trading_mode, TradingMode::Live);
        assert_eq!(cached.training_strategy, TrainingStrategy::Dynamic);
    }

    #[tokio::test]
    async fn test_logout_closes_channel_without_reconnect() {
        let mut api = MockBotApi::new();
        api.expect_issue_token()
            .returning(|_, _| Ok(Credential::new("tok123")));
        api.expect_set_credential().return_const(());
        api.expect_get_settings().returning(|| Ok(eth_settings()));
        api.expect_bot_status().returning(|_, _| Ok(true));
        api.expect_clear_credential().times(1).return_const(());

        let h = harness(api, MemoryTokenStore::new());
        let _server = h.connector.push_channel();
        let _spare = h.connector.push_channel();

        h.session.login("alice", "secret").await.unwrap();
        wait_for_state(&h.live, ConnectionState::Open).await;

        h.session.logout().await;

        let snapshot = h.session.snapshot().await;
        assert!(!snapshot.authenticated);
        assert!(!snapshot.bot_running);
        assert!(snapshot.settings.is_none());
        assert_eq!(snapshot.connection, ConnectionState::Disconnected);
        assert_eq!(h.tokens.get().unwrap(), None);

        tokio::time::sleep(FAST_RECONNECT * 4).await;
        assert_eq!(h.connector.attempts(), 1);
        assert_eq!(h.live.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_logout_then_login_opens_one_channel() {
        let mut api = MockBotApi::new();
        api.expect_issue_token()
            .returning(|_, _| Ok(Credential::new("tok123")));
        api.expect_set_credential().times(2).return_const(());
        api.expect_get_settings().returning(|| Ok(eth_settings()));
        api.expect_bot_status().returning(|_, _| Ok(false));
        api.expect_clear_credential().return_const(());

        let h = harness(api, MemoryTokenStore::new());
        let _first = h.connector.push_channel();
        let _second = h.connector.push_channel();

        h.session.login("alice", "secret").await.unwrap();
        wait_for_state(&h.live, ConnectionState::Open).await;
        h.session.logout().await;
        h.session.login("alice", "secret").await.unwrap();
        wait_for_state(&h.live, ConnectionState::Open).await;

        tokio::time::sleep(FAST_RECONNECT * 2).await;
        assert_eq!(h.connector.attempts(), 2);
    }

    #[tokio::test]
    async fn test_log_lines_survive_a_drop() {
        let mut api = MockBotApi::new();
        api.expect_set_credential().return_const(());
        api.expect_get_settings().returning(|| Ok(eth_settings()));
        api.expect_bot_status().returning(|_, _| Ok(true));

        let h = harness(api, MemoryTokenStore::with_credential(Credential::new("tok123")));
        let server = h.connector.push_channel();
        h.connector.push_refusal();

        h.session.restore().await.unwrap();
        wait_for_state(&h.live, ConnectionState::Open).await;
        server.send(Event::Line("INFO: tick".to_string())).unwrap();
        server.send(Event::Line("ERROR: disconnect".to_string())).unwrap();
        wait_for_lines(&h.live, 3).await;

        drop(server);
        wait_for_state(&h.live, ConnectionState::Disconnected).await;

        let logs = h.session.logs().await;
        let texts: Vec<&str> = logs.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec![CONNECTED_MESSAGE, "INFO: tick", "ERROR: disconnect"]);
        assert!(!logs[1].is_error());
        assert!(logs[2].is_error());
        // the session itself is untouched by the channel drop
        assert!(h.session.is_authenticated().await);

        h.session.clear_logs().await;
        assert!(h.session.logs().await.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_after_logout_is_discarded() {
        let mut api = MockBotApi::new();
        api.expect_issue_token()
            .returning(|_, _| Ok(Credential::new("tok123")));
        api.expect_set_credential().return_const(());
        api.expect_get_settings().returning(|| Ok(eth_settings()));
        api.expect_bot_status().returning(|_, _| Ok(true));
        api.expect_clear_credential().return_const(());

        let h = harness(api, MemoryTokenStore::new());
        h.connector.push_refusal();

        h.session.login("alice", "secret").await.unwrap();
        let stale_epoch = h.session.state.read().await.epoch;
        h.session.logout().await;

        h.session.refresh_for(stale_epoch).await;

        let snapshot = h.session.snapshot().await;
        assert!(snapshot.settings.is_none());
        assert!(!snapshot.bot_running);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_finishing_after_logout_keeps_reset_state() {
        let mut api = MockBotApi::new();
        api.expect_start_bot().times(1).returning(|_| {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        });
        api.expect_clear_credential().times(1).return_const(());

        let h = harness(api, MemoryTokenStore::new());
        let mut events = h.session.subscribe_events();
        let session = h.session.clone();
        let start = tokio::spawn(async move {
            let request = BotRequest::new("binance", "ETH/USDT", "momentum");
            session.start_bot(&request).await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        h.session.logout().await;
        assert_ok!(start.await.unwrap());

        let snapshot = h.session.snapshot().await;
        assert!(!snapshot.bot_running);
        assert!(!snapshot.authenticated);
        assert_eq!(events.recv().await.unwrap(), SessionEvent::LoggedOut);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_bot_request_fills_from_settings_then_defaults() {
        let mut api = MockBotApi::new();
        api.expect_save_settings().returning(|s| Ok(s.clone()));
        api.expect_get_settings().returning(|| Ok(eth_settings()));

        let h = harness(api, MemoryTokenStore::new());
        let request = h.session.bot_request(None, None, None).await;
        assert_eq!(request, BotRequest::new("binance", "BTC/USDT", "default"));

        h.session.save_settings(&eth_settings()).await.unwrap();
        let request = h
            .session
            .bot_request(Some("kraken".to_string()), None, None)
            .await;
        assert_eq!(request, BotRequest::new("kraken", "ETH/USDT", "momentum"));
    }

    #[tokio::test]
    async fn test_events_follow_login_and_logout() {
        let mut api = MockBotApi::new();
        api.expect_issue_token()
            .returning(|_, _| Ok(Credential::new("tok123")));
        api.expect_set_credential().return_const(());
        api.expect_get_settings().returning(|| Ok(eth_settings()));
        api.expect_bot_status().returning(|_, _| Ok(true));
        api.expect_clear_credential().return_const(());

        let h = harness(api, MemoryTokenStore::new());
        h.connector.push_refusal();
        let mut events = h.session.subscribe_events();

        h.session.login("alice", "secret").await.unwrap();
        h.session.logout().await;

        assert_eq!(events.recv().await.unwrap(), SessionEvent::LoggedIn);
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::SettingsUpdated(eth_settings())
        );
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::BotStatusChanged { running: true }
        );
        assert_eq!(events.recv().await.unwrap(), SessionEvent::LoggedOut);
    }
}
