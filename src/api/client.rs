use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, IntoUrl, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use url::Url;

use super::BotApi;
use crate::auth::Credential;
use crate::config::ClientConfig;
use crate::error::{ConsoleError, Result};
use crate::types::{BacktestReport, BotRequest, Settings, TradeRecord, TradingMode, TrainingStrategy};

pub const MIN_PASSWORD_LEN: usize = 4;

/// Default headers shared by every request made through one [`ApiClient`].
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    credential: Option<Credential>,
}

impl AuthConfig {
    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn authorization(&self) -> Option<String> {
        self.credential.as_ref().map(Credential::bearer)
    }
}

/// HTTP client for the trading service. Attaches the current bearer token,
/// if any, to each request.
pub struct ApiClient {
    client: Client,
    base_url: String,
    auth: RwLock<AuthConfig>,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Url::parse(base_url)?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth: RwLock::new(AuthConfig::default()),
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::new(&config.api_base_url, config.request_timeout())
    }

    pub fn auth_config(&self) -> AuthConfig {
        self.auth
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn builder<U: IntoUrl>(&self, method: Method, url: U) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match self.auth_config().authorization() {
            Some(value) => builder.header(AUTHORIZATION, value),
            None => builder,
        }
    }

    /// Sends `method path` with an optional JSON body. Non-2xx responses
    /// become [`ConsoleError::Request`].
    pub async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response> {
        debug!("{} {}", method, path);
        let mut builder = self.builder(method, self.endpoint(path));
        if let Some(body) = body {
            builder = builder.json(body);
        }
        Self::execute(builder, path).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.request::<()>(Method::GET, path, None).await?;
        Ok(response.json().await?)
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self.request(Method::POST, path, Some(body)).await?;
        Ok(response.json().await?)
    }

    async fn execute(builder: RequestBuilder, path: &str) -> Result<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_detail(&body)
            .unwrap_or_else(|| format!("Request to {} failed with status {}", path, status));
        warn!("{} returned {}: {}", path, status, message);

        Err(ConsoleError::Request {
            status: Some(status.as_u16()),
            message,
        })
    }
}

/// Pulls the human-readable `detail` out of an error body. Validation
/// errors arrive as a list of `{msg}` objects and are joined.
pub fn error_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        Value::String(detail) => Some(detail.clone()),
        Value::Array(items) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .collect();
            if messages.is_empty() {
                None
            } else {
                Some(messages.join("; "))
            }
        }
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl BotApi for ApiClient {
    fn set_credential(&self, credential: &Credential) {
        self.auth
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .credential = Some(credential.clone());
        debug!("Authorization header set for {:?}", credential);
    }

    fn clear_credential(&self) {
        self.auth
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .credential = None;
        debug!("Authorization header cleared");
    }

    fn has_credential(&self) -> bool {
        self.auth_config().credential().is_some()
    }

    async fn issue_token(&self, username: &str, password: &str) -> Result<Credential> {
        let path = "/auth/token";
        let builder = self
            .client
            .post(self.endpoint(path))
            .form(&[("username", username), ("password", password)]);

        match Self::execute(builder, path).await {
            Ok(response) => {
                let token: TokenResponse = response.json().await?;
                info!("Token issued for {}", username);
                Ok(Credential::new(token.access_token))
            }
            Err(ConsoleError::Request {
                status: Some(400 | 401 | 403),
                message,
            }) => Err(ConsoleError::Auth(message)),
            Err(e) => Err(e),
        }
    }

    async fn register(&self, username: &str, password: &str) -> Result<String> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ConsoleError::request(format!(
                "Password must be at least {} characters long.",
                MIN_PASSWORD_LEN
            )));
        }

        let path = "/auth/register";
        let builder = self
            .client
            .post(self.endpoint(path))
            .json(&json!({ "username": username, "password": password }));
        let response = Self::execute(builder, path).await?;
        let body: MessageResponse = response.json().await?;
        Ok(body.message)
    }

    async fn get_settings(&self) -> Result<Settings> {
        self.get_json("/settings").await
    }

    async fn save_settings(&self, settings: &Settings) -> Result<Settings> {
        self.post_json("/settings", settings).await
    }

    async fn set_trading_mode(&self, mode: TradingMode) -> Result<TradingMode> {
        let body: ModeResponse = self
            .post_json("/settings/trading-mode", &json!({ "mode": mode }))
            .await?;
        Ok(body.mode)
    }

    async fn set_training_strategy(&self, strategy: TrainingStrategy) -> Result<TrainingStrategy> {
        let body: StrategyResponse = self
            .post_json("/settings/training-strategy", &json!({ "strategy": strategy }))
            .await?;
        Ok(body.strategy)
    }

    async fn bot_status(&self, exchange: &str, symbol: &str) -> Result<bool> {
        let path = "/bot/status";
        let builder = self
            .builder(Method::GET, self.endpoint(path))
            .query(&[("exchange", exchange), ("symbol", symbol)]);
        let response = Self::execute(builder, path).await?;
        let body: StatusResponse = response.json().await?;
        Ok(body.running)
    }

    async fn start_bot(&self, request: &BotRequest) -> Result<()> {
        self.request(Method::POST, "/bot/start", Some(request)).await?;
        info!("Bot start accepted: {}", request);
        Ok(())
    }

    async fn stop_bot(&self, request: &BotRequest) -> Result<()> {
        self.request(Method::POST, "/bot/stop", Some(request)).await?;
        info!("Bot stop accepted: {}", request);
        Ok(())
    }

    async fn trade_history(&self) -> Result<Vec<TradeRecord>> {
        self.get_json("/analytics/trade-history").await
    }

    async fn run_backtest(&self, exchange: &str, symbol: &str) -> Result<BacktestReport> {
        self.post_json("/backtest", &json!({ "exchange": exchange, "symbol": symbol }))
            .await
    }

    async fn download_data(&self, exchange: &str, symbol: &str) -> Result<String> {
        let body: MessageResponse = self
            .post_json("/download-data", &json!({ "exchange": exchange, "symbol": symbol }))
            .await?;
        Ok(body.message)
    }

    async fn train_model(&self) -> Result<String> {
        let response = self.request::<()>(Method::POST, "/train-model", None).await?;
        let body: MessageResponse = response.json().await?;
        Ok(body.message)
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        self.get_json("/models").await
    }

    async fn delete_model(&self, name: &str) -> Result<()> {
        let mut url = Url::parse(&self.endpoint("/models"))?;
        url.path_segments_mut()
            .map_err(|_| ConsoleError::Config(format!("Base URL cannot hold paths: {}", self.base_url)))?
            .push(name);

        let builder = self.builder(Method::DELETE, url);
        Self::execute(builder, &format!("/models/{}", name)).await?;
        info!("Model {} deleted", name);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    message: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    running: bool,
}

#[derive(Debug, Deserialize)]
struct ModeResponse {
    mode: TradingMode,
}

#[derive(Debug, Deserialize)]
struct StrategyResponse {
    strategy: TrainingStrategy,
}
