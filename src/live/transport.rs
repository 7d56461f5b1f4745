use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

use crate::auth::Credential;
use crate::error::{ConsoleError, Result};

pub const LOG_STREAM_PATH: &str = "/ws/logs";

/// One open, server-push log stream.
#[async_trait]
pub trait LogChannel: Send {
    /// Next pushed line. `None` once the stream has ended.
    async fn next_line(&mut self) -> Option<Result<String>>;
    async fn close(&mut self);
}

#[async_trait]
pub trait LogConnector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn LogChannel>>;
}

/// Turns the REST base URL into the log stream endpoint, without a token.
pub fn log_stream_endpoint(api_base_url: &str) -> Result<Url> {
    let mut url = Url::parse(api_base_url)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ConsoleError::Config(format!(
                "Cannot derive a log stream from scheme {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ConsoleError::Config(format!("Cannot switch {} to {}", api_base_url, scheme)))?;

    let path = format!("{}{}", url.path().trim_end_matches('/'), LOG_STREAM_PATH);
    url.set_path(&path);
    url.set_query(None);
    Ok(url)
}

/// The stream is authenticated by a `token` query parameter, not a header.
pub fn with_token(endpoint: &Url, credential: &Credential) -> Url {
    let mut url = endpoint.clone();
    url.query_pairs_mut()
        .clear()
        .append_pair("token", credential.as_str());
    url
}

/// Production transport. A handshake that takes longer than
/// `connect_timeout` counts as a failed connect.
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl LogConnector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn LogChannel>> {
        debug!("Connecting to log stream at {}{}", url.host_str().unwrap_or(""), url.path());
        let (stream, _) = timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                ConsoleError::Channel(format!(
                    "Log stream handshake timed out after {:?}",
                    self.connect_timeout
                ))
            })??;
        info!("Log stream connected");
        Ok(Box::new(WsChannel { stream }))
    }
}

struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl LogChannel for WsChannel {
    async fn next_line(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text)),
                Some(Ok(Message::Binary(data))) => {
                    return Some(Ok(String::from_utf8_lossy(&data).into_owned()))
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Log stream closed by server: {:?}", frame);
                    return None;
                }
                // ping/pong are answered by tungstenite
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(e.into())),
                None => return None,
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("Log stream close handshake failed: {}", e);
        }
        // Drain until the server acknowledges the close frame.
        while let Some(Ok(_)) = self.stream.next().await {}
    }
}
