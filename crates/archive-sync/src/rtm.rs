//! The platform's real-time messaging connection.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use archive_types::LiveEvent;

use crate::error::{Result, SyncError};
use crate::http::HttpSlackClient;

/// Opens real-time sessions. Each call is a fresh connection.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RealtimeStream>>;
}

#[async_trait]
pub trait RealtimeStream: Send {
    /// The next decoded event, or `None` once the server closes the session.
    async fn next_event(&mut self) -> Result<Option<LiveEvent>>;
}

/// Connects through `rtm.connect` with the bot token, then follows the
/// returned WebSocket URL.
pub struct RtmConnector {
    client: HttpSlackClient,
}

impl RtmConnector {
    pub fn new(api_url: &str, bot_token: &str) -> Result<Self> {
        Ok(Self {
            client: HttpSlackClient::new(api_url, bot_token)?,
        })
    }
}

#[async_trait]
impl RealtimeConnector for RtmConnector {
    async fn connect(&self) -> Result<Box<dyn RealtimeStream>> {
        let envelope = self.client.call("rtm.connect", &[]).await?;
        let url = envelope
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::Api("missing_rtm_url".into()))?;

        let (ws, _) = tokio_tungstenite::connect_async(url).await?;
        debug!("Real-time socket open");
        Ok(Box::new(RtmStream::new(ws)))
    }
}

pub struct RtmStream {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl RtmStream {
    pub fn new(ws: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self { ws }
    }
}

#[async_trait]
impl RealtimeStream for RtmStream {
    async fn next_event(&mut self) -> Result<Option<LiveEvent>> {
        while let Some(frame) = self.ws.next().await {
            match frame? {
                Message::Text(text) => match LiveEvent::parse(text.as_str()) {
                    Ok(event) => return Ok(Some(event)),
                    Err(e) => warn!("Dropping malformed real-time frame: {}", e),
                },
                Message::Close(frame) => {
                    debug!("Real-time socket closed by server: {:?}", frame);
                    return Ok(None);
                }
                // Pings are answered by tungstenite itself
                _ => {}
            }
        }
        Ok(None)
    }
}
