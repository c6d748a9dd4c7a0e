//! Web API client over HTTPS.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use archive_types::{RemoteBot, RemoteChannel, RemoteMessage, RemotePage, RemoteTeam, RemoteUser, SlackTs};

use crate::api::SlackApi;
use crate::error::{Result, SyncError};

pub const DEFAULT_API_URL: &str = "https://slack.com/api";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Used when a throttled response carries no usable `Retry-After`.
const FALLBACK_RETRY_AFTER: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct HttpSlackClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpSlackClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("slack-archive/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Call one Web API method and return the response envelope once the
    /// platform has confirmed `ok: true`.
    pub(crate) async fn call(&self, method: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, method);
        debug!(method, "Calling platform API");

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .form(params)
            .send()
            .await?;

        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(SyncError::RateLimited {
                retry_after: retry_after(resp.headers()),
            });
        }

        let body = resp.error_for_status()?.bytes().await?;
        let envelope: Value = serde_json::from_slice(&body)?;

        if envelope.get("ok").and_then(Value::as_bool) != Some(true) {
            let code = envelope
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            if code == "ratelimited" {
                return Err(SyncError::RateLimited {
                    retry_after: FALLBACK_RETRY_AFTER,
                });
            }
            return Err(SyncError::Api(code.to_string()));
        }

        Ok(envelope)
    }
}

#[async_trait]
impl SlackApi for HttpSlackClient {
    async fn team_info(&self) -> Result<RemoteTeam> {
        let mut envelope = self.call("team.info", &[]).await?;
        Ok(serde_json::from_value(take(&mut envelope, "team"))?)
    }

    async fn list_users(&self, cursor: &str, limit: u32) -> Result<RemotePage<RemoteUser>> {
        let mut params = vec![("limit", limit.to_string())];
        if !cursor.is_empty() {
            params.push(("cursor", cursor.to_string()));
        }

        let mut envelope = self.call("users.list", &params).await?;
        Ok(page(&mut envelope, "members"))
    }

    async fn list_channels(&self, cursor: &str, limit: u32) -> Result<RemotePage<RemoteChannel>> {
        let mut params = vec![
            ("limit", limit.to_string()),
            ("exclude_archived", "false".to_string()),
        ];
        if !cursor.is_empty() {
            params.push(("cursor", cursor.to_string()));
        }

        let mut envelope = self.call("conversations.list", &params).await?;
        Ok(page(&mut envelope, "channels"))
    }

    async fn history(
        &self,
        channel: &str,
        oldest: Option<SlackTs>,
        cursor: &str,
        limit: u32,
    ) -> Result<RemotePage<RemoteMessage>> {
        let mut params = vec![("channel", channel.to_string()), ("limit", limit.to_string())];
        if let Some(oldest) = oldest {
            params.push(("oldest", oldest.to_string()));
        }
        if !cursor.is_empty() {
            params.push(("cursor", cursor.to_string()));
        }

        let mut envelope = self.call("conversations.history", &params).await?;
        Ok(page(&mut envelope, "messages"))
    }

    async fn replies(
        &self,
        channel: &str,
        thread_ts: SlackTs,
        cursor: &str,
    ) -> Result<RemotePage<RemoteMessage>> {
        let mut params = vec![("channel", channel.to_string()), ("ts", thread_ts.to_string())];
        if !cursor.is_empty() {
            params.push(("cursor", cursor.to_string()));
        }

        let mut envelope = self.call("conversations.replies", &params).await?;
        Ok(page(&mut envelope, "messages"))
    }

    async fn join_channel(&self, channel: &str) -> Result<()> {
        self.call("conversations.join", &[("channel", channel.to_string())])
            .await?;
        Ok(())
    }

    async fn bot_info(&self, bot_id: &str) -> Result<RemoteBot> {
        let mut envelope = self.call("bots.info", &[("bot", bot_id.to_string())]).await?;
        Ok(serde_json::from_value(take(&mut envelope, "bot"))?)
    }
}

fn retry_after(headers: &HeaderMap) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(FALLBACK_RETRY_AFTER)
}

fn take(envelope: &mut Value, key: &str) -> Value {
    envelope.get_mut(key).map(Value::take).unwrap_or(Value::Null)
}

/// Build a page from a response envelope. Items that fail to decode are
/// logged and dropped so one bad record cannot sink the page.
fn page<T: DeserializeOwned>(envelope: &mut Value, key: &str) -> RemotePage<T> {
    let raw = match take(envelope, key) {
        Value::Array(items) => items,
        _ => Vec::new(),
    };

    let items = raw
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(key, "Skipping malformed record: {}", e);
                None
            }
        })
        .collect();

    let next_cursor = envelope
        .pointer("/response_metadata/next_cursor")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let has_more = envelope
        .get("has_more")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    RemotePage {
        items,
        next_cursor,
        has_more,
    }
}
