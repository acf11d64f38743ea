//! Mastodon account endpoint.
//!
//! Statuses posted by the configured account are read from the user streaming
//! API (server-sent events) and new posts and edits are written through the
//! statuses REST API. Status HTML is converted with [`markup::html_to_markdown`].
//!
//! [`markup::html_to_markdown`]: super::markup::html_to_markdown

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use backon::BackoffBuilder;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use super::markup::html_to_markdown;
use super::{emit, wait_for_shutdown, wrong_platform, Endpoint, Platform};
use crate::common::error::{ConfigError, EndpointError, EndpointResult};
use crate::common::types::{Content, EndpointId, MessageKey, PlatformMessageId, Revision, Update};
use crate::config::types::EndpointConfig;

/// Longest SSE line accepted from the streaming API.
const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Backoff for stream reconnects: 5s initial, 5min max, factor 1.5, with jitter, 20 attempts.
fn stream_backoff() -> impl Iterator<Item = Duration> {
    backon::ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(5))
        .with_max_delay(Duration::from_secs(300))
        .with_factor(1.5)
        .with_jitter()
        .with_max_times(20)
        .build()
}

/// SSE lines of one streaming connection.
type EventLines = FramedRead<StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>, LinesCodec>;

#[derive(Debug, Deserialize)]
struct Account {
    id: String,
    acct: String,
}

#[derive(Debug, Deserialize)]
struct Status {
    id: String,
    created_at: DateTime<Utc>,
    edited_at: Option<DateTime<Utc>>,
    content: String,
    account: Account,
    reblog: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: String,
}

#[derive(Debug, Serialize)]
struct StatusParams<'a> {
    status: &'a str,
}

/// Event assembled from SSE lines.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SseEvent {
    event: String,
    data: String,
}

/// Incremental SSE parser fed one line at a time.
#[derive(Debug, Default)]
struct SseParser {
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    /// Feed one line without its terminator; a blank line completes an event.
    fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            let event = self.event.take();
            let data = std::mem::take(&mut self.data);
            if event.is_none() && data.is_empty() {
                return None;
            }
            return Some(SseEvent {
                event: event.unwrap_or_else(|| "message".to_string()),
                data: data.join("\n"),
            });
        }

        if line.starts_with(':') {
            // Comment, used by Mastodon as a heartbeat.
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }
}

/// REST and streaming client for one account.
#[derive(Debug, Clone)]
struct MastodonApi {
    http: reqwest::Client,
    /// Instance base URL without trailing slash.
    instance: String,
    access_token: String,
    /// Id of the authenticated account; statuses of other accounts are ignored.
    account_id: String,
}

impl MastodonApi {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.instance, path)
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> EndpointResult<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let body: ApiErrorBody = response.json().await.unwrap_or_default();
        Err(EndpointError::Api {
            code: i64::from(status.as_u16()),
            description: if body.error.is_empty() {
                status.to_string()
            } else {
                body.error
            },
        })
    }

    async fn verify_credentials(&self) -> EndpointResult<Account> {
        let response = self
            .http
            .get(self.url("/api/v1/accounts/verify_credentials"))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        Self::read(response).await
    }

    async fn post_status(&self, text: &str) -> EndpointResult<Status> {
        let response = self
            .http
            .post(self.url("/api/v1/statuses"))
            .bearer_auth(&self.access_token)
            .json(&StatusParams { status: text })
            .send()
            .await?;
        Self::read(response).await
    }

    async fn update_status(&self, id: &str, text: &str) -> EndpointResult<Status> {
        let response = self
            .http
            .put(self.url(&format!("/api/v1/statuses/{}", id)))
            .bearer_auth(&self.access_token)
            .json(&StatusParams { status: text })
            .send()
            .await?;
        Self::read(response).await
    }

    /// Open the user stream and frame it into lines.
    async fn open_stream(&self) -> EndpointResult<EventLines> {
        let response = self
            .http
            .get(self.url("/api/v1/streaming/user"))
            .bearer_auth(&self.access_token)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?
            .error_for_status()?;

        let body: BoxStream<'static, io::Result<Bytes>> = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
            .boxed();
        Ok(FramedRead::new(
            StreamReader::new(body),
            LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        ))
    }
}

/// How a streaming connection ended without error.
#[derive(Debug, PartialEq, Eq)]
enum StreamEnd {
    /// Shutdown requested or the bridge stopped consuming updates.
    Stop,
    /// Server closed the connection.
    Closed,
}

/// Mastodon account endpoint.
pub struct MastodonEndpoint {
    id: EndpointId,
    api: Option<MastodonApi>,
}

impl MastodonEndpoint {
    pub fn new(id: EndpointId) -> Self {
        Self { id, api: None }
    }

    fn api(&self) -> EndpointResult<&MastodonApi> {
        self.api.as_ref().ok_or_else(|| EndpointError::Transport {
            message: format!("mastodon endpoint {} is not initialized", self.id),
        })
    }

    /// Forward events of one connection until it ends.
    async fn pump(
        &self,
        api: &MastodonApi,
        lines: &mut EventLines,
        shutdown: &mut watch::Receiver<bool>,
        updates: &mpsc::Sender<Update>,
    ) -> EndpointResult<StreamEnd> {
        let mut parser = SseParser::default();

        loop {
            let line = tokio::select! {
                line = lines.next() => line,
                _ = wait_for_shutdown(shutdown) => return Ok(StreamEnd::Stop),
            };
            let line = match line {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    return Err(EndpointError::Transport {
                        message: e.to_string(),
                    })
                }
                None => return Ok(StreamEnd::Closed),
            };

            let Some(event) = parser.push_line(&line) else {
                continue;
            };
            let Some(update) = convert_event(self.id, &api.account_id, &event) else {
                continue;
            };
            debug!(eid = %self.id, key = %update.key, kind = %update.kind(), "Mastodon update");
            if !emit(updates, shutdown, update).await {
                return Ok(StreamEnd::Stop);
            }
        }
    }
}

#[async_trait]
impl Endpoint for MastodonEndpoint {
    fn id(&self) -> EndpointId {
        self.id
    }

    fn platform(&self) -> Platform {
        Platform::Mastodon
    }

    async fn initialize(&mut self, config: &EndpointConfig) -> Result<(), ConfigError> {
        let EndpointConfig::Mastodon(config) = config else {
            return Err(wrong_platform(Platform::Mastodon, config));
        };

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: format!("endpoints[id={}]", self.id),
                message: format!("failed to build HTTP client: {}", e),
            })?;

        let mut api = MastodonApi {
            http,
            instance: config.instance.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            account_id: String::new(),
        };

        let account = api
            .verify_credentials()
            .await
            .map_err(|e| ConfigError::InvalidValue {
                field: format!("endpoints[id={}].access_token", self.id),
                message: format!("{} rejected the access token: {}", api.instance, e),
            })?;
        if config.client_id.is_some() || config.client_secret.is_some() {
            debug!("Mastodon endpoint {} has app credentials; only the access token is used", self.id);
        }
        info!(
            "Mastodon endpoint {} authorized as @{} on {}",
            self.id, account.acct, api.instance
        );

        api.account_id = account.id;
        self.api = Some(api);
        Ok(())
    }

    async fn listen_updates(
        &self,
        mut shutdown: watch::Receiver<bool>,
        updates: mpsc::Sender<Update>,
    ) -> EndpointResult<()> {
        let api = self.api()?;
        let mut backoff = stream_backoff();

        loop {
            if *shutdown.borrow() {
                break;
            }

            info!("Connecting Mastodon endpoint {} to the streaming API...", self.id);
            let opened = tokio::select! {
                opened = api.open_stream() => opened,
                _ = wait_for_shutdown(&mut shutdown) => break,
            };

            let failure = match opened {
                Ok(mut lines) => {
                    info!("Mastodon endpoint {} streaming", self.id);
                    backoff = stream_backoff();
                    match self.pump(api, &mut lines, &mut shutdown, &updates).await {
                        Ok(StreamEnd::Stop) => break,
                        Ok(StreamEnd::Closed) => "stream closed by server".to_string(),
                        Err(e) => e.to_string(),
                    }
                }
                Err(e) => e.to_string(),
            };

            let Some(delay) = backoff.next() else {
                return Err(EndpointError::Transport {
                    message: format!("giving up on the streaming API: {}", failure),
                });
            };
            warn!(
                "Mastodon endpoint {} disconnected: {}. Reconnecting in {:.1}s...",
                self.id,
                failure,
                delay.as_secs_f64()
            );
            tokio::select! {
                _ = sleep(delay) => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        info!("Mastodon endpoint {} stopped listening", self.id);
        Ok(())
    }

    async fn apply_new(&self, content: &Content) -> EndpointResult<(PlatformMessageId, Revision)> {
        let status = self.api()?.post_status(&content.markdown).await?;
        debug!("Status {} posted to Mastodon endpoint {}", status.id, self.id);
        Ok((PlatformMessageId::from(status.id), Revision::new(status.created_at)))
    }

    async fn apply_edit(&self, id: &PlatformMessageId, content: &Content) -> EndpointResult<Revision> {
        let status = self.api()?.update_status(id.as_str(), &content.markdown).await?;
        let edited_at = status.edited_at.ok_or(EndpointError::MissingRevision)?;
        debug!("Status {} edited on Mastodon endpoint {}", status.id, self.id);
        Ok(Revision::new(edited_at))
    }

    async fn apply_delete(&self, _id: &PlatformMessageId) -> EndpointResult<()> {
        Err(EndpointError::Unsupported)
    }
}

/// Translate a streaming event into a canonical update.
///
/// Only `update` and `status.update` events for original statuses of the
/// authenticated account are bridged.
fn convert_event(endpoint: EndpointId, own_account: &str, event: &SseEvent) -> Option<Update> {
    let is_edit = match event.event.as_str() {
        "update" => false,
        "status.update" => true,
        other => {
            debug!("Ignoring Mastodon '{}' event", other);
            return None;
        }
    };

    let status: Status = match parse_payload(&event.data) {
        Ok(status) => status,
        Err(e) => {
            warn!("Failed to decode Mastodon '{}' payload: {}", event.event, e);
            return None;
        }
    };

    if status.account.id != own_account {
        debug!("Ignoring status {} of account {}", status.id, status.account.acct);
        return None;
    }
    if status.reblog.is_some() {
        debug!("Ignoring reblog {}", status.id);
        return None;
    }

    let key = MessageKey::new(endpoint, status.id);
    let content = Content::text(html_to_markdown(&status.content));
    if is_edit {
        let Some(edited_at) = status.edited_at else {
            warn!("Edited status {} carries no edited_at", key);
            return None;
        };
        Some(Update::edit(key, content, Revision::new(edited_at)))
    } else {
        Some(Update::new_message(key, content, Revision::new(status.created_at)))
    }
}

fn parse_payload<T: DeserializeOwned>(data: &str) -> serde_json::Result<T> {
    serde_json::from_str(data)
}
