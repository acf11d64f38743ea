//! Telegram channel endpoint over the Bot API.
//!
//! Listens with `getUpdates` long polling and posts with `sendMessage` /
//! `editMessageText`. Only posts of the configured channel are bridged.

use std::time::Duration;

use async_trait::async_trait;
use backon::BackoffBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{emit, wait_for_shutdown, wrong_platform, Endpoint, Platform};
use crate::common::error::{ConfigError, EndpointError, EndpointResult};
use crate::common::types::{Content, EndpointId, MessageKey, PlatformMessageId, Revision, Update};
use crate::config::types::EndpointConfig;

/// Server-side long poll duration, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Update types requested from `getUpdates`.
const ALLOWED_UPDATES: [&str; 2] = ["channel_post", "edited_channel_post"];

/// Backoff for failed polls: 1s initial, 1min max, factor 2, with jitter, 10 attempts.
fn poll_backoff() -> impl Iterator<Item = Duration> {
    backon::ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(60))
        .with_factor(2.0)
        .with_jitter()
        .with_max_times(10)
        .build()
}

/// Bot API response envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> EndpointResult<T> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(EndpointError::Api {
                code: self.error_code.unwrap_or_default(),
                description: self
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUpdate {
    update_id: i64,
    channel_post: Option<TgMessage>,
    edited_channel_post: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    date: i64,
    edit_date: Option<i64>,
    chat: TgChat,
    text: Option<String>,
    caption: Option<String>,
}

impl TgMessage {
    fn body(&self) -> Option<&str> {
        self.text.as_deref().or(self.caption.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
}

#[derive(Debug, Serialize)]
struct GetUpdates<'a> {
    offset: i64,
    timeout: u64,
    allowed_updates: &'a [&'a str],
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct EditMessageText<'a> {
    chat_id: i64,
    message_id: i64,
    text: &'a str,
}

/// Thin Bot API client bound to one bot and one channel.
#[derive(Debug, Clone)]
struct BotApi {
    http: reqwest::Client,
    /// `<api_url>/bot<token>`
    base: String,
    channel_id: i64,
}

impl BotApi {
    async fn call<P, T>(&self, method: &str, params: &P, timeout: Option<Duration>) -> EndpointResult<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.http.post(format!("{}/{}", self.base, method)).json(params);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response: ApiResponse<T> = request.send().await?.json().await?;
        response.into_result()
    }

    async fn get_me(&self) -> EndpointResult<TgUser> {
        self.call("getMe", &serde_json::json!({}), None).await
    }

    async fn get_updates(&self, offset: i64) -> EndpointResult<Vec<TgUpdate>> {
        let params = GetUpdates {
            offset,
            timeout: POLL_TIMEOUT_SECS,
            allowed_updates: &ALLOWED_UPDATES,
        };
        // Leave room for the server to answer an expired poll.
        let timeout = Duration::from_secs(POLL_TIMEOUT_SECS + 15);
        self.call("getUpdates", &params, Some(timeout)).await
    }

    async fn send_message(&self, text: &str) -> EndpointResult<TgMessage> {
        let params = SendMessage {
            chat_id: self.channel_id,
            text,
        };
        self.call("sendMessage", &params, None).await
    }

    async fn edit_message_text(&self, message_id: i64, text: &str) -> EndpointResult<TgMessage> {
        let params = EditMessageText {
            chat_id: self.channel_id,
            message_id,
            text,
        };
        self.call("editMessageText", &params, None).await
    }
}

/// Telegram channel endpoint.
pub struct TelegramEndpoint {
    id: EndpointId,
    api: Option<BotApi>,
}

impl TelegramEndpoint {
    pub fn new(id: EndpointId) -> Self {
        Self { id, api: None }
    }

    fn api(&self) -> EndpointResult<&BotApi> {
        self.api.as_ref().ok_or_else(|| EndpointError::Transport {
            message: format!("telegram endpoint {} is not initialized", self.id),
        })
    }
}

#[async_trait]
impl Endpoint for TelegramEndpoint {
    fn id(&self) -> EndpointId {
        self.id
    }

    fn platform(&self) -> Platform {
        Platform::Telegram
    }

    async fn initialize(&mut self, config: &EndpointConfig) -> Result<(), ConfigError> {
        let EndpointConfig::Telegram(config) = config else {
            return Err(wrong_platform(Platform::Telegram, config));
        };

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: format!("endpoints[id={}]", self.id),
                message: format!("failed to build HTTP client: {}", e),
            })?;

        let api = BotApi {
            http,
            base: format!("{}/bot{}", config.api_url.trim_end_matches('/'), config.bot_token),
            channel_id: config.channel_id,
        };

        let me = api.get_me().await.map_err(|e| ConfigError::InvalidValue {
            field: format!("endpoints[id={}].bot_token", self.id),
            message: format!("Telegram rejected the bot token: {}", e),
        })?;
        info!(
            "Telegram endpoint {} authorized as @{} ({}), bridging channel {}",
            self.id,
            me.username.as_deref().unwrap_or("unknown"),
            me.id,
            config.channel_id
        );

        self.api = Some(api);
        Ok(())
    }

    async fn listen_updates(
        &self,
        mut shutdown: watch::Receiver<bool>,
        updates: mpsc::Sender<Update>,
    ) -> EndpointResult<()> {
        let api = self.api()?;
        let mut offset = 0;
        let mut backoff = poll_backoff();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let polled = tokio::select! {
                polled = api.get_updates(offset) => polled,
                _ = wait_for_shutdown(&mut shutdown) => break,
            };

            match polled {
                Ok(batch) => {
                    backoff = poll_backoff();
                    for raw in batch {
                        offset = offset.max(raw.update_id + 1);
                        let Some(update) = convert_update(self.id, api.channel_id, raw) else {
                            continue;
                        };
                        debug!(eid = %self.id, key = %update.key, kind = %update.kind(), "Telegram update");
                        if !emit(&updates, &mut shutdown, update).await {
                            return Ok(());
                        }
                    }
                }
                Err(e) => {
                    let Some(delay) = backoff.next() else {
                        return Err(EndpointError::Transport {
                            message: format!("giving up on getUpdates after repeated failures: {}", e),
                        });
                    };
                    warn!(
                        "Telegram endpoint {} poll failed: {}. Retrying in {:.1}s...",
                        self.id,
                        e,
                        delay.as_secs_f64()
                    );
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = wait_for_shutdown(&mut shutdown) => break,
                    }
                }
            }
        }

        info!("Telegram endpoint {} stopped listening", self.id);
        Ok(())
    }

    async fn apply_new(&self, content: &Content) -> EndpointResult<(PlatformMessageId, Revision)> {
        let message = self.api()?.send_message(&content.markdown).await?;
        let revision = Revision::from_unix_seconds(message.date).ok_or(EndpointError::MissingRevision)?;
        debug!("Message {} sent to Telegram endpoint {}", message.message_id, self.id);
        Ok((PlatformMessageId::from(message.message_id), revision))
    }

    async fn apply_edit(&self, id: &PlatformMessageId, content: &Content) -> EndpointResult<Revision> {
        let message_id = parse_message_id(id)?;
        let message = self.api()?.edit_message_text(message_id, &content.markdown).await?;
        let revision = message
            .edit_date
            .and_then(Revision::from_unix_seconds)
            .ok_or(EndpointError::MissingRevision)?;
        debug!("Message {} edited on Telegram endpoint {}", message.message_id, self.id);
        Ok(revision)
    }

    async fn apply_delete(&self, _id: &PlatformMessageId) -> EndpointResult<()> {
        Err(EndpointError::Unsupported)
    }
}

fn parse_message_id(id: &PlatformMessageId) -> EndpointResult<i64> {
    id.as_str()
        .parse()
        .map_err(|_| EndpointError::InvalidMessageId { id: id.to_string() })
}

/// Translate one Bot API update into a canonical update.
///
/// Returns `None` for posts of other chats, posts without text and edits
/// without an edit date.
fn convert_update(endpoint: EndpointId, channel_id: i64, update: TgUpdate) -> Option<Update> {
    if let Some(post) = update.channel_post {
        if post.chat.id != channel_id {
            debug!("Ignoring post from foreign chat {}", post.chat.id);
            return None;
        }
        let Some(body) = post.body() else {
            debug!("Ignoring channel post {} without text", post.message_id);
            return None;
        };
        let revision = Revision::from_unix_seconds(post.date)?;
        let key = MessageKey::new(endpoint, post.message_id);
        return Some(Update::new_message(key, Content::text(body), revision));
    }

    if let Some(post) = update.edited_channel_post {
        if post.chat.id != channel_id {
            debug!("Ignoring edit from foreign chat {}", post.chat.id);
            return None;
        }
        let Some(body) = post.body() else {
            debug!("Ignoring edit of channel post {} without text", post.message_id);
            return None;
        };
        let Some(revision) = post.edit_date.and_then(Revision::from_unix_seconds) else {
            warn!("Edited channel post {} carries no edit_date", post.message_id);
            return None;
        };
        let key = MessageKey::new(endpoint, post.message_id);
        return Some(Update::edit(key, Content::text(body), revision));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{Change, UpdateKind};
    use crate::config::types::MastodonConfig;

    const CHANNEL: i64 = -1001234567890;

    fn parse_update(json: &str) -> TgUpdate {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_channel_post_becomes_new() {
        let raw = parse_update(
            r#"{
                "update_id": 900,
                "channel_post": {
                    "message_id": 42,
                    "date": 1700000000,
                    "chat": { "id": -1001234567890, "type": "channel", "title": "news" },
                    "text": "hello"
                }
            }"#,
        );

        let update = convert_update(EndpointId(2), CHANNEL, raw).unwrap();
        assert_eq!(update.key, MessageKey::new(EndpointId(2), "42"));
        assert_eq!(update.kind(), UpdateKind::New);
        assert_eq!(update.revision, Revision::from_unix_seconds(1700000000).unwrap());
        assert_eq!(update.change, Change::New(Content::text("hello")));
    }

    #[test]
    fn test_edited_post_uses_edit_date() {
        let raw = parse_update(
            r#"{
                "update_id": 901,
                "edited_channel_post": {
                    "message_id": 42,
                    "date": 1700000000,
                    "edit_date": 1700000060,
                    "chat": { "id": -1001234567890, "type": "channel" },
                    "text": "hello, edited"
                }
            }"#,
        );

        let update = convert_update(EndpointId(2), CHANNEL, raw).unwrap();
        assert_eq!(update.kind(), UpdateKind::Edit);
        assert_eq!(update.revision, Revision::from_unix_seconds(1700000060).unwrap());
        assert_eq!(update.content().unwrap().markdown, "hello, edited");
    }

    #[test]
    fn test_caption_is_used_when_text_missing() {
        let raw = parse_update(
            r#"{
                "update_id": 902,
                "channel_post": {
                    "message_id": 43,
                    "date": 1700000100,
                    "chat": { "id": -1001234567890, "type": "channel" },
                    "caption": "a photo"
                }
            }"#,
        );

        let update = convert_update(EndpointId(2), CHANNEL, raw).unwrap();
        assert_eq!(update.content().unwrap().markdown, "a photo");
    }

    #[test]
    fn test_unbridgeable_updates_are_dropped() {
        let foreign = parse_update(
            r#"{
                "update_id": 903,
                "channel_post": {
                    "message_id": 1, "date": 1700000000,
                    "chat": { "id": -100999, "type": "channel" }, "text": "elsewhere"
                }
            }"#,
        );
        assert!(convert_update(EndpointId(2), CHANNEL, foreign).is_none());

        let no_text = parse_update(
            r#"{
                "update_id": 904,
                "channel_post": {
                    "message_id": 2, "date": 1700000000,
                    "chat": { "id": -1001234567890, "type": "channel" }
                }
            }"#,
        );
        assert!(convert_update(EndpointId(2), CHANNEL, no_text).is_none());

        let no_edit_date = parse_update(
            r#"{
                "update_id": 905,
                "edited_channel_post": {
                    "message_id": 3, "date": 1700000000,
                    "chat": { "id": -1001234567890, "type": "channel" }, "text": "x"
                }
            }"#,
        );
        assert!(convert_update(EndpointId(2), CHANNEL, no_edit_date).is_none());

        let other_kind = parse_update(r#"{ "update_id": 906, "message": { "message_id": 4 } }"#);
        assert!(convert_update(EndpointId(2), CHANNEL, other_kind).is_none());
    }

    #[test]
    fn test_api_error_envelope() {
        let response: ApiResponse<TgMessage> = serde_json::from_str(
            r#"{ "ok": false, "error_code": 400, "description": "Bad Request: message is not modified" }"#,
        )
        .unwrap();

        match response.into_result() {
            Err(EndpointError::Api { code, description }) => {
                assert_eq!(code, 400);
                assert!(description.contains("not modified"));
            }
            other => panic!("expected API error, got {:?}", other),
        }
    }

    #[test]
    fn test_get_updates_request_shape() {
        let params = GetUpdates {
            offset: 17,
            timeout: POLL_TIMEOUT_SECS,
            allowed_updates: &ALLOWED_UPDATES,
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "offset": 17,
                "timeout": 30,
                "allowed_updates": ["channel_post", "edited_channel_post"],
            })
        );
    }

    #[test]
    fn test_message_id_must_be_numeric() {
        assert_eq!(parse_message_id(&PlatformMessageId::from("42")).unwrap(), 42);
        assert!(matches!(
            parse_message_id(&PlatformMessageId::from("abc")),
            Err(EndpointError::InvalidMessageId { .. })
        ));
    }

    #[tokio::test]
    async fn test_uninitialized_endpoint_fails_calls() {
        let endpoint = TelegramEndpoint::new(EndpointId(2));
        let result = endpoint.apply_new(&Content::text("hello")).await;
        assert!(matches!(result, Err(EndpointError::Transport { .. })));
        assert!(matches!(
            endpoint.apply_delete(&PlatformMessageId::from("1")).await,
            Err(EndpointError::Unsupported)
        ));
    }

    #[tokio::test]
    async fn test_initialize_rejects_other_platform_config() {
        let mut endpoint = TelegramEndpoint::new(EndpointId(1));
        let config = EndpointConfig::Mastodon(MastodonConfig {
            id: 1,
            instance: "https://example.social".to_string(),
            access_token: "token".to_string(),
            client_id: None,
            client_secret: None,
        });
        let err = endpoint.initialize(&config).await.unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
