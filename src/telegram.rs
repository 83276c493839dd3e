//! Telegram Bot API adapter.
//!
//! * albums of 2–10 pages go out as one `sendMediaGroup` call, uploaded as
//!   multipart parts referenced by `attach://photoN`;
//! * an album of one page uses `sendPhoto`, since media groups need two items;
//! * notices use `sendMessage`;
//! * `getUpdates` long polling feeds the command loop in the binary.
//!
//! ## Error mapping
//!
//! | Response | [`SendError`] |
//! |----------|---------------|
//! | 429 | `RateLimited { wait: parameters.retry_after }` (5 s if absent) |
//! | 400, 401, 403, 404 | `Fatal` |
//! | anything else, network errors | `Transient` |

use crate::error::{DeliveryError, SendError};
use crate::pipeline::render::PageImage;
use crate::transport::{BatchSender, ChatTarget, Notifier};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Wait used when a 429 carries no `retry_after`.
pub const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(5);

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub error_code: Option<u16>,
    #[serde(default)]
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResponseParameters {
    #[serde(default)]
    pub retry_after: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

// ── Error classification ─────────────────────────────────────────────────

/// Map a failed Bot API call onto a [`SendError`] class.
pub fn classify_failure(code: u16, description: &str, retry_after: Option<u64>) -> SendError {
    match code {
        429 => SendError::RateLimited {
            wait: retry_after
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RATE_LIMIT_WAIT),
        },
        400 | 401 | 403 | 404 => SendError::Fatal(format!("{code}: {description}")),
        _ => SendError::Transient(format!("{code}: {description}")),
    }
}

/// The `media` field of `sendMediaGroup` for `count` attached photos.
pub fn media_manifest(count: usize, caption: Option<&str>) -> serde_json::Value {
    let items: Vec<serde_json::Value> = (0..count)
        .map(|i| {
            let mut item = json!({ "type": "photo", "media": format!("attach://photo{i}") });
            if i == 0 {
                if let Some(text) = caption {
                    item["caption"] = json!(text);
                }
            }
            item
        })
        .collect();
    serde_json::Value::Array(items)
}

async fn photo_part(page: &PageImage) -> Result<Part, SendError> {
    let bytes = tokio::fs::read(&page.path).await.map_err(|e| {
        SendError::Fatal(format!("cannot read page image '{}': {}", page.path.display(), e))
    })?;
    let file_name = page
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("page_{:05}.jpg", page.ordinal));
    Part::bytes(bytes)
        .file_name(file_name)
        .mime_str("image/jpeg")
        .map_err(|e| SendError::Fatal(e.to_string()))
}

// ── Client ───────────────────────────────────────────────────────────────

/// A Bot API client bound to one token.
#[derive(Clone)]
pub struct TelegramBot {
    client: reqwest::Client,
    base: String,
}

impl std::fmt::Debug for TelegramBot {
    // The base URL embeds the token.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBot").finish_non_exhaustive()
    }
}

impl TelegramBot {
    pub fn new(token: &str, timeout: Duration) -> Result<Self, DeliveryError> {
        Self::with_api_base(DEFAULT_API_BASE, token, timeout)
    }

    /// Point the client at a self-hosted Bot API server.
    pub fn with_api_base(api_base: &str, token: &str, timeout: Duration) -> Result<Self, DeliveryError> {
        if token.trim().is_empty() {
            return Err(DeliveryError::InvalidConfig("Telegram bot token is empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base: format!("{}/bot{}", api_base.trim_end_matches('/'), token.trim()),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, SendError> {
        let response = request
            .send()
            .await
            .map_err(|e| SendError::Transient(format!("{method}: {}", e.without_url())))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| SendError::Transient(format!("{method}: {}", e.without_url())))?;

        let parsed: ApiResponse<T> = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) if status >= 400 => return Err(classify_failure(status, "unreadable error body", None)),
            Err(e) => return Err(SendError::Transient(format!("{method}: bad response: {e}"))),
        };

        if parsed.ok {
            if let Some(result) = parsed.result {
                return Ok(result);
            }
        }
        let code = parsed.error_code.unwrap_or(status);
        let description = parsed.description.unwrap_or_else(|| "no description".into());
        let retry_after = parsed.parameters.and_then(|p| p.retry_after);
        debug!("{} failed with {}: {}", method, code, description);
        Err(classify_failure(code, &description, retry_after))
    }

    pub async fn get_me(&self) -> Result<User, SendError> {
        self.call("getMe", self.client.get(self.url("getMe"))).await
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64, poll: Duration) -> Result<Vec<Update>, SendError> {
        let request = self
            .client
            .post(self.url("getUpdates"))
            .timeout(poll + Duration::from_secs(10))
            .json(&json!({
                "offset": offset,
                "timeout": poll.as_secs(),
                "allowed_updates": ["message"],
            }));
        self.call("getUpdates", request).await
    }

    async fn send_photo(
        &self,
        target: ChatTarget,
        page: &PageImage,
        caption: Option<&str>,
    ) -> Result<(), SendError> {
        let mut form = Form::new()
            .text("chat_id", target.0.to_string())
            .part("photo", photo_part(page).await?);
        if let Some(text) = caption {
            form = form.text("caption", text.to_string());
        }
        let request = self.client.post(self.url("sendPhoto")).multipart(form);
        self.call::<serde_json::Value>("sendPhoto", request).await?;
        Ok(())
    }

    async fn send_media_group(
        &self,
        target: ChatTarget,
        images: &[PageImage],
        caption: Option<&str>,
    ) -> Result<(), SendError> {
        let mut form = Form::new()
            .text("chat_id", target.0.to_string())
            .text("media", media_manifest(images.len(), caption).to_string());
        for (i, page) in images.iter().enumerate() {
            form = form.part(format!("photo{i}"), photo_part(page).await?);
        }
        let request = self.client.post(self.url("sendMediaGroup")).multipart(form);
        self.call::<serde_json::Value>("sendMediaGroup", request).await?;
        Ok(())
    }
}

#[async_trait]
impl BatchSender for TelegramBot {
    async fn send_group(
        &self,
        target: ChatTarget,
        images: &[PageImage],
        caption: Option<&str>,
    ) -> Result<(), SendError> {
        match images {
            [] => Ok(()),
            [single] => self.send_photo(target, single, caption).await,
            _ => self.send_media_group(target, images, caption).await,
        }
    }
}

#[async_trait]
impl Notifier for TelegramBot {
    async fn notify(&self, target: ChatTarget, text: &str) -> Result<(), SendError> {
        let request = self
            .client
            .post(self.url("sendMessage"))
            .json(&json!({ "chat_id": target.0, "text": text }));
        self.call::<serde_json::Value>("sendMessage", request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_many_requests_uses_retry_after() {
        match classify_failure(429, "Too Many Requests: retry after 17", Some(17)) {
            SendError::RateLimited { wait } => assert_eq!(wait, Duration::from_secs(17)),
            other => panic!("expected RateLimited, got {other:?}"),
        }
        match classify_failure(429, "Too Many Requests", None) {
            SendError::RateLimited { wait } => assert_eq!(wait, DEFAULT_RATE_LIMIT_WAIT),
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn client_errors_are_fatal_and_server_errors_transient() {
        assert!(matches!(
            classify_failure(400, "Bad Request: chat not found", None),
            SendError::Fatal(_)
        ));
        assert!(matches!(classify_failure(403, "Forbidden", None), SendError::Fatal(_)));
        assert!(matches!(
            classify_failure(502, "Bad Gateway", None),
            SendError::Transient(_)
        ));
    }

    #[test]
    fn media_manifest_captions_first_item_only() {
        let media = media_manifest(3, Some("doc.pdf (3 pages)"));
        let items = media.as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["media"], "attach://photo0");
        assert_eq!(items[0]["caption"], "doc.pdf (3 pages)");
        assert_eq!(items[2]["media"], "attach://photo2");
        assert!(items[1].get("caption").is_none());
        assert!(items.iter().all(|i| i["type"] == "photo"));
    }

    #[test]
    fn rate_limit_response_parses() {
        let body = r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 8","parameters":{"retry_after":8}}"#;
        let parsed: ApiResponse<serde_json::Value> = serde_json::from_str(body).unwrap();
        assert!(!parsed.ok);
        assert_eq!(parsed.error_code, Some(429));
        assert_eq!(parsed.parameters.unwrap().retry_after, Some(8));
    }

    #[test]
    fn updates_parse() {
        let body = r#"{"ok":true,"result":[{"update_id":5,"message":{"message_id":1,
            "chat":{"id":-100,"type":"group"},"from":{"id":42,"username":"amir"},
            "text":"/download"}}]}"#;
        let parsed: ApiResponse<Vec<Update>> = serde_json::from_str(body).unwrap();
        let updates = parsed.result.unwrap();
        assert_eq!(updates[0].update_id, 5);
        let msg = updates[0].message.as_ref().unwrap();
        assert_eq!(msg.chat.id, -100);
        assert_eq!(msg.text.as_deref(), Some("/download"));
    }

    #[test]
    fn result_of_a_type_without_default_parses() {
        let body = r#"{"ok":true,"result":{"id":7,"is_bot":true,"username":"album_bot"}}"#;
        let parsed: ApiResponse<User> = serde_json::from_str(body).unwrap();
        let me = parsed.result.unwrap();
        assert_eq!(me.id, 7);
        assert_eq!(me.username.as_deref(), Some("album_bot"));

        let failed: ApiResponse<User> =
            serde_json::from_str(r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#).unwrap();
        assert!(failed.result.is_none());
    }

    #[test]
    fn empty_token_rejected() {
        assert!(TelegramBot::new("  ", Duration::from_secs(5)).is_err());
    }

    #[test]
    fn debug_hides_token() {
        let bot = TelegramBot::new("123:secret", Duration::from_secs(5)).unwrap();
        assert!(!format!("{bot:?}").contains("secret"));
    }
}
