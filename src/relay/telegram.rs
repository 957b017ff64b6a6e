//! Telegram bot API sink
//!
//! Uploads go through `sendDocument` as multipart forms; status messages go
//! through `sendMessage`. A 429 reply carries `parameters.retry_after`,
//! which is surfaced as [`SinkError::RateLimited`].

use super::{ArtifactReceipt, RelaySink, SinkError, Upload};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Longest caption the bot API accepts
pub const MAX_CAPTION_CHARS: usize = 1024;

/// Uploads can be slow; give them more room than page fetches
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
struct ApiReply<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    parameters: Option<ReplyParameters>,
}

#[derive(Debug, Deserialize)]
struct ReplyParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
    document: Option<SentDocument>,
}

#[derive(Debug, Deserialize)]
struct SentDocument {
    file_id: String,
    file_unique_id: Option<String>,
    file_size: Option<u64>,
}

/// Relays artifacts to a Telegram chat
pub struct TelegramSink {
    client: Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(bot_token: &str, chat_id: &str) -> Result<Self, reqwest::Error> {
        Self::with_api_base(TELEGRAM_API_BASE, bot_token, chat_id)
    }

    /// Points the sink at a different API host
    pub fn with_api_base(
        api_base: &str,
        bot_token: &str,
        chat_id: &str,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(UPLOAD_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    async fn read_reply<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, SinkError> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let reply: ApiReply<T> = match serde_json::from_str(&text) {
            Ok(reply) => reply,
            Err(e) if status.is_success() => return Err(SinkError::Decode(e.to_string())),
            Err(_) => {
                return Err(classify_status(status, None, text));
            }
        };

        if reply.ok {
            return reply
                .result
                .ok_or_else(|| SinkError::Decode("reply without result".to_string()));
        }

        let retry_after = reply
            .parameters
            .and_then(|p| p.retry_after)
            .map(Duration::from_secs);
        let message = reply.description.unwrap_or_else(|| status.to_string());
        Err(classify_status(status, retry_after, message))
    }
}

fn classify_status(status: StatusCode, retry_after: Option<Duration>, message: String) -> SinkError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        SinkError::RateLimited { retry_after }
    } else if status.is_server_error() {
        SinkError::Transport(format!("HTTP {}: {}", status.as_u16(), message))
    } else {
        SinkError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl RelaySink for TelegramSink {
    async fn upload(&self, upload: &Upload<'_>) -> Result<ArtifactReceipt, SinkError> {
        let document = Part::bytes(upload.bytes.to_vec())
            .file_name(upload.filename.to_string())
            .mime_str(upload.mime_type)
            .map_err(|e| SinkError::Decode(e.to_string()))?;

        let form = Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", upload.caption.to_string())
            .text("parse_mode", "HTML")
            .part("document", document);

        tracing::debug!(
            filename = %upload.filename,
            bytes = upload.bytes.len(),
            "Uploading document"
        );

        let response = self
            .client
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let message: SentMessage = Self::read_reply(response).await?;
        let document = message
            .document
            .ok_or_else(|| SinkError::Decode("reply without document".to_string()))?;

        Ok(ArtifactReceipt {
            reference: document.file_id,
            unique_id: document.file_unique_id,
            size: document.file_size.unwrap_or(upload.bytes.len() as u64),
            message_id: Some(message.message_id),
        })
    }

    async fn notify(&self, text: &str) -> Result<(), SinkError> {
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
                "parse_mode": "HTML",
            }))
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let _: serde_json::Value = Self::read_reply(response).await?;
        Ok(())
    }
}
