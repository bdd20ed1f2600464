//! Telegram Bot API Client
//!
//! Hand-rolled client over `reqwest`. Only the handful of methods the bot
//! actually calls are wrapped; response envelopes are decoded into the small
//! serde types below and everything else Telegram sends is ignored.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;

use crate::artifacts::{ArtifactHandle, WorkDir};
use crate::events::{ChatEvent, ChatId, MediaPayload};
use crate::responder::{Choice, ChoiceAction, DeliveryError, DialogueResponder};

/// Telegram API errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Telegram answered `ok: false`.
    #[error("telegram rejected the request: {0}")]
    Rejected(String),

    /// Writing a downloaded file to disk failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ApiError> for DeliveryError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Rejected(reason) => DeliveryError::Rejected(reason),
            other => DeliveryError::Transport(other.to_string()),
        }
    }
}

/// Response envelope every Bot API method returns.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<T, ApiError> {
        if self.ok {
            self.result.ok_or_else(|| {
                ApiError::Rejected("ok response without a result".to_string())
            })
        } else {
            Err(ApiError::Rejected(
                self.description
                    .unwrap_or_else(|| "no description".to_string()),
            ))
        }
    }
}

/// One long-poll update.
#[derive(Clone, Debug, Deserialize)]
pub struct Update {
    /// Monotonic update id; the poll offset is derived from it.
    pub update_id: i64,
    /// Present for ordinary messages.
    #[serde(default)]
    pub message: Option<Message>,
    /// Present for inline button presses.
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

/// An inbound message, reduced to the fields the bot reads.
#[derive(Clone, Debug, Deserialize)]
pub struct Message {
    /// Chat the message arrived in.
    pub chat: Chat,
    /// Text content, when present.
    #[serde(default)]
    pub text: Option<String>,
    /// Video attachment, when present.
    #[serde(default)]
    pub video: Option<FileRef>,
    /// Generic document attachment, when present.
    #[serde(default)]
    pub document: Option<FileRef>,
}

/// Chat identity envelope.
#[derive(Clone, Debug, Deserialize)]
pub struct Chat {
    /// The chat id.
    pub id: i64,
}

/// Reference to a file stored on Telegram's servers.
#[derive(Clone, Debug, Deserialize)]
pub struct FileRef {
    /// Opaque id used with `getFile`.
    pub file_id: String,
    /// Mime type, when Telegram knows it.
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Size in bytes, when Telegram knows it.
    #[serde(default)]
    pub file_size: Option<u64>,
    /// Original file name, when Telegram knows it.
    #[serde(default)]
    pub file_name: Option<String>,
}

/// An inline button press.
#[derive(Clone, Debug, Deserialize)]
pub struct CallbackQuery {
    /// Query id, acknowledged via `answerCallbackQuery`.
    pub id: String,
    /// The button's callback token.
    #[serde(default)]
    pub data: Option<String>,
    /// The message the button was attached to.
    #[serde(default)]
    pub message: Option<Message>,
}

/// `getFile` response.
#[derive(Clone, Debug, Deserialize)]
struct FileInfo {
    #[serde(default)]
    file_path: Option<String>,
}

/// What an update means to the bot, before any file transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateKind {
    /// `/start` command.
    Start(ChatId),
    /// A media attachment to fetch.
    Media(ChatId, FileRefFields),
    /// Plain text.
    Text(ChatId, String),
    /// An inline button press to acknowledge and forward.
    Choice {
        /// Chat the button belongs to.
        chat: ChatId,
        /// The callback token.
        token: String,
        /// Query id for the acknowledgment.
        callback_id: String,
    },
    /// Anything the bot does not handle.
    Ignored,
}

/// The fields of a [`FileRef`] the bot carries forward.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRefFields {
    /// Opaque id used with `getFile`.
    pub file_id: String,
    /// Mime type hint.
    pub mime_type: Option<String>,
    /// Size hint in bytes.
    pub file_size: Option<u64>,
    /// Original file name hint.
    pub file_name: Option<String>,
}

impl From<FileRef> for FileRefFields {
    fn from(file: FileRef) -> Self {
        Self {
            file_id: file.file_id,
            mime_type: file.mime_type,
            file_size: file.file_size,
            file_name: file.file_name,
        }
    }
}

/// Classify an update without touching the network.
#[must_use]
pub fn classify(update: &Update) -> UpdateKind {
    if let Some(query) = &update.callback_query {
        let Some(message) = &query.message else {
            return UpdateKind::Ignored;
        };
        let Some(token) = &query.data else {
            return UpdateKind::Ignored;
        };
        return UpdateKind::Choice {
            chat: ChatId::new(message.chat.id),
            token: token.clone(),
            callback_id: query.id.clone(),
        };
    }

    let Some(message) = &update.message else {
        return UpdateKind::Ignored;
    };
    let chat = ChatId::new(message.chat.id);

    if let Some(file) = message.video.clone().or_else(|| message.document.clone()) {
        return UpdateKind::Media(chat, file.into());
    }
    if let Some(text) = &message.text {
        if text.trim() == "/start" {
            return UpdateKind::Start(chat);
        }
        return UpdateKind::Text(chat, text.clone());
    }
    UpdateKind::Ignored
}

/// Telegram Bot API client.
#[derive(Clone, Debug)]
pub struct TelegramApi {
    /// Bot access token.
    token: String,
    /// API origin, overridable for tests.
    base_url: String,
    /// HTTP client.
    http_client: reqwest::Client,
}

impl TelegramApi {
    /// Create a client against the production API origin.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base_url: "https://api.telegram.org".to_string(),
            // Long polls hold the connection open for the poll timeout, so
            // the client budget must comfortably exceed it.
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(90))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    /// Point the client at a different origin.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// URL for a Bot API method.
    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    /// URL for downloading a file by its `file_path`.
    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.base_url, self.token, file_path)
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, ApiError> {
        let response: ApiResponse<Vec<Update>> = self
            .http_client
            .get(self.method_url("getUpdates"))
            .query(&[("offset", offset.to_string()), ("timeout", timeout_secs.to_string())])
            .send()
            .await?
            .json()
            .await?;
        response.into_result()
    }

    /// Resolve a file id to a server-side path.
    async fn get_file(&self, file_id: &str) -> Result<Option<String>, ApiError> {
        let response: ApiResponse<FileInfo> = self
            .http_client
            .get(self.method_url("getFile"))
            .query(&[("file_id", file_id)])
            .send()
            .await?
            .json()
            .await?;
        Ok(response.into_result()?.file_path)
    }

    /// Stream a server-side file to `dest`. Returns the byte count.
    async fn download_file(&self, file_path: &str, dest: &Path) -> Result<u64, ApiError> {
        let response = self
            .http_client
            .get(self.file_url(file_path))
            .send()
            .await?
            .error_for_status()?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    /// Send a text message, optionally with an inline keyboard.
    pub async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        choices: &[Choice],
    ) -> Result<(), ApiError> {
        let mut body = json!({
            "chat_id": chat.as_i64(),
            "text": text,
        });
        if !choices.is_empty() {
            body["reply_markup"] = json!({ "inline_keyboard": keyboard_rows(choices) });
        }

        let response: ApiResponse<serde_json::Value> = self
            .http_client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        response.into_result().map(|_| ())
    }

    /// Send a local file as a document with a caption.
    pub async fn send_document(
        &self,
        chat: ChatId,
        path: &Path,
        caption: &str,
    ) -> Result<(), ApiError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("result.gif")
            .to_string();
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat.as_i64().to_string())
            .text("caption", caption.to_string())
            .part(
                "document",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );

        let response: ApiResponse<serde_json::Value> = self
            .http_client
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await?
            .json()
            .await?;
        response.into_result().map(|_| ())
    }

    /// Acknowledge a callback query so the client stops its spinner.
    pub async fn answer_callback(&self, callback_id: &str) -> Result<(), ApiError> {
        let response: ApiResponse<serde_json::Value> = self
            .http_client
            .post(self.method_url("answerCallbackQuery"))
            .json(&json!({ "callback_query_id": callback_id }))
            .send()
            .await?
            .json()
            .await?;
        response.into_result().map(|_| ())
    }

    /// Translate one update into an engine event, fetching media as needed.
    ///
    /// Media downloads land at the chat's staging path inside `work`; a
    /// failed download still yields a `VideoReceived` whose payload path is
    /// absent, so the engine's guards answer the requester.
    pub async fn event_from_update(
        &self,
        update: Update,
        work: &WorkDir,
    ) -> Result<Option<ChatEvent>, ApiError> {
        match classify(&update) {
            UpdateKind::Start(chat) => Ok(Some(ChatEvent::StartCommand { chat })),
            UpdateKind::Text(chat, text) => Ok(Some(ChatEvent::TextReceived { chat, text })),
            UpdateKind::Choice {
                chat,
                token,
                callback_id,
            } => {
                if let Err(e) = self.answer_callback(&callback_id).await {
                    tracing::debug!(error = %e, "Failed to acknowledge callback query");
                }
                Ok(Some(ChatEvent::ChoiceReceived { chat, token }))
            }
            UpdateKind::Media(chat, file) => {
                let dest = work.incoming_path(chat);
                match self.get_file(&file.file_id).await {
                    Ok(Some(file_path)) => {
                        if let Err(e) = self.download_file(&file_path, &dest).await {
                            tracing::warn!(chat = %chat, error = %e, "Media download failed");
                        }
                    }
                    Ok(None) => {
                        tracing::warn!(chat = %chat, "getFile returned no file path");
                    }
                    Err(e) => {
                        tracing::warn!(chat = %chat, error = %e, "getFile failed");
                    }
                }
                let size_bytes = file
                    .file_size
                    .or_else(|| dest.metadata().ok().map(|m| m.len()))
                    .unwrap_or(0);
                Ok(Some(ChatEvent::VideoReceived {
                    chat,
                    payload: MediaPayload {
                        path: dest,
                        mime_type: file.mime_type,
                        size_bytes,
                        file_name: file.file_name,
                    },
                }))
            }
            UpdateKind::Ignored => Ok(None),
        }
    }
}

#[async_trait]
impl DialogueResponder for TelegramApi {
    async fn prompt(
        &self,
        chat: ChatId,
        text: &str,
        choices: &[Choice],
    ) -> Result<(), DeliveryError> {
        self.send_message(chat, text, choices).await.map_err(Into::into)
    }

    async fn deliver(
        &self,
        chat: ChatId,
        artifact: &ArtifactHandle,
        caption: &str,
    ) -> Result<(), DeliveryError> {
        self.send_document(chat, &artifact.path, caption)
            .await
            .map_err(Into::into)
    }
}

/// Inline keyboard layout: one row holding every choice.
fn keyboard_rows(choices: &[Choice]) -> serde_json::Value {
    let row: Vec<serde_json::Value> = choices
        .iter()
        .map(|choice| match &choice.action {
            ChoiceAction::Callback(token) => json!({
                "text": choice.label,
                "callback_data": token,
            }),
            ChoiceAction::Url(url) => json!({
                "text": choice.label,
                "url": url,
            }),
        })
        .collect();
    json!([row])
}
