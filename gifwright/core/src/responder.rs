//! Dialogue Responder
//!
//! The narrow contract the engine uses to talk back to a requester: `prompt`
//! sends a message with optional inline choice buttons, `deliver` sends the
//! final document. Delivery is the only side effect - responders never
//! mutate conversation state.
//!
//! The Telegram implementation lives in [`crate::telegram`];
//! [`ChannelResponder`] forwards actions over an mpsc channel for tests and
//! headless runs.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::artifacts::ArtifactHandle;
use crate::events::ChatId;

/// One inline button offered alongside a prompt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Choice {
    /// Label shown on the button.
    pub label: String,
    /// What pressing the button does.
    pub action: ChoiceAction,
}

/// What an inline button does when pressed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChoiceAction {
    /// Sends the token back as a `ChoiceReceived` event.
    Callback(String),
    /// Opens a URL; produces no event.
    Url(String),
}

impl Choice {
    /// A button that reports `token` back to the engine.
    pub fn callback(label: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ChoiceAction::Callback(token.into()),
        }
    }

    /// A button that opens a URL.
    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ChoiceAction::Url(url.into()),
        }
    }
}

/// Why an outbound send failed.
///
/// Delivery failures are logged and never resurrect a session; artifacts are
/// disposed regardless.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The platform could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// The platform answered with a rejection.
    #[error("platform rejected the request: {0}")]
    Rejected(String),

    /// The in-process channel's receiving side is gone.
    #[error("responder channel closed")]
    ChannelClosed,
}

/// Outbound contract used by the engine.
#[async_trait]
pub trait DialogueResponder: Send + Sync {
    /// Send a message, optionally with inline choice buttons.
    async fn prompt(
        &self,
        chat: ChatId,
        text: &str,
        choices: &[Choice],
    ) -> Result<(), DeliveryError>;

    /// Send the final result document with a caption.
    async fn deliver(
        &self,
        chat: ChatId,
        artifact: &ArtifactHandle,
        caption: &str,
    ) -> Result<(), DeliveryError>;
}

/// An outbound action, recorded for tests or forwarded by headless runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundAction {
    /// A `prompt` call.
    Prompt {
        /// Addressee.
        chat: ChatId,
        /// Message text.
        text: String,
        /// Inline buttons, possibly empty.
        choices: Vec<Choice>,
    },
    /// A `deliver` call.
    Deliver {
        /// Addressee.
        chat: ChatId,
        /// Path of the delivered document at send time.
        path: PathBuf,
        /// Caption accompanying the document.
        caption: String,
    },
}

impl OutboundAction {
    /// The identity this action addresses.
    #[must_use]
    pub fn chat(&self) -> ChatId {
        match self {
            Self::Prompt { chat, .. } | Self::Deliver { chat, .. } => *chat,
        }
    }
}

/// Responder that forwards every action over an mpsc channel.
#[derive(Clone, Debug)]
pub struct ChannelResponder {
    tx: mpsc::Sender<OutboundAction>,
}

impl ChannelResponder {
    /// Create a responder and the receiving end of its channel.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OutboundAction>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl DialogueResponder for ChannelResponder {
    async fn prompt(
        &self,
        chat: ChatId,
        text: &str,
        choices: &[Choice],
    ) -> Result<(), DeliveryError> {
        self.tx
            .send(OutboundAction::Prompt {
                chat,
                text: text.to_string(),
                choices: choices.to_vec(),
            })
            .await
            .map_err(|_| DeliveryError::ChannelClosed)
    }

    async fn deliver(
        &self,
        chat: ChatId,
        artifact: &ArtifactHandle,
        caption: &str,
    ) -> Result<(), DeliveryError> {
        self.tx
            .send(OutboundAction::Deliver {
                chat,
                path: artifact.path.clone(),
                caption: caption.to_string(),
            })
            .await
            .map_err(|_| DeliveryError::ChannelClosed)
    }
}
