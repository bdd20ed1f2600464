//! Inbound Chat Events
//!
//! Events sent from the platform adapter to the conversation engine. These
//! represent everything a requester can do: start the bot, upload a video,
//! send caption text, or pick a button.
//!
//! # Design Philosophy
//!
//! The platform adapter is a "dumb" edge: it downloads media and forwards
//! what happened, tagged with the requester identity. It never interprets
//! conversation state - deciding whether an event is valid for the current
//! stage is the engine's job, so out-of-order input is rejected in exactly
//! one place.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Opaque requester identity.
///
/// On Telegram this is the chat id; the engine only needs equality and
/// hashing, plus a stable rendering for deterministic artifact names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(i64);

impl ChatId {
    /// Wrap a raw platform identity.
    #[must_use]
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw numeric value.
    #[must_use]
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chat-{}", self.0)
    }
}

/// File extensions accepted as video containers when no mime type is known.
const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "mov", "mkv", "webm", "avi"];

/// A media upload, already downloaded to local disk by the platform adapter.
///
/// The adapter forwards whatever the platform handed it; judging whether the
/// payload is plausibly a video belongs to the engine's guards, via
/// [`MediaPayload::looks_like_video`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaPayload {
    /// Local path the upload was downloaded to.
    pub path: PathBuf,
    /// Mime type reported by the platform, when available.
    pub mime_type: Option<String>,
    /// Size in bytes reported by the platform.
    pub size_bytes: u64,
    /// Original file name, when the platform knows one.
    pub file_name: Option<String>,
}

impl MediaPayload {
    /// Whether this payload is plausibly a decodable video.
    ///
    /// Trusts the platform mime type first, then falls back to the original
    /// file name's extension. A payload with neither is rejected.
    #[must_use]
    pub fn looks_like_video(&self) -> bool {
        if let Some(mime) = &self.mime_type {
            return mime.starts_with("video/");
        }
        if let Some(name) = &self.file_name {
            if let Some((_, ext)) = name.rsplit_once('.') {
                let ext = ext.to_ascii_lowercase();
                return VIDEO_EXTENSIONS.contains(&ext.as_str());
            }
        }
        false
    }
}

/// Events from the platform adapter to the engine.
#[derive(Clone, Debug)]
pub enum ChatEvent {
    /// The requester issued the start/help command. Stateless.
    StartCommand {
        /// Requester identity.
        chat: ChatId,
    },

    /// The requester uploaded something the platform tagged as media.
    VideoReceived {
        /// Requester identity.
        chat: ChatId,
        /// The downloaded upload.
        payload: MediaPayload,
    },

    /// The requester sent plain text.
    TextReceived {
        /// Requester identity.
        chat: ChatId,
        /// The text, as received.
        text: String,
    },

    /// The requester pressed an inline choice button.
    ChoiceReceived {
        /// Requester identity.
        chat: ChatId,
        /// The button's callback token.
        token: String,
    },
}

impl ChatEvent {
    /// The identity this event belongs to.
    #[must_use]
    pub fn chat(&self) -> ChatId {
        match self {
            Self::StartCommand { chat }
            | Self::VideoReceived { chat, .. }
            | Self::TextReceived { chat, .. }
            | Self::ChoiceReceived { chat, .. } => *chat,
        }
    }

    /// Short label for logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::StartCommand { .. } => "start",
            Self::VideoReceived { .. } => "video",
            Self::TextReceived { .. } => "text",
            Self::ChoiceReceived { .. } => "choice",
        }
    }
}
