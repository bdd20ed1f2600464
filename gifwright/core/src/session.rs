//! Conversation Sessions
//!
//! A session tracks one requester's progress through the dialogue: video
//! received, caption collected, font size chosen, render in flight. It exists
//! only while a conversation is in progress - created at the first valid
//! video upload, destroyed when the render cycle ends or the session is
//! displaced or expires. A session never outlives one render cycle.
//!
//! The caption and font size are write-once: a duplicate write leaves the
//! session untouched and reports the rejection to the caller, so late or
//! repeated events can be answered without corrupting state.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::artifacts::{ArtifactHandle, ArtifactKind, ArtifactSet};
use crate::events::ChatId;

/// Where a session is in the dialogue.
///
/// "Awaiting video" is the implicit absence of a session; a session object
/// is only created once a valid video has been stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Video stored; waiting for the caption text.
    AwaitingText,
    /// Caption stored; waiting for a font-size choice.
    AwaitingSize,
    /// All inputs collected; the render pipeline is running.
    Rendering,
}

impl Stage {
    /// Human-readable description for logs.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::AwaitingText => "awaiting caption",
            Self::AwaitingSize => "awaiting font size",
            Self::Rendering => "rendering",
        }
    }
}

/// The enumerated font-size options offered to the requester.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FontSize {
    /// 60 px.
    Small,
    /// 100 px.
    Medium,
    /// 140 px.
    Large,
}

impl FontSize {
    /// Every offered option, in menu order.
    pub const OPTIONS: [FontSize; 3] = [Self::Small, Self::Medium, Self::Large];

    /// The pixel size passed to the render pipeline.
    #[must_use]
    pub fn px(&self) -> u32 {
        match self {
            Self::Small => 60,
            Self::Medium => 100,
            Self::Large => 140,
        }
    }

    /// Button label shown to the requester.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Small => "Small",
            Self::Medium => "Medium",
            Self::Large => "Large",
        }
    }

    /// The callback token carried by this option's button.
    #[must_use]
    pub fn token(&self) -> String {
        format!("size:{}", self.px())
    }

    /// Parse a callback token back into an option.
    ///
    /// Returns `None` for anything that is not a member of [`Self::OPTIONS`],
    /// including well-formed tokens with an unoffered size.
    #[must_use]
    pub fn parse_token(token: &str) -> Option<Self> {
        let px: u32 = token.strip_prefix("size:")?.parse().ok()?;
        Self::OPTIONS.into_iter().find(|size| size.px() == px)
    }
}

/// One requester's in-progress conversation.
#[derive(Debug)]
pub struct Session {
    /// Requester identity this session belongs to.
    pub chat: ChatId,
    /// Current dialogue stage.
    stage: Stage,
    /// Files owned by this session.
    artifacts: ArtifactSet,
    /// Caption to burn into the GIF. Write-once.
    overlay_text: Option<String>,
    /// Chosen font size. Write-once.
    font_size: Option<FontSize>,
    /// When the session was created (Unix timestamp ms).
    started_at_ms: u64,
    /// When the session last saw a valid event (Unix timestamp ms).
    last_activity_ms: u64,
}

impl Session {
    /// Create a session from a stored video artifact.
    #[must_use]
    pub fn new(chat: ChatId, video: ArtifactHandle) -> Self {
        let now = now_ms();
        let mut artifacts = ArtifactSet::new();
        artifacts.register(video);
        Self {
            chat,
            stage: Stage::AwaitingText,
            artifacts,
            overlay_text: None,
            font_size: None,
            started_at_ms: now,
            last_activity_ms: now,
        }
    }

    /// Current dialogue stage.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The stored caption, once collected.
    #[must_use]
    pub fn overlay_text(&self) -> Option<&str> {
        self.overlay_text.as_deref()
    }

    /// The chosen font size, once collected.
    #[must_use]
    pub fn font_size(&self) -> Option<FontSize> {
        self.font_size
    }

    /// The session's artifacts.
    #[must_use]
    pub fn artifacts(&self) -> &ArtifactSet {
        &self.artifacts
    }

    /// Mutable access to the session's artifacts.
    pub fn artifacts_mut(&mut self) -> &mut ArtifactSet {
        &mut self.artifacts
    }

    /// The stored source video.
    #[must_use]
    pub fn video(&self) -> Option<&ArtifactHandle> {
        self.artifacts.get(ArtifactKind::SourceVideo)
    }

    /// Store the caption and advance to the size choice.
    ///
    /// Returns `false` - leaving the session untouched - when the session is
    /// not awaiting text or the caption was already set.
    pub fn accept_overlay_text(&mut self, text: String) -> bool {
        if self.stage != Stage::AwaitingText || self.overlay_text.is_some() {
            return false;
        }
        self.overlay_text = Some(text);
        self.stage = Stage::AwaitingSize;
        self.touch();
        true
    }

    /// Store the font size and enter the rendering stage.
    ///
    /// Returns `false` - leaving the session untouched - when the session is
    /// not awaiting a size choice or a size was already set.
    pub fn accept_font_size(&mut self, size: FontSize) -> bool {
        if self.stage != Stage::AwaitingSize || self.font_size.is_some() {
            return false;
        }
        self.font_size = Some(size);
        self.stage = Stage::Rendering;
        self.touch();
        true
    }

    /// Update the last-activity timestamp.
    pub fn touch(&mut self) {
        self.last_activity_ms = now_ms();
    }

    /// Milliseconds since the last valid event.
    #[must_use]
    pub fn idle_ms(&self) -> u64 {
        now_ms().saturating_sub(self.last_activity_ms)
    }

    /// Milliseconds since the session was created.
    #[must_use]
    pub fn age_ms(&self) -> u64 {
        now_ms().saturating_sub(self.started_at_ms)
    }

    /// Whether the session has sat idle longer than `ttl_ms`.
    ///
    /// A session mid-render is never considered expired; the render cycle
    /// itself discards it when it finishes.
    #[must_use]
    pub fn is_expired(&self, ttl_ms: u64) -> bool {
        self.stage != Stage::Rendering && self.idle_ms() > ttl_ms
    }
}

/// Get current timestamp in milliseconds.
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_handle() -> ArtifactHandle {
        ArtifactHandle::new(ArtifactKind::SourceVideo, "/tmp/video_1.mp4")
    }

    fn session() -> Session {
        Session::new(ChatId::new(1), video_handle())
    }

    #[test]
    fn test_new_session_awaits_text() {
        let s = session();
        assert_eq!(s.stage(), Stage::AwaitingText);
        assert!(s.overlay_text().is_none());
        assert!(s.font_size().is_none());
        assert!(s.video().is_some());
    }

    #[test]
    fn test_happy_progression() {
        let mut s = session();
        assert!(s.accept_overlay_text("Hello".to_string()));
        assert_eq!(s.stage(), Stage::AwaitingSize);
        assert!(s.accept_font_size(FontSize::Medium));
        assert_eq!(s.stage(), Stage::Rendering);
        assert_eq!(s.overlay_text(), Some("Hello"));
        assert_eq!(s.font_size(), Some(FontSize::Medium));
    }

    #[test]
    fn test_overlay_text_is_write_once() {
        let mut s = session();
        assert!(s.accept_overlay_text("first".to_string()));
        assert!(!s.accept_overlay_text("second".to_string()));
        assert_eq!(s.overlay_text(), Some("first"));
        assert_eq!(s.stage(), Stage::AwaitingSize);
    }

    #[test]
    fn test_font_size_requires_text_first() {
        let mut s = session();
        assert!(!s.accept_font_size(FontSize::Small));
        assert_eq!(s.stage(), Stage::AwaitingText);
    }

    #[test]
    fn test_font_size_is_write_once() {
        let mut s = session();
        s.accept_overlay_text("caption".to_string());
        assert!(s.accept_font_size(FontSize::Large));
        assert!(!s.accept_font_size(FontSize::Small));
        assert_eq!(s.font_size(), Some(FontSize::Large));
    }

    #[test]
    fn test_token_round_trip() {
        for size in FontSize::OPTIONS {
            assert_eq!(FontSize::parse_token(&size.token()), Some(size));
        }
    }

    #[test]
    fn test_unoffered_tokens_rejected() {
        assert_eq!(FontSize::parse_token("size:90"), None);
        assert_eq!(FontSize::parse_token("size:abc"), None);
        assert_eq!(FontSize::parse_token("mood:happy"), None);
        assert_eq!(FontSize::parse_token(""), None);
    }

    #[test]
    fn test_fresh_session_not_expired() {
        let s = session();
        assert!(!s.is_expired(60_000));
    }

    #[test]
    fn test_zero_ttl_expires_idle_session() {
        let mut s = session();
        s.last_activity_ms = 0;
        assert!(s.is_expired(1));
    }

    #[test]
    fn test_rendering_session_never_expires() {
        let mut s = session();
        s.accept_overlay_text("c".to_string());
        s.accept_font_size(FontSize::Small);
        s.last_activity_ms = 0;
        assert!(!s.is_expired(1));
    }
}
