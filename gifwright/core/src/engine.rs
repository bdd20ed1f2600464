//! Conversation Engine
//!
//! The engine is the orchestration core of gifwright. It validates every
//! inbound event against the requester's current stage, advances the
//! session, and either prompts for the next input or - once the video,
//! caption, and font size are all collected - invokes the render pipeline
//! and delivers the result.
//!
//! # Design Philosophy
//!
//! The dialogue is strictly linear, so a single stage tag plus the
//! accumulated fields fully determines behavior. Guards exist specifically
//! to reject out-of-order events (text before video, a choice before a
//! caption) without crashing: each rejection is a no-op on session state
//! plus one user-visible message, never a silent drop and never state
//! corruption.
//!
//! Every path out of a render cycle - success, render failure, delivery
//! failure - ends with the session discarded and all of its artifacts
//! disposed. The render call itself runs with no lock held, so a slow
//! transcode never delays other requesters and late events for the same
//! chat can be answered immediately with a busy notice.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;

use crate::artifacts::WorkDir;
use crate::config::BotConfig;
use crate::events::{ChatEvent, ChatId, MediaPayload};
use crate::render::{RenderJob, RenderPipeline};
use crate::responder::{Choice, DialogueResponder};
use crate::session::{FontSize, Session, Stage};
use crate::store::{SessionLock, SessionStore};

/// Welcome text for the start command.
const MSG_WELCOME: &str =
    "🎬 Send me a video and I will turn it into a GIF with your caption burned in!";
/// Prompt sent once a video is stored.
const MSG_ASK_TEXT: &str = "✍️ Got it! Now send the caption text for your GIF.";
/// Prompt accompanying the font-size menu.
const MSG_ASK_SIZE: &str = "🔠 Choose a font size for the caption:";
/// Reply to text/choice events with no live session.
const MSG_SEND_VIDEO_FIRST: &str = "⚠️ Send me a video first.";
/// Reply to an upload that is not a decodable video.
const MSG_INVALID_VIDEO: &str = "⚠️ Please send a valid video.";
/// Reply to an empty caption.
const MSG_EMPTY_TEXT: &str = "⚠️ The caption cannot be empty - send some text.";
/// Reply to a duplicate caption while the size menu is open.
const MSG_TEXT_ALREADY_SET: &str = "☝️ I already have your caption - pick a font size:";
/// Reply to a choice pressed before the caption was sent.
const MSG_NEED_TEXT_FIRST: &str = "✍️ Send the caption text first.";
/// Reply to an unrecognized or stale choice token.
const MSG_SESSION_EXPIRED: &str = "⌛ Session expired - please start over by sending a video.";
/// Reply to any event arriving while a render is in flight.
const MSG_RENDER_BUSY: &str = "⏳ Still working on your GIF - hang tight!";
/// Notice sent when rendering starts.
const MSG_RENDERING: &str = "⏳ Rendering your GIF...";
/// Caption on the delivered result.
const MSG_DONE: &str = "✅ Done! Here's your GIF.";
/// URL offered on the welcome message.
const ABOUT_URL: &str = "https://github.com/gifwright/gifwright";

/// Engine tuning knobs.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Idle session expiry in milliseconds.
    pub session_ttl_ms: u64,
    /// Maximum accepted caption length in characters.
    pub max_overlay_chars: usize,
    /// Maximum accepted upload size in bytes.
    pub max_video_bytes: u64,
    /// Output GIF frame rate.
    pub gif_fps: u32,
    /// Output GIF width in pixels.
    pub gif_width: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_ttl_ms: 15 * 60 * 1000,
            max_overlay_chars: 200,
            max_video_bytes: 50 * 1024 * 1024,
            gif_fps: 12,
            gif_width: 480,
        }
    }
}

impl From<&BotConfig> for EngineConfig {
    fn from(config: &BotConfig) -> Self {
        Self {
            session_ttl_ms: config.session_ttl_ms(),
            max_overlay_chars: config.max_overlay_chars,
            max_video_bytes: config.max_video_bytes,
            gif_fps: config.gif_fps,
            gif_width: config.gif_width,
        }
    }
}

/// Counters exposed for logs and tests.
#[derive(Debug, Default)]
struct Counters {
    sessions_started: AtomicU64,
    sessions_expired: AtomicU64,
    renders_succeeded: AtomicU64,
    renders_failed: AtomicU64,
    events_rejected: AtomicU64,
}

/// Point-in-time snapshot of the engine counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Sessions created from a valid video upload.
    pub sessions_started: u64,
    /// Sessions discarded by idle expiry.
    pub sessions_expired: u64,
    /// Render cycles that produced a GIF.
    pub renders_succeeded: u64,
    /// Render cycles that failed.
    pub renders_failed: u64,
    /// Events rejected by a guard (invalid, out-of-order, busy).
    pub events_rejected: u64,
}

/// The conversation engine.
///
/// Generic over the render pipeline and the dialogue responder so tests can
/// substitute mocks, exactly like swapping the platform or the transcode
/// engine in production.
pub struct Engine<P: RenderPipeline, D: DialogueResponder> {
    config: EngineConfig,
    work: WorkDir,
    pipeline: P,
    responder: D,
    store: SessionStore,
    counters: Counters,
}

impl<P: RenderPipeline, D: DialogueResponder> Engine<P, D> {
    /// Create an engine.
    pub fn new(pipeline: P, responder: D, config: EngineConfig, work: WorkDir) -> Self {
        Self {
            config,
            work,
            pipeline,
            responder,
            store: SessionStore::new(),
            counters: Counters::default(),
        }
    }

    /// The session store. Exposed for invariant checks in tests.
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Snapshot of the engine counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            sessions_started: self.counters.sessions_started.load(Ordering::Relaxed),
            sessions_expired: self.counters.sessions_expired.load(Ordering::Relaxed),
            renders_succeeded: self.counters.renders_succeeded.load(Ordering::Relaxed),
            renders_failed: self.counters.renders_failed.load(Ordering::Relaxed),
            events_rejected: self.counters.events_rejected.load(Ordering::Relaxed),
        }
    }

    /// Handle one inbound event.
    ///
    /// Safe to call from concurrently spawned tasks: all per-chat work runs
    /// under that chat's slot lock, except the render call itself.
    pub async fn handle_event(&self, event: ChatEvent) -> anyhow::Result<()> {
        tracing::debug!(chat = %event.chat(), event = event.label(), "Handling event");
        match event {
            ChatEvent::StartCommand { chat } => {
                // Stateless: no session interaction at all.
                self.prompt(chat, MSG_WELCOME, &[Choice::url("About 👤", ABOUT_URL)])
                    .await;
                Ok(())
            }
            ChatEvent::VideoReceived { chat, payload } => self.handle_video(chat, payload).await,
            ChatEvent::TextReceived { chat, text } => self.handle_text(chat, text).await,
            ChatEvent::ChoiceReceived { chat, token } => self.handle_choice(chat, token).await,
        }
    }

    /// A media upload arrived.
    async fn handle_video(&self, chat: ChatId, payload: MediaPayload) -> anyhow::Result<()> {
        let mut lock = self.store.lock(chat).await;
        self.expire_if_stale(&mut lock);

        if lock.get().map(Session::stage) == Some(Stage::Rendering) {
            discard_upload(&payload);
            self.reject(chat, MSG_RENDER_BUSY, &[]).await;
            return Ok(());
        }

        if !payload.looks_like_video() {
            discard_upload(&payload);
            self.reject(chat, MSG_INVALID_VIDEO, &[]).await;
            return Ok(());
        }
        if payload.size_bytes > self.config.max_video_bytes {
            discard_upload(&payload);
            let limit_mb = self.config.max_video_bytes / (1024 * 1024);
            self.reject(chat, &format!("⚠️ That video is too large - the limit is {limit_mb} MB."), &[])
                .await;
            return Ok(());
        }

        // A fresh video restarts any dialogue in progress. Disposal must
        // happen before ingest: the deterministic naming means the old
        // session's video occupies the exact path the new upload moves to.
        if let Some(mut displaced) = lock.discard() {
            tracing::debug!(chat = %chat, stage = displaced.stage().description(), "Restarting dialogue");
            displaced.artifacts_mut().dispose_all();
        }

        match self.work.ingest_video(chat, &payload.path) {
            Ok(video) => {
                lock.create(Session::new(chat, video));
                self.counters.sessions_started.fetch_add(1, Ordering::Relaxed);
                self.prompt(chat, MSG_ASK_TEXT, &[]).await;
            }
            Err(e) => {
                tracing::warn!(chat = %chat, error = %e, "Failed to store upload");
                discard_upload(&payload);
                self.reject(chat, MSG_INVALID_VIDEO, &[]).await;
            }
        }
        drop(lock);
        self.store.prune(chat);
        Ok(())
    }

    /// Plain text arrived.
    async fn handle_text(&self, chat: ChatId, text: String) -> anyhow::Result<()> {
        let mut lock = self.store.lock(chat).await;
        self.expire_if_stale(&mut lock);

        let Some(session) = lock.get_mut() else {
            drop(lock);
            self.store.prune(chat);
            self.reject(chat, MSG_SEND_VIDEO_FIRST, &[]).await;
            return Ok(());
        };

        match session.stage() {
            Stage::Rendering => {
                self.reject(chat, MSG_RENDER_BUSY, &[]).await;
            }
            Stage::AwaitingSize => {
                // Caption is write-once; remind the requester what comes next.
                self.reject(chat, MSG_TEXT_ALREADY_SET, &size_menu()).await;
            }
            Stage::AwaitingText => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    self.reject(chat, MSG_EMPTY_TEXT, &[]).await;
                } else if trimmed.chars().count() > self.config.max_overlay_chars {
                    let limit = self.config.max_overlay_chars;
                    self.reject(
                        chat,
                        &format!("⚠️ That caption is too long - the limit is {limit} characters."),
                        &[],
                    )
                    .await;
                } else if session.accept_overlay_text(trimmed.to_string()) {
                    self.prompt(chat, MSG_ASK_SIZE, &size_menu()).await;
                }
            }
        }
        Ok(())
    }

    /// An inline choice was pressed.
    async fn handle_choice(&self, chat: ChatId, token: String) -> anyhow::Result<()> {
        let mut lock = self.store.lock(chat).await;
        self.expire_if_stale(&mut lock);

        let Some(session) = lock.get_mut() else {
            drop(lock);
            self.store.prune(chat);
            self.reject(chat, MSG_SESSION_EXPIRED, &[]).await;
            return Ok(());
        };

        match session.stage() {
            Stage::Rendering => {
                self.reject(chat, MSG_RENDER_BUSY, &[]).await;
                Ok(())
            }
            Stage::AwaitingText => {
                self.reject(chat, MSG_NEED_TEXT_FIRST, &[]).await;
                Ok(())
            }
            Stage::AwaitingSize => match FontSize::parse_token(&token) {
                Some(size) => {
                    if !session.accept_font_size(size) {
                        // Unreachable given the stage guard; keep the session
                        // intact and repeat the menu rather than corrupt it.
                        self.reject(chat, MSG_ASK_SIZE, &size_menu()).await;
                        return Ok(());
                    }
                    let job = match self.build_job(session) {
                        Ok(job) => job,
                        Err(e) => {
                            // Broken invariant; abort rather than leave the
                            // session stuck in the rendering stage.
                            if let Some(mut session) = lock.discard() {
                                session.artifacts_mut().dispose_all();
                            }
                            drop(lock);
                            self.store.prune(chat);
                            self.prompt(chat, MSG_SESSION_EXPIRED, &[]).await;
                            return Err(e);
                        }
                    };
                    drop(lock);
                    self.run_render(chat, job).await;
                    self.store.prune(chat);
                    Ok(())
                }
                None => {
                    // A token outside the offered set is indistinguishable
                    // from a stale button press: abort and ask for a restart.
                    tracing::warn!(chat = %chat, token = %token, "Unrecognized choice token");
                    if let Some(mut session) = lock.discard() {
                        session.artifacts_mut().dispose_all();
                    }
                    drop(lock);
                    self.store.prune(chat);
                    self.reject(chat, MSG_SESSION_EXPIRED, &[]).await;
                    Ok(())
                }
            },
        }
    }

    /// Assemble the render job from a fully collected session.
    fn build_job(&self, session: &Session) -> anyhow::Result<RenderJob> {
        let video = session
            .video()
            .context("session entered rendering without a video artifact")?;
        let size = session
            .font_size()
            .context("session entered rendering without a font size")?;
        let text = session
            .overlay_text()
            .context("session entered rendering without a caption")?;
        Ok(RenderJob::new(video.path.clone(), self.work.gif_path(session.chat))
            .with_overlay(text, size.px())
            .with_fps(self.config.gif_fps)
            .with_width(self.config.gif_width))
    }

    /// Run one render cycle and tear the session down afterward.
    ///
    /// Called with no lock held. Whatever happens - success, render error,
    /// delivery error - the session is discarded and every artifact is
    /// disposed before this returns.
    async fn run_render(&self, chat: ChatId, job: RenderJob) {
        self.prompt(chat, MSG_RENDERING, &[]).await;
        let result = self.pipeline.render(&job).await;

        let mut lock = self.store.lock(chat).await;
        let session = lock.discard();
        let mut session = match session {
            Some(session) => session,
            None => {
                // The rendering stage rejects every event, so the session
                // should still be present; clean up the output regardless.
                tracing::warn!(chat = %chat, "Session vanished during render");
                if let Ok(gif) = &result {
                    let _ = std::fs::remove_file(&gif.path);
                }
                return;
            }
        };

        match result {
            Ok(gif) => {
                session.artifacts_mut().register(gif.clone());
                self.counters.renders_succeeded.fetch_add(1, Ordering::Relaxed);
                tracing::info!(chat = %chat, gif = ?gif.path, "Render complete");
                if let Err(e) = self.responder.deliver(chat, &gif, MSG_DONE).await {
                    tracing::warn!(chat = %chat, error = %e, "Failed to deliver GIF");
                }
            }
            Err(e) => {
                self.counters.renders_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(chat = %chat, pipeline = self.pipeline.name(), error = %e, "Render failed");
                // The engine may have written a partial output before dying.
                let _ = std::fs::remove_file(&job.output);
                self.prompt(chat, &format!("❌ Error: {e}"), &[]).await;
            }
        }

        session.artifacts_mut().dispose_all();
        drop(lock);
    }

    /// Discard the session when it has sat idle past the TTL.
    fn expire_if_stale(&self, lock: &mut SessionLock) {
        let expired = lock
            .get()
            .map(|session| session.is_expired(self.config.session_ttl_ms))
            .unwrap_or(false);
        if expired {
            if let Some(mut session) = lock.discard() {
                tracing::info!(chat = %session.chat, idle_ms = session.idle_ms(), "Session expired");
                session.artifacts_mut().dispose_all();
                self.counters.sessions_expired.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Send a prompt, logging rather than propagating delivery failures.
    async fn prompt(&self, chat: ChatId, text: &str, choices: &[Choice]) {
        if let Err(e) = self.responder.prompt(chat, text, choices).await {
            tracing::warn!(chat = %chat, error = %e, "Failed to send prompt");
        }
    }

    /// Send a guard-rejection message and count it.
    async fn reject(&self, chat: ChatId, text: &str, choices: &[Choice]) {
        self.counters.events_rejected.fetch_add(1, Ordering::Relaxed);
        self.prompt(chat, text, choices).await;
    }
}

/// The font-size menu, in option order.
fn size_menu() -> Vec<Choice> {
    FontSize::OPTIONS
        .into_iter()
        .map(|size| Choice::callback(size.label(), size.token()))
        .collect()
}

/// Remove a rejected upload's file. The adapter handed ownership over with
/// the event, so a rejection must not leave the download behind.
fn discard_upload(payload: &MediaPayload) {
    match std::fs::remove_file(&payload.path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = ?payload.path, error = %e, "Failed to remove rejected upload"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{ArtifactHandle, ArtifactKind};
    use crate::render::RenderError;
    use crate::responder::{ChannelResponder, OutboundAction};
    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    /// Pipeline that writes the output file without touching ffmpeg.
    struct MockPipeline {
        fail: bool,
    }

    #[async_trait]
    impl RenderPipeline for MockPipeline {
        fn name(&self) -> &str {
            "mock"
        }

        async fn health_check(&self) -> bool {
            true
        }

        async fn render(&self, job: &RenderJob) -> Result<ArtifactHandle, RenderError> {
            if self.fail {
                return Err(RenderError::TranscodeFailed("mock failure".to_string()));
            }
            std::fs::write(&job.output, b"GIF89a").unwrap();
            Ok(ArtifactHandle::new(ArtifactKind::RenderedGif, job.output.clone()))
        }
    }

    fn engine(
        dir: &TempDir,
        fail: bool,
    ) -> (
        Engine<MockPipeline, ChannelResponder>,
        mpsc::Receiver<OutboundAction>,
    ) {
        let (responder, rx) = ChannelResponder::new(32);
        let work = WorkDir::open(dir.path().join("work")).unwrap();
        (
            Engine::new(MockPipeline { fail }, responder, EngineConfig::default(), work),
            rx,
        )
    }

    fn upload(dir: &TempDir, name: &str) -> MediaPayload {
        let path = dir.path().join(name);
        std::fs::write(&path, b"fake video bytes").unwrap();
        MediaPayload {
            path,
            mime_type: Some("video/mp4".to_string()),
            size_bytes: 16,
            file_name: Some(name.to_string()),
        }
    }

    #[tokio::test]
    async fn test_engine_starts_with_zeroed_stats() {
        let dir = TempDir::new().unwrap();
        let (engine, _rx) = engine(&dir, false);
        assert_eq!(engine.stats(), EngineStats::default());
        assert_eq!(engine.store().active_count(), 0);
    }

    #[tokio::test]
    async fn test_start_command_is_stateless() {
        let dir = TempDir::new().unwrap();
        let (engine, mut rx) = engine(&dir, false);
        let chat = ChatId::new(1);

        engine
            .handle_event(ChatEvent::StartCommand { chat })
            .await
            .unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            OutboundAction::Prompt { .. }
        ));
        assert_eq!(engine.store().active_count(), 0);
    }

    #[tokio::test]
    async fn test_size_menu_matches_options() {
        let menu = size_menu();
        assert_eq!(menu.len(), FontSize::OPTIONS.len());
        assert_eq!(menu[1], Choice::callback("Medium", "size:100"));
    }

    #[tokio::test]
    async fn test_full_cycle_counts_a_success() {
        let dir = TempDir::new().unwrap();
        let (engine, mut rx) = engine(&dir, false);
        let chat = ChatId::new(9);

        engine
            .handle_event(ChatEvent::VideoReceived {
                chat,
                payload: upload(&dir, "clip.mp4"),
            })
            .await
            .unwrap();
        engine
            .handle_event(ChatEvent::TextReceived {
                chat,
                text: "Hello".to_string(),
            })
            .await
            .unwrap();
        engine
            .handle_event(ChatEvent::ChoiceReceived {
                chat,
                token: "size:100".to_string(),
            })
            .await
            .unwrap();

        let stats = engine.stats();
        assert_eq!(stats.sessions_started, 1);
        assert_eq!(stats.renders_succeeded, 1);
        assert_eq!(stats.renders_failed, 0);
        assert_eq!(engine.store().active_count(), 0);

        let mut delivered = 0;
        while let Ok(action) = rx.try_recv() {
            if matches!(action, OutboundAction::Deliver { .. }) {
                delivered += 1;
            }
        }
        assert_eq!(delivered, 1);
    }

    #[tokio::test]
    async fn test_render_failure_counts_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let (engine, _rx) = engine(&dir, true);
        let chat = ChatId::new(9);

        engine
            .handle_event(ChatEvent::VideoReceived {
                chat,
                payload: upload(&dir, "clip.mp4"),
            })
            .await
            .unwrap();
        engine
            .handle_event(ChatEvent::TextReceived {
                chat,
                text: "Hello".to_string(),
            })
            .await
            .unwrap();
        engine
            .handle_event(ChatEvent::ChoiceReceived {
                chat,
                token: "size:60".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(engine.stats().renders_failed, 1);
        assert_eq!(engine.store().active_count(), 0);
    }
}
