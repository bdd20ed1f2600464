//! Integration tests for the conversation engine
//!
//! These tests drive the engine through whole dialogues with a mock render
//! pipeline and the channel responder, and verify the lifecycle guarantees:
//! - at most one session per identity
//! - out-of-order events are answered, never crash, never create sessions
//! - every render cycle ends with exactly one result or error message
//! - no artifact survives a cycle, on success or failure
//! - disposal is idempotent and restart-on-new-video never leaks files

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{mpsc, Notify};

use gifwright_core::{
    ArtifactHandle, ArtifactKind, ChatEvent, ChatId, Engine, EngineConfig, ChannelResponder,
    MediaPayload, OutboundAction, RenderError, RenderJob, RenderPipeline, WorkDir,
};

// =============================================================================
// Test harness
// =============================================================================

/// What the mock pipeline should do when invoked.
#[derive(Clone)]
enum PipelineMode {
    /// Write the output file and succeed.
    Succeed,
    /// Fail with a transcode error without writing anything.
    Fail,
    /// Wait for the notify, then succeed.
    Gated(Arc<Notify>),
}

struct MockPipeline {
    mode: PipelineMode,
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
        if let PipelineMode::Gated(gate) = &self.mode {
            gate.notified().await;
        }
        match self.mode {
            PipelineMode::Fail => Err(RenderError::TranscodeFailed("simulated fault".to_string())),
            _ => {
                std::fs::write(&job.output, b"GIF89a").unwrap();
                Ok(ArtifactHandle::new(
                    ArtifactKind::RenderedGif,
                    job.output.clone(),
                ))
            }
        }
    }
}

struct Harness {
    engine: Arc<Engine<MockPipeline, ChannelResponder>>,
    rx: mpsc::Receiver<OutboundAction>,
    dir: TempDir,
}

impl Harness {
    fn new(mode: PipelineMode) -> Self {
        // Best-effort: only the first test in the process installs it.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let dir = TempDir::new().unwrap();
        let (responder, rx) = ChannelResponder::new(64);
        let work = WorkDir::open(dir.path().join("work")).unwrap();
        let engine = Arc::new(Engine::new(
            MockPipeline { mode },
            responder,
            EngineConfig::default(),
            work,
        ));
        Self { engine, rx, dir }
    }

    fn work_root(&self) -> std::path::PathBuf {
        self.dir.path().join("work")
    }

    /// Create an upload file and the event that delivers it.
    fn video_event(&self, chat: ChatId, name: &str) -> ChatEvent {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"fake video bytes").unwrap();
        ChatEvent::VideoReceived {
            chat,
            payload: MediaPayload {
                path,
                mime_type: Some("video/mp4".to_string()),
                size_bytes: 16,
                file_name: Some(name.to_string()),
            },
        }
    }

    fn text_event(chat: ChatId, text: &str) -> ChatEvent {
        ChatEvent::TextReceived {
            chat,
            text: text.to_string(),
        }
    }

    fn choice_event(chat: ChatId, token: &str) -> ChatEvent {
        ChatEvent::ChoiceReceived {
            chat,
            token: token.to_string(),
        }
    }

    /// Drain everything sent so far.
    fn drain(&mut self) -> Vec<OutboundAction> {
        let mut actions = Vec::new();
        while let Ok(action) = self.rx.try_recv() {
            actions.push(action);
        }
        actions
    }

    /// Files currently present under the work dir.
    fn work_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.work_root())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

fn deliveries(actions: &[OutboundAction]) -> usize {
    actions
        .iter()
        .filter(|a| matches!(a, OutboundAction::Deliver { .. }))
        .count()
}

fn error_prompts(actions: &[OutboundAction]) -> usize {
    actions
        .iter()
        .filter(|a| matches!(a, OutboundAction::Prompt { text, .. } if text.starts_with('❌')))
        .count()
}

// =============================================================================
// Out-of-order events
// =============================================================================

/// Text with no prior video yields a corrective reply and creates no session.
#[tokio::test]
async fn text_without_video_creates_no_session() {
    let mut h = Harness::new(PipelineMode::Succeed);
    let chat = ChatId::new(1);

    h.engine
        .handle_event(Harness::text_event(chat, "hello"))
        .await
        .unwrap();

    let actions = h.drain();
    assert_eq!(actions.len(), 1);
    match &actions[0] {
        OutboundAction::Prompt { text, .. } => assert!(text.contains("video first")),
        other => panic!("expected a prompt, got {other:?}"),
    }
    assert_eq!(h.engine.store().active_count(), 0);
}

/// A choice with no live session (e.g., after expiry) never panics; the
/// requester is told to start over and nothing else happens.
#[tokio::test]
async fn choice_without_session_reports_expiry() {
    let mut h = Harness::new(PipelineMode::Succeed);
    let chat = ChatId::new(2);

    h.engine
        .handle_event(Harness::choice_event(chat, "size:100"))
        .await
        .unwrap();

    let actions = h.drain();
    assert_eq!(actions.len(), 1);
    match &actions[0] {
        OutboundAction::Prompt { text, .. } => assert!(text.contains("start over")),
        other => panic!("expected a prompt, got {other:?}"),
    }
    assert_eq!(h.engine.store().active_count(), 0);
    assert_eq!(h.engine.stats().events_rejected, 1);
}

/// A choice pressed before the caption was sent is a no-op on the session.
#[tokio::test]
async fn choice_before_text_is_rejected_without_state_change() {
    let mut h = Harness::new(PipelineMode::Succeed);
    let chat = ChatId::new(3);

    h.engine.handle_event(h.video_event(chat, "a.mp4")).await.unwrap();
    h.engine
        .handle_event(Harness::choice_event(chat, "size:100"))
        .await
        .unwrap();

    assert_eq!(h.engine.store().active_count(), 1, "session must survive");
    let actions = h.drain();
    assert!(matches!(
        actions.last(),
        Some(OutboundAction::Prompt { text, .. }) if text.contains("caption")
    ));
}

// =============================================================================
// Happy path
// =============================================================================

/// Video -> Text("Hello") -> Choice(size:100) produces exactly one delivered
/// document and leaves zero files in the work dir.
#[tokio::test]
async fn happy_path_delivers_once_and_cleans_up() {
    let mut h = Harness::new(PipelineMode::Succeed);
    let chat = ChatId::new(10);

    h.engine.handle_event(h.video_event(chat, "clip.mp4")).await.unwrap();
    h.engine
        .handle_event(Harness::text_event(chat, "Hello"))
        .await
        .unwrap();
    h.engine
        .handle_event(Harness::choice_event(chat, "size:100"))
        .await
        .unwrap();

    let actions = h.drain();
    assert_eq!(deliveries(&actions), 1, "exactly one document delivered");
    assert_eq!(error_prompts(&actions), 0);

    assert_eq!(h.engine.store().active_count(), 0);
    assert_eq!(h.work_files(), Vec::<String>::new(), "no leftover artifacts");

    let stats = h.engine.stats();
    assert_eq!(stats.sessions_started, 1);
    assert_eq!(stats.renders_succeeded, 1);
}

/// The size menu is offered after the caption, with every enumerated option.
#[tokio::test]
async fn caption_is_followed_by_the_size_menu() {
    let mut h = Harness::new(PipelineMode::Succeed);
    let chat = ChatId::new(11);

    h.engine.handle_event(h.video_event(chat, "clip.mp4")).await.unwrap();
    h.engine
        .handle_event(Harness::text_event(chat, "Hello"))
        .await
        .unwrap();

    let actions = h.drain();
    let menu = actions
        .iter()
        .find_map(|a| match a {
            OutboundAction::Prompt { choices, .. } if !choices.is_empty() => Some(choices.clone()),
            _ => None,
        })
        .expect("a prompt with choices");
    assert_eq!(menu.len(), 3);
}

// =============================================================================
// Render failure
// =============================================================================

/// A pipeline fault yields exactly one error message, a discarded session,
/// and no files left on disk (source video and any partial GIF removed).
#[tokio::test]
async fn render_fault_cleans_up_and_reports_once() {
    let mut h = Harness::new(PipelineMode::Fail);
    let chat = ChatId::new(20);

    h.engine.handle_event(h.video_event(chat, "clip.mp4")).await.unwrap();
    h.engine
        .handle_event(Harness::text_event(chat, "Hello"))
        .await
        .unwrap();
    h.engine
        .handle_event(Harness::choice_event(chat, "size:60"))
        .await
        .unwrap();

    let actions = h.drain();
    assert_eq!(deliveries(&actions), 0);
    assert_eq!(error_prompts(&actions), 1, "exactly one error message");
    assert!(actions.iter().any(|a| matches!(
        a,
        OutboundAction::Prompt { text, .. } if text.contains("simulated fault")
    )));

    assert_eq!(h.engine.store().active_count(), 0);
    assert_eq!(h.work_files(), Vec::<String>::new());
    assert_eq!(h.engine.stats().renders_failed, 1);
}

// =============================================================================
// Restart and duplicate-input policies
// =============================================================================

/// A second video for the same chat discards the first session's artifacts
/// before the new session exists - no leak, still one session.
#[tokio::test]
async fn second_video_restarts_without_leaking() {
    let mut h = Harness::new(PipelineMode::Succeed);
    let chat = ChatId::new(30);

    h.engine.handle_event(h.video_event(chat, "first.mp4")).await.unwrap();
    let video_path = {
        let lock = h.engine.store().lock(chat).await;
        lock.get().unwrap().video().unwrap().path.clone()
    };
    assert!(video_path.exists());

    h.engine.handle_event(h.video_event(chat, "second.mp4")).await.unwrap();

    assert_eq!(h.engine.store().active_count(), 1);
    assert_eq!(h.engine.stats().sessions_started, 2);
    // Deterministic naming means the new session reuses the same path; the
    // work dir must hold exactly the one video.
    assert_eq!(h.work_files().len(), 1);
    h.drain();
}

/// A duplicate caption while the size menu is open is ignored: the stored
/// caption is unchanged and the menu is re-presented.
#[tokio::test]
async fn duplicate_caption_is_ignored() {
    let mut h = Harness::new(PipelineMode::Succeed);
    let chat = ChatId::new(31);

    h.engine.handle_event(h.video_event(chat, "clip.mp4")).await.unwrap();
    h.engine
        .handle_event(Harness::text_event(chat, "first"))
        .await
        .unwrap();
    h.drain();

    h.engine
        .handle_event(Harness::text_event(chat, "second"))
        .await
        .unwrap();

    {
        let lock = h.engine.store().lock(chat).await;
        assert_eq!(lock.get().unwrap().overlay_text(), Some("first"));
    }
    let actions = h.drain();
    assert!(matches!(
        actions.last(),
        Some(OutboundAction::Prompt { choices, .. }) if choices.len() == 3
    ));
}

/// An unrecognized choice token aborts the dialogue: session discarded,
/// artifacts removed, requester told to start over.
#[tokio::test]
async fn unrecognized_choice_aborts_the_session() {
    let mut h = Harness::new(PipelineMode::Succeed);
    let chat = ChatId::new(32);

    h.engine.handle_event(h.video_event(chat, "clip.mp4")).await.unwrap();
    h.engine
        .handle_event(Harness::text_event(chat, "Hello"))
        .await
        .unwrap();
    h.drain();

    h.engine
        .handle_event(Harness::choice_event(chat, "size:9000"))
        .await
        .unwrap();

    assert_eq!(h.engine.store().active_count(), 0);
    assert_eq!(h.work_files(), Vec::<String>::new());
    let actions = h.drain();
    assert!(matches!(
        actions.last(),
        Some(OutboundAction::Prompt { text, .. }) if text.contains("start over")
    ));
}

// =============================================================================
// Validation guards
// =============================================================================

/// A payload that is not plausibly a video is rejected, its download is
/// removed, and no session is created.
#[tokio::test]
async fn non_video_payload_is_rejected() {
    let mut h = Harness::new(PipelineMode::Succeed);
    let chat = ChatId::new(40);

    let path = h.dir.path().join("photo.jpg");
    std::fs::write(&path, b"jpeg bytes").unwrap();
    h.engine
        .handle_event(ChatEvent::VideoReceived {
            chat,
            payload: MediaPayload {
                path: path.clone(),
                mime_type: Some("image/jpeg".to_string()),
                size_bytes: 10,
                file_name: Some("photo.jpg".to_string()),
            },
        })
        .await
        .unwrap();

    assert!(!path.exists(), "rejected upload must be removed");
    assert_eq!(h.engine.store().active_count(), 0);
    let actions = h.drain();
    assert!(matches!(
        actions.last(),
        Some(OutboundAction::Prompt { text, .. }) if text.contains("valid video")
    ));
}

/// An oversized upload is rejected before a session is created.
#[tokio::test]
async fn oversized_video_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (responder, mut rx) = ChannelResponder::new(8);
    let work = WorkDir::open(dir.path().join("work")).unwrap();
    let config = EngineConfig {
        max_video_bytes: 4,
        ..EngineConfig::default()
    };
    let engine = Engine::new(MockPipeline { mode: PipelineMode::Succeed }, responder, config, work);

    let path = dir.path().join("big.mp4");
    std::fs::write(&path, b"way more than four bytes").unwrap();
    engine
        .handle_event(ChatEvent::VideoReceived {
            chat: ChatId::new(41),
            payload: MediaPayload {
                path: path.clone(),
                mime_type: Some("video/mp4".to_string()),
                size_bytes: 24,
                file_name: None,
            },
        })
        .await
        .unwrap();

    assert!(!path.exists());
    assert_eq!(engine.store().active_count(), 0);
    match rx.try_recv().unwrap() {
        OutboundAction::Prompt { text, .. } => assert!(text.contains("too large")),
        other => panic!("expected a prompt, got {other:?}"),
    }
}

// =============================================================================
// Concurrency policy: events during a render
// =============================================================================

/// Events arriving while a render is in flight are answered with a busy
/// notice and do not disturb the cycle, which still delivers exactly once.
#[tokio::test]
async fn events_during_render_get_a_busy_notice() {
    let gate = Arc::new(Notify::new());
    let mut h = Harness::new(PipelineMode::Gated(Arc::clone(&gate)));
    let chat = ChatId::new(50);

    h.engine.handle_event(h.video_event(chat, "clip.mp4")).await.unwrap();
    h.engine
        .handle_event(Harness::text_event(chat, "Hello"))
        .await
        .unwrap();

    let engine = Arc::clone(&h.engine);
    let render_task = tokio::spawn(async move {
        engine
            .handle_event(Harness::choice_event(chat, "size:140"))
            .await
            .unwrap();
    });

    // Wait until the session is actually in the rendering stage.
    loop {
        {
            let lock = h.engine.store().lock(chat).await;
            if lock
                .get()
                .map(|s| s.stage() == gifwright_core::Stage::Rendering)
                .unwrap_or(false)
            {
                break;
            }
        }
        tokio::task::yield_now().await;
    }

    h.engine
        .handle_event(Harness::text_event(chat, "late caption"))
        .await
        .unwrap();

    gate.notify_one();
    render_task.await.unwrap();

    let actions = h.drain();
    assert!(actions.iter().any(|a| matches!(
        a,
        OutboundAction::Prompt { text, .. } if text.contains("hang tight")
    )));
    assert_eq!(deliveries(&actions), 1);
    assert_eq!(h.engine.store().active_count(), 0);
    assert_eq!(h.work_files(), Vec::<String>::new());
}

// =============================================================================
// Store invariants and disposal
// =============================================================================

/// Interleaved dialogues for different identities never share state.
#[tokio::test]
async fn identities_are_isolated() {
    let mut h = Harness::new(PipelineMode::Succeed);
    let alice = ChatId::new(60);
    let bob = ChatId::new(61);

    h.engine.handle_event(h.video_event(alice, "a.mp4")).await.unwrap();
    h.engine.handle_event(h.video_event(bob, "b.mp4")).await.unwrap();
    h.engine
        .handle_event(Harness::text_event(alice, "from alice"))
        .await
        .unwrap();

    assert_eq!(h.engine.store().active_count(), 2);
    {
        let lock = h.engine.store().lock(bob).await;
        assert_eq!(lock.get().unwrap().overlay_text(), None);
    }

    // Alice finishing must not touch Bob's session.
    h.engine
        .handle_event(Harness::choice_event(alice, "size:60"))
        .await
        .unwrap();
    assert_eq!(h.engine.store().active_count(), 1);
    assert!(h.engine.store().contains(bob));
    h.drain();
}

/// Disposing a session's artifacts twice is harmless.
#[tokio::test]
async fn disposal_is_idempotent_through_the_public_api() {
    let h = Harness::new(PipelineMode::Succeed);
    let chat = ChatId::new(70);

    h.engine.handle_event(h.video_event(chat, "clip.mp4")).await.unwrap();

    let mut lock = h.engine.store().lock(chat).await;
    let mut session = lock.discard().unwrap();
    session.artifacts_mut().dispose_all();
    session.artifacts_mut().dispose_all();
    drop(lock);

    assert_eq!(h.work_files(), Vec::<String>::new());
    assert_eq!(h.engine.store().active_count(), 0);
}

/// Expired sessions are discarded when the next event arrives, and the event
/// is then handled as if no session existed.
#[tokio::test]
async fn stale_session_expires_on_next_event() {
    let dir = TempDir::new().unwrap();
    let (responder, mut rx) = ChannelResponder::new(8);
    let work = WorkDir::open(dir.path().join("work")).unwrap();
    let config = EngineConfig {
        session_ttl_ms: 0,
        ..EngineConfig::default()
    };
    let engine = Engine::new(MockPipeline { mode: PipelineMode::Succeed }, responder, config, work);
    let chat = ChatId::new(71);

    let upload = dir.path().join("clip.mp4");
    std::fs::write(&upload, b"fake video bytes").unwrap();
    engine
        .handle_event(ChatEvent::VideoReceived {
            chat,
            payload: MediaPayload {
                path: upload,
                mime_type: Some("video/mp4".to_string()),
                size_bytes: 16,
                file_name: None,
            },
        })
        .await
        .unwrap();
    assert_eq!(engine.store().active_count(), 1);
    let _ = rx.try_recv();

    // TTL of zero: the very next event sees an expired session.
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    engine
        .handle_event(ChatEvent::TextReceived {
            chat,
            text: "too late".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(engine.store().active_count(), 0);
    assert_eq!(engine.stats().sessions_expired, 1);
    match rx.try_recv().unwrap() {
        OutboundAction::Prompt { text, .. } => assert!(text.contains("video first")),
        other => panic!("expected a prompt, got {other:?}"),
    }
    assert!(!Path::new(&dir.path().join("work").join("video_71.mp4")).exists());
}
