//! Render Pipeline Traits
//!
//! Trait definitions for the transcode/overlay engine. The conversation
//! engine never inspects a pipeline failure beyond surfacing its message, so
//! the contract here is deliberately narrow: one job in, one artifact or one
//! error out.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::artifacts::ArtifactHandle;

/// Caption parameters composited over the full duration of the video.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Overlay {
    /// Text to burn in, centered and stroked for legibility.
    pub text: String,
    /// Font size in pixels, from the enumerated option set.
    pub font_size: u32,
}

/// One render request: a stored input video and where the GIF should land.
#[derive(Clone, Debug)]
pub struct RenderJob {
    /// Path of the stored input video.
    pub input: PathBuf,
    /// Path the rendered GIF must be written to.
    pub output: PathBuf,
    /// Optional caption overlay.
    pub overlay: Option<Overlay>,
    /// Output frame rate.
    pub fps: u32,
    /// Output width in pixels; height follows the aspect ratio.
    pub width: u32,
}

impl RenderJob {
    /// Create a job with default fps/width.
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            overlay: None,
            fps: 12,
            width: 480,
        }
    }

    /// Set the caption overlay.
    #[must_use]
    pub fn with_overlay(mut self, text: impl Into<String>, font_size: u32) -> Self {
        self.overlay = Some(Overlay {
            text: text.into(),
            font_size,
        });
        self
    }

    /// Set the output frame rate.
    #[must_use]
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    /// Set the output width.
    #[must_use]
    pub fn with_width(mut self, width: u32) -> Self {
        self.width = width;
        self
    }
}

/// Why a render failed.
///
/// The `Display` form is shown to the requester, so every variant carries a
/// short human-readable cause.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The engine binary could not be started at all.
    #[error("render engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The configured font resource does not exist on disk.
    #[error("font not found at {0}")]
    MissingFont(PathBuf),

    /// The input file is absent or not something the engine can decode.
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    /// The engine ran and failed; carries a diagnostic from its output.
    #[error("transcode failed: {0}")]
    TranscodeFailed(String),

    /// The engine exceeded the configured wall-clock budget.
    #[error("transcode timed out after {0}s")]
    TimedOut(u64),
}

/// Render pipeline trait.
///
/// Implement this to plug in a different transcode engine (or a mock for
/// tests).
#[async_trait]
pub trait RenderPipeline: Send + Sync {
    /// The pipeline name (e.g., "ffmpeg").
    fn name(&self) -> &str;

    /// Whether the engine is present and runnable.
    async fn health_check(&self) -> bool;

    /// Transcode `job.input` into an animated GIF at `job.output`, with the
    /// overlay (when present) composited over the full duration.
    ///
    /// On success the returned handle points at the written output file.
    async fn render(&self, job: &RenderJob) -> Result<ArtifactHandle, RenderError>;
}
