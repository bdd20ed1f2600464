//! Ffmpeg Pipeline Implementation
//!
//! Render pipeline that shells out to the `ffmpeg` binary. GIF output uses a
//! single-pass `split`/`palettegen`/`paletteuse` graph so the palette is
//! derived from the actual frames, and the caption is composited with
//! `drawtext` before the palette split: centered, white fill, black border
//! stroke for legibility on any footage.
//!
//! The font file is resolved per render, not at startup - a missing font is
//! a render-time failure surfaced to the requester.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use super::traits::{RenderError, RenderJob, RenderPipeline};
use crate::artifacts::{ArtifactHandle, ArtifactKind};

/// How much of the engine's stderr to keep for diagnostics.
const STDERR_TAIL_BYTES: usize = 500;

/// Render pipeline backed by the `ffmpeg` binary.
#[derive(Clone, Debug)]
pub struct FfmpegPipeline {
    /// Binary to invoke. Usually just "ffmpeg", resolved via PATH.
    binary: PathBuf,
    /// Font file used for the caption overlay.
    font_file: PathBuf,
    /// Wall-clock budget for one transcode.
    timeout: Duration,
}

impl FfmpegPipeline {
    /// Create a pipeline using `ffmpeg` from PATH.
    pub fn new(font_file: impl Into<PathBuf>) -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            font_file: font_file.into(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Use a specific engine binary.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Set the per-transcode wall-clock budget.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the filter graph for a job.
    fn filter_graph(&self, job: &RenderJob) -> String {
        let mut chain = format!(
            "fps={},scale={}:-2:flags=lanczos",
            job.fps, job.width
        );
        if let Some(overlay) = &job.overlay {
            chain.push_str(&format!(
                ",drawtext=fontfile={}:text='{}':fontsize={}:fontcolor=white:\
                 borderw=3:bordercolor=black:x=(w-text_w)/2:y=(h-text_h)/2",
                self.font_file.display(),
                escape_drawtext(&overlay.text),
                overlay.font_size
            ));
        }
        format!("[0:v]{chain},split[a][b];[a]palettegen[p];[b][p]paletteuse")
    }

    /// Build the full argument list for a job.
    fn build_args(&self, job: &RenderJob) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            job.input.display().to_string(),
            "-filter_complex".to_string(),
            self.filter_graph(job),
            "-f".to_string(),
            "gif".to_string(),
            job.output.display().to_string(),
        ]
    }
}

#[async_trait]
impl RenderPipeline for FfmpegPipeline {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn health_check(&self) -> bool {
        Command::new(&self.binary)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    async fn render(&self, job: &RenderJob) -> Result<ArtifactHandle, RenderError> {
        if job.overlay.is_some() && !self.font_file.exists() {
            return Err(RenderError::MissingFont(self.font_file.clone()));
        }
        if !job.input.exists() {
            return Err(RenderError::UnsupportedInput(format!(
                "input file missing: {}",
                job.input.display()
            )));
        }

        let args = self.build_args(job);
        tracing::debug!(input = ?job.input, output = ?job.output, "Spawning ffmpeg");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RenderError::EngineUnavailable(e.to_string()))?;

        // Drain stderr concurrently so the child can never block on a full
        // pipe, and keep the tail for the diagnostic.
        let mut stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(stderr) = stderr.as_mut() {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(RenderError::TranscodeFailed(e.to_string())),
            Err(_) => {
                if let Err(e) = child.start_kill() {
                    tracing::warn!(error = %e, "Failed to kill timed-out ffmpeg");
                }
                let _ = child.wait().await;
                return Err(RenderError::TimedOut(self.timeout.as_secs()));
            }
        };

        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            tracing::warn!(status = ?status.code(), "ffmpeg exited with failure");
            return Err(RenderError::TranscodeFailed(tail(&stderr)));
        }
        if !job.output.exists() {
            return Err(RenderError::TranscodeFailed(
                "engine reported success but produced no output".to_string(),
            ));
        }

        Ok(ArtifactHandle::new(
            ArtifactKind::RenderedGif,
            job.output.clone(),
        ))
    }
}

/// Escape text for interpolation into a `drawtext` filter argument.
fn escape_drawtext(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            ':' => escaped.push_str("\\:"),
            '%' => escaped.push_str("\\%"),
            ',' => escaped.push_str("\\,"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Last `STDERR_TAIL_BYTES` of the engine's stderr, on a char boundary.
fn tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        return "engine produced no diagnostic".to_string();
    }
    let mut start = trimmed.len().saturating_sub(STDERR_TAIL_BYTES);
    while start > 0 && !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}
