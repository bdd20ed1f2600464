//! Artifact Lifecycle
//!
//! Every conversation owns transient files on disk: the uploaded source video
//! and, once rendering has run, the produced GIF. This module tracks those
//! files and guarantees their removal on every exit path out of a render
//! cycle - success, handled error, or unexpected fault.
//!
//! Disposal is idempotent (safe on a set that was already disposed or never
//! populated) and total (every artifact is attempted even when an earlier
//! removal failed). `ArtifactSet` additionally disposes on `Drop`, so a
//! session that is dropped early cannot leak its files.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::events::ChatId;

/// The kinds of file a session can own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    /// The uploaded input video.
    SourceVideo,
    /// The rendered output GIF.
    RenderedGif,
}

impl ArtifactKind {
    /// Short label for logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::SourceVideo => "video",
            Self::RenderedGif => "gif",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A reference to one transient file owned by a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactHandle {
    /// What the file is.
    pub kind: ArtifactKind,
    /// Where the file lives.
    pub path: PathBuf,
}

impl ArtifactHandle {
    /// Create a handle.
    pub fn new(kind: ArtifactKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    /// Whether the file currently exists on disk.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

/// The set of artifacts owned by one session.
///
/// At most one artifact per [`ArtifactKind`]. Registering a second artifact
/// of the same kind disposes the one it replaces first, so a slot can never
/// silently leak a file.
#[derive(Debug, Default)]
pub struct ArtifactSet {
    video: Option<ArtifactHandle>,
    gif: Option<ArtifactHandle>,
}

impl ArtifactSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an artifact, replacing (and disposing) any previous artifact
    /// of the same kind.
    pub fn register(&mut self, handle: ArtifactHandle) {
        let slot = match handle.kind {
            ArtifactKind::SourceVideo => &mut self.video,
            ArtifactKind::RenderedGif => &mut self.gif,
        };
        if let Some(previous) = slot.replace(handle) {
            remove_best_effort(previous.kind, &previous.path);
        }
    }

    /// Get the registered artifact of a kind, if any.
    #[must_use]
    pub fn get(&self, kind: ArtifactKind) -> Option<&ArtifactHandle> {
        match kind {
            ArtifactKind::SourceVideo => self.video.as_ref(),
            ArtifactKind::RenderedGif => self.gif.as_ref(),
        }
    }

    /// Whether no artifacts are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.gif.is_none()
    }

    /// Remove every registered artifact from disk.
    ///
    /// Each removal is attempted independently; a failure on one file never
    /// skips the others. A file that is already gone counts as removed.
    /// Calling this on an already-disposed set is a no-op.
    pub fn dispose_all(&mut self) {
        for handle in [self.video.take(), self.gif.take()].into_iter().flatten() {
            remove_best_effort(handle.kind, &handle.path);
        }
    }
}

impl Drop for ArtifactSet {
    fn drop(&mut self) {
        if !self.is_empty() {
            tracing::debug!("Disposing artifacts on drop");
            self.dispose_all();
        }
    }
}

/// Remove a file, logging rather than propagating failures.
fn remove_best_effort(kind: ArtifactKind, path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!(kind = %kind, path = ?path, "Removed artifact"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(kind = %kind, path = ?path, error = %e, "Failed to remove artifact"),
    }
}

/// Root directory for transient per-chat files.
///
/// File names are deterministic per requester identity (`video_<chat>.mp4`,
/// `gif_<chat>.gif`), so a crashed cycle leaves at most one stale pair per
/// chat and the next cycle for that chat overwrites it.
#[derive(Clone, Debug)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    /// Open (creating if needed) a work directory at `root`.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The directory root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic path for a chat's source video.
    #[must_use]
    pub fn video_path(&self, chat: ChatId) -> PathBuf {
        self.root.join(format!("video_{}.mp4", chat.as_i64()))
    }

    /// Deterministic path for a chat's rendered GIF.
    #[must_use]
    pub fn gif_path(&self, chat: ChatId) -> PathBuf {
        self.root.join(format!("gif_{}.gif", chat.as_i64()))
    }

    /// Deterministic staging path for a chat's in-flight download, before
    /// the engine accepts it as the session's video.
    #[must_use]
    pub fn incoming_path(&self, chat: ChatId) -> PathBuf {
        self.root.join(format!("incoming_{}.bin", chat.as_i64()))
    }

    /// Move an uploaded file into the chat's video slot.
    ///
    /// Renames when source and work dir share a filesystem; falls back to
    /// copy-then-remove when they do not.
    pub fn ingest_video(&self, chat: ChatId, source: &Path) -> io::Result<ArtifactHandle> {
        let dest = self.video_path(chat);
        if fs::rename(source, &dest).is_err() {
            fs::copy(source, &dest)?;
            if let Err(e) = fs::remove_file(source) {
                tracing::warn!(path = ?source, error = %e, "Failed to remove ingested upload");
            }
        }
        Ok(ArtifactHandle::new(ArtifactKind::SourceVideo, dest))
    }

    /// Remove files left behind by a previous process run.
    ///
    /// Only touches files matching this module's deterministic naming scheme.
    /// Returns the number of files removed.
    pub fn sweep_stale(&self) -> io::Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with("video_") || name.starts_with("gif_") || name.starts_with("incoming_")
            {
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        tracing::warn!(path = ?entry.path(), error = %e, "Failed to sweep stale file");
                    }
                }
            }
        }
        Ok(removed)
    }
}
