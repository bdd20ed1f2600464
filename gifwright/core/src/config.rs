//! Configuration
//!
//! Bot configuration comes from two layers: an optional TOML file for the
//! stable knobs, and the process environment on top for deployment-specific
//! values. The bot access token is environment-only (`BOT_TOKEN`) and is the
//! single startup-fatal setting; the font path is merely recorded here -
//! its absence only surfaces when a render actually needs it.
//!
//! # Environment Variables
//!
//! - `BOT_TOKEN`: bot access token (required)
//! - `GIFWRIGHT_CONFIG`: path to the TOML config file
//! - `GIFWRIGHT_WORK_DIR`: directory for transient video/GIF files
//! - `GIFWRIGHT_FONT`: font file for the caption overlay
//! - `GIFWRIGHT_SESSION_TTL_SECS`: idle session expiry
//! - `GIFWRIGHT_RENDER_TIMEOUT_SECS`: per-transcode wall-clock budget

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Default font used for the caption overlay when nothing is configured.
const DEFAULT_FONT: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `BOT_TOKEN` is absent from the environment and the config file.
    #[error("bot token not configured: set BOT_TOKEN")]
    MissingToken,

    /// The config file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// File that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// File that failed to parse.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
}

/// Fully resolved bot configuration.
#[derive(Clone, Debug)]
pub struct BotConfig {
    /// Bot access token.
    pub token: String,
    /// Directory for transient per-chat files.
    pub work_dir: PathBuf,
    /// Font file for the caption overlay.
    pub font_file: PathBuf,
    /// Idle session expiry in seconds.
    pub session_ttl_secs: u64,
    /// Maximum accepted caption length in characters.
    pub max_overlay_chars: usize,
    /// Maximum accepted upload size in bytes.
    pub max_video_bytes: u64,
    /// Per-transcode wall-clock budget in seconds.
    pub render_timeout_secs: u64,
    /// Output GIF frame rate.
    pub gif_fps: u32,
    /// Output GIF width in pixels.
    pub gif_width: u32,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            work_dir: default_work_dir(),
            font_file: PathBuf::from(DEFAULT_FONT),
            session_ttl_secs: 15 * 60,
            max_overlay_chars: 200,
            max_video_bytes: 50 * 1024 * 1024,
            render_timeout_secs: 120,
            gif_fps: 12,
            gif_width: 480,
        }
    }
}

impl BotConfig {
    /// Resolve configuration: defaults, then the config file (when present),
    /// then the environment on top.
    ///
    /// `file` overrides the default config path; pass `None` to use
    /// `GIFWRIGHT_CONFIG` or the XDG default, skipping silently when neither
    /// exists.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let path = file
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("GIFWRIGHT_CONFIG").map(PathBuf::from))
            .or_else(default_config_path);
        if let Some(path) = path {
            // An explicitly named file must exist; the default path may not.
            if path.exists() || file.is_some() {
                let data = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
                let parsed: ConfigFile =
                    toml::from_str(&data).map_err(|source| ConfigError::Parse {
                        path: path.clone(),
                        source,
                    })?;
                config.apply_file(parsed);
            }
        }

        config.apply_env();
        if config.token.is_empty() {
            return Err(ConfigError::MissingToken);
        }
        Ok(config)
    }

    /// Merge a parsed config file under the current values.
    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(token) = file.token {
            self.token = token;
        }
        if let Some(work_dir) = file.work_dir {
            self.work_dir = work_dir;
        }
        if let Some(font_file) = file.font_file {
            self.font_file = font_file;
        }
        if let Some(ttl) = file.session_ttl_secs {
            self.session_ttl_secs = ttl;
        }
        if let Some(max) = file.max_overlay_chars {
            self.max_overlay_chars = max;
        }
        if let Some(max) = file.max_video_bytes {
            self.max_video_bytes = max;
        }
        if let Some(timeout) = file.render_timeout_secs {
            self.render_timeout_secs = timeout;
        }
        if let Some(fps) = file.gif_fps {
            self.gif_fps = fps;
        }
        if let Some(width) = file.gif_width {
            self.gif_width = width;
        }
    }

    /// Apply environment overrides on top of the current values.
    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("BOT_TOKEN") {
            self.token = token;
        }
        if let Some(dir) = std::env::var_os("GIFWRIGHT_WORK_DIR") {
            self.work_dir = PathBuf::from(dir);
        }
        if let Some(font) = std::env::var_os("GIFWRIGHT_FONT") {
            self.font_file = PathBuf::from(font);
        }
        if let Some(ttl) = env_parse("GIFWRIGHT_SESSION_TTL_SECS") {
            self.session_ttl_secs = ttl;
        }
        if let Some(timeout) = env_parse("GIFWRIGHT_RENDER_TIMEOUT_SECS") {
            self.render_timeout_secs = timeout;
        }
    }

    /// Idle session expiry in milliseconds.
    #[must_use]
    pub fn session_ttl_ms(&self) -> u64 {
        self.session_ttl_secs.saturating_mul(1000)
    }
}

/// Raw config file schema. Every field optional; absent fields keep their
/// defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    token: Option<String>,
    work_dir: Option<PathBuf>,
    font_file: Option<PathBuf>,
    session_ttl_secs: Option<u64>,
    max_overlay_chars: Option<usize>,
    max_video_bytes: Option<u64>,
    render_timeout_secs: Option<u64>,
    gif_fps: Option<u32>,
    gif_width: Option<u32>,
}

/// Default config file location: `$XDG_CONFIG_HOME/gifwright/config.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gifwright").join("config.toml"))
}

/// Default work directory: `$XDG_CACHE_HOME/gifwright`, falling back to a
/// path under `/tmp` when no cache dir is known.
#[must_use]
pub fn default_work_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("gifwright"))
        .unwrap_or_else(|| PathBuf::from("/tmp/gifwright"))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_sane() {
        let config = BotConfig::default();
        assert_eq!(config.session_ttl_secs, 900);
        assert_eq!(config.gif_fps, 12);
        assert!(config.max_video_bytes > 0);
    }

    #[test]
    fn test_file_layer_overrides_defaults() {
        let parsed: ConfigFile = toml::from_str(
            r#"
            font_file = "/fonts/impact.ttf"
            session_ttl_secs = 60
            gif_width = 320
            "#,
        )
        .unwrap();

        let mut config = BotConfig::default();
        config.apply_file(parsed);

        assert_eq!(config.font_file, PathBuf::from("/fonts/impact.ttf"));
        assert_eq!(config.session_ttl_secs, 60);
        assert_eq!(config.gif_width, 320);
        // Untouched fields keep their defaults.
        assert_eq!(config.gif_fps, 12);
    }

    #[test]
    fn test_unknown_file_keys_rejected() {
        let result: Result<ConfigFile, _> = toml::from_str("frame_budget = 3");
        assert!(result.is_err());
    }

    #[test]
    fn test_ttl_ms_conversion() {
        let mut config = BotConfig::default();
        config.session_ttl_secs = 2;
        assert_eq!(config.session_ttl_ms(), 2000);
    }

    #[test]
    fn test_load_named_missing_file_errors() {
        std::env::set_var("BOT_TOKEN", "t");
        let result = BotConfig::load(Some(Path::new("/nonexistent/gifwright.toml")));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
