//! Gifwright Core - Headless Conversation Engine for the video-to-GIF bot
//!
//! This crate provides the conversation core of gifwright, completely
//! independent of any bot platform or transcode engine. It can drive the
//! Telegram daemon, a different platform adapter, or run headless for
//! testing.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Platform Adapter                          │
//! │        (Telegram long-poll daemon / test harness)             │
//! │                                                               │
//! │                 ChatEvent (in)                                │
//! │          prompt / deliver via DialogueResponder (out)         │
//! └───────────────────────────┬──────────────────────────────────┘
//!                             │
//! ┌───────────────────────────┼──────────────────────────────────┐
//! │                     GIFWRIGHT CORE                            │
//! │  ┌────────────────────────┴───────────────────────────────┐  │
//! │  │                       Engine                            │  │
//! │  │  ┌──────────┐  ┌───────────┐  ┌──────────────────────┐ │  │
//! │  │  │ Session  │  │ Artifact  │  │   RenderPipeline     │ │  │
//! │  │  │  Store   │  │ Lifecycle │  │     (ffmpeg)         │ │  │
//! │  │  └──────────┘  └───────────┘  └──────────────────────┘ │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Engine`]: the conversation state machine driving every dialogue
//! - [`ChatEvent`]: inbound events from the platform adapter
//! - [`DialogueResponder`]: outbound contract (prompts and final delivery)
//! - [`RenderPipeline`]: the transcode/overlay engine behind a trait
//! - [`SessionStore`]: identity-keyed live sessions, serialized per chat
//! - [`ArtifactSet`]: per-session transient files, disposed on every exit
//!
//! # The dialogue
//!
//! ```text
//! (no session) --video--> AwaitingText --text--> AwaitingSize
//!     AwaitingSize --size choice--> Rendering --> deliver GIF, clean up
//! ```
//!
//! Out-of-order events are answered with a corrective message and never
//! mutate state. Every render cycle - successful or not - ends with the
//! session discarded and all of its files removed.
//!
//! # Module Overview
//!
//! - [`events`]: inbound events and requester identity
//! - [`session`]: per-chat conversation state and the font-size options
//! - [`store`]: the identity-keyed session store
//! - [`artifacts`]: transient file tracking and guaranteed disposal
//! - [`render`]: render pipeline trait and the ffmpeg implementation
//! - [`responder`]: outbound dialogue contract and the channel responder
//! - [`engine`]: the conversation engine
//! - [`config`]: environment + TOML configuration
//! - [`telegram`]: thin Telegram Bot API client

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod artifacts;
pub mod config;
pub mod engine;
pub mod events;
pub mod render;
pub mod responder;
pub mod session;
pub mod store;
pub mod telegram;

// Re-exports for convenience
pub use artifacts::{ArtifactHandle, ArtifactKind, ArtifactSet, WorkDir};
pub use config::{default_config_path, default_work_dir, BotConfig, ConfigError};
pub use engine::{Engine, EngineConfig, EngineStats};
pub use events::{ChatEvent, ChatId, MediaPayload};
pub use render::{FfmpegPipeline, Overlay, RenderError, RenderJob, RenderPipeline};
pub use responder::{ChannelResponder, Choice, ChoiceAction, DeliveryError, DialogueResponder, OutboundAction};
pub use session::{FontSize, Session, Stage};
pub use store::{SessionLock, SessionStore};
pub use telegram::TelegramApi;
