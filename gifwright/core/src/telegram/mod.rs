//! Telegram Bot API Integration
//!
//! Thin client for the Telegram Bot HTTP API, kept to the narrow surface the
//! bot needs: long-polled `getUpdates`, file download, `sendMessage` with an
//! inline keyboard, and multipart `sendDocument`. The client implements
//! [`crate::responder::DialogueResponder`], so the engine never sees
//! anything Telegram-specific.
//!
//! # Usage
//!
//! ```ignore
//! use gifwright_core::telegram::TelegramApi;
//!
//! let api = TelegramApi::new(std::env::var("BOT_TOKEN")?);
//! let updates = api.get_updates(0, 30).await?;
//! ```

mod api;

pub use api::{
    classify, ApiError, CallbackQuery, Chat, FileRef, FileRefFields, Message, TelegramApi, Update,
    UpdateKind,
};
