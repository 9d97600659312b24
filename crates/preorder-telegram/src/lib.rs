//! Telegram Bot API transport for job notices and artifacts.

pub mod client;
pub mod error;
mod messenger;
mod retry;
mod types;

pub use client::{ClientOptions, TelegramClient};
pub use error::TelegramError;
