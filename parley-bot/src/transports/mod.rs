//! Transport implementations.
//!
//! # Available Transports
//!
//! - [`memory::MemoryTransport`] - In-process recorder (tests, embedding)
//! - [`cli::CliTransport`] - Terminal transport (always available)
//! - [`telegram::TelegramTransport`] - Telegram bot (requires `telegram` feature)

pub mod cli;
pub mod memory;

#[cfg(feature = "telegram")]
pub mod telegram;

pub use cli::{CliTransport, CliTransportConfig};
pub use memory::MemoryTransport;

#[cfg(feature = "telegram")]
pub use telegram::{TelegramTransport, TelegramTransportConfig};
