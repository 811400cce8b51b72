//! # LeadPulse Channels
//! Outbound delivery channel implementations.

pub mod telegram;

pub use telegram::TelegramGateway;
