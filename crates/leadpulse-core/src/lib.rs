//! # LeadPulse Core
//!
//! Shared building blocks for the notification engine:
//! - domain records (tenants, members, leads, notification categories)
//! - the error type used across crates
//! - TOML configuration
//! - collaborator traits for storage and outbound delivery

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::LeadPulseConfig;
pub use error::{LeadPulseError, Result};
pub use traits::{DeliveryGateway, LeadStore, RenderMode};
pub use types::{Category, Lead, LeadDraft, LeadStatus, Member, QuietHours, RecipientScope, Role, Tenant};
