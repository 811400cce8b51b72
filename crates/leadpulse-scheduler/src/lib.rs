//! # LeadPulse Scheduler
//!
//! Decides who hears about lead events, whether they hear it now, and makes
//! sure time-based reminders go out once per occurrence.
//!
//! ## Architecture
//! ```text
//! ReminderScanner (every 5 min)   EventNotifier (per lead mutation)
//!   ├── task reminder  [10,15] min   ├── created → new_lead
//!   └── consult reminder [55,65] min └── updated → status_change / assignment
//!         │  try_set_marker (CAS)           │
//!         └──────────────┬──────────────────┘
//!                        ▼
//!   resolver → policy gate → formatter → Dispatcher (fan-out, per-send timeout)
//!                                              └── DeliveryGateway (Telegram)
//!
//! DigestBuilder (cron, tenant-local, try_set_tenant_marker) → tenant-wide recipients → same pipeline
//! ```

pub mod cron;
pub mod digest;
pub mod dispatch;
pub mod engine;
pub mod events;
pub mod format;
pub mod ingest;
pub mod persistence;
pub mod policy;
pub mod reminders;
pub mod resolver;
pub mod store;

pub use cron::CronSchedule;
pub use digest::{DigestBuilder, DigestReport, DigestStats, digest_marker};
pub use dispatch::{DispatchOutcome, Dispatcher, MemoryGateway, SentMessage};
pub use engine::{Scheduler, spawn_scheduler};
pub use events::{EventNotifier, LeadChange, LeadEvent};
pub use format::{MessageFormatter, Payload, RenderedMessage};
pub use ingest::LeadIngestor;
pub use persistence::SqliteStore;
pub use policy::Decision;
pub use reminders::{ReminderKind, ReminderScanner, ScanReport};
pub use store::MemoryStore;
