//! Scheduler engine: wires the pipeline together and drives it on a timer.
//! Every tick runs a reminder pass, then a digest pass that sends to the
//! tenants whose local digest time has come.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use leadpulse_core::config::LeadPulseConfig;
use leadpulse_core::error::Result;
use leadpulse_core::traits::{DeliveryGateway, LeadStore};
use tokio::time::MissedTickBehavior;

use crate::cron::CronSchedule;
use crate::digest::{DigestBuilder, DigestReport};
use crate::dispatch::Dispatcher;
use crate::events::EventNotifier;
use crate::format::MessageFormatter;
use crate::ingest::LeadIngestor;
use crate::reminders::{ReminderScanner, ScanReport};

/// The assembled notification engine.
pub struct Scheduler {
    reminders: ReminderScanner,
    digest: DigestBuilder,
    events: Arc<EventNotifier>,
    ingestor: LeadIngestor,
    reminder_interval: Duration,
}

impl Scheduler {
    /// Build every component from config. Fails on an invalid digest schedule.
    pub fn build(
        store: Arc<dyn LeadStore>,
        gateway: Arc<dyn DeliveryGateway>,
        config: &LeadPulseConfig,
    ) -> Result<Self> {
        config.validate()?;
        let settings = &config.scheduler;

        let digest_schedule = CronSchedule::parse(&settings.digest_cron)?;
        let catch_up = chrono::Duration::seconds(settings.digest_catch_up_secs as i64);

        let dispatcher = Arc::new(Dispatcher::new(
            gateway,
            Duration::from_secs(settings.send_timeout_secs),
        ));
        let formatter = Arc::new(MessageFormatter::new(&config.format));
        let events = Arc::new(EventNotifier::new(store.clone(), dispatcher.clone(), formatter.clone()));

        Ok(Self {
            reminders: ReminderScanner::new(
                store.clone(),
                dispatcher.clone(),
                formatter.clone(),
                settings.tenant_concurrency,
            ),
            digest: DigestBuilder::new(
                store.clone(),
                dispatcher,
                formatter,
                digest_schedule,
                catch_up,
                settings.tenant_concurrency,
            ),
            ingestor: LeadIngestor::new(store, events.clone()),
            events,
            reminder_interval: Duration::from_secs(settings.reminder_interval_secs),
        })
    }

    pub fn events(&self) -> &EventNotifier {
        &self.events
    }

    pub fn ingestor(&self) -> &LeadIngestor {
        &self.ingestor
    }

    pub fn reminder_interval(&self) -> Duration {
        self.reminder_interval
    }

    pub async fn run_reminders(&self, now: DateTime<Utc>) -> Result<ScanReport> {
        self.reminders.run_pass(now).await
    }

    pub async fn run_digest(&self, now: DateTime<Utc>) -> Result<DigestReport> {
        self.digest.run_pass(now).await
    }

    /// Send every tenant's digest now, off schedule.
    pub async fn send_digest_now(&self, now: DateTime<Utc>) -> Result<DigestReport> {
        self.digest.send_all(now).await
    }
}

/// Run the scheduler loop until the task is dropped.
/// Passes run one at a time; a slow pass delays the next tick instead of
/// stacking up behind it.
pub async fn spawn_scheduler(scheduler: Arc<Scheduler>) {
    tracing::info!(
        "⏰ Scheduler started (every {}s; digest evaluated in tenant-local time)",
        scheduler.reminder_interval().as_secs()
    );

    let mut interval = tokio::time::interval(scheduler.reminder_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let now = Utc::now();
        if let Err(e) = scheduler.run_reminders(now).await {
            tracing::error!("❌ Reminder pass failed: {e}");
        }
        if let Err(e) = scheduler.run_digest(now).await {
            tracing::error!("❌ Digest pass failed: {e}");
        }
    }
}
