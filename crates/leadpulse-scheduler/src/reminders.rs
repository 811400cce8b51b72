//! Reminder scan engine: one pass per tick over every tenant's due leads.
//!
//! A reminder instance is identified by (lead, kind, tenant-local date). The
//! pass claims it through the store's conditional marker write before any
//! message is sent, so overlapping passes produce at most one batch. The
//! marker is claimed even when nobody ends up receiving the message.

use std::ops::RangeInclusive;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Timelike, Utc};
use futures::stream::{self, StreamExt};
use leadpulse_core::error::Result;
use leadpulse_core::traits::LeadStore;
use leadpulse_core::types::{Category, Lead, LeadStatus, Member, Tenant};

use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::format::{MessageFormatter, Payload};

/// Kinds of time-based reminders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderKind {
    /// Upcoming task, 15 minutes ahead.
    Task,
    /// Scheduled consultation, 60 minutes ahead.
    Consult,
}

impl ReminderKind {
    pub fn category(&self) -> Category {
        match self {
            ReminderKind::Task => Category::TaskReminder15,
            ReminderKind::Consult => Category::ConsultReminder60,
        }
    }

    /// Minutes-until-due window in which the reminder fires. Five minutes
    /// wide to match the scan cadence.
    pub fn band(&self) -> RangeInclusive<i64> {
        match self {
            ReminderKind::Task => 10..=15,
            ReminderKind::Consult => 55..=65,
        }
    }

    /// Marker key, e.g. `reminder_15_2024-06-01`.
    pub fn marker(&self, date: NaiveDate) -> String {
        let lead_minutes = match self {
            ReminderKind::Task => 15,
            ReminderKind::Consult => 60,
        };
        format!("reminder_{}_{}", lead_minutes, date.format("%Y-%m-%d"))
    }
}

/// A reminder that should fire on this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueReminder {
    pub kind: ReminderKind,
    pub marker: String,
    pub at: NaiveTime,
    pub minutes_left: i64,
}

/// Check the task reminder for a lead at tenant-local `today` / `now_minutes`.
pub fn task_reminder_due(lead: &Lead, today: NaiveDate, now_minutes: i64) -> Option<DueReminder> {
    if lead.status.is_terminal() || lead.next_date != Some(today) {
        return None;
    }
    let raw = lead.next_time.as_deref()?;
    let at = match parse_time(raw) {
        Some(at) => at,
        None => {
            tracing::debug!("Lead {} has malformed next_time '{}', skipping", lead.id, raw);
            return None;
        }
    };
    due_in_band(lead, ReminderKind::Task, today, at, now_minutes)
}

/// Check the consultation reminder for a lead. The consult timestamp is
/// viewed in the tenant's offset and must fall on `today`.
pub fn consult_reminder_due(
    lead: &Lead,
    offset: FixedOffset,
    today: NaiveDate,
    now_minutes: i64,
) -> Option<DueReminder> {
    if lead.status != LeadStatus::Scheduled {
        return None;
    }
    let consult = lead.consult?.with_timezone(&offset);
    if consult.date_naive() != today {
        return None;
    }
    due_in_band(lead, ReminderKind::Consult, today, consult.time(), now_minutes)
}

fn due_in_band(
    lead: &Lead,
    kind: ReminderKind,
    today: NaiveDate,
    at: NaiveTime,
    now_minutes: i64,
) -> Option<DueReminder> {
    let minutes_left = minutes_of_day(at) - now_minutes;
    if !kind.band().contains(&minutes_left) {
        return None;
    }
    let marker = kind.marker(today);
    if lead.has_marker(&marker) {
        return None;
    }
    Some(DueReminder { kind, marker, at, minutes_left })
}

/// Parse `HH:MM` or `HH:MM:SS`.
pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

pub fn minutes_of_day(time: NaiveTime) -> i64 {
    i64::from(time.hour()) * 60 + i64::from(time.minute())
}

/// Result of one scan pass across all tenants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub tenants_scanned: usize,
    pub tenants_failed: usize,
    /// Reminder instances claimed by this pass.
    pub reminders_fired: usize,
    /// Due reminders whose marker could not be written; the lead is retried next tick.
    pub reminders_failed: usize,
    pub delivery: DispatchOutcome,
}

#[derive(Debug, Default)]
struct TenantScan {
    reminders_fired: usize,
    reminders_failed: usize,
    delivery: DispatchOutcome,
}

/// Runs reminder passes.
pub struct ReminderScanner {
    store: Arc<dyn LeadStore>,
    dispatcher: Arc<Dispatcher>,
    formatter: Arc<MessageFormatter>,
    tenant_concurrency: usize,
}

impl ReminderScanner {
    pub fn new(
        store: Arc<dyn LeadStore>,
        dispatcher: Arc<Dispatcher>,
        formatter: Arc<MessageFormatter>,
        tenant_concurrency: usize,
    ) -> Self {
        Self {
            store,
            dispatcher,
            formatter,
            tenant_concurrency: tenant_concurrency.max(1),
        }
    }

    /// One full pass over every tenant. Fails only when the tenant list itself
    /// cannot be read; per-tenant failures are counted in the report.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> Result<ScanReport> {
        let tenants = self.store.list_tenants().await?;

        let results: Vec<(String, Result<TenantScan>)> = stream::iter(tenants)
            .map(|tenant| async move {
                let result = self.scan_tenant(&tenant, now).await;
                (tenant.id, result)
            })
            .buffer_unordered(self.tenant_concurrency)
            .collect()
            .await;

        let mut report = ScanReport::default();
        for (tenant_id, result) in results {
            report.tenants_scanned += 1;
            match result {
                Ok(scan) => {
                    report.reminders_fired += scan.reminders_fired;
                    report.reminders_failed += scan.reminders_failed;
                    report.delivery.merge(scan.delivery);
                }
                Err(e) => {
                    report.tenants_failed += 1;
                    tracing::warn!("⚠️ Reminder scan failed for tenant {}: {e}", tenant_id);
                }
            }
        }

        tracing::info!(
            "⏰ Reminder pass complete: {} tenants ({} failed), {} reminders ({} failed), {} sent, {} failed",
            report.tenants_scanned,
            report.tenants_failed,
            report.reminders_fired,
            report.reminders_failed,
            report.delivery.sent,
            report.delivery.failed
        );
        Ok(report)
    }

    /// Scan one tenant. Only the tenant-level reads fail the whole tenant;
    /// a lead whose marker cannot be claimed is logged and skipped.
    async fn scan_tenant(&self, tenant: &Tenant, now: DateTime<Utc>) -> Result<TenantScan> {
        let local = tenant.local_time(now);
        let today = local.date_naive();
        let now_minutes = minutes_of_day(local.time());

        let members = self.store.list_members(&tenant.id).await?;
        let task_leads = self.store.leads_due_on(&tenant.id, today).await?;
        let consult_leads = self.store.leads_with_status(&tenant.id, LeadStatus::Scheduled).await?;

        let due = task_leads
            .iter()
            .filter_map(|lead| Some((lead, task_reminder_due(lead, today, now_minutes)?)))
            .chain(consult_leads.iter().filter_map(|lead| {
                Some((lead, consult_reminder_due(lead, tenant.offset(), today, now_minutes)?))
            }));

        let mut scan = TenantScan::default();
        for (lead, reminder) in due {
            if let Err(e) = self.fire(tenant, &members, lead, &local, &reminder, &mut scan).await {
                scan.reminders_failed += 1;
                tracing::warn!(
                    "⚠️ {} for lead {} in tenant {} skipped: {e}",
                    reminder.marker,
                    lead.id,
                    tenant.id
                );
            }
        }
        Ok(scan)
    }

    async fn fire(
        &self,
        tenant: &Tenant,
        members: &[Member],
        lead: &Lead,
        local: &DateTime<FixedOffset>,
        due: &DueReminder,
        scan: &mut TenantScan,
    ) -> Result<()> {
        if !self.store.try_set_marker(&tenant.id, &lead.id, &due.marker).await? {
            tracing::debug!("Reminder {} for lead {} already claimed", due.marker, lead.id);
            return Ok(());
        }

        let payload = match due.kind {
            ReminderKind::Task => Payload::TaskReminder { lead, at: due.at, minutes_left: due.minutes_left },
            ReminderKind::Consult => Payload::ConsultReminder { lead, at: due.at, minutes_left: due.minutes_left },
        };
        let message = self.formatter.render(&payload);
        let outcome = self.dispatcher.notify(members, Some(lead), local, &message).await;

        tracing::info!(
            "🔔 {} for lead {} in tenant {}: {} sent, {} suppressed, {} failed",
            due.marker,
            lead.id,
            tenant.id,
            outcome.sent,
            outcome.suppressed,
            outcome.failed
        );
        scan.reminders_fired += 1;
        scan.delivery.merge(outcome);
        Ok(())
    }
}
