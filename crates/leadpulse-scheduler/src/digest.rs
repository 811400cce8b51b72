//! Daily digest: per-tenant pipeline summary sent to every bound member.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use leadpulse_core::error::Result;
use leadpulse_core::traits::LeadStore;
use leadpulse_core::types::{Lead, LeadStatus, Tenant};

use crate::cron::CronSchedule;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::format::{MessageFormatter, Payload};

/// Pipeline counters for one tenant-local day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DigestStats {
    pub total: usize,
    pub new: usize,
    /// Open leads whose next task falls on the day.
    pub due_today: usize,
    /// Open leads whose next task date has passed.
    pub overdue: usize,
    pub consult_today: usize,
    pub deposit_count: usize,
    pub deposit_sum: f64,
    pub paid_this_month: usize,
    pub paid_sum: f64,
}

impl DigestStats {
    pub fn compute(leads: &[Lead], today: NaiveDate, offset: FixedOffset) -> Self {
        let mut stats = DigestStats {
            total: leads.len(),
            ..Default::default()
        };

        for lead in leads {
            if lead.status == LeadStatus::New {
                stats.new += 1;
            }
            if !lead.status.is_terminal() {
                match lead.next_date {
                    Some(date) if date == today => stats.due_today += 1,
                    Some(date) if date < today => stats.overdue += 1,
                    _ => {}
                }
            }
            if lead.status == LeadStatus::Scheduled
                && lead.consult.is_some_and(|c| c.with_timezone(&offset).date_naive() == today)
            {
                stats.consult_today += 1;
            }
            if lead.status == LeadStatus::Deposit {
                stats.deposit_count += 1;
                stats.deposit_sum += lead.deposit_amount.unwrap_or_default();
            }
            if lead.status == LeadStatus::Paid
                && lead
                    .paid_at
                    .is_some_and(|d| d.year() == today.year() && d.month() == today.month())
            {
                stats.paid_this_month += 1;
                stats.paid_sum += lead.paid_total.unwrap_or_default();
            }
        }
        stats
    }
}

/// Result of one digest pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestReport {
    /// Tenants looked at.
    pub tenants: usize,
    /// Tenants whose digest went out on this pass.
    pub tenants_due: usize,
    pub tenants_failed: usize,
    pub delivery: DispatchOutcome,
}

/// Tenant-level marker key, e.g. `digest_2024-06-01`.
pub fn digest_marker(date: NaiveDate) -> String {
    format!("digest_{}", date.format("%Y-%m-%d"))
}

/// Builds and sends the daily digest.
///
/// The schedule is evaluated in each tenant's local time. A tick picks up a
/// scheduled minute up to `catch_up` late, and the tenant marker for that
/// local date is claimed before anything is sent, so each tenant gets at
/// most one digest per local day.
pub struct DigestBuilder {
    store: Arc<dyn LeadStore>,
    dispatcher: Arc<Dispatcher>,
    formatter: Arc<MessageFormatter>,
    schedule: CronSchedule,
    catch_up: Duration,
    tenant_concurrency: usize,
}

impl DigestBuilder {
    pub fn new(
        store: Arc<dyn LeadStore>,
        dispatcher: Arc<Dispatcher>,
        formatter: Arc<MessageFormatter>,
        schedule: CronSchedule,
        catch_up: Duration,
        tenant_concurrency: usize,
    ) -> Self {
        Self {
            store,
            dispatcher,
            formatter,
            schedule,
            catch_up,
            tenant_concurrency: tenant_concurrency.max(1),
        }
    }

    /// Send the digest to every tenant whose local digest time has come.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> Result<DigestReport> {
        self.pass(now, false).await
    }

    /// Send the digest to every tenant right away, ignoring the schedule.
    /// Markers are left alone so the scheduled digest still goes out.
    pub async fn send_all(&self, now: DateTime<Utc>) -> Result<DigestReport> {
        self.pass(now, true).await
    }

    async fn pass(&self, now: DateTime<Utc>, force: bool) -> Result<DigestReport> {
        let tenants = self.store.list_tenants().await?;

        let results: Vec<(String, Result<Option<DispatchOutcome>>)> = stream::iter(tenants)
            .map(|tenant| async move {
                let result = if force {
                    self.send_for(&tenant, now).await.map(Some)
                } else {
                    self.send_if_due(&tenant, now).await
                };
                (tenant.id, result)
            })
            .buffer_unordered(self.tenant_concurrency)
            .collect()
            .await;

        let mut report = DigestReport::default();
        for (tenant_id, result) in results {
            report.tenants += 1;
            match result {
                Ok(Some(outcome)) => {
                    report.tenants_due += 1;
                    report.delivery.merge(outcome);
                }
                Ok(None) => {}
                Err(e) => {
                    report.tenants_failed += 1;
                    tracing::warn!("⚠️ Digest failed for tenant {}: {e}", tenant_id);
                }
            }
        }

        if report.tenants_due > 0 || report.tenants_failed > 0 {
            tracing::info!(
                "☀️ Digest pass complete: {} of {} tenants due ({} failed), {} sent, {} failed",
                report.tenants_due,
                report.tenants,
                report.tenants_failed,
                report.delivery.sent,
                report.delivery.failed
            );
        }
        Ok(report)
    }

    async fn send_if_due(&self, tenant: &Tenant, now: DateTime<Utc>) -> Result<Option<DispatchOutcome>> {
        let local = tenant.local_time(now);
        let Some(slot) = self.schedule.first_between(local - self.catch_up, local) else {
            return Ok(None);
        };

        let marker = digest_marker(slot.date_naive());
        if !self.store.try_set_tenant_marker(&tenant.id, &marker).await? {
            tracing::debug!("Digest {} for tenant {} already sent", marker, tenant.id);
            return Ok(None);
        }
        self.send_for(tenant, now).await.map(Some)
    }

    /// Compute and send one tenant's digest.
    pub async fn send_for(&self, tenant: &Tenant, now: DateTime<Utc>) -> Result<DispatchOutcome> {
        let local = tenant.local_time(now);
        let today = local.date_naive();

        let leads = self.store.list_leads(&tenant.id).await?;
        let members = self.store.list_members(&tenant.id).await?;
        let stats = DigestStats::compute(&leads, today, tenant.offset());

        let message = self.formatter.render(&Payload::Digest {
            tenant_name: &tenant.name,
            date: today,
            stats: &stats,
        });
        let outcome = self.dispatcher.notify(&members, None, &local, &message).await;
        tracing::debug!(
            "Digest for tenant {}: {} leads, {} recipients",
            tenant.id,
            stats.total,
            outcome.sent
        );
        Ok(outcome)
    }
}
