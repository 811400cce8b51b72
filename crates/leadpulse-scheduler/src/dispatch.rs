//! Notification dispatch: gated fan-out with per-send accounting.
//!
//! Sends within one batch run concurrently. Each call is bounded by a timeout
//! so one slow recipient cannot stall a tenant's pass; failures are logged and
//! counted, never retried here.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use leadpulse_core::error::{LeadPulseError, Result};
use leadpulse_core::traits::{DeliveryGateway, RenderMode};
use leadpulse_core::types::{Lead, Member};

use crate::format::RenderedMessage;
use crate::policy::{self, Decision};
use crate::resolver;

/// Counters for one or more notification batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Recipients produced by the resolver.
    pub resolved: usize,
    /// Recipients dropped by the policy gate.
    pub suppressed: usize,
    pub sent: usize,
    pub failed: usize,
}

impl DispatchOutcome {
    pub fn merge(&mut self, other: DispatchOutcome) {
        self.resolved += other.resolved;
        self.suppressed += other.suppressed;
        self.sent += other.sent;
        self.failed += other.failed;
    }
}

/// Sends rendered messages through a gateway.
pub struct Dispatcher {
    gateway: Arc<dyn DeliveryGateway>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(gateway: Arc<dyn DeliveryGateway>, timeout: Duration) -> Self {
        Self { gateway, timeout }
    }

    /// Resolve recipients, filter them through the policy gate, then fan out.
    pub async fn notify(
        &self,
        members: &[Member],
        lead: Option<&Lead>,
        local_now: &DateTime<FixedOffset>,
        message: &RenderedMessage,
    ) -> DispatchOutcome {
        let category = message.category;
        let resolved = resolver::resolve(members, lead, category);
        let total = resolved.len();

        let allowed: Vec<&Member> = resolved
            .into_iter()
            .filter(|member| match policy::evaluate(member, category, local_now) {
                Decision::Allow => true,
                decision => {
                    tracing::debug!("🔕 {} suppressed for member {} ({:?})", category, member.id, decision);
                    false
                }
            })
            .collect();

        let mut outcome = self.fan_out(&allowed, message).await;
        outcome.resolved = total;
        outcome.suppressed = total - allowed.len();
        outcome
    }

    /// Send one message to each recipient concurrently.
    pub async fn fan_out(&self, recipients: &[&Member], message: &RenderedMessage) -> DispatchOutcome {
        let sends = recipients.iter().filter_map(|member| {
            let channel = member.channel()?;
            Some(async move {
                let send = self.gateway.send(channel, &message.text, message.mode);
                let result = match tokio::time::timeout(self.timeout, send).await {
                    Ok(result) => result,
                    Err(_) => Err(LeadPulseError::Timeout(self.timeout)),
                };
                match result {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(
                            "⚠️ {} delivery to member {} via {} failed: {e}",
                            message.category,
                            member.id,
                            self.gateway.name()
                        );
                        false
                    }
                }
            })
        });

        let results = futures::future::join_all(sends).await;
        let sent = results.iter().filter(|ok| **ok).count();
        DispatchOutcome {
            resolved: recipients.len(),
            suppressed: 0,
            sent,
            failed: results.len() - sent,
        }
    }
}

/// A message captured by [`MemoryGateway`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub channel_id: String,
    pub text: String,
    pub mode: RenderMode,
}

/// In-process gateway that records messages instead of sending them.
/// Tests use the recording form; can be told to fail or stall for given channels.
#[derive(Default)]
pub struct MemoryGateway {
    sent: Mutex<Vec<SentMessage>>,
    failing: Mutex<HashSet<String>>,
    stalled: Mutex<HashSet<String>>,
    log_only: bool,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gateway for long-running dry runs: every send is logged, nothing is kept.
    pub fn log_only() -> Self {
        Self {
            log_only: true,
            ..Self::default()
        }
    }

    /// Make every send to `channel_id` fail.
    pub fn fail_for(&self, channel_id: &str) {
        lock(&self.failing).insert(channel_id.to_string());
    }

    /// Make every send to `channel_id` hang until the caller gives up.
    pub fn stall_for(&self, channel_id: &str) {
        lock(&self.stalled).insert(channel_id.to_string());
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.sent).clone()
    }

    pub fn sent_to(&self, channel_id: &str) -> Vec<SentMessage> {
        lock(&self.sent)
            .iter()
            .filter(|m| m.channel_id == channel_id)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.sent).clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl DeliveryGateway for MemoryGateway {
    fn name(&self) -> &str {
        "memory"
    }

    async fn send(&self, channel_id: &str, text: &str, mode: RenderMode) -> Result<()> {
        if lock(&self.stalled).contains(channel_id) {
            futures::future::pending::<()>().await;
        }
        if lock(&self.failing).contains(channel_id) {
            return Err(LeadPulseError::channel(format!("send to {channel_id} rejected")));
        }
        tracing::info!("📨 [{}] {}", channel_id, text.lines().next().unwrap_or_default());
        if self.log_only {
            return Ok(());
        }
        lock(&self.sent).push(SentMessage {
            channel_id: channel_id.to_string(),
            text: text.to_string(),
            mode,
        });
        Ok(())
    }
}
