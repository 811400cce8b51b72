//! Message formatter: pure rendering of notification payloads to Telegram HTML.
//!
//! Absent optional fields are left out entirely (no placeholders). Free-text
//! fields are cut at `max_field_len` characters and marked with `…`.

use chrono::{NaiveDate, NaiveTime};
use leadpulse_core::config::FormatConfig;
use leadpulse_core::traits::RenderMode;
use leadpulse_core::types::{Category, Lead, Member};

use crate::digest::DigestStats;

/// What a notification is about.
#[derive(Debug, Clone)]
pub enum Payload<'a> {
    NewLead {
        lead: &'a Lead,
    },
    StatusChange {
        lead: &'a Lead,
        from: String,
        to: String,
    },
    Assignment {
        lead: &'a Lead,
    },
    TaskReminder {
        lead: &'a Lead,
        at: NaiveTime,
        minutes_left: i64,
    },
    ConsultReminder {
        lead: &'a Lead,
        at: NaiveTime,
        minutes_left: i64,
    },
    Digest {
        tenant_name: &'a str,
        date: NaiveDate,
        stats: &'a DigestStats,
    },
}

impl Payload<'_> {
    pub fn category(&self) -> Category {
        match self {
            Payload::NewLead { .. } => Category::NewLead,
            Payload::StatusChange { .. } => Category::StatusChange,
            Payload::Assignment { .. } => Category::Assignment,
            Payload::TaskReminder { .. } => Category::TaskReminder15,
            Payload::ConsultReminder { .. } => Category::ConsultReminder60,
            Payload::Digest { .. } => Category::DailyDigest,
        }
    }
}

/// Rendered text plus how the channel should parse it.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMessage {
    pub category: Category,
    pub text: String,
    pub mode: RenderMode,
}

/// Renders payloads. Holds only display settings.
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    crm_url: Option<String>,
    max_field_len: usize,
}

impl MessageFormatter {
    pub fn new(config: &FormatConfig) -> Self {
        Self {
            crm_url: config.crm_url.clone().filter(|u| !u.trim().is_empty()),
            max_field_len: config.max_field_len.max(1),
        }
    }

    pub fn render(&self, payload: &Payload<'_>) -> RenderedMessage {
        let text = match payload {
            Payload::NewLead { lead } => self.new_lead(lead),
            Payload::StatusChange { lead, from, to } => self.status_change(lead, from, to),
            Payload::Assignment { lead } => self.assignment(lead),
            Payload::TaskReminder { lead, at, minutes_left } => {
                let mut out = format!("⏰ <b>Task in {minutes_left} min</b>\n\n");
                out.push_str(&format!("👤 {}\n", self.field(lead.title())));
                out.push_str(&format!("🕐 {}\n", at.format("%H:%M")));
                self.contacts(&mut out, lead);
                self.with_link(out)
            }
            Payload::ConsultReminder { lead, at, minutes_left } => {
                let mut out = format!("📅 <b>Consultation in {minutes_left} min</b>\n\n");
                out.push_str(&format!("👤 {}\n", self.field(lead.title())));
                out.push_str(&format!("🕐 {}\n", at.format("%H:%M")));
                self.contacts(&mut out, lead);
                self.with_link(out)
            }
            Payload::Digest { tenant_name, date, stats } => self.digest(tenant_name, *date, stats),
        };

        RenderedMessage {
            category: payload.category(),
            text,
            mode: RenderMode::RichText,
        }
    }

    fn new_lead(&self, lead: &Lead) -> String {
        let mut out = String::from("🆕 <b>New lead!</b>\n\n");
        if let Some(source) = present(&lead.source) {
            out.push_str(&format!("📋 Source: {}\n", self.field(source)));
        }
        if let Some(name) = present(&lead.name) {
            out.push_str(&format!("👤 {}\n", self.field(name)));
        }
        self.contacts(&mut out, lead);
        if let Some(problem) = present(&lead.problem) {
            out.push_str(&format!("\n💬 {}\n", self.field(problem)));
        }
        if let Some(notes) = present(&lead.notes) {
            out.push_str(&format!("📝 {}\n", self.field(notes)));
        }
        self.with_link(out)
    }

    fn status_change(&self, lead: &Lead, from: &str, to: &str) -> String {
        let mut out = String::from("🔄 <b>Lead status changed</b>\n\n");
        out.push_str(&format!("👤 {}\n", self.field(lead.title())));
        out.push_str(&format!("{} → <b>{}</b>\n", self.field(from), self.field(to)));
        self.with_link(out)
    }

    fn assignment(&self, lead: &Lead) -> String {
        let mut out = String::from("👉 <b>You were assigned a lead</b>\n\n");
        out.push_str(&format!("👤 {}\n", self.field(lead.title())));
        self.contacts(&mut out, lead);
        if let Some(date) = lead.next_date {
            let time = present(&lead.next_time).map(|t| format!(" {}", self.field(t)));
            out.push_str(&format!(
                "📌 Next task: {}{}\n",
                date.format("%Y-%m-%d"),
                time.unwrap_or_default()
            ));
        }
        if let Some(problem) = present(&lead.problem) {
            out.push_str(&format!("\n💬 {}\n", self.field(problem)));
        }
        self.with_link(out)
    }

    fn digest(&self, tenant_name: &str, date: NaiveDate, stats: &DigestStats) -> String {
        let mut out = format!(
            "☀️ <b>Daily summary</b> · {} · {}\n\n",
            self.field(tenant_name),
            date.format("%Y-%m-%d")
        );
        out.push_str(&format!("📊 Total leads: {}\n", stats.total));
        out.push_str(&format!("🆕 New: {}\n", stats.new));
        out.push_str(&format!("📞 Due today: {}\n", stats.due_today));
        out.push_str(&format!("⚠️ Overdue: {}\n", stats.overdue));
        out.push_str(&format!("📅 Consultations today: {}\n", stats.consult_today));
        out.push_str(&format!(
            "💰 Deposits: {} ({})\n",
            stats.deposit_count,
            format_amount(stats.deposit_sum)
        ));
        out.push_str(&format!(
            "✅ Paid this month: {} ({})\n",
            stats.paid_this_month,
            format_amount(stats.paid_sum)
        ));
        self.with_link(out)
    }

    fn contacts(&self, out: &mut String, lead: &Lead) {
        if let Some(phone) = present(&lead.phone) {
            out.push_str(&format!("📞 {}\n", self.field(phone)));
        }
        if let Some(handle) = present(&lead.handle) {
            out.push_str(&format!("📱 {}\n", self.field(handle)));
        }
        if let Some(email) = present(&lead.email) {
            out.push_str(&format!("✉️ {}\n", self.field(email)));
        }
    }

    fn with_link(&self, mut out: String) -> String {
        if let Some(url) = &self.crm_url {
            out.push_str(&format!("\n🔗 <a href=\"{}\">Open CRM</a>", escape_html(url)));
        }
        out.trim_end().to_string()
    }

    /// Truncate, then escape for HTML parse mode.
    fn field(&self, value: &str) -> String {
        escape_html(&truncate(value.trim(), self.max_field_len))
    }
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Plain-text summary of what a channel is linked to, for `leadpulse status`.
pub fn channel_status(channel_id: &str, members: &[Member]) -> String {
    if members.is_empty() {
        return format!("🔌 {channel_id} is not linked");
    }
    let mut out = format!("🔗 {channel_id} is linked to {} member(s)", members.len());
    for member in members {
        out.push_str(&format!("\n• {} in {} ({:?})", member.id, member.tenant_id, member.role));
        if let Some(name) = &member.channel_name {
            out.push_str(&format!(", as {name}"));
        }
        if let Some(at) = member.linked_at {
            out.push_str(&format!(", since {}", at.format("%Y-%m-%d %H:%M UTC")));
        }
        let mut muted: Vec<&str> = member
            .notifications
            .iter()
            .filter(|(_, enabled)| !**enabled)
            .map(|(category, _)| category.as_str())
            .collect();
        if !muted.is_empty() {
            muted.sort_unstable();
            out.push_str(&format!("; muted: {}", muted.join(", ")));
        }
    }
    out
}

/// Cut to `max` characters, appending `…` when anything was dropped.
pub fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let mut cut: String = value.chars().take(max).collect();
    cut.push('…');
    cut
}

pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

fn format_amount(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("{amount:.0}")
    } else {
        format!("{amount:.2}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn formatter() -> MessageFormatter {
        MessageFormatter::new(&FormatConfig::default())
    }

    fn lead() -> Lead {
        let mut lead = Lead::new("l1", "t1", Utc::now());
        lead.phone = Some("+380501112233".into());
        lead
    }

    #[test]
    fn test_new_lead_omits_absent_fields() {
        let lead = lead();
        let msg = formatter().render(&Payload::NewLead { lead: &lead });
        assert_eq!(msg.category, Category::NewLead);
        assert_eq!(msg.mode, RenderMode::RichText);
        assert!(msg.text.contains("📞 +380501112233"));
        assert!(!msg.text.contains("Source"));
        assert!(!msg.text.contains("📱"));
        assert!(!msg.text.contains("—"));
        assert!(!msg.text.contains("Open CRM"));
    }

    #[test]
    fn test_long_fields_are_truncated() {
        let mut lead = lead();
        lead.problem = Some("x".repeat(250));
        let msg = formatter().render(&Payload::NewLead { lead: &lead });
        let expected = format!("💬 {}…", "x".repeat(200));
        assert!(msg.text.contains(&expected));
        assert!(!msg.text.contains(&"x".repeat(201)));
    }

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate("привіт", 3), "при…");
        assert_eq!(truncate("abc", 3), "abc");
    }

    #[test]
    fn test_user_text_is_escaped() {
        let mut lead = lead();
        lead.name = Some("<script>&".into());
        let msg = formatter().render(&Payload::Assignment { lead: &lead });
        assert!(msg.text.contains("&lt;script&gt;&amp;"));
    }

    #[test]
    fn test_status_change_and_link() {
        let config = FormatConfig {
            crm_url: Some("https://crm.example.com".into()),
            max_field_len: 200,
        };
        let lead = lead();
        let msg = MessageFormatter::new(&config).render(&Payload::StatusChange {
            lead: &lead,
            from: "New".into(),
            to: "Paid".into(),
        });
        assert!(msg.text.contains("New → <b>Paid</b>"));
        assert!(msg.text.ends_with("<a href=\"https://crm.example.com\">Open CRM</a>"));
    }

    #[test]
    fn test_digest_rendering() {
        let stats = DigestStats {
            total: 12,
            new: 3,
            due_today: 2,
            overdue: 1,
            consult_today: 1,
            deposit_count: 2,
            deposit_sum: 1500.0,
            paid_this_month: 1,
            paid_sum: 999.5,
        };
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let msg = formatter().render(&Payload::Digest { tenant_name: "Acme", date, stats: &stats });
        assert_eq!(msg.category, Category::DailyDigest);
        assert!(msg.text.contains("Acme · 2024-06-01"));
        assert!(msg.text.contains("💰 Deposits: 2 (1500)"));
        assert!(msg.text.contains("✅ Paid this month: 1 (999.50)"));
    }

    #[test]
    fn test_channel_status() {
        use chrono::TimeZone;
        use leadpulse_core::types::{ChannelLink, Role};

        assert_eq!(channel_status("C1", &[]), "🔌 C1 is not linked");

        let mut member = Member::new("olena", "acme", Role::Manager).with_toggle(Category::DailyDigest, false);
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).unwrap();
        member.link(&ChannelLink::new("C1", Some(" Olena "), at));

        let text = channel_status("C1", &[member]);
        assert!(text.starts_with("🔗 C1 is linked to 1 member(s)"));
        assert!(text.contains("• olena in acme (Manager), as Olena, since 2024-06-01 09:30 UTC"));
        assert!(text.ends_with("; muted: daily_digest"));
    }

    #[test]
    fn test_reminder_rendering() {
        let lead = lead();
        let at = NaiveTime::from_hms_opt(14, 0, 0).unwrap();
        let msg = formatter().render(&Payload::TaskReminder { lead: &lead, at, minutes_left: 12 });
        assert_eq!(msg.category, Category::TaskReminder15);
        assert!(msg.text.starts_with("⏰ <b>Task in 12 min</b>"));
        assert!(msg.text.contains("🕐 14:00"));
    }
}
