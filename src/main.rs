//! # LeadPulse: CRM notification and reminder service
//!
//! Usage:
//!   leadpulse run                          # Reminder + digest loop
//!   leadpulse scan --at 2024-06-01T13:48:00Z
//!   leadpulse digest                       # Tenants whose digest time has come
//!   leadpulse digest --force               # Every tenant, off schedule
//!   leadpulse ingest --tenant acme --phone +380501112233 --source landing
//!   leadpulse bind --tenant acme --member olena --channel 123456789 --name Olena
//!   leadpulse status --channel 123456789
//!   leadpulse --dry-run run                # Log messages instead of sending

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use leadpulse_channels::TelegramGateway;
use leadpulse_core::config::{LeadPulseConfig, TELEGRAM_TOKEN_ENV};
use leadpulse_core::traits::{DeliveryGateway, LeadStore};
use leadpulse_core::types::{ChannelLink, LeadDraft};
use leadpulse_scheduler::format::channel_status;
use leadpulse_scheduler::{MemoryGateway, Scheduler, SqliteStore, spawn_scheduler};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "leadpulse",
    version,
    about = "📣 LeadPulse: lead notifications, reminders and daily digests"
)]
struct Cli {
    /// Config file (default ~/.leadpulse/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path, overrides storage.db_path
    #[arg(long)]
    db_path: Option<String>,

    /// Record messages in the log instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reminder and digest loop until interrupted
    Run,
    /// Run one reminder pass
    Scan {
        /// Evaluate as of this RFC 3339 time instead of now
        #[arg(long, value_parser = parse_instant)]
        at: Option<DateTime<Utc>>,
    },
    /// Run one digest pass: tenants whose local digest time has come
    Digest {
        #[arg(long, value_parser = parse_instant)]
        at: Option<DateTime<Utc>>,
        /// Send to every tenant now, ignoring the schedule
        #[arg(long)]
        force: bool,
    },
    /// Accept a lead and notify owners and managers
    Ingest {
        #[arg(long)]
        tenant: String,
        /// Tenant API key
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        /// Messenger handle, e.g. @username
        #[arg(long)]
        handle: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        problem: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        assign: Option<String>,
    },
    /// Bind a Telegram chat to a member
    Bind {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        member: String,
        #[arg(long)]
        channel: String,
        /// Name the chat goes by, shown in `status`
        #[arg(long)]
        name: Option<String>,
    },
    /// Show which members a Telegram chat is linked to
    Status {
        #[arg(long)]
        channel: String,
    },
    /// Detach a Telegram chat from every member it is bound to
    Unbind {
        #[arg(long)]
        channel: String,
    },
    /// Verify the bot token against the Telegram API
    Check,
    /// Print the effective configuration
    Config,
}

fn parse_instant(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected RFC 3339 time: {e}"))
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        "leadpulse=debug,leadpulse_scheduler=debug,leadpulse_channels=debug"
    } else {
        "leadpulse=info,leadpulse_scheduler=info,leadpulse_channels=info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn telegram_gateway(config: &LeadPulseConfig) -> Result<TelegramGateway> {
    let token = config.telegram_token().with_context(|| {
        format!("no bot token: set telegram.bot_token or {TELEGRAM_TOKEN_ENV}")
    })?;
    Ok(TelegramGateway::new(&token, &config.telegram))
}

fn gateway(config: &LeadPulseConfig, dry_run: bool) -> Result<Arc<dyn DeliveryGateway>> {
    if dry_run {
        tracing::info!("🧪 Dry run: messages are logged, not sent");
        return Ok(Arc::new(MemoryGateway::log_only()));
    }
    Ok(Arc::new(telegram_gateway(config)?))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let mut config = match &cli.config {
        Some(path) => LeadPulseConfig::load_from(path)?,
        None => LeadPulseConfig::load()?,
    };
    if let Some(db_path) = &cli.db_path {
        config.storage.db_path = db_path.clone();
    }

    match &cli.command {
        Command::Config => {
            let mut shown = config.clone();
            if !shown.telegram.bot_token.is_empty() {
                shown.telegram.bot_token = "***".into();
            }
            println!("{}", toml::to_string_pretty(&shown)?);
            return Ok(());
        }
        Command::Check => {
            let me = telegram_gateway(&config)?.get_me().await?;
            println!(
                "✅ Bot @{} (id {}) is reachable",
                me.username.as_deref().unwrap_or(&me.first_name),
                me.id
            );
            return Ok(());
        }
        _ => {}
    }

    let db_path = expand_path(&config.storage.db_path);
    let store: Arc<dyn LeadStore> = Arc::new(
        SqliteStore::open(std::path::Path::new(&db_path))
            .with_context(|| format!("opening {db_path}"))?,
    );

    match &cli.command {
        Command::Bind { tenant, member, channel, name } => {
            let link = ChannelLink::new(channel, name.as_deref(), Utc::now());
            if store.bind_channel(tenant, member, &link).await? {
                println!("🔗 Member {member} in {tenant} bound to {channel}");
            } else {
                anyhow::bail!("member {member} not found in tenant {tenant}");
            }
            return Ok(());
        }
        Command::Status { channel } => {
            let members = store.members_by_channel(channel).await?;
            println!("{}", channel_status(channel, &members));
            return Ok(());
        }
        Command::Unbind { channel } => {
            let count = store.unbind_channel(channel).await?;
            println!("🔌 Channel {channel} unbound from {count} member(s)");
            return Ok(());
        }
        _ => {}
    }

    let scheduler = Arc::new(Scheduler::build(
        store.clone(),
        gateway(&config, cli.dry_run)?,
        &config,
    )?);

    match cli.command {
        Command::Run => {
            tokio::select! {
                _ = spawn_scheduler(scheduler) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("👋 Shutting down");
                }
            }
        }
        Command::Scan { at } => {
            let report = scheduler.run_reminders(at.unwrap_or_else(Utc::now)).await?;
            println!(
                "⏰ {} tenants ({} failed), {} reminders ({} failed), {} sent, {} suppressed, {} failed",
                report.tenants_scanned,
                report.tenants_failed,
                report.reminders_fired,
                report.reminders_failed,
                report.delivery.sent,
                report.delivery.suppressed,
                report.delivery.failed
            );
        }
        Command::Digest { at, force } => {
            let now = at.unwrap_or_else(Utc::now);
            let report = if force {
                scheduler.send_digest_now(now).await?
            } else {
                scheduler.run_digest(now).await?
            };
            println!(
                "☀️ {} of {} tenants due ({} failed), {} sent, {} failed",
                report.tenants_due,
                report.tenants,
                report.tenants_failed,
                report.delivery.sent,
                report.delivery.failed
            );
        }
        Command::Ingest {
            tenant,
            key,
            name,
            phone,
            handle,
            email,
            source,
            problem,
            notes,
            assign,
        } => {
            let draft = LeadDraft {
                name,
                phone,
                handle,
                email,
                source,
                problem,
                notes,
                assigned_to: assign,
            };
            let lead = scheduler
                .ingestor()
                .ingest(&tenant, key.as_deref(), draft, Utc::now())
                .await?;
            println!("📥 Lead {} created in {}", lead.id, tenant);
        }
        Command::Bind { .. } | Command::Status { .. } | Command::Unbind { .. } | Command::Check | Command::Config => {}
    }

    Ok(())
}
