use anyhow::{Context, Result};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use readersync::api::types::FEED_STREAM_PREFIX;
use readersync::api::HttpReaderApi;
use readersync::config::{Config, PASSWORD_ENV};
use readersync::source::{LoginState, SourceStatus, UpdateMode};
use readersync::tree::{FeedTree, MemoryTree};
use readersync::{Source, SourceEvent, UpdateFlags};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;

/// How often a one-shot command checks the login state while waiting.
const STATUS_POLL: Duration = Duration::from_millis(250);

/// Get the default config file path (~/.config/readersync/config.toml)
fn default_config_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("readersync")
        .join("config.toml"))
}

#[derive(Parser, Debug)]
#[command(
    name = "readersync",
    about = "Sync a local feed list with a Google-Reader-style service"
)]
struct Args {
    /// Config file (default: ~/.config/readersync/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in, run one full update and print the subscriptions
    Sync {
        /// Only reconcile the subscription list
        #[arg(long)]
        only_list: bool,
    },
    /// Keep syncing until interrupted
    Watch,
    /// Subscribe to a feed
    Subscribe { url: String },
    /// Unsubscribe from a feed
    Unsubscribe { url: String },
}

/// What a one-shot command is waiting for.
enum Outcome {
    Pending,
    Done,
    Failed(String),
}

fn report_event(event: &SourceEvent) {
    match event {
        SourceEvent::LoggedIn => tracing::info!("Logged in"),
        SourceEvent::LoginFailed { failures, error } => {
            eprintln!("Login failed ({} in a row): {}", failures, error)
        }
        SourceEvent::LoginRequired { failures } => {
            eprintln!("Automatic login stopped after {} failures; log in again", failures)
        }
        SourceEvent::UpdateFinished { mode, report } => tracing::info!(
            %mode,
            added = report.added.len(),
            removed = report.removed.len(),
            refreshed = report.refreshed.len(),
            "Update finished"
        ),
        SourceEvent::UpdateFailed { mode, error } => eprintln!("{} update failed: {}", mode, error),
        SourceEvent::ActionCompleted { seq, request } => {
            tracing::info!(seq, ?request, "Action completed")
        }
        SourceEvent::ActionFailed { seq, error, .. } => {
            eprintln!("Action {} discarded: {}", seq, error)
        }
        SourceEvent::Migrated => tracing::info!("Source migrated"),
    }
}

/// Drain events until `classify` reports a final outcome.
///
/// Rejected logins below the failure ceiling raise no event, so the login
/// state is polled alongside the event stream.
async fn wait_for<F>(
    source: &Source,
    events: &mut Receiver<SourceEvent>,
    limit: Duration,
    mut classify: F,
) -> Result<()>
where
    F: FnMut(&SourceEvent) -> Outcome,
{
    let waiting = async {
        let mut poll = tokio::time::interval(STATUS_POLL);
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        anyhow::bail!("Source stopped unexpectedly");
                    };
                    report_event(&event);
                    match classify(&event) {
                        Outcome::Pending => continue,
                        Outcome::Done => return Ok(()),
                        Outcome::Failed(msg) => anyhow::bail!(msg),
                    }
                }
                _ = poll.tick() => {
                    if login_rejected(&source.status().await?) {
                        anyhow::bail!("Authorization rejected");
                    }
                }
            }
        }
    };
    tokio::time::timeout(limit, waiting)
        .await
        .context("Timed out waiting for the service")?
}

/// The last login attempt ended and no session is open.
fn login_rejected(status: &SourceStatus) -> bool {
    match status.state {
        LoginState::NoAuth => true,
        LoginState::None => status.failures > 0,
        _ => false,
    }
}

fn login_outcome(event: &SourceEvent) -> Option<Outcome> {
    match event {
        SourceEvent::LoginFailed { error, .. } => Some(Outcome::Failed(error.to_string())),
        SourceEvent::LoginRequired { .. } => {
            Some(Outcome::Failed("Authorization rejected".to_string()))
        }
        _ => None,
    }
}

async fn print_subscriptions(source: &Source, tree: &MemoryTree) -> Result<()> {
    let status = source.status().await?;
    let children = tree.children();
    println!("{} subscriptions", children.len());
    for node in children {
        let key = format!("{}{}", FEED_STREAM_PREFIX, node.source);
        let updated = status
            .timestamps
            .get(&key)
            .and_then(|ts| DateTime::from_timestamp(*ts, 0))
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>5}  {}  {}  ({})",
            tree.unread_count(node.id).unwrap_or(0),
            updated,
            node.title,
            node.source
        );
    }
    Ok(())
}

async fn watch(
    source: &Source,
    events: &mut Receiver<SourceEvent>,
    every: Duration,
) -> Result<()> {
    source.login(UpdateFlags::NONE).await?;

    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately; the login already covers it
    ticker.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Interrupted, shutting down");
                return Ok(());
            }
            _ = ticker.tick() => {
                source.auto_update().await?;
            }
            event = events.recv() => match event {
                Some(event) => report_event(&event),
                None => anyhow::bail!("Source stopped unexpectedly"),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let account = config
        .account(std::env::var(PASSWORD_ENV).ok())
        .context("No account configured")?;

    let api = HttpReaderApi::new(&config.base_url, &config.client_id, config.request_timeout())
        .context("Failed to create HTTP client")?;
    let tree = Arc::new(MemoryTree::new());
    let (source, mut events) = Source::spawn(api, tree.clone(), account);

    // Login, list, counters and edits each take one request
    let limit = config.request_timeout() * 4;

    match args.command {
        Command::Sync { only_list } => {
            let flags = if only_list {
                UpdateFlags::ONLY_LIST
            } else {
                UpdateFlags::NONE
            };
            source.login(flags).await?;
            wait_for(&source, &mut events, limit, |event| {
                if let Some(outcome) = login_outcome(event) {
                    return outcome;
                }
                match event {
                    SourceEvent::UpdateFinished {
                        mode: UpdateMode::Full,
                        ..
                    } => Outcome::Done,
                    SourceEvent::UpdateFailed { error, .. } => Outcome::Failed(error.to_string()),
                    _ => Outcome::Pending,
                }
            })
            .await?;
            print_subscriptions(&source, &tree).await?;
        }
        Command::Watch => {
            let every = config
                .poll_interval()
                .context("poll_interval_minutes is 0, nothing to watch")?;
            watch(&source, &mut events, every).await?;
        }
        Command::Subscribe { url } => {
            source.enqueue_subscribe(&url).await?;
            wait_for(&source, &mut events, limit, action_outcome).await?;
            println!("Subscribed to {}", url);
        }
        Command::Unsubscribe { url } => {
            source.enqueue_unsubscribe(&url).await?;
            wait_for(&source, &mut events, limit, action_outcome).await?;
            println!("Unsubscribed from {}", url);
        }
    }

    Ok(())
}

fn action_outcome(event: &SourceEvent) -> Outcome {
    if let Some(outcome) = login_outcome(event) {
        return outcome;
    }
    match event {
        SourceEvent::ActionCompleted { .. } => Outcome::Done,
        SourceEvent::ActionFailed { error, .. } => Outcome::Failed(error.to_string()),
        _ => Outcome::Pending,
    }
}
