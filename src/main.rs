use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use notify_sync::api::HttpNotificationApi;
use notify_sync::config::{self, Config};
use notify_sync::models::{group_by_day, NotificationRecord, Session};
use notify_sync::{NotificationSync, Reconciler};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load()?;

    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "notify_sync=info,skillswap_notify=info".into()),
    );
    if cfg.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let args = cli::Cli::parse();
    let session = resolve_session(&args, &cfg)?;

    let result = match args.command.unwrap_or(cli::Commands::Watch) {
        cli::Commands::Watch => watch(&cfg, session).await,
        other => run_once(&cfg, session, other).await,
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn resolve_session(args: &cli::Cli, cfg: &Config) -> anyhow::Result<Session> {
    let user_id = args
        .user_id
        .clone()
        .or_else(|| cfg.user_id.clone())
        .context("no user id: pass --user-id or set SKILLSWAP_USER_ID")?;
    let token = args
        .token
        .clone()
        .or_else(|| cfg.token.clone())
        .context("no token: pass --token or set SKILLSWAP_TOKEN")?;
    Ok(Session::new(user_id, token)?)
}

async fn watch(cfg: &Config, session: Session) -> anyhow::Result<()> {
    let sync = NotificationSync::from_config(cfg)?;
    let mut updates = sync.updates();

    tracing::info!(api = %cfg.api_url, ws = %cfg.ws_url, "starting notification session");
    let initial = sync.start(session).await?;
    match initial.page {
        Ok(_) => print_page(sync.snapshot().await.items()),
        Err(e) => eprintln!("Could not load notifications: {}", e),
    }
    match initial.unread {
        Ok(Some(n)) => println!("{} unread", n),
        Ok(None) => {}
        Err(e) => eprintln!("Could not load unread count: {}", e),
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(record) => {
                    print_record(&record);
                    println!("{} unread", sync.reconciler().unread_count().await);
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "display fell behind the push channel");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    sync.stop().await;
    Ok(())
}

async fn run_once(cfg: &Config, session: Session, cmd: cli::Commands) -> anyhow::Result<()> {
    let api = HttpNotificationApi::from_config(cfg)?;
    let reconciler = Reconciler::new(Arc::new(api), cfg.on_mutation_failure, cfg.page_size);
    reconciler.activate(session).await;

    match cmd {
        cli::Commands::List { page, limit } => {
            let page = reconciler
                .fetch_notifications(page, limit.unwrap_or(cfg.page_size))
                .await?;
            print_page(&page.notifications);
            println!(
                "page {}/{} ({} total)",
                page.current_page, page.total_pages, page.total
            );
        }
        cli::Commands::Unread => {
            let count = reconciler.fetch_unread_count().await?.unwrap_or_default();
            println!("{}", count);
        }
        cli::Commands::Read { id } => {
            reconciler.mark_as_read(&id).await?;
            println!("Marked {} as read ({} unread)", id, reconciler.unread_count().await);
        }
        cli::Commands::ReadAll => {
            reconciler.mark_all_as_read().await?;
            println!("All notifications marked as read");
        }
        cli::Commands::Delete { id } => {
            reconciler.delete_notification(&id).await?;
            println!("Deleted {}", id);
        }
        cli::Commands::Watch => anyhow::bail!("watch needs a live session"),
    }

    reconciler.deactivate().await;
    Ok(())
}

fn print_page(items: &[NotificationRecord]) {
    if items.is_empty() {
        println!("No notifications");
        return;
    }
    for (day, records) in group_by_day(items) {
        println!("── {} ──", day.format("%a %d %b %Y"));
        for record in records {
            print_record(record);
        }
    }
}

fn print_record(record: &NotificationRecord) {
    let marker = if record.read { " " } else { "•" };
    println!(
        "{} {} [{}] {}: {}",
        marker,
        record.created_at.format("%H:%M"),
        record.kind.icon(),
        record.title,
        record.message
    );
    if let Some(target) = record.target() {
        println!("    → {}", target);
    }
}
