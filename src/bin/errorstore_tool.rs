use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use errorstore::{ErrorRecord, LogOutcome, RollupEngine, StoreSettings};
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "errorstore-tool")]
#[command(about = "Inspect and maintain an error store")]
struct Cli {
    /// JSON settings block (`type`, `path`, `rollupSeconds`, ...)
    #[arg(long)]
    settings: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record one error occurrence
    Log {
        #[arg(long)]
        app: String,
        #[arg(long = "type")]
        type_name: String,
        #[arg(long)]
        message: String,
        #[arg(long, default_value = "")]
        detail: String,
        #[arg(long)]
        machine: Option<String>,
    },
    Get {
        guid: Uuid,
    },
    List {
        #[arg(long)]
        app: Option<String>,
    },
    Count {
        #[arg(long)]
        app: Option<String>,
        /// RFC 3339 timestamp
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },
    Protect {
        guid: Uuid,
    },
    Delete {
        guid: Uuid,
    },
    DeleteAll {
        #[arg(long)]
        app: Option<String>,
    },
    /// Remove deleted errors and unprotected ones not seen for N days
    Cull {
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
    /// Check that the configured backend is reachable
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let raw = fs::read_to_string(&cli.settings)
        .with_context(|| format!("Failed to read settings '{}'", cli.settings.display()))?;
    let settings = StoreSettings::from_json(&raw).context("Invalid settings")?;
    let store = RollupEngine::from_settings(settings)?;

    match cli.command {
        Command::Log {
            app,
            type_name,
            message,
            detail,
            machine,
        } => {
            let mut error = ErrorRecord::new(app, type_name, message).detail(detail);
            if let Some(machine) = machine {
                error = error.machine(machine);
            }
            match store.log_error(&mut error).await? {
                LogOutcome::Created(record) => println!("created {}", record.guid),
                LogOutcome::Merged(record) => println!(
                    "rolled up into {} (seen {} times)",
                    record.guid, record.duplicate_count
                ),
                LogOutcome::Queued => println!("backend unavailable, {} buffered", error.guid),
            }
        }
        Command::Get { guid } => match store.get_error(&guid).await? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => println!("not found: {}", guid),
        },
        Command::List { app } => {
            let page = store.get_all_errors(app.as_deref()).await?;
            for record in &page.errors {
                println!(
                    "{}  {}  {:>5}x  {}  {}",
                    record.guid,
                    record.creation_date.to_rfc3339(),
                    record.duplicate_count,
                    record.type_name,
                    record.message
                );
            }
            for guid in &page.unreadable {
                println!("{}  <unreadable>", guid);
            }
            println!("{} error(s)", page.total);
        }
        Command::Count { app, since } => {
            println!("{}", store.get_error_count(since, app.as_deref()).await?);
        }
        Command::Protect { guid } => report("protected", guid, store.protect_error(&guid).await?),
        Command::Delete { guid } => report("deleted", guid, store.delete_error(&guid).await?),
        Command::DeleteAll { app } => {
            let deleted = store.delete_all_errors(app.as_deref()).await?;
            println!("{}", if deleted { "deleted" } else { "nothing to delete" });
        }
        Command::Cull { days } => {
            let age = Duration::try_days(days).context("--days out of range")?;
            let older_than = Utc::now() - age;
            println!("removed {}", store.cull_errors(older_than).await?);
        }
        Command::Health => {
            store.health_check().await?;
            println!("ok ({} buffered)", store.backup_len());
        }
    }

    Ok(())
}

fn report(action: &str, guid: Uuid, done: bool) {
    if done {
        println!("{} {}", action, guid);
    } else {
        println!("not found: {}", guid);
    }
}
