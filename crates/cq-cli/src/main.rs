use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cq_config::UnusedKeyPolicy;
use cq_db::PgQueueStore;
use cq_queue::{EngineSettings, QueueEngine};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cq")]
#[command(about = "Clinic queue operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> site overrides...)
        #[arg(required = true)]
        paths: Vec<String>,

        /// Fail when the merged document has keys no section consumes.
        #[arg(long, default_value_t = false)]
        strict: bool,
    },

    /// Credential provisioning
    User {
        #[command(subcommand)]
        cmd: UserCmd,
    },

    /// Print the ordered waiting list of a service as JSON
    WaitingList {
        #[arg(long)]
        service: String,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    /// Apply SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum UserCmd {
    /// Insert a user row. Fails if the username is taken.
    Create {
        #[arg(long)]
        username: String,

        #[arg(long)]
        secret: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = cq_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = cq_db::status(&pool).await?;
                    println!("db_ok={} has_queue_tables={}", s.ok, s.has_queue_tables);
                }
                DbCmd::Migrate => {
                    cq_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths, strict } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = cq_config::load_layered_yaml(&path_refs)?;
            // Decoding here surfaces schema errors before the daemon would.
            loaded.app_config()?;

            let policy = if strict {
                UnusedKeyPolicy::Fail
            } else {
                UnusedKeyPolicy::Warn
            };
            let report = cq_config::report_unused_keys(&loaded.config_json, policy)?;
            for pointer in &report.unused_leaf_pointers {
                eprintln!("unused_key={pointer}");
            }

            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::User { cmd } => match cmd {
            UserCmd::Create { username, secret } => {
                let pool = cq_db::connect_from_env().await?;
                cq_db::create_user(&pool, &username, &secret).await?;
                println!("user_created={username}");
            }
        },

        Commands::WaitingList { service } => {
            let pool = cq_db::connect_from_env().await?;
            let engine = QueueEngine::new(
                Arc::new(PgQueueStore::new(pool)),
                EngineSettings::default(),
            );
            let list = engine.waiting_list(&service).await?;
            let out = serde_json::to_string_pretty(&list).context("serialize waiting list")?;
            println!("{out}");
        }
    }

    Ok(())
}
