use anyhow::{Context, Result};
use bookstore_api::{config, migrator::Migrator};
use clap::{Parser, Subcommand};
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "migration", about = "Manage the bookstore database schema")]
struct Cli {
    /// Overrides the configured database url
    #[arg(long)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending migrations (default)
    Up {
        #[arg(long)]
        steps: Option<u32>,
    },
    /// Roll back applied migrations
    Down {
        #[arg(long, default_value_t = 1)]
        steps: u32,
    },
    /// Print the state of every migration
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    config::init_tracing("info", false);

    let database_url = match cli.database_url {
        Some(url) => url,
        None => config::load_config()
            .context("loading configuration")?
            .database_url,
    };
    info!("Connecting to database: {}", database_url);

    let mut options = ConnectOptions::new(database_url);
    options
        .max_connections(1)
        .connect_timeout(Duration::from_secs(10))
        .sqlx_logging(false);
    let db = Database::connect(options)
        .await
        .context("connecting to database")?;

    match cli.command.unwrap_or(Command::Up { steps: None }) {
        Command::Up { steps } => {
            Migrator::up(&db, steps).await?;
            info!("Migrations applied");
        }
        Command::Down { steps } => {
            Migrator::down(&db, Some(steps)).await?;
            info!(steps, "Migrations rolled back");
        }
        Command::Status => Migrator::status(&db).await?,
    }

    Ok(())
}
