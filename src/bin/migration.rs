use clap::{Parser, Subcommand};
use sea_orm_migration::MigratorTrait;
use storefront_checkout::{
    config::init_tracing,
    db::{self, DbConfig},
    migrator::Migrator,
};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "migration",
    about = "Apply or roll back the storefront database schema",
    version
)]
struct Cli {
    /// Database URL; falls back to DATABASE_URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Apply all pending migrations (default)
    Up,
    /// Roll back the most recent migrations
    Down {
        #[arg(long, default_value_t = 1)]
        steps: u32,
    },
    /// Drop every table and re-apply all migrations
    Fresh,
    /// Print applied and pending migrations
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info", false);
    let cli = Cli::parse();

    let db = db::establish_connection_with_config(&DbConfig {
        url: cli.database_url.clone(),
        max_connections: 2,
        sqlx_logging: true,
        ..Default::default()
    })
    .await?;

    match cli.command.unwrap_or(Command::Up) {
        Command::Up => Migrator::up(&db, None).await?,
        Command::Down { steps } => Migrator::down(&db, Some(steps)).await?,
        Command::Fresh => Migrator::fresh(&db).await?,
        Command::Status => Migrator::status(&db).await?,
    }

    info!("Migration command completed successfully");
    Ok(())
}
