//! # Publisher Main Entry Point

use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use publisher::{config::ConfigLoader, db, server::run_server, telemetry};

/// Social video publishing service.
#[derive(Parser, Debug)]
#[command(name = "publisher", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP API (default).
    Serve {
        /// Apply pending migrations before serving.
        #[arg(long)]
        migrate: bool,
    },
    /// Apply pending database migrations and exit.
    Migrate,
    /// Print the effective configuration with secrets redacted.
    PrintConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load()?;

    if let Some(Commands::PrintConfig) = cli.command {
        println!("{}", config.redacted_json()?);
        return Ok(());
    }

    telemetry::init_tracing(&config)?;
    tracing::info!(profile = %config.profile, "Configuration loaded");

    let pool = db::init_pool(&config).await?;

    match cli.command.unwrap_or(Commands::Serve { migrate: false }) {
        Commands::Migrate => {
            Migrator::up(&pool, None).await?;
            tracing::info!("Migrations applied");
            Ok(())
        }
        Commands::Serve { migrate } => {
            if migrate {
                Migrator::up(&pool, None).await?;
                tracing::info!("Migrations applied");
            }
            run_server(config, pool).await
        }
        Commands::PrintConfig => Ok(()),
    }
}
