mod orders;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::orders::OrdersCommands;

#[derive(Debug, Parser)]
#[command(name = "preorder-cli")]
#[command(about = "Operator tooling for scheduled orders")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Inspect and manage scheduled orders
    Orders {
        #[command(subcommand)]
        command: OrdersCommands,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Apply pending migrations
    Migrate,
    /// Check database connectivity
    Ping,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("warn"))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("preorder-cli ready; see --help for commands");
        return Ok(());
    };

    let pool = preorder_db::connect_pool_from_env().await?;
    match command {
        Commands::Db {
            command: DbCommands::Migrate,
        } => {
            let applied = preorder_db::run_migrations(&pool).await?;
            println!("migrations up to date ({applied} applied)");
        }
        Commands::Db {
            command: DbCommands::Ping,
        } => {
            preorder_db::ping(&pool).await?;
            println!("database reachable");
        }
        Commands::Orders { command } => match command {
            OrdersCommands::List { status, limit } => {
                orders::run_orders_list(&pool, status, limit).await?;
            }
            OrdersCommands::Show { id } => orders::run_orders_show(&pool, id).await?,
            OrdersCommands::Cancel { id } => orders::run_orders_cancel(&pool, id).await?,
        },
    }

    Ok(())
}
