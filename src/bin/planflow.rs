use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use planflow::{
    indexer::{DocumentIndexer, IndexerOptions},
    SchemaConfig, Store,
};

#[derive(Parser, Debug)]
#[command(name = "planflow", version, about = "Planflow CLI")]
struct Cli {
    /// Postgres connection string. Falls back to DATABASE_URL.
    #[arg(long)]
    database_url: Option<String>,

    /// Schema to manage (default: public)
    #[arg(long, default_value = "public")]
    schema: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show planned DDL changes without applying
    SchemaPlan,

    /// Apply DDL changes (create tables/indexes as needed)
    SchemaSync,

    /// Run the change-feed indexer until interrupted
    RunIndexer {
        /// Checkpoint name for this consumer
        #[arg(long, default_value = "indexer")]
        consumer: String,

        /// Poll interval in milliseconds when the feed is idle
        #[arg(long, default_value_t = 250)]
        poll_ms: u64,
    },
}

#[tokio::main]
async fn main() -> planflow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let url = match cli
        .database_url
        .or_else(|| std::env::var("DATABASE_URL").ok())
    {
        Some(u) => u,
        None => {
            eprintln!("error: --database-url or env DATABASE_URL is required");
            std::process::exit(2);
        }
    };

    let config = SchemaConfig {
        base_schema: cli.schema,
    };

    let store = Store::connect(&url).await?;

    match cli.command {
        Commands::SchemaPlan => {
            let plan = store.schema().plan(&config).await?;
            print_plan(&plan);
        }
        Commands::SchemaSync => {
            let plan = store.schema().sync(&config).await?;
            if plan.is_empty() {
                println!("No changes needed.");
            } else {
                println!("Applied changes:");
                print_plan(&plan);
            }
        }
        Commands::RunIndexer { consumer, poll_ms } => {
            let channel = store.channel();
            let consumer = channel.consumer(consumer).await?;
            let indexer = DocumentIndexer::new(Arc::new(store.index()));
            indexer
                .run(
                    consumer,
                    IndexerOptions {
                        poll_interval: Duration::from_millis(poll_ms),
                    },
                )
                .await;
        }
    }

    Ok(())
}

fn print_plan(plan: &planflow::SchemaPlan) {
    if !plan.warnings().is_empty() {
        eprintln!("Warnings ({}):", plan.warnings().len());
        for w in plan.warnings() {
            eprintln!("  - {}", w);
        }
    }

    if plan.actions().is_empty() {
        println!("No pending DDL actions.");
        return;
    }

    println!("DDL actions ({}):", plan.actions().len());
    for (i, action) in plan.actions().iter().enumerate() {
        println!("{}. {}", i + 1, action.description());
        println!("{}\n", action.sql());
    }
}
