use chronicle::cli::{Cli, Commands};
use chronicle::config::Config;
use chronicle::logging;
use chronicle::store::EventStore;
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(opts) => {
            info!("Starting Chronicle server");
            let mut config = Config::load(opts.config.as_deref())?;
            if let Some(port) = opts.port {
                config.server.port = port;
            }
            chronicle::server::serve(config).await?;
        }
        Commands::Reindex(opts) => {
            let config = Config::load(opts.config.as_deref())?;
            let store = EventStore::open(&config.db_path(), config.search.clone())?;
            let count = store.rebuild_index()?;
            info!("Search index rebuilt with {} entries", count);
        }
        Commands::Config(opts) => {
            let config = Config::load(opts.config.as_deref())?;
            match opts.action {
                chronicle::cli::ConfigAction::Show => {
                    println!("{}", serde_json::to_string_pretty(&config)?);
                }
                chronicle::cli::ConfigAction::Validate => {
                    info!("Configuration is valid");
                }
                chronicle::cli::ConfigAction::Init => {
                    Config::write_default(opts.config.as_deref().unwrap_or("chronicle.json"))?;
                    info!("Configuration file created");
                }
            }
        }
        Commands::Version => {
            println!("chronicle {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
