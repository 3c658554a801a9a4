//! chain-dispatch binary

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use chain_dispatch::{
    config::{Args, StoreBackend},
    db::{redact_uri, MongoClient},
    logging, server, ChainManager, ChainStore, InMemoryChainStore, MongoChainStore,
};

/// Build the configured store, falling back to memory in dev mode
async fn open_store(args: &Args) -> anyhow::Result<(Arc<dyn ChainStore>, &'static str)> {
    if args.store == StoreBackend::Memory {
        return Ok((Arc::new(InMemoryChainStore::new()), "memory"));
    }

    let opened = async {
        let mongo = MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await?;
        MongoChainStore::new(&mongo, &args.mongodb_collection, args.counter_scheme).await
    }
    .await;

    match opened {
        Ok(store) => {
            info!("MongoDB chain store ready");
            Ok((Arc::new(store), "mongo"))
        }
        Err(e) if args.dev_mode => {
            warn!("MongoDB unavailable (dev mode, using memory store): {}", e);
            Ok((Arc::new(InMemoryChainStore::new()), "memory"))
        }
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init(&args.log_level, args.log_json);

    if let Err(e) = args.validate() {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  chain-dispatch");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Store: {:?}", args.store);
    info!(
        "MongoDB: {} / {}.{}",
        redact_uri(&args.mongodb_uri),
        args.mongodb_db,
        args.mongodb_collection
    );
    info!("Counters: {:?}", args.counter_scheme);
    info!(
        "Selection: {:?} match, {:?} load key, {:?} tie-break",
        args.condition_match, args.load_key, args.tie_break
    );
    info!(
        "Claim attempts: {}, read on release: {}, setup cap: {}",
        args.claim_attempts, args.count_read_on_release, args.max_setup_chains
    );
    info!("======================================");

    let (store, store_name) = match open_store(&args).await {
        Ok(opened) => opened,
        Err(e) => {
            error!("Chain store unavailable: {}", e);
            std::process::exit(1);
        }
    };

    let manager = Arc::new(ChainManager::new(
        store,
        args.selection_policy(),
        args.lifecycle_config(),
    ));

    let state = Arc::new(server::AppState::new(args, manager, store_name));
    server::run(state).await?;

    info!("chain-dispatch stopped");
    Ok(())
}
