use std::sync::Arc;

use clap::Parser;
use concord_core::{ConcordConfig, GeminiSemanticClient, HttpSearchClient, SemanticConfig};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use concord_server::router::AppState;
use concord_server::server;
use concord_server::subsystems::aggregate::{ConstraintAnswers, SourceCache};
use concord_server::subsystems::sessions;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "concord.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience — production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match ConcordConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Connect to DB
    let pool = match concord_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match concord_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ PostgreSQL connected: {}", v),
            Err(e) => {
                println!("❌ PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }

        println!("✅ Concord DB health check passed");
        return Ok(());
    }

    // Collaborator clients
    let semantic = match GeminiSemanticClient::new(SemanticConfig::from_service_config(
        &config.semantic,
    )) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Failed to create semantic client: {}", e);
            std::process::exit(1);
        }
    };
    let search = match HttpSearchClient::new(&config.search) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Failed to create search client: {}", e);
            std::process::exit(1);
        }
    };

    // Startup snapshots: safety rules and constraint answers, both degrading
    // to built-ins when the store is unreachable.
    let safety = concord_core::SafetyGate::load(&pool).await;
    let constraints = ConstraintAnswers::load(&pool).await;

    let state = Arc::new(AppState {
        pool: pool.clone(),
        config: config.clone(),
        semantic: Arc::new(semantic),
        search: Arc::new(search),
        safety: Arc::new(safety),
        constraints: Arc::new(constraints),
        cache: Arc::new(SourceCache::from_config(&config.aggregator)),
    });

    // Shutdown plumbing
    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    // Background idle-session sweep
    tokio::spawn(sessions::run_expiry_sweep(
        pool.clone(),
        config.session.clone(),
        tx.subscribe(),
    ));

    let socket_path = config.service.socket_path.clone();
    server::run_unix_server(&socket_path, state, tx.subscribe()).await?;

    Ok(())
}
