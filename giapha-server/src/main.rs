use clap::Parser;
use giapha_core::config::GatewayBackend;
use giapha_core::{BranchKey, GiaphaConfig, GraphStore, InMemoryGateway, PartitionGateway, PgGateway};
use giapha_seed::JsonSeedProvider;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use giapha_server::server;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "giapha.toml")]
    config: String,

    #[arg(long)]
    health: bool,

    /// Write every branch's seed dataset to the gateway and exit.
    #[arg(long)]
    import_seed: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match GiaphaConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    let level = config
        .service
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let base_dir = Path::new(&args.config).parent();
    let seeds = match JsonSeedProvider::load(&config.branches, base_dir) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("Failed to load seed data: {}", e);
            std::process::exit(1);
        }
    };

    let (gateway, pool) = match config.gateway.backend {
        GatewayBackend::Postgres => {
            let pool = match giapha_core::db::create_pool(&config.database).await {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("Failed to connect to database: {}", e);
                    std::process::exit(1);
                }
            };
            giapha_core::db::ensure_schema(&pool).await?;
            let gateway: Arc<dyn PartitionGateway> =
                Arc::new(PgGateway::new(pool.clone(), &config.gateway));
            (gateway, Some(pool))
        }
        GatewayBackend::Memory => {
            tracing::warn!("Using in-memory gateway; data is lost on exit");
            let gateway: Arc<dyn PartitionGateway> = Arc::new(InMemoryGateway::new());
            (gateway, None)
        }
    };

    if args.health {
        let Some(pool) = pool.as_ref() else {
            println!("✅ In-memory gateway, nothing to check");
            return Ok(());
        };
        match giapha_core::db::health_check(pool).await {
            Ok(v) => println!("✅ PostgreSQL connected: {}", v),
            Err(e) => {
                println!("❌ PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }

        match giapha_core::db::branch_counts(pool).await {
            Ok(counts) => {
                for (branch, records) in counts {
                    println!("✅ branch {}: {} records", branch, records);
                }
            }
            Err(e) => {
                println!("❌ people table check failed: {}", e);
                std::process::exit(1);
            }
        }

        println!("✅ Giapha DB health check passed");
        return Ok(());
    }

    if args.import_seed {
        let keys: Vec<BranchKey> = config
            .branches
            .iter()
            .map(|b| BranchKey::new(b.key.clone()))
            .collect();
        let reports = giapha_seed::import_all(
            gateway.as_ref(),
            seeds.as_ref(),
            &keys,
            config.store.seed_chunk_size,
        )
        .await?;
        for report in reports {
            println!(
                "✅ {}: {} records in {} batches",
                report.branch, report.records, report.batches
            );
        }
        return Ok(());
    }

    let store = GraphStore::from_config(&config, gateway, seeds)?;
    store.start().await?;

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    tokio::spawn(giapha_server::subsystems::maintenance::run_maintenance_loop(
        store.clone(),
        config.maintenance.clone(),
        tx.subscribe(),
    ));

    if config.http.enabled {
        let http_store = store.clone();
        let http_pool = pool.clone();
        let http_config = config.clone();
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = giapha_server::http::start_http_server(
                http_store,
                http_pool,
                http_config,
                http_shutdown,
            )
            .await
            {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    let socket_path = config.service.socket_path.clone();
    server::run_unix_server(&socket_path, store, pool, tx.subscribe()).await?;

    Ok(())
}
