//! Conversion server binary
//!
//! Run with: cargo run --bin docmill-server

use std::path::PathBuf;

use docmill::{config::AppConfig, server::DocmillServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docmill=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!(
        r#"
╔═══════════════════════════════════════════════════════════╗
║                         Docmill                           ║
║       Document Conversion Jobs over a REST API            ║
╚═══════════════════════════════════════════════════════════╝
"#
    );

    // Load configuration (DOCMILL_CONFIG or defaults)
    let config_path = std::env::var_os("DOCMILL_CONFIG").map(PathBuf::from);
    let config = AppConfig::load_or_default(config_path.as_deref())?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Upload dir: {:?}", config.storage.upload_dir);
    tracing::info!("  - Output dir: {:?}", config.storage.output_dir);
    tracing::info!("  - History db: {:?}", config.storage.database_path);
    tracing::info!(
        "  - Concurrent jobs: {}",
        config.processing.max_concurrent_jobs
    );

    // Create and start server
    let server = DocmillServer::new(config)?;

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("\nEndpoints:");
    println!("  POST /api/convert           - Upload a document");
    println!("  POST /api/convert/batch     - Upload several documents");
    println!("  POST /api/convert/url       - Convert a document by URL");
    println!("  GET  /api/convert/:id/status - Poll job status");
    println!("  GET  /api/export/:id/:format - Download an export");
    println!("  GET  /api/history           - Conversion history");
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
