use std::sync::Arc;

use boundary_sentinel::api::{AppState, router};
use boundary_sentinel::auth::create_authenticator;
use boundary_sentinel::config::ServiceConfig;
use boundary_sentinel::detection::BoundaryDetector;
use boundary_sentinel::error::Result;
use boundary_sentinel::llm::create_provider;
use boundary_sentinel::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServiceConfig::from_env()?;

    eprintln!("🛡️  Boundary Sentinel v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   API: http://0.0.0.0:{}/api/boundary/detect", config.port);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(&config.db_path).await?);

    // ── Collaborators ────────────────────────────────────────────────────
    let llm = create_provider(&config.llm)?;
    let auth = create_authenticator(&config.auth, config.llm.timeout)?;
    let detector = Arc::new(BoundaryDetector::new(
        Arc::clone(&db),
        llm,
        config.detection,
    ));

    let app = router(AppState { detector, db, auth });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "Boundary detection server started");
    axum::serve(listener, app).await?;

    Ok(())
}
