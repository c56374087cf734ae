// Main entry point for the translation relay server

use localingo::{router, AppState, Config};

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(Config::new().context("Failed to load configuration")?);

    // Initialize logging
    let filter = EnvFilter::new(format!(
        "localingo={},tower_http=warn",
        config.log_level().as_str().to_lowercase()
    ));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== LocaLingo Starting ===");
    info!("LLM endpoint: {} (model {})", config.llm.endpoint, config.llm.model);
    info!("PDF translate endpoint: {}", config.pdf.endpoint);
    info!(
        "Translations log: {} (saving {})",
        config.storage.translations_file.display(),
        if config.save_translations() { "ON" } else { "OFF" }
    );

    let state = AppState::new(Arc::clone(&config))?;
    let app = router(state);

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  POST   /api/translate-text                 - Stream a text translation (SSE)");
    info!("  POST   /api/translate-pdf                  - Submit a PDF (multipart/form-data)");
    info!("  GET    /api/translate-pdf/{{task_id}}        - Poll task status");
    info!("  DELETE /api/translate-pdf/{{task_id}}        - Cancel a task");
    info!("  GET    /api/translate-pdf/{{task_id}}/{{role}} - Download original, mono or dual PDF");
    info!("  GET    /health                             - Health check");
    info!("  GET    /metrics                            - Prometheus metrics");
    info!("  GET    /stats                              - Detailed statistics");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
