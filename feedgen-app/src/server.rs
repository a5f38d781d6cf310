use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;

/// Bind `host:port` and serve until Ctrl-C.
pub async fn serve(host: &str, port: u16, router: Router) -> Result<()> {
    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("failed to bind {host}:{port}"))?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "feed generator listening on http://{host}:{port}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server.stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown requested");
    }
}
