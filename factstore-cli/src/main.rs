use factstore_cli::{resolve_backend, run_console};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = resolve_backend().await?;

    info!(
        backend = %std::env::var("BACKEND").unwrap_or_else(|_| "memory".into()),
        "factstore console ready, reading commands from stdin"
    );

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    run_console(&store, stdin, stdout).await.map_err(|e| {
        error!(error = %e, "console exited with an error");
        e
    })
}
