use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use fleetbook::app::Backend;
use fleetbook::config::Config;
use fleetbook::mail::{LogMailer, Mailer, SmtpMailer};
use fleetbook::store::Store;
use fleetbook::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    fleetbook::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(Store::open(config.journal_path())?);

    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpMailer::new(smtp)?),
        None => Arc::new(LogMailer),
    };
    let backend = Backend::new(&config, store.clone(), mailer);

    info!("fleetbook started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  admission: {:?}, boundary: {:?}", config.admission, config.boundary);
    info!("  update policy: {:?}", config.update_policy);
    info!(
        "  email: {} (budget {:?}, on timeout {:?})",
        config.smtp.as_ref().map_or("log only".to_string(), |s| format!("smtp {}:{}", s.host, s.port)),
        config.dispatch.budget,
        config.dispatch.on_timeout
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let sweeper = tokio::spawn(sweeper::run_sweeper(
        backend.reservations.clone(),
        config.sweep_interval,
    ));
    let compactor = tokio::spawn(sweeper::run_compactor(store.clone(), config.compact_threshold));

    // Graceful shutdown on SIGTERM/ctrl-c
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    info!("shutdown signal received, stopping background tasks");
    sweeper.abort();
    compactor.abort();

    if let Err(e) = store.compact_journal().await {
        tracing::error!("final compaction failed: {e}");
    }
    info!("fleetbook stopped");
    Ok(())
}
