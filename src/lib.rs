pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod store;
pub mod telemetry;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;

use config::AppConfig;
use error::AppError;
use metrics::{ExecutionAggregator, ModeGate};
use store::{RecordStore, RecordStoreClient};
use telemetry::{ActionRecorder, BackupJournal, BackupQueue, RetryStats, RetryWorker};

/// Shared state handed to every HTTP handler.
pub struct AppState {
    pub recorder: Arc<ActionRecorder>,
    pub gate: Arc<ModeGate>,
    pub backup: Arc<BackupQueue>,
    pub retry_stats: Arc<RetryStats>,
    /// Whether a record store token was present at startup.
    pub store_configured: bool,
}

/// Wire everything together and serve until Ctrl-C.
pub async fn run() -> Result<(), AppError> {
    logging::init();

    tracing::info!("Starting dashboard-telemetry v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::from_env()?;
    tracing::debug!(?config, "Loaded configuration");

    let client = RecordStoreClient::new(&config.store)?;
    let store_configured = client.is_configured();
    if !store_configured {
        tracing::warn!(
            "RECORD_STORE_TOKEN is not set: actions will be queued locally and live metrics report store errors"
        );
    }
    let store: Arc<dyn RecordStore> = Arc::new(client);

    let backup = Arc::new(BackupQueue::with_capacity(config.backup_capacity));
    let journal = config.backup_journal_path.clone().map(BackupJournal::new);
    match &journal {
        Some(journal) => match journal.load_into(&backup) {
            Ok(restored) => tracing::info!(
                path = %journal.path().display(),
                restored,
                "Backup journal loaded"
            ),
            Err(e) => tracing::warn!(
                path = %journal.path().display(),
                error = %e,
                "Failed to load backup journal, starting with an empty queue"
            ),
        },
        None => tracing::info!("Backup queue is in-memory only; queued actions are lost on restart"),
    }

    let recorder = Arc::new(ActionRecorder::new(
        store.clone(),
        backup.clone(),
        config.store.metrics_collection.clone(),
        config.store.timeout,
    ));
    let gate = Arc::new(ModeGate::new(
        ExecutionAggregator::new(
            store.clone(),
            config.store.execution_log_collection.clone(),
            config.store.timeout,
        ),
        backup.clone(),
    ));

    let worker = RetryWorker::new(
        store,
        backup.clone(),
        config.store.metrics_collection.clone(),
        config.retry.clone(),
        config.store.timeout,
    )
    .with_journal(journal);
    let retry_stats = worker.stats();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let retry_handle = worker.spawn(shutdown_rx.clone());

    let state = Arc::new(AppState {
        recorder,
        gate,
        backup,
        retry_stats,
        store_configured,
    });

    let listener = TcpListener::bind(config.bind_addr).await?;
    let mut server = tokio::spawn(server::serve(listener, state, shutdown_rx));

    let early_exit = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C, shutting down");
            } else {
                tracing::info!("Ctrl-C received, shutting down");
            }
            None
        }
        result = &mut server => Some(result),
    };

    let _ = shutdown_tx.send(true);
    let server_result = match early_exit {
        Some(result) => result,
        None => server.await,
    };

    if let Err(e) = retry_handle.await {
        tracing::error!(error = %e, "Retry worker task failed");
    }

    server_result.map_err(|e| AppError::Internal(format!("Server task failed: {e}")))?
}
