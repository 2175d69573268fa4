use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use motorpool::api::Api;
use motorpool::config::Config;
use motorpool::engine::{Engine, EngineSettings};
use motorpool::observability::{
    CONNECTIONS_ACTIVE, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL,
};
use motorpool::store::{self, ReservationStore, WalStore};
use motorpool::wire;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    motorpool::observability::init(config.metrics_port)?;
    std::fs::create_dir_all(&config.data_dir)?;

    let store = Arc::new(WalStore::open(config.wal_path())?);
    for entry in &config.fleet {
        if store.register_car(&entry.name, entry.last_mileage).await? {
            info!("registered car {} at {} km", entry.name, entry.last_mileage);
        }
    }
    if store.car_count() == 0 {
        warn!("no cars registered; set MOTORPOOL_FLEET to add some");
    }
    tokio::spawn(store::run_compactor(store.clone(), config.compact_threshold));

    let settings = EngineSettings {
        auto_approve: config.auto_approve,
    };
    let engine = Arc::new(Engine::new(store.clone(), settings));
    let api = Arc::new(Api::new(engine, config.utc_offset));

    let addr = config.listen_addr()?;
    let listener = TcpListener::bind(addr).await?;
    let metrics_url = match config.metrics_port {
        Some(p) => format!("http://0.0.0.0:{p}/metrics"),
        None => "disabled".to_string(),
    };
    info!(
        data_dir = %config.data_dir.display(),
        cars = store.car_count(),
        max_connections = config.max_connections,
        auto_approve = config.auto_approve,
        utc_offset = %config.utc_offset,
        metrics = %metrics_url,
        "motorpool listening on {addr}"
    );

    let semaphore = Arc::new(Semaphore::new(config.max_connections));
    serve(listener, api, semaphore.clone(), shutdown_signal()?).await;
    drain(&semaphore, config.max_connections).await;

    info!("motorpool stopped");
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM on unix.
fn shutdown_signal() -> io::Result<impl std::future::Future<Output = ()>> {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    Ok(async move {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
    })
}

/// Accept until `shutdown` resolves. Each connection holds a semaphore
/// permit; when none is left the socket is dropped.
async fn serve<S: ReservationStore>(
    listener: TcpListener,
    api: Arc<Api<S>>,
    semaphore: Arc<Semaphore>,
    shutdown: impl std::future::Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    loop {
        let (socket, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!("accept error: {e}");
                    continue;
                }
            },
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                return;
            }
        };

        let Ok(permit) = semaphore.clone().try_acquire_owned() else {
            warn!("connection limit reached, rejecting {peer}");
            metrics::counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
            continue;
        };

        info!("connection from {peer}");
        metrics::counter!(CONNECTIONS_TOTAL).increment(1);
        metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);
        let api = api.clone();
        tokio::spawn(async move {
            if let Err(e) = wire::process_connection(socket, api).await {
                error!("connection error from {peer}: {e}");
            }
            metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
            drop(permit);
        });
    }
}

/// Wait for open connections to finish, up to `DRAIN_TIMEOUT`.
async fn drain(semaphore: &Semaphore, max_connections: usize) {
    info!("draining connections...");
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while semaphore.available_permits() < max_connections {
        if tokio::time::Instant::now() >= deadline {
            let remaining = max_connections - semaphore.available_permits();
            warn!("drain timeout, {remaining} connections still open");
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    info!("all connections drained");
}
