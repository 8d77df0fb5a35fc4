use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use innkeep::clock::SystemClock;
use innkeep::config::Config;
use innkeep::engine::Engine;
use innkeep::notify::{run_notification_log, NotifyHub};
use innkeep::{observability, reaper, wire};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    observability::init(config.metrics_port)?;
    let tls_acceptor = config.tls_acceptor()?;

    std::fs::create_dir_all(&config.data_dir)?;

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::open(
        config.wal_path(),
        notify.clone(),
        Arc::new(SystemClock::new(config.utc_offset)),
        config.engine_settings(),
    )?);
    info!("replayed journal: {} unit(s)", engine.state.len());

    tokio::spawn(run_notification_log(notify.subscribe_all()));
    tokio::spawn(reaper::run_offer_sweeper(engine.clone(), config.sweep_interval));
    tokio::spawn(reaper::run_compactor(engine.clone(), config.compact_threshold));

    let roster = Arc::new(config.roster());
    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("innkeep listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  max_connections: {max_connections}");
    info!("  managers: {}", config.managers.len());
    info!("  tls: {}", if tls_acceptor.is_some() { "enabled" } else { "disabled" });
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();
                let roster = roster.clone();
                let pw = config.password.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, engine, roster, pw, tls).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    info!("innkeep stopped");
    Ok(())
}
