use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use staydesk::config::{Config, StoreKind};
use staydesk::email::{mail_notices, EmailNotifier};
use staydesk::engine::Engine;
use staydesk::notify::{log_notices, NotifyHub};
use staydesk::store::{CsvStore, InMemoryStore, JournalStore, ReservationStore};
use staydesk::wire::{self, Credentials};

const JOURNAL_FILE: &str = "staydesk.wal";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    if config.uses_default_admin_password() {
        tracing::warn!("STAYDESK_ADMIN_PASSWORD not set, admin login uses the default password");
    }
    staydesk::observability::init(config.metrics_port)?;

    let tls_acceptor = staydesk::tls::load_tls_acceptor(
        config.tls_cert.as_deref(),
        config.tls_key.as_deref(),
    )?;

    let store: Arc<dyn ReservationStore> = match config.store {
        StoreKind::Csv => Arc::new(CsvStore::open(&config.data_dir)?),
        StoreKind::Journal => {
            std::fs::create_dir_all(&config.data_dir)?;
            let journal = Arc::new(JournalStore::open(&config.data_dir.join(JOURNAL_FILE))?);
            tokio::spawn(staydesk::compactor::run_compactor(
                journal.clone(),
                config.compact_threshold,
            ));
            journal
        }
        StoreKind::Memory => Arc::new(InMemoryStore::new()),
    };

    let hub = Arc::new(NotifyHub::new());
    tokio::spawn(log_notices(hub.subscribe()));
    match &config.smtp {
        Some(smtp) => {
            let mailer = EmailNotifier::smtp(smtp)?;
            tokio::spawn(mail_notices(hub.subscribe(), mailer));
        }
        None => info!("STAYDESK_SMTP_HOST not set, booking notices are only logged"),
    }
    let engine = Arc::new(Engine::with_policy(store, hub, config.policy));

    let credentials = Credentials {
        admin_password: config.admin_password.clone(),
        guest_password: config.guest_password.clone(),
    };
    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("staydesk listening on {addr}");
    info!("  store: {:?} at {}", config.store, config.data_dir.display());
    info!("  max_connections: {max_connections}");
    info!("  policy: {:?}", config.policy);
    info!("  tls: {}", if tls_acceptor.is_some() { "enabled" } else { "disabled" });
    if let Some(smtp) = &config.smtp {
        info!("  notices: emailed to {} via {}:{}", smtp.to, smtp.host, smtp.port);
    }

    // Stop accepting on SIGTERM/ctrl-c, then drain in-flight connections
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
                        metrics::counter!(staydesk::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(staydesk::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(staydesk::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();
                let credentials = credentials.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = wire::process_connection(socket, engine, credentials, tls).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(staydesk::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

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

    info!("staydesk stopped");
    Ok(())
}
