use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use health::LifecycleState;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower::Service;

use crate::config::Config;
use crate::migrations::{self, PgMigrationStore};
use crate::readiness::{self, PostgresDependency};
use crate::router;
use crate::users::directory::HttpUserDirectory;
use crate::users::repository::PgUserStore;

#[derive(Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// All in-flight requests completed before the deadline.
    Drained,
    /// The grace deadline elapsed first; remaining connections are dropped.
    DeadlineExceeded,
}

/// Single bounded wait for shutdown draining. Requests run to completion,
/// never interrupted mid-flight; the deadline only caps how long we wait
/// for them.
pub async fn wait_for_drain<F>(drain: F, deadline: Duration) -> DrainOutcome
where
    F: Future<Output = ()>,
{
    match tokio::time::timeout(deadline, drain).await {
        Ok(()) => DrainOutcome::Drained,
        Err(_) => DrainOutcome::DeadlineExceeded,
    }
}

/// Run the service: wait for Postgres, apply pending migrations, then serve
/// until `shutdown` resolves and the drain completes. Startup is strictly
/// ordered; any failure before the accept loop is fatal and the listener is
/// never bound.
pub async fn serve<F>(config: Config, graceful_timeout: Duration, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let pool = PgPoolOptions::new()
        .max_connections(config.max_pg_connections)
        .connect_lazy(&config.database_url)
        .context("invalid database url")?;

    readiness::wait_until_ready(
        &PostgresDependency::new(pool.clone()),
        config.database_ready_max_attempts,
    )
    .await
    .context("database never became ready")?;

    let plan = migrations::embedded_plan();
    let store = PgMigrationStore::new(pool.clone());
    let applied = migrations::apply_pending(&plan, &store, plan.len())
        .await
        .context("schema migration failed")?;
    tracing::info!("applied {} pending migration(s)", applied);

    // Traffic is only dispatched from here on.
    health::advance_lifecycle_state(LifecycleState::Ready);

    let app = router::router(
        HttpUserDirectory::new(config.user_directory_url.clone()),
        PgUserStore::new(pool),
        config.export_prometheus,
    );

    let listener = TcpListener::bind(config.address)
        .await
        .context("could not bind port")?;
    tracing::info!("listening on {:?}", listener.local_addr()?);

    // Hyper server with manual connection handling so that shutdown can
    // stop accepting while watched connections drain.
    let builder = AutoBuilder::new(TokioExecutor::new());
    let graceful = GracefulShutdown::new();

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, _remote_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("failed to accept connection: {}", e);
                        continue;
                    }
                };

                // Match axum default: set TCP_NODELAY for low-latency
                if let Err(e) = socket.set_nodelay(true) {
                    tracing::warn!("failed to set TCP_NODELAY: {}", e);
                }

                let app = app.clone();
                let service = hyper::service::service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                    let mut app = app.clone();
                    let req = req.map(axum::body::Body::new);
                    async move { app.call(req).await }
                });

                let conn = builder.serve_connection_with_upgrades(
                    TokioIo::new(socket),
                    service,
                );

                // Register connection with graceful shutdown handler
                let conn = graceful.watch(conn.into_owned());

                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        tracing::debug!("connection closed: {}", e);
                    }
                });
            }
            _ = &mut shutdown => {
                health::advance_lifecycle_state(LifecycleState::Draining);
                tracing::info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    match wait_for_drain(graceful.shutdown(), graceful_timeout).await {
        DrainOutcome::Drained => tracing::info!("all in-flight requests drained"),
        DrainOutcome::DeadlineExceeded => tracing::warn!(
            "drain deadline of {:?} elapsed, closing remaining connections",
            graceful_timeout
        ),
    }

    health::advance_lifecycle_state(LifecycleState::Stopped);
    Ok(())
}
