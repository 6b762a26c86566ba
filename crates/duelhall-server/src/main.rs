//! Duelhall live server.
//!
//! Runs the WebSocket live endpoint and the cleanup sweeper on top of the
//! in-memory stores. Configuration comes from `DUELHALL_*` environment
//! variables (see [`ServerConfig::from_env`]); logging from `RUST_LOG`.
//!
//! ```text
//! DUELHALL_JWT_SECRET=dev-secret RUST_LOG=duelhall=debug cargo run -p duelhall-server
//! ```

use duelhall::prelude::*;

#[tokio::main]
async fn main() -> Result<(), DuelhallError> {
    duelhall::init_tracing();

    let config = ServerConfig::from_env()?;
    tracing::info!(
        bind = %config.bind,
        sweep_interval = ?config.app.sweep.interval,
        idle_timeout = ?config.app.registry.idle_timeout,
        "starting duelhall"
    );

    let app = Duelhall::builder(MemoryStore::new(), MemoryEphemeralStore::new())
        .config(config.app)
        .build();

    let sweeper = app.spawn_sweeper();
    let mut sweep_errors = sweeper.errors();
    tokio::spawn(async move {
        while let Ok(e) = sweep_errors.recv().await {
            tracing::error!(step = e.step, kind = %e.kind, "sweep failed: {}", e.message);
        }
    });

    let server = LiveServerBuilder::new()
        .bind(&config.bind)
        .build(app, JwtAuthenticator::new(config.jwt_secret.as_bytes()))
        .await?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown requested");
        })
        .await?;

    sweeper.stop().await;
    Ok(())
}
