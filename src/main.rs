use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use fcbox::api;
use fcbox::config::Config;
use fcbox::reaper;
use fcbox::sandbox::manager::SandboxManager;

#[tokio::main]
async fn main() {
    // 1. Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fcbox=info,tower_http=info".parse().unwrap()),
        )
        .init();

    // 2. Parse config; inconsistencies are reported but not fatal so a host
    //    without artifacts yet can still serve /health.
    let config = Arc::new(Config::from_env());
    for problem in config.validate() {
        warn!("config: {}", problem);
    }

    // 3. Create the sandbox manager and its on-disk layout
    let manager =
        Arc::new(SandboxManager::new(config.clone()).expect("failed to create base directories"));

    // 4. Reconcile whatever a previous run left behind
    let (reattached, swept) = manager.recover().await;
    info!(reattached, swept, "crash recovery complete");

    // 5. Start the idle reaper
    reaper::spawn(Arc::clone(&manager), Arc::clone(&config));

    // 6. Build the API router and serve
    let app = api::router(Arc::clone(&config), Arc::clone(&manager));
    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .expect("failed to bind API listener");

    info!(
        port = config.port,
        max_sandboxes = config.max_sandboxes,
        memory_budget_mib = config.memory_budget_mib,
        "fcbox ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            // Live VMM children are deliberately left running: the next start
            // reattaches them (or sweeps the dead ones) in recover().
            info!("shutting down; sandboxes are left for recovery on restart");
        })
        .await
        .expect("server error");
}
