use std::sync::Arc;

use gridpulse_core::{Config, HttpSource, Scheduler, SnapshotStore, format_duration};
use gridpulse_server::{AppState, build_router, run_server};
use tokio_util::sync::CancellationToken;

pub fn run(config: Config) {
    let base = format!("http://{}", config.bind);

    println!("⚡ gridpulse v{}", gridpulse_core::VERSION);
    println!("   {base}");
    println!(
        "   {} devices from {}",
        config.devices.len(),
        config.base_url
    );
    println!(
        "   refresh every {}, retry after {}",
        format_duration(config.refresh_interval),
        format_duration(config.retry_delay)
    );
    println!();
    println!("   Endpoints:");
    println!("     GET /                 API index (try: curl {base})");
    println!("     GET /energy-data      Daily averages and monthly_avg per device");
    println!("     GET /health           Snapshot freshness and refresh status");
    println!();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: cannot start async runtime: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(serve(config)) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(SnapshotStore::new());
    let source = HttpSource::from_config(&config)?;
    let scheduler = Scheduler::from_config(source, &config, Arc::clone(&store))?;
    let state = AppState::new(&config, store, scheduler.status())?;

    let shutdown = CancellationToken::new();

    let refresh = tokio::spawn({
        let cancel = shutdown.clone();
        async move { scheduler.run(cancel).await }
    });

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    log::info!("received Ctrl+C, shutting down");
                    shutdown.cancel();
                }
                Err(e) => log::warn!("cannot listen for Ctrl+C: {e}"),
            }
        }
    });

    let served = run_server(build_router(state), &config.bind, shutdown.clone()).await;

    // Stop the refresh loop too if the server exited on its own.
    shutdown.cancel();
    if let Err(e) = refresh.await {
        log::error!("refresh loop ended abnormally: {e}");
    }
    served?;
    Ok(())
}
