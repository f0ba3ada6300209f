use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use gridpulse_core::{Config, HttpSource, Scheduler, Snapshot, SnapshotStore};

pub fn run(config: &Config, output: Option<&str>) {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: cannot start async runtime: {e}");
            std::process::exit(1);
        }
    };

    let snapshot = match rt.block_on(fetch_once(config)) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let result = render(&snapshot).and_then(|json| match output {
        Some(path) => write_output(Path::new(path), &json),
        None => {
            println!("{json}");
            Ok(())
        }
    });
    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// One refresh cycle against a fresh store; the snapshot it published.
async fn fetch_once(config: &Config) -> Result<Arc<Snapshot>, Box<dyn std::error::Error>> {
    let store = Arc::new(SnapshotStore::new());
    let source = HttpSource::from_config(config)?;
    let scheduler = Scheduler::from_config(source, config, Arc::clone(&store))?;

    let report = scheduler.run_cycle(Utc::now()).await?;
    log::info!(
        "{} rows from {} windows ({} malformed, {} from unknown devices)",
        report.records.accepted,
        report.windows,
        report.records.malformed,
        report.records.unknown_device
    );
    store
        .current()
        .ok_or_else(|| "cycle succeeded but published nothing".into())
}

fn render(snapshot: &Snapshot) -> Result<String, Box<dyn std::error::Error>> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}

fn write_output(path: &Path, json: &str) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::write(path, json).map_err(|e| format!("cannot write {}: {e}", path.display()))?;
    println!("Snapshot written to {}", path.display());
    Ok(())
}
