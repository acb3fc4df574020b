//! Subcommand implementations.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use embertrack_core::cloud::CloudSyncWorker;
use embertrack_core::collector::{Collector, CollectorEvent};
use embertrack_core::config::AppConfig;
use embertrack_core::report;
use embertrack_core::store::{Item, Store};
use embertrack_server::AppState;
use tokio::sync::watch;

fn open_store(config: &AppConfig, db_override: Option<PathBuf>) -> Result<Arc<Store>, String> {
    let db_path = db_override.unwrap_or_else(|| config.db_path());
    let store = Store::open_with_legacy_probe(&db_path, config.legacy_db_path().as_deref())
        .map_err(|e| e.to_string())?;
    Ok(Arc::new(store))
}

fn resolve_log_path(config: &AppConfig, override_path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path;
    }
    match &config.log_path {
        Some(path) => path.clone(),
        None => {
            eprintln!("warning: game log not found; waiting for it to appear");
            config.data_dir.join("UE_game.log")
        }
    }
}

pub async fn init(db: Option<PathBuf>, seed: Option<PathBuf>) -> Result<(), String> {
    let config = AppConfig::new(None, None, false, None);
    let store = open_store(&config, db)?;

    if let Some(seed_path) = seed {
        let raw = std::fs::read_to_string(&seed_path)
            .map_err(|e| format!("cannot read {}: {e}", seed_path.display()))?;
        let items: Vec<Item> =
            serde_json::from_str(&raw).map_err(|e| format!("invalid seed file: {e}"))?;
        let count = store.upsert_items_batch(&items).map_err(|e| e.to_string())?;
        println!("Seeded {count} items");
    }

    let total = store.item_count().map_err(|e| e.to_string())?;
    println!(
        "Store ready at {} ({total} items)",
        store
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "memory".into())
    );
    Ok(())
}

pub async fn serve(
    db: Option<PathBuf>,
    log_file: Option<PathBuf>,
    port: Option<u16>,
    portable: bool,
) -> Result<(), String> {
    let config = AppConfig::new(log_file.clone(), None, portable, port);
    crate::logging::init(&config.app_log_path());

    let store = open_store(&config, db)?;
    let log_path = resolve_log_path(&config, log_file);

    let (collector, handle) = Collector::initialize(Arc::clone(&store), log_path)
        .await
        .map_err(|e| e.to_string())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let collector_task = tokio::spawn(collector.run(shutdown_rx.clone()));

    let cloud = CloudSyncWorker::spawn(
        Arc::clone(&store),
        config.cloud.as_ref(),
        handle.clone(),
        shutdown_rx.clone(),
    )
    .map_err(|e| e.to_string())?;
    if config.cloud.is_none() {
        tracing::info!("cloud sync disabled: remote not configured");
    }

    let state = Arc::new(AppState {
        store,
        collector: handle,
        cloud,
        icon_cache_dir: config.icon_cache_dir(),
        http: reqwest::Client::new(),
    });

    let server = tokio::spawn(embertrack_server::serve(state, config.port, shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("signal handler failed: {e}"))?;
    tracing::info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    // Collector flushes its offset and open runs before we return.
    let _ = collector_task.await;
    server.await.map_err(|e| e.to_string())??;
    Ok(())
}

pub async fn tail(db: Option<PathBuf>, log_file: Option<PathBuf>) -> Result<(), String> {
    let config = AppConfig::new(log_file.clone(), None, false, None);
    crate::logging::init(&config.app_log_path());

    let store = open_store(&config, db)?;
    let log_path = resolve_log_path(&config, log_file);

    let (collector, handle) = Collector::initialize(Arc::clone(&store), log_path)
        .await
        .map_err(|e| e.to_string())?;
    let mut events = handle.subscribe();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let collector_task = tokio::spawn(collector.run(shutdown_rx));

    println!("Tailing; Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                match event {
                    Ok(CollectorEvent::DeltaRecorded { run_id, type_id, delta }) => {
                        let name = store
                            .item_name(type_id)
                            .unwrap_or_else(|_| format!("Unknown {type_id}"));
                        let attribution = run_id
                            .map(|id| format!("run {id}"))
                            .unwrap_or_else(|| "no run".into());
                        println!("{delta:>+6}  {name} ({attribution})");
                    }
                    Ok(CollectorEvent::RunStarted(id)) => println!("--- run {id} started ---"),
                    Ok(CollectorEvent::RunEnded(id)) => println!("--- run {id} ended ---"),
                    Ok(CollectorEvent::PriceLearned { type_id, value_fe }) => {
                        println!("learned: {type_id} @ {value_fe:.4} FE");
                    }
                    Ok(CollectorEvent::ScopeChanged { scope, .. }) => {
                        println!("=== player scope: {scope} ===");
                    }
                    Err(_) => {}
                }
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = collector_task.await;
    Ok(())
}

pub async fn show_runs(db: Option<PathBuf>, limit: usize) -> Result<(), String> {
    let config = AppConfig::new(None, None, false, None);
    let store = open_store(&config, db)?;

    let Some(scope) = store.latest_scope().map_err(|e| e.to_string())? else {
        println!("No runs recorded yet");
        return Ok(());
    };

    let views = report::consolidated_runs(&store, &scope, 0, limit * 5, Utc::now())
        .map_err(|e| e.to_string())?;

    println!("{:<6} {:<42} {:>9} {:>9} {:>10}", "ID", "Zone", "Dur(s)", "FE", "Value");
    for view in views.iter().take(limit) {
        println!(
            "{:<6} {:<42} {:>9.0} {:>9} {:>10.2}{}",
            view.id,
            truncate(&view.zone_name, 42),
            view.duration_seconds,
            view.base_gained,
            view.total_value_fe,
            if view.is_sub_zone { "  (sub)" } else { "" },
        );
    }
    Ok(())
}

pub async fn show_state(db: Option<PathBuf>) -> Result<(), String> {
    let config = AppConfig::new(None, None, false, None);
    let store = open_store(&config, db)?;

    let Some(scope) = store.latest_scope().map_err(|e| e.to_string())? else {
        println!("No tracked state yet");
        return Ok(());
    };

    println!("Scope: {scope}");
    let totals = store.inventory_totals(&scope).map_err(|e| e.to_string())?;
    let mut totals = totals;
    totals.sort_by_key(|(_, n)| std::cmp::Reverse(*n));

    println!("{:<38} {:>10}", "Item", "Quantity");
    for (type_id, quantity) in totals {
        let name = store
            .item_name(type_id)
            .unwrap_or_else(|_| format!("Unknown {type_id}"));
        println!("{:<38} {:>10}", truncate(&name, 38), quantity);
    }

    let slots = store.all_slots(&scope).map_err(|e| e.to_string())?;
    println!("\n{} occupied slots", slots.len());
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
