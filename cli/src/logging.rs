//! App log setup: stderr plus a rotating file in the data directory.

use std::fs::OpenOptions;
use std::path::Path;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Rotate once the live file exceeds this size.
const ROTATE_BYTES: u64 = 5 * 1024 * 1024;

/// Generations kept after rotation.
const KEEP: u32 = 3;

/// Shift `embertrack.log` → `.1` → `.2` → `.3` when the live file is over
/// the size cap, dropping the oldest.
pub fn rotate_if_needed(path: &Path) {
    let Ok(meta) = std::fs::metadata(path) else {
        return;
    };
    if meta.len() < ROTATE_BYTES {
        return;
    }
    let generation = |n: u32| path.with_extension(format!("log.{n}"));
    let _ = std::fs::remove_file(generation(KEEP));
    for n in (1..KEEP).rev() {
        let _ = std::fs::rename(generation(n), generation(n + 1));
    }
    let _ = std::fs::rename(path, generation(1));
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init(log_path: &Path) {
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    rotate_if_needed(log_path);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,embertrack=debug"));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(file) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Arc::new(file));
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
        }
        Err(e) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            tracing::warn!("app log file unavailable at {}: {e}", log_path.display());
        }
    }
}
