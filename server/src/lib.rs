//! Local HTTP boundary.
//!
//! Handlers are thin: they parse the request, call into `embertrack-core`,
//! and shape JSON. Binding the loopback port doubles as the single-instance
//! guard; a second process fails to bind and exits.

pub mod cloud;
pub mod http;
pub mod icons;
pub mod inventory;
pub mod prices;
pub mod runs;
pub mod settings;
pub mod stats;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use embertrack_core::cloud::CloudHandle;
use embertrack_core::collector::CollectorHandle;
use embertrack_core::store::Store;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Shared state handed to every handler.
pub struct AppState {
    pub store: Arc<Store>,
    pub collector: CollectorHandle,
    pub cloud: CloudHandle,
    pub icon_cache_dir: PathBuf,
    pub http: reqwest::Client,
}

impl AppState {
    /// Active partition, or the empty sentinel while waiting for a player.
    /// Queries against the sentinel scope return empty sets.
    pub fn scope(&self) -> (String, i64) {
        self.collector
            .scope()
            .map(|s| (s.key, s.season_id))
            .unwrap_or_else(|| (String::from("unknown"), 0))
    }
}

/// Bind the loopback port and serve until shutdown. A bind failure means
/// another instance owns the port.
pub async fn serve(
    state: Arc<AppState>,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), String> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("cannot bind {addr} (already running?): {e}"))?;
    tracing::info!("[SERVER] listening on http://{addr}");

    loop {
        let (stream, remote) = tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!("[SERVER] accept failed: {e}");
                    continue;
                }
            },
        };

        let io = TokioIo::new(stream);
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let state = Arc::clone(&state);
                async move { http::route(state, req).await }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!("[SERVER] connection from {remote} ended: {e}");
            }
        });
    }

    tracing::info!("[SERVER] stopped");
    Ok(())
}
