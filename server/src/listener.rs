//! The TCP accept loop: one [`connection::handle`] task per accepted
//! socket, all sharing one [`Shared`] handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use kv::Store;

use crate::connection;
use crate::shared::Shared;

pub async fn serve<S: Store + Send + Sync + 'static>(addr: &str, shared: Arc<Shared<S>>, timeout: Duration) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr, "listening");
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        info!(%peer, "accepted connection");
        let shared = shared.clone();
        tokio::spawn(async move {
            connection::handle(socket, shared, timeout).await;
            debug_closed(peer);
        });
    }
}

fn debug_closed(peer: std::net::SocketAddr) {
    tracing::debug!(%peer, "connection closed");
}
