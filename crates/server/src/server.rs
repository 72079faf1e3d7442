use crate::context::RelayContext;
use crate::routes::{create_router, AppState};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// HTTP front of the relay.
pub struct RelayServer {
    addr: SocketAddr,
    context: Arc<RelayContext>,
    server_handle: Option<JoinHandle<()>>,
}

impl RelayServer {
    pub fn new(addr: SocketAddr, context: Arc<RelayContext>) -> Self {
        Self {
            addr,
            context,
            server_handle: None,
        }
    }

    /// Binds and serves in the background. Returns the bound address, which
    /// differs from the configured one when port 0 was requested.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("failed to bind relay on {}", self.addr))?;
        let bound = listener.local_addr()?;
        self.addr = bound;

        let app = create_router(AppState {
            context: self.context.clone(),
            port: bound.port(),
        });
        info!(addr = %bound, providers = ?self.context.provider_names(), "relay listening");

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("relay server error: {}", e);
            }
        });
        self.server_handle = Some(handle);
        Ok(bound)
    }

    pub async fn stop(&mut self) {
        if let Some(handle) = self.server_handle.take() {
            info!("stopping relay server");
            handle.abort();
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn context(&self) -> &Arc<RelayContext> {
        &self.context
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        if let Some(handle) = self.server_handle.take() {
            handle.abort();
        }
    }
}
