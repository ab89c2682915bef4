use crate::config::ServerConfig;
use crate::http::{AppState, HttpServer, router};
use crate::registry::StoreRegistry;
use std::sync::Arc;

/// Ties configuration, shared state and the HTTP surface together.
pub struct Engine {
    config: ServerConfig,
}

impl Engine {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self) -> std::io::Result<()> {
        let state = AppState {
            config: Arc::new(self.config.clone()),
            registry: Arc::new(StoreRegistry::new()),
        };
        let server = HttpServer::new(
            self.config.addr(),
            self.config.port_file.clone(),
            router(state),
        );
        server.start().await
    }
}
