use std::sync::Arc;

use crate::auth::IdentityProvider;
use crate::engine::{Engine, EngineConfig};
use crate::store::{MessageStore, SqliteStore};
use crate::ws::{Heartbeat, WsTransport};

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Presence and fan-out engine
    pub engine: Arc<Engine>,
    /// Message history, for reads outside the dispatch path
    pub store: Arc<dyn MessageStore>,
    /// Outbound queues of the live WebSocket connections
    pub transport: Arc<WsTransport>,
    /// Bearer token validation
    pub identity: Arc<dyn IdentityProvider>,
    /// Ping cadence for WebSocket connections
    pub heartbeat: Heartbeat,
}

impl AppState {
    /// Composition root: wire the engine to SQLite and the WebSocket transport.
    pub fn new(
        config: EngineConfig,
        store: SqliteStore,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let store = Arc::new(store);
        let transport = Arc::new(WsTransport::new());
        let engine = Arc::new(Engine::new(
            config,
            store.clone(),
            store.clone(),
            transport.clone(),
        ));

        Self {
            engine,
            store,
            transport,
            identity,
            heartbeat: Heartbeat::default(),
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = heartbeat;
        self
    }
}
