//! HTTP surface of the relay
//!
//! One WebSocket route per chat plus a version endpoint.

mod gateway;
mod handlers;
mod types;

pub use handlers::create_router;

use crate::config::RelayConfig;
use crate::db::Database;
use crate::runtime::{DatabaseStorage, HeaderIdentity, IdentityProvider, RelayServices};
use crate::upstream::WsForwarder;
use std::sync::Arc;
use std::time::Duration;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub services: RelayServices,
    pub identity: Arc<dyn IdentityProvider>,
    pub outbound_queue: usize,
    pub ping_interval: Duration,
}

impl AppState {
    pub fn new(config: &RelayConfig, db: Database) -> Self {
        let storage = Arc::new(DatabaseStorage::new(db));
        let upstream = Arc::new(WsForwarder::new(
            config.upstream_url.clone(),
            config.upstream_connect_timeout,
        ));
        Self {
            services: RelayServices::new(upstream, storage.clone(), storage),
            identity: Arc::new(HeaderIdentity::new(config.user_header.clone())),
            outbound_queue: config.outbound_queue,
            ping_interval: config.ping_interval,
        }
    }
}
