//! WebSocket application state

use std::sync::Arc;
use std::time::Duration;

use crate::api::auth::IdentityProvider;
use crate::config::Config;
use crate::store::ChatStore;

use super::dispatch::Dispatcher;
use super::registry::ConnectionRegistry;
use super::ticket::TicketBroker;

/// Per-connection transport settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub ping_interval: Duration,
    pub pong_wait: Duration,
    pub outbound_queue: usize,
    pub max_frame_bytes: usize,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            ping_interval: config.ping_interval(),
            pong_wait: config.pong_wait(),
            outbound_queue: config.outbound_queue,
            max_frame_bytes: config.max_frame_bytes,
        }
    }
}

/// Shared application state for the HTTP and WebSocket handlers
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub tickets: Arc<TicketBroker>,
    pub dispatcher: Arc<Dispatcher>,
    pub identity: Arc<dyn IdentityProvider>,
    pub session: SessionSettings,
}

impl AppState {
    pub fn new(config: &Config, store: Arc<dyn ChatStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(store, Arc::clone(&registry)));

        Self {
            registry,
            tickets: Arc::new(TicketBroker::new(config.ticket_retention())),
            dispatcher,
            identity,
            session: SessionSettings::from(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::auth::JwtAuth;
    use crate::store::{MemoryChangeFeed, MemoryStore};

    #[test]
    fn test_state_follows_config() {
        let config = Config {
            jwt_secret: "test-secret-key-that-is-at-least-32-characters-long".to_string(),
            outbound_queue: 8,
            ..Config::default()
        };
        let store = Arc::new(MemoryStore::new(MemoryChangeFeed::new(4)));
        let identity = Arc::new(JwtAuth::new(&config.jwt_secret).unwrap());
        let state = AppState::new(&config, store, identity);

        assert_eq!(state.session.outbound_queue, 8);
        assert_eq!(state.session.pong_wait, Duration::from_secs(30));
        assert_eq!(state.registry.session_count(), 0);
        assert!(state.tickets.is_empty());
    }
}
