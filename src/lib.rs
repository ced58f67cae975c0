//! Chat Gateway
//!
//! Real-time delivery core of a chat platform: authenticated clients hold
//! WebSocket connections, every inbound event is acknowledged exactly once,
//! and message-state changes written to the shared store are fanned out to
//! whichever connections of the affected user live on this instance.
//!
//! # Features
//!
//! - **Ticketed upgrade**: bearer token buys a one-time, 30 s upgrade ticket
//! - **Multi-device**: a user may hold any number of live sessions
//! - **Acknowledged events**: chat, delivered and read receipts, one ack each
//! - **Change-feed fanout**: multiple instances coordinate only via the store
//!
//! # Modules
//!
//! - `api`: HTTP routes, authentication and the WebSocket core
//! - `store`: storage and change-feed contracts plus in-memory implementations
//! - `types`: messages, conversations and receipts
//! - `config`: layered configuration
//! - `logging`: tracing subscriber setup
//! - `utils`: timestamps
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chat_gateway::{create_router, AppState, Config, JwtAuth, MemoryChangeFeed, MemoryStore};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let store = Arc::new(MemoryStore::new(MemoryChangeFeed::new(config.feed_capacity)));
//! let identity = Arc::new(JwtAuth::new(&config.jwt_secret)?);
//! let state = Arc::new(AppState::new(&config, store, identity));
//! let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
//! axum::serve(listener, create_router(state)).await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod logging;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used items at crate root
pub use api::auth::{AuthError, IdentityProvider, JwtAuth};
pub use api::http::create_router;
pub use api::websocket::{
    AppState, ConnectionRegistry, Dispatcher, Envelope, EventType, FanoutBridge, Session,
    TicketBroker,
};
pub use config::{Config, ConfigError};
pub use store::{ChangeFeed, ChatStore, MemoryChangeFeed, MemoryStore, StoreError};
pub use types::{Conversation, Message, NewMessage, PendingReceipt};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
