//! WebSocket delivery core
//!
//! Provides the ticketed upgrade endpoint and everything behind it.
//!
//! ## Components
//! - `ticket`: one-time upgrade tickets with a janitor task
//! - `session`: per-connection receive and send loops
//! - `registry`: user id to live sessions
//! - `dispatch` / `handlers`: inbound events, one ack each
//! - `fanout`: change-feed notifications pushed to live sessions

pub mod dispatch;
pub mod events;
pub mod fanout;
pub mod handler;
pub mod handlers;
pub mod registry;
pub mod session;
pub mod state;
pub mod ticket;

// Re-export commonly used items
pub use dispatch::{Dispatcher, EventHandler, HandlerError};
pub use events::{Acknowledge, Envelope, EventType};
pub use fanout::{FanoutBridge, FanoutError};
pub use registry::ConnectionRegistry;
pub use session::{Session, SessionError};
pub use state::{AppState, SessionSettings};
pub use ticket::TicketBroker;
