//! API module for HTTP and WebSocket endpoints
//!
//! Bearer-authenticated ticket issuance over HTTP, and the WebSocket channel
//! the ticket unlocks.

pub mod auth;
pub mod http;
pub mod websocket;
