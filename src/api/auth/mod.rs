//! Bearer-token authentication for the HTTP surface
//!
//! The ticket endpoint is the only route that requires a bearer token; the
//! WebSocket upgrade authenticates with the ticket it returns.

mod extractor;
mod jwt;

pub use extractor::AuthUser;
pub use jwt::{AuthError, Claims, IdentityProvider, JwtAuth, MIN_SECRET_LEN};
