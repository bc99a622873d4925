//! HTTP surface: the in-process gate, the header contract and the standalone service.

pub mod middleware;
pub mod response;
mod server;

pub use middleware::{guard, AuthenticatedSubject, Gate};
pub use response::{ErrorBody, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET};
pub use server::{HttpServer, X_AUTHENTICATED_SUBJECT};
