//! Database repositories
//!
//! Repository pattern implementations for durable storage access.
//! Each repository handles the operations for a specific entity.

pub mod session;
pub mod user;

pub use session::{SessionRepository, SqlxSessionRepository};
pub use user::{SqlxUserRepository, UserRepository};
