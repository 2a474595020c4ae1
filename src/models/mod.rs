//! Data models
//!
//! This module contains the data structures used throughout the Aula
//! session service:
//! - Database entities (User, Session)
//! - Input types for service operations

mod session;
mod user;

pub use session::Session;
pub use user::{CreateUserInput, User, UserRole, UserStatus};
