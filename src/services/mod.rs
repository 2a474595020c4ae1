//! Services layer - Business logic
//!
//! This module contains the business logic for the authentication
//! service. Services are responsible for:
//! - Implementing the credential and session lifecycle rules
//! - Coordinating between repositories and cache
//! - Handling validation and error cases

pub mod account;
pub mod claims;
pub mod error;
pub mod id_cipher;
pub mod password;
pub mod rate_limiter;
pub mod session;
pub mod session_store;
pub mod token;

pub use account::{AccountService, LogMailer, Mailer, RecoveryLimits};
pub use claims::{AccessClaims, ClaimsCodec};
pub use error::AuthError;
pub use id_cipher::IdCipher;
pub use password::{hash_password, verify_password};
pub use rate_limiter::{RateDecision, RateLimiter};
pub use session::{AuthTokens, LoginOutcome, SessionService};
pub use session_store::SessionStore;
pub use token::{generate_secret, make_refresh_token, parse_refresh_token, ParsedRefreshToken};
