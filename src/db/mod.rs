//! Database layer
//!
//! This module provides the durable storage tier for the Aula session
//! service. It supports:
//! - SQLite (default, for single-binary deployment)
//! - MySQL (for larger deployments)
//!
//! The database driver is selected based on configuration.
//!
//! # Architecture
//!
//! A trait-based abstraction (`DatabasePool`) lets repositories work
//! with either SQLite or MySQL without knowing the specific backend.
//! Sessions and credentials are always written here first; the cache
//! tier only ever mirrors rows that exist in this layer.
//!
//! # Usage
//!
//! ```ignore
//! use aula::config::DatabaseConfig;
//! use aula::db::{create_pool, DatabasePool, migrations};
//!
//! let config = DatabaseConfig::default();
//! let pool = create_pool(&config).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};
