//! Aula - Session and credential lifecycle service
//!
//! This library provides the core functionality for the Aula
//! authentication service: credential login, rotating refresh tokens,
//! session revocation, and password recovery.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
