//! locallibrary: a small library catalog server.
//!
//! Books, authors, genres and physical copies live in SQLite. Readers see
//! the catalog and their own loans; librarians see every loan and renew
//! them. Pages are server-rendered HTML.
//!
//! # Features
//!
//! - Paginated book and author lists with detail pages
//! - Per-user and librarian-wide loan lists, soonest due first
//! - Loan renewal limited to four weeks ahead
//! - Author and book create, update and delete forms
//! - Session login with role and per-permission access control

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Authentication, sessions and permissions.
pub mod auth;
/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// Form binding and validation.
pub mod forms;
/// HTML rendering.
pub mod render;
/// HTTP server.
pub mod server;
/// Per-route view configuration and pagination.
pub mod views;

#[cfg(test)]
mod tests;

pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use server::AppState;
