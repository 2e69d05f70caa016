//! Application state shared across handlers.

use crate::auth::{AuthService, Permission};
use crate::config::Config;
use crate::db::{Database, User};
use crate::error::Result;
use crate::render::Nav;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Database connection.
    pub db: Database,
    /// Authentication service.
    pub auth: Arc<AuthService>,
}

impl AppState {
    /// Create new application state with database.
    pub fn new_with_db(config: Config, db: Database, auth: AuthService) -> Self {
        Self {
            config: Arc::new(config),
            db,
            auth: Arc::new(auth),
        }
    }

    /// Sidebar contents for the current user.
    pub fn nav(&self, user: Option<&User>) -> Result<Nav> {
        let mut nav = Nav {
            site_title: self.config.server.title.clone(),
            ..Nav::default()
        };

        if let Some(user) = user {
            nav.username = Some(user.shown_name().to_string());
            nav.librarian = self.auth.has_permission(user, Permission::CanMarkReturned)?;
            nav.can_add_author = self.auth.has_permission(user, Permission::AddAuthor)?;
            nav.can_add_book = self.auth.has_permission(user, Permission::AddBook)?;
        }

        Ok(nav)
    }

    /// Whether an optional user holds a permission.
    pub fn can(&self, user: Option<&User>, permission: Permission) -> Result<bool> {
        match user {
            Some(user) => self.auth.has_permission(user, permission),
            None => Ok(false),
        }
    }
}
