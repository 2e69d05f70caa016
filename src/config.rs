use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Library catalog server with loans and renewals.
#[derive(Parser, Debug, Clone)]
#[command(name = "locallibrary")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "LOCALLIBRARY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the server (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// User management commands.
    User {
        /// User subcommand action.
        #[command(subcommand)]
        action: UserCommand,
    },

    /// Genre management commands.
    Genre {
        /// Genre subcommand action.
        #[command(subcommand)]
        action: GenreCommand,
    },

    /// Physical copy (book instance) commands.
    Copy {
        /// Copy subcommand action.
        #[command(subcommand)]
        action: CopyCommand,
    },

    /// Initialize database and create default config.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// User management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum UserCommand {
    /// Add a new user.
    Add {
        /// Username.
        username: String,
        /// Password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
        /// User role (admin, librarian or user).
        #[arg(short, long, default_value = "user")]
        role: String,
    },

    /// Delete a user.
    Del {
        /// Username to delete.
        username: String,
    },

    /// List all users.
    List,

    /// Change user password.
    Passwd {
        /// Username.
        username: String,
        /// New password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Grant a permission, e.g. `catalog.can_mark_returned`.
    Grant {
        /// Username.
        username: String,
        /// Permission codename.
        permission: String,
    },

    /// Revoke a previously granted permission.
    Revoke {
        /// Username.
        username: String,
        /// Permission codename.
        permission: String,
    },
}

/// Genre subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum GenreCommand {
    /// Add a genre.
    Add {
        /// Genre name, e.g. "Science Fiction".
        name: String,
    },

    /// List genres.
    List,
}

/// Book instance subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum CopyCommand {
    /// Register a new physical copy of a book.
    Add {
        /// Book ID.
        book_id: i64,
        /// Imprint (publisher, edition, year).
        #[arg(short, long, default_value = "")]
        imprint: String,
        /// Initial status code: m, o, a or r.
        #[arg(short, long, default_value = "m")]
        status: String,
    },

    /// Lend a copy to a user.
    Lend {
        /// Copy ID.
        copy_id: String,
        /// Borrower username.
        username: String,
        /// Due date (YYYY-MM-DD), defaults to three weeks from today.
        #[arg(short, long)]
        due: Option<chrono::NaiveDate>,
    },

    /// Mark a copy as returned.
    Return {
        /// Copy ID.
        copy_id: String,
    },

    /// List copies of a book.
    List {
        /// Book ID.
        book_id: i64,
    },
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Site title shown in every page header.
    #[serde(default = "default_title")]
    pub title: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            title: default_title(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        8080,
    )
}

fn default_title() -> String {
    "Local Library".to_string()
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/catalog.db")
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Session token duration in days.
    #[serde(default = "default_session_days")]
    pub session_days: u32,

    /// Mark the session cookie `Secure` (serve behind HTTPS).
    #[serde(default)]
    pub cookie_secure: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_days: default_session_days(),
            cookie_secure: false,
        }
    }
}

fn default_session_days() -> u32 {
    14
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("locallibrary.toml"),
            dirs::config_dir()
                .map(|p| p.join("locallibrary").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/locallibrary/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# locallibrary configuration

[server]
bind = "0.0.0.0:8080"
title = "Local Library"

[database]
# path = "/var/lib/locallibrary/catalog.db"

[auth]
# Session duration in days
session_days = 14
# Set when served over HTTPS
cookie_secure = false
"#
        .to_string()
    }
}
