//! locallibrary server entry point.

use clap::Parser;
use locallibrary::{
    auth::{AuthService, Permission},
    config::{Cli, Command, Config, CopyCommand, GenreCommand, UserCommand},
    db::{self, Database, LoanStatus},
    forms::RenewBookForm,
    server,
};
use std::io::{self, Write};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    match cli.command {
        Some(Command::Init { force }) => cmd_init(force).await,
        Some(Command::User { action }) => cmd_user(action, &config).await,
        Some(Command::Genre { action }) => cmd_genre(action, &config).await,
        Some(Command::Copy { action }) => cmd_copy(action, &config).await,
        Some(Command::Serve { bind }) => cmd_serve(config, bind).await,
        None => cmd_serve(config, None).await,
    }
}

/// Initialize config and database.
async fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    let config = Config::default();
    let _db = Database::open(&config.database.path)?;
    println!("Initialized database: {}", config.database.path.display());

    println!("\nEdit config.toml to configure your server.");
    println!("Then run: locallibrary user add <username> --role librarian");
    println!("And: locallibrary serve");

    Ok(())
}

/// User management commands.
async fn cmd_user(action: UserCommand, config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;
    let auth = AuthService::new(db.clone(), config.auth.session_days);

    match action {
        UserCommand::Add {
            username,
            password,
            role,
        } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("Password: ")?,
            };

            let user = auth.create_user(&username, &password, &role)?;
            println!(
                "Created user: {} (role: {}, id: {})",
                user.username, user.role, user.id
            );
        }

        UserCommand::Del { username } => {
            if auth.delete_user(&username)? {
                println!("Deleted user: {}", username);
            } else {
                println!("User not found: {}", username);
            }
        }

        UserCommand::List => {
            let users = auth.list_users()?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!(
                    "{:<20} {:<10} {:<17} PERMISSIONS",
                    "USERNAME", "ROLE", "LAST LOGIN"
                );
                println!("{}", "-".repeat(80));
                for user in users {
                    let last_login = user
                        .last_login
                        .map(|ts| {
                            chrono::DateTime::from_timestamp(ts, 0)
                                .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                                .unwrap_or_else(|| "unknown".to_string())
                        })
                        .unwrap_or_else(|| "never".to_string());
                    let granted = db.list_user_permissions(&user.id)?;
                    let permissions = match user.role.as_str() {
                        "admin" | "librarian" => "(all)".to_string(),
                        _ if granted.is_empty() => "-".to_string(),
                        _ => granted.join(", "),
                    };
                    println!(
                        "{:<20} {:<10} {:<17} {}",
                        user.username, user.role, last_login, permissions
                    );
                }
            }
        }

        UserCommand::Passwd { username, password } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("New password: ")?,
            };

            if auth.change_password(&username, &password)? {
                println!("Password changed for: {}", username);
            } else {
                println!("User not found: {}", username);
            }
        }

        UserCommand::Grant {
            username,
            permission,
        } => {
            let permission: Permission = permission.parse()?;
            auth.grant(&username, permission)?;
            println!("Granted {} to {}", permission, username);
        }

        UserCommand::Revoke {
            username,
            permission,
        } => {
            let permission: Permission = permission.parse()?;
            if auth.revoke(&username, permission)? {
                println!("Revoked {} from {}", permission, username);
            } else {
                println!("{} did not hold {}", username, permission);
            }
        }
    }

    Ok(())
}

/// Genre commands.
async fn cmd_genre(action: GenreCommand, config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;

    match action {
        GenreCommand::Add { name } => {
            let id = db.create_genre(&name)?;
            println!("Added genre: {} (id: {})", name, id);
        }

        GenreCommand::List => {
            let genres = db.list_genres()?;
            if genres.is_empty() {
                println!("No genres found.");
            } else {
                println!("{:<6} NAME", "ID");
                println!("{}", "-".repeat(40));
                for genre in genres {
                    println!("{:<6} {}", genre.id, genre.name);
                }
            }
        }
    }

    Ok(())
}

/// Book instance commands.
async fn cmd_copy(action: CopyCommand, config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;

    match action {
        CopyCommand::Add {
            book_id,
            imprint,
            status,
        } => {
            let Some(status) = LoanStatus::from_code(&status) else {
                anyhow::bail!("Unknown status '{}', expected one of m, o, a, r", status);
            };
            let id = db.create_instance(book_id, &imprint, status)?;
            println!("Added copy: {} (status: {})", id, status.label());
        }

        CopyCommand::Lend {
            copy_id,
            username,
            due,
        } => {
            let Some(user) = db.get_user_by_username(&username)? else {
                anyhow::bail!("User not found: {}", username);
            };
            let due =
                due.unwrap_or_else(|| db::days_after(db::today(), RenewBookForm::PROPOSED_DAYS));
            if db.lend_instance(&copy_id, &user.id, due)? {
                println!("Lent {} to {} until {}", copy_id, username, due);
            } else {
                println!("Copy not found or already on loan: {}", copy_id);
            }
        }

        CopyCommand::Return { copy_id } => {
            if db.return_instance(&copy_id)? {
                println!("Returned: {}", copy_id);
            } else {
                println!("Copy not found: {}", copy_id);
            }
        }

        CopyCommand::List { book_id } => {
            let copies = db.book_instances(book_id)?;
            if copies.is_empty() {
                println!("No copies of book {}.", book_id);
            } else {
                println!(
                    "{:<36} {:<12} {:<10} {:<16} IMPRINT",
                    "ID", "STATUS", "DUE", "BORROWER"
                );
                println!("{}", "-".repeat(100));
                for copy in copies {
                    println!(
                        "{:<36} {:<12} {:<10} {:<16} {}",
                        copy.id,
                        copy.status.label(),
                        copy.due_back.map(|d| d.to_string()).unwrap_or_default(),
                        copy.borrower_name.unwrap_or_default(),
                        copy.imprint
                    );
                }
            }
        }
    }

    Ok(())
}

/// Start the server.
async fn cmd_serve(mut config: Config, bind: Option<std::net::SocketAddr>) -> anyhow::Result<()> {
    if let Some(addr) = bind {
        config.server.bind = addr;
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "locallibrary=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = Database::open(&config.database.path)?;
    let auth = AuthService::new(db.clone(), config.auth.session_days);

    tracing::info!(
        bind = %config.server.bind,
        database = %config.database.path.display(),
        "Starting locallibrary server"
    );

    let purged = db.cleanup_expired_sessions()?;
    if purged > 0 {
        tracing::info!(count = purged, "Removed expired sessions");
    }

    if auth.list_users()?.is_empty() {
        tracing::warn!(
            "No users configured. Add one with: locallibrary user add <username> --role librarian"
        );
    }

    let state = server::AppState::new_with_db(config.clone(), db, auth);
    let app = server::create_router(state);

    let listener = TcpListener::bind(config.server.bind).await?;
    tracing::info!(address = %config.server.bind, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Prompt for password input.
fn prompt_password(prompt: &str) -> anyhow::Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut password = String::new();
    io::stdin().read_line(&mut password)?;

    Ok(password.trim().to_string())
}
