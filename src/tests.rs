use crate::auth::{AuthService, Permission};
use crate::config::Config;
use crate::db::{
    AuthorDraft, BookDraft, Database, LoanStatus, Session, User, days_after, now_timestamp,
};
use crate::error::AppError;
use chrono::NaiveDate;

fn test_db() -> Database {
    Database::open_memory().unwrap()
}

fn create_user(db: &Database, id: &str, username: &str) {
    let user = User {
        id: id.to_string(),
        username: username.to_string(),
        password_hash: "hash".to_string(),
        display_name: None,
        role: "user".to_string(),
        created_at: now_timestamp(),
        last_login: None,
    };
    db.create_user(&user).unwrap();
}

fn create_author(db: &Database, first: &str, last: &str) -> i64 {
    db.create_author(&AuthorDraft {
        first_name: first.to_string(),
        last_name: last.to_string(),
        date_of_birth: None,
        date_of_death: None,
    })
    .unwrap()
}

fn create_book(db: &Database, title: &str, isbn: &str, author_id: Option<i64>) -> i64 {
    db.create_book(&BookDraft {
        title: title.to_string(),
        author_id,
        summary: format!("About {}", title),
        isbn: isbn.to_string(),
        genre_ids: None,
    })
    .unwrap()
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

// ============================================================================
// USERS AND SESSIONS
// ============================================================================

#[test]
fn db_create_and_get_user() {
    let db = test_db();
    let user = User {
        id: "user-1".to_string(),
        username: "alice".to_string(),
        password_hash: "hash".to_string(),
        display_name: Some("Alice".to_string()),
        role: "user".to_string(),
        created_at: now_timestamp(),
        last_login: None,
    };

    db.create_user(&user).unwrap();

    let found = db.get_user_by_username("alice").unwrap().unwrap();
    assert_eq!(found.id, "user-1");
    assert_eq!(found.shown_name(), "Alice");

    let found_by_id = db.get_user_by_id("user-1").unwrap().unwrap();
    assert_eq!(found_by_id.username, "alice");
}

#[test]
fn db_duplicate_username_fails() {
    let db = test_db();
    create_user(&db, "user-1", "alice");
    let again = User {
        id: "user-2".to_string(),
        username: "alice".to_string(),
        password_hash: "hash2".to_string(),
        display_name: None,
        role: "user".to_string(),
        created_at: now_timestamp(),
        last_login: None,
    };
    assert!(db.create_user(&again).is_err());
}

#[test]
fn db_delete_user() {
    let db = test_db();
    create_user(&db, "user-1", "bob");
    assert!(db.delete_user("bob").unwrap());
    assert!(db.get_user_by_username("bob").unwrap().is_none());
    assert!(!db.delete_user("bob").unwrap());
}

#[test]
fn db_expired_sessions_cleanup() {
    let db = test_db();
    create_user(&db, "user-1", "testuser");

    let expired = Session {
        token: "expired".to_string(),
        user_id: "user-1".to_string(),
        expires_at: now_timestamp() - 3600,
    };
    let valid = Session {
        token: "valid".to_string(),
        user_id: "user-1".to_string(),
        expires_at: now_timestamp() + 3600,
    };

    db.create_session(&expired).unwrap();
    db.create_session(&valid).unwrap();

    assert_eq!(db.cleanup_expired_sessions().unwrap(), 1);

    assert!(db.get_session("expired").unwrap().is_none());
    assert!(db.get_session("valid").unwrap().is_some());
}

#[test]
fn db_permission_grants() {
    let db = test_db();
    create_user(&db, "user-1", "clerk");

    db.grant_permission("user-1", "catalog.add_book").unwrap();
    db.grant_permission("user-1", "catalog.add_book").unwrap();
    assert!(db.user_has_permission("user-1", "catalog.add_book").unwrap());
    assert!(!db.user_has_permission("user-1", "catalog.delete_book").unwrap());
    assert_eq!(
        db.list_user_permissions("user-1").unwrap(),
        vec!["catalog.add_book"]
    );

    assert!(db.revoke_permission("user-1", "catalog.add_book").unwrap());
    assert!(!db.revoke_permission("user-1", "catalog.add_book").unwrap());
    assert!(!db.user_has_permission("user-1", "catalog.add_book").unwrap());
}

// ============================================================================
// CATALOG
// ============================================================================

#[test]
fn db_authors_ordered_by_name() {
    let db = test_db();
    create_author(&db, "Ursula", "Le Guin");
    create_author(&db, "Iain", "Banks");
    create_author(&db, "Iain M.", "Banks");

    let names: Vec<String> = db
        .list_authors(0, 10)
        .unwrap()
        .iter()
        .map(|a| a.display_name())
        .collect();
    assert_eq!(names, vec!["Banks, Iain", "Banks, Iain M.", "Le Guin, Ursula"]);

    let second_page = db.list_authors(2, 2).unwrap();
    assert_eq!(second_page.len(), 1);
    assert_eq!(db.count_authors().unwrap(), 3);
}

#[test]
fn db_update_author() {
    let db = test_db();
    let id = create_author(&db, "Ursula", "Le Guin");

    let draft = AuthorDraft {
        first_name: "Ursula K.".to_string(),
        last_name: "Le Guin".to_string(),
        date_of_birth: Some(date("1929-10-21")),
        date_of_death: Some(date("2018-01-22")),
    };
    assert!(db.update_author(id, &draft).unwrap());
    assert!(!db.update_author(id + 1, &draft).unwrap());

    let author = db.get_author(id).unwrap().unwrap();
    assert_eq!(author.first_name, "Ursula K.");
    assert_eq!(author.date_of_death, Some(date("2018-01-22")));
    assert_eq!(author.lifespan(), "(Oct. 21, 1929 - Jan. 22, 2018)");
}

#[test]
fn db_delete_author_keeps_books() {
    let db = test_db();
    let author = create_author(&db, "Frank", "Herbert");
    let book = create_book(&db, "Dune", "9780441013593", Some(author));

    assert_eq!(db.author_books(author).unwrap().len(), 1);
    assert!(db.delete_author(author).unwrap());

    let kept = db.get_book(book).unwrap().unwrap();
    assert_eq!(kept.author_id, None);
    assert_eq!(kept.author_name, None);
}

#[test]
fn db_book_with_genres() {
    let db = test_db();
    let author = create_author(&db, "Frank", "Herbert");
    let sf = db.create_genre("Science Fiction").unwrap();
    let epic = db.create_genre("Epic").unwrap();

    let id = db
        .create_book(&BookDraft {
            title: "Dune".to_string(),
            author_id: Some(author),
            summary: "Spice.".to_string(),
            isbn: "9780441013593".to_string(),
            genre_ids: Some(vec![sf, epic]),
        })
        .unwrap();

    let book = db.get_book(id).unwrap().unwrap();
    assert_eq!(book.author_name.as_deref(), Some("Herbert, Frank"));
    assert_eq!(db.book_genres(id).unwrap().len(), 2);

    // An update without genres leaves them alone.
    let draft = BookDraft {
        title: "Dune".to_string(),
        author_id: Some(author),
        summary: "Arrakis.".to_string(),
        isbn: "9780441013593".to_string(),
        genre_ids: None,
    };
    assert!(db.update_book(id, &draft).unwrap());
    assert_eq!(db.book_genres(id).unwrap().len(), 2);

    let draft = BookDraft {
        genre_ids: Some(vec![epic]),
        ..draft
    };
    assert!(db.update_book(id, &draft).unwrap());
    let genres = db.book_genres(id).unwrap();
    assert_eq!(genres.len(), 1);
    assert_eq!(genres[0].name, "Epic");
}

#[test]
fn db_duplicate_isbn_and_genre_rejected() {
    let db = test_db();
    create_book(&db, "Dune", "9780441013593", None);

    let duplicate = db.create_book(&BookDraft {
        title: "Dune (again)".to_string(),
        author_id: None,
        summary: String::new(),
        isbn: "9780441013593".to_string(),
        genre_ids: None,
    });
    assert!(matches!(duplicate, Err(AppError::Conflict(_))));

    db.create_genre("Fantasy").unwrap();
    assert!(db.create_genre("Fantasy").is_err());
}

#[test]
fn db_books_ordered_by_title() {
    let db = test_db();
    create_book(&db, "b", "2", None);
    create_book(&db, "A", "1", None);
    create_book(&db, "C", "3", None);

    let titles: Vec<String> = db
        .list_books(0, 10)
        .unwrap()
        .into_iter()
        .map(|b| b.title)
        .collect();
    assert_eq!(titles, vec!["A", "b", "C"]);
}

// ============================================================================
// COPIES AND LOANS
// ============================================================================

#[test]
fn db_copy_lifecycle() {
    let db = test_db();
    create_user(&db, "user-1", "reader");
    let book = create_book(&db, "Dune", "9780441013593", None);

    let copy = db
        .create_instance(book, "Ace, 1990", LoanStatus::Available)
        .unwrap();
    assert_eq!(db.count_instances_with_status(LoanStatus::Available).unwrap(), 1);

    assert!(db.lend_instance(&copy, "user-1", date("2030-01-01")).unwrap());
    assert!(!db.lend_instance(&copy, "user-1", date("2030-02-01")).unwrap());

    let lent = db.get_instance(&copy).unwrap().unwrap();
    assert_eq!(lent.status, LoanStatus::OnLoan);
    assert_eq!(lent.borrower_name.as_deref(), Some("reader"));
    assert_eq!(lent.due_back, Some(date("2030-01-01")));

    assert!(db.return_instance(&copy).unwrap());
    let back = db.get_instance(&copy).unwrap().unwrap();
    assert_eq!(back.status, LoanStatus::Available);
    assert_eq!(back.borrower_id, None);
    assert_eq!(back.due_back, None);
}

#[test]
fn db_new_copy_cannot_start_on_loan() {
    let db = test_db();
    let book = create_book(&db, "Dune", "9780441013593", None);

    assert!(db.create_instance(book, "", LoanStatus::OnLoan).is_err());
    assert!(matches!(
        db.create_instance(book + 1, "", LoanStatus::Available),
        Err(AppError::NotFound(_))
    ));
}

#[test]
fn db_borrowed_lists_filter_and_order() {
    let db = test_db();
    create_user(&db, "user-1", "alice");
    create_user(&db, "user-2", "bob");
    let book = create_book(&db, "Dune", "9780441013593", None);

    let late = db.create_instance(book, "", LoanStatus::Available).unwrap();
    let soon = db.create_instance(book, "", LoanStatus::Available).unwrap();
    let bobs = db.create_instance(book, "", LoanStatus::Available).unwrap();
    db.create_instance(book, "", LoanStatus::Reserved).unwrap();

    db.lend_instance(&late, "user-1", date("2030-03-01")).unwrap();
    db.lend_instance(&soon, "user-1", date("2030-01-01")).unwrap();
    db.lend_instance(&bobs, "user-2", date("2030-02-01")).unwrap();

    let alice: Vec<String> = db
        .list_borrowed_by("user-1", 0, 10)
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(alice, vec![soon.clone(), late.clone()]);
    assert_eq!(db.count_borrowed_by("user-1").unwrap(), 2);

    let all: Vec<String> = db
        .list_all_borrowed(0, 10)
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(all, vec![soon, bobs, late]);
    assert_eq!(db.count_all_borrowed().unwrap(), 3);
}

#[test]
fn db_renew_touches_only_due_date() {
    let db = test_db();
    create_user(&db, "user-1", "alice");
    let book = create_book(&db, "Dune", "9780441013593", None);
    let copy = db.create_instance(book, "Ace", LoanStatus::Available).unwrap();
    db.lend_instance(&copy, "user-1", date("2030-01-01")).unwrap();

    assert!(db.renew_instance(&copy, date("2030-01-15")).unwrap());
    assert!(!db.renew_instance("missing", date("2030-01-15")).unwrap());

    let renewed = db.get_instance(&copy).unwrap().unwrap();
    assert_eq!(renewed.due_back, Some(date("2030-01-15")));
    assert_eq!(renewed.status, LoanStatus::OnLoan);
    assert_eq!(renewed.borrower_id.as_deref(), Some("user-1"));
    assert_eq!(renewed.imprint, "Ace");
}

#[test]
fn db_book_with_copies_cannot_be_deleted() {
    let db = test_db();
    let book = create_book(&db, "Dune", "9780441013593", None);
    let copy = db.create_instance(book, "", LoanStatus::Maintenance).unwrap();

    assert!(matches!(db.delete_book(book), Err(AppError::Conflict(_))));
    assert!(db.get_instance(&copy).unwrap().is_some());

    db.create_instance(book, "", LoanStatus::Available).unwrap();
    match db.delete_book(book) {
        Err(AppError::Conflict(message)) => assert!(message.contains("2 copies")),
        other => panic!("expected conflict, got {:?}", other),
    }
    assert!(db.get_book(book).unwrap().is_some());
    assert!(!db.delete_book(book + 1).unwrap());
}

#[test]
fn db_catalog_counts() {
    let db = test_db();
    create_author(&db, "Frank", "Herbert");
    let book = create_book(&db, "Dune", "9780441013593", None);
    db.create_instance(book, "", LoanStatus::Available).unwrap();
    db.create_instance(book, "", LoanStatus::Maintenance).unwrap();

    let counts = db.catalog_counts().unwrap();
    assert_eq!(counts.books, 1);
    assert_eq!(counts.instances, 2);
    assert_eq!(counts.instances_available, 1);
    assert_eq!(counts.authors, 1);
}

#[test]
fn overdue_is_strictly_before_today() {
    let db = test_db();
    create_user(&db, "user-1", "alice");
    let book = create_book(&db, "Dune", "9780441013593", None);
    let copy = db.create_instance(book, "", LoanStatus::Available).unwrap();
    db.lend_instance(&copy, "user-1", date("2024-05-01")).unwrap();

    let copy = db.get_instance(&copy).unwrap().unwrap();
    assert!(!copy.is_overdue(date("2024-05-01")));
    assert!(copy.is_overdue(date("2024-05-02")));
    assert_eq!(days_after(date("2024-05-01"), 28), date("2024-05-29"));
}

// ============================================================================
// AUTH
// ============================================================================

#[test]
fn auth_create_user_and_login() {
    let db = test_db();
    let auth = AuthService::new(db, 30);

    let user = auth.create_user("testuser", "password123", "user").unwrap();
    assert_eq!(user.username, "testuser");
    assert_eq!(user.role, "user");

    let (logged_in, token) = auth.login("testuser", "password123").unwrap();
    assert_eq!(logged_in.username, "testuser");
    assert!(!token.is_empty());
}

#[test]
fn auth_validate_token_and_logout() {
    let db = test_db();
    let auth = AuthService::new(db, 30);

    auth.create_user("alice", "pass1234", "admin").unwrap();
    let (_, token) = auth.login("alice", "pass1234").unwrap();

    let user = auth.validate_token(&token).unwrap().unwrap();
    assert_eq!(user.username, "alice");
    assert!(auth.validate_token("invalid_token").unwrap().is_none());

    auth.logout(&token).unwrap();
    assert!(auth.validate_token(&token).unwrap().is_none());
}

#[test]
fn auth_expired_session_is_absent() {
    let db = test_db();
    create_user(&db, "user-1", "alice");
    db.create_session(&Session {
        token: "stale".to_string(),
        user_id: "user-1".to_string(),
        expires_at: now_timestamp() - 1,
    })
    .unwrap();

    let auth = AuthService::new(db.clone(), 30);
    assert!(auth.validate_token("stale").unwrap().is_none());
    assert!(db.get_session("stale").unwrap().is_none());
}

#[test]
fn auth_invalid_credentials() {
    let db = test_db();
    let auth = AuthService::new(db, 30);

    auth.create_user("user", "correct", "user").unwrap();
    assert!(auth.login("user", "wrong").is_err());
    assert!(auth.login("nobody", "correct").is_err());
    assert!(auth.create_user("user@email", "password", "user").is_err());
    assert!(auth.create_user("user name", "password", "user").is_err());
    assert!(auth.create_user("", "password", "user").is_err());
    assert!(auth.create_user("short", "abc", "user").is_err());
    assert!(auth.create_user("boss", "password", "owner").is_err());
}

#[test]
fn auth_change_password() {
    let db = test_db();
    let auth = AuthService::new(db, 30);

    auth.create_user("user", "oldpass", "user").unwrap();
    auth.change_password("user", "newpass").unwrap();

    assert!(auth.login("user", "oldpass").is_err());
    assert!(auth.login("user", "newpass").is_ok());
}

#[test]
fn auth_permissions_by_role_and_grant() {
    let db = test_db();
    for (id, name, role) in [
        ("u-1", "root", "admin"),
        ("u-2", "ann", "librarian"),
        ("u-3", "reader", "user"),
    ] {
        db.create_user(&User {
            id: id.to_string(),
            username: name.to_string(),
            password_hash: "hash".to_string(),
            display_name: None,
            role: role.to_string(),
            created_at: now_timestamp(),
            last_login: None,
        })
        .unwrap();
    }
    let auth = AuthService::new(db.clone(), 30);
    let user = |name: &str| db.get_user_by_username(name).unwrap().unwrap();

    assert!(auth.is_admin(&user("root")));
    assert!(!auth.is_admin(&user("ann")));
    for permission in Permission::ALL {
        assert!(auth.has_permission(&user("root"), permission).unwrap());
        assert!(auth.has_permission(&user("ann"), permission).unwrap());
        assert!(!auth.has_permission(&user("reader"), permission).unwrap());
    }

    auth.grant("reader", Permission::CanMarkReturned).unwrap();
    assert!(
        auth.has_permission(&user("reader"), Permission::CanMarkReturned)
            .unwrap()
    );
    assert!(!auth.has_permission(&user("reader"), Permission::AddBook).unwrap());

    assert!(auth.revoke("reader", Permission::CanMarkReturned).unwrap());
    assert!(
        !auth
            .has_permission(&user("reader"), Permission::CanMarkReturned)
            .unwrap()
    );
    assert!(auth.grant("ghost", Permission::AddBook).is_err());
}

// ============================================================================
// CONFIG
// ============================================================================

#[test]
fn config_parse_toml() {
    let toml = r#"
[server]
bind = "127.0.0.1:9090"
title = "Test Library"

[database]
path = "/tmp/test.db"

[auth]
session_days = 7
cookie_secure = true
"#;
    let config: Config = toml::from_str(toml).unwrap();
    assert_eq!(config.server.bind.port(), 9090);
    assert_eq!(config.server.title, "Test Library");
    assert_eq!(config.database.path.to_str(), Some("/tmp/test.db"));
    assert_eq!(config.auth.session_days, 7);
    assert!(config.auth.cookie_secure);
}

#[test]
fn config_default_values() {
    let config = Config::default();
    assert_eq!(config.server.bind.port(), 8080);
    assert_eq!(config.server.title, "Local Library");
    assert_eq!(config.auth.session_days, 14);
    assert!(!config.auth.cookie_secure);

    let partial: Config = toml::from_str("[server]\ntitle = \"Branch\"\n").unwrap();
    assert_eq!(partial.server.bind.port(), 8080);
    assert_eq!(partial.server.title, "Branch");
}

#[test]
fn config_generated_default_parses() {
    let config: Config = toml::from_str(&Config::generate_default()).unwrap();
    assert_eq!(config.server.bind.port(), 8080);
    assert_eq!(config.auth.session_days, 14);
}

#[test]
fn config_and_database_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        format!(
            "[database]\npath = \"{}\"\n",
            dir.path().join("nested").join("catalog.db").display()
        ),
    )
    .unwrap();

    let config = Config::load(&config_path).unwrap();
    let db = Database::open(&config.database.path).unwrap();
    create_author(&db, "Frank", "Herbert");
    drop(db);

    let reopened = Database::open(&config.database.path).unwrap();
    assert_eq!(reopened.count_authors().unwrap(), 1);

    assert!(Config::load(&dir.path().join("missing.toml")).is_err());
}
