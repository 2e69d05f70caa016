use crate::db::*;
use crate::error::{AppError, Result};
use parking_lot::Mutex;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl ToSql for LoanStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for LoanStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        LoanStatus::from_code(value.as_str()?).ok_or(FromSqlError::InvalidType)
    }
}

const INSTANCE_COLUMNS: &str = "i.id, i.book_id, b.title, i.imprint, i.due_back, i.status,
     i.borrower_id, u.username";

const INSTANCE_JOINS: &str = "FROM book_instances i
     JOIN books b ON b.id = i.book_id
     LEFT JOIN users u ON u.id = i.borrower_id";

const BOOK_COLUMNS: &str = "b.id, b.title, b.author_id,
     CASE WHEN a.id IS NULL THEN NULL ELSE a.last_name || ', ' || a.first_name END,
     b.summary, b.isbn";

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Users table
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                display_name TEXT,
                role TEXT NOT NULL DEFAULT 'user',
                created_at INTEGER NOT NULL,
                last_login INTEGER
            );

            -- Sessions table
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Per-user permission grants
            CREATE TABLE IF NOT EXISTS user_permissions (
                user_id TEXT NOT NULL,
                codename TEXT NOT NULL,
                PRIMARY KEY (user_id, codename),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Authors table
            CREATE TABLE IF NOT EXISTS authors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                date_of_birth TEXT,
                date_of_death TEXT
            );

            -- Genres table
            CREATE TABLE IF NOT EXISTS genres (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT UNIQUE NOT NULL
            );

            -- Books table (titles, not copies)
            CREATE TABLE IF NOT EXISTS books (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                author_id INTEGER,
                summary TEXT NOT NULL,
                isbn TEXT UNIQUE NOT NULL,
                FOREIGN KEY (author_id) REFERENCES authors(id) ON DELETE SET NULL
            );

            -- Book/genre associations
            CREATE TABLE IF NOT EXISTS book_genres (
                book_id INTEGER NOT NULL,
                genre_id INTEGER NOT NULL,
                PRIMARY KEY (book_id, genre_id),
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE,
                FOREIGN KEY (genre_id) REFERENCES genres(id) ON DELETE CASCADE
            );

            -- Physical copies
            CREATE TABLE IF NOT EXISTS book_instances (
                id TEXT PRIMARY KEY,
                book_id INTEGER NOT NULL,
                imprint TEXT NOT NULL DEFAULT '',
                due_back TEXT,
                status TEXT NOT NULL DEFAULT 'm' CHECK (status IN ('m', 'o', 'a', 'r')),
                borrower_id TEXT,
                CHECK (borrower_id IS NULL OR status = 'o'),
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE RESTRICT,
                FOREIGN KEY (borrower_id) REFERENCES users(id) ON DELETE SET NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_books_author ON books(author_id);
            CREATE INDEX IF NOT EXISTS idx_instances_book ON book_instances(book_id);
            CREATE INDEX IF NOT EXISTS idx_instances_borrower ON book_instances(borrower_id, status);
            CREATE INDEX IF NOT EXISTS idx_instances_due ON book_instances(status, due_back);
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // ========== USER OPERATIONS ==========

    /// Create a new user.
    pub fn create_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (id, username, password_hash, display_name, role, created_at, last_login)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.id,
                user.username,
                user.password_hash,
                user.display_name,
                user.role,
                user.created_at,
                user.last_login,
            ],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                AppError::InvalidFormat(format!("Username '{}' already exists", user.username))
            } else {
                AppError::Internal(format!("Failed to create user: {}", e))
            }
        })?;
        Ok(())
    }

    fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            password_hash: row.get(2)?,
            display_name: row.get(3)?,
            role: row.get(4)?,
            created_at: row.get(5)?,
            last_login: row.get(6)?,
        })
    }

    /// Get user by username.
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, username, password_hash, display_name, role, created_at, last_login
             FROM users WHERE username = ?1",
            params![username],
            Self::row_to_user,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get user: {}", e)))
    }

    /// Get user by ID.
    pub fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, username, password_hash, display_name, role, created_at, last_login
             FROM users WHERE id = ?1",
            params![id],
            Self::row_to_user,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get user: {}", e)))
    }

    /// Update user's last login time.
    pub fn update_user_last_login(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET last_login = ?1 WHERE id = ?2",
            params![now_timestamp(), id],
        )
        .map_err(|e| AppError::Internal(format!("Failed to update last login: {}", e)))?;
        Ok(())
    }

    /// Update user password.
    pub fn update_user_password(&self, username: &str, password_hash: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE users SET password_hash = ?1 WHERE username = ?2",
                params![password_hash, username],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update password: {}", e)))?;
        Ok(rows > 0)
    }

    /// Delete user. Borrowed copies keep their status but lose the borrower.
    pub fn delete_user(&self, username: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM users WHERE username = ?1", params![username])
            .map_err(|e| AppError::Internal(format!("Failed to delete user: {}", e)))?;
        Ok(rows > 0)
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, username, password_hash, display_name, role, created_at, last_login
                 FROM users ORDER BY username",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let users = stmt
            .query_map([], Self::row_to_user)
            .map_err(|e| AppError::Internal(format!("Failed to list users: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect users: {}", e)))?;

        Ok(users)
    }

    // ========== SESSION OPERATIONS ==========

    /// Create a session.
    pub fn create_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
            params![session.token, session.user_id, session.expires_at],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create session: {}", e)))?;
        Ok(())
    }

    /// Get session by token.
    pub fn get_session(&self, token: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT token, user_id, expires_at FROM sessions WHERE token = ?1",
            params![token],
            |row| {
                Ok(Session {
                    token: row.get(0)?,
                    user_id: row.get(1)?,
                    expires_at: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get session: {}", e)))
    }

    /// Delete session.
    pub fn delete_session(&self, token: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .map_err(|e| AppError::Internal(format!("Failed to delete session: {}", e)))?;
        Ok(())
    }

    /// Delete expired sessions, returning how many were removed.
    pub fn cleanup_expired_sessions(&self) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM sessions WHERE expires_at < ?1",
            params![now_timestamp()],
        )
        .map_err(|e| AppError::Internal(format!("Failed to cleanup sessions: {}", e)))
    }

    // ========== PERMISSION OPERATIONS ==========

    /// Grant a permission codename to a user.
    pub fn grant_permission(&self, user_id: &str, codename: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO user_permissions (user_id, codename) VALUES (?1, ?2)",
            params![user_id, codename],
        )
        .map_err(|e| AppError::Internal(format!("Failed to grant permission: {}", e)))?;
        Ok(())
    }

    /// Revoke a permission codename.
    pub fn revoke_permission(&self, user_id: &str, codename: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM user_permissions WHERE user_id = ?1 AND codename = ?2",
                params![user_id, codename],
            )
            .map_err(|e| AppError::Internal(format!("Failed to revoke permission: {}", e)))?;
        Ok(rows > 0)
    }

    /// Whether the user was granted the permission directly.
    pub fn user_has_permission(&self, user_id: &str, codename: &str) -> Result<bool> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM user_permissions WHERE user_id = ?1 AND codename = ?2)",
            params![user_id, codename],
            |row| row.get(0),
        )
        .map_err(|e| AppError::Internal(format!("Failed to check permission: {}", e)))
    }

    /// Permission codenames granted directly to a user.
    pub fn list_user_permissions(&self, user_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT codename FROM user_permissions WHERE user_id = ?1 ORDER BY codename")
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let codenames = stmt
            .query_map(params![user_id], |row| row.get(0))
            .map_err(|e| AppError::Internal(format!("Failed to list permissions: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect permissions: {}", e)))?;

        Ok(codenames)
    }

    // ========== AUTHOR OPERATIONS ==========

    fn row_to_author(row: &rusqlite::Row<'_>) -> rusqlite::Result<Author> {
        Ok(Author {
            id: row.get(0)?,
            first_name: row.get(1)?,
            last_name: row.get(2)?,
            date_of_birth: row.get(3)?,
            date_of_death: row.get(4)?,
        })
    }

    /// Create an author, returning the new ID.
    pub fn create_author(&self, draft: &AuthorDraft) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO authors (first_name, last_name, date_of_birth, date_of_death)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                draft.first_name,
                draft.last_name,
                draft.date_of_birth,
                draft.date_of_death,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create author: {}", e)))?;
        Ok(conn.last_insert_rowid())
    }

    /// Get author by ID.
    pub fn get_author(&self, id: i64) -> Result<Option<Author>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, first_name, last_name, date_of_birth, date_of_death
             FROM authors WHERE id = ?1",
            params![id],
            Self::row_to_author,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get author: {}", e)))
    }

    /// Overwrite an author's fields.
    pub fn update_author(&self, id: i64, draft: &AuthorDraft) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE authors
                 SET first_name = ?1, last_name = ?2, date_of_birth = ?3, date_of_death = ?4
                 WHERE id = ?5",
                params![
                    draft.first_name,
                    draft.last_name,
                    draft.date_of_birth,
                    draft.date_of_death,
                    id,
                ],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update author: {}", e)))?;
        Ok(rows > 0)
    }

    /// Delete an author. Their books stay, without an author.
    pub fn delete_author(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM authors WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete author: {}", e)))?;
        Ok(rows > 0)
    }

    /// Count authors.
    pub fn count_authors(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM authors", [])
    }

    /// One page of authors ordered by last then first name.
    pub fn list_authors(&self, offset: i64, limit: i64) -> Result<Vec<Author>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, first_name, last_name, date_of_birth, date_of_death
                 FROM authors ORDER BY last_name, first_name, id
                 LIMIT ?1 OFFSET ?2",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let authors = stmt
            .query_map(params![limit, offset], Self::row_to_author)
            .map_err(|e| AppError::Internal(format!("Failed to list authors: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect authors: {}", e)))?;

        Ok(authors)
    }

    /// Every author, for choice lists.
    pub fn all_authors(&self) -> Result<Vec<Author>> {
        self.list_authors(0, -1)
    }

    // ========== GENRE OPERATIONS ==========

    /// Create a genre, returning the new ID.
    pub fn create_genre(&self, name: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute("INSERT INTO genres (name) VALUES (?1)", params![name])
            .map_err(|e| {
                if e.to_string().contains("UNIQUE constraint") {
                    AppError::InvalidFormat(format!("Genre '{}' already exists", name))
                } else {
                    AppError::Internal(format!("Failed to create genre: {}", e))
                }
            })?;
        Ok(conn.last_insert_rowid())
    }

    /// All genres by name.
    pub fn list_genres(&self) -> Result<Vec<Genre>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id, name FROM genres ORDER BY name")
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let genres = stmt
            .query_map([], |row| {
                Ok(Genre {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .map_err(|e| AppError::Internal(format!("Failed to list genres: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect genres: {}", e)))?;

        Ok(genres)
    }

    /// Genres of one book.
    pub fn book_genres(&self, book_id: i64) -> Result<Vec<Genre>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT g.id, g.name FROM genres g
                 JOIN book_genres bg ON bg.genre_id = g.id
                 WHERE bg.book_id = ?1 ORDER BY g.name",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let genres = stmt
            .query_map(params![book_id], |row| {
                Ok(Genre {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .map_err(|e| AppError::Internal(format!("Failed to get book genres: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect genres: {}", e)))?;

        Ok(genres)
    }

    // ========== BOOK OPERATIONS ==========

    fn row_to_book(row: &rusqlite::Row<'_>) -> rusqlite::Result<Book> {
        Ok(Book {
            id: row.get(0)?,
            title: row.get(1)?,
            author_id: row.get(2)?,
            author_name: row.get(3)?,
            summary: row.get(4)?,
            isbn: row.get(5)?,
        })
    }

    fn map_book_write_error(e: rusqlite::Error, isbn: &str) -> AppError {
        let message = e.to_string();
        if message.contains("UNIQUE constraint") && message.contains("isbn") {
            AppError::Conflict(format!("Book with ISBN '{}' already exists", isbn))
        } else if message.contains("FOREIGN KEY constraint") {
            AppError::InvalidFormat("Unknown author or genre".to_string())
        } else {
            AppError::Internal(format!("Failed to save book: {}", e))
        }
    }

    /// Create a book and its genre links in one transaction.
    pub fn create_book(&self, draft: &BookDraft) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Internal(format!("Failed to begin transaction: {}", e)))?;

        tx.execute(
            "INSERT INTO books (title, author_id, summary, isbn) VALUES (?1, ?2, ?3, ?4)",
            params![draft.title, draft.author_id, draft.summary, draft.isbn],
        )
        .map_err(|e| Self::map_book_write_error(e, &draft.isbn))?;
        let id = tx.last_insert_rowid();

        if let Some(genre_ids) = &draft.genre_ids {
            for genre_id in genre_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO book_genres (book_id, genre_id) VALUES (?1, ?2)",
                    params![id, genre_id],
                )
                .map_err(|e| Self::map_book_write_error(e, &draft.isbn))?;
            }
        }

        tx.commit()
            .map_err(|e| AppError::Internal(format!("Failed to commit book: {}", e)))?;
        Ok(id)
    }

    /// Overwrite a book's fields; replaces genres when the draft carries them.
    pub fn update_book(&self, id: i64, draft: &BookDraft) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Internal(format!("Failed to begin transaction: {}", e)))?;

        let rows = tx
            .execute(
                "UPDATE books SET title = ?1, author_id = ?2, summary = ?3, isbn = ?4 WHERE id = ?5",
                params![draft.title, draft.author_id, draft.summary, draft.isbn, id],
            )
            .map_err(|e| Self::map_book_write_error(e, &draft.isbn))?;
        if rows == 0 {
            return Ok(false);
        }

        if let Some(genre_ids) = &draft.genre_ids {
            tx.execute("DELETE FROM book_genres WHERE book_id = ?1", params![id])
                .map_err(|e| AppError::Internal(format!("Failed to clear genres: {}", e)))?;
            for genre_id in genre_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO book_genres (book_id, genre_id) VALUES (?1, ?2)",
                    params![id, genre_id],
                )
                .map_err(|e| Self::map_book_write_error(e, &draft.isbn))?;
            }
        }

        tx.commit()
            .map_err(|e| AppError::Internal(format!("Failed to commit book: {}", e)))?;
        Ok(true)
    }

    /// Get book by ID.
    pub fn get_book(&self, id: i64) -> Result<Option<Book>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {BOOK_COLUMNS} FROM books b
                 LEFT JOIN authors a ON a.id = b.author_id
                 WHERE b.id = ?1"
            ),
            params![id],
            Self::row_to_book,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get book: {}", e)))
    }

    /// Delete a book. Refused while physical copies of it exist.
    pub fn delete_book(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let copies: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM book_instances WHERE book_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .map_err(|e| AppError::Internal(format!("Failed to count copies: {}", e)))?;
        if copies > 0 {
            return Err(Self::copies_conflict(id, copies));
        }

        let rows = conn
            .execute("DELETE FROM books WHERE id = ?1", params![id])
            .map_err(|e| {
                if e.to_string().contains("FOREIGN KEY constraint") {
                    Self::copies_conflict(id, 1)
                } else {
                    AppError::Internal(format!("Failed to delete book: {}", e))
                }
            })?;
        Ok(rows > 0)
    }

    fn copies_conflict(id: i64, copies: i64) -> AppError {
        AppError::Conflict(format!(
            "Book {} still has {} cop{} in the catalog",
            id,
            copies,
            if copies == 1 { "y" } else { "ies" }
        ))
    }

    /// Count books.
    pub fn count_books(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM books", [])
    }

    /// One page of books ordered by title.
    pub fn list_books(&self, offset: i64, limit: i64) -> Result<Vec<Book>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {BOOK_COLUMNS} FROM books b
                 LEFT JOIN authors a ON a.id = b.author_id
                 ORDER BY b.title COLLATE NOCASE, b.id
                 LIMIT ?1 OFFSET ?2"
            ))
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let books = stmt
            .query_map(params![limit, offset], Self::row_to_book)
            .map_err(|e| AppError::Internal(format!("Failed to list books: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect books: {}", e)))?;

        Ok(books)
    }

    /// Books written by one author.
    pub fn author_books(&self, author_id: i64) -> Result<Vec<Book>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {BOOK_COLUMNS} FROM books b
                 LEFT JOIN authors a ON a.id = b.author_id
                 WHERE b.author_id = ?1
                 ORDER BY b.title COLLATE NOCASE, b.id"
            ))
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let books = stmt
            .query_map(params![author_id], Self::row_to_book)
            .map_err(|e| AppError::Internal(format!("Failed to get author books: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect books: {}", e)))?;

        Ok(books)
    }

    // ========== BOOK INSTANCE OPERATIONS ==========

    fn row_to_instance(row: &rusqlite::Row<'_>) -> rusqlite::Result<BookInstance> {
        Ok(BookInstance {
            id: row.get(0)?,
            book_id: row.get(1)?,
            book_title: row.get(2)?,
            imprint: row.get(3)?,
            due_back: row.get(4)?,
            status: row.get(5)?,
            borrower_id: row.get(6)?,
            borrower_name: row.get(7)?,
        })
    }

    fn query_instances(
        &self,
        filter: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<BookInstance>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {INSTANCE_COLUMNS} {INSTANCE_JOINS} {filter}"
            ))
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let instances = stmt
            .query_map(params, Self::row_to_instance)
            .map_err(|e| AppError::Internal(format!("Failed to list copies: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect copies: {}", e)))?;

        Ok(instances)
    }

    /// Register a new physical copy, returning its UUID.
    ///
    /// Copies are created without a borrower; use [`Database::lend_instance`]
    /// to put one on loan.
    pub fn create_instance(&self, book_id: i64, imprint: &str, status: LoanStatus) -> Result<String> {
        if status == LoanStatus::OnLoan {
            return Err(AppError::InvalidFormat(
                "A new copy cannot start on loan; lend it instead".to_string(),
            ));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO book_instances (id, book_id, imprint, status) VALUES (?1, ?2, ?3, ?4)",
            params![id, book_id, imprint, status],
        )
        .map_err(|e| {
            if e.to_string().contains("FOREIGN KEY constraint") {
                AppError::NotFound(format!("Book not found: {}", book_id))
            } else {
                AppError::Internal(format!("Failed to create copy: {}", e))
            }
        })?;
        Ok(id)
    }

    /// Get a copy by UUID.
    pub fn get_instance(&self, id: &str) -> Result<Option<BookInstance>> {
        Ok(self
            .query_instances("WHERE i.id = ?1", params![id])?
            .into_iter()
            .next())
    }

    /// All copies of a book.
    pub fn book_instances(&self, book_id: i64) -> Result<Vec<BookInstance>> {
        self.query_instances(
            "WHERE i.book_id = ?1 ORDER BY i.due_back, i.id",
            params![book_id],
        )
    }

    /// Count every copy.
    pub fn count_instances(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM book_instances", [])
    }

    /// Count copies with exactly this status.
    pub fn count_instances_with_status(&self, status: LoanStatus) -> Result<i64> {
        self.count(
            "SELECT COUNT(*) FROM book_instances WHERE status = ?1",
            params![status],
        )
    }

    /// Count copies on loan to one borrower.
    pub fn count_borrowed_by(&self, user_id: &str) -> Result<i64> {
        self.count(
            "SELECT COUNT(*) FROM book_instances WHERE borrower_id = ?1 AND status = 'o'",
            params![user_id],
        )
    }

    /// One page of copies on loan to `user_id`, soonest due first.
    pub fn list_borrowed_by(&self, user_id: &str, offset: i64, limit: i64) -> Result<Vec<BookInstance>> {
        self.query_instances(
            "WHERE i.borrower_id = ?1 AND i.status = 'o'
             ORDER BY i.due_back, i.id LIMIT ?2 OFFSET ?3",
            params![user_id, limit, offset],
        )
    }

    /// Count copies on loan to anyone.
    pub fn count_all_borrowed(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM book_instances WHERE status = 'o'", [])
    }

    /// One page of copies on loan to anyone, soonest due first.
    pub fn list_all_borrowed(&self, offset: i64, limit: i64) -> Result<Vec<BookInstance>> {
        self.query_instances(
            "WHERE i.status = 'o' ORDER BY i.due_back, i.id LIMIT ?1 OFFSET ?2",
            params![limit, offset],
        )
    }

    /// Set a new due date. Touches nothing else on the row.
    pub fn renew_instance(&self, id: &str, due_back: NaiveDate) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE book_instances SET due_back = ?1 WHERE id = ?2",
                params![due_back, id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to renew copy: {}", e)))?;
        Ok(rows > 0)
    }

    /// Put a copy on loan to a user until `due_back`.
    pub fn lend_instance(&self, id: &str, borrower_id: &str, due_back: NaiveDate) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE book_instances SET status = 'o', borrower_id = ?1, due_back = ?2
                 WHERE id = ?3 AND status != 'o'",
                params![borrower_id, due_back, id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to lend copy: {}", e)))?;
        Ok(rows > 0)
    }

    /// Return a copy to the shelf.
    pub fn return_instance(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE book_instances SET status = 'a', borrower_id = NULL, due_back = NULL
                 WHERE id = ?1",
                params![id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to return copy: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== AGGREGATES ==========

    /// Home page counts.
    pub fn catalog_counts(&self) -> Result<CatalogCounts> {
        Ok(CatalogCounts {
            books: self.count_books()?,
            instances: self.count_instances()?,
            instances_available: self.count_instances_with_status(LoanStatus::Available)?,
            authors: self.count_authors()?,
        })
    }

    fn count(&self, sql: &str, params: impl rusqlite::Params) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row(sql, params, |row| row.get(0))
            .map_err(|e| AppError::Internal(format!("Failed to count rows: {}", e)))
    }
}
