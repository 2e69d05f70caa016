mod schema;

pub use schema::Database;

use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// User account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID.
    pub id: String,
    /// Username for login.
    pub username: String,
    /// Argon2 password hash.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Display name.
    pub display_name: Option<String>,
    /// User role: "admin", "librarian" or "user".
    pub role: String,
    /// Account creation timestamp.
    pub created_at: i64,
    /// Last login timestamp.
    pub last_login: Option<i64>,
}

impl User {
    /// Name shown in page headers and loan lists.
    pub fn shown_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

/// Authentication session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session token.
    pub token: String,
    /// User ID.
    pub user_id: String,
    /// Expiration timestamp.
    pub expires_at: i64,
}

/// A person who wrote books in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    /// Row ID.
    pub id: i64,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Date of birth.
    pub date_of_birth: Option<NaiveDate>,
    /// Date of death, if any.
    pub date_of_death: Option<NaiveDate>,
}

impl Author {
    /// "Last, First", the catalog's canonical author label.
    pub fn display_name(&self) -> String {
        format!("{}, {}", self.last_name, self.first_name)
    }

    /// "(born - died)" suffix; empty when no dates are known.
    pub fn lifespan(&self) -> String {
        let fmt = |d: Option<NaiveDate>| d.map(|d| d.format("%b. %-d, %Y").to_string());
        match (fmt(self.date_of_birth), fmt(self.date_of_death)) {
            (None, None) => String::new(),
            (born, died) => format!(
                "({} - {})",
                born.unwrap_or_default(),
                died.unwrap_or_default()
            ),
        }
    }
}

/// Editable author fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthorDraft {
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Date of birth.
    pub date_of_birth: Option<NaiveDate>,
    /// Date of death.
    pub date_of_death: Option<NaiveDate>,
}

/// Book genre.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    /// Row ID.
    pub id: i64,
    /// Genre name.
    pub name: String,
}

/// Book title record (not a physical copy).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    /// Row ID.
    pub id: i64,
    /// Title.
    pub title: String,
    /// Author ID, empty once the author is deleted.
    pub author_id: Option<i64>,
    /// Author "Last, First", joined for display.
    pub author_name: Option<String>,
    /// Short description.
    pub summary: String,
    /// 13 character ISBN.
    pub isbn: String,
}

/// Editable book fields.
///
/// `genre_ids` is `None` when the submitting view does not edit genres,
/// in which case existing associations are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookDraft {
    /// Title.
    pub title: String,
    /// Author ID.
    pub author_id: Option<i64>,
    /// Summary.
    pub summary: String,
    /// ISBN.
    pub isbn: String,
    /// Genre IDs to associate.
    pub genre_ids: Option<Vec<i64>>,
}

/// Availability of a physical copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoanStatus {
    /// Being repaired or processed.
    Maintenance,
    /// Lent to a borrower.
    OnLoan,
    /// On the shelf.
    Available,
    /// Held for someone.
    Reserved,
}

impl LoanStatus {
    /// All statuses in display order.
    pub const ALL: [LoanStatus; 4] = [
        LoanStatus::Maintenance,
        LoanStatus::OnLoan,
        LoanStatus::Available,
        LoanStatus::Reserved,
    ];

    /// Single character code stored in the database.
    pub fn code(&self) -> &'static str {
        match self {
            LoanStatus::Maintenance => "m",
            LoanStatus::OnLoan => "o",
            LoanStatus::Available => "a",
            LoanStatus::Reserved => "r",
        }
    }

    /// Parse a stored status code.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// Human readable label.
    pub fn label(&self) -> &'static str {
        match self {
            LoanStatus::Maintenance => "Maintenance",
            LoanStatus::OnLoan => "On loan",
            LoanStatus::Available => "Available",
            LoanStatus::Reserved => "Reserved",
        }
    }
}

/// A physical copy of a book.
#[derive(Debug, Clone, PartialEq)]
pub struct BookInstance {
    /// UUID.
    pub id: String,
    /// Book this is a copy of.
    pub book_id: i64,
    /// Book title, joined for display.
    pub book_title: String,
    /// Publisher / edition.
    pub imprint: String,
    /// Date the copy is due back, while on loan.
    pub due_back: Option<NaiveDate>,
    /// Current status.
    pub status: LoanStatus,
    /// Borrower user ID, only while on loan.
    pub borrower_id: Option<String>,
    /// Borrower username, joined for display.
    pub borrower_name: Option<String>,
}

impl BookInstance {
    /// Whether the copy should have been returned before `today`.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        matches!(self.due_back, Some(due) if due < today)
    }
}

/// Aggregate counts for the home page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogCounts {
    /// Book titles.
    pub books: i64,
    /// Physical copies.
    pub instances: i64,
    /// Copies with status available.
    pub instances_available: i64,
    /// Authors.
    pub authors: i64,
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Current calendar date used for due dates and renewals.
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// `date` plus `days` calendar days.
pub fn days_after(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_add_days(Days::new(days)).unwrap_or(NaiveDate::MAX)
}
