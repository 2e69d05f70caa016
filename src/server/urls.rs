//! Named routes.
//!
//! Route patterns used by the router, and builders for the concrete URLs
//! handlers redirect to and pages link to.

/// `index`
pub const INDEX: &str = "/";
/// `books`
pub const BOOKS: &str = "/books/";
/// `book-detail`
pub const BOOK_DETAIL: &str = "/books/{id}/";
/// `authors`
pub const AUTHORS: &str = "/authors/";
/// `author-detail`
pub const AUTHOR_DETAIL: &str = "/authors/{id}/";
/// `my-borrowed`
pub const MY_BORROWED: &str = "/mine/";
/// `all-borrowed`
pub const ALL_BORROWED: &str = "/all-borrowed/";
/// `renew-book-librarian`
pub const RENEW_BOOK: &str = "/book/{id}/renew/";
/// `author-create`
pub const AUTHOR_CREATE: &str = "/author/create/";
/// `author-update`
pub const AUTHOR_UPDATE: &str = "/author/{id}/update/";
/// `author-delete`
pub const AUTHOR_DELETE: &str = "/author/{id}/delete/";
/// `book-create`
pub const BOOK_CREATE: &str = "/book/create/";
/// `book-update`
pub const BOOK_UPDATE: &str = "/book/{id}/update/";
/// `book-delete`
pub const BOOK_DELETE: &str = "/book/{id}/delete/";
/// `login`
pub const LOGIN: &str = "/accounts/login/";
/// `logout`
pub const LOGOUT: &str = "/accounts/logout/";

fn with_id(pattern: &str, id: impl std::fmt::Display) -> String {
    pattern.replace("{id}", &id.to_string())
}

/// URL of one book.
pub fn book_detail(id: i64) -> String {
    with_id(BOOK_DETAIL, id)
}

/// URL of one author.
pub fn author_detail(id: i64) -> String {
    with_id(AUTHOR_DETAIL, id)
}

/// Renewal form of one copy.
pub fn renew_book(instance_id: &str) -> String {
    with_id(RENEW_BOOK, instance_id)
}

/// Author edit form.
pub fn author_update(id: i64) -> String {
    with_id(AUTHOR_UPDATE, id)
}

/// Author delete confirmation.
pub fn author_delete(id: i64) -> String {
    with_id(AUTHOR_DELETE, id)
}

/// Book edit form.
pub fn book_update(id: i64) -> String {
    with_id(BOOK_UPDATE, id)
}

/// Book delete confirmation.
pub fn book_delete(id: i64) -> String {
    with_id(BOOK_DELETE, id)
}

/// Login page that returns to `next` afterwards.
pub fn login_with_next(next: &str) -> String {
    format!("{}?next={}", LOGIN, urlencoding::encode(next))
}

/// `next` if it is a path on this site, else the home page.
pub fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(path) if path.starts_with('/') && !path.starts_with("//") && !path.contains('\\') => {
            path
        }
        _ => INDEX,
    }
}

/// `path` with `?page=n` set.
pub fn with_page(path: &str, page: usize) -> String {
    format!("{}?page={}", path, page)
}
