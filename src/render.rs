//! Server-rendered HTML pages.
//!
//! Every page goes through [`layout`], which adds the sidebar built from a
//! [`Nav`]. Dynamic values are escaped with [`esc`] before they reach the
//! markup.

use crate::db::{Author, Book, BookInstance, CatalogCounts, Genre, LoanStatus};
use crate::forms::{Field, FieldKind, Form};
use crate::server::urls;
use crate::views::Page;
use axum::http::StatusCode;
use chrono::NaiveDate;
use quick_xml::escape::escape;
use std::borrow::Cow;
use std::fmt::Write;

const STYLE: &str = r#"
        body { font-family: system-ui, sans-serif; margin: 0; color: #333; }
        .wrap { display: flex; max-width: 960px; margin: 2rem auto; padding: 0 1rem; gap: 2rem; }
        nav { min-width: 180px; }
        nav ul { list-style: none; padding: 0; }
        nav li { margin: 0.4rem 0; }
        nav hr { border: none; border-top: 1px solid #ddd; }
        main { flex: 1; }
        a { color: #0066cc; }
        .overdue { color: #b00020; font-weight: bold; }
        .errorlist { color: #b00020; margin: 0.2rem 0; padding-left: 1rem; }
        .helptext { color: #777; font-size: 0.9rem; }
        .stats { background: #f5f5f5; padding: 1rem; border-radius: 8px; }
        .status-a { color: green; } .status-m { color: #b00020; } .status-o, .status-r { color: #c77c00; }
        form p { margin: 0.8rem 0; }
        label { display: block; font-weight: 600; }
        button.link { background: none; border: none; color: #0066cc; padding: 0; cursor: pointer; font: inherit; text-decoration: underline; }
"#;

/// Sidebar contents for the current viewer.
#[derive(Debug, Clone, Default)]
pub struct Nav {
    /// Site title from config.
    pub site_title: String,
    /// Name of the logged-in user.
    pub username: Option<String>,
    /// Holds `catalog.can_mark_returned`.
    pub librarian: bool,
    /// Holds `catalog.add_author`.
    pub can_add_author: bool,
    /// Holds `catalog.add_book`.
    pub can_add_book: bool,
}

/// Escape text for HTML element and attribute content.
pub fn esc(text: &str) -> Cow<'_, str> {
    escape(text)
}

fn date(d: Option<NaiveDate>) -> String {
    d.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default()
}

fn sidebar(nav: &Nav) -> String {
    let mut html = format!(
        r#"<ul>
            <li><a href="{index}">Home</a></li>
            <li><a href="{books}">All books</a></li>
            <li><a href="{authors}">All authors</a></li>
        </ul>"#,
        index = urls::INDEX,
        books = urls::BOOKS,
        authors = urls::AUTHORS,
    );

    match &nav.username {
        Some(name) => {
            let _ = write!(
                html,
                r#"<hr><ul>
            <li>User: {name}</li>
            <li><a href="{mine}">My Borrowed</a></li>
            <li><form method="post" action="{logout}"><button class="link" type="submit">Logout</button></form></li>
        </ul>"#,
                name = esc(name),
                mine = urls::MY_BORROWED,
                logout = urls::LOGOUT,
            );
        }
        None => {
            let _ = write!(
                html,
                r#"<hr><ul><li><a href="{}">Login</a></li></ul>"#,
                urls::LOGIN
            );
        }
    }

    if nav.librarian || nav.can_add_author || nav.can_add_book {
        html.push_str("<hr><ul><li>Staff</li>");
        if nav.librarian {
            let _ = write!(
                html,
                r#"<li><a href="{}">All borrowed</a></li>"#,
                urls::ALL_BORROWED
            );
        }
        if nav.can_add_author {
            let _ = write!(
                html,
                r#"<li><a href="{}">Create author</a></li>"#,
                urls::AUTHOR_CREATE
            );
        }
        if nav.can_add_book {
            let _ = write!(
                html,
                r#"<li><a href="{}">Create book</a></li>"#,
                urls::BOOK_CREATE
            );
        }
        html.push_str("</ul>");
    }

    html
}

/// Wrap `content` in the site layout.
pub fn layout(nav: &Nav, title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{title} | {site}</title>
    <style>{style}</style>
</head>
<body>
<div class="wrap">
    <nav>{sidebar}</nav>
    <main>
{content}
    </main>
</div>
</body>
</html>"#,
        title = esc(title),
        site = esc(&nav.site_title),
        style = STYLE,
        sidebar = sidebar(nav),
        content = content,
    )
}

fn pagination<T>(path: &str, page: &Page<T>) -> String {
    if !page.is_paginated() {
        return String::new();
    }

    let mut html = String::from(r#"<div class="pagination">"#);
    if page.has_previous() {
        let _ = write!(
            html,
            r#"<a href="{}">previous</a> "#,
            urls::with_page(path, page.number - 1)
        );
    }
    let _ = write!(
        html,
        r#"<span class="page-current">Page {} of {}.</span>"#,
        page.number, page.num_pages
    );
    if page.has_next() {
        let _ = write!(
            html,
            r#" <a href="{}">next</a>"#,
            urls::with_page(path, page.number + 1)
        );
    }
    html.push_str("</div>");
    html
}

// ============================================================================
// CATALOG
// ============================================================================

/// Home page with catalog counts.
pub fn index(nav: &Nav, counts: &CatalogCounts) -> String {
    let content = format!(
        r#"<h1>Local Library Home</h1>
<p>Welcome to {site}, a website developed as a catalog of books and copies.</p>
<h2>Dynamic content</h2>
<div class="stats">
    <p>The library has the following record counts:</p>
    <ul>
        <li><strong>Books:</strong> {books}</li>
        <li><strong>Copies:</strong> {instances}</li>
        <li><strong>Copies available:</strong> {available}</li>
        <li><strong>Authors:</strong> {authors}</li>
    </ul>
</div>"#,
        site = esc(&nav.site_title),
        books = counts.books,
        instances = counts.instances,
        available = counts.instances_available,
        authors = counts.authors,
    );
    layout(nav, "Home", &content)
}

fn author_link(book: &Book) -> String {
    match (book.author_id, &book.author_name) {
        (Some(id), Some(name)) => format!(
            r#"<a href="{}">{}</a>"#,
            urls::author_detail(id),
            esc(name)
        ),
        _ => "Unknown author".to_string(),
    }
}

/// Paginated book list.
pub fn book_list(nav: &Nav, page: &Page<Book>) -> String {
    let mut content = String::from("<h1>Book List</h1>");
    if page.items.is_empty() {
        content.push_str("<p>There are no books in the library.</p>");
    } else {
        content.push_str("<ul>");
        for book in &page.items {
            let _ = write!(
                content,
                r#"<li><a href="{href}">{title}</a> ({author})</li>"#,
                href = urls::book_detail(book.id),
                title = esc(&book.title),
                author = author_link(book),
            );
        }
        content.push_str("</ul>");
    }
    content.push_str(&pagination(urls::BOOKS, page));
    layout(nav, "Books", &content)
}

/// Flags deciding which actions a detail page offers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Actions {
    /// May edit.
    pub change: bool,
    /// May delete.
    pub delete: bool,
    /// May renew loans.
    pub renew: bool,
}

fn action_links(actions: Actions, update: String, delete: String) -> String {
    let mut html = String::new();
    if actions.change {
        let _ = write!(html, r#"<a href="{}">Update</a> "#, update);
    }
    if actions.delete {
        let _ = write!(html, r#"<a href="{}">Delete</a>"#, delete);
    }
    if html.is_empty() {
        html
    } else {
        format!("<p>{}</p>", html)
    }
}

/// One book with its genres and copies.
pub fn book_detail(
    nav: &Nav,
    book: &Book,
    genres: &[Genre],
    copies: &[BookInstance],
    actions: Actions,
) -> String {
    let genre_names = genres
        .iter()
        .map(|g| esc(&g.name).into_owned())
        .collect::<Vec<_>>()
        .join(", ");

    let mut content = format!(
        r#"<h1>Title: {title}</h1>
<p><strong>Author:</strong> {author}</p>
<p><strong>Summary:</strong> {summary}</p>
<p><strong>ISBN:</strong> {isbn}</p>
<p><strong>Genre:</strong> {genres}</p>
{actions}
<div class="copies">
<h4>Copies</h4>"#,
        title = esc(&book.title),
        author = author_link(book),
        summary = esc(&book.summary),
        isbn = esc(&book.isbn),
        genres = genre_names,
        actions = action_links(
            actions,
            urls::book_update(book.id),
            urls::book_delete(book.id)
        ),
    );

    if copies.is_empty() {
        content.push_str("<p>There are no copies of this book in the library.</p>");
    }
    for copy in copies {
        let _ = write!(
            content,
            r#"<hr><p class="status-{code}">{label}</p>"#,
            code = copy.status.code(),
            label = copy.status.label(),
        );
        if copy.status != LoanStatus::Available {
            let _ = write!(
                content,
                "<p><strong>Due to be returned:</strong> {}</p>",
                date(copy.due_back)
            );
        }
        let _ = write!(
            content,
            r#"<p><strong>Imprint:</strong> {imprint}</p>
<p class="text-muted"><strong>Id:</strong> {id}</p>"#,
            imprint = esc(&copy.imprint),
            id = esc(&copy.id),
        );
        if actions.renew && copy.status == LoanStatus::OnLoan {
            let _ = write!(
                content,
                r#"<p><a href="{}">Renew</a></p>"#,
                urls::renew_book(&copy.id)
            );
        }
    }
    content.push_str("</div>");

    layout(nav, &book.title, &content)
}

/// Paginated author list.
pub fn author_list(nav: &Nav, page: &Page<Author>) -> String {
    let mut content = String::from("<h1>Author List</h1>");
    if page.items.is_empty() {
        content.push_str("<p>There are no authors available.</p>");
    } else {
        content.push_str("<ul>");
        for author in &page.items {
            let _ = write!(
                content,
                r#"<li><a href="{href}">{name}</a> {lifespan}</li>"#,
                href = urls::author_detail(author.id),
                name = esc(&author.display_name()),
                lifespan = esc(&author.lifespan()),
            );
        }
        content.push_str("</ul>");
    }
    content.push_str(&pagination(urls::AUTHORS, page));
    layout(nav, "Authors", &content)
}

/// One author and their books.
pub fn author_detail(nav: &Nav, author: &Author, books: &[Book], actions: Actions) -> String {
    let mut content = format!(
        r#"<h1>Author: {name}</h1>
<p>{lifespan}</p>
{actions}
<div class="books">
<h4>Books</h4>"#,
        name = esc(&author.display_name()),
        lifespan = esc(&author.lifespan()),
        actions = action_links(
            actions,
            urls::author_update(author.id),
            urls::author_delete(author.id)
        ),
    );

    if books.is_empty() {
        content.push_str("<p>This author has no books.</p>");
    } else {
        content.push_str("<dl>");
        for book in books {
            let _ = write!(
                content,
                r#"<dt><a href="{href}">{title}</a></dt><dd>{summary}</dd>"#,
                href = urls::book_detail(book.id),
                title = esc(&book.title),
                summary = esc(&book.summary),
            );
        }
        content.push_str("</dl>");
    }
    content.push_str("</div>");

    layout(nav, &author.display_name(), &content)
}

// ============================================================================
// LOANS
// ============================================================================

fn due_class(copy: &BookInstance, today: NaiveDate) -> &'static str {
    if copy.is_overdue(today) { "overdue" } else { "" }
}

/// The viewer's own loans.
pub fn my_borrowed(nav: &Nav, page: &Page<BookInstance>, today: NaiveDate) -> String {
    let mut content = String::from("<h1>Borrowed books</h1>");
    if page.items.is_empty() {
        content.push_str("<p>There are no books borrowed.</p>");
    } else {
        content.push_str("<ul>");
        for copy in &page.items {
            let _ = write!(
                content,
                r#"<li class="{class}"><a href="{href}">{title}</a> ({due})</li>"#,
                class = due_class(copy, today),
                href = urls::book_detail(copy.book_id),
                title = esc(&copy.book_title),
                due = date(copy.due_back),
            );
        }
        content.push_str("</ul>");
    }
    content.push_str(&pagination(urls::MY_BORROWED, page));
    layout(nav, "My borrowed", &content)
}

/// Every loan, for librarians.
pub fn all_borrowed(nav: &Nav, page: &Page<BookInstance>, today: NaiveDate) -> String {
    let mut content = String::from("<h1>All Borrowed Books</h1>");
    if page.items.is_empty() {
        content.push_str("<p>There are no books borrowed.</p>");
    } else {
        content.push_str("<ul>");
        for copy in &page.items {
            let _ = write!(
                content,
                r#"<li class="{class}"><a href="{href}">{title}</a> ({due}) - {borrower} - <a href="{renew}">Renew</a></li>"#,
                class = due_class(copy, today),
                href = urls::book_detail(copy.book_id),
                title = esc(&copy.book_title),
                due = date(copy.due_back),
                borrower = esc(copy.borrower_name.as_deref().unwrap_or("")),
                renew = urls::renew_book(&copy.id),
            );
        }
        content.push_str("</ul>");
    }
    content.push_str(&pagination(urls::ALL_BORROWED, page));
    layout(nav, "All borrowed", &content)
}

// ============================================================================
// FORMS
// ============================================================================

fn errors(list: &[String]) -> String {
    if list.is_empty() {
        return String::new();
    }
    let items: String = list
        .iter()
        .map(|e| format!("<li>{}</li>", esc(e)))
        .collect();
    format!(r#"<ul class="errorlist">{}</ul>"#, items)
}

fn options(choices: &[(String, String)], selected: &[String], blank: bool) -> String {
    let mut html = String::new();
    if blank {
        html.push_str(r#"<option value="">---------</option>"#);
    }
    for (value, label) in choices {
        let _ = write!(
            html,
            r#"<option value="{v}"{sel}>{l}</option>"#,
            v = esc(value),
            sel = if selected.contains(value) { " selected" } else { "" },
            l = esc(label),
        );
    }
    html
}

fn input(field: &Field) -> String {
    let required = if field.required { " required" } else { "" };
    match &field.kind {
        FieldKind::Text { max_length } => format!(
            r#"<input type="text" name="{n}" id="id_{n}" value="{v}" maxlength="{max_length}"{required}>"#,
            n = field.name,
            v = esc(field.value()),
        ),
        FieldKind::Textarea { max_length } => format!(
            r#"<textarea name="{n}" id="id_{n}" rows="6" cols="60" maxlength="{max_length}"{required}>{v}</textarea>"#,
            n = field.name,
            v = esc(field.value()),
        ),
        FieldKind::Date => format!(
            r#"<input type="text" name="{n}" id="id_{n}" value="{v}" placeholder="YYYY-MM-DD"{required}>"#,
            n = field.name,
            v = esc(field.value()),
        ),
        FieldKind::Select(choices) => format!(
            r#"<select name="{n}" id="id_{n}"{required}>{o}</select>"#,
            n = field.name,
            o = options(choices, &field.values, true),
        ),
        FieldKind::MultiSelect(choices) => format!(
            r#"<select name="{n}" id="id_{n}" multiple>{o}</select>"#,
            n = field.name,
            o = options(choices, &field.values, false),
        ),
    }
}

/// Form fields as `<p>` blocks with their errors and help text.
pub fn form_fields(form: &Form) -> String {
    let mut html = errors(&form.errors);
    for field in &form.fields {
        let help = field
            .help_text
            .map(|h| format!(r#"<br><span class="helptext">{}</span>"#, esc(h)))
            .unwrap_or_default();
        let _ = write!(
            html,
            r#"<p>{errors}<label for="id_{name}">{label}:</label> {input}{help}</p>"#,
            errors = errors(&field.errors),
            name = field.name,
            label = esc(field.label),
            input = input(field),
        );
    }
    html
}

/// Librarian renewal form for one copy.
pub fn renew_form(nav: &Nav, copy: &BookInstance, form: &Form, today: NaiveDate) -> String {
    let content = format!(
        r#"<h1>Renew: {title}</h1>
<p>Borrower: {borrower}</p>
<p class="{class}">Due date: {due}</p>
<form method="post" action="{action}">
{fields}
<input type="submit" value="Submit">
</form>"#,
        title = esc(&copy.book_title),
        borrower = esc(copy.borrower_name.as_deref().unwrap_or("")),
        class = due_class(copy, today),
        due = date(copy.due_back),
        action = urls::renew_book(&copy.id),
        fields = form_fields(form),
    );
    layout(nav, "Renew", &content)
}

/// Create or update form.
pub fn edit_form(nav: &Nav, heading: &str, action: &str, form: &Form) -> String {
    let content = format!(
        r#"<h1>{heading}</h1>
<form method="post" action="{action}">
{fields}
<input type="submit" value="Submit">
</form>"#,
        heading = esc(heading),
        action = esc(action),
        fields = form_fields(form),
    );
    layout(nav, heading, &content)
}

/// Delete confirmation. `blocked` explains why deletion is refused.
pub fn confirm_delete(
    nav: &Nav,
    kind: &str,
    name: &str,
    action: &str,
    blocked: Option<&str>,
) -> String {
    let body = match blocked {
        Some(reason) => format!(r#"<p class="overdue">{}</p>"#, esc(reason)),
        None => format!(
            r#"<p>Are you sure you want to delete the {kind}: {name}?</p>
<form method="post" action="{action}">
<input type="submit" value="Yes, delete.">
</form>"#,
            kind = esc(kind),
            name = esc(name),
            action = esc(action),
        ),
    };
    let content = format!("<h1>Delete {}</h1>\n{}", esc(kind), body);
    layout(nav, &format!("Delete {}", kind), &content)
}

// ============================================================================
// ACCOUNTS
// ============================================================================

/// Login form.
pub fn login(nav: &Nav, error: Option<&str>, username: &str, next: &str) -> String {
    let error = error
        .map(|e| format!(r#"<ul class="errorlist"><li>{}</li></ul>"#, esc(e)))
        .unwrap_or_default();
    let content = format!(
        r#"<h1>Login</h1>
{error}
<form method="post" action="{action}">
<p><label for="id_username">Username:</label> <input type="text" name="username" id="id_username" value="{username}" required></p>
<p><label for="id_password">Password:</label> <input type="password" name="password" id="id_password" required></p>
<input type="hidden" name="next" value="{next}">
<input type="submit" value="Login">
</form>"#,
        action = urls::LOGIN,
        username = esc(username),
        next = esc(next),
    );
    layout(nav, "Login", &content)
}

/// Standalone error page; rendered without the sidebar.
pub fn error_page(status: StatusCode, message: &str) -> String {
    let code = status.as_u16();
    let reason = status.canonical_reason().unwrap_or("Error");
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{code} {reason}</title>
    <style>{style}</style>
</head>
<body>
<div class="wrap"><main>
    <h1>{code} {reason}</h1>
    <p>{message}</p>
    <p><a href="{index}">Home</a></p>
</main></div>
</body>
</html>"#,
        style = STYLE,
        message = esc(message),
        index = urls::INDEX,
    )
}
