//! HTTP request handlers.
//!
//! Each route's gate and paging come from the view constants below; the
//! handlers only fetch, bind and render.

use crate::auth::Permission;
use crate::db::{self, User};
use crate::error::{AppError, Result};
use crate::forms::{AuthorForm, BookForm, FormData, RenewBookForm};
use crate::render::{self, Actions};
use crate::server::AppState;
use crate::server::extract::{self, Viewer};
use crate::server::urls;
use crate::views::{Access, DeleteView, DetailView, EditView, ListView, PageQuery};
use axum::{
    Form,
    extract::{Path, Query, State, rejection::FormRejection},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

// ============================================================================
// VIEW CONFIGURATION
// ============================================================================

/// `index`
pub const INDEX: DetailView = DetailView {
    access: Access::Public,
};
/// `books`
pub const BOOK_LIST: ListView = ListView {
    access: Access::Login,
    paginate_by: 10,
};
/// `book-detail`
pub const BOOK_DETAIL: DetailView = DetailView {
    access: Access::Login,
};
/// `authors`
pub const AUTHOR_LIST: ListView = ListView {
    access: Access::Public,
    paginate_by: 10,
};
/// `author-detail`
pub const AUTHOR_DETAIL: DetailView = DetailView {
    access: Access::Login,
};
/// `my-borrowed`
pub const MY_BORROWED: ListView = ListView {
    access: Access::Login,
    paginate_by: 10,
};
/// `all-borrowed`
pub const ALL_BORROWED: ListView = ListView {
    access: Access::Permission(Permission::CanMarkReturned),
    paginate_by: 30,
};
/// `renew-book-librarian`
pub const RENEW_BOOK: EditView = EditView {
    access: Access::Permission(Permission::CanMarkReturned),
};
/// `author-create`
pub const AUTHOR_CREATE: EditView = EditView {
    access: Access::Permission(Permission::AddAuthor),
};
/// `author-update`
pub const AUTHOR_UPDATE: EditView = EditView {
    access: Access::Permission(Permission::ChangeAuthor),
};
/// `author-delete`
pub const AUTHOR_DELETE: DeleteView = DeleteView {
    access: Access::Permission(Permission::DeleteAuthor),
    success_url: urls::AUTHORS,
};
/// `book-create`
pub const BOOK_CREATE: EditView = EditView {
    access: Access::Permission(Permission::AddBook),
};
/// `book-update`
pub const BOOK_UPDATE: EditView = EditView {
    access: Access::Permission(Permission::ChangeBook),
};
/// `book-delete`
pub const BOOK_DELETE: DeleteView = DeleteView {
    access: Access::Permission(Permission::DeleteBook),
    success_url: urls::BOOKS,
};

/// A form body, decoded only once the handler has gated the request.
type Submitted = std::result::Result<Form<Vec<(String, String)>>, FormRejection>;

fn form_data(submitted: Submitted) -> Result<FormData> {
    submitted
        .map(|Form(pairs)| pairs.into())
        .map_err(|e| AppError::InvalidFormat(e.body_text()))
}

/// Integer primary key from a path segment; anything else is a 404.
fn parse_id(raw: &str) -> Result<i64> {
    raw.parse()
        .map_err(|_| AppError::NotFound(format!("No object with id '{}'", raw)))
}

fn detail_actions(
    state: &AppState,
    user: Option<&User>,
    change: Permission,
    delete: Permission,
) -> Result<Actions> {
    Ok(Actions {
        change: state.can(user, change)?,
        delete: state.can(user, delete)?,
        renew: state.can(user, Permission::CanMarkReturned)?,
    })
}

// ============================================================================
// CATALOG
// ============================================================================

/// Home page with catalog counts.
pub async fn index(State(state): State<AppState>, viewer: Viewer) -> Result<Html<String>> {
    let user = viewer.gate(&state, INDEX.access)?;
    let counts = state.db.catalog_counts()?;
    Ok(Html(render::index(&state.nav(user)?, &counts)))
}

/// All books, by title.
pub async fn book_list(
    State(state): State<AppState>,
    viewer: Viewer,
    Query(query): Query<PageQuery>,
) -> Result<Html<String>> {
    let user = viewer.gate(&state, BOOK_LIST.access)?;
    let page = BOOK_LIST.paginate(state.db.count_books()?, query.page.as_deref(), |o, l| {
        state.db.list_books(o, l)
    })?;
    Ok(Html(render::book_list(&state.nav(user)?, &page)))
}

/// One book with its genres and copies.
pub async fn book_detail(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> Result<Html<String>> {
    let user = viewer.gate(&state, BOOK_DETAIL.access)?;
    let id = parse_id(&id)?;
    let book = state
        .db
        .get_book(id)?
        .ok_or_else(|| AppError::NotFound(format!("Book {} not found", id)))?;

    let genres = state.db.book_genres(id)?;
    let copies = state.db.book_instances(id)?;
    let actions = detail_actions(&state, user, Permission::ChangeBook, Permission::DeleteBook)?;

    Ok(Html(render::book_detail(
        &state.nav(user)?,
        &book,
        &genres,
        &copies,
        actions,
    )))
}

/// All authors, by last then first name.
pub async fn author_list(
    State(state): State<AppState>,
    viewer: Viewer,
    Query(query): Query<PageQuery>,
) -> Result<Html<String>> {
    let user = viewer.gate(&state, AUTHOR_LIST.access)?;
    let page = AUTHOR_LIST.paginate(state.db.count_authors()?, query.page.as_deref(), |o, l| {
        state.db.list_authors(o, l)
    })?;
    Ok(Html(render::author_list(&state.nav(user)?, &page)))
}

/// One author and their books.
pub async fn author_detail(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> Result<Html<String>> {
    let user = viewer.gate(&state, AUTHOR_DETAIL.access)?;
    let id = parse_id(&id)?;
    let author = state
        .db
        .get_author(id)?
        .ok_or_else(|| AppError::NotFound(format!("Author {} not found", id)))?;

    let books = state.db.author_books(id)?;
    let actions = detail_actions(
        &state,
        user,
        Permission::ChangeAuthor,
        Permission::DeleteAuthor,
    )?;

    Ok(Html(render::author_detail(
        &state.nav(user)?,
        &author,
        &books,
        actions,
    )))
}

// ============================================================================
// LOANS
// ============================================================================

/// The requester's copies on loan, soonest due first.
pub async fn my_borrowed(
    State(state): State<AppState>,
    viewer: Viewer,
    Query(query): Query<PageQuery>,
) -> Result<Html<String>> {
    let user = viewer.require(&state, MY_BORROWED.access)?;
    let total = state.db.count_borrowed_by(&user.id)?;
    let page = MY_BORROWED.paginate(total, query.page.as_deref(), |o, l| {
        state.db.list_borrowed_by(&user.id, o, l)
    })?;
    Ok(Html(render::my_borrowed(
        &state.nav(Some(user))?,
        &page,
        db::today(),
    )))
}

/// Every copy on loan, soonest due first.
pub async fn all_borrowed(
    State(state): State<AppState>,
    viewer: Viewer,
    Query(query): Query<PageQuery>,
) -> Result<Html<String>> {
    let user = viewer.require(&state, ALL_BORROWED.access)?;
    let total = state.db.count_all_borrowed()?;
    let page = ALL_BORROWED.paginate(total, query.page.as_deref(), |o, l| {
        state.db.list_all_borrowed(o, l)
    })?;
    Ok(Html(render::all_borrowed(
        &state.nav(Some(user))?,
        &page,
        db::today(),
    )))
}

fn renewable_copy(state: &AppState, id: &str) -> Result<db::BookInstance> {
    state
        .db
        .get_instance(id)?
        .ok_or_else(|| AppError::NotFound(format!("Book instance {} not found", id)))
}

/// Renewal form proposing a new due date.
pub async fn renew_book(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> Result<Html<String>> {
    let user = viewer.require(&state, RENEW_BOOK.access)?;
    let copy = renewable_copy(&state, &id)?;
    let today = db::today();
    let form = RenewBookForm::initial(today);
    Ok(Html(render::renew_form(
        &state.nav(Some(user))?,
        &copy,
        &form,
        today,
    )))
}

/// Validate and save a renewal.
pub async fn renew_book_submit(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
    submitted: Submitted,
) -> Result<Response> {
    let user = viewer.require(&state, RENEW_BOOK.access)?;
    let copy = renewable_copy(&state, &id)?;
    let data = form_data(submitted)?;
    let today = db::today();

    match RenewBookForm::validate(&data, today) {
        Ok(due_back) => {
            if !state.db.renew_instance(&copy.id, due_back)? {
                return Err(AppError::NotFound(format!("Book instance {} not found", id)));
            }
            tracing::info!(
                instance = %copy.id,
                librarian = %user.username,
                due_back = %due_back,
                "Renewed loan"
            );
            Ok(Redirect::to(urls::ALL_BORROWED).into_response())
        }
        Err(form) => Ok(Html(render::renew_form(
            &state.nav(Some(user))?,
            &copy,
            &form,
            today,
        ))
        .into_response()),
    }
}

// ============================================================================
// AUTHOR EDITING
// ============================================================================

/// Empty author form.
pub async fn author_create(
    State(state): State<AppState>,
    viewer: Viewer,
) -> Result<Html<String>> {
    let user = viewer.require(&state, AUTHOR_CREATE.access)?;
    Ok(Html(render::edit_form(
        &state.nav(Some(user))?,
        "Create author",
        urls::AUTHOR_CREATE,
        &AuthorForm::initial(),
    )))
}

/// Create an author.
pub async fn author_create_submit(
    State(state): State<AppState>,
    viewer: Viewer,
    submitted: Submitted,
) -> Result<Response> {
    let user = viewer.require(&state, AUTHOR_CREATE.access)?;
    let data = form_data(submitted)?;

    match AuthorForm::validate(&data) {
        Ok(draft) => {
            let id = state.db.create_author(&draft)?;
            tracing::info!(author = id, username = %user.username, "Created author");
            Ok(Redirect::to(&urls::author_detail(id)).into_response())
        }
        Err(form) => Ok(Html(render::edit_form(
            &state.nav(Some(user))?,
            "Create author",
            urls::AUTHOR_CREATE,
            &form,
        ))
        .into_response()),
    }
}

/// Author form holding current values.
pub async fn author_update(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> Result<Html<String>> {
    let user = viewer.require(&state, AUTHOR_UPDATE.access)?;
    let id = parse_id(&id)?;
    let author = state
        .db
        .get_author(id)?
        .ok_or_else(|| AppError::NotFound(format!("Author {} not found", id)))?;

    Ok(Html(render::edit_form(
        &state.nav(Some(user))?,
        &format!("Update author: {}", author.display_name()),
        &urls::author_update(id),
        &AuthorForm::from_author(&author),
    )))
}

/// Save author changes.
pub async fn author_update_submit(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
    submitted: Submitted,
) -> Result<Response> {
    let user = viewer.require(&state, AUTHOR_UPDATE.access)?;
    let id = parse_id(&id)?;
    let author = state
        .db
        .get_author(id)?
        .ok_or_else(|| AppError::NotFound(format!("Author {} not found", id)))?;
    let data = form_data(submitted)?;

    match AuthorForm::validate(&data) {
        Ok(draft) => {
            if !state.db.update_author(id, &draft)? {
                return Err(AppError::NotFound(format!("Author {} not found", id)));
            }
            tracing::info!(author = id, username = %user.username, "Updated author");
            Ok(Redirect::to(&urls::author_detail(id)).into_response())
        }
        Err(form) => Ok(Html(render::edit_form(
            &state.nav(Some(user))?,
            &format!("Update author: {}", author.display_name()),
            &urls::author_update(id),
            &form,
        ))
        .into_response()),
    }
}

/// Author delete confirmation.
pub async fn author_delete(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> Result<Html<String>> {
    let user = viewer.require(&state, AUTHOR_DELETE.access)?;
    let id = parse_id(&id)?;
    let author = state
        .db
        .get_author(id)?
        .ok_or_else(|| AppError::NotFound(format!("Author {} not found", id)))?;

    Ok(Html(render::confirm_delete(
        &state.nav(Some(user))?,
        "author",
        &author.display_name(),
        &urls::author_delete(id),
        None,
    )))
}

/// Delete an author; their books lose the author link.
pub async fn author_delete_submit(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> Result<Redirect> {
    let user = viewer.require(&state, AUTHOR_DELETE.access)?;
    let id = parse_id(&id)?;
    if !state.db.delete_author(id)? {
        return Err(AppError::NotFound(format!("Author {} not found", id)));
    }
    tracing::info!(author = id, username = %user.username, "Deleted author");
    Ok(Redirect::to(AUTHOR_DELETE.success_url))
}

// ============================================================================
// BOOK EDITING
// ============================================================================

fn book_choices(state: &AppState) -> Result<(Vec<db::Author>, Vec<db::Genre>)> {
    Ok((state.db.all_authors()?, state.db.list_genres()?))
}

/// Save a validated book form, turning a taken ISBN into a field error.
fn save_book(
    state: &AppState,
    form: BookForm,
    id: Option<i64>,
    data: &FormData,
) -> Result<std::result::Result<i64, crate::forms::Form>> {
    let (authors, genres) = book_choices(state)?;
    let draft = match form.validate(data, &authors, &genres) {
        Ok(draft) => draft,
        Err(bound) => return Ok(Err(bound)),
    };

    let saved = match id {
        Some(id) => state.db.update_book(id, &draft).and_then(|found| {
            if found {
                Ok(id)
            } else {
                Err(AppError::NotFound(format!("Book {} not found", id)))
            }
        }),
        None => state.db.create_book(&draft),
    };

    match saved {
        Ok(id) => Ok(Ok(id)),
        Err(AppError::Conflict(_)) => {
            let mut bound = form.bound(data, &authors, &genres);
            bound.add_error("isbn", BookForm::DUPLICATE_ISBN);
            Ok(Err(bound))
        }
        Err(e) => Err(e),
    }
}

/// Empty book form.
pub async fn book_create(State(state): State<AppState>, viewer: Viewer) -> Result<Html<String>> {
    let user = viewer.require(&state, BOOK_CREATE.access)?;
    let (authors, genres) = book_choices(&state)?;
    Ok(Html(render::edit_form(
        &state.nav(Some(user))?,
        "Create book",
        urls::BOOK_CREATE,
        &BookForm::CREATE.blank(&authors, &genres),
    )))
}

/// Create a book.
pub async fn book_create_submit(
    State(state): State<AppState>,
    viewer: Viewer,
    submitted: Submitted,
) -> Result<Response> {
    let user = viewer.require(&state, BOOK_CREATE.access)?;
    let data = form_data(submitted)?;

    match save_book(&state, BookForm::CREATE, None, &data)? {
        Ok(id) => {
            tracing::info!(book = id, username = %user.username, "Created book");
            Ok(Redirect::to(&urls::book_detail(id)).into_response())
        }
        Err(form) => Ok(Html(render::edit_form(
            &state.nav(Some(user))?,
            "Create book",
            urls::BOOK_CREATE,
            &form,
        ))
        .into_response()),
    }
}

/// Book form holding current values.
pub async fn book_update(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> Result<Html<String>> {
    let user = viewer.require(&state, BOOK_UPDATE.access)?;
    let id = parse_id(&id)?;
    let book = state
        .db
        .get_book(id)?
        .ok_or_else(|| AppError::NotFound(format!("Book {} not found", id)))?;

    let genre_ids: Vec<i64> = state.db.book_genres(id)?.iter().map(|g| g.id).collect();
    let (authors, genres) = book_choices(&state)?;

    Ok(Html(render::edit_form(
        &state.nav(Some(user))?,
        &format!("Update book: {}", book.title),
        &urls::book_update(id),
        &BookForm::UPDATE.from_book(&book, &genre_ids, &authors, &genres),
    )))
}

/// Save book changes.
pub async fn book_update_submit(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
    submitted: Submitted,
) -> Result<Response> {
    let user = viewer.require(&state, BOOK_UPDATE.access)?;
    let id = parse_id(&id)?;
    let book = state
        .db
        .get_book(id)?
        .ok_or_else(|| AppError::NotFound(format!("Book {} not found", id)))?;
    let data = form_data(submitted)?;

    match save_book(&state, BookForm::UPDATE, Some(id), &data)? {
        Ok(id) => {
            tracing::info!(book = id, username = %user.username, "Updated book");
            Ok(Redirect::to(&urls::book_detail(id)).into_response())
        }
        Err(form) => Ok(Html(render::edit_form(
            &state.nav(Some(user))?,
            &format!("Update book: {}", book.title),
            &urls::book_update(id),
            &form,
        ))
        .into_response()),
    }
}

/// Book delete confirmation.
pub async fn book_delete(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> Result<Html<String>> {
    let user = viewer.require(&state, BOOK_DELETE.access)?;
    let id = parse_id(&id)?;
    let book = state
        .db
        .get_book(id)?
        .ok_or_else(|| AppError::NotFound(format!("Book {} not found", id)))?;

    Ok(Html(render::confirm_delete(
        &state.nav(Some(user))?,
        "book",
        &book.title,
        &urls::book_delete(id),
        None,
    )))
}

/// Delete a book; refused with 409 while copies exist.
pub async fn book_delete_submit(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> Result<Response> {
    let user = viewer.require(&state, BOOK_DELETE.access)?;
    let id = parse_id(&id)?;
    let book = state
        .db
        .get_book(id)?
        .ok_or_else(|| AppError::NotFound(format!("Book {} not found", id)))?;

    match state.db.delete_book(id) {
        Ok(_) => {
            tracing::info!(book = id, username = %user.username, "Deleted book");
            Ok(Redirect::to(BOOK_DELETE.success_url).into_response())
        }
        Err(AppError::Conflict(reason)) => {
            tracing::warn!(book = id, reason = %reason, "Book delete refused");
            let html = render::confirm_delete(
                &state.nav(Some(user))?,
                "book",
                &book.title,
                &urls::book_delete(id),
                Some("This book still has copies in the library. Delete them first."),
            );
            Ok((StatusCode::CONFLICT, Html(html)).into_response())
        }
        Err(e) => Err(e),
    }
}

// ============================================================================
// ACCOUNTS
// ============================================================================

/// `?next=` on the login page.
#[derive(Debug, Default, Deserialize)]
pub struct NextQuery {
    next: Option<String>,
}

/// Login form fields.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    next: Option<String>,
}

/// Login page.
pub async fn login(
    State(state): State<AppState>,
    viewer: Viewer,
    Query(query): Query<NextQuery>,
) -> Result<Html<String>> {
    let next = urls::safe_next(query.next.as_deref());
    Ok(Html(render::login(
        &state.nav(viewer.user.as_ref())?,
        None,
        "",
        next,
    )))
}

/// Verify credentials and start a session.
pub async fn login_submit(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Result<Response> {
    let next = urls::safe_next(form.next.as_deref()).to_string();

    match state.auth.login(&form.username, &form.password) {
        Ok((user, token)) => {
            tracing::info!(username = %user.username, "User logged in");
            let cookie = extract::session_cookie(
                &token,
                state.auth.session_seconds(),
                state.config.auth.cookie_secure,
            )?;
            Ok((jar.add(cookie), Redirect::to(&next)).into_response())
        }
        Err(AppError::InvalidFormat(message)) => {
            tracing::info!(username = %form.username, "Failed login");
            Ok(Html(render::login(
                &state.nav(None)?,
                Some(message.as_str()),
                &form.username,
                &next,
            ))
            .into_response())
        }
        Err(e) => Err(e),
    }
}

/// End the current session.
pub async fn logout(
    State(state): State<AppState>,
    viewer: Viewer,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect)> {
    if let Some(token) = &viewer.token {
        state.auth.logout(token)?;
        if let Some(user) = &viewer.user {
            tracing::info!(username = %user.username, "User logged out");
        }
    }
    Ok((jar.remove(extract::removal_cookie()), Redirect::to(urls::INDEX)))
}

/// Fallback for unknown routes.
pub async fn not_found(viewer: Viewer) -> AppError {
    AppError::NotFound(format!("No page at {}", viewer.path))
}
