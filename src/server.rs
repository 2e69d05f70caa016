//! HTTP server and routes.

mod extract;
mod handlers;
mod state;
pub mod urls;


pub use extract::{SESSION_COOKIE, Viewer};
pub use state::AppState;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let catalog_routes = Router::new()
        .route(urls::INDEX, get(handlers::index))
        .route(urls::BOOKS, get(handlers::book_list))
        .route(urls::BOOK_DETAIL, get(handlers::book_detail))
        .route(urls::AUTHORS, get(handlers::author_list))
        .route(urls::AUTHOR_DETAIL, get(handlers::author_detail));

    let loan_routes = Router::new()
        .route(urls::MY_BORROWED, get(handlers::my_borrowed))
        .route(urls::ALL_BORROWED, get(handlers::all_borrowed))
        .route(
            urls::RENEW_BOOK,
            get(handlers::renew_book).post(handlers::renew_book_submit),
        );

    let edit_routes = Router::new()
        .route(
            urls::AUTHOR_CREATE,
            get(handlers::author_create).post(handlers::author_create_submit),
        )
        .route(
            urls::AUTHOR_UPDATE,
            get(handlers::author_update).post(handlers::author_update_submit),
        )
        .route(
            urls::AUTHOR_DELETE,
            get(handlers::author_delete).post(handlers::author_delete_submit),
        )
        .route(
            urls::BOOK_CREATE,
            get(handlers::book_create).post(handlers::book_create_submit),
        )
        .route(
            urls::BOOK_UPDATE,
            get(handlers::book_update).post(handlers::book_update_submit),
        )
        .route(
            urls::BOOK_DELETE,
            get(handlers::book_delete).post(handlers::book_delete_submit),
        );

    let account_routes = Router::new()
        .route(
            urls::LOGIN,
            get(handlers::login).post(handlers::login_submit),
        )
        .route(urls::LOGOUT, axum::routing::post(handlers::logout));

    Router::new()
        .merge(catalog_routes)
        .merge(loan_routes)
        .merge(edit_routes)
        .merge(account_routes)
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
