//! Declarative view configuration.
//!
//! Each route is described by a small constant (who may see it, how many
//! rows per page, where to go after a delete) and the handlers in
//! `server::handlers` consume those constants.

use crate::auth::{AuthService, Permission};
use crate::db::User;
use crate::error::{AppError, Result};
use serde::Deserialize;

/// Who may use a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Anyone, logged in or not.
    Public,
    /// Any logged-in user.
    Login,
    /// A logged-in user holding the permission.
    Permission(Permission),
}

impl Access {
    /// Gate a request. `next` is where login should send the user back to.
    ///
    /// Anonymous users are sent to login for anything but [`Access::Public`];
    /// logged-in users without the permission get [`AppError::Forbidden`].
    pub fn check<'u>(
        &self,
        auth: &AuthService,
        user: Option<&'u User>,
        next: &str,
    ) -> Result<Option<&'u User>> {
        match (self, user) {
            (Access::Public, user) => Ok(user),
            (_, None) => Err(AppError::LoginRequired {
                next: next.to_string(),
            }),
            (Access::Login, Some(user)) => Ok(Some(user)),
            (Access::Permission(permission), Some(user)) => {
                if auth.has_permission(user, *permission)? {
                    Ok(Some(user))
                } else {
                    tracing::info!(
                        username = %user.username,
                        permission = %permission,
                        "Permission denied"
                    );
                    Err(AppError::Forbidden(permission.codename().to_string()))
                }
            }
        }
    }
}

/// Paginated list of rows.
#[derive(Debug, Clone, Copy)]
pub struct ListView {
    /// Gate.
    pub access: Access,
    /// Rows per page.
    pub paginate_by: usize,
}

/// Single object page.
#[derive(Debug, Clone, Copy)]
pub struct DetailView {
    /// Gate.
    pub access: Access,
}

/// Create or update form page.
#[derive(Debug, Clone, Copy)]
pub struct EditView {
    /// Gate.
    pub access: Access,
}

/// Delete confirmation page.
#[derive(Debug, Clone, Copy)]
pub struct DeleteView {
    /// Gate.
    pub access: Access,
    /// Where to redirect once deleted.
    pub success_url: &'static str,
}

/// `?page=` query parameter.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    /// 1-based page number or `last`.
    pub page: Option<String>,
}

/// One page of a list.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Rows on this page.
    pub items: Vec<T>,
    /// 1-based page number.
    pub number: usize,
    /// Page count, at least 1.
    pub num_pages: usize,
    /// Rows across all pages.
    pub total: i64,
}

impl<T> Page<T> {
    /// More than one page exists.
    pub fn is_paginated(&self) -> bool {
        self.num_pages > 1
    }

    /// A page before this one exists.
    pub fn has_previous(&self) -> bool {
        self.number > 1
    }

    /// A page after this one exists.
    pub fn has_next(&self) -> bool {
        self.number < self.num_pages
    }
}

impl ListView {
    /// Resolve the requested page number against `total` rows.
    pub fn page_number(&self, total: i64, requested: Option<&str>) -> Result<(usize, usize)> {
        let per_page = self.paginate_by.max(1);
        let total = usize::try_from(total).unwrap_or(0);
        let num_pages = total.div_ceil(per_page).max(1);

        let number = match requested.map(str::trim) {
            None | Some("") => 1,
            Some("last") => num_pages,
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| AppError::NotFound("That page number is not an integer".to_string()))?,
        };

        if number == 0 || number > num_pages {
            return Err(AppError::NotFound(format!(
                "Invalid page ({}): That page contains no results",
                number
            )));
        }

        Ok((number, num_pages))
    }

    /// Fetch one page; `fetch` receives `(offset, limit)`.
    pub fn paginate<T>(
        &self,
        total: i64,
        requested: Option<&str>,
        fetch: impl FnOnce(i64, i64) -> Result<Vec<T>>,
    ) -> Result<Page<T>> {
        let (number, num_pages) = self.page_number(total, requested)?;
        let limit = self.paginate_by.max(1) as i64;
        let offset = (number as i64 - 1) * limit;

        Ok(Page {
            items: fetch(offset, limit)?,
            number,
            num_pages,
            total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEN: ListView = ListView {
        access: Access::Public,
        paginate_by: 10,
    };

    #[test]
    fn empty_list_is_one_page() {
        assert_eq!(TEN.page_number(0, None).unwrap(), (1, 1));
        assert!(TEN.page_number(0, Some("2")).is_err());
    }

    #[test]
    fn page_numbers_and_last() {
        assert_eq!(TEN.page_number(25, Some("2")).unwrap(), (2, 3));
        assert_eq!(TEN.page_number(25, Some("last")).unwrap(), (3, 3));
        assert_eq!(TEN.page_number(30, Some("last")).unwrap(), (3, 3));
        assert!(TEN.page_number(25, Some("4")).is_err());
        assert!(TEN.page_number(25, Some("0")).is_err());
        assert!(TEN.page_number(25, Some("two")).is_err());
    }

    #[test]
    fn paginate_passes_offset_and_limit() {
        let page = TEN
            .paginate(25, Some("3"), |offset, limit| {
                assert_eq!((offset, limit), (20, 10));
                Ok(vec![21, 22, 23, 24, 25])
            })
            .unwrap();
        assert_eq!(page.number, 3);
        assert!(page.has_previous());
        assert!(!page.has_next());
        assert!(page.is_paginated());
    }
}
