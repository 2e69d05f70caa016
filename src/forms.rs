//! HTML form binding and validation.
//!
//! A [`Form`] is both the thing rendered on a page and the result of a
//! failed validation: on error the caller gets back the bound form with its
//! submitted values and field errors, ready to render again. Each concrete
//! form only reads the fields on its allow-list; anything else in the
//! request body is ignored.

use crate::db::{Author, AuthorDraft, Book, BookDraft, Genre, days_after};
use chrono::NaiveDate;

/// Error for a missing required value.
pub const REQUIRED: &str = "This field is required.";

/// Submitted `application/x-www-form-urlencoded` pairs, in request order.
#[derive(Debug, Clone, Default)]
pub struct FormData(Vec<(String, String)>);

impl FormData {
    /// Wrap decoded pairs.
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }

    /// First value submitted for `name`.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Every value submitted for `name` (multi-selects).
    pub fn values(&self, name: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

impl From<Vec<(String, String)>> for FormData {
    fn from(pairs: Vec<(String, String)>) -> Self {
        Self::new(pairs)
    }
}

/// Widget and validation kind of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Single line text with a length limit.
    Text {
        /// Maximum length in characters.
        max_length: usize,
    },
    /// Multi-line text with a length limit.
    Textarea {
        /// Maximum length in characters.
        max_length: usize,
    },
    /// Date in one of the accepted input formats.
    Date,
    /// One of `(value, label)`.
    Select(Vec<(String, String)>),
    /// Any subset of `(value, label)`.
    MultiSelect(Vec<(String, String)>),
}

/// One form field with its current values and errors.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Input name.
    pub name: &'static str,
    /// Label text.
    pub label: &'static str,
    /// Widget kind.
    pub kind: FieldKind,
    /// Whether an empty value is an error.
    pub required: bool,
    /// Help text under the input.
    pub help_text: Option<&'static str>,
    /// Current values, one unless multi-select.
    pub values: Vec<String>,
    /// Validation errors.
    pub errors: Vec<String>,
}

impl Field {
    fn new(name: &'static str, label: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            label,
            kind,
            required: true,
            help_text: None,
            values: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    fn help(mut self, text: &'static str) -> Self {
        self.help_text = Some(text);
        self
    }

    /// First value, or empty.
    pub fn value(&self) -> &str {
        self.values.first().map(String::as_str).unwrap_or("")
    }
}

/// A set of fields plus errors not tied to any field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Form {
    /// Fields in display order.
    pub fields: Vec<Field>,
    /// Errors about the form as a whole.
    pub errors: Vec<String>,
}

impl Form {
    fn new(fields: Vec<Field>) -> Self {
        Self {
            fields,
            errors: Vec::new(),
        }
    }

    /// Keep only the fields named in `allowed`, in that order.
    fn restrict(mut self, allowed: &[&str]) -> Self {
        let mut fields = Vec::with_capacity(allowed.len());
        for name in allowed {
            if let Some(pos) = self.fields.iter().position(|f| f.name == *name) {
                fields.push(self.fields.swap_remove(pos));
            }
        }
        self.fields = fields;
        self
    }

    fn bind(mut self, data: &FormData) -> Self {
        for field in &mut self.fields {
            field.values = data
                .values(field.name)
                .into_iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
        }
        self
    }

    fn initial(mut self, name: &str, values: Vec<String>) -> Self {
        if let Some(field) = self.field_mut(name) {
            field.values = values;
        }
        self
    }

    /// Field by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    /// Attach an error to a field, or to the form if no such field.
    pub fn add_error(&mut self, name: &str, message: impl Into<String>) {
        let message = message.into();
        match self.field_mut(name) {
            Some(field) => field.errors.push(message),
            None => self.errors.push(message),
        }
    }

    /// No form or field errors.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.fields.iter().all(|f| f.errors.is_empty())
    }

    fn finish<T>(self, value: T) -> Result<T, Form> {
        if self.is_valid() { Ok(value) } else { Err(self) }
    }

    fn required_value(&mut self, name: &str) -> Option<String> {
        let field = self.field_mut(name)?;
        let value = field.value().to_string();
        if value.is_empty() {
            if field.required {
                field.errors.push(REQUIRED.to_string());
            }
            return None;
        }
        Some(value)
    }

    fn clean_text(&mut self, name: &str) -> String {
        let Some(value) = self.required_value(name) else {
            return String::new();
        };
        let max = match self.field(name).map(|f| &f.kind) {
            Some(FieldKind::Text { max_length }) | Some(FieldKind::Textarea { max_length }) => {
                *max_length
            }
            _ => usize::MAX,
        };
        let len = value.chars().count();
        if len > max {
            self.add_error(
                name,
                format!(
                    "Ensure this value has at most {} characters (it has {}).",
                    max, len
                ),
            );
        }
        value
    }

    fn clean_date(&mut self, name: &str) -> Option<NaiveDate> {
        let value = self.required_value(name)?;
        let date = parse_date(&value);
        if date.is_none() {
            self.add_error(name, "Enter a valid date.");
        }
        date
    }

    fn clean_choice(&mut self, name: &str) -> Option<i64> {
        let value = self.required_value(name)?;
        let known = match self.field(name).map(|f| &f.kind) {
            Some(FieldKind::Select(choices)) => choices.iter().any(|(v, _)| *v == value),
            _ => false,
        };
        match value.parse::<i64>() {
            Ok(id) if known => Some(id),
            _ => {
                self.add_error(
                    name,
                    "Select a valid choice. That choice is not one of the available choices.",
                );
                None
            }
        }
    }

    fn clean_choices(&mut self, name: &str) -> Vec<i64> {
        let Some(field) = self.field(name) else {
            return Vec::new();
        };
        let FieldKind::MultiSelect(choices) = &field.kind else {
            return Vec::new();
        };

        let mut ids = Vec::new();
        let mut bad = Vec::new();
        for value in &field.values {
            match value.parse::<i64>() {
                Ok(id) if choices.iter().any(|(v, _)| v == value) => ids.push(id),
                _ => bad.push(value.clone()),
            }
        }
        if field.required && field.values.is_empty() {
            self.add_error(name, REQUIRED);
        }
        for value in bad {
            self.add_error(
                name,
                format!(
                    "Select a valid choice. {} is not one of the available choices.",
                    value
                ),
            );
        }
        ids
    }
}

/// Parse a date in `YYYY-MM-DD`, `MM/DD/YYYY` or `MM/DD/YY` form.
pub fn parse_date(input: &str) -> Option<NaiveDate> {
    let input = input.trim();
    if input.contains('-') {
        return NaiveDate::parse_from_str(input, "%Y-%m-%d").ok();
    }

    let parts: Vec<&str> = input.split('/').collect();
    match parts.as_slice() {
        [_, _, year] if year.len() == 2 => NaiveDate::parse_from_str(input, "%m/%d/%y").ok(),
        [_, _, year] if year.len() == 4 => NaiveDate::parse_from_str(input, "%m/%d/%Y").ok(),
        _ => None,
    }
}

fn iso(date: Option<NaiveDate>) -> Vec<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
        .into_iter()
        .collect()
}

// ============================================================================
// RENEWAL
// ============================================================================

/// Librarian form for extending a loan.
pub struct RenewBookForm;

impl RenewBookForm {
    /// Editable fields.
    pub const FIELDS: &'static [&'static str] = &["renewal_date"];
    /// Default proposal: three weeks from today.
    pub const PROPOSED_DAYS: u64 = 21;
    /// Latest allowed renewal: four weeks from today.
    pub const MAX_DAYS: u64 = 28;

    fn fields() -> Form {
        Form::new(vec![
            Field::new("renewal_date", "Renewal date", FieldKind::Date)
                .help("Enter a date between now and 4 weeks (default 3)."),
        ])
        .restrict(Self::FIELDS)
    }

    /// Unbound form proposing today + 3 weeks.
    pub fn initial(today: NaiveDate) -> Form {
        Self::fields().initial(
            "renewal_date",
            iso(Some(days_after(today, Self::PROPOSED_DAYS))),
        )
    }

    /// Validate a submission against `today`.
    pub fn validate(data: &FormData, today: NaiveDate) -> Result<NaiveDate, Form> {
        let mut form = Self::fields().bind(data);

        let date = form.clean_date("renewal_date");
        if let Some(date) = date {
            if date < today {
                form.add_error("renewal_date", "Invalid date - renewal in past");
            } else if date > days_after(today, Self::MAX_DAYS) {
                form.add_error(
                    "renewal_date",
                    "Invalid date - renewal more than 4 weeks ahead",
                );
            }
        }

        match date {
            Some(date) => form.finish(date),
            None => Err(form),
        }
    }
}

// ============================================================================
// AUTHOR
// ============================================================================

/// Create/update form for authors.
pub struct AuthorForm;

impl AuthorForm {
    /// Editable fields, for both create and update.
    pub const FIELDS: &'static [&'static str] =
        &["first_name", "last_name", "date_of_birth", "date_of_death"];

    /// Pre-filled date of death on the create form.
    pub const INITIAL_DATE_OF_DEATH: &'static str = "11/06/2020";

    fn fields() -> Form {
        Form::new(vec![
            Field::new("first_name", "First name", FieldKind::Text { max_length: 100 }),
            Field::new("last_name", "Last name", FieldKind::Text { max_length: 100 }),
            Field::new("date_of_birth", "Date of birth", FieldKind::Date).optional(),
            Field::new("date_of_death", "Died", FieldKind::Date).optional(),
        ])
        .restrict(Self::FIELDS)
    }

    /// Empty create form.
    pub fn initial() -> Form {
        Self::fields().initial(
            "date_of_death",
            vec![Self::INITIAL_DATE_OF_DEATH.to_string()],
        )
    }

    /// Update form holding an author's current values.
    pub fn from_author(author: &Author) -> Form {
        Self::fields()
            .initial("first_name", vec![author.first_name.clone()])
            .initial("last_name", vec![author.last_name.clone()])
            .initial("date_of_birth", iso(author.date_of_birth))
            .initial("date_of_death", iso(author.date_of_death))
    }

    /// Validate a submission.
    pub fn validate(data: &FormData) -> Result<AuthorDraft, Form> {
        let mut form = Self::fields().bind(data);

        let draft = AuthorDraft {
            first_name: form.clean_text("first_name"),
            last_name: form.clean_text("last_name"),
            date_of_birth: form.clean_date("date_of_birth"),
            date_of_death: form.clean_date("date_of_death"),
        };

        if let (Some(born), Some(died)) = (draft.date_of_birth, draft.date_of_death)
            && died < born
        {
            form.add_error("date_of_death", "Date of death is before date of birth.");
        }

        form.finish(draft)
    }
}

// ============================================================================
// BOOK
// ============================================================================

/// Create/update form for books, parameterised by its field allow-list.
pub struct BookForm {
    fields: &'static [&'static str],
}

impl BookForm {
    /// Fields a new book is created with.
    pub const CREATE: BookForm = BookForm {
        fields: &["title", "author", "summary", "isbn"],
    };

    /// Fields an existing book can change.
    pub const UPDATE: BookForm = BookForm {
        fields: &["title", "author", "summary", "isbn", "genre"],
    };

    /// Error shown when the ISBN is taken.
    pub const DUPLICATE_ISBN: &'static str = "Book with this ISBN already exists.";

    fn build(&self, authors: &[Author], genres: &[Genre]) -> Form {
        let author_choices = authors
            .iter()
            .map(|a| (a.id.to_string(), a.display_name()))
            .collect();
        let genre_choices = genres
            .iter()
            .map(|g| (g.id.to_string(), g.name.clone()))
            .collect();

        Form::new(vec![
            Field::new("title", "Title", FieldKind::Text { max_length: 200 }),
            Field::new("author", "Author", FieldKind::Select(author_choices)),
            Field::new("summary", "Summary", FieldKind::Textarea { max_length: 1000 })
                .help("Enter a brief description of the book"),
            Field::new("isbn", "ISBN", FieldKind::Text { max_length: 13 })
                .help("13 Character ISBN number"),
            Field::new("genre", "Genre", FieldKind::MultiSelect(genre_choices))
                .optional()
                .help("Select a genre for this book"),
        ])
        .restrict(self.fields)
    }

    /// Empty form.
    pub fn blank(&self, authors: &[Author], genres: &[Genre]) -> Form {
        self.build(authors, genres)
    }

    /// Form holding a book's current values.
    pub fn from_book(
        &self,
        book: &Book,
        genre_ids: &[i64],
        authors: &[Author],
        genres: &[Genre],
    ) -> Form {
        self.build(authors, genres)
            .initial("title", vec![book.title.clone()])
            .initial(
                "author",
                book.author_id.map(|id| id.to_string()).into_iter().collect(),
            )
            .initial("summary", vec![book.summary.clone()])
            .initial("isbn", vec![book.isbn.clone()])
            .initial("genre", genre_ids.iter().map(|id| id.to_string()).collect())
    }

    /// Form bound to a submission, without validating it.
    pub fn bound(&self, data: &FormData, authors: &[Author], genres: &[Genre]) -> Form {
        self.build(authors, genres).bind(data)
    }

    /// Validate a submission.
    pub fn validate(
        &self,
        data: &FormData,
        authors: &[Author],
        genres: &[Genre],
    ) -> Result<BookDraft, Form> {
        let mut form = self.bound(data, authors, genres);

        let genre_ids = if form.field("genre").is_some() {
            Some(form.clean_choices("genre"))
        } else {
            None
        };

        let draft = BookDraft {
            title: form.clean_text("title"),
            author_id: form.clean_choice("author"),
            summary: form.clean_text("summary"),
            isbn: form.clean_text("isbn"),
            genre_ids,
        };

        form.finish(draft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(&str, &str)]) -> FormData {
        FormData::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn author(id: i64, first: &str, last: &str) -> Author {
        Author {
            id,
            first_name: first.to_string(),
            last_name: last.to_string(),
            date_of_birth: None,
            date_of_death: None,
        }
    }

    #[test]
    fn parse_date_accepts_input_formats() {
        assert_eq!(parse_date("2024-03-05"), Some(date("2024-03-05")));
        assert_eq!(parse_date("03/05/2024"), Some(date("2024-03-05")));
        assert_eq!(parse_date("03/05/24"), Some(date("2024-03-05")));
        assert_eq!(parse_date("11/06/2020"), Some(date("2020-11-06")));
        assert_eq!(parse_date("5 March 2024"), None);
        assert_eq!(parse_date("2024-02-30"), None);
    }

    #[test]
    fn renew_initial_proposes_three_weeks() {
        let form = RenewBookForm::initial(date("2024-01-10"));
        assert_eq!(form.field("renewal_date").unwrap().value(), "2024-01-31");
    }

    #[test]
    fn renew_accepts_window_bounds() {
        let today = date("2024-01-10");
        for ok in ["2024-01-10", "2024-01-20", "2024-02-07"] {
            let result = RenewBookForm::validate(&data(&[("renewal_date", ok)]), today);
            assert_eq!(result.unwrap(), date(ok));
        }
    }

    #[test]
    fn renew_rejects_past_date() {
        let today = date("2024-01-10");
        let form = RenewBookForm::validate(&data(&[("renewal_date", "2024-01-09")]), today)
            .unwrap_err();
        let field = form.field("renewal_date").unwrap();
        assert_eq!(field.errors, vec!["Invalid date - renewal in past"]);
        assert_eq!(field.value(), "2024-01-09");
    }

    #[test]
    fn renew_rejects_more_than_four_weeks() {
        let today = date("2024-01-10");
        let form = RenewBookForm::validate(&data(&[("renewal_date", "2024-02-08")]), today)
            .unwrap_err();
        assert_eq!(
            form.field("renewal_date").unwrap().errors,
            vec!["Invalid date - renewal more than 4 weeks ahead"]
        );
    }

    #[test]
    fn renew_requires_a_valid_date() {
        let today = date("2024-01-10");
        let missing = RenewBookForm::validate(&data(&[]), today).unwrap_err();
        assert_eq!(missing.field("renewal_date").unwrap().errors, vec![REQUIRED]);

        let garbage =
            RenewBookForm::validate(&data(&[("renewal_date", "soon")]), today).unwrap_err();
        assert_eq!(
            garbage.field("renewal_date").unwrap().errors,
            vec!["Enter a valid date."]
        );
    }

    #[test]
    fn author_form_initial_date_of_death() {
        let form = AuthorForm::initial();
        assert_eq!(form.field("date_of_death").unwrap().value(), "11/06/2020");
        assert_eq!(form.field("first_name").unwrap().value(), "");
    }

    #[test]
    fn author_form_validates_names_and_dates() {
        let draft = AuthorForm::validate(&data(&[
            ("first_name", " Ursula "),
            ("last_name", "Le Guin"),
            ("date_of_birth", "10/21/1929"),
            ("date_of_death", "2018-01-22"),
        ]))
        .unwrap();
        assert_eq!(draft.first_name, "Ursula");
        assert_eq!(draft.date_of_birth, Some(date("1929-10-21")));

        let form = AuthorForm::validate(&data(&[
            ("first_name", &"x".repeat(101)),
            ("date_of_birth", "2000-01-01"),
            ("date_of_death", "1999-01-01"),
        ]))
        .unwrap_err();
        assert_eq!(form.field("first_name").unwrap().errors.len(), 1);
        assert_eq!(form.field("last_name").unwrap().errors, vec![REQUIRED]);
        assert_eq!(form.field("date_of_death").unwrap().errors.len(), 1);
    }

    #[test]
    fn book_create_ignores_fields_outside_allow_list() {
        let authors = vec![author(1, "Iain", "Banks")];
        let genres = vec![Genre {
            id: 7,
            name: "Science Fiction".to_string(),
        }];

        let draft = BookForm::CREATE
            .validate(
                &data(&[
                    ("title", "Excession"),
                    ("author", "1"),
                    ("summary", "An Outside Context Problem."),
                    ("isbn", "9780553575378"),
                    ("genre", "7"),
                    ("id", "99"),
                ]),
                &authors,
                &genres,
            )
            .unwrap();
        assert_eq!(draft.author_id, Some(1));
        assert_eq!(draft.genre_ids, None);

        let draft = BookForm::UPDATE
            .validate(
                &data(&[
                    ("title", "Excession"),
                    ("author", "1"),
                    ("summary", "An Outside Context Problem."),
                    ("isbn", "9780553575378"),
                    ("genre", "7"),
                ]),
                &authors,
                &genres,
            )
            .unwrap();
        assert_eq!(draft.genre_ids, Some(vec![7]));
    }

    #[test]
    fn book_form_rejects_unknown_author_and_long_isbn() {
        let authors = vec![author(1, "Iain", "Banks")];
        let form = BookForm::UPDATE
            .validate(
                &data(&[
                    ("title", "Excession"),
                    ("author", "2"),
                    ("summary", "s"),
                    ("isbn", "97805535753789"),
                    ("genre", "3"),
                ]),
                &authors,
                &[],
            )
            .unwrap_err();
        assert_eq!(form.field("author").unwrap().errors.len(), 1);
        assert_eq!(form.field("isbn").unwrap().errors.len(), 1);
        assert_eq!(form.field("genre").unwrap().errors.len(), 1);
        assert!(form.field("title").unwrap().errors.is_empty());
    }
}
