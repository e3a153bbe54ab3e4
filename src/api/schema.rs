use crate::api::auth::TOKEN_TYPE;
use crate::model::core::{BookOut, Genre, RecordResponse, UserOut};
use crate::query_builder::sql_builder::{ComposeQuery, QueryItem, Value};
use lazy_static::lazy_static;
use log::warn;
use poem_openapi::Object;
use poem_openapi::{payload::Json, ApiResponse, Tags};
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

pub const DEFAULT_LIMIT: u64 = 10;
pub const MAX_LIMIT: u64 = 100;

lazy_static! {
    pub static ref SORT_BY_REGEX: Regex =
        Regex::new(r"^(title|published_year|author)$").expect("Failed to compile regex");
    pub static ref SORT_ORDER_REGEX: Regex =
        Regex::new(r"^(asc|desc)$").expect("Failed to compile regex");
}

#[derive(Tags)]
pub enum ApiTags {
    Auth,
    Books,
    Health,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Object)]
pub struct ErrorMessage {
    pub msg: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Object)]
pub struct Token {
    pub access_token: String,
    pub token_type: String,
}

impl Token {
    pub fn bearer(access_token: String) -> Self {
        Token {
            access_token,
            token_type: TOKEN_TYPE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Object)]
pub struct HealthStatus {
    pub status: String,
}

#[derive(ApiResponse)]
pub enum RegisterResponse {
    #[oai(status = 200)]
    Ok(Json<UserOut>),

    #[oai(status = 400)]
    BadRequest(Json<ErrorMessage>),
}

impl RegisterResponse {
    pub fn ok(user: UserOut) -> Self {
        Self::Ok(Json(user))
    }

    pub fn bad_request(msg: String) -> Self {
        Self::BadRequest(Json(ErrorMessage { msg }))
    }
}

#[derive(ApiResponse)]
pub enum LoginResponse {
    #[oai(status = 200)]
    Ok(Json<Token>),

    #[oai(status = 400)]
    BadRequest(Json<ErrorMessage>),

    #[oai(status = 401)]
    Unauthorized(Json<ErrorMessage>),
}

impl LoginResponse {
    pub fn ok(token: Token) -> Self {
        Self::Ok(Json(token))
    }

    pub fn bad_request(msg: String) -> Self {
        Self::BadRequest(Json(ErrorMessage { msg }))
    }

    pub fn unauthorized(msg: String) -> Self {
        Self::Unauthorized(Json(ErrorMessage { msg }))
    }
}

#[derive(ApiResponse)]
pub enum GetBooksResponse {
    #[oai(status = 200)]
    Ok(Json<RecordResponse<BookOut>>),

    #[oai(status = 400)]
    BadRequest(Json<ErrorMessage>),
}

impl GetBooksResponse {
    pub fn ok(records: RecordResponse<BookOut>) -> Self {
        Self::Ok(Json(records))
    }

    pub fn bad_request(msg: String) -> Self {
        Self::BadRequest(Json(ErrorMessage { msg }))
    }
}

#[derive(ApiResponse)]
pub enum GetBookResponse {
    #[oai(status = 200)]
    Ok(Json<BookOut>),

    #[oai(status = 400)]
    BadRequest(Json<ErrorMessage>),

    #[oai(status = 404)]
    NotFound(Json<ErrorMessage>),
}

impl GetBookResponse {
    pub fn ok(book: BookOut) -> Self {
        Self::Ok(Json(book))
    }

    pub fn bad_request(msg: String) -> Self {
        Self::BadRequest(Json(ErrorMessage { msg }))
    }

    pub fn not_found(msg: String) -> Self {
        Self::NotFound(Json(ErrorMessage { msg }))
    }
}

#[derive(ApiResponse)]
pub enum PostBookResponse {
    #[oai(status = 201)]
    Created(Json<BookOut>),

    #[oai(status = 400)]
    BadRequest(Json<ErrorMessage>),
}

impl PostBookResponse {
    pub fn created(book: BookOut) -> Self {
        Self::Created(Json(book))
    }

    pub fn bad_request(msg: String) -> Self {
        Self::BadRequest(Json(ErrorMessage { msg }))
    }
}

#[derive(ApiResponse)]
pub enum PutBookResponse {
    #[oai(status = 200)]
    Ok(Json<BookOut>),

    #[oai(status = 400)]
    BadRequest(Json<ErrorMessage>),

    #[oai(status = 403)]
    Forbidden(Json<ErrorMessage>),

    #[oai(status = 404)]
    NotFound(Json<ErrorMessage>),
}

impl PutBookResponse {
    pub fn ok(book: BookOut) -> Self {
        Self::Ok(Json(book))
    }

    pub fn bad_request(msg: String) -> Self {
        Self::BadRequest(Json(ErrorMessage { msg }))
    }

    pub fn forbidden(msg: String) -> Self {
        Self::Forbidden(Json(ErrorMessage { msg }))
    }

    pub fn not_found(msg: String) -> Self {
        Self::NotFound(Json(ErrorMessage { msg }))
    }
}

#[derive(ApiResponse)]
pub enum DeleteResponse {
    #[oai(status = 204)]
    NoContent,

    #[oai(status = 400)]
    BadRequest(Json<ErrorMessage>),

    #[oai(status = 403)]
    Forbidden(Json<ErrorMessage>),

    #[oai(status = 404)]
    NotFound(Json<ErrorMessage>),
}

impl DeleteResponse {
    pub fn no_content() -> Self {
        Self::NoContent
    }

    pub fn bad_request(msg: String) -> Self {
        Self::BadRequest(Json(ErrorMessage { msg }))
    }

    pub fn forbidden(msg: String) -> Self {
        Self::Forbidden(Json(ErrorMessage { msg }))
    }

    pub fn not_found(msg: String) -> Self {
        Self::NotFound(Json(ErrorMessage { msg }))
    }
}

#[derive(ApiResponse)]
pub enum HealthResponse {
    #[oai(status = 200)]
    Ok(Json<HealthStatus>),
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self::Ok(Json(HealthStatus {
            status: "ok".to_string(),
        }))
    }
}

/// Query parameters accepted by the book listing.
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_year_range"))]
pub struct BookFilter {
    pub title: Option<String>,
    pub author: Option<String>,
    pub genre: Option<Genre>,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,

    #[validate(range(min = 1, max = 100, message = "Invalid limit, it must be between 1 and 100"))]
    pub limit: u64,

    #[validate(range(min = 0, message = "Invalid offset, it must not be negative"))]
    pub offset: i64,

    #[validate(regex(
        path = "SORT_BY_REGEX",
        message = "Invalid sort_by, it must be one of title, published_year or author"
    ))]
    pub sort_by: Option<String>,

    #[validate(regex(
        path = "SORT_ORDER_REGEX",
        message = "Invalid sort_order, it must be asc or desc"
    ))]
    pub sort_order: Option<String>,
}

fn validate_year_range(filter: &BookFilter) -> Result<(), ValidationError> {
    match (filter.year_from, filter.year_to) {
        (Some(from), Some(to)) if from > to => {
            let mut err = ValidationError::new("year_range");
            err.message = Some("year_from must not be greater than year_to".into());
            Err(err)
        }
        _ => Ok(()),
    }
}

impl BookFilter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        title: Option<String>,
        author: Option<String>,
        genre: Option<Genre>,
        year_from: Option<i32>,
        year_to: Option<i32>,
        limit: Option<u64>,
        offset: Option<i64>,
        sort_by: Option<String>,
        sort_order: Option<String>,
    ) -> Result<Self, ValidationErrors> {
        let filter = Self {
            // Blank strings filter nothing.
            title: title.filter(|t| !t.trim().is_empty()),
            author: author.filter(|a| !a.trim().is_empty()),
            genre,
            year_from,
            year_to,
            limit: limit.unwrap_or(DEFAULT_LIMIT),
            offset: offset.unwrap_or(0),
            sort_by,
            sort_order: sort_order.map(|s| s.to_lowercase()),
        };

        match filter.validate() {
            Ok(_) => Ok(filter),
            Err(e) => {
                warn!("Invalid book filter: {}", e);
                Err(e)
            }
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset.max(0) as u64
    }

    /// The trusted ORDER BY body for the chosen sort key and direction.
    pub fn order_by(&self) -> String {
        let column = match self.sort_by.as_deref() {
            Some("published_year") => "books.published_year",
            Some("author") => "users.username",
            _ => "books.title",
        };
        let direction = match self.sort_order.as_deref() {
            Some("desc") => "DESC",
            _ => "ASC",
        };

        format!("{} {}", column, direction)
    }

    pub fn to_query(&self) -> Result<ComposeQuery, anyhow::Error> {
        let mut query = ComposeQuery::new("and");

        if let Some(title) = &self.title {
            query.add_item(QueryItem::new(
                "books.title",
                Value::String(format!("%{}%", escape_like(title))),
                "ilike",
            )?);
        }

        if let Some(author) = &self.author {
            query.add_item(QueryItem::new(
                "users.username",
                Value::String(format!("%{}%", escape_like(author))),
                "ilike",
            )?);
        }

        if let Some(genre) = &self.genre {
            query.add_item(QueryItem::new(
                "books.genre",
                Value::String(genre.as_str().to_string()),
                "=",
            )?);
        }

        if let Some(year_from) = self.year_from {
            query.add_item(QueryItem::new(
                "books.published_year",
                Value::Int(year_from),
                ">=",
            )?);
        }

        if let Some(year_to) = self.year_to {
            query.add_item(QueryItem::new(
                "books.published_year",
                Value::Int(year_to),
                "<=",
            )?);
        }

        Ok(query)
    }
}

/// Escape the LIKE wildcards so user input only matches literally.
fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
