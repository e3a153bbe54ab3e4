//! Users and books, and the queries behind them.

use crate::model::init_sql::{BOOKS_TABLE, USERS_TABLE};
use crate::query_builder::sql_builder::{bind_values, ComposeQuery, Value};
use anyhow::Ok as AnyOk;
use chrono::{DateTime, Utc};
use log::{debug, info};
use poem_openapi::{Enum, Object};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgDatabaseError;
use std::error::Error;
use std::fmt;
use validator::{Validate, ValidationError};

pub const NAME_MAX_LENGTH: u64 = 64;
pub const EMAIL_MAX_LENGTH: u64 = 255;
pub const TITLE_MAX_LENGTH: u64 = 255;
// bcrypt only looks at the first 72 bytes.
pub const PASSWORD_MAX_BYTES: usize = 72;

const UNIQUE_VIOLATION: &str = "23505";

pub const USERNAME_TAKEN: &str = "This username is already in use";
pub const EMAIL_TAKEN: &str = "This email is already in use";

fn validate_password_bytes(password: &str) -> Result<(), ValidationError> {
    if password.len() > PASSWORD_MAX_BYTES {
        let mut err = ValidationError::new("password_length");
        err.message = Some("The password must be at most 72 bytes long.".into());
        return Err(err);
    }

    Ok(())
}

/// Raised when a unique column already holds the value.
#[derive(Debug)]
pub struct DuplicateError {
    details: String,
}

impl DuplicateError {
    pub fn new(msg: &str) -> DuplicateError {
        DuplicateError {
            details: msg.to_string(),
        }
    }
}

impl fmt::Display for DuplicateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.details)
    }
}

impl Error for DuplicateError {}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Enum)]
pub enum Genre {
    #[oai(rename = "Fiction")]
    #[serde(rename = "Fiction")]
    Fiction,
    #[oai(rename = "Non-Fiction")]
    #[serde(rename = "Non-Fiction")]
    NonFiction,
    #[oai(rename = "Science")]
    #[serde(rename = "Science")]
    Science,
    #[oai(rename = "History")]
    #[serde(rename = "History")]
    History,
}

impl Genre {
    pub fn as_str(&self) -> &'static str {
        match self {
            Genre::Fiction => "Fiction",
            Genre::NonFiction => "Non-Fiction",
            Genre::Science => "Science",
            Genre::History => "History",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub hashed_password: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Object, Validate)]
pub struct UserCreate {
    #[validate(length(
        max = "NAME_MAX_LENGTH",
        message = "The length of username must be at most 64."
    ))]
    pub username: String,

    #[validate(length(
        max = "NAME_MAX_LENGTH",
        message = "The length of first_name must be at most 64."
    ))]
    pub first_name: String,

    #[validate(length(
        max = "NAME_MAX_LENGTH",
        message = "The length of last_name must be at most 64."
    ))]
    pub last_name: String,

    #[validate(email(message = "The email is not a valid email address."))]
    #[validate(length(
        max = "EMAIL_MAX_LENGTH",
        message = "The length of email must be at most 255."
    ))]
    pub email: String,

    #[validate(custom = "validate_password_bytes")]
    #[oai(write_only)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Object)]
pub struct UserLogin {
    pub username: String,
    #[oai(write_only)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Object)]
pub struct UserOut {
    pub id: i32,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl From<User> for UserOut {
    fn from(user: User) -> Self {
        UserOut {
            id: user.id,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
        }
    }
}

impl User {
    pub async fn get_by_username(
        pool: &sqlx::PgPool,
        username: &str,
    ) -> Result<Option<User>, anyhow::Error> {
        let sql_str = format!("SELECT * FROM {} WHERE username = $1", USERS_TABLE);
        let user = sqlx::query_as::<_, User>(&sql_str)
            .bind(username)
            .fetch_optional(pool)
            .await?;

        AnyOk(user)
    }

    /// Insert a new user. Duplicate usernames and emails come back as a [`DuplicateError`].
    pub async fn register(
        pool: &sqlx::PgPool,
        user_in: &UserCreate,
        hashed_password: &str,
    ) -> Result<User, anyhow::Error> {
        if User::get_by_username(pool, &user_in.username).await?.is_some() {
            return Err(DuplicateError::new(USERNAME_TAKEN).into());
        }

        let sql_str = format!(
            "INSERT INTO {} (username, first_name, last_name, email, hashed_password) VALUES ($1, $2, $3, $4, $5) RETURNING *",
            USERS_TABLE
        );
        let result = sqlx::query_as::<_, User>(&sql_str)
            .bind(&user_in.username)
            .bind(&user_in.first_name)
            .bind(&user_in.last_name)
            .bind(&user_in.email)
            .bind(hashed_password)
            .fetch_one(pool)
            .await;

        match result {
            Ok(user) => {
                info!("Registered a new user: {}", user.username);
                AnyOk(user)
            }
            Err(sqlx::Error::Database(db_err)) => {
                // A concurrent insert can still win the username race.
                let duplicate = db_err
                    .try_downcast_ref::<PgDatabaseError>()
                    .filter(|e| e.code() == UNIQUE_VIOLATION)
                    .map(|e| match e.constraint() {
                        Some("users_username_key") => USERNAME_TAKEN,
                        _ => EMAIL_TAKEN,
                    });

                match duplicate {
                    Some(msg) => Err(DuplicateError::new(msg).into()),
                    None => Err(sqlx::Error::Database(db_err).into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Object, Validate)]
pub struct BookCreate {
    #[validate(length(
        max = "TITLE_MAX_LENGTH",
        message = "The length of title must be at most 255."
    ))]
    pub title: String,

    pub genre: Genre,

    pub published_year: i32,
}

/// Partial update, absent fields keep their stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Object, Validate)]
pub struct BookUpdate {
    #[validate(length(
        max = "TITLE_MAX_LENGTH",
        message = "The length of title must be at most 255."
    ))]
    pub title: Option<String>,

    pub genre: Option<Genre>,

    pub published_year: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Object)]
pub struct BookOut {
    #[oai(read_only)]
    pub id: i32,
    pub title: String,
    pub genre: String,
    pub published_year: i32,
    pub author: UserOut,
}

/// A book joined with its author, as one flat row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BookRow {
    pub id: i32,
    pub title: String,
    pub genre: String,
    pub published_year: i32,
    pub user_id: i32,
    pub author_username: String,
    pub author_first_name: String,
    pub author_last_name: String,
    pub author_email: String,
}

impl From<BookRow> for BookOut {
    fn from(row: BookRow) -> Self {
        BookOut {
            id: row.id,
            title: row.title,
            genre: row.genre,
            published_year: row.published_year,
            author: UserOut {
                id: row.user_id,
                username: row.author_username,
                first_name: row.author_first_name,
                last_name: row.author_last_name,
                email: row.author_email,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Object)]
pub struct RecordResponse<S>
where
    S: Serialize
        + std::fmt::Debug
        + Send
        + Sync
        + poem_openapi::types::Type
        + poem_openapi::types::ParseFromJSON
        + poem_openapi::types::ToJSON,
{
    /// data
    pub records: Vec<S>,
    /// total number of matching records
    pub total: u64,
    /// default 10
    pub limit: u64,
    /// default 0
    pub offset: u64,
}

pub struct Book;

impl Book {
    /// The select list every book query shares. `{source}` is `books` or a CTE over it.
    fn select_from(source: &str) -> String {
        format!(
            "SELECT {source}.id, {source}.title, {source}.genre, {source}.published_year, {source}.user_id, \
             {users}.username AS author_username, {users}.first_name AS author_first_name, \
             {users}.last_name AS author_last_name, {users}.email AS author_email \
             FROM {source} JOIN {users} ON {users}.id = {source}.user_id",
            source = source,
            users = USERS_TABLE
        )
    }

    /// Fetch one page of books matching `query`.
    ///
    /// # Arguments
    /// - `query`: The filter, fields must be qualified with `books.` or `users.`.
    /// - `order_by`: A trusted ORDER BY body, such as `books.title ASC`.
    pub async fn get_records(
        pool: &sqlx::PgPool,
        query: &ComposeQuery,
        order_by: &str,
        limit: u64,
        offset: u64,
    ) -> Result<RecordResponse<BookOut>, anyhow::Error> {
        let mut params: Vec<Value> = vec![];
        let where_str = query.to_where_clause(&mut params);

        let sql_str = format!(
            "{} WHERE {} ORDER BY {}, {}.id ASC LIMIT {} OFFSET {}",
            Book::select_from(BOOKS_TABLE),
            where_str,
            order_by,
            BOOKS_TABLE,
            limit,
            offset
        );
        debug!("Fetching books with: {}", sql_str);

        let records = bind_values(sqlx::query_as::<_, BookRow>(&sql_str), &params)
            .fetch_all(pool)
            .await?;

        let count_str = format!(
            "SELECT COUNT(*) FROM {books} JOIN {users} ON {users}.id = {books}.user_id WHERE {}",
            where_str,
            books = BOOKS_TABLE,
            users = USERS_TABLE
        );
        let total = bind_values(sqlx::query_as::<_, (i64,)>(&count_str), &params)
            .fetch_one(pool)
            .await?;

        AnyOk(RecordResponse {
            records: records.into_iter().map(BookOut::from).collect(),
            total: total.0 as u64,
            limit,
            offset,
        })
    }

    pub async fn get(pool: &sqlx::PgPool, id: i32) -> Result<Option<BookOut>, anyhow::Error> {
        let sql_str = format!("{} WHERE {}.id = $1", Book::select_from(BOOKS_TABLE), BOOKS_TABLE);
        let row = sqlx::query_as::<_, BookRow>(&sql_str)
            .bind(id)
            .fetch_optional(pool)
            .await?;

        AnyOk(row.map(BookOut::from))
    }

    /// The id of the user who created the book, `None` if the book doesn't exist.
    pub async fn get_owner(pool: &sqlx::PgPool, id: i32) -> Result<Option<i32>, anyhow::Error> {
        let sql_str = format!("SELECT user_id FROM {} WHERE id = $1", BOOKS_TABLE);
        let owner = sqlx::query_as::<_, (Option<i32>,)>(&sql_str)
            .bind(id)
            .fetch_optional(pool)
            .await?;

        AnyOk(owner.and_then(|o| o.0))
    }

    pub async fn insert(
        pool: &sqlx::PgPool,
        book_in: &BookCreate,
        user_id: i32,
    ) -> Result<BookOut, anyhow::Error> {
        let sql_str = format!(
            "WITH inserted AS (INSERT INTO {} (title, genre, published_year, user_id) VALUES ($1, $2, $3, $4) RETURNING *) {}",
            BOOKS_TABLE,
            Book::select_from("inserted")
        );
        let row = sqlx::query_as::<_, BookRow>(&sql_str)
            .bind(&book_in.title)
            .bind(book_in.genre.as_str())
            .bind(book_in.published_year)
            .bind(user_id)
            .fetch_one(pool)
            .await?;

        AnyOk(row.into())
    }

    pub async fn update(
        pool: &sqlx::PgPool,
        id: i32,
        book_in: &BookUpdate,
    ) -> Result<Option<BookOut>, anyhow::Error> {
        let sql_str = format!(
            "WITH updated AS (UPDATE {} SET title = COALESCE($1, title), genre = COALESCE($2, genre), published_year = COALESCE($3, published_year) WHERE id = $4 RETURNING *) {}",
            BOOKS_TABLE,
            Book::select_from("updated")
        );
        let row = sqlx::query_as::<_, BookRow>(&sql_str)
            .bind(&book_in.title)
            .bind(book_in.genre.map(|g| g.as_str()))
            .bind(book_in.published_year)
            .bind(id)
            .fetch_optional(pool)
            .await?;

        AnyOk(row.map(BookOut::from))
    }

    /// Returns whether a row was deleted.
    pub async fn delete(pool: &sqlx::PgPool, id: i32) -> Result<bool, anyhow::Error> {
        let sql_str = format!("DELETE FROM {} WHERE id = $1", BOOKS_TABLE);
        let result = sqlx::query(&sql_str).bind(id).execute(pool).await?;

        AnyOk(result.rows_affected() > 0)
    }
}
