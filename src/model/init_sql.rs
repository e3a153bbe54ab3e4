//! SQL initialization strings for creating tables.

pub const USERS_TABLE: &str = "users";
pub const BOOKS_TABLE: &str = "books";

/// The whole schema, written into the initial migration. Every statement is guarded with
/// `IF NOT EXISTS` so the migration also applies cleanly to a database created by hand.
pub const INITIAL_SCHEMA: &str = r#"-- Initial schema of the bookshelf service.

CREATE TABLE IF NOT EXISTS users (
    id SERIAL PRIMARY KEY,
    username VARCHAR(64) NOT NULL,
    first_name VARCHAR(64) NOT NULL,
    last_name VARCHAR(64) NOT NULL,
    email VARCHAR(255) NOT NULL,
    hashed_password VARCHAR(255) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT users_username_key UNIQUE (username),
    CONSTRAINT users_email_key UNIQUE (email)
);

CREATE TABLE IF NOT EXISTS books (
    id SERIAL PRIMARY KEY,
    title VARCHAR(255) NOT NULL,
    genre VARCHAR(32) NOT NULL,
    published_year INTEGER NOT NULL,
    user_id INTEGER REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS ix_books_title ON books (title);
CREATE INDEX IF NOT EXISTS ix_books_user_id ON books (user_id);
"#;
