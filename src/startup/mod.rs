//! Startup sequence of the service: wait for the database, migrate, then serve.

pub mod migrations;
pub mod readiness;
