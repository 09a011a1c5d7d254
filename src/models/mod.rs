//! Core data models for the shot upload service.
//!
//! Records map to database rows via `sqlx::FromRow` and serialize as JSON
//! via `serde`.

pub mod shot;
