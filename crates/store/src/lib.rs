//! SQLite storage collaborator for quarry.
//!
//! This crate provides:
//! - `SqliteStorage`, a `quarry_core::Storage` over tokio-rusqlite
//! - Translation of filtered queries and writes into parameterized SQL

pub mod connection;
pub mod sql;
pub mod storage;

pub use connection::SqliteStorage;
