//! # courier-store
//!
//! Local cache of server records, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection`, typed helpers for reading and writing records,
//! and an implementation of [`courier_shared::LocalSource`] so queries can
//! page through cached data while the server request is in flight.

pub mod database;
pub mod migrations;
pub mod records;
pub mod source;

mod error;

pub use database::Database;
pub use error::StoreError;
