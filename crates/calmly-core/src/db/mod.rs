//! Database layer for Calmly
//!
//! Free functions over a `rusqlite::Connection`. Callers decide the
//! transaction boundary; every function works the same on a plain connection
//! or inside a `Transaction`.

mod connection;
pub(crate) mod dead_letters;
mod migrations;
pub(crate) mod outbox;
pub(crate) mod records;
pub(crate) mod sync_state;

use std::fmt::Display;
use std::str::FromStr;

use rusqlite::types::Type;

pub use connection::Database;
pub(crate) use connection::open_reader;

/// Parse a text column into a typed value, surfacing failures as conversion errors.
fn parse_column<T>(index: usize, value: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value.parse().map_err(|error: T::Err| {
        rusqlite::Error::FromSqlConversionFailure(index, Type::Text, error.to_string().into())
    })
}
