//! Core types for the mysqlwire protocol engine.
//!
//! - `Error` taxonomy shared by the blocking and async paths
//! - `Value` variant model with its convertibility table
//! - `Row` for decoded resultset rows
//! - `Outcome` and `Cx` re-exported from asupersync for cancel-correct operations

pub use asupersync::{Cx, Outcome};

pub mod error;
pub mod row;
pub mod value;

pub use error::{
    AuthError, AuthErrorKind, ConfigError, Error, ProtocolError, ProtocolErrorKind, Result,
    ServerError, TransportError, TransportErrorKind, TypeError, UsageError, UsageErrorKind,
};
pub use row::{ColumnInfo, Row};
pub use value::{Conversion, Date, DateTime, FromValue, Time, Value, ValueKind, conversion};
