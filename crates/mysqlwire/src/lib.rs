//! MySQL binary protocol client engine.
//!
//! This crate speaks the MySQL client/server protocol directly over TCP,
//! optionally upgraded to TLS. It provides:
//!
//! - Packet framing with sequence numbers and 16MB splitting
//! - Authentication (mysql_native_password, caching_sha2_password with RSA)
//! - A sans-I/O handshake state machine
//! - Text queries and prepared statements with lazy, single-pass resultsets
//! - A blocking [`Channel`] and an async [`AsyncChannel`] on asupersync
//!
//! # Protocol Overview
//!
//! Every message is framed as:
//! - 3-byte little-endian payload length + 1-byte sequence number
//! - payloads of 16MB - 1 or more are split, and an exact multiple ends
//!   with an empty frame
//! - the sequence number restarts at 0 with every command
//!
//! # Example
//!
//! ```rust,ignore
//! use mysqlwire::{Channel, MySqlConfig, Value};
//!
//! let config = MySqlConfig::new()
//!     .host("localhost")
//!     .user("app")
//!     .password("secret")
//!     .database("shop");
//!
//! let mut channel = Channel::connect(&config)?;
//! let stmt = channel.prepare("SELECT name FROM people WHERE id = ?")?;
//! let mut rows = channel.execute(&stmt, &[Value::Int64(1)])?;
//! while let Some(row) = rows.fetch_one()? {
//!     println!("{:?}", row.get_by_name("name"));
//! }
//! ```

pub mod async_connection;
pub mod auth;
pub mod config;
pub mod connection;
pub mod execute;
pub mod handshake;
pub mod protocol;
pub mod resultset;
pub mod tls;
pub mod transport;
pub mod types;

pub use async_connection::AsyncChannel;
pub use config::{MySqlConfig, SslMode, TlsConfig};
pub use connection::{Channel, PreparedStatement};
pub use execute::ChannelState;
pub use resultset::{AsyncResultset, Resultset, RowCursor};
pub use transport::{AsyncMySqlStream, AsyncTransport, MySqlStream, Transport};
pub use types::{ColumnDef, FieldType};

pub use mysqlwire_core::{
    ColumnInfo, Cx, Date, DateTime, Error, FromValue, Outcome, Result, Row, Time, Value,
};
