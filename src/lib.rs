//! Client library for a management server that owns a set of entity tables.
//!
//! A [`Session`] talks to one server over a small binary protocol, keeps client-side copies of
//! the tables registered with it, and drops those copies whenever the server reports them stale.
//!
//! - [`protocol`]: wire encodings, handshake and the pooled command channel.
//! - [`table`]: entity rows and the caching strategies tables are held under.
//! - [`coordinator`]: applies invalidation lists and listens for server pushes.
//! - [`capability`]: optional removal, disabling and password contracts for entities.
pub mod capability;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod session;
pub mod table;

pub use config::SessionConfig;
pub use error::{ClientError, InvariantViolation, Result};
pub use protocol::{CommandId, InvalidationList, ProtocolVersion, TableId, VersionSpan};
pub use session::Session;
pub use table::{
    CacheStrategy, Table, TableState,
    row::{ColumnSpec, ColumnType, Direction, IndexKind, OrderBy, RawRow, Row, RowKey, Value},
};
