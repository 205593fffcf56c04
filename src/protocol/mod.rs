//! Client side of the management protocol.
//!
//! This module defines how the client talks to a management server: the primitive encodings,
//! the version handshake, request/response framing, and the pooled command channel every table
//! load and mutation goes through.
//!
//! # Overview
//!
//! A [`Connection`] is one duplex stream that has completed the handshake and speaks a single
//! [`ProtocolVersion`]. The [`CommandChannel`] keeps a small pool of idle connections and hands
//! each request an exclusive one, so requests and responses on a connection are strictly ordered.
//!
//! # Binary Format
//!
//! - Handshake: `[magic u32][compressed client version]`, answered by
//!   `[status][compressed agreed version]` or `[status][error code][message]`.
//! - Request: `[compressed command id][arguments...]`.
//! - Response: `[status]` then either the command's payload, followed for mutating commands by
//!   `[compressed count][compressed table id...]`, or `[compressed error code][message]`.
//! - Invalidation push (on a `LISTEN_CACHES` connection): `[compressed count][table id...]`,
//!   acknowledged by the client with a boolean that is `false` once it stops listening.
//!
//! See [`codec`] for the primitive encodings.
//!
//! # Extensibility
//!
//! Every field added or removed after the first revision is declared with a [`VersionSpan`].
//! Both sides of an exchange gate the field on the same span, so a client built for a newer
//! revision stays aligned with an older server and vice versa.
//!
//! # See Also
//!
//! - [`table`](crate::table): cached tables loaded through this channel.
//! - [`coordinator`](crate::coordinator): applies the invalidation lists commands return.
pub mod codec;
mod channel;
#[cfg(test)]
pub(crate) mod mock;
mod request;
mod response;
mod transport;
mod version;

pub use channel::{CommandChannel, Payload, Pong};
pub use codec::{CodecError, WireReader, WireWriter};
pub use request::{Args, CommandId, Request, TableId};
pub use response::{InvalidationList, ResponseStatus, ServerFailure};
pub use transport::{
    Connection, ConnectionId, Connector, HANDSHAKE_MAGIC, Interrupt, Stream, TcpConnector,
};
pub use version::{ProtocolVersion, VersionSpan};
