use std::{
    fmt,
    io::{Read, Write},
};

use super::{CodecError, ProtocolVersion, WireReader, WireWriter};

/// Stable identifier of one entity table, shared by client and server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId(pub u16);

impl TableId {
    pub fn write<W: Write>(self, out: &mut WireWriter<W>) -> Result<(), CodecError> {
        out.write_compressed(self.0.into())
    }

    pub fn read<R: Read>(input: &mut WireReader<R>) -> Result<Self, CodecError> {
        let code = input.read_compressed()?;
        u16::try_from(code)
            .map(TableId)
            .map_err(|_| CodecError::CompressedOverflow(code.into()))
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table#{}", self.0)
    }
}

/// Identifier of a server command. Ids below [`CommandId::FIRST_ENTITY`] are reserved for the
/// core protocol; entity types define their own mutation commands above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandId(pub u32);

impl CommandId {
    pub const PING: CommandId = CommandId(1);
    pub const GET_TABLE: CommandId = CommandId(2);
    pub const GET_OBJECT: CommandId = CommandId(3);
    pub const GET_ROW_COUNT: CommandId = CommandId(4);
    pub const INVALIDATE_TABLE: CommandId = CommandId(5);
    pub const LISTEN_CACHES: CommandId = CommandId(6);

    pub const FIRST_ENTITY: CommandId = CommandId(100);
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            CommandId::PING => write!(f, "PING"),
            CommandId::GET_TABLE => write!(f, "GET_TABLE"),
            CommandId::GET_OBJECT => write!(f, "GET_OBJECT"),
            CommandId::GET_ROW_COUNT => write!(f, "GET_ROW_COUNT"),
            CommandId::INVALIDATE_TABLE => write!(f, "INVALIDATE_TABLE"),
            CommandId::LISTEN_CACHES => write!(f, "LISTEN_CACHES"),
            CommandId(id) => write!(f, "command#{id}"),
        }
    }
}

/// Argument writer handed to request builders.
pub type Args = WireWriter<Vec<u8>>;

/// A fully encoded request, ready to be written in one piece.
///
/// Arguments are encoded into a buffer before anything reaches the stream, so an encoding
/// failure never leaves half a request on the connection.
#[derive(Debug, PartialEq, Eq)]
pub struct Request {
    pub command: CommandId,
    args: Vec<u8>,
}

impl Request {
    pub fn new<F>(command: CommandId, version: ProtocolVersion, args: F) -> Result<Self, CodecError>
    where
        F: FnOnce(&mut Args, ProtocolVersion) -> Result<(), CodecError>,
    {
        let mut out = WireWriter::new(Vec::new());
        args(&mut out, version)?;
        Ok(Self {
            command,
            args: out.into_inner(),
        })
    }

    pub fn write_to<W: Write>(&self, out: &mut WireWriter<W>) -> Result<(), CodecError> {
        out.write_compressed(self.command.0)?;
        out.write_raw(&self.args)?;
        out.flush()
    }
}
