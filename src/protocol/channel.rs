use std::{
    io::Read,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use log::{debug, trace};

use crate::error::ClientError;

use super::{
    Args, CodecError, CommandId, Connection, Connector, Interrupt, InvalidationList,
    ProtocolVersion, Request, ResponseStatus, ServerFailure, Stream, WireReader,
};

/// Response reader handed to payload decoders.
pub type Payload<'a> = WireReader<&'a mut dyn Read>;

type PooledConnection = Connection<Box<dyn Stream>>;

/// Answer to a [`CommandChannel::ping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong {
    /// Version negotiated on the connection that carried the ping.
    pub version: ProtocolVersion,
    pub round_trip: Duration,
}

/// Issues commands to the server over a pool of connections.
///
/// Each call checks out a connection for its whole request/response exchange. Connections that
/// fail mid-exchange are closed and dropped; the next call opens a fresh one.
pub struct CommandChannel {
    connector: Box<dyn Connector>,
    client_version: ProtocolVersion,
    max_idle: usize,
    idle: Mutex<Vec<PooledConnection>>,
}

impl CommandChannel {
    pub fn new(connector: Box<dyn Connector>, client_version: ProtocolVersion, max_idle: usize) -> Self {
        Self {
            connector,
            client_version,
            max_idle,
            idle: Mutex::new(Vec::new()),
        }
    }

    fn idle(&self) -> MutexGuard<'_, Vec<PooledConnection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a connection outside the pool, with no read timeout, for a server that pushes.
    ///
    /// The returned [`Interrupt`], when there is one, fails a read blocked on that connection.
    pub fn open_dedicated(
        &self,
    ) -> Result<(PooledConnection, Option<Box<dyn Interrupt>>), ClientError> {
        let (stream, interrupt) = self.connector.connect_idle()?;
        Ok((Connection::open(stream, self.client_version)?, interrupt))
    }

    fn checkout(&self) -> Result<PooledConnection, ClientError> {
        if let Some(conn) = self.idle().pop() {
            return Ok(conn);
        }
        let stream = self.connector.connect()?;
        Connection::open(stream, self.client_version)
    }

    fn checkin(&self, conn: PooledConnection) {
        if conn.is_closed() {
            debug!("dropping closed {}", conn.id());
            return;
        }
        let mut idle = self.idle();
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }

    pub fn idle_connections(&self) -> usize {
        self.idle().len()
    }

    /// Closes every idle connection; the next command reconnects.
    pub fn close_idle(&self) {
        self.idle().clear();
    }

    /// Sends one command and decodes its response.
    ///
    /// `args` encodes the arguments and `decode` the success payload, both at the connection's
    /// negotiated version. When `mutating` is set, the invalidation list that trails the payload
    /// is decoded and returned; otherwise the returned list is empty.
    pub fn execute<T, A, D>(
        &self,
        command: CommandId,
        args: A,
        decode: D,
        mutating: bool,
    ) -> Result<(T, InvalidationList), ClientError>
    where
        A: FnOnce(&mut Args, ProtocolVersion) -> Result<(), CodecError>,
        D: FnOnce(&mut Payload<'_>, ProtocolVersion) -> Result<T, CodecError>,
    {
        let mut conn = self.checkout()?;
        let request = match Request::new(command, conn.version(), args) {
            Ok(request) => request,
            Err(e) => {
                self.checkin(conn);
                return Err(e.into());
            }
        };
        trace!("{} -> {command}", conn.id());

        let res = conn.exchange(|conn| {
            let version = conn.version();
            request.write_to(&mut conn.writer())?;

            let mut input = conn.reader();
            let status = ResponseStatus::read(&mut input)?;
            trace!("{command} <- {status:?}");
            match status {
                ResponseStatus::Done => {
                    let value = decode(&mut input, version)?;
                    let invalidations = if mutating {
                        InvalidationList::read(&mut input)?
                    } else {
                        InvalidationList::new()
                    };
                    Ok((value, invalidations))
                }
                ResponseStatus::Error | ResponseStatus::Fatal => {
                    let failure = ServerFailure::read(&mut input)?;
                    if status == ResponseStatus::Fatal {
                        conn.close();
                    }
                    Err(ClientError::Server {
                        command,
                        code: failure.code,
                        message: failure.message,
                    })
                }
            }
        });

        self.checkin(conn);
        res
    }

    /// Round trip of an empty command.
    pub fn ping(&self) -> Result<Pong, ClientError> {
        let started = Instant::now();
        let (version, _) = self.execute(
            CommandId::PING,
            |_, _| Ok(()),
            |_, version| Ok(version),
            false,
        )?;
        Ok(Pong {
            version,
            round_trip: started.elapsed(),
        })
    }
}
