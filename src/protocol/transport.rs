use std::{
    fmt,
    io::{self, BufReader, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use log::{debug, info, warn};

use crate::error::ClientError;

use super::{ProtocolVersion, ResponseStatus, ServerFailure, WireReader, WireWriter};

/// First four bytes a client sends on every new connection ("MGMT").
pub const HANDSHAKE_MAGIC: u32 = 0x4D47_4D54;

/// Duplex byte stream a [`Connection`] runs over.
pub trait Stream: Read + Write + Send {}

impl<T: Read + Write + Send> Stream for T {}

/// Fails any read or write blocked on a stream, from another thread.
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

impl Interrupt for TcpStream {
    fn interrupt(&self) {
        if let Err(e) = self.shutdown(Shutdown::Both) {
            debug!("shutdown of idle stream failed: {e}");
        }
    }
}

/// Opens new streams to the server.
pub trait Connector: Send + Sync {
    fn connect(&self) -> io::Result<Box<dyn Stream>>;

    /// Opens a stream that may wait indefinitely for the server to speak first, with a handle
    /// that unblocks it when the connector can provide one.
    fn connect_idle(&self) -> io::Result<(Box<dyn Stream>, Option<Box<dyn Interrupt>>)> {
        Ok((self.connect()?, None))
    }
}

/// Dials the server over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: SocketAddr,
    connect_timeout: Duration,
    io_timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new(address: SocketAddr, connect_timeout: Duration, io_timeout: Option<Duration>) -> Self {
        Self {
            address,
            connect_timeout,
            io_timeout,
        }
    }

    fn dial(&self, read_timeout: Option<Duration>) -> io::Result<TcpStream> {
        let stream = TcpStream::connect_timeout(&self.address, self.connect_timeout)?;
        stream.set_read_timeout(read_timeout)?;
        stream.set_write_timeout(self.io_timeout)?;
        stream.set_nodelay(true)?;
        debug!("connected to {}", self.address);
        Ok(stream)
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> io::Result<Box<dyn Stream>> {
        Ok(Box::new(self.dial(self.io_timeout)?))
    }

    fn connect_idle(&self) -> io::Result<(Box<dyn Stream>, Option<Box<dyn Interrupt>>)> {
        let stream = self.dial(None)?;
        let interrupt = stream.try_clone()?;
        Ok((Box::new(stream), Some(Box::new(interrupt))))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One logical duplex stream to the server, speaking a single negotiated protocol version.
///
/// A connection carries one request/response exchange at a time. Once [`close`](Self::close)d it
/// must not be used again; the owner drops it and opens a new one for the next request.
pub struct Connection<S: Read + Write> {
    id: ConnectionId,
    stream: BufReader<S>,
    version: ProtocolVersion,
    closed: bool,
}

impl<S: Read + Write> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("closed", &self.closed)
            .finish()
    }
}

impl<S: Read + Write> Connection<S> {
    /// Performs the version handshake over a freshly opened stream.
    ///
    /// The server answers with the version both sides will use, which is never newer than
    /// `client_version`.
    pub fn open(stream: S, client_version: ProtocolVersion) -> Result<Self, ClientError> {
        let mut conn = Self {
            id: ConnectionId::next(),
            stream: BufReader::new(stream),
            version: client_version,
            closed: false,
        };

        let mut out = conn.writer();
        out.write_u32(HANDSHAKE_MAGIC)?;
        out.write_compressed(client_version.code())?;
        out.flush()?;

        let mut input = conn.reader();
        match ResponseStatus::read(&mut input)? {
            ResponseStatus::Done => {
                let code = input.read_compressed()?;
                let agreed = ProtocolVersion::from_code(code)
                    .map_err(|_| ClientError::Handshake(format!("server chose unknown version code {code}")))?;
                if agreed > client_version {
                    return Err(ClientError::Handshake(format!(
                        "server chose {agreed}, newer than the offered {client_version}"
                    )));
                }
                conn.version = agreed;
            }
            ResponseStatus::Error | ResponseStatus::Fatal => {
                let failure = ServerFailure::read(&mut input)?;
                return Err(ClientError::Handshake(failure.message));
            }
        }

        info!("{} speaking protocol {}", conn.id, conn.version);
        Ok(conn)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Marks the connection unusable. The stream itself is released when the connection drops.
    pub fn close(&mut self) {
        if !self.closed {
            debug!("closing {}", self.id);
            self.closed = true;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn reader(&mut self) -> WireReader<&mut dyn Read> {
        let stream: &mut dyn Read = &mut self.stream;
        WireReader::new(stream)
    }

    pub fn writer(&mut self) -> WireWriter<&mut dyn Write> {
        let stream: &mut dyn Write = self.stream.get_mut();
        WireWriter::new(stream)
    }

    /// Runs `exchange` against this connection, closing it if the exchange fails with anything
    /// other than a server-reported error.
    pub fn exchange<T, F>(&mut self, exchange: F) -> Result<T, ClientError>
    where
        F: FnOnce(&mut Self) -> Result<T, ClientError>,
    {
        if self.closed {
            return Err(ClientError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("{} is closed", self.id),
            )));
        }

        let res = exchange(self);
        if let Err(err) = &res {
            if !matches!(err, ClientError::Server { .. }) {
                warn!("{} unusable after failed exchange: {err}", self.id);
                self.close();
            }
        }
        res
    }
}
