//! In-process server side of the protocol, for tests.
//!
//! [`MockServer`] accepts TCP connections on a loopback port and serves each one from its own
//! thread, the way a real management server handles a client: handshake first, then one
//! request/response exchange at a time.
use std::{
    collections::HashMap,
    io::{self, Cursor, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        mpsc::{self, Receiver, Sender},
    },
    thread,
    time::{Duration, Instant},
};

use log::{info, trace, warn};

use crate::table::row::{ColumnSpec, RawRow, Row, read_value, values, write_columns};

use super::{
    CodecError, CommandId, HANDSHAKE_MAGIC, InvalidationList, ProtocolVersion, ResponseStatus,
    ServerFailure, TableId, WireReader, WireWriter,
};

/// In-memory duplex stream: reads come from a prepared script, writes are captured.
pub struct ScriptedStream {
    input: Cursor<Vec<u8>>,
    output: Vec<u8>,
}

impl ScriptedStream {
    pub fn new(input: Vec<u8>) -> Self {
        Self {
            input: Cursor::new(input),
            output: Vec::new(),
        }
    }

    pub fn written(&self) -> Vec<u8> {
        self.output.clone()
    }
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Bytes of a successful handshake answer.
pub fn handshake_reply(version: ProtocolVersion) -> Vec<u8> {
    let mut out = WireWriter::new(Vec::new());
    ResponseStatus::Done.write(&mut out).unwrap();
    out.write_compressed(version.code()).unwrap();
    out.into_inner()
}

pub enum Reply {
    Done {
        payload: Vec<u8>,
        invalidations: Option<InvalidationList>,
    },
    Error(ServerFailure),
    Fatal(ServerFailure),
}

impl Reply {
    pub fn done() -> Self {
        Reply::Done {
            payload: Vec::new(),
            invalidations: None,
        }
    }

    pub fn invalidating(tables: &[TableId]) -> Self {
        Reply::Done {
            payload: Vec::new(),
            invalidations: Some(tables.iter().copied().collect()),
        }
    }

    pub fn error(code: u32, message: &str) -> Self {
        Reply::Error(ServerFailure {
            code,
            message: message.to_string(),
        })
    }
}

pub type Handler = Arc<
    dyn Fn(&mut WireReader<&mut dyn Read>, ProtocolVersion, &mut MockState) -> Result<Reply, CodecError>
        + Send
        + Sync,
>;

struct MockTable {
    columns: &'static [ColumnSpec],
    key_column: usize,
    rows: Vec<RawRow>,
}

/// Lets a test observe a `GET_TABLE` in flight and decide when it completes.
pub struct LoadHold {
    pub started: Receiver<()>,
    pub release: Sender<()>,
}

struct LoadGate {
    started: Sender<()>,
    release: Receiver<()>,
}

pub struct MockState {
    pub version: ProtocolVersion,
    pub oldest: ProtocolVersion,
    pub load_delay: Duration,
    tables: HashMap<TableId, MockTable>,
    counts: HashMap<CommandId, usize>,
    handlers: HashMap<CommandId, Handler>,
    dropped_loads: usize,
    gate: Option<LoadGate>,
}

impl MockState {
    pub fn rows_mut(&mut self, table: TableId) -> &mut Vec<RawRow> {
        &mut self
            .tables
            .get_mut(&table)
            .expect("table is served by the mock")
            .rows
    }
}

pub struct MockServer {
    address: SocketAddr,
    state: Arc<Mutex<MockState>>,
    listeners: Arc<Mutex<Vec<Sender<InvalidationList>>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockServer {
    pub fn start(version: ProtocolVersion) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(MockState {
            version,
            oldest: ProtocolVersion::OLDEST,
            load_delay: Duration::ZERO,
            tables: HashMap::new(),
            counts: HashMap::new(),
            handlers: HashMap::new(),
            dropped_loads: 0,
            gate: None,
        }));
        let listeners = Arc::new(Mutex::new(Vec::new()));

        let server = Self {
            address,
            state: Arc::clone(&state),
            listeners: Arc::clone(&listeners),
        };

        info!("mock server listening at {address}");
        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let state = Arc::clone(&state);
                        let listeners = Arc::clone(&listeners);
                        thread::spawn(move || {
                            if let Err(e) = handle_connection(stream, state, listeners) {
                                trace!("mock connection ended: {e}");
                            }
                        });
                    }
                    Err(e) => warn!("broken connection: {e:?}"),
                }
            }
        });

        server
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    pub fn serve<R: Row>(&self, rows: &[R]) {
        let table = MockTable {
            columns: R::COLUMNS,
            key_column: R::KEY_COLUMN,
            rows: rows.iter().map(values).collect(),
        };
        self.state().tables.insert(R::TABLE_ID, table);
    }

    /// Serves rows keyed by their first column.
    pub fn serve_raw(&self, table: TableId, columns: &'static [ColumnSpec], rows: Vec<RawRow>) {
        let table_rows = MockTable {
            columns,
            key_column: 0,
            rows,
        };
        self.state().tables.insert(table, table_rows);
    }

    pub fn on_command<F>(&self, command: CommandId, handler: F)
    where
        F: Fn(&mut WireReader<&mut dyn Read>, ProtocolVersion, &mut MockState) -> Result<Reply, CodecError>
            + Send
            + Sync
            + 'static,
    {
        self.state().handlers.insert(command, Arc::new(handler));
    }

    pub fn count(&self, command: CommandId) -> usize {
        self.state().counts.get(&command).copied().unwrap_or(0)
    }

    /// The next `n` table loads kill the connection instead of answering.
    pub fn drop_loads(&self, n: usize) {
        self.state().dropped_loads = n;
    }

    /// Holds the next table load until the returned handle releases it.
    pub fn hold_next_load(&self) -> LoadHold {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        self.state().gate = Some(LoadGate {
            started: started_tx,
            release: release_rx,
        });
        LoadHold {
            started: started_rx,
            release: release_tx,
        }
    }

    /// Pushes an invalidation to every listening client. Returns how many received it.
    pub fn push(&self, tables: &[TableId]) -> usize {
        let list: InvalidationList = tables.iter().copied().collect();
        let mut listeners = lock(&self.listeners);
        listeners.retain(|tx| tx.send(list.clone()).is_ok());
        listeners.len()
    }

    /// Waits until `n` clients are listening for pushes.
    pub fn wait_for_listeners(&self, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while lock(&self.listeners).len() < n {
            assert!(Instant::now() < deadline, "listeners never connected");
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Disconnects every listening client.
    pub fn drop_listeners(&self) {
        lock(&self.listeners).clear();
    }
}

fn handle_connection(
    stream: TcpStream,
    state: Arc<Mutex<MockState>>,
    listeners: Arc<Mutex<Vec<Sender<InvalidationList>>>>,
) -> Result<(), CodecError> {
    let mut input = WireReader::new(stream.try_clone()?);
    let mut out = WireWriter::new(stream);

    if input.read_u32()? != HANDSHAKE_MAGIC {
        return Ok(());
    }
    let requested = ProtocolVersion::from_code(input.read_compressed()?)?;
    let (server_version, oldest) = {
        let state = lock(&state);
        (state.version, state.oldest)
    };
    if requested < oldest {
        ResponseStatus::Error.write(&mut out)?;
        ServerFailure {
            code: 1,
            message: format!("client protocol {requested} is no longer supported"),
        }
        .write(&mut out)?;
        return out.flush();
    }
    let version = requested.min(server_version);
    ResponseStatus::Done.write(&mut out)?;
    out.write_compressed(version.code())?;
    out.flush()?;

    loop {
        let command = CommandId(input.read_compressed()?);
        trace!("mock received {command}");
        *lock(&state).counts.entry(command).or_default() += 1;

        let mut payload = WireWriter::new(Vec::new());
        let reply = match command {
            CommandId::PING => Reply::done(),
            CommandId::GET_TABLE => {
                let table = TableId::read(&mut input)?;
                let (delay, gate, drop) = {
                    let mut state = lock(&state);
                    let drop = state.dropped_loads > 0;
                    if drop {
                        state.dropped_loads -= 1;
                    }
                    (state.load_delay, state.gate.take(), drop)
                };
                if drop {
                    return Ok(());
                }
                if let Some(gate) = gate {
                    let _ = gate.started.send(());
                    let _ = gate.release.recv();
                }
                thread::sleep(delay);

                let state = lock(&state);
                match state.tables.get(&table) {
                    Some(t) => {
                        payload.write_len(t.rows.len())?;
                        for row in &t.rows {
                            write_columns(t.columns, |i| row.0.get(i).cloned(), &mut payload, version)?;
                        }
                        Reply::Done {
                            payload: payload.into_inner(),
                            invalidations: None,
                        }
                    }
                    None => Reply::error(2, &format!("unknown {table}")),
                }
            }
            CommandId::GET_OBJECT => {
                let table = TableId::read(&mut input)?;
                let state = lock(&state);
                match state.tables.get(&table) {
                    Some(t) => {
                        let key = read_value(t.columns[t.key_column].ty, &mut input)?;
                        match t.rows.iter().find(|row| row.0.get(t.key_column) == Some(&key)) {
                            Some(row) => {
                                payload.write_bool(true)?;
                                write_columns(t.columns, |i| row.0.get(i).cloned(), &mut payload, version)?;
                            }
                            None => payload.write_bool(false)?,
                        }
                        Reply::Done {
                            payload: payload.into_inner(),
                            invalidations: None,
                        }
                    }
                    None => Reply::error(2, &format!("unknown {table}")),
                }
            }
            CommandId::GET_ROW_COUNT => {
                let table = TableId::read(&mut input)?;
                let state = lock(&state);
                match state.tables.get(&table) {
                    Some(t) => {
                        payload.write_len(t.rows.len())?;
                        Reply::Done {
                            payload: payload.into_inner(),
                            invalidations: None,
                        }
                    }
                    None => Reply::error(2, &format!("unknown {table}")),
                }
            }
            CommandId::INVALIDATE_TABLE => {
                let table = TableId::read(&mut input)?;
                let list: InvalidationList = [table].into_iter().collect();
                lock(&listeners).retain(|tx| tx.send(list.clone()).is_ok());
                Reply::Done {
                    payload: Vec::new(),
                    invalidations: Some(list),
                }
            }
            CommandId::LISTEN_CACHES => {
                ResponseStatus::Done.write(&mut out)?;
                out.flush()?;
                let (tx, rx) = mpsc::channel();
                lock(&listeners).push(tx);
                for list in rx {
                    list.write(&mut out)?;
                    out.flush()?;
                    if !input.read_bool()? {
                        return Ok(());
                    }
                }
                return Ok(());
            }
            other => {
                let handler = lock(&state).handlers.get(&other).cloned();
                match handler {
                    Some(handler) => {
                        let stream: &mut dyn Read = input.get_mut();
                        let mut args = WireReader::new(stream);
                        let mut state = lock(&state);
                        handler(&mut args, version, &mut *state)?
                    }
                    None => Reply::error(1, &format!("unsupported {other}")),
                }
            }
        };

        match reply {
            Reply::Done {
                payload,
                invalidations,
            } => {
                ResponseStatus::Done.write(&mut out)?;
                out.write_raw(&payload)?;
                if let Some(list) = invalidations {
                    list.write(&mut out)?;
                }
            }
            Reply::Error(failure) => {
                ResponseStatus::Error.write(&mut out)?;
                failure.write(&mut out)?;
            }
            Reply::Fatal(failure) => {
                ResponseStatus::Fatal.write(&mut out)?;
                failure.write(&mut out)?;
                return out.flush();
            }
        }
        out.flush()?;
    }
}
