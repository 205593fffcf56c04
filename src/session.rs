//! Entry point for talking to one management server.
//!
//! A [`Session`] owns the command channel, the map from [`TableId`] to [`Table`], and the
//! [`Coordinator`] that keeps those tables honest. Tables are registered once, with the strategy
//! they should be cached under, and looked up by row type afterwards.
//!
//! # Example
//! ```rust,no_run
//! use mgmt_client::{Session, SessionConfig};
//!
//! let session = Session::open(SessionConfig::new("10.0.0.5:4200".parse().unwrap())).unwrap();
//! println!("round trip: {:?}", session.ping().unwrap().round_trip);
//! session.listen_for_invalidations().unwrap();
//! ```
use std::sync::{Arc, Mutex, PoisonError};

use log::info;

use crate::{
    config::SessionConfig,
    coordinator::{Coordinator, InvalidationListener},
    error::ClientError,
    protocol::{
        Args, CodecError, CommandChannel, CommandId, Connector, InvalidationList, Payload, Pong,
        ProtocolVersion, TableId, TcpConnector,
    },
    table::{
        CacheStrategy, Table, fetch_row_count, read_optional_row, read_row_set,
        registry::TableRegistry, row::Row,
    },
};

pub struct Session {
    config: SessionConfig,
    channel: Arc<CommandChannel>,
    registry: Arc<TableRegistry>,
    coordinator: Arc<Coordinator>,
    listener: Mutex<Option<InvalidationListener>>,
}

impl Session {
    /// Connects to `config.address` and checks that the server answers.
    pub fn open(config: SessionConfig) -> Result<Self, ClientError> {
        let connector = TcpConnector::new(config.address, config.connect_timeout, config.io_timeout);
        let session = Self::with_connector(config, Box::new(connector));
        let pong = session.ping()?;
        info!(
            "session open to {} speaking {} (round trip {:?})",
            session.config.address, pong.version, pong.round_trip
        );
        Ok(session)
    }

    /// Builds a session over any [`Connector`]. No connection is made until the first request.
    pub fn with_connector(config: SessionConfig, connector: Box<dyn Connector>) -> Self {
        let channel = Arc::new(CommandChannel::new(
            connector,
            config.client_version,
            config.max_idle_connections,
        ));
        let registry = Arc::new(TableRegistry::new());
        let coordinator = Arc::new(Coordinator::new(Arc::clone(&registry)));
        Self {
            config,
            channel,
            registry,
            coordinator,
            listener: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Creates the table for `R`. Each table id can be registered once per session.
    pub fn register<R: Row>(&self, strategy: CacheStrategy) -> Result<Arc<Table<R>>, ClientError> {
        let table = Arc::new(Table::new(
            strategy,
            Arc::clone(&self.channel),
            self.config.spool_dir.clone(),
        ));
        self.registry.register(Arc::clone(&table))?;
        Ok(table)
    }

    pub fn table<R: Row>(&self) -> Result<Arc<Table<R>>, ClientError> {
        self.registry.get::<R>()
    }

    fn request<T, A, D>(&self, command: CommandId, args: A, decode: D, mutating: bool) -> Result<T, ClientError>
    where
        A: FnOnce(&mut Args, ProtocolVersion) -> Result<(), CodecError>,
        D: FnOnce(&mut Payload<'_>, ProtocolVersion) -> Result<T, CodecError>,
    {
        let (value, invalidations) = self.channel.execute(command, args, decode, mutating)?;
        self.coordinator.apply(&invalidations);
        Ok(value)
    }

    /// Sends a command that returns nothing and changes nothing the client caches.
    pub fn request_update<A>(&self, command: CommandId, args: A) -> Result<(), ClientError>
    where
        A: FnOnce(&mut Args, ProtocolVersion) -> Result<(), CodecError>,
    {
        self.request(command, args, |_, _| Ok(()), false)
    }

    /// Sends a mutating command and applies the invalidations it reports before returning.
    pub fn request_update_with_invalidation<A>(&self, command: CommandId, args: A) -> Result<(), ClientError>
    where
        A: FnOnce(&mut Args, ProtocolVersion) -> Result<(), CodecError>,
    {
        self.request(command, args, |_, _| Ok(()), true)
    }

    pub fn request_int<A>(&self, command: CommandId, args: A) -> Result<i32, ClientError>
    where
        A: FnOnce(&mut Args, ProtocolVersion) -> Result<(), CodecError>,
    {
        self.request(command, args, |input, _| input.read_i32(), false)
    }

    /// Like [`request_int`](Self::request_int), for commands that also mutate server state.
    pub fn request_int_with_invalidation<A>(&self, command: CommandId, args: A) -> Result<i32, ClientError>
    where
        A: FnOnce(&mut Args, ProtocolVersion) -> Result<(), CodecError>,
    {
        self.request(command, args, |input, _| input.read_i32(), true)
    }

    pub fn request_object<R, A>(&self, command: CommandId, args: A) -> Result<Option<R>, ClientError>
    where
        R: Row,
        A: FnOnce(&mut Args, ProtocolVersion) -> Result<(), CodecError>,
    {
        self.request(command, args, |input, version| read_optional_row(input, version), false)
    }

    pub fn request_object_set<R, A>(&self, command: CommandId, args: A) -> Result<Vec<R>, ClientError>
    where
        R: Row,
        A: FnOnce(&mut Args, ProtocolVersion) -> Result<(), CodecError>,
    {
        self.request(command, args, |input, version| read_row_set(input, version), false)
    }

    pub fn ping(&self) -> Result<Pong, ClientError> {
        self.channel.ping()
    }

    /// Number of rows the server holds for `table`, whether or not it is registered here.
    pub fn row_count(&self, table: TableId) -> Result<usize, ClientError> {
        fetch_row_count(&self.channel, table)
    }

    /// Asks the server to invalidate `table` everywhere. Returns the tables it reported stale,
    /// which have already been dropped locally.
    pub fn invalidate_table(&self, table: TableId) -> Result<InvalidationList, ClientError> {
        let ((), invalidations) = self.channel.execute(
            CommandId::INVALIDATE_TABLE,
            |out, _| table.write(out),
            |_, _| Ok(()),
            true,
        )?;
        self.coordinator.apply(&invalidations);
        Ok(invalidations)
    }

    /// Drops every non-global table.
    pub fn clear_caches(&self) {
        self.coordinator.clear_caches(false);
    }

    pub fn clear_all_caches(&self) {
        self.coordinator.clear_caches(true);
    }

    /// Runs `callback` after each batch of invalidations has been applied.
    pub fn on_invalidate<F>(&self, callback: F)
    where
        F: Fn(&InvalidationList) + Send + Sync + 'static,
    {
        self.coordinator.on_invalidate(callback);
    }

    /// Starts the background listener for server-pushed invalidations. Does nothing if one is
    /// already running.
    pub fn listen_for_invalidations(&self) -> Result<(), ClientError> {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if listener.as_ref().is_some_and(|l| !l.is_finished()) {
            return Ok(());
        }
        *listener = Some(InvalidationListener::spawn(
            Arc::clone(&self.channel),
            Arc::clone(&self.coordinator),
            self.config.listener_retry_delay,
        )?);
        info!("listening for invalidations from {}", self.config.address);
        Ok(())
    }

    /// Shuts the push connection down and waits for the listener thread to exit.
    pub fn stop_listening(&self) {
        if let Some(listener) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.stop();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_listening();
    }
}
