//! Client-side tables of entity rows.
//!
//! A [`Table`] holds the rows of one entity type and decides, through its [`CacheStrategy`],
//! whether they are kept in memory, spooled to disk, or fetched on every access. Whatever the
//! strategy, a table is loaded by at most one thread at a time: see [`TableState`].
//!
//! # Strategies
//!
//! - [`CacheStrategy::Global`]: loaded once and kept until explicitly cleared or invalidated by
//!   the server. Survives [`Session::clear_caches`](crate::Session::clear_caches).
//! - [`CacheStrategy::Cached`]: loaded on first access and dropped on any invalidation or clear.
//! - [`CacheStrategy::Spooled`]: rows live in fixed-length records in a private temporary file;
//!   only keys and record positions stay in memory.
//! - [`CacheStrategy::Uncached`]: every call is a round trip to the server.
//!
//! # See Also
//! - [`row`]: the entity contract and column declarations.
//! - [`Coordinator`](crate::coordinator::Coordinator): invalidates tables named by the server.
use std::{io::Read, path::PathBuf, sync::Arc, time::Instant};

use log::debug;

use crate::{
    error::ClientError,
    protocol::{CodecError, CommandChannel, CommandId, ProtocolVersion, TableId, WireReader},
};

#[cfg(test)]
pub(crate) mod fixtures;
pub mod registry;
pub mod row;
mod snapshot;
mod spool;
mod state;

use row::{Row, Value};
use snapshot::{MemoryStore, Snapshot};
use spool::{SpoolStore, SpoolWriter};
use state::LoadCell;

pub use state::TableState;

/// Upper bound on rows preallocated from a server-supplied count.
const PREALLOCATE_ROWS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    Global,
    Cached,
    Spooled { record_length: usize },
    Uncached,
}

/// Decodes `[compressed count][row...]`.
pub(crate) fn read_row_set<R: Row, Rd: Read>(
    input: &mut WireReader<Rd>,
    version: ProtocolVersion,
) -> Result<Vec<R>, CodecError> {
    let count = input.read_len()?;
    let mut rows = Vec::with_capacity(count.min(PREALLOCATE_ROWS));
    for _ in 0..count {
        rows.push(R::read(input, version)?);
    }
    Ok(rows)
}

/// Decodes `[bool present][row]`.
pub(crate) fn read_optional_row<R: Row, Rd: Read>(
    input: &mut WireReader<Rd>,
    version: ProtocolVersion,
) -> Result<Option<R>, CodecError> {
    if input.read_bool()? {
        R::read(input, version).map(Some)
    } else {
        Ok(None)
    }
}

/// Asks the server how many rows `table` holds.
pub(crate) fn fetch_row_count(channel: &CommandChannel, table: TableId) -> Result<usize, ClientError> {
    let (count, _) = channel.execute(
        CommandId::GET_ROW_COUNT,
        |out, _| table.write(out),
        |input, _| input.read_len(),
        false,
    )?;
    Ok(count)
}

/// The rows of one entity type.
pub struct Table<R: Row> {
    strategy: CacheStrategy,
    channel: Arc<CommandChannel>,
    spool_dir: PathBuf,
    cell: LoadCell<Snapshot<R>>,
}

impl<R: Row> Table<R> {
    pub(crate) fn new(strategy: CacheStrategy, channel: Arc<CommandChannel>, spool_dir: PathBuf) -> Self {
        Self {
            strategy,
            channel,
            spool_dir,
            cell: LoadCell::new(),
        }
    }

    pub fn id(&self) -> TableId {
        R::TABLE_ID
    }

    pub fn strategy(&self) -> CacheStrategy {
        self.strategy
    }

    pub fn state(&self) -> TableState {
        self.cell.state()
    }

    /// Number of full loads this table has started.
    pub fn load_count(&self) -> u64 {
        self.cell.loads()
    }

    /// Looks a row up by primary key.
    pub fn get(&self, key: &R::Key) -> Result<Option<Arc<R>>, ClientError> {
        if self.strategy == CacheStrategy::Uncached {
            return Ok(self.fetch_object(key)?.map(Arc::new));
        }
        self.snapshot()?.get(key)
    }

    /// Every row, in the table's default order.
    pub fn get_rows(&self) -> Result<Vec<Arc<R>>, ClientError> {
        self.with_snapshot(|snapshot| snapshot.rows())
    }

    /// Rows whose `column` equals `value`, in default order.
    ///
    /// # Errors
    ///
    /// Fails with [`ColumnOutOfRange`](crate::InvariantViolation::ColumnOutOfRange) when `column`
    /// is not one of the row's declared columns.
    pub fn get_indexed_rows(&self, column: usize, value: &Value) -> Result<Vec<Arc<R>>, ClientError> {
        self.with_snapshot(|snapshot| snapshot.indexed_rows(column, value))
    }

    /// The single row whose unique `column` equals `value`.
    ///
    /// # Errors
    ///
    /// Fails with [`NotUnique`](crate::InvariantViolation::NotUnique) when `column` is not
    /// declared unique, and with [`DuplicateKey`](crate::InvariantViolation::DuplicateKey) when
    /// the loaded rows repeat a value of it.
    pub fn get_unique_row(&self, column: usize, value: &Value) -> Result<Option<Arc<R>>, ClientError> {
        self.with_snapshot(|snapshot| snapshot.unique_row(column, value))
    }

    /// Number of rows. Spooled and uncached tables ask the server until rows are held locally.
    pub fn size(&self) -> Result<usize, ClientError> {
        match self.local() {
            Some(snapshot) => Ok(snapshot.len()),
            None if self.counts_remotely() => self.fetch_count(),
            None => Ok(self.snapshot()?.len()),
        }
    }

    pub fn contains(&self, key: &R::Key) -> Result<bool, ClientError> {
        match self.local() {
            Some(snapshot) => Ok(snapshot.contains(key)),
            None if self.counts_remotely() => Ok(self.fetch_object(key)?.is_some()),
            None => Ok(self.snapshot()?.contains(key)),
        }
    }

    /// Drops the cached rows; the next access reloads them.
    pub fn clear_cache(&self) {
        if self.cell.invalidate() {
            debug!("cleared {}", R::TABLE_ID);
        }
    }

    /// Marks the cached rows stale, including a load still in flight. Returns whether loaded rows
    /// were dropped.
    pub fn invalidate(&self) -> bool {
        let dropped = self.cell.invalidate();
        debug!("invalidated {} (dropped rows: {dropped})", R::TABLE_ID);
        dropped
    }

    fn counts_remotely(&self) -> bool {
        matches!(
            self.strategy,
            CacheStrategy::Spooled { .. } | CacheStrategy::Uncached
        )
    }

    fn local(&self) -> Option<Arc<Snapshot<R>>> {
        match self.strategy {
            CacheStrategy::Uncached => None,
            _ => self.cell.peek(),
        }
    }

    fn snapshot(&self) -> Result<Arc<Snapshot<R>>, ClientError> {
        self.cell.get_or_load(|| self.load())
    }

    fn with_snapshot<T, F>(&self, f: F) -> Result<T, ClientError>
    where
        F: FnOnce(&Snapshot<R>) -> Result<T, ClientError>,
    {
        match self.strategy {
            CacheStrategy::Uncached => f(&self.load()?),
            _ => f(self.snapshot()?.as_ref()),
        }
    }

    fn load(&self) -> Result<Snapshot<R>, ClientError> {
        let started = Instant::now();
        let snapshot = match self.strategy {
            CacheStrategy::Spooled { record_length } => {
                Snapshot::new(self.fetch_spooled(record_length)?)
            }
            _ => Snapshot::new(MemoryStore::build(self.fetch_rows()?)?),
        };
        debug!(
            "loaded {} rows of {} in {:?}",
            snapshot.len(),
            R::TABLE_ID,
            started.elapsed()
        );
        Ok(snapshot)
    }

    fn fetch_rows(&self) -> Result<Vec<R>, ClientError> {
        let (rows, _) = self.channel.execute(
            CommandId::GET_TABLE,
            |out, _| R::TABLE_ID.write(out),
            |input, version| read_row_set(input, version),
            false,
        )?;
        Ok(rows)
    }

    fn fetch_spooled(&self, record_length: usize) -> Result<SpoolStore<R>, ClientError> {
        let (writer, _) = self.channel.execute(
            CommandId::GET_TABLE,
            |out, _| R::TABLE_ID.write(out),
            |input, version| {
                let count = input.read_len()?;
                let mut writer = SpoolWriter::create(&self.spool_dir, record_length, version);
                for _ in 0..count {
                    writer.push(&R::read(input, version)?);
                }
                Ok(writer)
            },
            false,
        )?;
        writer.finish()
    }

    fn fetch_object(&self, key: &R::Key) -> Result<Option<R>, ClientError> {
        let (row, _) = self.channel.execute(
            CommandId::GET_OBJECT,
            |out, _| {
                R::TABLE_ID.write(out)?;
                R::write_key(key, out)
            },
            |input, version| read_optional_row(input, version),
            false,
        )?;
        Ok(row)
    }

    fn fetch_count(&self) -> Result<usize, ClientError> {
        fetch_row_count(&self.channel, R::TABLE_ID)
    }
}
