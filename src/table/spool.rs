//! File-backed row storage for very large tables.
//!
//! A spooled table keeps only its keys and record positions in memory. Each row is written as
//! one fixed-length record, zero padded to the table's `record_length`, so record `n` always
//! starts at `n * record_length` and reading a row is one seek and one read.
//!
//! # Layout
//!
//! Records are appended in the order the server streams them. The default ordering is kept as a
//! permutation over record numbers, so building the spool never needs every row in memory at
//! once.
//!
//! # See Also
//! - [`Snapshot`](super::snapshot::Snapshot): serves the rows of a spool like any other store.
use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io::{self, BufWriter, Cursor, Read, Seek, SeekFrom, Write},
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};

use log::{debug, trace};
use tempdir::TempDir;

use crate::{
    error::{ClientError, InvariantViolation},
    protocol::{ProtocolVersion, WireReader, WireWriter},
};

use super::{
    row::{Row, SortTerm, sort_key},
    snapshot::{RowStore, key_positions},
};

const SPOOL_PREFIX: &str = "mgmt-spool";

pub(crate) struct SpoolStore<R: Row> {
    // Removes the spool directory when the store is dropped.
    _dir: TempDir,
    file: Mutex<File>,
    record_length: usize,
    version: ProtocolVersion,
    order: Vec<u32>,
    by_key: HashMap<R::Key, usize>,
}

/// Accumulates streamed rows into a spool file.
///
/// Failures local to the spool are remembered rather than raised, so that the caller can keep
/// draining the response stream and leave the connection aligned.
pub(crate) struct SpoolWriter<R: Row> {
    dir: Option<TempDir>,
    file: Option<BufWriter<File>>,
    record_length: usize,
    version: ProtocolVersion,
    records: u32,
    entries: Vec<(Vec<SortTerm>, R::Key)>,
    failure: Option<ClientError>,
}

impl<R: Row> SpoolWriter<R> {
    pub fn create(spool_dir: &Path, record_length: usize, version: ProtocolVersion) -> Self {
        let mut writer = Self {
            dir: None,
            file: None,
            record_length,
            version,
            records: 0,
            entries: Vec::new(),
            failure: None,
        };
        match open_spool(spool_dir, &R::TABLE_ID.0.to_string()) {
            Ok((dir, file)) => {
                debug!("spooling {} into {}", R::TABLE_ID, dir.path().display());
                writer.dir = Some(dir);
                writer.file = Some(BufWriter::new(file));
            }
            Err(e) => writer.failure = Some(ClientError::Spool(e)),
        }
        writer
    }

    /// Appends one decoded row.
    pub fn push(&mut self, row: &R) {
        if self.failure.is_some() {
            return;
        }
        if let Err(e) = self.append(row) {
            self.failure = Some(e);
        }
    }

    fn append(&mut self, row: &R) -> Result<(), ClientError> {
        let mut out = WireWriter::new(Vec::with_capacity(self.record_length));
        row.write(&mut out, self.version)?;
        let mut record = out.into_inner();
        if record.len() > self.record_length {
            return Err(InvariantViolation::RecordTooLong {
                table: R::TABLE_ID,
                needed: record.len(),
                record_length: self.record_length,
            }
            .into());
        }
        record.resize(self.record_length, 0);

        if let Some(file) = self.file.as_mut() {
            file.write_all(&record).map_err(ClientError::Spool)?;
        }
        self.entries.push((sort_key(row, R::DEFAULT_ORDER), row.key()));
        self.records += 1;
        Ok(())
    }

    /// Orders the spooled records and opens them for reading.
    pub fn finish(self) -> Result<SpoolStore<R>, ClientError> {
        if let Some(e) = self.failure {
            return Err(e);
        }
        let (Some(dir), Some(file)) = (self.dir, self.file) else {
            return Err(ClientError::Spool(io::Error::other("spool was never opened")));
        };
        let file = file
            .into_inner()
            .map_err(|e| ClientError::Spool(e.into_error()))?;

        let mut entries: Vec<(Vec<SortTerm>, R::Key, u32)> = self
            .entries
            .into_iter()
            .zip(0..self.records)
            .map(|((sort, key), record)| (sort, key, record))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let order = entries.iter().map(|(_, _, record)| *record).collect();
        let by_key = key_positions::<R, _>(entries.into_iter().map(|(_, key, _)| key))?;

        debug!(
            "spooled {} records of {} bytes for {}",
            self.records,
            self.record_length,
            R::TABLE_ID
        );
        Ok(SpoolStore {
            _dir: dir,
            file: Mutex::new(file),
            record_length: self.record_length,
            version: self.version,
            order,
            by_key,
        })
    }
}

fn open_spool(spool_dir: &Path, name: &str) -> io::Result<(TempDir, File)> {
    let dir = TempDir::new_in(spool_dir, SPOOL_PREFIX)?;
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .read(true)
        .write(true)
        .open(dir.path().join(format!("{name}.records")))?;
    Ok((dir, file))
}

impl<R: Row> SpoolStore<R> {
    fn read_record(&self, record: u32) -> Result<Vec<u8>, ClientError> {
        let offset = u64::from(record) * self.record_length as u64;
        let mut buf = vec![0; self.record_length];
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.seek(SeekFrom::Start(offset))
            .map_err(ClientError::Spool)?;
        file.read_exact(&mut buf).map_err(ClientError::Spool)?;
        trace!("read record {record} of {} at {offset}", R::TABLE_ID);
        Ok(buf)
    }
}

impl<R: Row> RowStore<R> for SpoolStore<R> {
    fn len(&self) -> usize {
        self.order.len()
    }

    fn row(&self, position: usize) -> Result<Arc<R>, ClientError> {
        let record = self.read_record(self.order[position])?;
        let mut input = WireReader::new(Cursor::new(record));
        Ok(Arc::new(R::read(&mut input, self.version)?))
    }

    fn position(&self, key: &R::Key) -> Option<usize> {
        self.by_key.get(key).copied()
    }
}
