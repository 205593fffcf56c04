use std::{
    collections::{HashMap, hash_map::Entry},
    sync::{Arc, Mutex, PoisonError},
};

use log::debug;

use crate::error::{ClientError, InvariantViolation};

use super::row::{IndexKind, Row, Value, column_value, sort_key};

/// Positional access to the rows of one loaded table, in default order.
pub(crate) trait RowStore<R: Row>: Send + Sync {
    fn len(&self) -> usize;
    fn row(&self, position: usize) -> Result<Arc<R>, ClientError>;
    fn position(&self, key: &R::Key) -> Option<usize>;
}

/// Maps each key to its position, rejecting duplicate keys.
pub(crate) fn key_positions<R, I>(keys: I) -> Result<HashMap<R::Key, usize>, ClientError>
where
    R: Row,
    I: IntoIterator<Item = R::Key>,
{
    let keys = keys.into_iter();
    let mut by_key = HashMap::with_capacity(keys.size_hint().0);
    for (position, key) in keys.enumerate() {
        match by_key.entry(key) {
            Entry::Occupied(e) => {
                return Err(InvariantViolation::DuplicateKey {
                    table: R::TABLE_ID,
                    key: format!("{:?}", e.key()),
                }
                .into());
            }
            Entry::Vacant(e) => {
                e.insert(position);
            }
        }
    }
    Ok(by_key)
}

pub(crate) fn check_column<R: Row>(column: usize) -> Result<(), ClientError> {
    if column < R::COLUMNS.len() {
        Ok(())
    } else {
        Err(InvariantViolation::ColumnOutOfRange {
            table: R::TABLE_ID,
            column,
            columns: R::COLUMNS.len(),
        }
        .into())
    }
}

/// Rows held on the heap.
pub(crate) struct MemoryStore<R: Row> {
    rows: Vec<Arc<R>>,
    by_key: HashMap<R::Key, usize>,
}

impl<R: Row> MemoryStore<R> {
    pub fn build(mut rows: Vec<R>) -> Result<Self, ClientError> {
        rows.sort_by_cached_key(|row| sort_key(row, R::DEFAULT_ORDER));
        let rows: Vec<Arc<R>> = rows.into_iter().map(Arc::new).collect();
        let by_key = key_positions::<R, _>(rows.iter().map(|row| row.key()))?;
        Ok(Self { rows, by_key })
    }
}

impl<R: Row> RowStore<R> for MemoryStore<R> {
    fn len(&self) -> usize {
        self.rows.len()
    }

    fn row(&self, position: usize) -> Result<Arc<R>, ClientError> {
        Ok(Arc::clone(&self.rows[position]))
    }

    fn position(&self, key: &R::Key) -> Option<usize> {
        self.by_key.get(key).copied()
    }
}

/// Positions of the rows holding each value of one column, ascending.
type ColumnIndex = HashMap<Value, Vec<usize>>;

/// One loaded generation of a table: its rows plus the secondary indexes built over them.
///
/// Indexes live and die with the snapshot, so dropping a snapshot on invalidation discards them
/// too.
pub(crate) struct Snapshot<R: Row> {
    store: Box<dyn RowStore<R>>,
    indexes: Mutex<HashMap<usize, Arc<ColumnIndex>>>,
}

impl<R: Row> Snapshot<R> {
    pub fn new<S: RowStore<R> + 'static>(store: S) -> Self {
        Self {
            store: Box::new(store),
            indexes: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn get(&self, key: &R::Key) -> Result<Option<Arc<R>>, ClientError> {
        self.store
            .position(key)
            .map(|position| self.store.row(position))
            .transpose()
    }

    pub fn contains(&self, key: &R::Key) -> bool {
        self.store.position(key).is_some()
    }

    pub fn rows(&self) -> Result<Vec<Arc<R>>, ClientError> {
        (0..self.store.len())
            .map(|position| self.store.row(position))
            .collect()
    }

    fn index(&self, column: usize) -> Result<Arc<ColumnIndex>, ClientError> {
        let mut indexes = self.indexes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(index) = indexes.get(&column) {
            return Ok(Arc::clone(index));
        }

        let unique = R::COLUMNS[column].index == IndexKind::Unique;
        let mut index = ColumnIndex::new();
        for position in 0..self.store.len() {
            let row = self.store.row(position)?;
            let value = column_value(row.as_ref(), column)?;
            if unique && value != Value::Null && index.contains_key(&value) {
                return Err(InvariantViolation::DuplicateKey {
                    table: R::TABLE_ID,
                    key: value.to_string(),
                }
                .into());
            }
            index.entry(value).or_default().push(position);
        }
        debug!(
            "indexed column {} of {}: {} distinct values",
            R::COLUMNS[column].name,
            R::TABLE_ID,
            index.len()
        );

        let index = Arc::new(index);
        indexes.insert(column, Arc::clone(&index));
        Ok(index)
    }

    pub fn indexed_rows(&self, column: usize, value: &Value) -> Result<Vec<Arc<R>>, ClientError> {
        check_column::<R>(column)?;
        match self.index(column)?.get(value) {
            Some(positions) => positions
                .iter()
                .map(|position| self.store.row(*position))
                .collect(),
            None => Ok(Vec::new()),
        }
    }

    pub fn unique_row(&self, column: usize, value: &Value) -> Result<Option<Arc<R>>, ClientError> {
        check_column::<R>(column)?;
        if R::COLUMNS[column].index != IndexKind::Unique {
            return Err(InvariantViolation::NotUnique {
                table: R::TABLE_ID,
                column,
            }
            .into());
        }
        match self.index(column)?.get(value).and_then(|p| p.first()) {
            Some(position) => Ok(Some(self.store.row(*position)?)),
            None => Ok(None),
        }
    }
}
