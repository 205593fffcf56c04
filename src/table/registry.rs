use std::{
    any::Any,
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use log::debug;

use crate::{
    error::{ClientError, InvariantViolation},
    protocol::TableId,
};

use super::{CacheStrategy, Table, TableState, row::Row};

/// Row-type-erased view of a [`Table`], used where tables are handled by identifier alone.
pub trait AnyTable: Send + Sync {
    fn id(&self) -> TableId;
    fn strategy(&self) -> CacheStrategy;
    fn state(&self) -> TableState;
    /// Drops cached rows. Returns whether anything was dropped.
    fn invalidate(&self) -> bool;
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<R: Row> AnyTable for Table<R> {
    fn id(&self) -> TableId {
        R::TABLE_ID
    }

    fn strategy(&self) -> CacheStrategy {
        Table::strategy(self)
    }

    fn state(&self) -> TableState {
        Table::state(self)
    }

    fn invalidate(&self) -> bool {
        Table::invalidate(self)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Every table of a session, keyed by [`TableId`].
#[derive(Default)]
pub struct TableRegistry {
    tables: RwLock<HashMap<TableId, Arc<dyn AnyTable>>>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<R: Row>(&self, table: Arc<Table<R>>) -> Result<(), ClientError> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if tables.contains_key(&R::TABLE_ID) {
            return Err(InvariantViolation::TableAlreadyRegistered(R::TABLE_ID).into());
        }
        debug!("registered {} as {:?}", R::TABLE_ID, table.strategy());
        tables.insert(R::TABLE_ID, table);
        Ok(())
    }

    pub fn get<R: Row>(&self) -> Result<Arc<Table<R>>, ClientError> {
        let table = self
            .get_dyn(R::TABLE_ID)
            .ok_or(InvariantViolation::TableNotRegistered(R::TABLE_ID))?;
        table
            .as_any()
            .downcast::<Table<R>>()
            .map_err(|_| InvariantViolation::WrongRowType { table: R::TABLE_ID }.into())
    }

    pub fn get_dyn(&self, id: TableId) -> Option<Arc<dyn AnyTable>> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn all(&self) -> Vec<Arc<dyn AnyTable>> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
