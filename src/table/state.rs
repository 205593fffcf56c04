//! Single-flight load state shared by every caching strategy.
//!
//! A [`LoadCell`] moves between `Empty`, `Loading` and `Loaded`. The first caller to find it
//! `Empty` becomes the loader; everyone arriving while it is `Loading` waits on a condition
//! variable for that load instead of starting their own. An invalidation bumps the cell's
//! generation, and a load that started under an older generation is never installed.
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Empty,
    Loading,
    Loaded,
}

enum Phase<S> {
    Empty,
    Loading,
    Loaded(Arc<S>),
}

struct Inner<S> {
    phase: Phase<S>,
    generation: u64,
    loads: u64,
}

pub(crate) struct LoadCell<S> {
    inner: Mutex<Inner<S>>,
    ready: Condvar,
}

/// Puts the cell back to `Empty` if the loader unwinds before reporting a result.
struct LoadGuard<'a, S> {
    cell: &'a LoadCell<S>,
    armed: bool,
}

impl<S> Drop for LoadGuard<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.cell.lock();
            inner.phase = Phase::Empty;
            self.cell.ready.notify_all();
        }
    }
}

impl<S> LoadCell<S> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase: Phase::Empty,
                generation: 0,
                loads: 0,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> TableState {
        match self.lock().phase {
            Phase::Empty => TableState::Empty,
            Phase::Loading => TableState::Loading,
            Phase::Loaded(_) => TableState::Loaded,
        }
    }

    /// Number of loads started since the cell was created.
    pub fn loads(&self) -> u64 {
        self.lock().loads
    }

    /// The loaded value, without triggering a load.
    pub fn peek(&self) -> Option<Arc<S>> {
        match &self.lock().phase {
            Phase::Loaded(value) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    /// Returns the loaded value, running `load` if the cell is empty.
    ///
    /// At most one `load` runs at a time. Callers arriving during a load block until it
    /// finishes and then share its result, or start their own load if it failed. A result that
    /// was invalidated while in flight is handed to this caller but not kept.
    pub fn get_or_load<F>(&self, load: F) -> Result<Arc<S>, ClientError>
    where
        F: FnOnce() -> Result<S, ClientError>,
    {
        let mut inner = self.lock();
        let generation = loop {
            match &inner.phase {
                Phase::Loaded(value) => return Ok(Arc::clone(value)),
                Phase::Empty => break inner.generation,
                Phase::Loading => {}
            }
            inner = self
                .ready
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        };
        inner.phase = Phase::Loading;
        inner.loads += 1;
        drop(inner);

        let mut guard = LoadGuard {
            cell: self,
            armed: true,
        };
        let res = load();
        guard.armed = false;
        drop(guard);

        let mut inner = self.lock();
        let res = match res {
            Ok(value) => {
                let value = Arc::new(value);
                if inner.generation == generation {
                    inner.phase = Phase::Loaded(Arc::clone(&value));
                } else {
                    debug!("discarding load invalidated while in flight");
                    inner.phase = Phase::Empty;
                }
                Ok(value)
            }
            Err(e) => {
                inner.phase = Phase::Empty;
                Err(e)
            }
        };
        self.ready.notify_all();
        res
    }

    /// Drops the loaded value, or marks an in-flight load as stale. Returns whether a loaded
    /// value was dropped.
    pub fn invalidate(&self) -> bool {
        let mut inner = self.lock();
        inner.generation += 1;
        match inner.phase {
            Phase::Loaded(_) => {
                inner.phase = Phase::Empty;
                true
            }
            Phase::Loading | Phase::Empty => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        panic::{AssertUnwindSafe, catch_unwind},
        sync::{Barrier, mpsc},
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn loads_once() {
        let cell = LoadCell::new();
        assert_eq!(cell.state(), TableState::Empty);

        assert_eq!(*cell.get_or_load(|| Ok(1)).unwrap(), 1);
        assert_eq!(*cell.get_or_load(|| Ok(2)).unwrap(), 1);
        assert_eq!(cell.loads(), 1);
        assert_eq!(cell.state(), TableState::Loaded);
    }

    #[test]
    fn concurrent_callers_share_one_load() {
        let cell = Arc::new(LoadCell::new());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cell = Arc::clone(&cell);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    *cell
                        .get_or_load(|| {
                            thread::sleep(Duration::from_millis(50));
                            Ok(7)
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 7);
        }
        assert_eq!(cell.loads(), 1);
    }

    #[test]
    fn failed_load_leaves_cell_empty() {
        let cell: LoadCell<i32> = LoadCell::new();
        let res = cell.get_or_load(|| Err(io::Error::other("reset").into()));
        assert!(res.is_err());
        assert_eq!(cell.state(), TableState::Empty);

        assert_eq!(*cell.get_or_load(|| Ok(3)).unwrap(), 3);
        assert_eq!(cell.loads(), 2);
    }

    #[test]
    fn panicking_load_leaves_cell_empty() {
        let cell: LoadCell<i32> = LoadCell::new();
        let res = catch_unwind(AssertUnwindSafe(|| {
            cell.get_or_load(|| panic!("loader blew up"))
        }));
        assert!(res.is_err());
        assert_eq!(cell.state(), TableState::Empty);
        assert_eq!(*cell.get_or_load(|| Ok(4)).unwrap(), 4);
    }

    #[test]
    fn invalidate_drops_loaded_value() {
        let cell = LoadCell::new();
        cell.get_or_load(|| Ok(1)).unwrap();
        assert!(cell.invalidate());
        assert_eq!(cell.state(), TableState::Empty);
        assert!(!cell.invalidate());

        assert_eq!(*cell.get_or_load(|| Ok(2)).unwrap(), 2);
    }

    #[test]
    fn invalidation_during_load_is_not_lost() {
        let cell = Arc::new(LoadCell::new());
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let loader = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                *cell
                    .get_or_load(|| {
                        started_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                        Ok(10)
                    })
                    .unwrap()
            })
        };

        started_rx.recv().unwrap();
        assert_eq!(cell.state(), TableState::Loading);
        assert!(!cell.invalidate());
        release_tx.send(()).unwrap();

        // The loader's caller still gets its answer, but nothing stale is kept.
        assert_eq!(loader.join().unwrap(), 10);
        assert_eq!(cell.state(), TableState::Empty);
        assert_eq!(*cell.get_or_load(|| Ok(11)).unwrap(), 11);
    }

    #[test]
    fn waiters_recover_from_failed_load() {
        let cell = Arc::new(LoadCell::new());
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let loader = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                cell.get_or_load(|| {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Err(io::Error::other("reset").into())
                })
                .is_err()
            })
        };
        started_rx.recv().unwrap();

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || *cell.get_or_load(|| Ok(5)).unwrap())
            })
            .collect();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(cell.state(), TableState::Loading);
        release_tx.send(()).unwrap();

        assert!(loader.join().unwrap());
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), 5);
        }
        // One waiter took over the load; the rest shared its result.
        assert_eq!(cell.loads(), 2);
        assert_eq!(cell.state(), TableState::Loaded);
    }
}
