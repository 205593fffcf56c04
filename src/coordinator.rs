//! Applies server-reported invalidations to a session's tables.
//!
//! Invalidations reach the client two ways: as the list trailing every mutating command's
//! response, and as frames pushed on a dedicated `LISTEN_CACHES` connection kept open by an
//! [`InvalidationListener`]. Both end up in [`Coordinator::apply`].
//!
//! A pushed frame is acknowledged only after it has been applied. When the push connection drops,
//! pushes may have been missed, so every non-global table is cleared; they are cleared once more
//! after the listener subscribes again.
use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::{
    error::ClientError,
    protocol::{
        CommandChannel, CommandId, Interrupt, InvalidationList, Request, ResponseStatus,
        ServerFailure,
    },
    table::{CacheStrategy, registry::TableRegistry},
};

type Callback = Arc<dyn Fn(&InvalidationList) + Send + Sync>;
type InterruptSlot = Mutex<Option<Box<dyn Interrupt>>>;

/// Granularity at which a sleeping listener notices it was stopped.
const STOP_POLL: Duration = Duration::from_millis(50);

pub struct Coordinator {
    registry: Arc<TableRegistry>,
    callbacks: RwLock<Vec<Callback>>,
}

impl Coordinator {
    pub fn new(registry: Arc<TableRegistry>) -> Self {
        Self {
            registry,
            callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Invalidates every table named in `list`, then runs the registered callbacks.
    ///
    /// Identifiers without a registered table are logged and skipped.
    pub fn apply(&self, list: &InvalidationList) {
        if list.is_empty() {
            return;
        }
        for id in list.iter() {
            match self.registry.get_dyn(id) {
                Some(table) => {
                    table.invalidate();
                }
                None => warn!("server invalidated {id}, which is not registered"),
            }
        }
        debug!("applied invalidation of {} tables", list.len());

        let callbacks = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for callback in callbacks {
            callback(list);
        }
    }

    /// Drops the rows of every table; global tables only when `include_global` is set.
    pub fn clear_caches(&self, include_global: bool) {
        let mut cleared = 0;
        for table in self.registry.all() {
            if include_global || table.strategy() != CacheStrategy::Global {
                table.invalidate();
                cleared += 1;
            }
        }
        debug!("cleared {cleared} tables");
    }

    pub fn on_invalidate<F>(&self, callback: F)
    where
        F: Fn(&InvalidationList) + Send + Sync + 'static,
    {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }
}

/// Background thread holding the push connection open.
///
/// [`stop`](Self::stop), or dropping the listener, shuts the push connection down and waits for
/// the thread to exit. A connector without an [`Interrupt`] leaves the thread blocked until the
/// next pushed frame or disconnect, which it then answers with a `false` acknowledgement.
pub struct InvalidationListener {
    stop: Arc<AtomicBool>,
    interrupt: Arc<InterruptSlot>,
    handle: Option<JoinHandle<()>>,
}

impl InvalidationListener {
    pub fn spawn(
        channel: Arc<CommandChannel>,
        coordinator: Arc<Coordinator>,
        retry_delay: Duration,
    ) -> Result<Self, ClientError> {
        let stop = Arc::new(AtomicBool::new(false));
        let interrupt = Arc::new(Mutex::new(None));
        let handle = thread::Builder::new()
            .name("mgmt-invalidations".into())
            .spawn({
                let stop = Arc::clone(&stop);
                let interrupt = Arc::clone(&interrupt);
                move || run(&channel, &coordinator, &stop, &interrupt, retry_delay)
            })?;
        Ok(Self {
            stop,
            interrupt,
            handle: Some(handle),
        })
    }

    /// Stops the thread and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(interrupt) = lock_slot(&self.interrupt).take() {
            interrupt.interrupt();
        }
    }

    fn shutdown(&mut self) {
        self.request_stop();
        let Some(handle) = self.handle.take() else {
            return;
        };
        // A callback running on the listener thread may be the one dropping it.
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!("invalidation listener panicked");
        }
    }
}

impl Drop for InvalidationListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock_slot(slot: &InterruptSlot) -> MutexGuard<'_, Option<Box<dyn Interrupt>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn run(
    channel: &CommandChannel,
    coordinator: &Coordinator,
    stop: &AtomicBool,
    interrupt: &InterruptSlot,
    retry_delay: Duration,
) {
    let mut ever_subscribed = false;
    while !stop.load(Ordering::Acquire) {
        let mut subscribed = false;
        let res = listen(channel, coordinator, stop, interrupt, ever_subscribed, &mut subscribed);
        lock_slot(interrupt).take();
        match res {
            Ok(()) => break,
            Err(_) if stop.load(Ordering::Acquire) => break,
            Err(e) if subscribed => {
                warn!("invalidation push connection lost: {e}");
                coordinator.clear_caches(false);
            }
            Err(e) => warn!("could not subscribe to invalidations: {e}"),
        }
        ever_subscribed |= subscribed;
        pause(retry_delay, stop);
    }
    info!("invalidation listener stopped");
}

fn pause(delay: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + delay;
    while !stop.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep(STOP_POLL.min(deadline - now));
    }
}

/// Subscribes and applies pushes until stopped (`Ok`) or the connection fails (`Err`).
fn listen(
    channel: &CommandChannel,
    coordinator: &Coordinator,
    stop: &AtomicBool,
    interrupt: &InterruptSlot,
    resubscribing: bool,
    subscribed: &mut bool,
) -> Result<(), ClientError> {
    let (mut conn, handle) = channel.open_dedicated()?;
    *lock_slot(interrupt) = handle;
    // A stop requested before the handle was stored could not interrupt this connection.
    if stop.load(Ordering::Acquire) {
        return Ok(());
    }
    let request = Request::new(CommandId::LISTEN_CACHES, conn.version(), |_, _| Ok(()))?;

    conn.exchange(|conn| {
        request.write_to(&mut conn.writer())?;
        let mut input = conn.reader();
        let status = ResponseStatus::read(&mut input)?;
        if status != ResponseStatus::Done {
            let failure = ServerFailure::read(&mut input)?;
            return Err(ClientError::Server {
                command: CommandId::LISTEN_CACHES,
                code: failure.code,
                message: failure.message,
            });
        }
        *subscribed = true;
        info!("{} listening for invalidations", conn.id());
        if resubscribing {
            coordinator.clear_caches(false);
        }

        loop {
            let list = InvalidationList::read(&mut conn.reader())?;
            let stopping = stop.load(Ordering::Acquire);
            if !stopping {
                coordinator.apply(&list);
            }

            let mut out = conn.writer();
            out.write_bool(!stopping)?;
            out.flush()?;
            if stopping {
                return Ok(());
            }
        }
    })
}
