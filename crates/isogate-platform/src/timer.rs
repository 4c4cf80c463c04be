//! Thread-backed timers.
//!
//! A [`Timer`] is created idle, started explicitly, and fires its callback
//! on its own thread once after `due` and then every `period` (if any).
//! Cancelling or dropping the timer stops further callbacks. Dropping never
//! joins the timer thread, so a timer may be discarded from inside its own
//! callback.

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

/// Global timer ID counter
static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

impl TimerId {
    fn next() -> Self {
        Self(NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timer({})", self.0)
    }
}

/// Callback invoked on the timer thread each time the timer fires.
pub type TimerCallback = Box<dyn FnMut(TimerId) + Send + 'static>;

/// Errors from starting a timer
#[derive(Debug, Error)]
pub enum TimerError {
    #[error("Timer already started")]
    AlreadyStarted,

    #[error("Failed to spawn timer thread: {0}")]
    Spawn(#[from] io::Error),
}

/// A cancellable one-shot or periodic timer.
pub struct Timer {
    id: TimerId,
    due: Duration,
    period: Option<Duration>,
    /// Callback until the timer is started
    callback: Mutex<Option<TimerCallback>>,
    /// Dropping the sender disconnects the timer thread
    cancel: Mutex<Option<Sender<()>>>,
}

impl Timer {
    /// Create an idle timer.
    pub fn new<F>(due: Duration, period: Option<Duration>, callback: F) -> Self
    where
        F: FnMut(TimerId) + Send + 'static,
    {
        Self {
            id: TimerId::next(),
            due,
            period,
            callback: Mutex::new(Some(Box::new(callback))),
            cancel: Mutex::new(None),
        }
    }

    /// Create an idle timer that fires once.
    pub fn once<F>(due: Duration, callback: F) -> Self
    where
        F: FnMut(TimerId) + Send + 'static,
    {
        Self::new(due, None, callback)
    }

    /// Get the timer ID.
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Start the timer thread.
    pub fn start(&self) -> Result<(), TimerError> {
        let mut callback = lock(&self.callback)
            .take()
            .ok_or(TimerError::AlreadyStarted)?;

        let (cancel_tx, cancel_rx) = unbounded::<()>();
        *lock(&self.cancel) = Some(cancel_tx);

        let id = self.id;
        let due = self.due;
        let period = self.period;

        thread::Builder::new()
            .name(format!("isogate-timer-{}", id.0))
            .spawn(move || {
                trace!("{} armed ({:?})", id, due);
                let mut wait = due;
                loop {
                    match cancel_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {
                            callback(id);
                            match period {
                                Some(period) => wait = period,
                                None => break,
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                            debug!("{} cancelled", id);
                            break;
                        }
                    }
                }
            })?;

        Ok(())
    }

    /// Stop the timer. Idempotent.
    ///
    /// A callback already in flight on the timer thread is not interrupted.
    pub fn cancel(&self) {
        lock(&self.cancel).take();
    }

    /// Check whether the timer has been started.
    pub fn is_started(&self) -> bool {
        lock(&self.callback).is_none()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.id)
            .field("due", &self.due)
            .field("period", &self.period)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
