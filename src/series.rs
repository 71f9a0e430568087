//! Shared bar series with coalescing change notification.
//!
//! The series is the only cross-thread mutable object in the engine: the
//! market-data thread appends/updates bars, strategy workers read and park on
//! change signals. Multiple notifications arriving before a worker consumes
//! one collapse into a single pending wake-up — the signal is a boolean flag,
//! not a counting queue.

use crate::domain::Bar;
use std::sync::{Arc, Condvar, Mutex, RwLock};

/// Outcome of waiting on a [`BarSignal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// A bar was appended or updated since the last wait.
    BarChanged,
    /// The signal was cancelled; the waiter must exit.
    Cancelled,
}

#[derive(Debug, Default)]
struct SignalState {
    pending: bool,
    cancelled: bool,
}

/// Single-slot wake-up monitor shared between one worker and the series.
#[derive(Debug, Default)]
pub struct BarSignal {
    state: Mutex<SignalState>,
    cvar: Condvar,
}

impl BarSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark a bar change pending and wake the waiter.
    pub fn notify(&self) {
        let mut state = lock_recover(&self.state);
        state.pending = true;
        self.cvar.notify_all();
    }

    /// Cancel the signal, waking a blocked waiter deterministically.
    pub fn cancel(&self) {
        let mut state = lock_recover(&self.state);
        state.cancelled = true;
        self.cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        lock_recover(&self.state).cancelled
    }

    /// Block until a change is pending or the signal is cancelled.
    ///
    /// A pending change is cleared on return; cancellation wins when both
    /// conditions hold.
    pub fn wait(&self) -> Wake {
        let mut state = lock_recover(&self.state);
        while !state.pending && !state.cancelled {
            state = self
                .cvar
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        if state.cancelled {
            return Wake::Cancelled;
        }
        state.pending = false;
        Wake::BarChanged
    }
}

fn lock_recover(mutex: &Mutex<SignalState>) -> std::sync::MutexGuard<'_, SignalState> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Lazy, append-only-per-session sequence of OHLCV bars.
///
/// Written only by the market-data thread; read and subscribed to by
/// strategy workers.
#[derive(Debug, Default)]
pub struct BarSeries {
    bars: RwLock<Vec<Bar>>,
    listeners: Mutex<Vec<Arc<BarSignal>>>,
}

impl BarSeries {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.read_bars().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Bar> {
        self.read_bars().get(index).cloned()
    }

    pub fn last(&self) -> Option<Bar> {
        self.read_bars().last().cloned()
    }

    /// Snapshot of the whole series for a decision cycle.
    pub fn snapshot(&self) -> Vec<Bar> {
        self.read_bars().clone()
    }

    /// Append a completed bar and signal subscribers.
    pub fn append(&self, bar: Bar) {
        {
            let mut bars = self.write_bars();
            bars.push(bar);
        }
        self.notify_listeners();
    }

    /// Replace the forming last bar in place and signal subscribers.
    ///
    /// Appends instead when the series is still empty.
    pub fn update_last(&self, bar: Bar) {
        {
            let mut bars = self.write_bars();
            match bars.last_mut() {
                Some(last) => *last = bar,
                None => bars.push(bar),
            }
        }
        self.notify_listeners();
    }

    /// Subscribe a signal to future bar changes.
    pub fn subscribe(&self, signal: Arc<BarSignal>) {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &signal)) {
            listeners.push(signal);
        }
    }

    pub fn unsubscribe(&self, signal: &Arc<BarSignal>) {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners.retain(|l| !Arc::ptr_eq(l, signal));
    }

    fn notify_listeners(&self) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for listener in listeners.iter() {
            listener.notify();
        }
    }

    fn read_bars(&self) -> std::sync::RwLockReadGuard<'_, Vec<Bar>> {
        self.bars
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_bars(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Bar>> {
        self.bars
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
