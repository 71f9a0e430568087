//! Per-strategy background worker thread.
//!
//! Each tradestrategy gets one dedicated thread that parks on the bar-series
//! signal, wakes on bar changes, and drives its rule with completed bars.
//! Lifecycle events and errors are pushed to registered listeners; a fatal
//! error makes the worker cancel itself and clean up exactly once.

use crate::broker::Broker;
use crate::domain::{OrderKey, StrategyId};
use crate::error::{EngineError, Severity};
use crate::factory::OrderFactory;
use crate::persistence::{Persistence, PositionOrders};
use crate::rule::{RuleContext, RuleRegistry, StrategyRule};
use crate::series::{BarSeries, BarSignal, Wake};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Observable worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Waiting,
    Processing,
    /// Subscribed to bar-change signals (entered once, after the first
    /// successful cycle).
    Listening,
    Cancelled,
    Done,
}

/// Notifications pushed to [`WorkerListener`]s.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// First decision cycle finished without a fatal error.
    StrategyStarted { strategy_id: StrategyId },
    /// A decision cycle completed for the bar at `bar_index`.
    RuleComplete {
        strategy_id: StrategyId,
        bar_index: usize,
    },
    /// An order transitioned to filled since the last cycle.
    OrderFilled {
        strategy_id: StrategyId,
        order_key: OrderKey,
    },
    /// Active order quantity covers the open position (emitted once per
    /// position).
    PositionCovered { strategy_id: StrategyId },
    /// An error surfaced; severity 1 means the worker is shutting down.
    StrategyError {
        strategy_id: StrategyId,
        severity: Severity,
        code: u32,
        message: String,
    },
    /// The worker has cleaned up and exited (emitted exactly once).
    StrategyComplete { strategy_id: StrategyId },
}

/// Receives worker lifecycle events. Callbacks run on the worker thread and
/// must not block.
pub trait WorkerListener: Send + Sync {
    fn on_event(&self, event: &WorkerEvent);
}

struct WorkerShared {
    strategy_id: StrategyId,
    series: Arc<BarSeries>,
    factory: Arc<OrderFactory>,
    broker: Arc<dyn Broker>,
    persistence: Arc<dyn Persistence>,
    signal: Arc<BarSignal>,
    cancel: AtomicBool,
    state: Mutex<WorkerState>,
    listeners: Mutex<Vec<Arc<dyn WorkerListener>>>,
}

impl WorkerShared {
    fn set_state(&self, state: WorkerState) {
        *lock_recover(&self.state) = state;
    }

    fn emit(&self, event: WorkerEvent) {
        let listeners = lock_recover(&self.listeners).clone();
        for listener in listeners {
            listener.on_event(&event);
        }
    }

    fn emit_error(&self, err: &EngineError) {
        error!(strategy_id = %self.strategy_id, code = err.code(), "{err}");
        self.emit(WorkerEvent::StrategyError {
            strategy_id: self.strategy_id,
            severity: err.severity(),
            code: err.code(),
            message: err.to_string(),
        });
    }
}

fn lock_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One background thread driving one tradestrategy's rule.
pub struct StrategyWorker {
    shared: Arc<WorkerShared>,
    registry: Arc<RuleRegistry>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StrategyWorker {
    pub fn new(
        strategy_id: StrategyId,
        series: Arc<BarSeries>,
        factory: Arc<OrderFactory>,
        broker: Arc<dyn Broker>,
        persistence: Arc<dyn Persistence>,
        registry: Arc<RuleRegistry>,
    ) -> Self {
        Self {
            shared: Arc::new(WorkerShared {
                strategy_id,
                series,
                factory,
                broker,
                persistence,
                signal: BarSignal::new(),
                cancel: AtomicBool::new(false),
                state: Mutex::new(WorkerState::Created),
                listeners: Mutex::new(Vec::new()),
            }),
            registry,
            handle: Mutex::new(None),
        }
    }

    pub fn strategy_id(&self) -> StrategyId {
        self.shared.strategy_id
    }

    pub fn state(&self) -> WorkerState {
        *lock_recover(&self.shared.state)
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.load(Ordering::SeqCst)
    }

    pub fn is_done(&self) -> bool {
        self.state() == WorkerState::Done
    }

    pub fn add_listener(&self, listener: Arc<dyn WorkerListener>) {
        let mut listeners = lock_recover(&self.shared.listeners);
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn remove_listener(&self, listener: &Arc<dyn WorkerListener>) {
        lock_recover(&self.shared.listeners).retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Spawn the worker thread. Fails if already started or the strategy's
    /// rule name is not registered.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut handle = lock_recover(&self.handle);
        if handle.is_some() {
            return Err(EngineError::Internal(format!(
                "worker for tradestrategy {} already started",
                self.shared.strategy_id
            )));
        }

        let strategy = self
            .shared
            .persistence
            .find_tradestrategy_by_id(self.shared.strategy_id)?;
        let rule = self.registry.create(&strategy.rule_name).ok_or_else(|| {
            EngineError::Internal(format!("no rule registered under {:?}", strategy.rule_name))
        })?;

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(format!("strategy-{}", self.shared.strategy_id))
            .spawn(move || {
                run_loop(shared, rule);
            })
            .map_err(|e| EngineError::Internal(format!("failed to spawn worker thread: {e}")))?;
        *handle = Some(spawned);
        Ok(())
    }

    /// Request shutdown and wake the worker if it is parked.
    pub fn cancel(&self) {
        self.shared.cancel.store(true, Ordering::SeqCst);
        self.shared.signal.cancel();
        let mut state = lock_recover(&self.shared.state);
        if *state != WorkerState::Done {
            *state = WorkerState::Cancelled;
        }
    }

    /// Block until the worker thread exits.
    pub fn join(&self) {
        let handle = lock_recover(&self.handle).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(strategy_id = %self.shared.strategy_id, "worker thread panicked");
            }
        }
    }
}

fn run_loop(shared: Arc<WorkerShared>, mut rule: Box<dyn StrategyRule>) {
    let strategy_id = shared.strategy_id;
    info!(strategy_id = %strategy_id, rule = rule.name(), "worker starting");

    let strategy = match shared.persistence.find_tradestrategy_by_id(strategy_id) {
        Ok(strategy) => strategy,
        Err(e) => {
            shared.emit_error(&e.into());
            finish(&shared);
            return;
        }
    };

    if !shared.broker.is_realtime_bars_running(&strategy) {
        warn!(strategy_id = %strategy_id, "realtime bars are not running");
        shared.emit(WorkerEvent::StrategyError {
            strategy_id,
            severity: Severity::Warning,
            code: crate::error::codes::BROKER,
            message: "realtime bars are not running".to_string(),
        });
    }

    // Bars seen so far; the forced first cycle picks up the newest bar that
    // was already present when the worker came up.
    let mut seen = shared.series.len().saturating_sub(1);
    let mut first_cycle = true;
    let mut subscribed = false;
    let mut started_emitted = false;
    let mut filled_seen: HashSet<OrderKey> = HashSet::new();
    let mut covered_notified = false;

    loop {
        // Park only when there is no backlog left from a coalesced wake.
        if !first_cycle && shared.series.len() <= seen {
            // Never park without a subscription (the series may still have
            // been empty on the first cycle).
            if !subscribed {
                shared.series.subscribe(shared.signal.clone());
                subscribed = true;
                if shared.series.len() > seen {
                    continue;
                }
            }
            shared.set_state(WorkerState::Waiting);
            match shared.signal.wait() {
                Wake::Cancelled => break,
                Wake::BarChanged => {}
            }
        }
        first_cycle = false;
        if shared.cancel.load(Ordering::SeqCst) {
            break;
        }
        shared.set_state(WorkerState::Processing);

        let live = shared.series.len();
        if live == 0 {
            continue;
        }
        let new_bar = if live > seen {
            seen += 1;
            true
        } else if live == seen {
            false
        } else {
            shared.emit_error(&EngineError::SeriesTruncated { seen, live });
            break;
        };

        let bar_index = seen - 1;
        match run_cycle(
            &shared,
            rule.as_mut(),
            bar_index,
            new_bar,
            &mut filled_seen,
            &mut covered_notified,
        ) {
            Ok(()) => {
                if started_emitted {
                    shared.emit(WorkerEvent::RuleComplete {
                        strategy_id,
                        bar_index,
                    });
                } else {
                    started_emitted = true;
                    if !subscribed {
                        shared.series.subscribe(shared.signal.clone());
                        subscribed = true;
                    }
                    shared.set_state(WorkerState::Listening);
                    shared.emit(WorkerEvent::StrategyStarted { strategy_id });
                }
            }
            Err(e) => {
                shared.emit_error(&e);
                if e.severity() == Severity::Fatal {
                    shared.cancel.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }
    }

    finish(&shared);
}

fn run_cycle(
    shared: &Arc<WorkerShared>,
    rule: &mut dyn StrategyRule,
    bar_index: usize,
    new_bar: bool,
    filled_seen: &mut HashSet<OrderKey>,
    covered_notified: &mut bool,
) -> Result<(), EngineError> {
    let Some(bar) = shared.series.get(bar_index) else {
        return Ok(());
    };
    // The tradestrategy rides along with the position view, so mid-session
    // edits (trade_enabled, session window) apply on the next cycle.
    let position = shared.persistence.find_position_orders(shared.strategy_id)?;
    let strategy = &position.strategy;
    if !strategy.session.contains(bar.time) {
        debug!(strategy_id = %strategy.id, bar_index, "bar outside trading session");
        return Ok(());
    }

    let bars = shared.series.snapshot();
    let ctx = RuleContext {
        strategy,
        position: &position,
        factory: shared.factory.as_ref(),
    };

    notify_fills(shared, strategy, rule, &ctx, &position, filled_seen)?;

    if strategy.trade_enabled {
        rule.on_bar(&ctx, &bars, new_bar)?;
    }

    track_coverage(shared, &position, covered_notified);
    Ok(())
}

/// Invoke the fill hook once per order that has become filled.
fn notify_fills(
    shared: &Arc<WorkerShared>,
    strategy: &crate::domain::TradeStrategy,
    rule: &mut dyn StrategyRule,
    ctx: &RuleContext<'_>,
    position: &PositionOrders,
    filled_seen: &mut HashSet<OrderKey>,
) -> Result<(), EngineError> {
    for order in &position.orders {
        let Some(key) = order.order_key else { continue };
        if order.is_filled && filled_seen.insert(key) {
            shared.emit(WorkerEvent::OrderFilled {
                strategy_id: strategy.id,
                order_key: key,
            });
            rule.on_order_filled(ctx, order)?;
        }
    }
    Ok(())
}

fn track_coverage(
    shared: &Arc<WorkerShared>,
    position: &PositionOrders,
    covered_notified: &mut bool,
) {
    if !position.has_open_position() {
        *covered_notified = false;
        return;
    }
    if !*covered_notified && shared.factory.is_position_covered(position) {
        *covered_notified = true;
        shared.emit(WorkerEvent::PositionCovered {
            strategy_id: shared.strategy_id,
        });
    }
}

/// Unsubscribe and emit the terminal event. Runs once per worker lifetime.
fn finish(shared: &Arc<WorkerShared>) {
    shared.series.unsubscribe(&shared.signal);
    shared.set_state(WorkerState::Done);
    info!(strategy_id = %shared.strategy_id, "worker finished");
    shared.emit(WorkerEvent::StrategyComplete {
        strategy_id: shared.strategy_id,
    });
}
