//! Reconnection supervisor.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::state::{Action, ConnectionEvent, ConnectionState, transition};

#[derive(Default)]
struct Machine {
    current: ConnectionState,
    /// Set by `Logout`; every later event is ignored.
    stopped: bool,
}

#[derive(Default)]
struct TimerSlot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

/// Owns the connection state and the single reconnect timer.
///
/// State changes are serialized through one lock and published on a
/// `watch` channel. At most one timer is outstanding; a fired timer clears
/// its slot before running, so the attempt it triggers may arm the next.
/// `Logout` is terminal: a stale `Connect` or timer cannot revive the
/// session.
pub struct ReconnectSupervisor {
    delay: Duration,
    state: Mutex<Machine>,
    state_tx: watch::Sender<ConnectionState>,
    timer: Arc<Mutex<TimerSlot>>,
}

impl ReconnectSupervisor {
    /// Create a supervisor in `Disconnected` with a fixed reconnect `delay`.
    pub fn new(delay: Duration) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            delay,
            state: Mutex::new(Machine::default()),
            state_tx,
            timer: Arc::new(Mutex::new(TimerSlot::default())),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state.lock().current
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Fixed reconnect delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Apply `event`, publish the new state, and return the action the
    /// caller must carry out. `CancelTimer` is carried out here.
    pub fn on_event(&self, event: ConnectionEvent) -> Option<Action> {
        let (from, to, action) = {
            let mut machine = self.state.lock();
            if machine.stopped {
                debug!(?event, "session ended, event ignored");
                return None;
            }
            let from = machine.current;
            let (to, action) = transition(from, event);
            machine.current = to;
            machine.stopped = event == ConnectionEvent::Logout;
            (from, to, action)
        };
        if from != to {
            info!(?from, ?to, ?event, "connection state changed");
            let _ = self.state_tx.send_replace(to);
        } else {
            debug!(state = ?to, ?event, "event left state unchanged");
        }
        if action == Some(Action::CancelTimer) {
            let _ = self.cancel();
        }
        action
    }

    /// Arm the timer to run `on_fire` after the delay.
    ///
    /// Returns `false`, doing nothing, if a timer is already outstanding.
    pub fn schedule<F>(&self, on_fire: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.timer.lock();
        if slot.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("reconnect timer already outstanding");
            return false;
        }
        slot.generation += 1;
        let generation = slot.generation;
        let delay = self.delay;
        let timer = Arc::clone(&self.timer);
        slot.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slot = timer.lock();
                if slot.generation == generation {
                    slot.handle = None;
                }
            }
            on_fire.await;
        }));
        info!(delay_ms = delay.as_millis(), "reconnect scheduled");
        true
    }

    /// Disarm the timer. Returns `true` if one was outstanding.
    pub fn cancel(&self) -> bool {
        let mut slot = self.timer.lock();
        slot.generation += 1;
        match slot.handle.take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                debug!("reconnect timer cancelled");
                true
            }
            _ => false,
        }
    }

    /// Whether a timer is outstanding.
    pub fn timer_pending(&self) -> bool {
        self.timer
            .lock()
            .handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}
