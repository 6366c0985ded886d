/// Global seed-state machine.
///
/// States advance monotonically on first entry; only an explicit reset
/// demotes. Every transition is broadcast on the internal condition
/// variable (wakeups may be spurious, waiters re-check the predicate) and
/// reported to the registered observers — the status shared memory
/// publisher hooks in there.
use crate::{EsdmError, EsdmResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SeedState {
    Uninitialised,
    MinSeeded,
    FullySeeded,
    Operational,
}

pub type StateObserver = Box<dyn Fn(SeedState) + Send + Sync>;

pub struct SeedStateMachine {
    state: Mutex<SeedState>,
    init_wait: Condvar,
    observers: Mutex<Vec<StateObserver>>,
    shutdown: Arc<AtomicBool>,
}

impl SeedStateMachine {
    pub fn new(shutdown: Arc<AtomicBool>) -> Self {
        Self {
            state: Mutex::new(SeedState::Uninitialised),
            init_wait: Condvar::new(),
            observers: Mutex::new(Vec::new()),
            shutdown,
        }
    }

    pub fn current(&self) -> SeedState {
        *self.state.lock().unwrap()
    }

    /// Register a transition observer. Called once per state change, after
    /// the change is visible.
    pub fn register_observer(&self, obs: StateObserver) {
        self.observers.lock().unwrap().push(obs);
    }

    fn notify_observers(&self, state: SeedState) {
        for obs in self.observers.lock().unwrap().iter() {
            obs(state);
        }
    }

    /// Monotonic advance: a transition happens only when `target` is ahead
    /// of the current state. Returns true when the state changed.
    pub fn advance_to(&self, target: SeedState) -> bool {
        let changed = {
            let mut cur = self.state.lock().unwrap();
            if target > *cur {
                tracing::info!(from = ?*cur, to = ?target, "seed state advanced");
                *cur = target;
                true
            } else {
                false
            }
        };
        if changed {
            self.init_wait.notify_all();
            self.notify_observers(target);
        }
        changed
    }

    /// Explicit demotion back to `Uninitialised` (manager reset).
    pub fn reset(&self) {
        let changed = {
            let mut cur = self.state.lock().unwrap();
            if *cur != SeedState::Uninitialised {
                tracing::info!(from = ?*cur, "seed state reset");
                *cur = SeedState::Uninitialised;
                true
            } else {
                false
            }
        };
        if changed {
            self.init_wait.notify_all();
            self.notify_observers(SeedState::Uninitialised);
        }
    }

    /// Broadcast a wakeup with no state change: shutdown release and the
    /// all-nodes-seeded event. Waiters re-check their predicate.
    pub fn broadcast_wakeup(&self) {
        self.init_wait.notify_all();
    }

    fn wait_for(&self, target: SeedState) -> EsdmResult<()> {
        let mut cur = self.state.lock().unwrap();
        while *cur < target {
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(EsdmError::Transient("shutdown during wait".into()));
            }
            cur = self.init_wait.wait(cur).unwrap();
        }
        Ok(())
    }

    /// Block until at least minimally seeded.
    pub fn sleep_while_non_min_seeded(&self) -> EsdmResult<()> {
        self.wait_for(SeedState::MinSeeded)
    }

    /// Block until operational; with `nonblock` return `WouldBlock`
    /// instead of waiting.
    pub fn sleep_while_nonoperational(&self, nonblock: bool) -> EsdmResult<()> {
        if nonblock && self.current() < SeedState::Operational {
            return Err(EsdmError::WouldBlock);
        }
        self.wait_for(SeedState::Operational)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    fn machine() -> SeedStateMachine {
        SeedStateMachine::new(Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_monotonic_advance() {
        let sm = machine();
        assert_eq!(sm.current(), SeedState::Uninitialised);
        assert!(sm.advance_to(SeedState::MinSeeded));
        assert!(sm.advance_to(SeedState::FullySeeded));
        // Re-entering an earlier state is a no-op
        assert!(!sm.advance_to(SeedState::MinSeeded));
        assert_eq!(sm.current(), SeedState::FullySeeded);
    }

    #[test]
    fn test_reset_demotes() {
        let sm = machine();
        sm.advance_to(SeedState::Operational);
        sm.reset();
        assert_eq!(sm.current(), SeedState::Uninitialised);
    }

    #[test]
    fn test_observer_fires_once_per_transition() {
        let sm = machine();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        sm.register_observer(Box::new(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        }));

        sm.advance_to(SeedState::MinSeeded);
        sm.advance_to(SeedState::MinSeeded); // no-op, no callback
        sm.advance_to(SeedState::FullySeeded);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_nonblocking_wait_returns_would_block() {
        let sm = machine();
        match sm.sleep_while_nonoperational(true) {
            Err(EsdmError::WouldBlock) => {}
            other => panic!("expected WouldBlock, got {:?}", other),
        }
        sm.advance_to(SeedState::Operational);
        assert!(sm.sleep_while_nonoperational(true).is_ok());
    }

    #[test]
    fn test_blocking_wait_wakes_on_advance() {
        let sm = Arc::new(machine());
        let waiter = {
            let sm = Arc::clone(&sm);
            thread::spawn(move || sm.sleep_while_non_min_seeded())
        };
        thread::sleep(Duration::from_millis(50));
        sm.advance_to(SeedState::MinSeeded);
        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn test_shutdown_releases_waiters() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let sm = Arc::new(SeedStateMachine::new(Arc::clone(&shutdown)));
        let waiter = {
            let sm = Arc::clone(&sm);
            thread::spawn(move || sm.sleep_while_nonoperational(false))
        };
        thread::sleep(Duration::from_millis(50));
        shutdown.store(true, Ordering::SeqCst);
        sm.broadcast_wakeup();
        assert!(waiter.join().unwrap().is_err());
    }
}
