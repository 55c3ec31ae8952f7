//! Per-channel refresh gate.
//!
//! At most one refresh runs per channel. A trigger arriving while one runs
//! is either dropped or queued once, depending on the [`OverlapPolicy`];
//! further triggers coalesce into the queued one.
//!
//! States: `Idle -> Refreshing` when a trigger is admitted,
//! `Refreshing -> RefreshingWithPending` when a trigger is queued, and on
//! completion either back to `Idle` or, with a pending trigger, straight into
//! another `Refreshing` run.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use fc_search_types::RefreshState;

/// What to do with a trigger that arrives while a refresh is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlapPolicy {
    /// Drop the trigger.
    Skip,

    /// Run once more after the in-flight refresh completes.
    #[default]
    Queue,
}

/// Result of offering a trigger to the gate.
#[derive(Debug)]
pub enum Admission {
    /// The caller owns the refresh and must run it.
    Run(RefreshPermit),
    /// Queued behind the in-flight refresh.
    Queued,
    /// Merged into an already queued refresh.
    Coalesced,
    /// Dropped under [`OverlapPolicy::Skip`].
    Skipped,
}

type StateObserver = Box<dyn Fn(RefreshState) + Send + Sync>;

/// Refresh gate of one channel.
pub struct RefreshGate {
    state: Mutex<RefreshState>,
    policy: OverlapPolicy,
    /// Called with every new state while the state lock is held.
    observer: Option<StateObserver>,
}

impl fmt::Debug for RefreshGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshGate")
            .field("state", &self.state())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RefreshGate {
    pub fn new(policy: OverlapPolicy) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RefreshState::Idle),
            policy,
            observer: None,
        })
    }

    /// Gate that reports every transition to `observer`.
    pub fn with_observer(
        policy: OverlapPolicy,
        observer: impl Fn(RefreshState) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RefreshState::Idle),
            policy,
            observer: Some(Box::new(observer)),
        })
    }

    fn transition(&self, state: &mut RefreshState, next: RefreshState) {
        *state = next;
        if let Some(observer) = &self.observer {
            observer(next);
        }
    }

    pub fn state(&self) -> RefreshState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn policy(&self) -> OverlapPolicy {
        self.policy
    }

    /// Offer a trigger.
    pub fn try_acquire(self: &Arc<Self>) -> Admission {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match (*state, self.policy) {
            (RefreshState::Idle, _) => {
                self.transition(&mut state, RefreshState::Refreshing);
                Admission::Run(RefreshPermit {
                    gate: Arc::clone(self),
                    armed: true,
                })
            }
            (RefreshState::Refreshing, OverlapPolicy::Queue) => {
                self.transition(&mut state, RefreshState::RefreshingWithPending);
                Admission::Queued
            }
            (RefreshState::RefreshingWithPending, OverlapPolicy::Queue) => Admission::Coalesced,
            (_, OverlapPolicy::Skip) => Admission::Skipped,
        }
    }
}

/// Ownership of the channel's running refresh.
///
/// Dropping the permit without calling [`RefreshPermit::complete`] (for
/// example on panic) returns the gate to `Idle` and discards any queued
/// trigger.
#[derive(Debug)]
pub struct RefreshPermit {
    gate: Arc<RefreshGate>,
    armed: bool,
}

impl RefreshPermit {
    /// Finish the current run.
    ///
    /// Returns a permit for the queued run if a trigger arrived meanwhile;
    /// the gate then stays `Refreshing`.
    pub fn complete(mut self) -> Option<RefreshPermit> {
        self.armed = false;
        let mut state = self
            .gate
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *state == RefreshState::RefreshingWithPending {
            self.gate.transition(&mut state, RefreshState::Refreshing);
            Some(RefreshPermit {
                gate: Arc::clone(&self.gate),
                armed: true,
            })
        } else {
            self.gate.transition(&mut state, RefreshState::Idle);
            None
        }
    }
}

impl Drop for RefreshPermit {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self
                .gate
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.gate.transition(&mut state, RefreshState::Idle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_queue_once_then_coalesce() {
        let gate = RefreshGate::new(OverlapPolicy::Queue);

        let Admission::Run(permit) = gate.try_acquire() else {
            panic!("idle gate must admit");
        };
        assert_eq!(gate.state(), RefreshState::Refreshing);

        assert!(matches!(gate.try_acquire(), Admission::Queued));
        assert_eq!(gate.state(), RefreshState::RefreshingWithPending);
        assert!(matches!(gate.try_acquire(), Admission::Coalesced));
        assert!(matches!(gate.try_acquire(), Admission::Coalesced));

        // exactly one queued run follows
        let next = permit.complete().expect("queued run");
        assert_eq!(gate.state(), RefreshState::Refreshing);
        assert!(next.complete().is_none());
        assert_eq!(gate.state(), RefreshState::Idle);
    }

    #[test]
    fn test_skip_policy_drops_triggers() {
        let gate = RefreshGate::new(OverlapPolicy::Skip);
        let Admission::Run(permit) = gate.try_acquire() else {
            panic!("idle gate must admit");
        };
        assert!(matches!(gate.try_acquire(), Admission::Skipped));
        assert!(permit.complete().is_none());
        assert!(matches!(gate.try_acquire(), Admission::Run(_)));
    }

    #[test]
    fn test_dropped_permit_releases() {
        let gate = RefreshGate::new(OverlapPolicy::Queue);
        {
            let _permit = gate.try_acquire();
            assert!(matches!(gate.try_acquire(), Admission::Queued));
        }
        assert_eq!(gate.state(), RefreshState::Idle);
    }

    #[test]
    fn test_observer_sees_every_transition() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let gate = RefreshGate::with_observer(OverlapPolicy::Queue, move |state| {
            sink.lock().unwrap().push(state);
        });

        let Admission::Run(permit) = gate.try_acquire() else {
            panic!("idle gate must admit");
        };
        gate.try_acquire();
        gate.try_acquire();
        permit.complete().unwrap().complete();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                RefreshState::Refreshing,
                RefreshState::RefreshingWithPending,
                RefreshState::Refreshing,
                RefreshState::Idle,
            ]
        );
    }

    #[test]
    fn test_single_runner_across_threads() {
        let gate = RefreshGate::new(OverlapPolicy::Skip);
        let running = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let running = Arc::clone(&running);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    if let Admission::Run(permit) = gate.try_acquire() {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(10));
                        running.fetch_sub(1, Ordering::SeqCst);
                        permit.complete();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(gate.state(), RefreshState::Idle);
    }
}
