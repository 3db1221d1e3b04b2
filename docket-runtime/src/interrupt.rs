//! Interruptible condition-variable waits.
//!
//! Operations block at a small number of well-known suspension points
//! (waiting for a session to become available, waiting for a quiesce
//! drain). Every such wait goes through
//! [`OperationContext::wait_for_condition_or_interrupt`], which observes
//! the operation's kill flag and deadline and fails the wait with
//! [`RuntimeError::Interrupted`] instead of sleeping through them.
//!
//! Interruption is edge-triggered: the killer notifies the condvar the
//! operation registered before sleeping. A registration/notify race can
//! miss one wakeup, so waits sleep in bounded slices and re-check; an
//! interrupt is observed within one slice at worst.

use std::fmt;
use std::sync::{Arc, Condvar, MutexGuard};
use std::time::{Duration, Instant};

use crate::context::OperationContext;
use crate::error::{RuntimeError, RuntimeResult};

/// Upper bound on a single uninterrupted sleep inside a wait.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Why an operation was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptReason {
    /// The operation was explicitly killed.
    Killed,
    /// The operation's deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for InterruptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Killed => write!(f, "killed"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// Per-operation interrupt state, guarded by the operation's own mutex.
#[derive(Debug, Default)]
pub(crate) struct InterruptState {
    /// Set once by [`OperationContext::interrupt`]; never cleared.
    killed: bool,
    /// Absolute deadline, if the operation has one.
    deadline: Option<Instant>,
    /// The condvar an in-progress wait is sleeping on, so the killer can
    /// wake it.
    waiting_on: Option<Arc<Condvar>>,
}

impl OperationContext {
    /// Marks the operation as killed and wakes any in-progress wait.
    pub fn interrupt(&self) {
        let waiting_on = {
            let mut state = self.interrupt_state();
            state.killed = true;
            state.waiting_on.clone()
        };
        if let Some(cv) = waiting_on {
            cv.notify_all();
        }
    }

    /// Sets the operation's deadline and wakes any in-progress wait so it
    /// can re-evaluate its remaining time.
    pub fn set_deadline(&self, deadline: Instant) {
        let waiting_on = {
            let mut state = self.interrupt_state();
            state.deadline = Some(deadline);
            state.waiting_on.clone()
        };
        if let Some(cv) = waiting_on {
            cv.notify_all();
        }
    }

    /// Returns an error if the operation has been killed or its deadline
    /// has passed.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Interrupted`] with the triggering reason.
    pub fn check_for_interrupt(&self) -> RuntimeResult<()> {
        let state = self.interrupt_state();
        if state.killed {
            return Err(RuntimeError::Interrupted {
                op_id: self.id(),
                reason: InterruptReason::Killed,
            });
        }
        if let Some(deadline) = state.deadline {
            if Instant::now() >= deadline {
                return Err(RuntimeError::Interrupted {
                    op_id: self.id(),
                    reason: InterruptReason::DeadlineExceeded,
                });
            }
        }
        Ok(())
    }

    /// Blocks on `cv` until `predicate` holds, the operation is killed,
    /// or its deadline passes.
    ///
    /// The caller's `guard` is released while sleeping and reacquired on
    /// wakeup, exactly like a plain condvar wait. On interruption the
    /// guard is dropped and the caller's protected state is untouched.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Interrupted`] if the operation is killed
    /// or deadlined before the predicate holds.
    pub fn wait_for_condition_or_interrupt<'a, T, F>(
        &self,
        cv: &Arc<Condvar>,
        mut guard: MutexGuard<'a, T>,
        mut predicate: F,
    ) -> RuntimeResult<MutexGuard<'a, T>>
    where
        F: FnMut(&T) -> bool,
    {
        self.interrupt_state().waiting_on = Some(Arc::clone(cv));

        let result = loop {
            if predicate(&guard) {
                break Ok(guard);
            }
            if let Err(err) = self.check_for_interrupt() {
                break Err(err);
            }
            let slice = self.remaining_wait_slice();
            let (reacquired, _timed_out) = cv
                .wait_timeout(guard, slice)
                .expect("mutex poisoned during interruptible wait");
            guard = reacquired;
        };

        self.interrupt_state().waiting_on = None;
        result
    }

    /// Returns how long the next sleep slice may last: bounded by
    /// [`WAIT_SLICE`] and by the time remaining until the deadline.
    fn remaining_wait_slice(&self) -> Duration {
        let state = self.interrupt_state();
        state.deadline.map_or(WAIT_SLICE, |deadline| {
            deadline
                .saturating_duration_since(Instant::now())
                .min(WAIT_SLICE)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ServiceContext;
    use std::sync::Mutex;
    use std::thread;

    #[test]
    fn test_check_for_interrupt_passes_by_default() {
        let service = ServiceContext::new();
        let client = service.make_client();
        let op = client.make_operation();
        assert!(op.check_for_interrupt().is_ok());
    }

    #[test]
    fn test_interrupt_fails_check() {
        let service = ServiceContext::new();
        let client = service.make_client();
        let op = client.make_operation();
        op.interrupt();
        let err = op.check_for_interrupt().unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Interrupted {
                reason: InterruptReason::Killed,
                ..
            }
        ));
    }

    #[test]
    fn test_elapsed_deadline_fails_check() {
        let service = ServiceContext::new();
        let client = service.make_client();
        let op = client.make_operation();
        op.set_deadline(Instant::now() - Duration::from_millis(1));
        let err = op.check_for_interrupt().unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Interrupted {
                reason: InterruptReason::DeadlineExceeded,
                ..
            }
        ));
    }

    #[test]
    fn test_wait_returns_once_predicate_holds() {
        let service = ServiceContext::new();
        let client = service.make_client();
        let op = client.make_operation();

        let state = Arc::new((Mutex::new(false), Arc::new(Condvar::new())));
        let waker = Arc::clone(&state);
        let handle = thread::spawn(move || {
            let (lock, cv) = &*waker;
            *lock.lock().unwrap() = true;
            cv.notify_all();
        });

        let (lock, cv) = &*state;
        let guard = lock.lock().unwrap();
        let guard = op
            .wait_for_condition_or_interrupt(cv, guard, |ready| *ready)
            .unwrap();
        assert!(*guard);
        drop(guard);
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_interrupted_by_kill() {
        let service = ServiceContext::new();
        let client = service.make_client();
        let op = client.make_operation();

        let state = Arc::new((Mutex::new(false), Arc::new(Condvar::new())));
        let killer_op = Arc::clone(&op);
        let handle = thread::spawn(move || {
            killer_op.interrupt();
        });

        let (lock, cv) = &*state;
        let guard = lock.lock().unwrap();
        // The predicate never holds; only the interrupt ends the wait.
        let err = op
            .wait_for_condition_or_interrupt(cv, guard, |ready| *ready)
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Interrupted {
                reason: InterruptReason::Killed,
                ..
            }
        ));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_interrupted_by_deadline() {
        let service = ServiceContext::new();
        let client = service.make_client();
        let op = client.make_operation();
        op.set_deadline(Instant::now() + Duration::from_millis(20));

        let state = Arc::new((Mutex::new(false), Arc::new(Condvar::new())));
        let (lock, cv) = &*state;
        let guard = lock.lock().unwrap();
        let err = op
            .wait_for_condition_or_interrupt(cv, guard, |ready| *ready)
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Interrupted {
                reason: InterruptReason::DeadlineExceeded,
                ..
            }
        ));
    }
}
