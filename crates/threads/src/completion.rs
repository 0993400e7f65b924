//! One-shot rendezvous between two execution contexts.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct EventState {
    signaled: bool,
    waited: bool,
    signal_called: bool,
}

/// Lets one execution context block until another one has produced a result.
///
/// The event carries no payload: callers exchange results through a structure
/// both sides capture by reference before calling [`wait`](Self::wait) and
/// [`signal`](Self::signal). Each of the two may be called at most once over
/// the lifetime of the event; a second call panics in every build profile.
///
/// Waiting on an event that only the waiting context could signal deadlocks.
/// That is a caller contract violation which the event cannot detect.
#[derive(Debug, Default)]
pub struct CompletionEvent {
    state: Mutex<EventState>,
    condvar: Condvar,
}

impl CompletionEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until [`signal`](Self::signal) has been called.
    ///
    /// Returns immediately when the signal already happened.
    pub fn wait(&self) {
        let mut state = self.lock_state();
        if state.waited {
            panic!("completion event waited on twice");
        }
        state.waited = true;
        while !state.signaled {
            state = self
                .condvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        tracing::trace!("completion event released waiter");
    }

    /// Wakes the waiter. Must be called from a context other than the waiter's.
    pub fn signal(&self) {
        let mut state = self.lock_state();
        if state.signal_called {
            panic!("completion event signaled twice");
        }
        state.signal_called = true;
        state.signaled = true;
        drop(state);
        self.condvar.notify_one();
    }

    pub fn is_signaled(&self) -> bool {
        self.lock_state().signaled
    }

    fn lock_state(&self) -> MutexGuard<'_, EventState> {
        // A panic while holding the lock can only come from the misuse checks
        // above, which leave the state consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::CompletionEvent;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn signal_from_other_thread_releases_waiter() {
        let event = CompletionEvent::new();
        let result = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                std::thread::sleep(Duration::from_millis(20));
                result.store(42, Ordering::SeqCst);
                event.signal();
            });
            event.wait();
            assert_eq!(result.load(Ordering::SeqCst), 42);
        });

        assert!(event.is_signaled());
    }

    #[test]
    fn signal_before_wait_is_not_lost() {
        let event = Arc::new(CompletionEvent::new());
        let signaler = {
            let event = Arc::clone(&event);
            std::thread::spawn(move || event.signal())
        };
        signaler.join().expect("signaler thread");

        event.wait();
        assert!(event.is_signaled());
    }

    #[test]
    fn request_round_trip_through_channel() {
        struct Request {
            input: u32,
            output: AtomicUsize,
            completion: CompletionEvent,
        }

        let (sender, receiver) = crossbeam_channel::bounded::<Arc<Request>>(1);
        let worker = std::thread::spawn(move || {
            let mut served = 0;
            while let Ok(request) = receiver.recv() {
                request
                    .output
                    .store(request.input as usize * 2, Ordering::SeqCst);
                request.completion.signal();
                served += 1;
            }
            served
        });

        for input in 0..8 {
            let request = Arc::new(Request {
                input,
                output: AtomicUsize::new(0),
                completion: CompletionEvent::new(),
            });
            sender.send(Arc::clone(&request)).expect("send request");
            request.completion.wait();
            assert_eq!(request.output.load(Ordering::SeqCst), input as usize * 2);
        }
        drop(sender);

        assert_eq!(worker.join().expect("worker thread"), 8);
    }

    #[test]
    #[should_panic(expected = "completion event signaled twice")]
    fn double_signal_is_fatal() {
        let event = CompletionEvent::new();
        event.signal();
        event.signal();
    }

    #[test]
    #[should_panic(expected = "completion event waited on twice")]
    fn double_wait_is_fatal() {
        let event = CompletionEvent::new();
        event.signal();
        event.wait();
        event.wait();
    }
}
