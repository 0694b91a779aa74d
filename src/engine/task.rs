use std::fmt;
use std::mem;
use std::sync::{Condvar, Mutex};

use crate::ArcStr;
use crate::engine::ResultType;
use crate::error::PanError;

type Body<T> = Box<dyn FnOnce() -> Result<T, PanError> + Send>;

enum State<T> {
    Pending(Body<T>),
    Running,
    Done(Result<T, PanError>),
    Cancelled,
    Interrupted,
}

/// A deferred computation that runs at most once and whose outcome every
/// waiter receives a copy of.
pub struct Task<T> {
    key: ArcStr,
    result_type: ResultType,
    state: Mutex<State<T>>,
    done: Condvar,
}

impl<T: Clone + Send> Task<T> {
    pub(crate) fn new<F>(key: &str, result_type: ResultType, body: F) -> Self
    where
        F: FnOnce() -> Result<T, PanError> + Send + 'static,
    {
        Task {
            key: ArcStr::from(key),
            result_type,
            state: Mutex::new(State::Pending(Box::new(body))),
            done: Condvar::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn result_type(&self) -> ResultType {
        self.result_type
    }

    /// Runs the body on the calling thread unless another thread already
    /// claimed it.
    pub fn run(&self) {
        let body = {
            let mut state = self.state.lock().unwrap();
            match mem::replace(&mut *state, State::Running) {
                State::Pending(body) => body,
                other => {
                    *state = other;
                    return;
                }
            }
        };

        let result = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(body)) {
            Ok(result) => result,
            Err(panic) => {
                let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    format!("task panicked: {s}")
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    format!("task panicked: {s}")
                } else {
                    String::from("task panicked with unknown payload")
                };
                Err(PanError::compiler(format!("{msg} [{}]", self.key)))
            }
        };

        *self.state.lock().unwrap() = State::Done(result);
        self.done.notify_all();
    }

    /// Blocks until the task has an outcome.
    pub fn get(&self) -> Result<T, PanError> {
        let mut state = self.state.lock().unwrap();
        loop {
            match &*state {
                State::Pending(_) | State::Running => {
                    state = self.done.wait(state).unwrap();
                }
                State::Done(result) => return result.clone(),
                State::Cancelled => {
                    return Err(PanError::Cancelled {
                        key: self.key.to_string(),
                    });
                }
                State::Interrupted => {
                    return Err(PanError::Interrupted {
                        key: self.key.to_string(),
                    });
                }
            }
        }
    }

    /// Outcome if there already is one.
    pub fn try_get(&self) -> Option<Result<T, PanError>> {
        match &*self.state.lock().unwrap() {
            State::Pending(_) | State::Running => None,
            State::Done(result) => Some(result.clone()),
            State::Cancelled => Some(Err(PanError::Cancelled {
                key: self.key.to_string(),
            })),
            State::Interrupted => Some(Err(PanError::Interrupted {
                key: self.key.to_string(),
            })),
        }
    }

    /// Drops a body that has not started. Running tasks are left alone.
    pub fn cancel(&self) {
        self.finish_pending(State::Cancelled);
    }

    pub fn interrupt(&self) {
        self.finish_pending(State::Interrupted);
    }

    fn finish_pending(&self, terminal: State<T>) {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, State::Pending(_)) {
            *state = terminal;
            drop(state);
            self.done.notify_all();
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.try_lock().as_deref() {
            Ok(State::Pending(_)) => "pending",
            Ok(State::Running) => "running",
            Ok(State::Done(Ok(_))) => "done",
            Ok(State::Done(Err(_))) => "failed",
            Ok(State::Cancelled) => "cancelled",
            Ok(State::Interrupted) => "interrupted",
            Err(_) => "locked",
        };
        f.debug_struct("Task")
            .field("key", &self.key)
            .field("result_type", &self.result_type)
            .field("state", &state)
            .finish()
    }
}

/// Type-erased view of a task, as queued on worker pools and in the results
/// queue.
pub trait Job: Send + Sync {
    fn key(&self) -> &str;
    fn result_type(&self) -> ResultType;
    fn run(&self);
    fn interrupt(&self);
    /// Blocks until done and returns the failure, if any.
    fn wait_error(&self) -> Option<PanError>;
}

impl<T: Clone + Send + Sync> Job for Task<T> {
    fn key(&self) -> &str {
        Task::key(self)
    }

    fn result_type(&self) -> ResultType {
        Task::result_type(self)
    }

    fn run(&self) {
        Task::run(self)
    }

    fn interrupt(&self) {
        Task::interrupt(self)
    }

    fn wait_error(&self) -> Option<PanError> {
        self.get().err()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn test_runs_at_most_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let task = Arc::new(Task::new("k", ResultType::Build, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let task = Arc::clone(&task);
                thread::spawn(move || {
                    task.run();
                    task.get().unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 42);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_becomes_compiler_error() {
        let task: Task<i32> = Task::new("boom", ResultType::Compiled, || panic!("oops"));
        task.run();
        let err = task.get().unwrap_err();
        assert!(matches!(err, PanError::Compiler(_)));
        assert!(err.to_string().contains("task panicked: oops"));
    }

    #[test]
    fn test_interrupted_and_cancelled() {
        let task: Task<i32> = Task::new("a", ResultType::Output, || Ok(1));
        task.interrupt();
        task.run();
        assert!(matches!(task.get(), Err(PanError::Interrupted { key }) if key == "a"));

        let task: Task<i32> = Task::new("b", ResultType::Output, || Ok(1));
        task.cancel();
        assert!(matches!(task.try_get(), Some(Err(PanError::Cancelled { .. }))));

        let task: Task<i32> = Task::new("c", ResultType::Output, || Ok(1));
        task.run();
        task.interrupt();
        assert_eq!(task.get().unwrap(), 1);
    }
}
