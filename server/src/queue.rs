//! Bounded concurrency for blame processes.
//!
//! At most `max_parallel` units run at once; the rest wait in FIFO order.
//! Lowering the limit never stops running units, it only delays new starts.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;

type Job = Box<dyn FnOnce() + Send>;

struct QueueState {
    max_parallel: usize,
    running: usize,
    waiting: VecDeque<Job>,
}

fn clamp(max_parallel: i64) -> usize {
    usize::try_from(max_parallel.max(1)).unwrap_or(usize::MAX)
}

/// FIFO queue running at most `max_parallel` futures at a time.
#[derive(Clone)]
pub struct BlameQueue {
    state: Arc<Mutex<QueueState>>,
}

impl BlameQueue {
    /// Create a queue. Limits below 1 are raised to 1.
    pub fn new(max_parallel: i64) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                max_parallel: clamp(max_parallel),
                running: 0,
                waiting: VecDeque::new(),
            })),
        }
    }

    /// Enqueue `task`. It is started as soon as a slot is free, whether or
    /// not the returned future is awaited.
    ///
    /// The returned future yields the task's output, or `None` if the task
    /// panicked.
    pub fn add<F, T>(&self, task: F) -> impl Future<Output = Option<T>> + Send
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let state = Arc::clone(&self.state);

        let job: Job = Box::new(move || {
            tokio::spawn(async move {
                let _slot = Slot { state };
                let _ = tx.send(task.await);
            });
        });

        self.state.lock().waiting.push_back(job);
        run_next(&self.state);

        async move { rx.await.ok() }
    }

    /// Change the limit. Raising it starts waiting units right away.
    pub fn update_parallel(&self, max_parallel: i64) {
        let (old, new) = {
            let mut state = self.state.lock();
            let old = state.max_parallel;
            state.max_parallel = clamp(max_parallel);
            (old, state.max_parallel)
        };

        tracing::debug!("Blame parallelism changed from {} to {}", old, new);

        for _ in 0..new.saturating_sub(old) {
            run_next(&self.state);
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.state.lock().max_parallel
    }

    pub fn running(&self) -> usize {
        self.state.lock().running
    }

    pub fn waiting(&self) -> usize {
        self.state.lock().waiting.len()
    }
}

/// Start the oldest waiting unit if a slot is free.
fn run_next(state: &Arc<Mutex<QueueState>>) {
    let job = {
        let mut state = state.lock();
        if state.running >= state.max_parallel {
            return;
        }
        match state.waiting.pop_front() {
            Some(job) => {
                state.running += 1;
                job
            }
            None => return,
        }
    };

    job();
}

/// A running unit's slot; freed on completion or panic.
struct Slot {
    state: Arc<Mutex<QueueState>>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        {
            let mut state = self.state.lock();
            state.running = state.running.saturating_sub(1);
        }
        run_next(&self.state);
    }
}
