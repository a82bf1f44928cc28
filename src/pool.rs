//! Bounded task queue and fixed worker pool.
//!
//! The queue is a mutex-guarded deque with a condvar standing in for the
//! counting semaphore; `submit` never blocks the producer. Workers run each
//! dequeued task synchronously to completion. A slow task stalls only its own
//! worker thread, never the reactor.

use crate::error::{RavelError, RavelResult};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Contract for anything the pool can execute.
pub trait Runnable: Send + 'static {
    fn run(self);
}

struct QueueState<T> {
    tasks: VecDeque<T>,
    stop: bool,
}

struct Shared<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
    capacity: usize,
}

pub struct WorkerPool<T: Runnable> {
    shared: Arc<Shared<T>>,
    handles: Vec<JoinHandle<()>>,
}

impl<T: Runnable> WorkerPool<T> {
    /// Spawn `threads` workers sharing a queue of at most `capacity` entries.
    ///
    /// Fails fatally on non-positive parameters or if any worker cannot be
    /// spawned; the server does not start without its pool.
    pub fn new(threads: usize, capacity: usize) -> RavelResult<Self> {
        if threads == 0 || capacity == 0 {
            return Err(RavelError::PoolBuild(format!(
                "invalid parameters: threads={}, capacity={}",
                threads, capacity
            )));
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                tasks: VecDeque::with_capacity(capacity),
                stop: false,
            }),
            available: Condvar::new(),
            capacity,
        });

        let core_ids = core_affinity::get_core_ids().unwrap_or_default();
        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let shared = shared.clone();
            let core_id = if core_ids.is_empty() {
                None
            } else {
                Some(core_ids[i % core_ids.len()])
            };
            let handle = thread::Builder::new()
                .name(format!("ravel-worker-{}", i))
                .spawn(move || {
                    if let Some(id) = core_id {
                        if !core_affinity::set_for_current(id) {
                            warn!(worker = i, core = id.id, "failed to pin worker");
                        }
                    }
                    worker_loop(shared);
                })
                .map_err(|e| RavelError::PoolBuild(format!("spawn failed: {}", e)))?;
            handles.push(handle);
        }

        debug!(threads, capacity, "worker pool started");
        Ok(Self { shared, handles })
    }

    /// Enqueue a task without blocking. At capacity (or after shutdown began)
    /// the task is handed back and the caller decides what to do with it.
    pub fn submit(&self, task: T) -> Result<(), T> {
        let mut state = self.shared.state.lock().unwrap();
        if state.stop || state.tasks.len() >= self.shared.capacity {
            return Err(task);
        }
        state.tasks.push_back(task);
        drop(state);
        self.shared.available.notify_one();
        Ok(())
    }

    pub fn queued(&self) -> usize {
        self.shared.state.lock().unwrap().tasks.len()
    }

    /// Stop intake, let queued and in-flight tasks finish, join all workers.
    pub fn shutdown(mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.stop = true;
        }
        self.shared.available.notify_all();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        debug!("worker pool drained and joined");
    }
}

fn worker_loop<T: Runnable>(shared: Arc<Shared<T>>) {
    loop {
        let task = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if let Some(task) = state.tasks.pop_front() {
                    break task;
                }
                if state.stop {
                    return;
                }
                state = shared.available.wait(state).unwrap();
            }
        };
        task.run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountTask {
        counter: Arc<AtomicUsize>,
        gate: Option<Arc<(Mutex<bool>, Condvar)>>,
    }

    impl Runnable for CountTask {
        fn run(self) {
            if let Some(gate) = &self.gate {
                let (lock, cv) = &**gate;
                let mut open = lock.lock().unwrap();
                while !*open {
                    open = cv.wait(open).unwrap();
                }
            }
            self.counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn open_gate(gate: &Arc<(Mutex<bool>, Condvar)>) {
        let (lock, cv) = &**gate;
        *lock.lock().unwrap() = true;
        cv.notify_all();
    }

    #[test]
    fn test_rejects_zero_parameters() {
        assert!(WorkerPool::<CountTask>::new(0, 4).is_err());
        assert!(WorkerPool::<CountTask>::new(4, 0).is_err());
    }

    #[test]
    fn test_full_queue_rejects_without_blocking() {
        let pool = WorkerPool::new(1, 2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new((Mutex::new(false), Condvar::new()));

        // Park the single worker on a gated task.
        pool.submit(CountTask {
            counter: counter.clone(),
            gate: Some(gate.clone()),
        })
        .map_err(|_| ())
        .unwrap();
        while pool.queued() != 0 {
            thread::sleep(Duration::from_millis(1));
        }

        // Fill the queue to capacity behind the parked worker.
        for _ in 0..2 {
            pool.submit(CountTask {
                counter: counter.clone(),
                gate: Some(gate.clone()),
            })
            .map_err(|_| ())
            .unwrap();
        }
        assert_eq!(pool.queued(), 2);

        // One more must bounce, returning the task and leaving the queue as-is.
        let rejected = pool.submit(CountTask {
            counter: counter.clone(),
            gate: Some(gate.clone()),
        });
        assert!(rejected.is_err());
        assert_eq!(pool.queued(), 2);

        open_gate(&gate);
        pool.shutdown();
        // Everything accepted ran; the rejected task did not.
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_each_task_runs_exactly_once() {
        let pool = WorkerPool::new(4, 128).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            pool.submit(CountTask {
                counter: counter.clone(),
                gate: None,
            })
            .map_err(|_| ())
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }
}
