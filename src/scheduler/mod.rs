//! Async operation scheduler
//!
//! Facility calls that span several AT transactions (power-on, opening a
//! bearer, bringing up GPRS) are queued here and run one at a time on a
//! single worker thread. The caller gets a [`Pending`] back at once and
//! blocks on [`Pending::end`] only when it needs the outcome.
//!
//! The worker takes a job only when the channel lock is free, and holds the
//! lock for the whole job. The lock is re-entrant, so the job's own engine
//! calls go straight through.

pub mod pending;

pub use pending::{Completer, Pending};

use crate::channel_lock::ChannelLock;
use crate::constants::SCHEDULER_IDLE_MS;
use crate::error::{ModemError, Result};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A multi-transaction operation run by the scheduler
///
/// `C` is the context handed to the job when it runs (the modem core in
/// the driver).
pub trait AsyncOperation<C>: Send + 'static {
    type Output: Send + 'static;

    /// Short name for logs
    fn name(&self) -> &'static str;

    fn process(&mut self, ctx: &C) -> Result<Self::Output>;
}

/// Runs the operation and returns the step that completes its pending
type Job<C> = Box<dyn FnOnce(&C) -> Finish + Send>;
type Finish = Box<dyn FnOnce() + Send>;

pub struct Scheduler<C> {
    queue: Mutex<VecDeque<Job<C>>>,
    queued: Condvar,
    lock: Arc<ChannelLock>,
    closed: AtomicBool,
}

impl<C: 'static> Scheduler<C> {
    pub fn new(lock: Arc<ChannelLock>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            queued: Condvar::new(),
            lock,
            closed: AtomicBool::new(false),
        }
    }

    /// Queue an operation
    pub fn submit<Op: AsyncOperation<C>>(&self, mut op: Op) -> Pending<Op::Output> {
        let name = op.name();
        debug!(operation = name, "queued");
        self.submit_fn(move |ctx| op.process(ctx))
    }

    /// Queue a closure as an operation
    ///
    /// The completer runs on every exit path: a panic inside `f` completes
    /// the pending with [`ModemError::OperationPanicked`]. Completion happens
    /// after the worker released the channel.
    pub fn submit_fn<T, F>(&self, f: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&C) -> Result<T> + Send + 'static,
    {
        let (pending, completer) = pending::channel();
        let job: Job<C> = Box::new(move |ctx: &C| -> Finish {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(ctx))).unwrap_or_else(
                |payload| {
                    let message = panic_message(payload.as_ref());
                    warn!(%message, "operation panicked");
                    Err(ModemError::OperationPanicked { message })
                },
            );
            Box::new(move || {
                completer.complete(outcome);
            })
        });
        let mut queue = self.queue.lock();
        if self.closed.load(Ordering::SeqCst) {
            drop(queue);
            debug!("scheduler stopped, operation refused");
            drop(job);
            return pending;
        }
        queue.push_back(job);
        drop(queue);
        self.queued.notify_one();
        pending
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Worker loop; returns once `shutdown` is set
    ///
    /// Jobs still queued at shutdown are dropped, which fails their pendings.
    /// Jobs submitted afterwards fail the same way.
    pub fn run(&self, ctx: &C, shutdown: &AtomicBool) {
        let idle = Duration::from_millis(SCHEDULER_IDLE_MS);
        while !shutdown.load(Ordering::Relaxed) {
            if !self.wait_queued(idle) {
                continue;
            }
            let Some(channel) = self.lock.try_grab() else {
                std::thread::sleep(idle);
                continue;
            };
            let Some(job) = self.queue.lock().pop_front() else {
                continue;
            };
            let finish = job(ctx);
            drop(channel);
            finish();
        }
        let dropped = {
            let mut queue = self.queue.lock();
            self.closed.store(true, Ordering::SeqCst);
            std::mem::take(&mut *queue)
        };
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "dropping queued operations");
        }
    }

    fn wait_queued(&self, timeout: Duration) -> bool {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            self.queued.wait_for(&mut queue, timeout);
        }
        !queue.is_empty()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread::JoinHandle;

    struct Counter {
        runs: AtomicUsize,
    }

    struct Harness {
        scheduler: Arc<Scheduler<Counter>>,
        lock: Arc<ChannelLock>,
        shutdown: Arc<AtomicBool>,
        worker: Option<JoinHandle<()>>,
    }

    impl Harness {
        fn start() -> Self {
            let lock = Arc::new(ChannelLock::new());
            let scheduler = Arc::new(Scheduler::new(lock.clone()));
            let shutdown = Arc::new(AtomicBool::new(false));
            let worker = {
                let scheduler = scheduler.clone();
                let shutdown = shutdown.clone();
                std::thread::spawn(move || {
                    let ctx = Counter {
                        runs: AtomicUsize::new(0),
                    };
                    scheduler.run(&ctx, &shutdown);
                })
            };
            Self {
                scheduler,
                lock,
                shutdown,
                worker: Some(worker),
            }
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.shutdown.store(true, Ordering::SeqCst);
            if let Some(worker) = self.worker.take() {
                let _ = worker.join();
            }
        }
    }

    struct Double(u32);

    impl AsyncOperation<Counter> for Double {
        type Output = u32;

        fn name(&self) -> &'static str {
            "double"
        }

        fn process(&mut self, ctx: &Counter) -> Result<u32> {
            ctx.runs.fetch_add(1, Ordering::SeqCst);
            Ok(self.0 * 2)
        }
    }

    #[test]
    fn test_scheduler_runs_operation() {
        let h = Harness::start();
        let pending = h.scheduler.submit(Double(21));
        assert_eq!(pending.end().unwrap(), 42);
    }

    #[test]
    fn test_scheduler_runs_in_submission_order() {
        let h = Harness::start();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let pendings: Vec<_> = (0..5)
            .map(|i| {
                let order = order.clone();
                h.scheduler.submit_fn(move |_| {
                    order.lock().push(i);
                    Ok(())
                })
            })
            .collect();
        for p in pendings {
            p.end().unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_scheduler_reraises_error_on_end() {
        let h = Harness::start();
        let pending = h
            .scheduler
            .submit_fn(|_| -> Result<()> { Err(ModemError::TooManyOpenSockets) });
        assert!(matches!(pending.end(), Err(ModemError::TooManyOpenSockets)));
    }

    #[test]
    fn test_scheduler_captures_panic() {
        let h = Harness::start();
        let pending = h
            .scheduler
            .submit_fn(|_| -> Result<u8> { panic!("modem exploded") });
        match pending.end() {
            Err(ModemError::OperationPanicked { message }) => {
                assert_eq!(message, "modem exploded")
            }
            other => panic!("Expected OperationPanicked, got {:?}", other),
        }
        // the worker survives
        assert_eq!(h.scheduler.submit(Double(1)).end().unwrap(), 2);
    }

    #[test]
    fn test_scheduler_waits_for_free_channel() {
        let h = Harness::start();
        let guard = h.lock.grab();
        let pending = h.scheduler.submit(Double(2));
        assert!(!pending.wait_timeout(Duration::from_millis(60)));
        drop(guard);
        assert_eq!(pending.end().unwrap(), 4);
    }

    #[test]
    fn test_scheduler_job_holds_channel() {
        let h = Harness::start();
        let lock = h.lock.clone();
        let pending = h
            .scheduler
            .submit_fn(move |_| Ok(lock.is_held_by_current_thread()));
        assert!(pending.end().unwrap());
        assert!(!h.lock.is_held());
    }

    #[test]
    fn test_scheduler_releases_channel_before_completion() {
        let h = Harness::start();
        for i in 0..20u32 {
            assert_eq!(h.scheduler.submit(Double(i)).end().unwrap(), i * 2);
            let guard = h.lock.try_grab();
            assert!(guard.is_some(), "channel still held after end() on run {}", i);
        }
    }

    #[test]
    fn test_scheduler_shutdown_fails_queued() {
        let lock = Arc::new(ChannelLock::new());
        let scheduler: Scheduler<()> = Scheduler::new(lock);
        let pending = scheduler.submit_fn(|_| Ok(1u8));
        let shutdown = AtomicBool::new(true);
        scheduler.run(&(), &shutdown);
        assert_eq!(scheduler.queued(), 0);
        assert!(matches!(pending.end(), Err(ModemError::NotReady { .. })));

        let late = scheduler.submit_fn(|_| Ok(2u8));
        assert_eq!(scheduler.queued(), 0);
        assert!(matches!(late.end(), Err(ModemError::NotReady { .. })));
    }
}
