//! Display-driven priority of the dependent process
//!
//! While the screen is dark the fingerprint daemon is on the unlock path and
//! gets the highest priority; while the screen is on it drops back to the
//! default. The change runs as deferred work: triggers only mark it pending
//! and a worker thread performs it, so at most one run is ever queued and a
//! run always sees the latest display state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use fpc_protocol::Attribute;

use crate::constants::sched;
use crate::engine::notify::AttributeNotifier;
use crate::engine::state::ActiveState;
use crate::error::{FpcError, Result};

/// "Set the priority of the process with this name" (platform collaborator)
#[cfg_attr(test, mockall::automock)]
pub trait PriorityControl: Send + Sync {
    /// Returns `Ok(false)` when no such process exists
    fn set_named_nice(&self, name: &str, nice: i32) -> Result<bool>;
}

/// Which process to adjust and to what
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityPolicy {
    pub process: String,
    pub nice_display_off: i32,
    pub nice_display_on: i32,
}

impl PriorityPolicy {
    pub fn nice_for(&self, display_on: bool) -> i32 {
        if display_on {
            self.nice_display_on
        } else {
            self.nice_display_off
        }
    }
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        Self {
            process: sched::DEPENDENT_PROCESS.to_string(),
            nice_display_off: sched::MIN_NICE,
            nice_display_on: sched::DEFAULT_NICE,
        }
    }
}

/// Body of the deferred task
pub struct PriorityScheduler {
    state: Arc<ActiveState>,
    control: Arc<dyn PriorityControl>,
    notifier: Arc<AttributeNotifier>,
    policy: PriorityPolicy,
    runs: AtomicU64,
}

impl PriorityScheduler {
    pub fn new(
        state: Arc<ActiveState>,
        control: Arc<dyn PriorityControl>,
        notifier: Arc<AttributeNotifier>,
        policy: PriorityPolicy,
    ) -> Self {
        Self {
            state,
            control,
            notifier,
            policy,
            runs: AtomicU64::new(0),
        }
    }

    /// Apply the priority for the current display state and tell observers
    pub fn run(&self) {
        let display_on = self.state.is_display_on();
        let nice = self.policy.nice_for(display_on);

        match self.control.set_named_nice(&self.policy.process, nice) {
            Ok(true) => info!(
                process = %self.policy.process,
                nice,
                display_on,
                "Dependent process priority updated"
            ),
            Ok(false) => debug!(process = %self.policy.process, "Dependent process not running"),
            Err(e) => warn!(process = %self.policy.process, error = %e, "Failed to set priority"),
        }

        self.notifier.publish(Attribute::ScreenState);
        self.runs.fetch_add(1, Ordering::SeqCst);
    }

    /// Completed runs
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn policy(&self) -> &PriorityPolicy {
        &self.policy
    }
}

enum Job {
    Run,
    Stop,
}

/// Pending flag plus the channel to the executor.
///
/// `schedule` is safe from any context: it never blocks and never queues a
/// second job while one is pending.
pub struct TaskQueue {
    pending: AtomicBool,
    tx: Sender<Job>,
    scheduled: AtomicU64,
}

/// Executor end of a [`TaskQueue`]
pub struct TaskReceiver {
    rx: Receiver<Job>,
    queue: Arc<TaskQueue>,
}

impl TaskQueue {
    pub fn channel() -> (Arc<TaskQueue>, TaskReceiver) {
        let (tx, rx) = mpsc::channel();
        let queue = Arc::new(TaskQueue {
            pending: AtomicBool::new(false),
            tx,
            scheduled: AtomicU64::new(0),
        });
        let receiver = TaskReceiver {
            rx,
            queue: queue.clone(),
        };
        (queue, receiver)
    }

    /// Mark the task pending. Returns false if it already was.
    pub fn schedule(&self) -> bool {
        if self.pending.swap(true, Ordering::AcqRel) {
            return false;
        }
        if self.tx.send(Job::Run).is_err() {
            // Executor is gone; nothing will ever clear the flag
            self.pending.store(false, Ordering::Release);
            return false;
        }
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        true
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Jobs actually queued (coalesced triggers excluded)
    pub fn scheduled(&self) -> u64 {
        self.scheduled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        let _ = self.tx.send(Job::Stop);
    }
}

impl TaskReceiver {
    fn execute(&self, task: &dyn Fn()) {
        // Clear first: a trigger arriving while the task runs queues one more
        self.queue.pending.store(false, Ordering::Release);
        task();
    }

    /// Run everything queued right now without blocking. Returns runs done.
    pub fn run_pending(&self, task: &dyn Fn()) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            match job {
                Job::Run => {
                    self.execute(task);
                    ran += 1;
                }
                Job::Stop => break,
            }
        }
        ran
    }

    /// Block running jobs until the queue is stopped
    pub fn run_until_stopped(self, task: &dyn Fn()) {
        while let Ok(Job::Run) = self.rx.recv() {
            self.execute(task);
        }
    }
}

/// Worker thread executing the priority task
pub struct PriorityWorker {
    queue: Arc<TaskQueue>,
    handle: Option<JoinHandle<()>>,
}

impl PriorityWorker {
    pub fn spawn(receiver: TaskReceiver, scheduler: Arc<PriorityScheduler>) -> Result<Self> {
        let queue = receiver.queue.clone();
        let handle = thread::Builder::new()
            .name("fpc-pm-work".into())
            .spawn(move || {
                debug!("Priority worker started");
                receiver.run_until_stopped(&|| scheduler.run());
                debug!("Priority worker stopped");
            })
            .map_err(|e| FpcError::generic(format!("cannot spawn priority worker: {}", e)))?;
        Ok(Self {
            queue,
            handle: Some(handle),
        })
    }
}

impl Drop for PriorityWorker {
    fn drop(&mut self) {
        // A queued run still completes before Stop is seen
        self.queue.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use std::cell::Cell;

    fn scheduler(display_on: bool, control: MockPriorityControl) -> (Arc<ActiveState>, Arc<AttributeNotifier>, PriorityScheduler) {
        let state = Arc::new(ActiveState::new(display_on));
        let notifier = Arc::new(AttributeNotifier::new());
        let s = PriorityScheduler::new(
            state.clone(),
            Arc::new(control),
            notifier.clone(),
            PriorityPolicy::default(),
        );
        (state, notifier, s)
    }

    #[test]
    fn test_display_off_escalates() {
        let mut control = MockPriorityControl::new();
        control
            .expect_set_named_nice()
            .with(eq("fingerprintd"), eq(-20))
            .times(1)
            .returning(|_, _| Ok(true));
        let (_state, notifier, s) = scheduler(false, control);
        s.run();
        assert_eq!(notifier.generation(Attribute::ScreenState), 1);
        assert_eq!(s.runs(), 1);
    }

    #[test]
    fn test_display_on_restores_default() {
        let mut control = MockPriorityControl::new();
        control
            .expect_set_named_nice()
            .with(eq("fingerprintd"), eq(0))
            .times(1)
            .returning(|_, _| Ok(true));
        let (_state, _notifier, s) = scheduler(true, control);
        s.run();
    }

    #[test]
    fn test_absent_process_still_publishes() {
        let mut control = MockPriorityControl::new();
        control.expect_set_named_nice().returning(|_, _| Ok(false));
        let (_state, notifier, s) = scheduler(true, control);
        s.run();
        assert_eq!(notifier.generation(Attribute::ScreenState), 1);
    }

    #[test]
    fn test_control_error_still_publishes() {
        let mut control = MockPriorityControl::new();
        control
            .expect_set_named_nice()
            .returning(|_, _| Err(FpcError::PermissionDenied("setpriority".into())));
        let (_state, notifier, s) = scheduler(false, control);
        s.run();
        assert_eq!(notifier.generation(Attribute::ScreenState), 1);
    }

    #[test]
    fn test_queue_coalesces_until_run() {
        let (queue, receiver) = TaskQueue::channel();
        assert!(queue.schedule());
        assert!(!queue.schedule());
        assert!(!queue.schedule());
        assert!(queue.is_pending());

        let runs = Cell::new(0);
        assert_eq!(receiver.run_pending(&|| runs.set(runs.get() + 1)), 1);
        assert_eq!(runs.get(), 1);
        assert!(!queue.is_pending());
        assert_eq!(queue.scheduled(), 1);

        // Next trigger after the run queues again
        assert!(queue.schedule());
        assert_eq!(receiver.run_pending(&|| runs.set(runs.get() + 1)), 1);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_trigger_during_run_queues_one_more() {
        let (queue, receiver) = TaskQueue::channel();
        queue.schedule();
        let q = queue.clone();
        let first = Cell::new(true);
        let ran = receiver.run_pending(&|| {
            if first.replace(false) {
                assert!(q.schedule());
                assert!(!q.schedule());
            }
        });
        // The trigger raised mid-run is picked up by the same drain
        assert_eq!(ran, 2);
        assert_eq!(queue.scheduled(), 2);
        assert!(!queue.is_pending());
    }

    #[test]
    fn test_worker_runs_and_stops() {
        let mut control = MockPriorityControl::new();
        control.expect_set_named_nice().returning(|_, _| Ok(false));
        let (_state, notifier, s) = scheduler(true, control);
        let s = Arc::new(s);
        let (queue, receiver) = TaskQueue::channel();
        let worker = PriorityWorker::spawn(receiver, s.clone()).unwrap();

        let seen = notifier.generation(Attribute::ScreenState);
        queue.schedule();
        assert!(notifier
            .wait_past(Attribute::ScreenState, seen, std::time::Duration::from_secs(5))
            .is_some());
        drop(worker);
        assert_eq!(s.runs(), 1);
        assert!(!queue.schedule());
    }
}
