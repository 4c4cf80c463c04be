//! Engine task submission.
//!
//! Worker tasks go to the callback queue; foreground tasks become locked
//! calls; delayed variants are held by a one-shot [`Timer`] until it fires.
//! A delayed task is owned by its timer callback alone, and the callback
//! lets go of the task before it lets go of the controller.
//!
//! Once the controller is released, immediate tasks run synchronously and
//! delayed tasks are dropped.

use crate::controller::IsolateController;
use isogate_engine::{Task, TaskRunner};
use isogate_platform::{Timer, TimerId};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, warn};

/// A worker task shared between the controller and its queued callback.
pub(crate) struct PendingTask {
    task: Mutex<Option<Box<dyn Task>>>,
}

impl PendingTask {
    fn new(task: Box<dyn Task>) -> Self {
        Self {
            task: Mutex::new(Some(task)),
        }
    }

    /// Take the task out. Only the first caller gets it.
    pub(crate) fn take(&self) -> Option<Box<dyn Task>> {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl IsolateController {
    /// Run a background task on the callback queue.
    pub fn run_task_async(&self, task: Box<dyn Task>) {
        if self.state().released {
            task.run();
            return;
        }

        let pending = Arc::new(PendingTask::new(task));
        let weak_task = Arc::downgrade(&pending);
        self.state().async_tasks.push(pending);

        let controller = self.weak_self.clone();
        self.callback_queue.queue(Box::new(move || {
            let Some(controller) = controller.upgrade() else {
                return;
            };
            let Some(pending) = weak_task.upgrade() else {
                return;
            };

            if let Some(task) = pending.take() {
                task.run();
            }
            controller
                .state()
                .async_tasks
                .retain(|task| !Arc::ptr_eq(task, &pending));
        }));
    }

    /// Run a background task after `delay`.
    pub fn run_task_delayed(&self, task: Box<dyn Task>, delay: Duration) {
        if self.state().released {
            return;
        }

        self.start_task_timer(task, delay, |_, task| task.run());
    }

    /// Run a task with the execution lock held.
    pub fn run_task_with_lock_async(&self, task: Box<dyn Task>) {
        if self.state().released {
            task.run();
            return;
        }

        self.call_with_lock_async(move |_| task.run());
    }

    /// Run a task with the execution lock held after `delay`.
    pub fn run_task_with_lock_delayed(&self, task: Box<dyn Task>, delay: Duration) {
        if self.state().released {
            return;
        }

        self.start_task_timer(task, delay, |controller, task| {
            controller.call_with_lock_no_wait(move |_| task.run());
        });
    }

    /// Register a one-shot timer that hands `task` to `dispatch`, then start
    /// it.
    fn start_task_timer<D>(&self, task: Box<dyn Task>, delay: Duration, dispatch: D)
    where
        D: FnOnce(&IsolateController, Box<dyn Task>) + Send + 'static,
    {
        let controller = self.weak_self.clone();
        let mut slot = Some((task, dispatch));

        let timer = Arc::new(Timer::once(delay, move |timer_id| {
            let Some((task, dispatch)) = slot.take() else {
                return;
            };
            match controller.upgrade() {
                // The task is gone before the last controller reference can be
                Some(controller) => {
                    dispatch(&controller, task);
                    controller.discard_task_timer(timer_id);
                }
                None => drop(task),
            }
        }));

        self.state().task_timers.push(Arc::clone(&timer));

        if let Err(err) = timer.start() {
            warn!("Isolate '{}' could not start a task timer: {}", self.name(), err);
            self.discard_task_timer(timer.id());
        }
    }

    fn discard_task_timer(&self, timer_id: TimerId) {
        let timer = {
            let mut state = self.state();
            state
                .task_timers
                .iter()
                .position(|timer| timer.id() == timer_id)
                .map(|index| state.task_timers.swap_remove(index))
        };
        drop(timer);
    }

    /// The foreground task runner the engine posts to for this isolate.
    pub fn foreground_task_runner(&self) -> Arc<dyn TaskRunner> {
        let mut state = self.state();
        let runner = state.foreground_runner.get_or_insert_with(|| {
            Arc::new(ForegroundTaskRunner {
                controller: self.weak_self.clone(),
            })
        });
        Arc::clone(runner) as Arc<dyn TaskRunner>
    }
}

/// Foreground task runner bound to one isolate.
///
/// Holds the isolate weakly: once it is gone, immediate tasks run on the
/// posting thread and delayed tasks are dropped.
pub struct ForegroundTaskRunner {
    controller: Weak<IsolateController>,
}

impl TaskRunner for ForegroundTaskRunner {
    fn post_task(&self, task: Box<dyn Task>) {
        match self.controller.upgrade() {
            Some(controller) => controller.run_task_with_lock_async(task),
            None => task.run(),
        }
    }

    fn post_delayed_task(&self, task: Box<dyn Task>, delay: Duration) {
        match self.controller.upgrade() {
            Some(controller) => controller.run_task_with_lock_delayed(task, delay),
            None => debug!("Dropped delayed foreground task for a destroyed isolate"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::IsolateBuilder;
    use crate::testing::{build, wait_until, ManualQueue};
    use crossbeam_channel::unbounded;
    use isogate_engine::SimEngine;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_async_task_runs_from_callback_queue() {
        let sim = SimEngine::new();
        let queue = Arc::new(ManualQueue::default());
        let controller = IsolateBuilder::new("async")
            .callback_queue(queue.clone())
            .build(&sim)
            .unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&ran);
        controller.run_task_async(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(controller.pending_async_tasks(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        assert_eq!(queue.run_all(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(controller.pending_async_tasks(), 0);
    }

    #[test]
    fn test_delayed_task_runs_and_timer_is_discarded() {
        let sim = SimEngine::new();
        let controller = build(&sim);
        let (tx, rx) = unbounded();

        controller.run_task_delayed(
            Box::new(move || tx.send("fired").unwrap()),
            Duration::from_millis(100),
        );
        assert_eq!(controller.pending_task_timers(), 1);

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok("fired"));
        assert!(wait_until(|| controller.pending_task_timers() == 0));
    }

    #[test]
    fn test_task_with_lock_runs_when_isolate_is_entered() {
        let sim = SimEngine::new();
        let controller = build(&sim);
        let (tx, rx) = unbounded();

        controller.run_task_with_lock_async(Box::new(move || tx.send(()).unwrap()));
        assert!(rx.try_recv().is_err());

        drop(controller.enter());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_delayed_task_with_lock_runs_on_timer_thread_when_free() {
        let sim = SimEngine::new();
        let controller = build(&sim);
        let (tx, rx) = unbounded();

        controller.run_task_with_lock_delayed(
            Box::new(move || tx.send(std::thread::current().name().map(String::from)).unwrap()),
            Duration::from_millis(10),
        );

        let thread_name = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(thread_name.unwrap_or_default().starts_with("isogate-timer-"));
        assert!(wait_until(|| controller.pending_task_timers() == 0));
    }

    /// Hand the only strong reference to a delayed task and check the
    /// isolate is destroyed from the timer thread once the task ran.
    fn assert_torn_down_by_timer<P>(post: P)
    where
        P: FnOnce(&IsolateController, Box<dyn Task>),
    {
        let sim = SimEngine::new();
        let controller = build(&sim);
        let weak = Arc::downgrade(&controller);
        let (tx, rx) = unbounded();

        let held = Arc::clone(&controller);
        let task: Box<dyn Task> = Box::new(move || {
            let _ = tx.send(std::thread::current().name().map(String::from));
            drop(held);
        });
        post(&controller, task);
        drop(controller);
        assert!(weak.upgrade().is_some());

        let thread_name = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(thread_name.unwrap_or_default().starts_with("isogate-timer-"));
        assert!(wait_until(|| weak.upgrade().is_none()));
        assert!(wait_until(|| sim.is_disposed()));
    }

    #[test]
    fn test_delayed_task_holding_last_reference_tears_down_isolate() {
        assert_torn_down_by_timer(|controller, task| {
            controller.run_task_delayed(task, Duration::from_millis(10));
        });
    }

    #[test]
    fn test_delayed_task_with_lock_holding_last_reference_tears_down_isolate() {
        assert_torn_down_by_timer(|controller, task| {
            controller.run_task_with_lock_delayed(task, Duration::from_millis(10));
        });
    }

    #[test]
    fn test_destroy_runs_async_tasks_and_drops_delayed_ones() {
        const ASYNC_TASKS: usize = 4;
        const DELAYED_TASKS: usize = 3;

        let sim = SimEngine::new();
        let queue = Arc::new(ManualQueue::default());
        let controller = IsolateBuilder::new("destroy")
            .callback_queue(queue.clone())
            .build(&sim)
            .unwrap();
        let async_ran = Arc::new(AtomicUsize::new(0));
        let delayed_ran = Arc::new(AtomicUsize::new(0));

        for _ in 0..ASYNC_TASKS {
            let counter = Arc::clone(&async_ran);
            controller.run_task_async(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        for _ in 0..DELAYED_TASKS {
            let counter = Arc::clone(&delayed_ran);
            controller.run_task_delayed(
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                Duration::from_secs(60),
            );
        }
        assert_eq!(controller.pending_task_timers(), DELAYED_TASKS);

        drop(controller);

        assert_eq!(async_ran.load(Ordering::SeqCst), ASYNC_TASKS);
        assert_eq!(delayed_ran.load(Ordering::SeqCst), 0);

        // Queued callbacks find nothing left to run
        queue.run_all();
        assert_eq!(async_ran.load(Ordering::SeqCst), ASYNC_TASKS);
        assert!(sim.is_disposed());
    }

    #[test]
    fn test_foreground_runner_is_shared() {
        let sim = SimEngine::new();
        let controller = build(&sim);

        let first = controller.foreground_task_runner();
        let second = controller.foreground_task_runner();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!first.idle_tasks_enabled());
    }

    #[test]
    fn test_foreground_runner_outliving_isolate() {
        let sim = SimEngine::new();
        let controller = build(&sim);
        let runner = controller.foreground_task_runner();
        drop(controller);

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        runner.post_task(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        let counter = Arc::clone(&ran);
        runner.post_delayed_task(
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            Duration::from_millis(1),
        );
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
