//! Cancellable scheduled tasks.
//!
//! A [`TaskScheduler`] does not run anything on its own. Owners poll it with
//! [`TaskScheduler::take_due`] and dispatch the returned task values, which
//! keeps teardown ordering explicit: cancelling a handle guarantees the task
//! is never returned again.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRepeat {
    Once,
    Every(Duration),
}

#[derive(Debug, Clone)]
struct ScheduledTask<Task> {
    handle: TaskHandle,
    task: Task,
    deadline: Instant,
    repeat: TaskRepeat,
}

#[derive(Debug, Clone)]
pub struct TaskScheduler<Task> {
    tasks: Vec<ScheduledTask<Task>>,
    next_handle: u64,
}

impl<Task> Default for TaskScheduler<Task> {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            next_handle: 1,
        }
    }
}

impl<Task: Clone> TaskScheduler<Task> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_once(&mut self, task: Task, now: Instant, delay: Duration) -> TaskHandle {
        self.insert(task, now + delay, TaskRepeat::Once)
    }

    /// Fires every `interval`, first after one interval has elapsed.
    pub fn schedule_repeating(
        &mut self,
        task: Task,
        now: Instant,
        interval: Duration,
    ) -> TaskHandle {
        assert!(
            !interval.is_zero(),
            "repeating task interval must be greater than zero"
        );
        self.insert(task, now + interval, TaskRepeat::Every(interval))
    }

    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|scheduled| scheduled.handle != handle);
        self.tasks.len() != before
    }

    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.tasks.len();
        self.tasks.clear();
        cancelled
    }

    pub fn is_scheduled(&self, handle: TaskHandle) -> bool {
        self.tasks.iter().any(|scheduled| scheduled.handle == handle)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks.iter().map(|scheduled| scheduled.deadline).min()
    }

    /// Returns every task whose deadline is at or before `now`, earliest first.
    ///
    /// One-shot tasks are removed. Repeating tasks fire once per call even if
    /// several periods elapsed, and are rescheduled onto their cadence.
    pub fn take_due(&mut self, now: Instant) -> Vec<Task> {
        let mut due = self
            .tasks
            .iter()
            .filter(|scheduled| scheduled.deadline <= now)
            .map(|scheduled| (scheduled.deadline, scheduled.handle))
            .collect::<Vec<_>>();
        due.sort();

        let mut fired = Vec::with_capacity(due.len());
        for (_, handle) in due {
            let Some(index) = self
                .tasks
                .iter()
                .position(|scheduled| scheduled.handle == handle)
            else {
                continue;
            };
            match self.tasks[index].repeat {
                TaskRepeat::Once => {
                    fired.push(self.tasks.swap_remove(index).task);
                }
                TaskRepeat::Every(interval) => {
                    let scheduled = &mut self.tasks[index];
                    fired.push(scheduled.task.clone());
                    while scheduled.deadline <= now {
                        scheduled.deadline += interval;
                    }
                }
            }
        }
        fired
    }

    fn insert(&mut self, task: Task, deadline: Instant, repeat: TaskRepeat) -> TaskHandle {
        let handle = TaskHandle(self.next_handle);
        self.next_handle = self
            .next_handle
            .checked_add(1)
            .unwrap_or_else(|| panic!("task handle space exhausted"));
        self.tasks.push(ScheduledTask {
            handle,
            task,
            deadline,
            repeat,
        });
        handle
    }
}
