use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::time::Duration;

/// Work a node defers until input settles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Deferred {
    Snapshot,
    Persist,
}

struct TimeTask {
    id: u64,
    execute_time: Duration,
    task: Deferred,
}

impl Eq for TimeTask {}

impl PartialEq<Self> for TimeTask {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl PartialOrd<Self> for TimeTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeTask {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.execute_time == other.execute_time {
            self.id.cmp(&other.id)
        } else {
            self.execute_time.cmp(&other.execute_time)
        }
    }
}

/// Trailing-edge debouncer over an externally supplied time.
///
/// Scheduling a task that is already pending pushes its deadline back instead
/// of queueing a second run, so a burst of requests collapses into one.
pub struct Scheduler {
    next_task_id: u64,
    tasks: BTreeSet<TimeTask>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            next_task_id: 1,
            tasks: BTreeSet::new(),
        }
    }

    pub fn debounce(&mut self, task: Deferred, now: Duration, delay: Duration) {
        self.cancel(task);
        let id = self.next_task_id;
        self.next_task_id += 1;
        self.tasks.insert(TimeTask {
            id,
            execute_time: now + delay,
            task,
        });
    }

    pub fn cancel(&mut self, task: Deferred) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.task != task);
        before != self.tasks.len()
    }

    pub fn is_pending(&self, task: Deferred) -> bool {
        self.tasks.iter().any(|t| t.task == task)
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.tasks.first().map(|t| t.execute_time)
    }

    /// Removes and returns every task due at `now`, earliest first.
    pub fn take_due(&mut self, now: Duration) -> Vec<Deferred> {
        let mut due = Vec::new();
        while let Some(first) = self.tasks.first() {
            if first.execute_time > now {
                break;
            }
            if let Some(task) = self.tasks.pop_first() {
                due.push(task.task);
            }
        }
        due
    }

    /// Removes and returns every pending task regardless of its deadline.
    pub fn flush(&mut self) -> Vec<Deferred> {
        let mut all = Vec::with_capacity(self.tasks.len());
        while let Some(task) = self.tasks.pop_first() {
            all.push(task.task);
        }
        all
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::scheduler::{Deferred, Scheduler};
    use std::time::Duration;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_debounce_collapses_burst() {
        let mut scheduler = Scheduler::new();
        for i in 0..50 {
            scheduler.debounce(Deferred::Snapshot, ms(i * 10), ms(300));
        }
        assert!(scheduler.take_due(ms(600)).is_empty());
        assert_eq!(vec![Deferred::Snapshot], scheduler.take_due(ms(790)));
        assert!(!scheduler.is_pending(Deferred::Snapshot));
    }

    #[test]
    fn test_due_order_and_flush() {
        let mut scheduler = Scheduler::new();
        scheduler.debounce(Deferred::Persist, ms(0), ms(500));
        scheduler.debounce(Deferred::Snapshot, ms(0), ms(300));
        assert_eq!(Some(ms(300)), scheduler.next_deadline());
        assert_eq!(
            vec![Deferred::Snapshot, Deferred::Persist],
            scheduler.take_due(ms(1000))
        );

        scheduler.debounce(Deferred::Persist, ms(0), ms(500));
        assert!(scheduler.cancel(Deferred::Persist));
        assert!(scheduler.flush().is_empty());
        scheduler.debounce(Deferred::Persist, ms(0), ms(500));
        assert_eq!(vec![Deferred::Persist], scheduler.flush());
    }
}
