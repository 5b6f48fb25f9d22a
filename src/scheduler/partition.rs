//! Greedy longest-processing-time-first partitioning.
//!
//! Tasks are ordered by descending estimate, with never-measured tasks first
//! as if their cost were unbounded, and each is placed on the partition whose
//! accumulated estimate is currently smallest. Ties go to the lowest index.
//!
//! This is the classic LPT heuristic: deterministic, no backtracking, and with
//! known durations the largest partition never exceeds
//! `sum / K + max_task`.

use std::cmp::Ordering;

use crate::task::TestTask;

/// One worker's share of the tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    /// Zero-based position; files and reports use `index + 1`.
    pub index: usize,

    pub tasks: Vec<TestTask>,

    /// Sum of the task weights placed here.
    pub accumulated: f64,
}

impl Partition {
    fn new(index: usize) -> Self {
        Self {
            index,
            tasks: Vec::new(),
            accumulated: 0.0,
        }
    }

    /// One-based partition number.
    pub fn number(&self) -> usize {
        self.index + 1
    }
}

/// Sort order for scheduling: unseen tasks first, then by estimate, largest first.
fn by_priority(a: &TestTask, b: &TestTask) -> Ordering {
    priority(b).total_cmp(&priority(a))
}

/// A known estimate of `0` (a sub-5ms median after rounding) sorts last,
/// behind every positive estimate, rather than alongside unseen tasks.
fn priority(task: &TestTask) -> f64 {
    if task.unseen {
        f64::INFINITY
    } else {
        task.duration
    }
}

/// Splits `tasks` into exactly `count` partitions.
///
/// Every task lands in exactly one partition; partitions may be empty when
/// there are fewer tasks than workers. The sort is stable, so tasks of equal
/// priority keep their input order.
///
/// `count` must be at least 1; callers validate it.
///
/// # Example
///
/// ```
/// use test_scheduler::scheduler::partition::partition;
/// use test_scheduler::task::{SuiteDefinition, TestTask};
///
/// let suite = SuiteDefinition {
///     name: "unit".into(),
///     specs: vec![],
///     exclude_tags: None,
///     environment: None,
///     venv_script: None,
/// };
/// let mut tasks: Vec<TestTask> = ["a", "b", "c"]
///     .iter()
///     .map(|f| TestTask::from_suite(&suite, *f))
///     .collect();
/// for (task, d) in tasks.iter_mut().zip([10.0, 6.0, 5.0]) {
///     task.duration = d;
///     task.unseen = false;
/// }
///
/// let partitions = partition(tasks, 2, 0.1);
/// assert_eq!(partitions[0].accumulated, 10.0);
/// assert_eq!(partitions[1].accumulated, 11.0);
/// ```
pub fn partition(mut tasks: Vec<TestTask>, count: usize, unseen_weight: f64) -> Vec<Partition> {
    let count = count.max(1);
    let mut partitions: Vec<Partition> = (0..count).map(Partition::new).collect();

    tasks.sort_by(by_priority);

    for task in tasks {
        let target = lightest(&partitions);
        let partition = &mut partitions[target];
        partition.accumulated += task.weight(unseen_weight);
        partition.tasks.push(task);
    }

    partitions
}

/// Index of the first partition with the smallest accumulated estimate.
fn lightest(partitions: &[Partition]) -> usize {
    let mut best = 0;
    for (idx, partition) in partitions.iter().enumerate().skip(1) {
        if partition.accumulated < partitions[best].accumulated {
            best = idx;
        }
    }
    best
}
