//! Stage groups of the execution plan.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How the members of a group are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// All members hold worker permits at once.
    Parallel,
    /// Members run one after another, in declared order.
    Sequential,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parallel => f.write_str("parallel"),
            Self::Sequential => f.write_str("sequential"),
        }
    }
}

/// A group of tasks dispatched together.
///
/// Groups run strictly in plan order; tasks inside a group follow the
/// group's [`ExecutionMode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage<T> {
    pub tasks: Vec<T>,
    pub execution: ExecutionMode,
}

impl<T> Stage<T> {
    pub fn parallel(tasks: Vec<T>) -> Self {
        Self {
            tasks,
            execution: ExecutionMode::Parallel,
        }
    }

    pub fn sequential(tasks: Vec<T>) -> Self {
        Self {
            tasks,
            execution: ExecutionMode::Sequential,
        }
    }

    /// A group of one. Mode is irrelevant; recorded as sequential.
    pub fn single(task: T) -> Self {
        Self::sequential(vec![task])
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// More than one member.
    pub fn is_group(&self) -> bool {
        self.tasks.len() > 1
    }
}
