// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};

/// 32-bit, non-zero, lazily-assigned task identifier.
///
/// The backing counter is monotonic and wraps on overflow; a wrap that would
/// produce 0 is skipped so `TaskId` is always non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(NonZeroU32);

impl TaskId {
    fn next_raw() -> u32 {
        static COUNTER: AtomicU32 = AtomicU32::new(1);
        loop {
            let candidate = COUNTER.fetch_add(1, Ordering::Relaxed);
            if candidate != 0 {
                return candidate;
            }
            // wrapped exactly onto 0; try again with the next value
        }
    }

    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task#{}", self.0)
    }
}

/// Holds a task's id, assigned lazily on first access.
///
/// A race between two threads calling [`LazyTaskId::get_or_assign`] at once
/// is resolved by discarding the loser's generated id; the counter is
/// allowed to have gaps as a result.
#[derive(Debug, Default)]
pub struct LazyTaskId(AtomicU32);

impl LazyTaskId {
    pub const fn unassigned() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn get_or_assign(&self) -> TaskId {
        let current = self.0.load(Ordering::Acquire);
        if let Some(nz) = NonZeroU32::new(current) {
            return TaskId(nz);
        }
        let assigned = TaskId::next_raw();
        match self.0.compare_exchange(0, assigned, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => TaskId(NonZeroU32::new(assigned).expect("next_raw never returns 0")),
            Err(winner) => TaskId(NonZeroU32::new(winner).expect("winner id is non-zero")),
        }
    }

    /// Returns the id only if one has already been assigned, without forcing assignment.
    pub fn peek(&self) -> Option<TaskId> {
        NonZeroU32::new(self.0.load(Ordering::Acquire)).map(TaskId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazily_assigned_and_stable() {
        let lazy = LazyTaskId::unassigned();
        assert!(lazy.peek().is_none());
        let a = lazy.get_or_assign();
        let b = lazy.get_or_assign();
        assert_eq!(a, b);
        assert_eq!(lazy.peek(), Some(a));
    }

    #[test]
    fn distinct_tasks_get_distinct_ids() {
        let a = LazyTaskId::unassigned().get_or_assign();
        let b = LazyTaskId::unassigned().get_or_assign();
        assert_ne!(a, b);
    }
}
