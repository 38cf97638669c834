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

//! The common entry points, for `use task_engine::prelude::*;`.

pub use crate::cancellation::{CancellationToken, CancellationTokenSource};
pub use crate::combinators::{delay, run, run_and_unwrap, unwrap, when_all, when_any};
pub use crate::current::current_id;
pub use crate::error::{AggregateException, SchedulerError, TaskError};
pub use crate::handle::{Task, TaskBuilder, TaskCompletionSource};
pub use crate::options::{ContinuationOptions, CreationOptions};
pub use crate::scheduler::{InlineScheduler, Scheduler, ThreadPerTaskScheduler};
pub use crate::state::Status;
pub use crate::task::TaskContext;
pub use crate::wait::{wait_all, wait_any};
