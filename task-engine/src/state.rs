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

//! The atomic state word: a single `u32` partitioned into public creation
//! flags (lowest byte), internal creation flags (next byte), and lifecycle
//! bits (top two bytes). All multi-bit transitions go through
//! [`StateWord::atomic_update`], a compare-and-set loop that only succeeds
//! if none of a caller-supplied set of illegal bits is already present.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

pub mod creation_mask {
    pub const PUBLIC_OPTIONS: u32 = 0x0000_00FF;
    pub const INTERNAL_OPTIONS: u32 = 0x0000_FF00;
    pub const INTERNAL_SHIFT: u32 = 8;
}

/// Internal (non-public) creation flags, packed into the state word's second byte.
pub mod internal_flags {
    pub const PROMISE: u8 = 1 << 0;
    pub const CONTINUATION: u8 = 1 << 1;
    pub const SELF_REPLICATING: u8 = 1 << 2;
}

pub mod lifecycle {
    pub const STARTED: u32 = 1 << 16;
    pub const DELEGATE_INVOKED: u32 = 1 << 17;
    pub const DISPOSED: u32 = 1 << 18;
    pub const EXCEPTION_OBSERVED_BY_PARENT: u32 = 1 << 19;
    pub const CANCELLATION_ACKNOWLEDGED: u32 = 1 << 20;
    pub const FAULTED: u32 = 1 << 21;
    pub const CANCELED: u32 = 1 << 22;
    pub const WAITING_ON_CHILDREN: u32 = 1 << 23;
    pub const RAN_TO_COMPLETION: u32 = 1 << 24;
    pub const WAITING_FOR_ACTIVATION: u32 = 1 << 25;
    pub const COMPLETION_RESERVED: u32 = 1 << 26;
    /// Legacy thread-abort handling is not a supported failure mode in this
    /// runtime (see design note in SPEC_FULL.md §9); the bit is retained for
    /// state-word shape parity but is never set.
    pub const THREAD_ABORTED: u32 = 1 << 27;
    pub const WAIT_NOTIFY: u32 = 1 << 28;
    pub const EXEC_CTX_NULL: u32 = 1 << 29;
    pub const SCHEDULED_FIRED: u32 = 1 << 30;

    pub const COMPLETED_MASK: u32 = FAULTED | CANCELED | RAN_TO_COMPLETION;
}

/// Derived projection of the state word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Created,
    WaitingForActivation,
    WaitingToRun,
    Running,
    WaitingForChildrenToComplete,
    RanToCompletion,
    Canceled,
    Faulted,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug)]
pub struct StateWord(AtomicU32);

impl StateWord {
    pub fn new(public_options: u8, internal_options: u8, starts_waiting_for_activation: bool) -> Self {
        let mut v = (public_options as u32) | ((internal_options as u32) << creation_mask::INTERNAL_SHIFT);
        if starts_waiting_for_activation {
            v |= lifecycle::WAITING_FOR_ACTIVATION;
        }
        Self(AtomicU32::new(v))
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> u32 {
        self.0.load(order)
    }

    pub fn public_options(&self) -> u8 {
        (self.load(Ordering::Acquire) & creation_mask::PUBLIC_OPTIONS) as u8
    }

    pub fn internal_options(&self) -> u8 {
        ((self.load(Ordering::Acquire) & creation_mask::INTERNAL_OPTIONS) >> creation_mask::INTERNAL_SHIFT) as u8
    }

    pub fn is_promise(&self) -> bool {
        self.internal_options() & internal_flags::PROMISE != 0
    }

    pub fn is_continuation(&self) -> bool {
        self.internal_options() & internal_flags::CONTINUATION != 0
    }

    pub fn is_completed(&self) -> bool {
        self.load(Ordering::Acquire) & lifecycle::COMPLETED_MASK != 0
    }

    pub fn has_any(&self, bits: u32) -> bool {
        self.load(Ordering::Acquire) & bits != 0
    }

    pub fn has_all(&self, bits: u32) -> bool {
        self.load(Ordering::Acquire) & bits == bits
    }

    /// Generic compare-and-set transition. Fails (returns `false`, state
    /// unchanged) if any bit in `illegal_bits` is already set; otherwise ORs
    /// `new_bits` in and succeeds.
    pub fn atomic_update(&self, new_bits: u32, illegal_bits: u32) -> bool {
        loop {
            let current = self.0.load(Ordering::Acquire);
            if current & illegal_bits != 0 {
                return false;
            }
            let next = current | new_bits;
            if next == current {
                return true;
            }
            match self.0.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return true,
                Err(_) => continue,
            }
        }
    }

    /// Clears `bits` unconditionally. Used only for bookkeeping bits
    /// (`WAITING_ON_CHILDREN`) that are never raced against illegal-state checks.
    pub fn clear(&self, bits: u32) {
        self.0.fetch_and(!bits, Ordering::AcqRel);
    }

    /// OR in `STARTED`, failing if the task is already canceled or already started.
    /// Serializes `Start` against a racing cancellation callback.
    pub fn mark_started(&self) -> bool {
        self.atomic_update(lifecycle::STARTED, lifecycle::CANCELED | lifecycle::STARTED)
    }

    pub fn status(&self) -> Status {
        let s = self.load(Ordering::Acquire);
        if s & lifecycle::FAULTED != 0 {
            Status::Faulted
        } else if s & lifecycle::CANCELED != 0 {
            Status::Canceled
        } else if s & lifecycle::RAN_TO_COMPLETION != 0 {
            Status::RanToCompletion
        } else if s & lifecycle::WAITING_ON_CHILDREN != 0 {
            Status::WaitingForChildrenToComplete
        } else if s & lifecycle::DELEGATE_INVOKED != 0 {
            Status::Running
        } else if s & lifecycle::STARTED != 0 {
            Status::WaitingToRun
        } else if s & lifecycle::WAITING_FOR_ACTIVATION != 0 {
            Status::WaitingForActivation
        } else {
            Status::Created
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_most_one_terminal_bit_observed() {
        let word = StateWord::new(0, 0, false);
        assert!(word.atomic_update(lifecycle::RAN_TO_COMPLETION, 0));
        // A second, distinct terminal bit must be rejected because the first is now illegal.
        assert!(!word.atomic_update(lifecycle::FAULTED, lifecycle::COMPLETED_MASK));
        assert_eq!(word.load(Ordering::Acquire) & lifecycle::COMPLETED_MASK, lifecycle::RAN_TO_COMPLETION);
    }

    #[test]
    fn double_start_rejected() {
        let word = StateWord::new(0, 0, false);
        assert!(word.mark_started());
        assert!(!word.atomic_update(lifecycle::STARTED, lifecycle::STARTED));
    }

    #[test]
    fn start_after_cancel_fails() {
        let word = StateWord::new(0, 0, false);
        assert!(word.atomic_update(lifecycle::CANCELED, 0));
        assert!(!word.mark_started());
    }

    #[test]
    fn status_projection_progression() {
        let word = StateWord::new(0, 0, false);
        assert_eq!(word.status(), Status::Created);
        assert!(word.mark_started());
        assert_eq!(word.status(), Status::WaitingToRun);
        assert!(word.atomic_update(lifecycle::DELEGATE_INVOKED, lifecycle::DELEGATE_INVOKED));
        assert_eq!(word.status(), Status::Running);
        assert!(word.atomic_update(lifecycle::RAN_TO_COMPLETION, 0));
        assert_eq!(word.status(), Status::RanToCompletion);
    }
}
