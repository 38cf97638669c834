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

//! The continuation engine: a monitor-guarded slot that holds nothing, one
//! continuation, or a list of continuations, and is sealed (`Sentinel`) the
//! moment the antecedent task finishes draining them. A real lock-free
//! tagged-pointer slot is possible but `parking_lot::Mutex` guarding a small
//! enum is simpler and the critical sections here (push/remove/drain) are
//! always short, matching this codebase's general preference for
//! `Mutex`-guarded state over hand-rolled lock-free structures.

use parking_lot::Mutex;

pub type ContinuationId = u64;

/// A single scheduled reaction to a task's completion.
pub struct Continuation {
    pub id: ContinuationId,
    pub execute_synchronously: bool,
    pub action: Box<dyn FnOnce() + Send>,
}

enum Slot {
    Empty,
    Single(Continuation),
    List(Vec<Continuation>),
    /// The antecedent has finished and drained every continuation; no more
    /// may be added. The slot never regresses out of this state.
    Sentinel,
}

pub struct ContinuationList {
    slot: Mutex<Slot>,
    next_id: Mutex<ContinuationId>,
}

impl Default for ContinuationList {
    fn default() -> Self {
        Self::new()
    }
}

impl ContinuationList {
    pub fn new() -> Self {
        Self { slot: Mutex::new(Slot::Empty), next_id: Mutex::new(1) }
    }

    fn allocate_id(&self) -> ContinuationId {
        let mut next = self.next_id.lock();
        let id = *next;
        *next += 1;
        id
    }

    /// Registers a continuation built from `execute_synchronously`/`action`.
    /// Returns its id if it was queued, or hands the still-unrun `Continuation`
    /// back (as `Err`) if the antecedent has already finished — the caller is
    /// then responsible for invoking the action itself (the antecedent will
    /// never see it, since its drain already ran).
    pub fn add(&self, execute_synchronously: bool, action: Box<dyn FnOnce() + Send>) -> Result<ContinuationId, Continuation> {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Sentinel) {
            return Err(Continuation { id: 0, execute_synchronously, action });
        }
        let id = self.allocate_id();
        let cont = Continuation { id, execute_synchronously, action };
        match &mut *slot {
            Slot::Sentinel => unreachable!(),
            Slot::Empty => *slot = Slot::Single(cont),
            Slot::Single(_) => {
                let Slot::Single(existing) = std::mem::replace(&mut *slot, Slot::Empty) else {
                    unreachable!()
                };
                *slot = Slot::List(vec![existing, cont]);
            }
            Slot::List(list) => list.push(cont),
        }
        Ok(id)
    }

    /// Removes a continuation by id before it has run (used by
    /// `CancellationRegistration`-style disposal of a continuation wrapper).
    /// The slot never regresses from `List` back to `Empty` once it has held
    /// more than one continuation, avoiding needless reallocation churn.
    pub fn remove(&self, id: ContinuationId) -> bool {
        let mut slot = self.slot.lock();
        match &mut *slot {
            Slot::Single(cont) if cont.id == id => {
                *slot = Slot::Empty;
                true
            }
            Slot::List(list) => {
                let before = list.len();
                list.retain(|c| c.id != id);
                list.len() != before
            }
            _ => false,
        }
    }

    /// Atomically seals the slot and returns every continuation registered
    /// so far, in registration order. Idempotent: calling this again returns
    /// an empty vec.
    pub fn finish(&self) -> Vec<Continuation> {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Sentinel) {
            Slot::Empty | Slot::Sentinel => Vec::new(),
            Slot::Single(cont) => vec![cont],
            Slot::List(list) => list,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Sentinel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop_action(order: Arc<AtomicUsize>, tag: usize) -> Box<dyn FnOnce() + Send> {
        Box::new(move || {
            order.store(tag, Ordering::SeqCst);
        })
    }

    #[test]
    fn add_then_finish_drains_in_order() {
        let list = ContinuationList::new();
        let order = Arc::new(AtomicUsize::new(0));
        list.add(false, noop_action(order.clone(), 1)).unwrap();
        list.add(false, noop_action(order.clone(), 2)).unwrap();
        let drained = list.finish();
        assert_eq!(drained.len(), 2);
        assert!(list.is_finished());
    }

    #[test]
    fn add_after_finish_hands_the_continuation_back() {
        let list = ContinuationList::new();
        list.finish();
        let order = Arc::new(AtomicUsize::new(0));
        assert!(list.add(false, noop_action(order, 1)).is_err());
    }

    #[test]
    fn remove_drops_a_pending_continuation() {
        let list = ContinuationList::new();
        let order = Arc::new(AtomicUsize::new(0));
        let id = list.add(false, noop_action(order.clone(), 1)).unwrap();
        assert!(list.remove(id));
        assert_eq!(list.finish().len(), 0);
    }

    #[test]
    fn second_add_promotes_single_to_list() {
        let list = ContinuationList::new();
        let order = Arc::new(AtomicUsize::new(0));
        list.add(false, noop_action(order.clone(), 1)).unwrap();
        list.add(false, noop_action(order.clone(), 2)).unwrap();
        list.add(false, noop_action(order.clone(), 3)).unwrap();
        assert_eq!(list.finish().len(), 3);
    }
}
