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

//! Cooperative cancellation: a `CancellationTokenSource` owns the
//! cancel-once switch; `CancellationToken`s are cheap, clonable observers
//! that can register one-shot callbacks fired exactly once, in registration
//! order, the moment cancellation is requested.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

struct Inner {
    requested: AtomicBool,
    callbacks: Mutex<Vec<(u64, Box<dyn FnOnce() + Send>)>>,
    next_callback_id: AtomicU64,
}

/// Payload thrown via `std::panic::panic_any` when a task body observes a
/// cancellation request through [`crate::task::TaskContext::throw_if_cancellation_requested`].
/// Carries the requesting token's identity so the executor can tell a true
/// acknowledged cancellation apart from an ordinary panic that merely
/// resembles one.
#[derive(Debug, Clone, Copy)]
pub struct CancellationSignal(pub u64);

/// A cheap, clonable handle observers use to check for, and react to, a
/// cancellation request. Two tokens compare equal (by [`CancellationToken::id`])
/// iff they share the same underlying source.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Option<Arc<Inner>>,
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("can_be_canceled", &self.can_be_canceled())
            .field("is_cancellation_requested", &self.is_cancellation_requested())
            .finish()
    }
}

/// A registration returned by [`CancellationToken::register`]; dropping it
/// does not unregister the callback, only calling [`CancellationRegistration::dispose`] does.
pub struct CancellationRegistration {
    inner: Weak<Inner>,
    id: u64,
}

impl CancellationRegistration {
    /// Removes the callback if it has not already fired. No-op if the
    /// source has since been dropped or the callback already ran.
    pub fn dispose(self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.callbacks.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

impl CancellationToken {
    /// A token that can never be canceled (the default for tasks with no
    /// associated source), matching `CancellationToken::none()`.
    pub fn none() -> Self {
        Self { inner: None }
    }

    pub fn is_cancellation_requested(&self) -> bool {
        match &self.inner {
            Some(inner) => inner.requested.load(Ordering::Acquire),
            None => false,
        }
    }

    pub fn can_be_canceled(&self) -> bool {
        self.inner.is_some()
    }

    /// Stable identity for this token's underlying source, used to compare
    /// a thrown [`CancellationSignal`]'s origin against the task's own token.
    pub fn id(&self) -> u64 {
        match &self.inner {
            Some(inner) => Arc::as_ptr(inner) as u64,
            None => 0,
        }
    }

    /// Registers `callback` to run exactly once, the moment cancellation is
    /// requested. If cancellation has already been requested, `callback`
    /// runs synchronously, inline, before this call returns — matching the
    /// teacher's pattern of firing overdue callbacks immediately rather than
    /// silently dropping them.
    pub fn register(&self, callback: impl FnOnce() + Send + 'static) -> CancellationRegistration {
        let Some(inner) = &self.inner else {
            return CancellationRegistration { inner: Weak::new(), id: 0 };
        };
        if inner.requested.load(Ordering::Acquire) {
            callback();
            return CancellationRegistration { inner: Weak::new(), id: 0 };
        }
        let id = inner.next_callback_id.fetch_add(1, Ordering::Relaxed);
        let mut callbacks = inner.callbacks.lock();
        if inner.requested.load(Ordering::Acquire) {
            drop(callbacks);
            callback();
            return CancellationRegistration { inner: Weak::new(), id: 0 };
        }
        callbacks.push((id, Box::new(callback)));
        CancellationRegistration { inner: Arc::downgrade(inner), id }
    }
}

/// Owns the cancel-once switch; `cancel()` is idempotent and drains+fires
/// every registered callback exactly once, in registration order.
pub struct CancellationTokenSource {
    inner: Arc<Inner>,
}

impl CancellationTokenSource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                requested: AtomicBool::new(false),
                callbacks: Mutex::new(Vec::new()),
                next_callback_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn token(&self) -> CancellationToken {
        CancellationToken { inner: Some(self.inner.clone()) }
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }

    /// Requests cancellation. Only the first call has any effect; later
    /// calls are no-ops. Callbacks run on the calling thread.
    pub fn cancel(&self) {
        if self.inner.requested.swap(true, Ordering::AcqRel) {
            return;
        }
        let callbacks = std::mem::take(&mut *self.inner.callbacks.lock());
        for (_, callback) in callbacks {
            callback();
        }
    }
}

impl Default for CancellationTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn none_token_is_never_cancelable() {
        let token = CancellationToken::none();
        assert!(!token.can_be_canceled());
        assert!(!token.is_cancellation_requested());
    }

    #[test]
    fn cancel_fires_registered_callback_once() {
        let source = CancellationTokenSource::new();
        let token = source.token();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        token.register(move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        source.cancel();
        source.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registering_after_cancel_runs_inline() {
        let source = CancellationTokenSource::new();
        source.cancel();
        let token = source.token();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        token.register(move || ran2.store(true, Ordering::SeqCst));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn disposed_registration_does_not_fire() {
        let source = CancellationTokenSource::new();
        let token = source.token();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let reg = token.register(move || ran2.store(true, Ordering::SeqCst));
        reg.dispose();
        source.cancel();
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn distinct_sources_have_distinct_token_ids() {
        let a = CancellationTokenSource::new();
        let b = CancellationTokenSource::new();
        assert_ne!(a.token().id(), b.token().id());
        assert_eq!(a.token().id(), a.token().id());
    }
}
