//! Shared/exclusive lock with reentrancy and take-over (§4.C).
//!
//! Gates concurrent action dispatch on a single actor: multiple shared
//! holders, or one exclusive holder, with reentrancy via caller-supplied
//! tokens and a one-way take-over transition that disables the lock for
//! everyone except the taking-over holder's reentrant requests.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;

/// Errors raised by lock operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("lock has been taken over")]
    TakenOver,
    #[error("upgrade from shared to exclusive is not permitted")]
    NoUpgrade,
    #[error("token not held")]
    TokenNotHeld,
}

/// Scheduling hint: which waiter class is favored when both become
/// grantable on the same state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone)]
struct Waiter {
    token: String,
    reentrant: Vec<String>,
}

struct State {
    shared_holders: Vec<Waiter>,
    exclusive_holders: Vec<Waiter>,
    pending_shared: VecDeque<Waiter>,
    pending_exclusive: VecDeque<Waiter>,
    priority: Priority,
    disabled: bool,
}

impl State {
    fn new() -> Self {
        Self {
            shared_holders: Vec::new(),
            exclusive_holders: Vec::new(),
            pending_shared: VecDeque::new(),
            pending_exclusive: VecDeque::new(),
            priority: Priority::Shared,
            disabled: false,
        }
    }

    fn shares_token_with_exclusive(&self, reentrant: &[String]) -> bool {
        self.exclusive_holders
            .iter()
            .any(|h| reentrant.iter().any(|t| t == &h.token))
    }

    fn shares_token_with_shared(&self, reentrant: &[String]) -> bool {
        self.shared_holders
            .iter()
            .any(|h| reentrant.iter().any(|t| t == &h.token))
    }

    fn shared_grantable(&self, w: &Waiter) -> bool {
        if self.disabled {
            return false;
        }
        let no_exclusive = self.exclusive_holders.is_empty();
        let reentrant_ok = self.shares_token_with_exclusive(&w.reentrant);
        if !(no_exclusive || reentrant_ok) {
            return false;
        }
        if self.priority == Priority::Exclusive && !self.pending_exclusive.is_empty() && !reentrant_ok {
            return false;
        }
        true
    }

    fn exclusive_grantable(&self, w: &Waiter) -> bool {
        if self.disabled {
            return false;
        }
        if !self.shared_holders.is_empty() {
            return false;
        }
        self.exclusive_holders.is_empty() || self.shares_token_with_exclusive(&w.reentrant)
    }

    /// Drain as many pending waiters as are currently grantable, admitting
    /// them atomically in enqueue order.
    fn drain_pending(&mut self) {
        loop {
            let mut progressed = false;
            while let Some(w) = self.pending_exclusive.front() {
                if self.exclusive_grantable(w) {
                    let w = self.pending_exclusive.pop_front().unwrap();
                    self.exclusive_holders.push(w);
                    progressed = true;
                } else {
                    break;
                }
            }
            while let Some(w) = self.pending_shared.front() {
                if self.shared_grantable(w) {
                    let w = self.pending_shared.pop_front().unwrap();
                    self.shared_holders.push(w);
                    progressed = true;
                } else {
                    break;
                }
            }
            if !progressed {
                break;
            }
        }
    }
}

/// A single shared/exclusive lock. Cheap to clone; all clones share the
/// same underlying state.
#[derive(Clone)]
pub struct SharedExclusiveLock {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
}

impl Default for SharedExclusiveLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedExclusiveLock {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::new())),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Block until a shared hold is granted for `token`, presenting
    /// `reentrant` tokens that may unblock it against an exclusive holder.
    pub async fn begin_shared(&self, token: &str, reentrant: &[String]) -> Result<(), LockError> {
        loop {
            // Register for the next notification before re-checking state:
            // `Notified` captures `Notify`'s current epoch at creation, so a
            // `notify_waiters()` landing between the check below and the
            // `.await` still wakes this waiter. Registering only after
            // dropping the state guard would lose exactly that wakeup.
            let notified = self.notify.notified();
            {
                let mut s = self.state.lock();
                if s.disabled {
                    return Err(LockError::TakenOver);
                }
                let w = Waiter { token: token.to_string(), reentrant: reentrant.to_vec() };
                if s.pending_shared.is_empty() && s.shared_grantable(&w) {
                    s.shared_holders.push(w);
                    return Ok(());
                }
                if !s.pending_shared.iter().any(|p| p.token == token) {
                    s.pending_shared.push_back(w);
                }
                s.drain_pending();
                if s.shared_holders.iter().any(|h| h.token == token) {
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Non-blocking variant of [`begin_shared`](Self::begin_shared).
    pub fn try_begin_shared(&self, token: &str, reentrant: &[String]) -> bool {
        let mut s = self.state.lock();
        if s.disabled {
            return false;
        }
        let w = Waiter { token: token.to_string(), reentrant: reentrant.to_vec() };
        if s.pending_shared.is_empty() && s.shared_grantable(&w) {
            s.shared_holders.push(w);
            true
        } else {
            false
        }
    }

    pub fn end_shared(&self, token: &str) -> Result<(), LockError> {
        let mut s = self.state.lock();
        let idx = s.shared_holders.iter().position(|h| h.token == token).ok_or(LockError::TokenNotHeld)?;
        s.shared_holders.remove(idx);
        s.drain_pending();
        drop(s);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Block until an exclusive hold is granted for `token`. Rejects
    /// immediately with `NoUpgrade` if `reentrant` would match a shared
    /// hold this caller already holds (upgrading shared→exclusive would
    /// deadlock against other shared holders).
    pub async fn begin_exclusive(&self, token: &str, reentrant: &[String]) -> Result<(), LockError> {
        {
            let s = self.state.lock();
            if s.disabled {
                return Err(LockError::TakenOver);
            }
            if s.shares_token_with_shared(reentrant) {
                return Err(LockError::NoUpgrade);
            }
        }
        loop {
            // See `begin_shared`: register before the check, not after, to
            // avoid losing a `notify_waiters()` that lands in between.
            let notified = self.notify.notified();
            {
                let mut s = self.state.lock();
                if s.disabled {
                    return Err(LockError::TakenOver);
                }
                let w = Waiter { token: token.to_string(), reentrant: reentrant.to_vec() };
                if s.pending_exclusive.is_empty() && s.exclusive_grantable(&w) {
                    s.exclusive_holders.push(w);
                    s.priority = Priority::Exclusive;
                    return Ok(());
                }
                if !s.pending_exclusive.iter().any(|p| p.token == token) {
                    s.priority = Priority::Exclusive;
                    s.pending_exclusive.push_back(w);
                }
                s.drain_pending();
                if s.exclusive_holders.iter().any(|h| h.token == token) {
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    pub fn try_begin_exclusive(&self, token: &str, reentrant: &[String]) -> bool {
        let mut s = self.state.lock();
        if s.disabled || s.shares_token_with_shared(reentrant) {
            return false;
        }
        let w = Waiter { token: token.to_string(), reentrant: reentrant.to_vec() };
        if s.pending_exclusive.is_empty() && s.exclusive_grantable(&w) {
            s.exclusive_holders.push(w);
            s.priority = Priority::Exclusive;
            true
        } else {
            false
        }
    }

    pub fn end_exclusive(&self, token: &str) -> Result<(), LockError> {
        let mut s = self.state.lock();
        let idx = s.exclusive_holders.iter().position(|h| h.token == token).ok_or(LockError::TokenNotHeld)?;
        s.exclusive_holders.remove(idx);
        if s.exclusive_holders.is_empty() && s.pending_exclusive.is_empty() {
            s.priority = Priority::Shared;
        }
        s.drain_pending();
        drop(s);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Enqueue an exclusive request with `token`, pin priority to
    /// exclusive, then reject every other pending waiter with
    /// `TakenOver` and disable the lock to new, non-reentrant requests.
    pub fn take_over(&self, token: &str) {
        tracing::info!(token, "lock take-over requested");
        let mut s = self.state.lock();
        s.priority = Priority::Exclusive;
        if !s.exclusive_holders.iter().any(|h| h.token == token) && !s.pending_exclusive.iter().any(|p| p.token == token) {
            s.pending_exclusive.push_back(Waiter { token: token.to_string(), reentrant: Vec::new() });
        }
        s.pending_shared.clear();
        s.drain_pending();
        drop(s);
        self.notify.notify_waiters();
    }

    /// Reject all pending waiters with `TakenOver` and disable the lock.
    pub fn finalize(&self) {
        tracing::info!("lock finalized, rejecting all pending waiters");
        let mut s = self.state.lock();
        s.disabled = true;
        s.pending_shared.clear();
        s.pending_exclusive.clear();
        drop(s);
        self.notify.notify_waiters();
    }

    pub fn is_disabled(&self) -> bool {
        self.state.lock().disabled
    }

    pub fn shared_holder_count(&self) -> usize {
        self.state.lock().shared_holders.len()
    }

    pub fn exclusive_holder_count(&self) -> usize {
        self.state.lock().exclusive_holders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reentrant_shared_under_exclusive_resolves_immediately() {
        let lock = SharedExclusiveLock::new();
        lock.begin_exclusive("A", &[]).await.unwrap();
        lock.begin_shared("B", &["A".to_string()]).await.unwrap();
        assert_eq!(lock.shared_holder_count(), 1);
        lock.end_shared("B").unwrap();
        lock.end_exclusive("A").unwrap();
        assert_eq!(lock.exclusive_holder_count(), 0);
    }

    #[tokio::test]
    async fn non_reentrant_shared_blocks_behind_exclusive() {
        let lock = SharedExclusiveLock::new();
        lock.begin_exclusive("A", &[]).await.unwrap();
        assert!(!lock.try_begin_shared("B", &[]));
        lock.end_exclusive("A").unwrap();
        assert!(lock.try_begin_shared("B", &[]));
    }

    #[tokio::test]
    async fn upgrade_from_shared_is_rejected() {
        let lock = SharedExclusiveLock::new();
        lock.begin_shared("A", &[]).await.unwrap();
        let err = lock.begin_exclusive("A2", &["A".to_string()]).await.unwrap_err();
        assert_eq!(err, LockError::NoUpgrade);
    }

    #[tokio::test]
    async fn end_without_begin_is_token_not_held() {
        let lock = SharedExclusiveLock::new();
        assert_eq!(lock.end_shared("ghost").unwrap_err(), LockError::TokenNotHeld);
        assert_eq!(lock.end_exclusive("ghost").unwrap_err(), LockError::TokenNotHeld);
    }

    #[tokio::test]
    async fn take_over_queues_ahead_and_wins_the_exclusive_grant() {
        let lock = SharedExclusiveLock::new();
        lock.begin_shared("holder", &[]).await.unwrap();
        lock.take_over("taker");
        lock.end_shared("holder").unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(lock.exclusive_holder_count(), 1);
        lock.end_exclusive("taker").unwrap();
    }

    #[tokio::test]
    async fn finalize_disables_and_rejects_new_requests() {
        let lock = SharedExclusiveLock::new();
        lock.finalize();
        assert_eq!(lock.begin_shared("x", &[]).await.unwrap_err(), LockError::TakenOver);
        assert_eq!(lock.begin_exclusive("y", &[]).await.unwrap_err(), LockError::TakenOver);
    }

    #[tokio::test]
    async fn multiple_shared_holders_coexist() {
        let lock = SharedExclusiveLock::new();
        lock.begin_shared("A", &[]).await.unwrap();
        lock.begin_shared("B", &[]).await.unwrap();
        assert_eq!(lock.shared_holder_count(), 2);
    }
}
