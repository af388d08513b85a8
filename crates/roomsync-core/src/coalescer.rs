//! Notification batching for the single observer.
//!
//! Any number of state changes within one tick collapse into one observer
//! call. The coalescer does not own a scheduler: [`UpdateCoalescer::request`]
//! reports when a flush must be scheduled, and whoever drives the engine
//! calls [`UpdateCoalescer::flush`] once the current tick's synchronous work
//! has drained. The snapshot is built at flush time, so the observer always
//! sees the latest state.

use crate::AppSnapshot;

/// Callback receiving every coalesced snapshot.
pub type Observer = Box<dyn FnMut(&AppSnapshot) + Send>;

/// Handle for the registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Batches notification requests into at most one observer call per tick.
pub struct UpdateCoalescer {
    pending: bool,
    observer: Option<(SubscriptionId, Observer)>,
    next_id: u64,
}

impl std::fmt::Debug for UpdateCoalescer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateCoalescer")
            .field("pending", &self.pending)
            .field("observer", &self.observer.as_ref().map(|(id, _)| *id))
            .finish()
    }
}

impl Default for UpdateCoalescer {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateCoalescer {
    /// Create a coalescer with no observer.
    pub fn new() -> Self {
        Self { pending: false, observer: None, next_id: 1 }
    }

    /// Request a notification for the current tick.
    ///
    /// Returns `true` if this call made a notification pending, meaning the
    /// caller must schedule one flush. Returns `false` if one was already
    /// pending.
    pub fn request(&mut self) -> bool {
        if self.pending {
            return false;
        }
        self.pending = true;
        true
    }

    /// Whether a notification is pending.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Register `observer`, silently dropping any previous one.
    ///
    /// Also requests a notification so the new observer receives the current
    /// state. The returned flag has the same meaning as for
    /// [`UpdateCoalescer::request`].
    pub fn subscribe(&mut self, observer: Observer) -> (SubscriptionId, bool) {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.observer = Some((id, observer));
        (id, self.request())
    }

    /// Drop the observer if `id` is still the registered one.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        if self.observer.as_ref().is_some_and(|(current, _)| *current == id) {
            self.observer = None;
            return true;
        }
        false
    }

    /// Whether an observer is registered.
    pub fn has_observer(&self) -> bool {
        self.observer.is_some()
    }

    /// Deliver the pending notification, if any.
    ///
    /// Clears the pending flag before calling the observer. `snapshot` is
    /// only evaluated when an observer is registered. Returns `true` if the
    /// observer was called.
    pub fn flush(&mut self, snapshot: impl FnOnce() -> AppSnapshot) -> bool {
        if !std::mem::take(&mut self.pending) {
            return false;
        }
        match self.observer.as_mut() {
            Some((_, observer)) => {
                observer(&snapshot());
                true
            },
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn snapshot(nickname: &str) -> AppSnapshot {
        AppSnapshot {
            identity: None,
            nickname: nickname.to_string(),
            rooms: Vec::new(),
            selected_room: None,
            last_error: None,
        }
    }

    fn recording_observer() -> (Observer, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: Observer = Box::new(move |snap: &AppSnapshot| {
            sink.lock().expect("observer mutex").push(snap.nickname.clone());
        });
        (observer, seen)
    }

    #[test]
    fn many_requests_in_one_tick_notify_once() {
        let mut coalescer = UpdateCoalescer::new();
        let (observer, seen) = recording_observer();
        let (_, scheduled) = coalescer.subscribe(observer);
        assert!(scheduled);
        assert!(coalescer.flush(|| snapshot("initial")));

        let scheduled: Vec<bool> = (0..50).map(|_| coalescer.request()).collect();
        assert_eq!(scheduled.iter().filter(|s| **s).count(), 1);

        assert!(coalescer.flush(|| snapshot("after-50")));
        assert!(!coalescer.flush(|| snapshot("spurious")));
        assert_eq!(*seen.lock().expect("observer mutex"), vec!["initial", "after-50"]);
    }

    #[test]
    fn flush_uses_state_at_flush_time() {
        let mut coalescer = UpdateCoalescer::new();
        let (observer, seen) = recording_observer();
        let _ = coalescer.subscribe(observer);
        let _ = coalescer.flush(|| snapshot("initial"));

        let mut nickname = String::from("first");
        let _ = coalescer.request();
        nickname.push_str("-then-second");
        let _ = coalescer.flush(|| snapshot(&nickname));

        let seen = seen.lock().expect("observer mutex");
        assert_eq!(seen.last().map(String::as_str), Some("first-then-second"));
    }

    #[test]
    fn new_observer_replaces_old_and_gets_current_state() {
        let mut coalescer = UpdateCoalescer::new();
        let (first, first_seen) = recording_observer();
        let (second, second_seen) = recording_observer();

        let (first_id, _) = coalescer.subscribe(first);
        let _ = coalescer.flush(|| snapshot("one"));
        let (_, scheduled) = coalescer.subscribe(second);
        assert!(scheduled);
        let _ = coalescer.flush(|| snapshot("two"));

        assert_eq!(*first_seen.lock().expect("observer mutex"), vec!["one"]);
        assert_eq!(*second_seen.lock().expect("observer mutex"), vec!["two"]);

        // Stale handle must not remove the new observer
        assert!(!coalescer.unsubscribe(first_id));
        assert!(coalescer.has_observer());
    }

    #[test]
    fn flush_without_observer_clears_pending() {
        let mut coalescer = UpdateCoalescer::new();
        assert!(coalescer.request());
        assert!(!coalescer.flush(|| snapshot("nobody")));
        assert!(!coalescer.is_pending());
        assert!(coalescer.request());
    }
}
