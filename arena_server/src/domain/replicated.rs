// Authority-gated replicated values.
//
// `Replicated<T>` is the authority's copy: the only one that accepts writes. Every accepted
// write yields a sequenced `Change` the authority broadcasts. `Replica<T>` is an observer's
// copy; it applies changes strictly in sequence order and ignores anything older than what it
// already shows, so a lagging observer can fall behind but never regress.

use std::fmt;

use tracing::warn;

use crate::domain::entity::Role;
use crate::domain::errors::ArenaError;

pub type ObserverId = u64;

type Callback<T> = Box<dyn FnMut(&T, &T) + Send>;

/// One accepted write, as broadcast to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct Change<T> {
    pub seq: u64,
    pub previous: T,
    pub current: T,
}

/// Ordered list of `(previous, new)` callbacks.
struct Observers<T> {
    next_id: ObserverId,
    callbacks: Vec<(ObserverId, Callback<T>)>,
}

impl<T> Observers<T> {
    fn new() -> Self {
        Self {
            next_id: 1,
            callbacks: Vec::new(),
        }
    }

    fn subscribe(&mut self, callback: Callback<T>) -> ObserverId {
        let id = self.next_id;
        self.next_id += 1;
        self.callbacks.push((id, callback));
        id
    }

    fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(observer, _)| *observer != id);
        self.callbacks.len() != before
    }

    fn notify(&mut self, previous: &T, current: &T) {
        // Registration order is the notification order.
        for (_, callback) in self.callbacks.iter_mut() {
            callback(previous, current);
        }
    }
}

pub struct Replicated<T> {
    value: T,
    seq: u64,
    observers: Observers<T>,
}

impl<T: Clone + PartialEq> Replicated<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            seq: 0,
            observers: Observers::new(),
        }
    }

    /// The authority's copy is always current.
    pub fn read(&self) -> &T {
        &self.value
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn subscribe<F>(&mut self, callback: F) -> ObserverId
    where
        F: FnMut(&T, &T) + Send + 'static,
    {
        self.observers.subscribe(Box::new(callback))
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Writes a new value. Only `Role::Authority` may write; anything else is rejected without
    /// touching the value. Writing the current value again is not a change and yields `None`.
    pub fn write(&mut self, writer: Role, value: T) -> Result<Option<Change<T>>, ArenaError> {
        if writer != Role::Authority {
            warn!(?writer, "rejected replicated write from non-authority");
            return Err(ArenaError::NotAuthority);
        }
        if value == self.value {
            return Ok(None);
        }

        let previous = std::mem::replace(&mut self.value, value);
        self.seq += 1;
        self.observers.notify(&previous, &self.value);

        Ok(Some(Change {
            seq: self.seq,
            previous,
            current: self.value.clone(),
        }))
    }
}

impl<T: fmt::Debug> fmt::Debug for Replicated<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replicated")
            .field("value", &self.value)
            .field("seq", &self.seq)
            .field("observers", &self.observers.callbacks.len())
            .finish()
    }
}

pub struct Replica<T> {
    value: T,
    seq: u64,
    observers: Observers<T>,
}

impl<T: Clone> Replica<T> {
    /// Starts from a known value at a known sequence number (0 for the initial value).
    pub fn new(seq: u64, value: T) -> Self {
        Self {
            value,
            seq,
            observers: Observers::new(),
        }
    }

    pub fn read(&self) -> &T {
        &self.value
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn subscribe<F>(&mut self, callback: F) -> ObserverId
    where
        F: FnMut(&T, &T) + Send + 'static,
    {
        self.observers.subscribe(Box::new(callback))
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Applies a broadcast change. Returns false for stale or duplicate changes.
    ///
    /// Callbacks see the value this replica last showed as `previous`, which differs from
    /// `change.previous` when intermediate writes were missed.
    pub fn apply(&mut self, change: &Change<T>) -> bool {
        if change.seq <= self.seq {
            return false;
        }
        let previous = std::mem::replace(&mut self.value, change.current.clone());
        self.seq = change.seq;
        self.observers.notify(&previous, &self.value);
        true
    }

    /// Adopts a full value after missed broadcasts. Ignored unless `seq` is newer.
    pub fn resync(&mut self, seq: u64, value: T) -> bool
    where
        T: PartialEq,
    {
        if seq <= self.seq {
            return false;
        }
        self.seq = seq;
        if self.value != value {
            let previous = std::mem::replace(&mut self.value, value);
            self.observers.notify(&previous, &self.value);
        }
        true
    }
}

impl<T: fmt::Debug> fmt::Debug for Replica<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replica")
            .field("value", &self.value)
            .field("seq", &self.seq)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<(i32, i32)>>>, impl FnMut(&i32, &i32) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback = move |prev: &i32, new: &i32| {
            sink.lock().expect("recorder mutex poisoned").push((*prev, *new));
        };
        (seen, callback)
    }

    #[test]
    fn when_observer_writes_then_value_is_unchanged_and_error_is_returned() {
        let mut health = Replicated::new(100);
        let (seen, callback) = recorder();
        health.subscribe(callback);

        let result = health.write(Role::Observer, 50);

        assert_eq!(result, Err(ArenaError::NotAuthority));
        assert_eq!(*health.read(), 100);
        assert_eq!(health.seq(), 0);
        assert!(seen.lock().expect("recorder mutex poisoned").is_empty());
    }

    #[test]
    fn when_authority_writes_then_callbacks_fire_in_registration_order() {
        let mut health = Replicated::new(100);
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let order = Arc::clone(&order);
            health.subscribe(move |prev: &i32, new: &i32| {
                order.lock().expect("order mutex poisoned").push((tag, *prev, *new));
            });
        }

        let change = health
            .write(Role::Authority, 90)
            .expect("authority write should succeed")
            .expect("value changed");

        assert_eq!(
            change,
            Change {
                seq: 1,
                previous: 100,
                current: 90
            }
        );
        assert_eq!(
            *order.lock().expect("order mutex poisoned"),
            vec![("first", 100, 90), ("second", 100, 90)]
        );
    }

    #[test]
    fn when_value_is_rewritten_unchanged_then_no_change_is_emitted() {
        let mut health = Replicated::new(100);
        let change = health
            .write(Role::Authority, 100)
            .expect("authority write should succeed");
        assert!(change.is_none());
        assert_eq!(health.seq(), 0);
    }

    #[test]
    fn when_observer_unsubscribes_then_it_stops_receiving_changes() {
        let mut health = Replicated::new(100);
        let (seen, callback) = recorder();
        let id = health.subscribe(callback);

        health.write(Role::Authority, 90).expect("write");
        assert!(health.unsubscribe(id));
        assert!(!health.unsubscribe(id));
        health.write(Role::Authority, 80).expect("write");

        assert_eq!(*seen.lock().expect("recorder mutex poisoned"), vec![(100, 90)]);
    }

    #[test]
    fn when_replica_receives_changes_out_of_order_then_it_never_regresses() {
        let mut authority = Replicated::new(100);
        let first = authority.write(Role::Authority, 90).expect("write").expect("change");
        let second = authority.write(Role::Authority, 80).expect("write").expect("change");

        let mut replica = Replica::new(0, 100);
        let (seen, callback) = recorder();
        replica.subscribe(callback);

        assert!(replica.apply(&second));
        assert!(!replica.apply(&first));
        assert!(!replica.apply(&second));

        assert_eq!(*replica.read(), 80);
        assert_eq!(replica.seq(), 2);
        // The skipped write shows up as a jump from the last value this replica showed.
        assert_eq!(*seen.lock().expect("recorder mutex poisoned"), vec![(100, 80)]);
    }

    #[test]
    fn when_replica_applies_every_change_then_it_matches_the_authority() {
        let mut authority = Replicated::new(100);
        let mut replica = Replica::new(authority.seq(), *authority.read());

        for hp in [90, 80, 70, 0] {
            let change = authority.write(Role::Authority, hp).expect("write").expect("change");
            assert!(replica.apply(&change));
        }

        assert_eq!(replica.read(), authority.read());
        assert_eq!(replica.seq(), authority.seq());
    }

    #[test]
    fn when_resync_is_newer_then_replica_jumps_ahead_and_stale_changes_are_ignored() {
        let mut replica = Replica::new(1, 90);
        let (seen, callback) = recorder();
        replica.subscribe(callback);

        assert!(replica.resync(4, 60));
        assert!(!replica.resync(3, 70));
        assert!(!replica.apply(&Change {
            seq: 2,
            previous: 90,
            current: 80,
        }));

        assert_eq!(*replica.read(), 60);
        assert_eq!(replica.seq(), 4);
        assert_eq!(
            *seen.lock().expect("recorder mutex poisoned"),
            vec![(90, 60)]
        );
    }
}
