//! Guarded state cells shared between receive loops and application threads.
//!
//! Every piece of radio state that more than one execution context can see
//! lives in a [`ConcurrentProperty`]. Reads may run concurrently with each
//! other; writes are serialized against every other read and write on the
//! same cell, and a reader never observes a half-written value.
//!
//! Observers registered with [`ConcurrentProperty::observe`] receive a
//! [`PropertyChange::WillChange`] notice before the new value is stored and a
//! [`PropertyChange::DidChange`] notice after. Writes that store a value
//! equal to the current one are suppressed entirely, so observers never see
//! a redundant pair.
//!
//! Observers run on the writing thread while the cell's writer lock is held.
//! They may read the cell they observe but must not write to it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Identifier returned by [`ConcurrentProperty::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// A change notice delivered to property observers.
#[derive(Debug)]
pub enum PropertyChange<'a, T> {
    /// Sent before the new value is stored.
    WillChange {
        /// Property name.
        name: &'static str,
        /// Value currently stored.
        current: &'a T,
        /// Value about to be stored.
        proposed: &'a T,
    },
    /// Sent after the new value is stored.
    DidChange {
        /// Property name.
        name: &'static str,
        /// Value that was replaced.
        previous: &'a T,
        /// Value now stored.
        current: &'a T,
    },
}

type Observer<T> = Arc<dyn Fn(&PropertyChange<'_, T>) + Send + Sync>;

/// A multi-reader/single-writer state cell with change notifications.
pub struct ConcurrentProperty<T> {
    name: &'static str,
    value: RwLock<T>,
    writer: Mutex<()>,
    observers: RwLock<Vec<(ObserverId, Observer<T>)>>,
    next_observer: AtomicU64,
}

impl<T> ConcurrentProperty<T> {
    /// Create a cell holding `value`.
    pub fn new(name: &'static str, value: T) -> Self {
        ConcurrentProperty {
            name,
            value: RwLock::new(value),
            writer: Mutex::new(()),
            observers: RwLock::new(Vec::new()),
            next_observer: AtomicU64::new(0),
        }
    }

    /// Property name, used in change notices and log fields.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Borrow the current value for the duration of `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.read_guard())
    }

    /// Store `value` unconditionally, without notifying observers.
    ///
    /// Intended for values with no meaningful equality, such as consumer
    /// callbacks.
    pub fn replace(&self, value: T) -> T {
        let _w = self.writer_guard();
        std::mem::replace(&mut *self.write_guard(), value)
    }

    /// Register an observer. Returns an id usable with
    /// [`unobserve`](Self::unobserve).
    pub fn observe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&PropertyChange<'_, T>) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(observer)));
        id
    }

    /// Remove a previously registered observer. Returns `false` if the id
    /// was unknown.
    pub fn unobserve(&self, id: ObserverId) -> bool {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    fn notify(&self, change: &PropertyChange<'_, T>) {
        // Snapshot so observers can register or remove observers themselves.
        let observers: Vec<Observer<T>> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();
        for observer in observers {
            observer(change);
        }
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, T> {
        self.value.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, T> {
        self.value.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn writer_guard(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> ConcurrentProperty<T> {
    /// Return a copy of the current value.
    pub fn read(&self) -> T {
        self.read_guard().clone()
    }
}

impl<T: PartialEq> ConcurrentProperty<T> {
    /// Store `value` if it differs from the current one.
    ///
    /// Returns `true` when the value changed (and observers were notified).
    pub fn write(&self, value: T) -> bool {
        let _w = self.writer_guard();
        {
            let current = self.read_guard();
            if *current == value {
                return false;
            }
            self.notify(&PropertyChange::WillChange {
                name: self.name,
                current: &current,
                proposed: &value,
            });
        }
        let previous = std::mem::replace(&mut *self.write_guard(), value);
        let current = self.read_guard();
        self.notify(&PropertyChange::DidChange {
            name: self.name,
            previous: &previous,
            current: &current,
        });
        true
    }
}

impl<T: Clone + PartialEq> ConcurrentProperty<T> {
    /// Read-modify-write the value under the writer lock.
    ///
    /// `f` runs against a private copy; the copy is stored, with
    /// notifications, only if it differs from the original.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let _w = self.writer_guard();
        let mut next = self.read_guard().clone();
        let result = f(&mut next);
        {
            let current = self.read_guard();
            if *current == next {
                return result;
            }
            self.notify(&PropertyChange::WillChange {
                name: self.name,
                current: &current,
                proposed: &next,
            });
        }
        let previous = std::mem::replace(&mut *self.write_guard(), next);
        let current = self.read_guard();
        self.notify(&PropertyChange::DidChange {
            name: self.name,
            previous: &previous,
            current: &current,
        });
        result
    }
}

impl<T: Default> Default for ConcurrentProperty<T> {
    fn default() -> Self {
        ConcurrentProperty::new("", T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for ConcurrentProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentProperty")
            .field("name", &self.name)
            .field("value", &*self.read_guard())
            .finish()
    }
}
