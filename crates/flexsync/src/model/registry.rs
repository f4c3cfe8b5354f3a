//! Per-resource-type object registries and cross-object references.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use flexsync_core::ConcurrentProperty;

use super::{ObjectGraph, Resource};

/// A model object: its id, its initialized flag, and its typed fields.
///
/// Derefs to the resource's field struct, so `slice.frequency_hz.read()`
/// works directly on an `Arc<ModelObject<Slice>>`.
pub struct ModelObject<T: Resource> {
    id: T::Id,
    /// Flips to `true` once, when the resource first holds its minimum
    /// viable field set.
    pub initialized: ConcurrentProperty<bool>,
    fields: T,
}

impl<T: Resource> ModelObject<T> {
    pub(crate) fn new(id: T::Id) -> Self {
        ModelObject {
            id,
            initialized: ConcurrentProperty::new("initialized", false),
            fields: T::default(),
        }
    }

    /// Resource-scoped id.
    pub fn id(&self) -> T::Id {
        self.id
    }

    /// Id formatted the way the radio formats it.
    pub fn display_id(&self) -> String {
        T::format_id(self.id)
    }

    /// Whether the object has reached its minimum viable state.
    pub fn is_initialized(&self) -> bool {
        self.initialized.read()
    }
}

impl<T: Resource> Deref for ModelObject<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.fields
    }
}

impl<T: Resource + fmt::Debug> fmt::Debug for ModelObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelObject")
            .field("kind", &T::KIND)
            .field("id", &T::format_id(self.id))
            .field("initialized", &self.is_initialized())
            .field("fields", &self.fields)
            .finish()
    }
}

/// All live objects of one resource type, keyed by id.
pub struct Registry<T: Resource> {
    objects: RwLock<HashMap<T::Id, Arc<ModelObject<T>>>>,
}

impl<T: Resource> Default for Registry<T> {
    fn default() -> Self {
        Registry {
            objects: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Resource> Registry<T> {
    /// Look up a live object.
    pub fn get(&self, id: &T::Id) -> Option<Arc<ModelObject<T>>> {
        self.read_map().get(id).cloned()
    }

    /// Whether an object with `id` is live.
    pub fn contains(&self, id: &T::Id) -> bool {
        self.read_map().contains_key(id)
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_map().is_empty()
    }

    /// Ids of all live objects.
    pub fn ids(&self) -> Vec<T::Id> {
        self.read_map().keys().copied().collect()
    }

    /// Snapshot of all live objects.
    pub fn all(&self) -> Vec<Arc<ModelObject<T>>> {
        self.read_map().values().cloned().collect()
    }

    /// Return the object for `id`, creating it if absent. The flag reports
    /// whether it was created by this call.
    pub(crate) fn get_or_create(&self, id: T::Id) -> (Arc<ModelObject<T>>, bool) {
        if let Some(existing) = self.get(&id) {
            return (existing, false);
        }
        let mut map = self.write_map();
        match map.get(&id) {
            Some(existing) => (Arc::clone(existing), false),
            None => {
                let obj = Arc::new(ModelObject::new(id));
                map.insert(id, Arc::clone(&obj));
                (obj, true)
            }
        }
    }

    pub(crate) fn remove(&self, id: &T::Id) -> Option<Arc<ModelObject<T>>> {
        self.write_map().remove(id)
    }

    /// Ids of live objects matching `pred`.
    pub(crate) fn ids_where(&self, pred: impl Fn(&ModelObject<T>) -> bool) -> Vec<T::Id> {
        self.read_map()
            .iter()
            .filter(|(_, obj)| pred(obj))
            .map(|(id, _)| *id)
            .collect()
    }

    fn read_map(&self) -> RwLockReadGuard<'_, HashMap<T::Id, Arc<ModelObject<T>>>> {
        self.objects.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_map(&self) -> RwLockWriteGuard<'_, HashMap<T::Id, Arc<ModelObject<T>>>> {
        self.objects.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A reference from one model object to another (a "foreign key").
///
/// Holds the target id plus a weak handle, so a removed target is not kept
/// alive by the objects that pointed at it.
pub struct ObjectRef<T: Resource> {
    id: T::Id,
    target: Weak<ModelObject<T>>,
}

impl<T: Resource> ObjectRef<T> {
    /// Resolve `id` against the target registry. `None` when no such object
    /// is live.
    pub fn resolve(graph: &ObjectGraph, id: T::Id) -> Option<Self> {
        T::registry(graph).get(&id).map(|obj| ObjectRef {
            id,
            target: Arc::downgrade(&obj),
        })
    }

    /// Target id.
    pub fn id(&self) -> T::Id {
        self.id
    }

    /// The target, if it is still alive.
    pub fn get(&self) -> Option<Arc<ModelObject<T>>> {
        self.target.upgrade()
    }
}

impl<T: Resource> Clone for ObjectRef<T> {
    fn clone(&self) -> Self {
        ObjectRef {
            id: self.id,
            target: Weak::clone(&self.target),
        }
    }
}

impl<T: Resource> PartialEq for ObjectRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Weak::ptr_eq(&self.target, &other.target)
    }
}

impl<T: Resource> fmt::Debug for ObjectRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", T::KIND, T::format_id(self.id))
    }
}
