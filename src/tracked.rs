use std::{
    cell::{BorrowError, Ref, RefCell},
    fmt,
    rc::{Rc, Weak},
};

use derive_ex::derive_ex;
use slabmap::SlabMap;

use crate::{container::Changeset, Value};

mod list;
mod map;
mod record;

pub use list::List;
pub use map::Map;
pub use record::Record;


/// Wraps raw data into a [`Value`].
///
/// Arrays, objects become tracked [`List`] and [`Map`] values. Scalars pass through unwrapped.
pub fn wrap(raw: serde_json::Value) -> Value {
    Value::from_json(raw)
}

/// Marks names dirty in the changeset of the container that owns it.
///
/// Observers are compared by identity, never by value.
#[derive(Clone)]
pub struct Observer(Rc<ObserverNode>);

struct ObserverNode {
    changeset: RefCell<Weak<RefCell<Changeset>>>,
    #[cfg(test)]
    deliveries: std::cell::Cell<usize>,
}

impl Observer {
    pub(crate) fn new(changeset: &Rc<RefCell<Changeset>>) -> Self {
        Self(Rc::new(ObserverNode {
            changeset: RefCell::new(Rc::downgrade(changeset)),
            #[cfg(test)]
            deliveries: std::cell::Cell::new(0),
        }))
    }

    /// Marks `name` dirty in the owning container.
    ///
    /// Returns `false` if the owning container is gone or has retired this observer.
    pub fn notify(&self, name: &str) -> bool {
        let Some(changeset) = self.0.changeset.borrow().upgrade() else {
            return false;
        };
        changeset.borrow_mut().insert(name);
        #[cfg(test)]
        self.0.deliveries.set(self.0.deliveries.get() + 1);
        true
    }

    /// Number of notifications delivered so far.
    #[cfg(test)]
    pub(crate) fn deliveries(&self) -> usize {
        self.0.deliveries.get()
    }

    pub fn is_alive(&self) -> bool {
        self.0.changeset.borrow().strong_count() > 0
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Stops delivering notifications, including through bindings that were inherited by derived values.
    pub(crate) fn retire(&self) {
        *self.0.changeset.borrow_mut() = Weak::new();
    }
}
impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Observer({:p})", Rc::as_ptr(&self.0))
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Binding {
    observer: Observer,
    name: Rc<str>,
}

/// Arena of (observer, variable name) bindings attached to one tracked value.
#[derive(Default)]
pub(crate) struct ObserverSet(SlabMap<Binding>);

impl ObserverSet {
    fn find(&self, observer: &Observer, name: &str) -> Option<usize> {
        self.0
            .iter()
            .find(|(_, b)| b.observer.ptr_eq(observer) && &*b.name == name)
            .map(|(key, _)| key)
    }

    pub fn add(&mut self, observer: &Observer, name: &str) -> bool {
        if self.find(observer, name).is_some() {
            return false;
        }
        self.0.insert(Binding {
            observer: observer.clone(),
            name: name.into(),
        });
        true
    }
    pub fn remove_binding(&mut self, observer: &Observer, name: &str) -> bool {
        if let Some(key) = self.find(observer, name) {
            self.0.remove(key);
            true
        } else {
            false
        }
    }
    pub fn remove_observer(&mut self, observer: &Observer) -> usize {
        self.remove_where(|b| b.observer.ptr_eq(observer))
    }
    fn remove_dead(&mut self) -> usize {
        self.remove_where(|b| !b.observer.is_alive())
    }
    fn remove_where(&mut self, mut f: impl FnMut(&Binding) -> bool) -> usize {
        let keys: Vec<usize> = self
            .0
            .iter()
            .filter(|(_, b)| f(b))
            .map(|(key, _)| key)
            .collect();
        for &key in &keys {
            self.0.remove(key);
        }
        keys.len()
    }
    pub fn bindings(&self) -> Vec<Binding> {
        self.0.values().cloned().collect()
    }
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.values().map(|b| b.name.to_string()).collect();
        names.sort();
        names.dedup();
        names
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Shared storage of one composite value together with the observers watching it.
#[derive_ex(Clone, bound())]
pub(crate) struct Tracked<T>(Rc<TrackedNode<T>>);

struct TrackedNode<T> {
    data: RefCell<T>,
    observers: RefCell<ObserverSet>,
}

impl<T> Tracked<T> {
    pub fn new(data: T) -> Self {
        Self(Rc::new(TrackedNode {
            data: RefCell::new(data),
            observers: RefCell::new(ObserverSet::default()),
        }))
    }

    /// Creates a tracked value that carries every binding this value currently has.
    pub fn derive<U>(&self, data: U) -> Tracked<U> {
        let derived = Tracked::new(data);
        derived.inherit(&self.bindings());
        derived
    }

    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.data.borrow()
    }
    pub fn try_borrow(&self) -> Result<Ref<'_, T>, BorrowError> {
        self.0.data.try_borrow()
    }

    /// Applies a mutation, then notifies every attached observer under every name.
    ///
    /// `f` must not run user code; callers prepare their inputs before mutating.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let ret = f(&mut self.0.data.borrow_mut());
        self.notify();
        ret
    }

    fn notify(&self) {
        let bindings = self.bindings();
        let mut has_dead = false;
        for b in &bindings {
            if !b.observer.notify(&b.name) {
                has_dead = true;
            }
        }
        if has_dead {
            self.0.observers.borrow_mut().remove_dead();
        }
    }

    /// Returns `value` after attaching this value's bindings to it.
    pub fn adopt(&self, value: Value) -> Value {
        value.inherit(&self.bindings());
        value
    }

    pub fn inherit(&self, bindings: &[Binding]) {
        let mut observers = self.0.observers.borrow_mut();
        for b in bindings {
            observers.add(&b.observer, &b.name);
        }
    }

    pub fn bindings(&self) -> Vec<Binding> {
        self.0.observers.borrow().bindings()
    }
    pub fn add_observer(&self, observer: &Observer, name: &str) -> bool {
        self.0.observers.borrow_mut().add(observer, name)
    }
    pub fn remove_observer(&self, observer: &Observer) -> usize {
        self.0.observers.borrow_mut().remove_observer(observer)
    }
    pub fn remove_binding(&self, observer: &Observer, name: &str) -> bool {
        self.0.observers.borrow_mut().remove_binding(observer, name)
    }
    pub fn observed_names(&self) -> Vec<String> {
        self.0.observers.borrow().names()
    }
    pub fn observer_count(&self) -> usize {
        self.0.observers.borrow().len()
    }
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Observer operations shared by [`List`], [`Map`] and [`Record`].
macro_rules! impl_observed {
    ($t:ty) => {
        impl $t {
            /// Attaches `observer` under `name`. Attaching the same pair again has no effect.
            pub fn add_observer(&self, observer: &$crate::tracked::Observer, name: &str) -> bool {
                self.0.add_observer(observer, name)
            }

            /// Detaches every binding of `observer`, leaving other observers attached.
            pub fn remove_observer(&self, observer: &$crate::tracked::Observer) -> usize {
                self.0.remove_observer(observer)
            }

            /// Detaches one (observer, name) binding.
            pub fn remove_binding(&self, observer: &$crate::tracked::Observer, name: &str) -> bool {
                self.0.remove_binding(observer, name)
            }

            /// Distinct variable names this value is currently watched under.
            pub fn observed_names(&self) -> Vec<String> {
                self.0.observed_names()
            }

            pub fn observer_count(&self) -> usize {
                self.0.observer_count()
            }

            /// Returns `true` if both handles share the same underlying value.
            pub fn ptr_eq(&self, other: &Self) -> bool {
                self.0.ptr_eq(&other.0)
            }
        }
    };
}
pub(crate) use impl_observed;
