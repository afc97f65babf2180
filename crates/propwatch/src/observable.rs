#![forbid(unsafe_code)]

//! Observed object with property-write interception and listener dispatch.
//!
//! # Design
//!
//! An [`Observable`] wraps a JSON object held in shared storage
//! (`Rc<RefCell<Map<String, Value>>>`). All observed access goes through its
//! [`Facade`]: reads pass straight through, writes first notify the matching
//! listeners and only then reach the object.
//!
//! A write to `prop` runs, in order:
//!
//! 1. read the previous value (`None` if the key is absent),
//! 2. call listeners registered under `prop`, in registration order,
//! 3. call listeners registered under [`WILDCARD`](crate::WILDCARD), in
//!    registration order,
//! 4. store the new value and bump the version.
//!
//! Reading the reserved name [`ADD_LISTENER`] through the facade yields the
//! registration entry point, unless the wrapped object has its own key of that
//! name. Then the object's value is returned and a diagnostic is logged.
//!
//! # Performance
//!
//! | Operation      | Complexity                         |
//! |----------------|------------------------------------|
//! | `get()`        | O(log K) + clone of the value      |
//! | `set()`        | O(L) where L = matching listeners  |
//! | `add_listener()` | O(log L) amortized              |
//!
//! # Failure Modes
//!
//! - **Listener panic**: governed by [`ListenerFailurePolicy`]. Under
//!   `Propagate` the panic unwinds out of `set()` and the write is not
//!   performed; under `Isolate` it is logged and dispatch continues.
//! - **Borrowing the original across a write**: holding a `borrow()` of
//!   [`Observable::original`] while calling `set()` panics (RefCell rules).
//!   No borrow is held while listeners run, so listeners themselves may read
//!   the facade, write other keys, or register more listeners.
//! - **Reference cycle**: a listener that captures a [`Facade`] or
//!   [`Observable`] keeps the state it is stored in alive forever. Listeners
//!   that need their own facade should capture a [`WeakFacade`] instead.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use serde_json::{Map, Value};

use crate::config::{ListenerFailurePolicy, ObserveConfig};
use crate::error::ObserveError;
use crate::listener::{Listener, ListenerId, ListenerRegistry};
use crate::observer::Handle;

/// Reserved facade property that resolves to listener registration.
pub const ADD_LISTENER: &str = "addListener";

/// Shared storage of an observed object.
pub type SharedObject = Rc<RefCell<Map<String, Value>>>;

/// State shared by an [`Observable`], its [`Facade`] and any [`AddListener`].
struct ObservableInner {
    original: SharedObject,
    listeners: RefCell<ListenerRegistry>,
    version: Cell<u64>,
    config: ObserveConfig,
    handle: Option<Handle>,
}

impl ObservableInner {
    fn register(&self, prop: &str, listener: Listener) -> ListenerId {
        let id = self.listeners.borrow_mut().register(prop, listener);
        tracing::debug!(handle = ?self.handle, listener = %id, "listener registered");
        id
    }
}

/// Raw view of an observed object: the original, its facade, its listeners.
///
/// Cloning an `Observable` creates a new handle to the **same** state.
#[derive(Clone)]
pub struct Observable {
    inner: Rc<ObservableInner>,
    facade: Facade,
}

impl fmt::Debug for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("handle", &self.inner.handle)
            .field("original", &self.inner.original.borrow())
            .field("listener_count", &self.listener_count())
            .field("next_listener_index", &self.next_listener_index())
            .field("version", &self.version())
            .finish()
    }
}

impl Observable {
    /// Observe `value`, which must be a JSON object.
    ///
    /// # Errors
    ///
    /// [`ObserveError::InvalidArgument`] when `value` is not an object.
    pub fn new(value: Value) -> Result<Self, ObserveError> {
        Self::with_config(value, ObserveConfig::default())
    }

    /// Observe `value` with an explicit configuration.
    ///
    /// # Errors
    ///
    /// [`ObserveError::InvalidArgument`] when `value` is not an object.
    pub fn with_config(value: Value, config: ObserveConfig) -> Result<Self, ObserveError> {
        Ok(Self::build(share(value)?, config, None))
    }

    /// Observe an object the caller already holds in shared storage.
    ///
    /// The caller keeps its handle; writes made directly through it bypass
    /// the listeners.
    #[must_use]
    pub fn from_shared(original: SharedObject) -> Self {
        Self::build(original, ObserveConfig::default(), None)
    }

    /// [`from_shared`](Self::from_shared) with an explicit configuration.
    #[must_use]
    pub fn from_shared_with_config(original: SharedObject, config: ObserveConfig) -> Self {
        Self::build(original, config, None)
    }

    pub(crate) fn build(
        original: SharedObject,
        config: ObserveConfig,
        handle: Option<Handle>,
    ) -> Self {
        let inner = Rc::new(ObservableInner {
            original,
            listeners: RefCell::new(ListenerRegistry::new()),
            version: Cell::new(0),
            config,
            handle,
        });
        let facade = Facade {
            inner: Rc::clone(&inner),
        };
        Self { inner, facade }
    }

    /// Shared handle to the wrapped object.
    #[must_use]
    pub fn original(&self) -> SharedObject {
        Rc::clone(&self.inner.original)
    }

    /// The facade created with this observable.
    #[must_use]
    pub fn facade(&self) -> &Facade {
        &self.facade
    }

    /// Consume the raw view, keeping only the facade.
    #[must_use]
    pub fn into_facade(self) -> Facade {
        self.facade
    }

    /// Observer handle this observable is stored under, if any.
    #[must_use]
    pub fn handle(&self) -> Option<Handle> {
        self.inner.handle
    }

    /// Configuration this observable dispatches with.
    #[must_use]
    pub fn config(&self) -> &ObserveConfig {
        &self.inner.config
    }

    /// Register `handler` for writes to `prop`, or to every property when
    /// `prop` is [`WILDCARD`](crate::WILDCARD).
    ///
    /// `prop` does not need to exist on the object yet.
    pub fn add_listener(
        &self,
        prop: &str,
        handler: impl Fn(&str, Option<&Value>, &Value) + 'static,
    ) -> ListenerId {
        self.inner.register(prop, Listener::new(handler))
    }

    /// Register an already-built [`Listener`].
    pub fn add(&self, prop: &str, listener: Listener) -> ListenerId {
        self.inner.register(prop, listener)
    }

    /// Register a listener that does nothing. It still consumes an index.
    pub fn add_noop_listener(&self, prop: &str) -> ListenerId {
        self.inner.register(prop, Listener::noop())
    }

    /// Index the next registration will receive.
    #[must_use]
    pub fn next_listener_index(&self) -> u64 {
        self.inner.listeners.borrow().next_index()
    }

    /// Number of registered listeners, wildcard ones included.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    /// Ids of all registered listeners, in registration order.
    #[must_use]
    pub fn listener_ids(&self) -> Vec<ListenerId> {
        self.inner.listeners.borrow().ids()
    }

    /// Inspect the listener registry.
    ///
    /// # Panics
    ///
    /// Panics if `f` registers a listener on this observable.
    pub fn with_listeners<R>(&self, f: impl FnOnce(&ListenerRegistry) -> R) -> R {
        f(&self.inner.listeners.borrow())
    }

    /// Number of writes that reached the object.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }
}

/// Result of reading a property through a [`Facade`].
#[derive(Debug, Clone)]
pub enum Prop {
    /// The object's value for the key.
    Value(Value),
    /// The object has no such key.
    Absent,
    /// The reserved [`ADD_LISTENER`] name, resolved to registration.
    AddListener(AddListener),
}

impl Prop {
    /// The data value, if this read produced one.
    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Absent | Self::AddListener(_) => None,
        }
    }

    /// Whether the key is absent from the object.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// The registration entry point, if this read resolved to it.
    #[must_use]
    pub fn into_add_listener(self) -> Option<AddListener> {
        match self {
            Self::AddListener(add) => Some(add),
            Self::Value(_) | Self::Absent => None,
        }
    }
}

/// Listener registration as exposed through the facade.
#[derive(Clone)]
pub struct AddListener {
    inner: Rc<ObservableInner>,
}

impl fmt::Debug for AddListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddListener")
            .field("handle", &self.inner.handle)
            .finish_non_exhaustive()
    }
}

impl AddListener {
    /// Register `handler` under `prop`; see [`Observable::add_listener`].
    pub fn call(
        &self,
        prop: &str,
        handler: impl Fn(&str, Option<&Value>, &Value) + 'static,
    ) -> ListenerId {
        self.inner.register(prop, Listener::new(handler))
    }
}

/// Outcome of one [`Facade::set`].
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    /// Value the property held before the write (`None` if absent).
    pub previous: Option<Value>,
    /// Listeners invoked, failed ones included.
    pub notified: usize,
    /// Listeners that panicked under [`ListenerFailurePolicy::Isolate`].
    pub failed: usize,
    /// The write was an unchanged value and was skipped.
    pub skipped: bool,
}

/// The intercepting view over an observed object.
///
/// Cloning a `Facade` yields another handle to the same facade.
#[derive(Clone)]
pub struct Facade {
    inner: Rc<ObservableInner>,
}

/// Non-owning handle to a [`Facade`], for capture inside listeners.
#[derive(Clone)]
pub struct WeakFacade {
    inner: Weak<ObservableInner>,
}

impl fmt::Debug for WeakFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakFacade")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl WeakFacade {
    /// The facade, if its observable has not been dropped.
    #[must_use]
    pub fn upgrade(&self) -> Option<Facade> {
        self.inner.upgrade().map(|inner| Facade { inner })
    }
}

impl fmt::Debug for Facade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Facade")
            .field("handle", &self.inner.handle)
            .field("object", &self.inner.original.borrow())
            .finish()
    }
}

impl Facade {
    /// Read `prop`.
    ///
    /// [`ADD_LISTENER`] resolves to [`Prop::AddListener`] unless the object
    /// defines that key itself, in which case the object's value is returned
    /// and a name-collision diagnostic is logged. Every other key is a plain
    /// passthrough read.
    #[must_use]
    pub fn get(&self, prop: &str) -> Prop {
        let original = self.inner.original.borrow();
        if prop == ADD_LISTENER {
            if let Some(own) = original.get(ADD_LISTENER) {
                let collision = ObserveError::NameCollision { name: ADD_LISTENER };
                tracing::error!(handle = ?self.inner.handle, "{collision}");
                tracing::info!("use Observer::add_listener with this object's handle instead");
                return Prop::Value(own.clone());
            }
            return Prop::AddListener(AddListener {
                inner: Rc::clone(&self.inner),
            });
        }
        original.get(prop).cloned().map_or(Prop::Absent, Prop::Value)
    }

    /// Plain data read: the object's value for `prop`, if any.
    #[must_use]
    pub fn value(&self, prop: &str) -> Option<Value> {
        self.get(prop).into_value()
    }

    /// Register a listener through the facade's [`ADD_LISTENER`] entry.
    ///
    /// Returns `None` when the object shadows that name; use
    /// [`Observable::add_listener`] or the observer's handle instead.
    pub fn add_listener(
        &self,
        prop: &str,
        handler: impl Fn(&str, Option<&Value>, &Value) + 'static,
    ) -> Option<ListenerId> {
        self.get(ADD_LISTENER)
            .into_add_listener()
            .map(|add| add.call(prop, handler))
    }

    /// Write `value` to `prop`, notifying listeners before the write lands.
    ///
    /// Writing [`ADD_LISTENER`] stores an ordinary key; later reads of that
    /// name then hit the collision rule.
    ///
    /// # Panics
    ///
    /// Re-raises a listener panic under [`ListenerFailurePolicy::Propagate`];
    /// the object is left unchanged in that case.
    pub fn set(&self, prop: &str, value: impl Into<Value>) -> Dispatch {
        let value = value.into();
        let inner = &self.inner;
        let previous = inner.original.borrow().get(prop).cloned();

        if inner.config.skip_unchanged && previous.as_ref() == Some(&value) {
            tracing::trace!(handle = ?inner.handle, prop, "unchanged write skipped");
            return Dispatch {
                previous,
                notified: 0,
                failed: 0,
                skipped: true,
            };
        }

        // Snapshot so listeners can register more listeners mid-dispatch.
        let listeners = inner.listeners.borrow().matching(prop);
        tracing::trace!(
            handle = ?inner.handle,
            prop,
            listeners = listeners.len(),
            "dispatching write"
        );

        let mut failed = 0;
        for listener in &listeners {
            match inner.config.failure_policy {
                ListenerFailurePolicy::Propagate => listener.call(prop, previous.as_ref(), &value),
                ListenerFailurePolicy::Isolate => {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        listener.call(prop, previous.as_ref(), &value);
                    }));
                    if let Err(payload) = outcome {
                        failed += 1;
                        tracing::error!(
                            handle = ?inner.handle,
                            prop,
                            panic = panic_message(payload.as_ref()),
                            "listener panicked, continuing dispatch"
                        );
                    }
                }
            }
        }

        inner.original.borrow_mut().insert(prop.to_string(), value);
        inner.version.set(inner.version.get() + 1);

        Dispatch {
            previous,
            notified: listeners.len(),
            failed,
            skipped: false,
        }
    }

    /// Whether the object has the key `prop`.
    #[must_use]
    pub fn contains(&self, prop: &str) -> bool {
        self.inner.original.borrow().contains_key(prop)
    }

    /// Keys of the object.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.original.borrow().keys().cloned().collect()
    }

    /// Number of keys in the object.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.original.borrow().len()
    }

    /// Whether the object has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.original.borrow().is_empty()
    }

    /// Copy of the whole object.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        Value::Object(self.inner.original.borrow().clone())
    }

    /// Observer handle of the underlying observable, if any.
    #[must_use]
    pub fn handle(&self) -> Option<Handle> {
        self.inner.handle
    }

    /// Number of writes that reached the object.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    /// Non-owning handle to this facade.
    #[must_use]
    pub fn downgrade(&self) -> WeakFacade {
        WeakFacade {
            inner: Rc::downgrade(&self.inner),
        }
    }
}

/// Move a JSON object into shared storage.
pub(crate) fn share(value: Value) -> Result<SharedObject, ObserveError> {
    match value {
        Value::Object(map) => Ok(Rc::new(RefCell::new(map))),
        other => Err(ObserveError::invalid_argument(&other)),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic payload>"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
