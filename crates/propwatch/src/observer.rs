#![forbid(unsafe_code)]

//! Handle-keyed registry of observed objects.
//!
//! An [`Observer`] creates [`Observable`]s, stores each under a fresh
//! [`Handle`], and lets callers attach listeners by handle without keeping a
//! reference to the observable itself.
//!
//! # Invariants
//!
//! 1. Handles come from a counter starting at 0 and are never reused.
//! 2. A handle returned by `observe*` stays valid for the observer's lifetime.
//! 3. A failed `observe` allocates no handle.
//! 4. Observables created by one observer share its [`ObserveConfig`] but
//!    nothing else: listener ids and versions are per observable.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::config::ObserveConfig;
use crate::error::ObserveError;
use crate::listener::ListenerId;
use crate::observable::{self, Facade, Observable, SharedObject};

/// Key under which an [`Observer`] stores an observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u64);

impl Handle {
    /// Wrap a raw handle value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw handle value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Handle> for u64 {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}

/// Registry of observed objects keyed by [`Handle`].
#[derive(Default)]
pub struct Observer {
    observees: BTreeMap<Handle, Observable>,
    next_handle: u64,
    config: ObserveConfig,
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("observed", &self.observees.len())
            .field("next_handle", &self.next_handle)
            .field("config", &self.config)
            .finish()
    }
}

impl Observer {
    /// Create an empty observer with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty observer whose observables use `config`.
    #[must_use]
    pub fn with_config(config: ObserveConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Create an empty observer configured from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::with_config(ObserveConfig::from_env())
    }

    /// Observe `value` and return its facade.
    ///
    /// # Errors
    ///
    /// [`ObserveError::InvalidArgument`] when `value` is not a JSON object.
    pub fn observe(&mut self, value: Value) -> Result<Facade, ObserveError> {
        self.observe_raw(value).map(Observable::into_facade)
    }

    /// Observe `value` and return the raw [`Observable`].
    ///
    /// # Errors
    ///
    /// [`ObserveError::InvalidArgument`] when `value` is not a JSON object.
    pub fn observe_raw(&mut self, value: Value) -> Result<Observable, ObserveError> {
        let shared = observable::share(value).inspect_err(|err| {
            tracing::debug!(error = %err, "observe rejected");
        })?;
        Ok(self.insert(shared))
    }

    /// Observe an object the caller already holds in shared storage.
    pub fn observe_shared(&mut self, original: SharedObject) -> Facade {
        self.insert(original).into_facade()
    }

    fn insert(&mut self, original: SharedObject) -> Observable {
        let handle = Handle(self.next_handle);
        self.next_handle += 1;
        let observable = Observable::build(original, self.config.clone(), Some(handle));
        self.observees.insert(handle, observable.clone());
        tracing::debug!(%handle, "object observed");
        observable
    }

    /// Register `handler` under `prop` on the observable stored at `handle`.
    ///
    /// # Errors
    ///
    /// [`ObserveError::NotFound`] when no observable is stored at `handle`.
    pub fn add_listener(
        &self,
        handle: Handle,
        prop: &str,
        handler: impl Fn(&str, Option<&Value>, &Value) + 'static,
    ) -> Result<ListenerId, ObserveError> {
        self.get(handle)
            .map(|observable| observable.add_listener(prop, handler))
            .ok_or(ObserveError::NotFound { handle })
    }

    /// Register a listener that does nothing under `prop` on the observable
    /// stored at `handle`.
    ///
    /// # Errors
    ///
    /// [`ObserveError::NotFound`] when no observable is stored at `handle`.
    pub fn add_noop_listener(
        &self,
        handle: Handle,
        prop: &str,
    ) -> Result<ListenerId, ObserveError> {
        self.get(handle)
            .map(|observable| observable.add_noop_listener(prop))
            .ok_or(ObserveError::NotFound { handle })
    }

    /// The observable stored at `handle`.
    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<&Observable> {
        self.observees.get(&handle)
    }

    /// The facade of the observable stored at `handle`.
    #[must_use]
    pub fn facade(&self, handle: Handle) -> Option<&Facade> {
        self.get(handle).map(Observable::facade)
    }

    /// Handles in allocation order.
    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.observees.keys().copied()
    }

    /// Handle the next successful `observe` will receive.
    #[must_use]
    pub fn next_handle(&self) -> Handle {
        Handle(self.next_handle)
    }

    /// Number of observed objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observees.len()
    }

    /// Whether nothing has been observed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observees.is_empty()
    }

    /// Configuration handed to new observables.
    #[must_use]
    pub fn config(&self) -> &ObserveConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::WILDCARD;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn handles_are_sequential() {
        let mut observer = Observer::new();
        let a = observer.observe_raw(json!({})).unwrap();
        let b = observer.observe(json!({})).unwrap();
        assert_eq!(a.handle(), Some(Handle::new(0)));
        assert_eq!(b.handle(), Some(Handle::new(1)));
        assert_eq!(observer.len(), 2);
        assert_eq!(observer.next_handle(), Handle::new(2));
        let handles: Vec<u64> = observer.handles().map(u64::from).collect();
        assert_eq!(handles, vec![0, 1]);
    }

    #[test]
    fn failed_observe_consumes_no_handle() {
        let mut observer = Observer::new();
        let err = observer.observe(json!("not an object")).unwrap_err();
        assert_eq!(err, ObserveError::InvalidArgument { kind: "string" });
        assert!(observer.is_empty());
        let facade = observer.observe(json!({})).unwrap();
        assert_eq!(facade.handle(), Some(Handle::new(0)));
    }

    #[test]
    fn add_listener_by_handle() {
        let mut observer = Observer::new();
        let facade = observer.observe(json!({"x": 1})).unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_clone = Rc::clone(&log);

        let id = observer
            .add_listener(Handle::new(0), "x", move |prop, from, to| {
                log_clone
                    .borrow_mut()
                    .push((prop.to_string(), from.cloned(), to.clone()));
            })
            .unwrap();
        assert_eq!(id.to_string(), "x-0");

        facade.set("x", 2);
        assert_eq!(
            *log.borrow(),
            vec![("x".to_string(), Some(json!(1)), json!(2))]
        );
    }

    #[test]
    fn unknown_handle_is_not_found() {
        let observer = Observer::new();
        let err = observer
            .add_listener(Handle::new(3), "x", |_, _, _| {})
            .unwrap_err();
        assert_eq!(
            err,
            ObserveError::NotFound {
                handle: Handle::new(3)
            }
        );
        assert!(observer.get(Handle::new(3)).is_none());
    }

    #[test]
    fn noop_listener_by_handle() {
        let mut observer = Observer::new();
        let facade = observer.observe(json!({})).unwrap();
        let first = observer.add_noop_listener(Handle::new(0), "x").unwrap();
        let second = observer.add_noop_listener(Handle::new(0), WILDCARD).unwrap();
        assert_eq!(first.to_string(), "x-0");
        assert_eq!(second.to_string(), "*-1");

        let dispatch = facade.set("x", 1);
        assert_eq!(dispatch.notified, 2);
        assert_eq!(facade.value("x"), Some(json!(1)));

        let err = observer.add_noop_listener(Handle::new(9), "x").unwrap_err();
        assert_eq!(
            err,
            ObserveError::NotFound {
                handle: Handle::new(9)
            }
        );
    }

    #[test]
    fn observables_inherit_config() {
        let config = ObserveConfig::new().with_skip_unchanged(true);
        let mut observer = Observer::with_config(config.clone());
        let raw = observer.observe_raw(json!({})).unwrap();
        assert_eq!(raw.config(), &config);
    }

    #[test]
    fn stored_observable_is_the_returned_one() {
        let mut observer = Observer::new();
        let facade = observer.observe(json!({})).unwrap();
        facade.set("k", "v");
        let stored = observer.facade(Handle::new(0)).unwrap();
        assert_eq!(stored.value("k"), Some(json!("v")));
        assert_eq!(observer.get(Handle::new(0)).unwrap().version(), 1);
    }

    #[test]
    fn observe_shared_keeps_caller_handle() {
        let mut observer = Observer::new();
        let original: SharedObject = Rc::new(RefCell::new(serde_json::Map::new()));
        let facade = observer.observe_shared(Rc::clone(&original));
        facade.set("a", 1);
        assert_eq!(original.borrow().get("a"), Some(&json!(1)));
    }

    #[test]
    fn handle_display() {
        assert_eq!(Handle::new(42).to_string(), "42");
        assert_eq!(Handle::new(42).get(), 42);
    }
}
