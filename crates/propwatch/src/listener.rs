#![forbid(unsafe_code)]

//! Listener callbacks and the per-object listener registry.
//!
//! # Invariants
//!
//! 1. Listener indices come from one counter per registry, start at 0 and are
//!    never reused, whatever property they were registered under.
//! 2. Within one property, ascending index order is registration order, and
//!    that is the dispatch order.
//! 3. [`ListenerRegistry::matching`] returns the exact-match group before the
//!    wildcard group.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

/// Reserved property key whose listeners fire on every write.
pub const WILDCARD: &str = "*";

type Callback = dyn Fn(&str, Option<&Value>, &Value);

/// A registered change callback: `(property, previous value, new value)`.
///
/// The previous value is `None` when the property did not exist before the
/// write. Cloning a `Listener` shares the same callback.
#[derive(Clone)]
pub struct Listener {
    callback: Rc<Callback>,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener").finish_non_exhaustive()
    }
}

impl Listener {
    /// Wrap a callback.
    pub fn new(callback: impl Fn(&str, Option<&Value>, &Value) + 'static) -> Self {
        Self {
            callback: Rc::new(callback),
        }
    }

    /// A listener that does nothing.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(|_, _, _| {})
    }

    /// Invoke the callback.
    #[inline]
    pub fn call(&self, prop: &str, from: Option<&Value>, to: &Value) {
        (self.callback)(prop, from, to);
    }
}

/// Token returned by listener registration.
///
/// Renders as `"<prop>-<index>"`, e.g. `bar-0` or `*-3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerId {
    prop: String,
    index: u64,
}

impl ListenerId {
    /// Property (or [`WILDCARD`]) the listener was registered under.
    #[must_use]
    pub fn prop(&self) -> &str {
        &self.prop
    }

    /// Registration index, unique within one observable.
    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Whether the listener was registered under [`WILDCARD`].
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.prop == WILDCARD
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.prop, self.index)
    }
}

/// Listeners of one observable, keyed by property then by index.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    next_index: u64,
    by_prop: HashMap<String, BTreeMap<u64, Listener>>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` under `prop` at the next index.
    pub fn register(&mut self, prop: &str, listener: Listener) -> ListenerId {
        let index = self.next_index;
        self.next_index += 1;
        self.by_prop
            .entry(prop.to_string())
            .or_default()
            .insert(index, listener);
        ListenerId {
            prop: prop.to_string(),
            index,
        }
    }

    /// Index the next registration will receive.
    #[must_use]
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Total number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_prop.values().map(BTreeMap::len).sum()
    }

    /// Whether no listener has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.next_index == 0
    }

    /// Number of listeners registered exactly under `prop`.
    #[must_use]
    pub fn count_for(&self, prop: &str) -> usize {
        self.by_prop.get(prop).map_or(0, BTreeMap::len)
    }

    /// Every listener id, in registration order.
    #[must_use]
    pub fn ids(&self) -> Vec<ListenerId> {
        let mut ids: Vec<ListenerId> = self
            .by_prop
            .iter()
            .flat_map(|(prop, group)| {
                group.keys().map(move |&index| ListenerId {
                    prop: prop.clone(),
                    index,
                })
            })
            .collect();
        ids.sort_by_key(ListenerId::index);
        ids
    }

    /// Snapshot of the listeners a write to `prop` must call, in call order:
    /// the exact-match group, then the wildcard group.
    ///
    /// A write to the literal key `*` calls the wildcard group once.
    #[must_use]
    pub fn matching(&self, prop: &str) -> Vec<Listener> {
        let exact = (prop != WILDCARD)
            .then(|| self.by_prop.get(prop))
            .flatten()
            .into_iter()
            .flat_map(BTreeMap::values);
        let wildcard = self
            .by_prop
            .get(WILDCARD)
            .into_iter()
            .flat_map(BTreeMap::values);
        exact.chain(wildcard).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn recorder(log: &Rc<RefCell<Vec<String>>>, tag: &'static str) -> Listener {
        let log = Rc::clone(log);
        Listener::new(move |prop, _, _| log.borrow_mut().push(format!("{tag}:{prop}")))
    }

    #[test]
    fn ids_are_sequential_across_props() {
        let mut reg = ListenerRegistry::new();
        let a = reg.register("bar", Listener::noop());
        let b = reg.register("*", Listener::noop());
        let c = reg.register("baz", Listener::noop());
        assert_eq!(a.to_string(), "bar-0");
        assert_eq!(b.to_string(), "*-1");
        assert_eq!(c.to_string(), "baz-2");
        assert!(b.is_wildcard());
        assert_eq!(reg.next_index(), 3);
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn empty_registry() {
        let reg = ListenerRegistry::new();
        assert!(reg.is_empty());
        assert_eq!(reg.len(), 0);
        assert!(reg.matching("anything").is_empty());
        assert!(reg.ids().is_empty());
    }

    #[test]
    fn matching_orders_exact_before_wildcard() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut reg = ListenerRegistry::new();
        reg.register("*", recorder(&log, "w1"));
        reg.register("bar", recorder(&log, "e1"));
        reg.register("*", recorder(&log, "w2"));
        reg.register("bar", recorder(&log, "e2"));
        reg.register("other", recorder(&log, "o"));

        for listener in reg.matching("bar") {
            listener.call("bar", None, &Value::Null);
        }
        assert_eq!(*log.borrow(), vec!["e1:bar", "e2:bar", "w1:bar", "w2:bar"]);
    }

    #[test]
    fn wildcard_key_write_calls_wildcards_once() {
        let mut reg = ListenerRegistry::new();
        reg.register("*", Listener::noop());
        reg.register("*", Listener::noop());
        assert_eq!(reg.matching("*").len(), 2);
    }

    #[test]
    fn ids_in_registration_order() {
        let mut reg = ListenerRegistry::new();
        reg.register("b", Listener::noop());
        reg.register("a", Listener::noop());
        reg.register("b", Listener::noop());
        let ids: Vec<String> = reg.ids().iter().map(ToString::to_string).collect();
        assert_eq!(ids, vec!["b-0", "a-1", "b-2"]);
        assert_eq!(reg.count_for("b"), 2);
        assert_eq!(reg.count_for("missing"), 0);
    }

    #[test]
    fn cloned_listener_shares_callback() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let listener = recorder(&log, "x");
        let clone = listener.clone();
        listener.call("p", None, &Value::Null);
        clone.call("q", None, &Value::Null);
        assert_eq!(*log.borrow(), vec!["x:p", "x:q"]);
    }
}
