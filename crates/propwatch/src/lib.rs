#![forbid(unsafe_code)]

//! Property-write listeners over observed JSON objects.
//!
//! # Role
//! `propwatch` wraps a keyed object so callers can react to its writes. Every
//! write through the object's facade reports `(property, previous, new)` to
//! the listeners registered for that property and then to the wildcard
//! listeners, before the value is stored.
//!
//! # Primary pieces
//! - [`Observable`]: one observed object, its listener registry and its
//!   [`Facade`].
//! - [`Facade`]: the view callers read and write through.
//! - [`Observer`]: a registry of observables keyed by [`Handle`], so listeners
//!   can be attached by handle.
//! - [`ObserveConfig`]: listener panic policy and unchanged-write skipping.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use propwatch::{Observer, WILDCARD};
//! use serde_json::json;
//!
//! let mut observer = Observer::new();
//! let foo = observer.observe(json!({ "bar": "foo" })).unwrap();
//!
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let exact = Rc::clone(&log);
//! foo.add_listener("bar", move |prop, from, to| {
//!     exact.borrow_mut().push(format!("bar listener: {prop} {from:?} -> {to}"));
//! });
//! let wild = Rc::clone(&log);
//! foo.add_listener(WILDCARD, move |prop, _, to| {
//!     wild.borrow_mut().push(format!("wildcard listener: {prop} -> {to}"));
//! });
//!
//! // Capture the facade weakly so the listener does not keep it alive.
//! let weak = foo.downgrade();
//! foo.add_listener("bar", move |_, _, to| {
//!     if let Some(foo) = weak.upgrade() {
//!         foo.set("mirror", to.clone());
//!     }
//! });
//!
//! foo.set("bar", "bar");
//! assert_eq!(log.borrow().len(), 3);
//! assert!(log.borrow()[0].starts_with("bar listener"));
//! assert_eq!(foo.value("bar"), Some(json!("bar")));
//! assert_eq!(foo.value("mirror"), Some(json!("bar")));
//! ```
//!
//! # Threading
//! Everything here is single-threaded (`Rc`/`RefCell`); listeners run inline
//! before the triggering `set` returns.

pub mod config;
pub mod error;
pub mod listener;
pub mod observable;
pub mod observer;

pub use config::{ListenerFailurePolicy, ObserveConfig};
pub use error::ObserveError;
pub use listener::{Listener, ListenerId, ListenerRegistry, WILDCARD};
pub use observable::{
    ADD_LISTENER, AddListener, Dispatch, Facade, Observable, Prop, SharedObject, WeakFacade,
};
pub use observer::{Handle, Observer};
