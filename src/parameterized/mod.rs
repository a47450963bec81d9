//! # Parameterized classes and objects
//!
//! This module is the attribute store the reactive core is built on: classes
//! declaring named [`Parameter`]s, objects instantiated from them and the
//! [`Parameters`] namespace used to read, write and watch parameter values.
//!
//! ## Key Features
//!
//! - **Declared parameters**: defaults, facets (`constant`, `readonly`,
//!   `allow_refs`, ...) and validators, inherited along `extends` chains
//! - **Single write chokepoint**: every write goes through one setter that
//!   validates, stores and then produces an [`Event`](crate::events::Event)
//! - **Dependent methods**: methods declared with [`Depends`](crate::depends::Depends)
//!   are wired to their dependencies whenever an object is created
//! - **References**: parameters with `allow_refs` follow another parameter,
//!   a dependent function or a reactive expression
//!
//! ## Core Components
//!
//! - [`Parameter`]: a parameter declaration
//! - [`Class`] and [`ClassBuilder`]: parameterized classes
//! - [`Parameterized`]: instances of a class
//! - [`Owner`] and [`ParamRef`]: identities of parameters on a class or instance
//! - [`Parameters`]: the `param` namespace of an owner
//!
//! ## Example Usage
//!
//! ```rust
//! use param_rs::{Class, Parameter, Value};
//!
//! let point = Class::builder("Point")
//!     .param(Parameter::new("x", 0.0))
//!     .param(Parameter::new("y", 0.0))
//!     .build()
//!     .unwrap();
//!
//! let p = point.instance([("x", Value::Float(1.5))]).unwrap();
//! assert_eq!(p.get("x").unwrap(), Value::Float(1.5));
//! assert_eq!(p.get("y").unwrap(), Value::Float(0.0));
//!
//! p.param().set("y", 2.0).unwrap();
//! assert_eq!(p.param().values()["y"], Value::Float(2.0));
//! ```

pub mod class;
pub mod object;
pub mod owner;
pub mod parameter;
pub mod parameters;
pub(crate) mod refs;


use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::events::{BatchState, WatcherRegistry};
use crate::value::Value;

pub use class::{Class, ClassBuilder};
pub use object::Parameterized;
pub use owner::{Owner, ParamRef};
pub use parameter::{Parameter, Validator};
pub use parameters::{Parameters, WatchOptions};

/// Identity of a class or instance, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(u64);

static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

impl OwnerId {
    pub(crate) fn next() -> Self {
        OwnerId(NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Per-owner storage shared by classes and instances.
#[derive(Default)]
pub(crate) struct ParamState {
    pub(crate) values: RefCell<BTreeMap<String, Value>>,
    /// Facet overrides, keyed by parameter name then facet name.
    pub(crate) facets: RefCell<HashMap<String, BTreeMap<String, Value>>>,
    pub(crate) watchers: RefCell<WatcherRegistry>,
    pub(crate) batch: RefCell<BatchState>,
    pub(crate) constant_override: Cell<bool>,
}

impl ParamState {
    pub(crate) fn value(&self, name: &str) -> Option<Value> {
        self.values.borrow().get(name).cloned()
    }

    pub(crate) fn store(&self, name: &str, value: Value) {
        self.values.borrow_mut().insert(name.to_string(), value);
    }

    pub(crate) fn facet(&self, name: &str, what: &str) -> Option<Value> {
        self.facets
            .borrow()
            .get(name)
            .and_then(|facets| facets.get(what))
            .cloned()
    }

    pub(crate) fn store_facet(&self, name: &str, what: &str, value: Value) {
        self.facets
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .insert(what.to_string(), value);
    }

    pub(crate) fn is_batching(&self) -> bool {
        self.batch.borrow().batch_watch
    }
}
