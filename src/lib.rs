//! # param-rs
//!
//! `param-rs` provides declarative, observable parameters for Rust: classes
//! declare named parameters, instances notify watchers when parameter values
//! change, methods and functions declare what they depend on, and reactive
//! expressions build lazily evaluated pipelines over values, parameters and
//! dependent functions.
//!
//! The library provides:
//! - An attribute store of [`Class`]es, [`Parameterized`] instances and their
//!   [`Parameter`] declarations
//! - Watchers with batching, precedence ordering and `onlychanged` filtering
//! - Dependency declarations ([`depends`], [`bind`]) resolved through chains of
//!   nested objects that may be replaced at any time
//! - Reactive expressions ([`Rx`]) recomputed only when read after a change
//!
//! Everything runs on one thread. Asynchronous callbacks and expression steps
//! are handed to an [`AsyncExecutor`] configured on a [`Context`].
//!
//! ## Basic Usage
//!
//! ```
//! use param_rs::{rx, Class, Parameter, Value};
//!
//! let cls = Class::builder("Sine")
//!     .param(Parameter::new("amplitude", 1.0))
//!     .build()
//!     .unwrap();
//! let sine = cls.new_instance().unwrap();
//! let amplitude = sine.param().get("amplitude").unwrap();
//!
//! let peak_to_peak = rx(&amplitude) * 2.0;
//! assert_eq!(peak_to_peak.value().unwrap(), Value::Float(2.0));
//!
//! sine.set("amplitude", 2.5).unwrap();
//! assert_eq!(peak_to_peak.value().unwrap(), Value::Float(5.0));
//! ```

pub mod bind;
pub mod context;
pub mod depends;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod function;
pub mod parameterized;
pub mod reactive;
pub mod value;

// Re-exports for convenience
pub use bind::{bind, Bind};
pub use context::{AsyncExecutor, Context, ImmediateExecutor, QueueExecutor, Thunk};
pub use depends::{depends, Dependency, DependencyInfo, Depends};
pub use diagnostics::Diagnostics;
pub use error::{ParamError, Result};
pub use events::{Event, EventType, Watcher};
pub use function::{Effect, Function, FunctionKind, Kwargs, Task, TaskHandle};
pub use parameterized::{
    Class, ClassBuilder, Owner, ParamRef, Parameter, Parameterized, Parameters, WatchOptions,
};
pub use reactive::{rx, ReactiveOps, Rx, Ufunc};
pub use value::{BinaryOp, UnaryOp, Value};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
