//! Main test file for param-rs
//!
//! This file organizes and includes all test modules for the library.

// Watchers, batching and dispatch
mod events;

// Dependency declarations, nested objects and bind
mod depends;

// Reactive expressions
mod reactive;

/// Test helpers - common utilities for tests
pub mod test_helpers {
    use std::cell::RefCell;
    use std::rc::Rc;

    use param_rs::{Class, Context, Event, Parameter, Result, Value};

    /// A class with `count` integer parameters named `p0`, `p1`, ...
    pub fn numbered_class(ctx: &Context, count: usize) -> Class {
        let mut builder = Class::builder("Numbered").context(ctx);
        for i in 0..count {
            builder = builder.param(Parameter::new(format!("p{}", i), 0));
        }
        builder.build().unwrap()
    }

    /// A watcher callback recording the names and new values of each delivery.
    pub fn delivery_log() -> (
        Rc<RefCell<Vec<Vec<(String, Value)>>>>,
        impl Fn(&[Event]) -> Result<()>,
    ) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        (seen, move |events: &[Event]| {
            log.borrow_mut().push(
                events
                    .iter()
                    .map(|e| (e.name.clone(), e.new.clone()))
                    .collect(),
            );
            Ok(())
        })
    }

    /// Integer value of `value`, panicking otherwise.
    pub fn int(value: Value) -> i64 {
        value.as_int().unwrap()
    }
}
