//! Event delivery.
//!
//! Delivery is per owner. While the owner is batching, events and the
//! watchers they are meant for are queued on the owner's [`BatchState`];
//! [`batch_call_watchers`] drains the queues until they stay empty, calling
//! each queued watcher once with the last event of every parameter it
//! watches.
//!
//! [`BatchState`]: super::BatchState

use std::collections::HashMap;
use std::mem;

use tracing::{debug, trace};

use crate::error::{ParamError, Result};
use crate::parameterized::Owner;

use super::{Event, Watcher};

/// Deliver `event` to `watchers`, flushing the owner's queue unless it is batching.
pub(crate) fn dispatch(owner: &Owner, mut watchers: Vec<Watcher>, event: Event) -> Result<()> {
    watchers.sort_by_key(Watcher::precedence);
    for watcher in &watchers {
        call_watcher(owner, watcher, event.clone())?;
    }
    if !owner.state().is_batching() {
        batch_call_watchers(owner)?;
    }
    Ok(())
}

fn call_watcher(owner: &Owner, watcher: &Watcher, event: Event) -> Result<()> {
    let state = owner.state();
    let triggered = state.batch.borrow().trigger;
    if !triggered
        && watcher.onlychanged()
        && owner.context().comparator().is_equal(&event.old, &event.new)
    {
        return Ok(());
    }

    if state.is_batching() {
        let mut batch = state.batch.borrow_mut();
        batch.events.push(event);
        if !batch.watchers.contains(watcher) {
            batch.watchers.push(watcher.clone());
        }
        return Ok(());
    }

    let event = event.typed(watcher, triggered);
    with_batch(owner, watcher.queued(), false, || {
        execute_watcher(owner, watcher, &[event])
    })
}

fn execute_watcher(owner: &Owner, watcher: &Watcher, events: &[Event]) -> Result<()> {
    trace!(
        watcher = watcher.name(),
        owner = %owner.name(),
        events = events.len(),
        "calling watcher"
    );
    let callback = watcher.callback();
    match callback(events) {
        Ok(effect) => effect.settle(&owner.context(), watcher.name()),
        Err(ParamError::Skip) => Ok(()),
        Err(err) => Err(err),
    }
}

/// Run `f` with batching enabled when `enable` is set or the owner already batches.
///
/// The previous flag is restored afterwards. With `run`, leaving the
/// outermost batch flushes the queued events; an error raised while
/// flushing takes precedence over the result of `f`.
pub(crate) fn with_batch<T, F>(owner: &Owner, enable: bool, run: bool, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let state = owner.state();
    let previous = {
        let mut batch = state.batch.borrow_mut();
        let previous = batch.batch_watch;
        batch.batch_watch = enable || previous;
        previous
    };
    let result = f();
    state.batch.borrow_mut().batch_watch = previous;
    if run && !previous {
        batch_call_watchers(owner)?;
    }
    result
}

/// Drain the owner's queues, calling every queued watcher once per round.
pub(crate) fn batch_call_watchers(owner: &Owner) -> Result<()> {
    let state = owner.state();
    let mut round = 0usize;
    loop {
        let (events, mut watchers) = {
            let mut batch = state.batch.borrow_mut();
            if batch.events.is_empty() {
                return Ok(());
            }
            (mem::take(&mut batch.events), mem::take(&mut batch.watchers))
        };
        round += 1;
        debug!(
            owner = %owner.name(),
            round,
            events = events.len(),
            watchers = watchers.len(),
            "flushing batched events"
        );

        let mut latest: HashMap<(String, String), Event> = HashMap::new();
        for event in events {
            latest.insert((event.name.clone(), event.what.clone()), event);
        }

        watchers.sort_by_key(Watcher::precedence);
        for watcher in &watchers {
            let triggered = state.batch.borrow().trigger;
            let events: Vec<Event> = watcher
                .parameter_names()
                .iter()
                .filter_map(|name| latest.get(&(name.clone(), watcher.what().to_string())))
                .map(|event| event.clone().typed(watcher, triggered))
                .collect();
            with_batch(owner, watcher.queued(), false, || {
                execute_watcher(owner, watcher, &events)
            })?;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::events::EventType;
    use crate::parameterized::{Class, Parameter, WatchOptions};
    use crate::value::Value;

    fn pair() -> Class {
        Class::builder("Pair")
            .param(Parameter::new("a", 0))
            .param(Parameter::new("b", 0))
            .build()
            .unwrap()
    }

    #[test]
    fn test_precedence_orders_calls() {
        let obj = pair().new_instance().unwrap();
        let order = Rc::new(RefCell::new(Vec::new()));
        for precedence in [5, 0, 2] {
            let order = order.clone();
            obj.param()
                .watch_with(
                    move |_| {
                        order.borrow_mut().push(precedence);
                        Ok(())
                    },
                    &["a"],
                    WatchOptions {
                        precedence,
                        ..WatchOptions::default()
                    },
                )
                .unwrap();
        }
        obj.param().set("a", 1).unwrap();
        assert_eq!(*order.borrow(), vec![0, 2, 5]);
    }

    #[test]
    fn test_batched_events_collapse_per_parameter() {
        let obj = pair().new_instance().unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        obj.param()
            .watch(
                move |events| {
                    let names: Vec<(String, Value)> = events
                        .iter()
                        .map(|e| (e.name.clone(), e.new.clone()))
                        .collect();
                    sink.borrow_mut().push(names);
                    Ok(())
                },
                &["a", "b"],
            )
            .unwrap();

        obj.param()
            .batch(|| {
                obj.param().set("a", 1)?;
                obj.param().set("b", 2)?;
                obj.param().set("a", 3)
            })
            .unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0],
            vec![
                ("a".to_string(), Value::Int(3)),
                ("b".to_string(), Value::Int(2))
            ]
        );
    }

    #[test]
    fn test_event_types() {
        let obj = pair().new_instance().unwrap();
        let kinds = Rc::new(RefCell::new(Vec::new()));
        let changed = kinds.clone();
        obj.param()
            .watch(
                move |events| {
                    changed.borrow_mut().push(events[0].event_type);
                    Ok(())
                },
                &["a"],
            )
            .unwrap();
        let set = kinds.clone();
        obj.param()
            .watch_with(
                move |events| {
                    set.borrow_mut().push(events[0].event_type);
                    Ok(())
                },
                &["b"],
                WatchOptions {
                    onlychanged: false,
                    ..WatchOptions::default()
                },
            )
            .unwrap();

        obj.param().set("a", 1).unwrap();
        obj.param().set("b", 0).unwrap();
        obj.param().trigger(&["a"]).unwrap();

        assert_eq!(
            *kinds.borrow(),
            vec![
                Some(EventType::Changed),
                Some(EventType::Set),
                Some(EventType::Triggered)
            ]
        );
    }
}
