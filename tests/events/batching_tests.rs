use std::cell::RefCell;
use std::rc::Rc;

use param_rs::{depends, Class, Context, Parameter, Value, WatchOptions};

use crate::test_helpers::{delivery_log, int, numbered_class};

#[test]
fn test_dependent_method_fires_once_per_batch() {
    let ctx = Context::new();
    let calls = Rc::new(RefCell::new(Vec::new()));
    let log = calls.clone();
    let cls = Class::builder("P")
        .context(&ctx)
        .param(Parameter::new("a", 0))
        .param(Parameter::new("b", 0))
        .dependent("record", depends(["a", "b"]).watch(true), move |obj, _, _| {
            log.borrow_mut().push((int(obj.get("a")?), int(obj.get("b")?)));
            Ok(Value::None)
        })
        .build()
        .unwrap();
    let p = cls.new_instance().unwrap();

    p.param()
        .batch(|| {
            p.set("a", 1)?;
            p.set("b", 2)
        })
        .unwrap();
    assert_eq!(*calls.borrow(), vec![(1, 2)]);

    p.set("a", 3).unwrap();
    assert_eq!(calls.borrow().len(), 2);
}

#[test]
fn test_nested_batches_flush_at_outermost() {
    let ctx = Context::new();
    let obj = numbered_class(&ctx, 2).new_instance().unwrap();
    let (seen, record) = delivery_log();
    let _watcher = obj.param().watch(record, &["p0", "p1"]).unwrap();

    obj.param()
        .batch(|| {
            obj.set("p0", 1)?;
            obj.param().batch(|| obj.set("p1", 2))?;
            assert!(seen.borrow().is_empty());
            Ok(())
        })
        .unwrap();
    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(seen.borrow()[0].len(), 2);
}

#[test]
fn test_watcher_setting_another_parameter_flushes_in_same_call() {
    let ctx = Context::new();
    let obj = numbered_class(&ctx, 2).new_instance().unwrap();
    let _forward = obj
        .param()
        .watch(
            |events| {
                let event = &events[0];
                let source = event.obj.as_ref().expect("instance event");
                source.set("p1", int(event.new.clone()) * 10)
            },
            &["p0"],
        )
        .unwrap();
    let (seen, record) = delivery_log();
    let _downstream = obj.param().watch(record, &["p1"]).unwrap();

    obj.set("p0", 4).unwrap();
    assert_eq!(*seen.borrow(), vec![vec![("p1".to_string(), Value::Int(40))]]);
}

#[test]
fn test_fixpoint_inside_batch() {
    let ctx = Context::new();
    let obj = numbered_class(&ctx, 3).new_instance().unwrap();
    let _forward = obj
        .param()
        .watch(
            |events| {
                let source = events[0].obj.as_ref().expect("instance event");
                source.set("p2", int(source.get("p0")?) + int(source.get("p1")?))
            },
            &["p0", "p1"],
        )
        .unwrap();
    let (seen, record) = delivery_log();
    let _downstream = obj.param().watch(record, &["p2"]).unwrap();

    obj.param()
        .update([("p0", 2), ("p1", 3)])
        .unwrap();
    assert_eq!(obj.get("p2").unwrap(), Value::Int(5));
    assert_eq!(seen.borrow().len(), 1);
}

fn ordering(queued: bool) -> Vec<&'static str> {
    let ctx = Context::new();
    let obj = numbered_class(&ctx, 2).new_instance().unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));

    let first = order.clone();
    let _w1 = obj
        .param()
        .watch_with(
            move |events| {
                first.borrow_mut().push("w1 start");
                events[0].obj.as_ref().expect("instance event").set("p1", 1)?;
                first.borrow_mut().push("w1 end");
                Ok(())
            },
            &["p0"],
            WatchOptions {
                queued,
                ..WatchOptions::default()
            },
        )
        .unwrap();
    let second = order.clone();
    let _w2 = obj
        .param()
        .watch(
            move |_| {
                second.borrow_mut().push("w2");
                Ok(())
            },
            &["p1"],
        )
        .unwrap();

    obj.set("p0", 1).unwrap();
    let order = order.borrow().clone();
    order
}

#[test]
fn test_queued_watcher_defers_its_events() {
    assert_eq!(ordering(false), vec!["w1 start", "w2", "w1 end"]);
    assert_eq!(ordering(true), vec!["w1 start", "w1 end", "w2"]);
}

#[test]
fn test_watchers_on_different_owners_are_independent() {
    let ctx = Context::new();
    let cls = numbered_class(&ctx, 1);
    let first = cls.new_instance().unwrap();
    let second = cls.new_instance().unwrap();
    let (seen, record) = delivery_log();
    let _watcher = first.param().watch(record, &["p0"]).unwrap();

    first
        .param()
        .batch(|| {
            second.set("p0", 5)?;
            first.set("p0", 6)
        })
        .unwrap();
    assert_eq!(*seen.borrow(), vec![vec![("p0".to_string(), Value::Int(6))]]);
}

#[test]
fn test_watcher_error_propagates_to_setter() {
    let ctx = Context::new();
    let obj = numbered_class(&ctx, 1).new_instance().unwrap();
    let _watcher = obj
        .param()
        .watch(|_| Err("watcher failed".into()), &["p0"])
        .unwrap();
    let err = obj.set("p0", 1).unwrap_err();
    assert!(err.to_string().contains("watcher failed"));
    assert_eq!(obj.get("p0").unwrap(), Value::Int(1));
}
