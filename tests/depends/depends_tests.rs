use std::cell::Cell;
use std::rc::Rc;

use param_rs::depends::DependencySpec;
use param_rs::{depends, Class, Context, Kwargs, Parameter, Parameterized, Result, Value};

fn inner(ctx: &Context) -> Class {
    Class::builder("Inner")
        .context(ctx)
        .param(Parameter::new("value", 0))
        .param(Parameter::new("child", Value::None))
        .build()
        .unwrap()
}

fn counter(calls: &Rc<Cell<usize>>) -> impl Fn(&Parameterized, &[Value], &Kwargs) -> Result<Value> {
    let calls = calls.clone();
    move |_, _, _| {
        calls.set(calls.get() + 1);
        Ok(Value::None)
    }
}

#[test]
fn test_spec_parsing() {
    let spec = DependencySpec::parse("sub.value:constant").unwrap();
    assert_eq!(spec.path_string(), "sub");
    assert_eq!(spec.dotted_path(), ".sub");
    assert_eq!(spec.name(), "value");
    assert_eq!(spec.what(), "constant");

    let spec = DependencySpec::parse("value").unwrap();
    assert_eq!(spec.path_string(), "");
    assert_eq!(spec.dotted_path(), "");
    assert_eq!(spec.name(), "value");
    assert_eq!(spec.what(), "value");
    assert!(!spec.has_explicit_what());
}

#[test]
fn test_nested_chain_is_rewired_on_replacement() {
    let ctx = Context::new();
    let calls = Rc::new(Cell::new(0));
    let outer = Class::builder("Outer")
        .context(&ctx)
        .param(Parameter::new("sub", Value::None))
        .dependent("on_value", depends(["sub.value"]).watch(true), counter(&calls))
        .build()
        .unwrap();

    let old = inner(&ctx).new_instance().unwrap();
    let obj = outer.instance([("sub", &old)]).unwrap();
    old.set("value", 1).unwrap();
    assert_eq!(calls.get(), 1);

    let new = inner(&ctx).instance([("value", 10)]).unwrap();
    obj.set("sub", &new).unwrap();
    assert_eq!(calls.get(), 2);

    old.set("value", 2).unwrap();
    assert_eq!(calls.get(), 2);
    new.set("value", 11).unwrap();
    assert_eq!(calls.get(), 3);
}

#[test]
fn test_dropped_instance_unregisters_nested_watchers() {
    let ctx = Context::new();
    let calls = Rc::new(Cell::new(0));
    let outer = Class::builder("Outer")
        .context(&ctx)
        .param(Parameter::new("sub", Value::None))
        .dependent("on_value", depends(["sub.value"]).watch(true), counter(&calls))
        .build()
        .unwrap();

    let sub = inner(&ctx).new_instance().unwrap();
    let obj = outer.instance([("sub", &sub)]).unwrap();
    assert!(!sub.param().watchers("value", "value").is_empty());

    drop(obj);
    assert!(sub.param().watchers("value", "value").is_empty());
    sub.set("value", 5).unwrap();
    assert_eq!(calls.get(), 0);
}

#[test]
fn test_two_level_chain_follows_intermediate_replacement() {
    let ctx = Context::new();
    let calls = Rc::new(Cell::new(0));
    let outer = Class::builder("Outer")
        .context(&ctx)
        .param(Parameter::new("sub", Value::None))
        .dependent(
            "on_leaf",
            depends(["sub.child.value"]).watch(true),
            counter(&calls),
        )
        .build()
        .unwrap();

    let leaf = inner(&ctx).new_instance().unwrap();
    let middle = inner(&ctx).instance([("child", &leaf)]).unwrap();
    let obj = outer.instance([("sub", &middle)]).unwrap();

    leaf.set("value", 1).unwrap();
    assert_eq!(calls.get(), 1);

    let replacement = inner(&ctx).instance([("value", 5)]).unwrap();
    middle.set("child", &replacement).unwrap();
    assert_eq!(calls.get(), 2);
    leaf.set("value", 2).unwrap();
    assert_eq!(calls.get(), 2);
    replacement.set("value", 6).unwrap();
    assert_eq!(calls.get(), 3);
    drop(obj);
}

#[test]
fn test_methods_watching_same_root_keep_their_watchers() {
    let ctx = Context::new();
    let first = Rc::new(Cell::new(0));
    let second = Rc::new(Cell::new(0));
    let outer = Class::builder("Outer")
        .context(&ctx)
        .param(Parameter::new("sub", Value::None))
        .dependent("first", depends(["sub.value"]).watch(true), counter(&first))
        .dependent("second", depends(["sub.value"]).watch(true), counter(&second))
        .build()
        .unwrap();

    let sub = inner(&ctx).new_instance().unwrap();
    let obj = outer.instance([("sub", &sub)]).unwrap();
    let replacement = inner(&ctx).instance([("value", 3)]).unwrap();
    obj.set("sub", &replacement).unwrap();
    replacement.set("value", 4).unwrap();
    assert_eq!(first.get(), 2);
    assert_eq!(second.get(), 2);
}

#[test]
fn test_method_depending_on_method() {
    let ctx = Context::new();
    let calls = Rc::new(Cell::new(0));
    let cls = Class::builder("Chain")
        .context(&ctx)
        .param(Parameter::new("a", 1))
        .param(Parameter::new("b", 2))
        .dependent("base", depends(["a"]), |obj, _, _| obj.get("a"))
        .dependent("derived", depends(["base"]).watch(true), counter(&calls))
        .build()
        .unwrap();
    let obj = cls.new_instance().unwrap();
    obj.set("b", 3).unwrap();
    assert_eq!(calls.get(), 0);
    obj.set("a", 3).unwrap();
    assert_eq!(calls.get(), 1);

    let names: Vec<String> = obj
        .param()
        .method_dependencies("derived", false)
        .unwrap()
        .into_iter()
        .map(|p| p.name)
        .collect();
    assert_eq!(names, vec!["a".to_string()]);
}

#[test]
fn test_misspelled_dependency_fails_to_build() {
    let ctx = Context::new();
    let result = Class::builder("Broken")
        .context(&ctx)
        .param(Parameter::new("a", 1))
        .dependent("watch_a", depends(["aa"]).watch(true), |_, _, _| Ok(Value::None))
        .build();
    assert!(result.is_err());
}
