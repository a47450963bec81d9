use std::cell::Cell;
use std::rc::Rc;

use approx::assert_relative_eq;
use ndarray::Array1;
use param_rs::{
    bind, Class, Context, Function, ParamError, Parameter, QueueExecutor, Rx, Ufunc, Value,
};

fn counting(calls: &Rc<Cell<usize>>, factor: i64) -> Function {
    let calls = calls.clone();
    Function::unary("counting", move |v| {
        calls.set(calls.get() + 1);
        Ok(Value::Int(v.as_int().unwrap_or(0) * factor))
    })
}

#[test]
fn test_sibling_branches() {
    let ctx = Context::new();
    let root = Rx::with_context(5, &ctx);
    let multiplications = Rc::new(Cell::new(0));
    let chained = (&root + 1).rx().pipe(counting(&multiplications, 2), &[]);
    assert_eq!(chained.value().unwrap(), Value::Int(12));

    root.set_value(10).unwrap();
    assert_eq!(chained.value().unwrap(), Value::Int(22));
    assert_eq!(multiplications.get(), 2);

    let sibling = &root + 100;
    assert_eq!(sibling.value().unwrap(), Value::Int(110));
    assert_eq!(multiplications.get(), 2);
}

#[test]
fn test_construction_is_lazy_and_reads_are_cached() {
    let ctx = Context::new();
    let root = Rx::with_context(2, &ctx);
    let calls = Rc::new(Cell::new(0));
    let node = root
        .rx()
        .pipe(counting(&calls, 3), &[])
        .rx()
        .pipe(counting(&calls, 1), &[]);
    assert_eq!(calls.get(), 0);

    assert_eq!(node.value().unwrap(), Value::Int(6));
    assert_eq!(node.value().unwrap(), Value::Int(6));
    assert_eq!(calls.get(), 2);
}

#[test]
fn test_only_downstream_nodes_recompute() {
    let ctx = Context::new();
    let left = Rx::with_context(1, &ctx);
    let right = Rx::with_context(1, &ctx);
    let left_calls = Rc::new(Cell::new(0));
    let right_calls = Rc::new(Cell::new(0));
    let left_branch = left.rx().pipe(counting(&left_calls, 1), &[]);
    let right_branch = right.rx().pipe(counting(&right_calls, 1), &[]);
    let total = &left_branch + &right_branch;
    assert_eq!(total.value().unwrap(), Value::Int(2));

    right.set_value(5).unwrap();
    assert_eq!(total.value().unwrap(), Value::Int(6));
    assert_eq!(left_calls.get(), 1);
    assert_eq!(right_calls.get(), 2);
}

#[test]
fn test_error_is_raised_until_upstream_change() {
    let ctx = Context::new();
    let root = Rx::with_context(Value::List(vec![Value::Int(1)]), &ctx);
    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    let third = Function::unary("third", move |v| {
        counter.set(counter.get() + 1);
        param_rs::value::ops::get_item(v, &Value::Int(2))
    });
    let node = root.rx().pipe(third, &[]);

    let first = node.value().unwrap_err();
    assert!(matches!(first, ParamError::IndexError(_)));
    assert_eq!(node.value().unwrap_err(), first);
    assert_eq!((&node + 1).value().unwrap_err(), first);
    assert_eq!(calls.get(), 1);

    root.set_value(vec![1, 2, 3]).unwrap();
    assert_eq!(node.value().unwrap(), Value::Int(3));
    assert_eq!(calls.get(), 2);
}

#[test]
fn test_expression_over_parameters_of_instance() {
    let ctx = Context::new();
    let cls = Class::builder("Rect")
        .context(&ctx)
        .param(Parameter::new("width", 2.0))
        .param(Parameter::new("height", 3.0))
        .build()
        .unwrap();
    let rect = cls.new_instance().unwrap();
    let width = rect.param().get("width").unwrap();
    let height = rect.param().get("height").unwrap();

    let area = Rx::with_context(&width, &ctx) * &height;
    assert_eq!(area.value().unwrap(), Value::Float(6.0));
    rect.param().update([("width", 4.0), ("height", 0.5)]).unwrap();
    assert_eq!(area.value().unwrap(), Value::Float(2.0));
    assert_eq!(area.params().len(), 2);
}

#[test]
fn test_expression_as_parameter_reference() {
    let ctx = Context::new();
    let holder = Class::builder("Holder")
        .context(&ctx)
        .param(Parameter::new("label", "").allow_refs())
        .build()
        .unwrap();
    let name = Rx::with_context("world", &ctx);
    let greeting = name.call_method("upper", &[]);
    let obj = holder.instance([("label", &greeting)]).unwrap();
    assert_eq!(obj.get("label").unwrap(), Value::from("WORLD"));
    name.set_value("param").unwrap();
    assert_eq!(obj.get("label").unwrap(), Value::from("PARAM"));
}

#[test]
fn test_watch_bound_expression() {
    let ctx = Context::new();
    let root = Rx::with_context(1, &ctx);
    let seen = Rc::new(Cell::new(0));
    let sink = seen.clone();
    let record = Function::unary("record", move |v| {
        sink.set(v.as_int().unwrap_or(0));
        Ok(Value::None)
    });
    let _watched = bind(&record, [&root + 1]).watch(true).build().unwrap();
    root.set_value(41).unwrap();
    assert_eq!(seen.get(), 42);
}

#[test]
fn test_asynchronous_pipeline_step() {
    let ctx = Context::new();
    let executor = QueueExecutor::new();
    ctx.set_executor(executor.clone());
    let root = Rx::with_context(3, &ctx);
    let slow_square = Function::coroutine("slow_square", |args, _| {
        let x = args[0].as_int().unwrap_or(0);
        Ok(Value::Int(x * x))
    });
    let squared = root.rx().pipe(slow_square, &[]);

    assert_eq!(squared.value().unwrap(), Value::Undefined);
    executor.run_pending().unwrap();
    assert_eq!(squared.value().unwrap(), Value::Int(9));

    let shifted = &squared + 1;
    assert_eq!(shifted.value().unwrap(), Value::Int(10));
    root.set_value(4).unwrap();
    squared.value().unwrap();
    executor.run_pending().unwrap();
    assert_eq!(shifted.value().unwrap(), Value::Int(17));
}

#[test]
fn test_array_pipeline() {
    let ctx = Context::new();
    let samples = Rx::with_context(Array1::linspace(0.0, 1.0, 3), &ctx);
    let scaled = (&samples * 2.0).apply_ufunc(Ufunc::Sqrt, &[]);
    let values = scaled.value().unwrap();
    let values = values.as_array().unwrap();
    assert_relative_eq!(values[[1]], 1.0);
    assert_relative_eq!(values[[2]], 2f64.sqrt());
}
