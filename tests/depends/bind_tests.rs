use param_rs::{bind, Class, Context, Function, Parameter, Rx, Value};

fn add_one() -> Function {
    Function::unary("add_one", |x| Ok(Value::Int(x.as_int().unwrap_or(0) + 1)))
}

#[test]
fn test_bound_function_reflects_current_value() {
    let ctx = Context::new();
    let cls = Class::builder("Holder")
        .context(&ctx)
        .param(Parameter::new("x", 1))
        .build()
        .unwrap();
    let holder = cls.new_instance().unwrap();
    let x = holder.param().get("x").unwrap();

    let bound = bind(add_one(), [&x]).build().unwrap();
    assert_eq!(bound.call0().unwrap(), Value::Int(2));
    holder.set("x", 5).unwrap();
    assert_eq!(bound.call0().unwrap(), Value::Int(6));
}

#[test]
fn test_bound_function_as_expression_root() {
    let ctx = Context::new();
    let cls = Class::builder("Holder")
        .context(&ctx)
        .param(Parameter::new("x", 1))
        .build()
        .unwrap();
    let holder = cls.new_instance().unwrap();
    let x = holder.param().get("x").unwrap();

    let expr = Rx::with_context(bind(add_one(), [&x]).build().unwrap(), &ctx) * 10;
    assert_eq!(expr.value().unwrap(), Value::Int(20));
    holder.set("x", 4).unwrap();
    assert_eq!(expr.value().unwrap(), Value::Int(50));
}

#[test]
fn test_bind_with_expression_argument() {
    let ctx = Context::new();
    let base = Rx::with_context(3, &ctx);
    let bound = bind(add_one(), [&base * 2]).build().unwrap();
    assert_eq!(bound.call0().unwrap(), Value::Int(7));
    base.set_value(10).unwrap();
    assert_eq!(bound.call0().unwrap(), Value::Int(21));
}
