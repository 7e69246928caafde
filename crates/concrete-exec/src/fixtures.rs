//! Sample programs shared by unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::coverage::InstructionKind::{ExplicitThrow, Plain, Return};
use crate::model::{ClassId, ConstructorRef, MethodRef, PrimitiveValue};
use crate::runtime::{ClassDef, FieldDef, Machine, MethodDef, ProgramCatalog, Value};
use std::sync::Arc;

/// Catalog entry holding every sample class
pub(crate) const ENTRY: &str = "samples";

fn ids(names: &[&str]) -> Vec<ClassId> {
    names.iter().copied().map(ClassId::new).collect()
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Null)
}

pub(crate) fn method(class: &str, name: &str, params: &[&str], ret: &str) -> MethodRef {
    MethodRef::new(class, name, ids(params), ret)
}

pub(crate) fn constructor(class: &str, params: &[&str]) -> ConstructorRef {
    ConstructorRef::new(class, ids(params))
}

pub(crate) fn catalog() -> ProgramCatalog {
    ProgramCatalog::new().with_entry(ENTRY, classes())
}

/// Machine with the samples entry on its class path
pub(crate) fn machine() -> Machine {
    let mut machine = Machine::new(Arc::new(catalog()));
    machine.add_paths(&[ENTRY.to_string()]).unwrap();
    machine
}

fn classes() -> Vec<ClassDef> {
    vec![
        node(),
        pair(),
        account(),
        calculator(),
        looper(),
        counter(),
        service(),
        relay(),
        source(),
        engine(),
        car("samples.CarA"),
        car("samples.CarB"),
        ClassDef::enumeration("samples.Color", &["RED", "GREEN", "BLUE"]),
        ClassDef::class("samples.Palette").with_field(FieldDef::instance("color", "samples.Color")),
        util(),
        ClassDef::interface("samples.IntOp").with_method(MethodDef::new("apply", ids(&["int"]), "int")),
        adder(),
        doubler(),
        disk(),
    ]
}

fn node() -> ClassDef {
    ClassDef::class("samples.Node")
        .with_field(FieldDef::instance("value", "int"))
        .with_field(FieldDef::instance("next", "samples.Node"))
        .with_method(MethodDef::constructor(ids(&["int"])).with_body(|f, this, args| {
            let this = this.unwrap_or(Value::Null);
            f.set_field(&this, "value", arg(args, 0))?;
            Ok(Value::Void)
        }))
        .with_method(
            MethodDef::new("length", vec![], "int")
                .with_instructions([Plain, Return])
                .with_body(|f, this, _| {
                    f.at(0)?;
                    let mut current = this.unwrap_or(Value::Null);
                    let mut length = 0;
                    while !current.is_null() {
                        length += 1;
                        current = f.get_field(&current, "next")?;
                    }
                    f.at(1)?;
                    Ok(Value::int(length))
                }),
        )
        .with_method(MethodDef::new("lambda$adder$0", ids(&["int"]), "int").with_body(|f, this, args| {
            let value = f.get_field(&this.unwrap_or(Value::Null), "value")?;
            let (value, x) = (f.int(&value)?, f.int(&arg(args, 0))?);
            Ok(Value::int(value.wrapping_add(x)))
        }))
        .with_method(MethodDef::new("adder", vec![], "samples.IntOp").with_body(|f, this, _| {
            f.new_lambda("samples.IntOp", "lambda$adder$0", this, vec![])
        }))
}

fn pair() -> ClassDef {
    ClassDef::class("samples.Pair")
        .with_field(FieldDef::instance("left", ClassId::OBJECT))
        .with_field(FieldDef::instance("right", ClassId::OBJECT))
}

fn account() -> ClassDef {
    ClassDef::class("samples.Account")
        .with_field(FieldDef::instance("balance", "int").private())
        .with_method(
            MethodDef::new("deposit", ids(&["int"]), "void")
                .with_instructions([Plain, Return])
                .with_body(|f, this, args| {
                    f.at(0)?;
                    let this = this.unwrap_or(Value::Null);
                    let balance = f.get_field(&this, "balance")?;
                    let balance = f.int(&balance)?;
                    let amount = f.int(&arg(args, 0))?;
                    f.set_field(&this, "balance", Value::int(balance + amount))?;
                    f.at(1)?;
                    Ok(Value::Void)
                }),
        )
}

fn calculator() -> ClassDef {
    ClassDef::class("samples.Calculator")
        .with_method(
            MethodDef::new("add", ids(&["int", "int"]), "int")
                .with_instructions([Plain, Return])
                .with_body(|f, _, args| {
                    f.at(0)?;
                    let (a, b) = (f.int(&arg(args, 0))?, f.int(&arg(args, 1))?);
                    f.at(1)?;
                    Ok(Value::int(a.wrapping_add(b)))
                }),
        )
        .with_method(
            MethodDef::new("divide", ids(&["int", "int"]), "int")
                .with_instructions([Plain, Return])
                .with_body(|f, _, args| {
                    f.at(0)?;
                    let (a, b) = (f.int(&arg(args, 0))?, f.int(&arg(args, 1))?);
                    let quotient = f.div_int(a, b)?;
                    f.at(1)?;
                    Ok(Value::int(quotient))
                }),
        )
        .with_method(
            MethodDef::new("checkedDivide", ids(&["int", "int"]), "int")
                .with_instructions([Plain, ExplicitThrow, Return])
                .with_body(|f, _, args| {
                    f.at(0)?;
                    let (a, b) = (f.int(&arg(args, 0))?, f.int(&arg(args, 1))?);
                    if b == 0 {
                        f.at(1)?;
                        return Err(f.throw("std.IllegalArgumentException", "divisor is zero"));
                    }
                    f.at(2)?;
                    Ok(Value::int(a / b))
                }),
        )
        .with_method(
            MethodDef::new("viaHelper", ids(&["int"]), "int")
                .with_instructions([Plain, Return])
                .with_body(|f, _, args| {
                    f.at(0)?;
                    let checked = f.call_static("samples.Calculator", "check", &[arg(args, 0)])?;
                    f.at(1)?;
                    Ok(checked)
                }),
        )
        .with_method(
            MethodDef::static_method("check", ids(&["int"]), "int")
                .with_instructions([Plain, ExplicitThrow, Return])
                .with_body(|f, _, args| {
                    f.at(0)?;
                    let a = f.int(&arg(args, 0))?;
                    if a < 0 {
                        f.at(1)?;
                        return Err(f.throw("std.IllegalStateException", "negative"));
                    }
                    f.at(2)?;
                    Ok(Value::int(a))
                }),
        )
}

fn looper() -> ClassDef {
    ClassDef::class("samples.Looper").with_method(
        MethodDef::new("spin", vec![], "void")
            .with_instructions([Plain])
            .with_body(|f, _, _| loop {
                f.at(0)?;
            }),
    )
}

fn counter() -> ClassDef {
    ClassDef::class("samples.Counter")
        .with_field(FieldDef::static_field("count", "int").with_initial(PrimitiveValue::Int(0)))
        .with_field(FieldDef::static_field("label", ClassId::STRING))
        .with_method(
            MethodDef::static_method("increment", vec![], "int")
                .with_instructions([Plain, Return])
                .with_body(|f, _, _| {
                    f.at(0)?;
                    let count = f.get_static("samples.Counter", "count")?;
                    let next = f.int(&count)? + 1;
                    f.set_static("samples.Counter", "count", Value::int(next))?;
                    f.at(1)?;
                    Ok(Value::int(next))
                }),
        )
}

fn service() -> ClassDef {
    ClassDef::class("samples.Service").with_method(
        MethodDef::new("fetch", vec![], "int")
            .with_instructions([Return])
            .with_body(|f, _, _| {
                f.at(0)?;
                Ok(Value::int(1))
            }),
    )
}

fn relay() -> ClassDef {
    ClassDef::class("samples.Relay").with_method(
        MethodDef::static_method("fetchThrice", ids(&["samples.Service"]), "int[]")
            .with_instructions([Plain, Return])
            .with_body(|f, _, args| {
                f.at(0)?;
                let service = arg(args, 0);
                let calls = f.new_array("int", 3)?;
                for index in 0..3 {
                    let value = f.call(&service, "fetch", &[])?;
                    f.array_set(&calls, index, value)?;
                }
                f.at(1)?;
                Ok(calls)
            }),
    )
}

fn source() -> ClassDef {
    ClassDef::interface("samples.Source").with_method(MethodDef::new("next", vec![], "int"))
}

fn engine() -> ClassDef {
    ClassDef::class("samples.Engine")
        .with_field(FieldDef::instance("power", "int"))
        .with_method(MethodDef::constructor(vec![]).with_body(|f, this, _| {
            f.set_field(&this.unwrap_or(Value::Null), "power", Value::int(100))?;
            Ok(Value::Void)
        }))
}

fn car(name: &str) -> ClassDef {
    ClassDef::class(name).with_method(
        MethodDef::new("build", vec![], "samples.Engine")
            .with_instructions([Return])
            .with_body(|f, _, _| {
                f.at(0)?;
                f.new_object("samples.Engine", &[])
            }),
    )
}

fn util() -> ClassDef {
    ClassDef::class("samples.Util")
        .with_method(
            MethodDef::static_method("twice", ids(&["int"]), "int")
                .with_instructions([Return])
                .with_body(|f, _, args| {
                    f.at(0)?;
                    Ok(Value::int(f.int(&arg(args, 0))?.wrapping_mul(2)))
                }),
        )
        .with_method(
            MethodDef::static_method("quad", ids(&["int"]), "int")
                .with_instructions([Plain, Return])
                .with_body(|f, _, args| {
                    f.at(0)?;
                    let once = f.call_static("samples.Util", "twice", &[arg(args, 0)])?;
                    let again = f.call_static("samples.Util", "twice", &[once])?;
                    f.at(1)?;
                    Ok(again)
                }),
        )
}

fn adder() -> ClassDef {
    ClassDef::class("samples.Adder")
        .with_method(
            MethodDef::static_method("lambda$make$0", ids(&["int", "int"]), "int").with_body(|f, _, args| {
                let (captured, x) = (f.int(&arg(args, 0))?, f.int(&arg(args, 1))?);
                Ok(Value::int(captured.wrapping_add(x)))
            }),
        )
        .with_method(
            MethodDef::static_method("make", ids(&["int"]), "samples.IntOp").with_body(|f, _, args| {
                f.new_lambda("samples.IntOp", "lambda$make$0", None, vec![arg(args, 0)])
            }),
        )
}

/// Invocation handler answering every call with twice its first argument
fn doubler() -> ClassDef {
    ClassDef::class("samples.Doubler")
        .implements("std.InvocationHandler")
        .with_method(
            MethodDef::new("invoke", ids(&[ClassId::OBJECT, ClassId::STRING, "std.Object[]"]), ClassId::OBJECT)
                .with_body(|f, _, args| {
                    let first = f.array_get(&arg(args, 2), 0)?;
                    Ok(Value::int(f.int(&first)?.wrapping_mul(2)))
                }),
        )
}

fn disk() -> ClassDef {
    ClassDef::class("samples.Disk").with_method(
        MethodDef::static_method("read", ids(&[ClassId::STRING]), ClassId::STRING)
            .with_instructions([Return])
            .with_body(|f, _, args| {
                f.at(0)?;
                f.call_static("std.Files", "readString", &[arg(args, 0)])
            }),
    )
}
