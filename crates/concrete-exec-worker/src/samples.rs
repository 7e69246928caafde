//! Programs bundled with the worker binary.
//!
//! The `samples` entry is what `addPaths(["samples"])` selects. Besides
//! ordinary classes it carries misbehaving ones (a loop that ignores
//! interrupts, a method that aborts the process) so clients can exercise
//! timeout and crash handling end to end.

use concrete_exec::coverage::InstructionKind::{ExplicitThrow, Plain, Return};
use concrete_exec::model::{ClassId, PrimitiveValue};
use concrete_exec::runtime::{ClassDef, FieldDef, MethodDef, Value};
use concrete_exec::ProgramCatalog;

/// Class path entry holding the sample classes
pub const SAMPLES: &str = "samples";

fn ids(names: &[&str]) -> Vec<ClassId> {
    names.iter().copied().map(ClassId::new).collect()
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Null)
}

/// Catalog served by the worker binary
#[must_use]
pub fn catalog() -> ProgramCatalog {
    ProgramCatalog::new().with_entry(SAMPLES, classes())
}

fn classes() -> Vec<ClassDef> {
    vec![calculator(), counter(), looper(), stubborn(), crasher()]
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
            MethodDef::new("requirePositive", ids(&["int"]), "int")
                .with_instructions([Plain, ExplicitThrow, Return])
                .with_body(|f, _, args| {
                    f.at(0)?;
                    let a = f.int(&arg(args, 0))?;
                    if a <= 0 {
                        f.at(1)?;
                        return Err(f.throw("std.IllegalArgumentException", "not positive"));
                    }
                    f.at(2)?;
                    Ok(Value::int(a))
                }),
        )
}

fn counter() -> ClassDef {
    ClassDef::class("samples.Counter")
        .with_field(FieldDef::static_field("count", "int").with_initial(PrimitiveValue::Int(0)))
        .with_method(
            MethodDef::static_method("increment", vec![], "int")
                .with_instructions([Plain, Return])
                .with_body(|f, _, _| {
                    f.at(0)?;
                    let next = {
                        let count = f.get_static("samples.Counter", "count")?;
                        f.int(&count)?.wrapping_add(1)
                    };
                    f.set_static("samples.Counter", "count", Value::int(next))?;
                    f.at(1)?;
                    Ok(Value::int(next))
                }),
        )
}

/// Loops forever but honours interrupts
fn looper() -> ClassDef {
    ClassDef::class("samples.Looper").with_method(
        MethodDef::new("spin", vec![], "void")
            .with_instructions([Plain])
            .with_body(|f, _, _| loop {
                f.at(0)?;
            }),
    )
}

/// Loops forever and never looks at the interrupt flag
fn stubborn() -> ClassDef {
    ClassDef::class("samples.Stubborn").with_method(
        MethodDef::static_method("hang", vec![], "void")
            .with_instructions([Plain])
            .with_body(|f, _, _| {
                f.at(0)?;
                loop {
                    std::hint::spin_loop();
                }
            }),
    )
}

/// Takes the whole process down
fn crasher() -> ClassDef {
    ClassDef::class("samples.Crasher").with_method(
        MethodDef::static_method("crash", vec![], "void")
            .with_instructions([Plain])
            .with_body(|f, _, _| {
                f.at(0)?;
                tracing::error!("samples.Crasher.crash called, aborting worker");
                std::process::abort()
            }),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use concrete_exec::Machine;
    use std::sync::Arc;

    #[test]
    fn test_catalog_loads() {
        let mut machine = Machine::new(Arc::new(catalog()));
        assert_eq!(machine.add_paths(&[SAMPLES.to_string()]).unwrap(), 5);
        assert_eq!(machine.warmup().unwrap(), 5);
    }
}
