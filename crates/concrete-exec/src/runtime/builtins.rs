//! The `std` class library of the reference host.
//!
//! Well-known value types keep their state in dedicated [`ObjectKind`]
//! layouts rather than declared fields; the model constructor recognises
//! those layouts and describes them as factory calls.

use super::class::{ClassDef, FieldDef, MethodDef};
use super::frame::{Frame, Unwind};
use super::heap::ObjectKind;
use super::introspection::Introspection;
use super::machine::{THROWABLE, THROWABLE_MESSAGE};
use super::sandbox::Permission;
use super::value::{ObjectId, Value};
use crate::model::{ClassId, PrimitiveValue};

const OBJECT: &str = ClassId::OBJECT;
const STRING: &str = ClassId::STRING;

fn ids(names: &[&str]) -> Vec<ClassId> {
    names.iter().copied().map(ClassId::new).collect()
}

fn method(name: &str, params: &[&str], ret: &str) -> MethodDef {
    MethodDef::new(name, ids(params), ret)
}

fn static_method(name: &str, params: &[&str], ret: &str) -> MethodDef {
    MethodDef::static_method(name, ids(params), ret)
}

fn constructor(params: &[&str]) -> MethodDef {
    MethodDef::constructor(ids(params))
}

/// Every built-in class
pub(crate) fn classes() -> Vec<ClassDef> {
    let mut classes = vec![object(), enumeration(), class_ref(), throwable()];
    classes.extend(exceptions());
    classes.extend(wrappers());
    classes.extend([
        array_list(),
        linked_hash_set(),
        linked_hash_map(),
        optional(),
        uuid(),
        instant(),
        duration(),
        local_date(),
        locale(),
        stream(),
        invocation_handler(),
        proxy(),
        files(),
        system(),
    ]);
    classes
}

fn object() -> ClassDef {
    ClassDef::class(OBJECT)
        .with_method(constructor(&[]).with_body(|_, _, _| Ok(Value::Void)))
        .with_method(method("getClass", &[], ClassId::CLASS).with_body(|f, this, _| {
            let id = f.receiver(this)?;
            let machine = f.machine();
            let class = machine.class_of(id)?;
            Ok(Value::Ref(machine.class_ref(&class)?))
        }))
}

fn enumeration() -> ClassDef {
    ClassDef::class("std.Enum")
        .with_method(method("name", &[], STRING).with_body(|f, this, _| {
            let id = f.receiver(this)?;
            match f.kind(id)? {
                ObjectKind::Enum { name, .. } => Ok(Value::string(name.clone())),
                _ => Err(f.throw("std.ClassCastException", "not an enum constant")),
            }
        }))
        .with_method(method("ordinal", &[], ClassId::INT).with_body(|f, this, _| {
            let id = f.receiver(this)?;
            match f.kind(id)? {
                ObjectKind::Enum { ordinal, .. } => Ok(Value::int(*ordinal as i32)),
                _ => Err(f.throw("std.ClassCastException", "not an enum constant")),
            }
        }))
}

fn class_ref() -> ClassDef {
    ClassDef::class(ClassId::CLASS)
        .with_layout(|| ObjectKind::ClassRef {
            target: ClassId::new(OBJECT),
        })
        .with_method(method("getName", &[], STRING).with_body(|f, this, _| {
            let id = f.receiver(this)?;
            match f.kind(id)? {
                ObjectKind::ClassRef { target } => Ok(Value::string(target.name())),
                _ => Err(f.throw("std.ClassCastException", "not a class reference")),
            }
        }))
}

// -------------------------------------------------------------------------
// Exceptions
// -------------------------------------------------------------------------

fn set_message(f: &mut Frame<'_>, this: Option<Value>, args: &[Value]) -> Result<Value, Unwind> {
    let this = this.unwrap_or(Value::Null);
    let message = args.first().cloned().unwrap_or(Value::Null);
    f.set_field(&this, THROWABLE_MESSAGE, message)?;
    Ok(Value::Void)
}

fn with_exception_ctors(class: ClassDef) -> ClassDef {
    class
        .with_method(constructor(&[]).with_body(|_, _, _| Ok(Value::Void)))
        .with_method(constructor(&[STRING]).with_body(set_message))
}

fn throwable() -> ClassDef {
    with_exception_ctors(
        ClassDef::class(THROWABLE).with_field(FieldDef::instance(THROWABLE_MESSAGE, STRING)),
    )
    .with_method(method("getMessage", &[], STRING).with_body(|f, this, _| {
        let this = this.unwrap_or(Value::Null);
        f.get_field(&this, THROWABLE_MESSAGE)
    }))
}

fn exceptions() -> Vec<ClassDef> {
    [
        ("std.Exception", THROWABLE),
        ("std.Error", THROWABLE),
        ("std.RuntimeException", "std.Exception"),
        ("std.IOException", "std.Exception"),
        ("std.IllegalArgumentException", "std.RuntimeException"),
        ("std.IllegalStateException", "std.RuntimeException"),
        ("std.ArithmeticException", "std.RuntimeException"),
        ("std.NullPointerException", "std.RuntimeException"),
        ("std.ClassCastException", "std.RuntimeException"),
        ("std.IndexOutOfBoundsException", "std.RuntimeException"),
        ("std.ArrayIndexOutOfBoundsException", "std.IndexOutOfBoundsException"),
        ("std.NegativeArraySizeException", "std.RuntimeException"),
        ("std.NoSuchElementException", "std.RuntimeException"),
        ("std.UnsupportedOperationException", "std.RuntimeException"),
        ("std.InstantiationException", "std.Exception"),
        ("std.DateTimeException", "std.RuntimeException"),
        ("std.AbstractMethodError", "std.Error"),
    ]
    .into_iter()
    .map(|(name, parent)| with_exception_ctors(ClassDef::class(name).extends(parent)))
    .collect()
}

// -------------------------------------------------------------------------
// Primitive wrappers
// -------------------------------------------------------------------------

/// Wrapper class of each primitive type, with the accessor name
pub(crate) const WRAPPERS: [(&str, &str, &str); 8] = [
    ("std.Boolean", ClassId::BOOLEAN, "booleanValue"),
    ("std.Byte", ClassId::BYTE, "byteValue"),
    ("std.Short", ClassId::SHORT, "shortValue"),
    ("std.Character", ClassId::CHAR, "charValue"),
    ("std.Integer", ClassId::INT, "intValue"),
    ("std.Long", ClassId::LONG, "longValue"),
    ("std.Float", ClassId::FLOAT, "floatValue"),
    ("std.Double", ClassId::DOUBLE, "doubleValue"),
];

fn wrappers() -> Vec<ClassDef> {
    WRAPPERS
        .iter()
        .map(|&(wrapper, primitive, accessor)| {
            ClassDef::class(wrapper)
                .with_layout(|| ObjectKind::Boxed(PrimitiveValue::Int(0)))
                .with_method(static_method("valueOf", &[primitive], wrapper).with_body(
                    move |f, _, args| match args.first() {
                        Some(Value::Prim(p)) => Ok(f.alloc_builtin(wrapper, ObjectKind::Boxed(p.clone()))),
                        other => Err(f.throw("std.ClassCastException", format!("cannot box {other:?}"))),
                    },
                ))
                .with_method(method(accessor, &[], primitive).with_body(|f, this, _| {
                    let id = f.receiver(this)?;
                    match f.kind(id)? {
                        ObjectKind::Boxed(p) => Ok(Value::Prim(p.clone())),
                        _ => Err(f.throw("std.ClassCastException", "not a boxed value")),
                    }
                }))
        })
        .collect()
}

// -------------------------------------------------------------------------
// Collections
// -------------------------------------------------------------------------

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Null)
}

fn list_items<'f>(f: &'f mut Frame<'_>, id: ObjectId) -> Result<&'f mut Vec<Value>, Unwind> {
    match f.kind_mut(id)? {
        ObjectKind::List(items) | ObjectKind::Set(items) => Ok(items),
        _ => Err(Unwind::Host(crate::result::ExecError::heap(format!(
            "{id} is not a collection"
        )))),
    }
}

fn array_list() -> ClassDef {
    ClassDef::class("std.ArrayList")
        .with_layout(|| ObjectKind::List(Vec::new()))
        .with_method(constructor(&[]).with_body(|_, _, _| Ok(Value::Void)))
        .with_method(method("add", &[OBJECT], ClassId::BOOLEAN).with_body(|f, this, args| {
            let id = f.receiver(this)?;
            list_items(f, id)?.push(arg(args, 0));
            Ok(Value::boolean(true))
        }))
        .with_method(method("get", &[ClassId::INT], OBJECT).with_body(|f, this, args| {
            let id = f.receiver(this)?;
            let index = f.int(&arg(args, 0))?;
            let item = usize::try_from(index)
                .ok()
                .and_then(|i| list_items(f, id).ok()?.get(i).cloned());
            item.ok_or_else(|| f.throw("std.IndexOutOfBoundsException", index.to_string()))
        }))
        .with_method(method("size", &[], ClassId::INT).with_body(|f, this, _| {
            let id = f.receiver(this)?;
            Ok(Value::int(list_items(f, id)?.len() as i32))
        }))
}

fn linked_hash_set() -> ClassDef {
    ClassDef::class("std.LinkedHashSet")
        .with_layout(|| ObjectKind::Set(Vec::new()))
        .with_method(constructor(&[]).with_body(|_, _, _| Ok(Value::Void)))
        .with_method(method("add", &[OBJECT], ClassId::BOOLEAN).with_body(|f, this, args| {
            let id = f.receiver(this)?;
            let item = arg(args, 0);
            let items = list_items(f, id)?.clone();
            let present = items.iter().any(|v| f.values_equal(v, &item));
            if !present {
                list_items(f, id)?.push(item);
            }
            Ok(Value::boolean(!present))
        }))
        .with_method(method("contains", &[OBJECT], ClassId::BOOLEAN).with_body(|f, this, args| {
            let id = f.receiver(this)?;
            let item = arg(args, 0);
            let items = list_items(f, id)?.clone();
            Ok(Value::boolean(items.iter().any(|v| f.values_equal(v, &item))))
        }))
        .with_method(method("size", &[], ClassId::INT).with_body(|f, this, _| {
            let id = f.receiver(this)?;
            Ok(Value::int(list_items(f, id)?.len() as i32))
        }))
}

fn map_entries(f: &mut Frame<'_>, id: ObjectId) -> Result<Vec<(Value, Value)>, Unwind> {
    match f.kind(id)? {
        ObjectKind::Map(entries) => Ok(entries.clone()),
        _ => Err(f.throw("std.ClassCastException", "not a map")),
    }
}

fn linked_hash_map() -> ClassDef {
    ClassDef::class("std.LinkedHashMap")
        .with_layout(|| ObjectKind::Map(Vec::new()))
        .with_method(constructor(&[]).with_body(|_, _, _| Ok(Value::Void)))
        .with_method(method("put", &[OBJECT, OBJECT], OBJECT).with_body(|f, this, args| {
            let id = f.receiver(this)?;
            let (key, value) = (arg(args, 0), arg(args, 1));
            let mut entries = map_entries(f, id)?;
            let previous = match entries.iter().position(|(k, _)| f.values_equal(k, &key)) {
                Some(index) => std::mem::replace(&mut entries[index].1, value),
                None => {
                    entries.push((key, value));
                    Value::Null
                }
            };
            *f.kind_mut(id)? = ObjectKind::Map(entries);
            Ok(previous)
        }))
        .with_method(method("get", &[OBJECT], OBJECT).with_body(|f, this, args| {
            let id = f.receiver(this)?;
            let key = arg(args, 0);
            let entries = map_entries(f, id)?;
            Ok(entries
                .into_iter()
                .find(|(k, _)| f.values_equal(k, &key))
                .map_or(Value::Null, |(_, v)| v))
        }))
        .with_method(method("size", &[], ClassId::INT).with_body(|f, this, _| {
            let id = f.receiver(this)?;
            Ok(Value::int(map_entries(f, id)?.len() as i32))
        }))
}

fn optional() -> ClassDef {
    ClassDef::class("std.Optional")
        .with_layout(|| ObjectKind::Optional(None))
        .with_method(static_method("of", &[OBJECT], "std.Optional").with_body(|f, _, args| {
            let value = arg(args, 0);
            if value.is_null() {
                return Err(f.throw("std.NullPointerException", "Optional.of(null)"));
            }
            Ok(f.alloc_builtin("std.Optional", ObjectKind::Optional(Some(value))))
        }))
        .with_method(static_method("empty", &[], "std.Optional").with_body(|f, _, _| {
            Ok(f.alloc_builtin("std.Optional", ObjectKind::Optional(None)))
        }))
        .with_method(method("isPresent", &[], ClassId::BOOLEAN).with_body(|f, this, _| {
            let id = f.receiver(this)?;
            Ok(Value::boolean(matches!(f.kind(id)?, ObjectKind::Optional(Some(_)))))
        }))
        .with_method(method("get", &[], OBJECT).with_body(|f, this, _| {
            let id = f.receiver(this)?;
            let value = match f.kind(id)? {
                ObjectKind::Optional(value) => value.clone(),
                _ => None,
            };
            value.ok_or_else(|| f.throw("std.NoSuchElementException", "No value present"))
        }))
}

// -------------------------------------------------------------------------
// Value types
// -------------------------------------------------------------------------

fn uuid() -> ClassDef {
    ClassDef::class("std.Uuid")
        .with_layout(|| ObjectKind::Uuid { most: 0, least: 0 })
        .with_method(
            static_method("fromBits", &[ClassId::LONG, ClassId::LONG], "std.Uuid").with_body(|f, _, args| {
                let most = f.long(&arg(args, 0))?;
                let least = f.long(&arg(args, 1))?;
                Ok(f.alloc_builtin("std.Uuid", ObjectKind::Uuid { most, least }))
            }),
        )
}

fn instant() -> ClassDef {
    ClassDef::class("std.Instant")
        .with_layout(|| ObjectKind::Instant { seconds: 0, nanos: 0 })
        .with_method(
            static_method("ofEpochSecond", &[ClassId::LONG, ClassId::LONG], "std.Instant").with_body(
                |f, _, args| {
                    let seconds = f.long(&arg(args, 0))?;
                    let nanos = f.long(&arg(args, 1))?;
                    let (seconds, nanos) = normalize(seconds, nanos);
                    Ok(f.alloc_builtin("std.Instant", ObjectKind::Instant { seconds, nanos }))
                },
            ),
        )
        .with_method(method("getEpochSecond", &[], ClassId::LONG).with_body(|f, this, _| {
            let id = f.receiver(this)?;
            match f.kind(id)? {
                ObjectKind::Instant { seconds, .. } => Ok(Value::long(*seconds)),
                _ => Err(f.throw("std.ClassCastException", "not an instant")),
            }
        }))
}

fn duration() -> ClassDef {
    ClassDef::class("std.Duration")
        .with_layout(|| ObjectKind::Duration { seconds: 0, nanos: 0 })
        .with_method(
            static_method("ofSeconds", &[ClassId::LONG, ClassId::LONG], "std.Duration").with_body(
                |f, _, args| {
                    let seconds = f.long(&arg(args, 0))?;
                    let nanos = f.long(&arg(args, 1))?;
                    let (seconds, nanos) = normalize(seconds, nanos);
                    Ok(f.alloc_builtin("std.Duration", ObjectKind::Duration { seconds, nanos }))
                },
            ),
        )
}

/// Carry whole seconds out of the nanosecond adjustment
fn normalize(seconds: i64, nanos: i64) -> (i64, i64) {
    const NANOS_PER_SECOND: i64 = 1_000_000_000;
    (
        seconds.saturating_add(nanos.div_euclid(NANOS_PER_SECOND)),
        nanos.rem_euclid(NANOS_PER_SECOND),
    )
}

fn days_in_month(year: i32, month: i32) -> i32 {
    match month {
        4 | 6 | 9 | 11 => 30,
        2 if (year % 4 == 0 && year % 100 != 0) || year % 400 == 0 => 29,
        2 => 28,
        _ => 31,
    }
}

fn local_date() -> ClassDef {
    ClassDef::class("std.LocalDate")
        .with_layout(|| ObjectKind::LocalDate {
            year: 1970,
            month: 1,
            day: 1,
        })
        .with_method(
            static_method("of", &[ClassId::INT, ClassId::INT, ClassId::INT], "std.LocalDate").with_body(
                |f, _, args| {
                    let year = f.int(&arg(args, 0))?;
                    let month = f.int(&arg(args, 1))?;
                    let day = f.int(&arg(args, 2))?;
                    if !(1..=12).contains(&month) || day < 1 || day > days_in_month(year, month) {
                        return Err(f.throw(
                            "std.DateTimeException",
                            format!("invalid date {year}-{month:02}-{day:02}"),
                        ));
                    }
                    Ok(f.alloc_builtin("std.LocalDate", ObjectKind::LocalDate { year, month, day }))
                },
            ),
        )
}

fn locale() -> ClassDef {
    ClassDef::class("std.Locale")
        .with_layout(|| ObjectKind::Locale(String::new()))
        .with_method(
            static_method("forLanguageTag", &[STRING], "std.Locale").with_body(|f, _, args| {
                let tag = f.string(&arg(args, 0))?;
                Ok(f.alloc_builtin("std.Locale", ObjectKind::Locale(tag)))
            }),
        )
        .with_method(method("toLanguageTag", &[], STRING).with_body(|f, this, _| {
            let id = f.receiver(this)?;
            match f.kind(id)? {
                ObjectKind::Locale(tag) => Ok(Value::string(tag.clone())),
                _ => Err(f.throw("std.ClassCastException", "not a locale")),
            }
        }))
}

// -------------------------------------------------------------------------
// Streams, proxies and I/O
// -------------------------------------------------------------------------

/// Take the items of a stream, marking it consumed
fn consume_stream(f: &mut Frame<'_>, this: Option<Value>) -> Result<Vec<Value>, Unwind> {
    let id = f.receiver(this)?;
    let taken = match f.kind_mut(id)? {
        ObjectKind::Stream { consumed: true, .. } => None,
        ObjectKind::Stream { items, consumed } => {
            *consumed = true;
            Some(std::mem::take(items))
        }
        _ => return Err(f.throw("std.ClassCastException", "not a stream")),
    };
    taken.ok_or_else(|| {
        f.throw(
            "std.IllegalStateException",
            "stream has already been operated upon or closed",
        )
    })
}

fn stream() -> ClassDef {
    ClassDef::class("std.Stream")
        .with_layout(|| ObjectKind::Stream {
            items: Vec::new(),
            consumed: false,
        })
        .with_method(static_method("of", &["std.Object[]"], "std.Stream").with_body(|f, _, args| {
            let array = arg(args, 0);
            let length = f.array_len(&array)?;
            let mut items = Vec::with_capacity(length as usize);
            for index in 0..length {
                items.push(f.array_get(&array, index)?);
            }
            Ok(f.alloc_builtin(
                "std.Stream",
                ObjectKind::Stream {
                    items,
                    consumed: false,
                },
            ))
        }))
        .with_method(method("count", &[], ClassId::LONG).with_body(|f, this, _| {
            Ok(Value::long(consume_stream(f, this)?.len() as i64))
        }))
        .with_method(method("toList", &[], "std.ArrayList").with_body(|f, this, _| {
            let items = consume_stream(f, this)?;
            Ok(f.alloc_builtin("std.ArrayList", ObjectKind::List(items)))
        }))
}

fn invocation_handler() -> ClassDef {
    ClassDef::interface("std.InvocationHandler").with_method(method(
        "invoke",
        &[OBJECT, STRING, "std.Object[]"],
        OBJECT,
    ))
}

fn proxy() -> ClassDef {
    ClassDef::class("std.Proxy").with_method(
        static_method(
            "newProxyInstance",
            &["std.Class[]", "std.InvocationHandler"],
            OBJECT,
        )
        .with_body(|f, _, args| {
            let array = arg(args, 0);
            let handler = arg(args, 1);
            if handler.is_null() {
                return Err(f.throw("std.NullPointerException", "invocation handler is null"));
            }
            let length = f.array_len(&array)?;
            let mut interfaces = Vec::with_capacity(length as usize);
            for index in 0..length {
                let class = f.array_get(&array, index)?;
                let target = match class.object().map(|id| f.kind(id)).transpose()? {
                    Some(ObjectKind::ClassRef { target }) => target.clone(),
                    _ => return Err(f.throw("std.IllegalArgumentException", "not a class reference")),
                };
                interfaces.push(target);
            }
            Ok(Value::Ref(f.machine().new_proxy(interfaces, handler)?))
        }),
    )
}

fn files() -> ClassDef {
    ClassDef::class("std.Files")
        .with_method(static_method("readString", &[STRING], STRING).with_body(|f, _, args| {
            f.check(Permission::FileRead)?;
            let path = f.string(&arg(args, 0))?;
            std::fs::read_to_string(&path)
                .map(Value::string)
                .map_err(|err| f.throw("std.IOException", format!("{path}: {err}")))
        }))
        .with_method(
            static_method("writeString", &[STRING, STRING], ClassId::VOID).with_body(|f, _, args| {
                f.check(Permission::FileWrite)?;
                let path = f.string(&arg(args, 0))?;
                let contents = f.string(&arg(args, 1))?;
                std::fs::write(&path, contents)
                    .map(|()| Value::Void)
                    .map_err(|err| f.throw("std.IOException", format!("{path}: {err}")))
            }),
        )
}

fn system() -> ClassDef {
    ClassDef::class("std.System").with_method(
        static_method("exit", &[ClassId::INT], ClassId::VOID).with_body(|f, _, args| {
            f.check(Permission::ProcessExit)?;
            let code = f.int(&arg(args, 0))?;
            std::process::exit(code)
        }),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::runtime::{Machine, ProgramCatalog};
    use std::sync::Arc;

    fn machine() -> Machine {
        Machine::new(Arc::new(ProgramCatalog::new()))
    }

    fn new_list(m: &mut Machine) -> Value {
        m.instantiate(&ClassId::new("std.ArrayList"), None, &[], None).unwrap()
    }

    #[test]
    fn test_builtin_names_are_unique() {
        let all = classes();
        let mut names: Vec<_> = all.iter().map(|c| c.name.clone()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), all.len());
        assert!(all.iter().all(|c| c.name.is_std()));
    }

    #[test]
    fn test_array_list_add_get_size() {
        let mut m = machine();
        let list = new_list(&mut m);
        m.call_virtual(&list, "add", &[Value::int(4)]).unwrap();
        m.call_virtual(&list, "add", &[Value::string("x")]).unwrap();
        assert_eq!(m.call_virtual(&list, "size", &[]).unwrap(), Value::int(2));
        assert_eq!(m.call_virtual(&list, "get", &[Value::int(1)]).unwrap(), Value::string("x"));
        assert!(matches!(
            m.call_virtual(&list, "get", &[Value::int(9)]),
            Err(Unwind::Exception(_))
        ));
    }

    #[test]
    fn test_set_deduplicates_boxed_values() {
        let mut m = machine();
        let set = m
            .instantiate(&ClassId::new("std.LinkedHashSet"), None, &[], None)
            .unwrap();
        let integer = ClassId::new("std.Integer");
        let a = m.call_static(&integer, "valueOf", &[Value::int(1)]).unwrap();
        let b = m.call_static(&integer, "valueOf", &[Value::int(1)]).unwrap();
        assert_ne!(a, b);
        assert_eq!(m.call_virtual(&set, "add", &[a]).unwrap(), Value::boolean(true));
        assert_eq!(m.call_virtual(&set, "add", &[b]).unwrap(), Value::boolean(false));
    }

    #[test]
    fn test_map_put_replaces() {
        let mut m = machine();
        let map = m
            .instantiate(&ClassId::new("std.LinkedHashMap"), None, &[], None)
            .unwrap();
        let k = Value::string("k");
        assert_eq!(m.call_virtual(&map, "put", &[k.clone(), Value::int(1)]).unwrap(), Value::Null);
        assert_eq!(m.call_virtual(&map, "put", &[k.clone(), Value::int(2)]).unwrap(), Value::int(1));
        assert_eq!(m.call_virtual(&map, "get", &[k]).unwrap(), Value::int(2));
    }

    #[test]
    fn test_local_date_validation() {
        let mut m = machine();
        let class = ClassId::new("std.LocalDate");
        assert!(m
            .call_static(&class, "of", &[Value::int(2024), Value::int(2), Value::int(29)])
            .is_ok());
        assert!(matches!(
            m.call_static(&class, "of", &[Value::int(2023), Value::int(2), Value::int(29)]),
            Err(Unwind::Exception(_))
        ));
    }

    #[test]
    fn test_stream_consumed_once() {
        let mut m = machine();
        let array = m.new_array(&ClassId::new(OBJECT), 2).unwrap();
        let stream = m
            .call_static(&ClassId::new("std.Stream"), "of", &[Value::Ref(array)])
            .unwrap();
        assert_eq!(m.call_virtual(&stream, "count", &[]).unwrap(), Value::long(2));
        let Err(Unwind::Exception(thrown)) = m.call_virtual(&stream, "count", &[]) else {
            panic!("second consumption must throw");
        };
        assert_eq!(m.describe_exception(thrown).class_id.name(), "std.IllegalStateException");
    }

    #[test]
    fn test_files_denied_by_default() {
        let mut m = machine();
        let result = m.call_static(&ClassId::new("std.Files"), "readString", &[Value::string("/etc/hosts")]);
        assert!(matches!(result, Err(Unwind::Sandbox(_))));
    }

    #[test]
    fn test_files_read_when_permitted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.txt");
        std::fs::write(&path, "hello").unwrap();

        let mut m = machine();
        m.set_policy(crate::runtime::SandboxPolicy::permissive());
        let result = m
            .call_static(
                &ClassId::new("std.Files"),
                "readString",
                &[Value::string(path.to_string_lossy())],
            )
            .unwrap();
        assert_eq!(result, Value::string("hello"));
    }

    #[test]
    fn test_exception_message() {
        let mut m = machine();
        let error = m
            .instantiate(
                &ClassId::new("std.IllegalArgumentException"),
                None,
                &[Value::string("bad")],
                None,
            )
            .unwrap();
        assert_eq!(m.call_virtual(&error, "getMessage", &[]).unwrap(), Value::string("bad"));
        assert!(m.is_assignable(
            &ClassId::new("std.IllegalArgumentException"),
            &ClassId::new(THROWABLE)
        ));
    }
}
