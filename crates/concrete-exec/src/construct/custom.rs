//! Pluggable constructors describing well-known types as recipes.
//!
//! A custom constructor answers in two steps. First the instantiation call;
//! the model constructor then registers a provisional assemble model so
//! that self-references inside the object resolve to it, and only then asks
//! for the modification chain.

use super::model::ModelConstructor;
use crate::model::{
    ArrayModel, ClassId, ConstructorRef, ExecutableCall, MethodRef, Model, PrimitiveValue,
    StatementModel,
};
use crate::result::{ExecError, ExecResult};
use crate::runtime::{ObjectId, ObjectKind, PROXY_CLASS_PREFIX, WRAPPERS};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// A live object handed to a custom constructor
#[derive(Debug, Clone, Copy)]
pub struct ObjectView<'h> {
    /// The object itself
    pub id: ObjectId,
    /// Its runtime class
    pub class: &'h ClassId,
    /// Its storage layout
    pub kind: &'h ObjectKind,
    /// Depth budget left for nested values
    pub depth: u32,
}

impl ObjectView<'_> {
    /// Depth budget for values nested in this object
    #[must_use]
    pub const fn nested_depth(&self) -> u32 {
        self.depth.saturating_sub(1)
    }
}

/// Describes objects of one type as an instantiation call plus
/// modification statements
pub trait CustomModelConstructor: Send + Sync {
    /// Name shown for the assembled value
    fn display_name(&self, class: &ClassId) -> String {
        let name = class.name();
        name.rsplit('.').next().unwrap_or(name).to_string()
    }

    /// Call that creates the object
    fn instantiation(
        &self,
        ctx: &mut ModelConstructor<'_>,
        object: &ObjectView<'_>,
    ) -> ExecResult<ExecutableCall>;

    /// Statements applied to the created object, in order.
    ///
    /// `this` stands for the object under construction.
    fn modifications(
        &self,
        _ctx: &mut ModelConstructor<'_>,
        _this: &Model,
        _object: &ObjectView<'_>,
    ) -> ExecResult<Vec<StatementModel>> {
        Ok(Vec::new())
    }
}

/// Custom constructors by class
#[derive(Clone)]
pub struct CustomConstructors {
    by_class: HashMap<ClassId, Arc<dyn CustomModelConstructor>>,
    proxy: Option<Arc<dyn CustomModelConstructor>>,
}

impl fmt::Debug for CustomConstructors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut classes: Vec<&str> = self.by_class.keys().map(ClassId::name).collect();
        classes.sort_unstable();
        f.debug_struct("CustomConstructors")
            .field("classes", &classes)
            .field("proxy", &self.proxy.is_some())
            .finish()
    }
}

impl Default for CustomConstructors {
    fn default() -> Self {
        let mut registry = Self::empty();
        for (wrapper, primitive, _) in WRAPPERS {
            registry = registry.register(wrapper, BoxedConstructor::new(wrapper, primitive));
        }
        registry
            .register("std.ArrayList", CollectionConstructor::new("std.ArrayList"))
            .register("std.LinkedHashSet", CollectionConstructor::new("std.LinkedHashSet"))
            .register("std.LinkedHashMap", MapConstructor)
            .register("std.Optional", OptionalConstructor)
            .register("std.Uuid", FactoryConstructor::Uuid)
            .register("std.Instant", FactoryConstructor::Instant)
            .register("std.Duration", FactoryConstructor::Duration)
            .register("std.LocalDate", FactoryConstructor::LocalDate)
            .register("std.Locale", FactoryConstructor::Locale)
            .register("std.Stream", StreamConstructor)
            .with_proxy(ProxyConstructor)
    }
}

impl CustomConstructors {
    /// Registry without any constructor
    #[must_use]
    pub fn empty() -> Self {
        Self {
            by_class: HashMap::new(),
            proxy: None,
        }
    }

    /// Register a constructor for a class
    #[must_use]
    pub fn register(
        mut self,
        class: impl Into<ClassId>,
        constructor: impl CustomModelConstructor + 'static,
    ) -> Self {
        self.by_class.insert(class.into(), Arc::new(constructor));
        self
    }

    /// Register the constructor used for dynamic proxy classes
    #[must_use]
    pub fn with_proxy(mut self, constructor: impl CustomModelConstructor + 'static) -> Self {
        self.proxy = Some(Arc::new(constructor));
        self
    }

    /// Constructor responsible for `class`
    #[must_use]
    pub fn find(&self, class: &ClassId) -> Option<Arc<dyn CustomModelConstructor>> {
        if let Some(found) = self.by_class.get(class) {
            return Some(Arc::clone(found));
        }
        if class.name().starts_with(PROXY_CLASS_PREFIX) {
            return self.proxy.clone();
        }
        None
    }
}

fn any_object() -> ClassId {
    ClassId::new(ClassId::OBJECT)
}

fn mismatch(object: &ObjectView<'_>) -> ExecError {
    ExecError::construction(format!(
        "unexpected layout for {} {}",
        object.class, object.id
    ))
}

fn primitive(value: PrimitiveValue) -> Model {
    Model::Primitive(value)
}

/// `Wrapper.valueOf(p)`
#[derive(Debug)]
struct BoxedConstructor {
    wrapper: ClassId,
    primitive: ClassId,
}

impl BoxedConstructor {
    fn new(wrapper: &str, primitive: &str) -> Self {
        Self {
            wrapper: ClassId::new(wrapper),
            primitive: ClassId::new(primitive),
        }
    }
}

impl CustomModelConstructor for BoxedConstructor {
    fn instantiation(
        &self,
        _ctx: &mut ModelConstructor<'_>,
        object: &ObjectView<'_>,
    ) -> ExecResult<ExecutableCall> {
        let ObjectKind::Boxed(value) = object.kind else {
            return Err(mismatch(object));
        };
        let method = MethodRef::new(
            self.wrapper.clone(),
            "valueOf",
            vec![self.primitive.clone()],
            self.wrapper.clone(),
        );
        Ok(ExecutableCall::new(method, vec![primitive(value.clone())]))
    }
}

/// `new C()` followed by `add(e)` per element
#[derive(Debug)]
struct CollectionConstructor {
    class: ClassId,
}

impl CollectionConstructor {
    fn new(class: &str) -> Self {
        Self {
            class: ClassId::new(class),
        }
    }
}

impl CustomModelConstructor for CollectionConstructor {
    fn instantiation(
        &self,
        _ctx: &mut ModelConstructor<'_>,
        _object: &ObjectView<'_>,
    ) -> ExecResult<ExecutableCall> {
        Ok(ExecutableCall::new(ConstructorRef::new(self.class.clone(), vec![]), vec![]))
    }

    fn modifications(
        &self,
        ctx: &mut ModelConstructor<'_>,
        this: &Model,
        object: &ObjectView<'_>,
    ) -> ExecResult<Vec<StatementModel>> {
        let (ObjectKind::List(items) | ObjectKind::Set(items)) = object.kind else {
            return Err(mismatch(object));
        };
        let add = MethodRef::new(
            self.class.clone(),
            "add",
            vec![any_object()],
            ClassId::BOOLEAN,
        );
        items
            .iter()
            .map(|item| {
                let element = ctx.construct(item, &any_object(), object.nested_depth())?;
                Ok(ExecutableCall::on(this.clone(), add.clone(), vec![element]).into())
            })
            .collect()
    }
}

/// `new LinkedHashMap()` followed by `put(k, v)` per entry
#[derive(Debug)]
struct MapConstructor;

impl CustomModelConstructor for MapConstructor {
    fn instantiation(
        &self,
        _ctx: &mut ModelConstructor<'_>,
        object: &ObjectView<'_>,
    ) -> ExecResult<ExecutableCall> {
        Ok(ExecutableCall::new(
            ConstructorRef::new(object.class.clone(), vec![]),
            vec![],
        ))
    }

    fn modifications(
        &self,
        ctx: &mut ModelConstructor<'_>,
        this: &Model,
        object: &ObjectView<'_>,
    ) -> ExecResult<Vec<StatementModel>> {
        let ObjectKind::Map(entries) = object.kind else {
            return Err(mismatch(object));
        };
        let put = MethodRef::new(object.class.clone(), "put", vec![any_object(), any_object()], any_object());
        entries
            .iter()
            .map(|(key, value)| {
                let key = ctx.construct(key, &any_object(), object.nested_depth())?;
                let value = ctx.construct(value, &any_object(), object.nested_depth())?;
                Ok(ExecutableCall::on(this.clone(), put.clone(), vec![key, value]).into())
            })
            .collect()
    }
}

/// `Optional.of(v)` or `Optional.empty()`
#[derive(Debug)]
struct OptionalConstructor;

impl CustomModelConstructor for OptionalConstructor {
    fn instantiation(
        &self,
        ctx: &mut ModelConstructor<'_>,
        object: &ObjectView<'_>,
    ) -> ExecResult<ExecutableCall> {
        let ObjectKind::Optional(value) = object.kind else {
            return Err(mismatch(object));
        };
        Ok(match value {
            Some(value) => ExecutableCall::new(
                MethodRef::new(object.class.clone(), "of", vec![any_object()], object.class.clone()),
                vec![ctx.construct(value, &any_object(), object.nested_depth())?],
            ),
            None => ExecutableCall::new(
                MethodRef::new(object.class.clone(), "empty", vec![], object.class.clone()),
                vec![],
            ),
        })
    }
}

/// Static factories of the scalar value types
#[derive(Debug, Clone, Copy)]
enum FactoryConstructor {
    Uuid,
    Instant,
    Duration,
    LocalDate,
    Locale,
}

impl CustomModelConstructor for FactoryConstructor {
    fn instantiation(
        &self,
        _ctx: &mut ModelConstructor<'_>,
        object: &ObjectView<'_>,
    ) -> ExecResult<ExecutableCall> {
        use PrimitiveValue::{Int, Long, Str};

        let (name, args) = match (self, object.kind) {
            (Self::Uuid, ObjectKind::Uuid { most, least }) => ("fromBits", vec![Long(*most), Long(*least)]),
            (Self::Instant, ObjectKind::Instant { seconds, nanos }) => {
                ("ofEpochSecond", vec![Long(*seconds), Long(*nanos)])
            }
            (Self::Duration, ObjectKind::Duration { seconds, nanos }) => {
                ("ofSeconds", vec![Long(*seconds), Long(*nanos)])
            }
            (Self::LocalDate, ObjectKind::LocalDate { year, month, day }) => {
                ("of", vec![Int(*year), Int(*month), Int(*day)])
            }
            (Self::Locale, ObjectKind::Locale(tag)) => ("forLanguageTag", vec![Str(tag.clone())]),
            _ => return Err(mismatch(object)),
        };
        let params = args.iter().map(PrimitiveValue::class_id).collect();
        let method = MethodRef::new(object.class.clone(), name, params, object.class.clone());
        Ok(ExecutableCall::new(method, args.into_iter().map(primitive).collect()))
    }
}

/// Synthetic `Object[]` model holding `items`
fn object_array(ctx: &mut ModelConstructor<'_>, items: Vec<Model>) -> Model {
    let element = any_object();
    let length = items.len();
    let overrides: BTreeMap<usize, Model> = items
        .into_iter()
        .enumerate()
        .filter(|(_, item)| !item.is_null())
        .collect();
    Model::Array(ArrayModel {
        id: Some(ctx.fresh_handle()),
        class_id: element.array_of(),
        length,
        default_fill: Box::new(Model::Null(element)),
        overrides,
    })
}

/// `Stream.of(items)`; a consumed stream cannot be described
#[derive(Debug)]
struct StreamConstructor;

impl CustomModelConstructor for StreamConstructor {
    fn instantiation(
        &self,
        ctx: &mut ModelConstructor<'_>,
        object: &ObjectView<'_>,
    ) -> ExecResult<ExecutableCall> {
        let ObjectKind::Stream { items, consumed } = object.kind else {
            return Err(mismatch(object));
        };
        if *consumed {
            return Err(ExecError::StreamConsumed {
                class: object.class.name().to_string(),
            });
        }
        let models = items
            .iter()
            .map(|item| ctx.construct(item, &any_object(), object.nested_depth()))
            .collect::<ExecResult<Vec<_>>>()?;
        let array = object_array(ctx, models);
        let method = MethodRef::new(
            object.class.clone(),
            "of",
            vec![any_object().array_of()],
            object.class.clone(),
        );
        Ok(ExecutableCall::new(method, vec![array]))
    }
}

/// `Proxy.newProxyInstance(interfaces, handler)`, arguments built at depth 0
#[derive(Debug)]
struct ProxyConstructor;

impl CustomModelConstructor for ProxyConstructor {
    fn display_name(&self, _class: &ClassId) -> String {
        "Proxy".to_string()
    }

    fn instantiation(
        &self,
        ctx: &mut ModelConstructor<'_>,
        object: &ObjectView<'_>,
    ) -> ExecResult<ExecutableCall> {
        let ObjectKind::Proxy { interfaces, handler } = object.kind else {
            return Err(mismatch(object));
        };
        let class = ClassId::new(ClassId::CLASS);
        let overrides = interfaces
            .iter()
            .enumerate()
            .map(|(index, interface)| Ok((index, ctx.class_ref(interface)?)))
            .collect::<ExecResult<BTreeMap<usize, Model>>>()?;
        let interfaces = Model::Array(ArrayModel {
            id: Some(ctx.fresh_handle()),
            class_id: class.array_of(),
            length: overrides.len(),
            default_fill: Box::new(Model::Null(class.clone())),
            overrides,
        });
        let handler = ctx.construct(handler, &ClassId::new("std.InvocationHandler"), 0)?;
        let method = MethodRef::new(
            "std.Proxy",
            "newProxyInstance",
            vec![class.array_of(), ClassId::new("std.InvocationHandler")],
            any_object(),
        );
        Ok(ExecutableCall::new(method, vec![interfaces, handler]))
    }
}
