//! Proptest strategies for value models.
//!
//! Generated models are well-formed: handles are unique within one model
//! and arrays only override indices below their length.
//!
//! ```rust,ignore
//! proptest! {
//!     #[test]
//!     fn prop_bridge_keeps_ints(model in int_array_model(16)) {
//!         let value = ctor.construct(&model)?;
//!         prop_assert_eq!(model_of(&value), model);
//!     }
//! }
//! ```

use super::ids::{ClassId, FieldRef, Handle};
use super::value::{ArrayModel, CompositeModel, Model, PrimitiveValue};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Any primitive value, strings included
pub fn any_primitive() -> impl Strategy<Value = PrimitiveValue> {
    prop_oneof![
        any::<bool>().prop_map(PrimitiveValue::Bool),
        any::<i8>().prop_map(PrimitiveValue::Byte),
        any::<i16>().prop_map(PrimitiveValue::Short),
        any::<char>().prop_map(PrimitiveValue::Char),
        any::<i32>().prop_map(PrimitiveValue::Int),
        any::<i64>().prop_map(PrimitiveValue::Long),
        // NaN breaks model equality
        (-1.0e6f32..1.0e6).prop_map(PrimitiveValue::Float),
        (-1.0e12f64..1.0e12).prop_map(PrimitiveValue::Double),
        "[a-zA-Z0-9 ]{0,24}".prop_map(PrimitiveValue::Str),
    ]
}

/// Sparse `int[]` of at most `max_len` elements
pub fn int_array_model(max_len: usize) -> impl Strategy<Value = Model> {
    (0..=max_len, any::<i32>(), 1u32..1000)
        .prop_flat_map(|(length, fill, handle)| {
            let overrides = if length == 0 {
                Just(BTreeMap::new()).boxed()
            } else {
                proptest::collection::btree_map(0..length, any::<i32>(), 0..=length).boxed()
            };
            (Just(length), Just(fill), Just(handle), overrides)
        })
        .prop_map(|(length, fill, handle, overrides)| {
            Model::Array(ArrayModel {
                id: Some(Handle::new(handle)),
                class_id: ClassId::new(ClassId::INT).array_of(),
                length,
                default_fill: Box::new(Model::int(fill)),
                overrides: overrides
                    .into_iter()
                    .map(|(index, value)| (index, Model::int(value)))
                    .collect(),
            })
        })
}

/// Composite of `class` whose fields, drawn from `fields`, hold primitives
pub fn primitive_composite(class: &'static str, fields: &'static [&'static str]) -> impl Strategy<Value = Model> {
    (1u32..1000, proptest::collection::vec(any_primitive(), fields.len())).prop_map(move |(handle, values)| {
        let composite = fields.iter().zip(values).fold(
            CompositeModel::new(Some(Handle::new(handle)), ClassId::new(class)),
            |composite, (field, value)| composite.with_field(FieldRef::new(class, *field), value.into()),
        );
        Model::Composite(composite)
    })
}

/// Chain of composites linked through `link`, each with a distinct handle
/// starting at 1; the tail links to null
pub fn linked_chain(class: &'static str, link: &'static str, max_len: usize) -> impl Strategy<Value = Model> {
    (1..=max_len.max(1)).prop_map(move |len| {
        let mut next = Model::null(class);
        for handle in (1..=len as u32).rev() {
            next = Model::Composite(
                CompositeModel::new(Some(Handle::new(handle)), ClassId::new(class))
                    .with_field(FieldRef::new(class, link), next),
            );
        }
        next
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn prop_array_overrides_stay_in_bounds(model in int_array_model(32)) {
            let Model::Array(array) = &model else {
                return Err(TestCaseError::fail("not an array"));
            };
            prop_assert!(array.overrides.keys().all(|index| *index < array.length));
            prop_assert_eq!(array.default_count() + array.overrides.len(), array.length);
            prop_assert!(array.element(array.length).is_none());
        }

        #[test]
        fn prop_chain_handles_are_unique(model in linked_chain("samples.Node", "next", 12)) {
            let mut seen = Vec::new();
            model.walk(&mut |m| seen.extend(m.id()));
            let count = seen.len();
            seen.sort();
            seen.dedup();
            prop_assert_eq!(seen.len(), count);
            prop_assert_eq!(model.max_handle(), Some(Handle::new(count as u32)));
        }

        #[test]
        fn prop_composite_round_trips_through_bincode(model in primitive_composite("samples.Pair", &["first", "second"])) {
            let bytes = bincode::serialize(&model).unwrap();
            let back: Model = bincode::deserialize(&bytes).unwrap();
            prop_assert_eq!(back, model);
        }
    }
}
