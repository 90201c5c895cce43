//! Proptest generators for property-based testing.

use proptest::prelude::*;

use converge_core::{FieldValue, LwwMap};

/// Generate a reasonable write timestamp.
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=i64::MAX / 2
}

/// Generate a field value across every variant.
pub fn field_value() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        Just(FieldValue::Tombstone),
        any::<bool>().prop_map(FieldValue::Bool),
        any::<i64>().prop_map(FieldValue::Int),
        "[a-z]{0,16}".prop_map(FieldValue::Text),
        prop::collection::vec(any::<u8>(), 0..=32).prop_map(FieldValue::Bytes),
    ]
}

/// Generate a register field key, possibly nested like `contact/x/name`.
pub fn field_key() -> impl Strategy<Value = String> {
    "[a-z]{1,8}(/[a-z]{1,8}){0,2}".prop_map(String::from)
}

/// Generate a batch of register writes.
pub fn write_ops(max: usize) -> impl Strategy<Value = Vec<(String, FieldValue, i64)>> {
    prop::collection::vec((field_key(), field_value(), timestamp()), 1..=max)
}

/// Apply a batch of writes and produce the wire delta it would push.
pub fn delta_from_ops(ops: &[(String, FieldValue, i64)]) -> Vec<u8> {
    let mut map = LwwMap::new();
    for (key, value, ts) in ops {
        map.set(key, value.clone(), *ts);
    }
    map.produce_push()
        .map(|push| push.payload)
        .expect("non-empty op batch always yields a push")
}
