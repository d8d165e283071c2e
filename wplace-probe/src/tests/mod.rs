mod intercept_tests;
mod selector_tests;

use crate::value::{HostValue, PlainObject};

/// A host `Map` with `first_key` as its insertion-first key.
pub fn host_map(first_key: HostValue) -> HostValue {
    struct MapLike(Vec<(HostValue, HostValue)>);
    impl std::fmt::Debug for MapLike {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "MapLike({})", self.0.len())
        }
    }
    impl crate::value::HostObjectImpl for MapLike {
        fn get(&self, _field: &str) -> Option<HostValue> {
            None
        }
        fn keys(&self) -> Vec<String> {
            Vec::new()
        }
        fn entries(&self) -> Vec<(HostValue, HostValue)> {
            self.0.clone()
        }
    }
    HostValue::Object(crate::value::HostObject::new(MapLike(vec![(
        first_key,
        HostValue::Bool(true),
    )])))
}

/// Weak-map key whose reactive scopes are `scopes`, shaped like the host's
/// component effect handles.
pub fn effect_key(scopes: Vec<HostValue>) -> PlainObject {
    let reactions = scopes
        .into_iter()
        .map(|s| PlainObject::new().with("ctx", PlainObject::new().with("s", s)).into())
        .collect::<Vec<HostValue>>();
    let source = PlainObject::new().with("reactions", reactions);
    PlainObject::new().with("current", host_map(source.into()))
}

pub fn user_scope() -> HostValue {
    PlainObject::new()
        .with("user", PlainObject::new().with("charges", 31.7).with("id", 42i64))
        .method("refresh", |_| Ok(HostValue::Undefined))
        .into()
}

pub fn map_context_scope() -> HostValue {
    PlainObject::new()
        .with("crosshair", PlainObject::new())
        .with("map", PlainObject::new())
        .into()
}
