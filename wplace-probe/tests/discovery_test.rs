use std::sync::Arc;
use wplace_probe::{
    Candidate, ContainerKind, DiscoveryRegistry, Engine, EngineConfig, HookPoint, HookState,
    HostObject, HostObjectImpl, HostValue, PlainObject, Slot, Verdict,
};

/// Host `Map` with a single entry.
#[derive(Debug)]
struct SingleEntryMap(HostValue);

impl HostObjectImpl for SingleEntryMap {
    fn get(&self, _field: &str) -> Option<HostValue> {
        None
    }

    fn keys(&self) -> Vec<String> {
        Vec::new()
    }

    fn entries(&self) -> Vec<(HostValue, HostValue)> {
        vec![(self.0.clone(), HostValue::Bool(true))]
    }
}

fn effect_key(scopes: Vec<HostValue>) -> HostObject {
    let reactions: Vec<HostValue> = scopes
        .into_iter()
        .map(|s| PlainObject::new().with("ctx", PlainObject::new().with("s", s)).into())
        .collect();
    let source = PlainObject::new().with("reactions", reactions);
    PlainObject::new()
        .with("current", HostObject::new(SingleEntryMap(source.into())))
        .into_host()
}

fn user_scope() -> HostValue {
    PlainObject::new()
        .with("user", PlainObject::new().with("charges", 12.0))
        .method("refresh", |_| Ok(HostValue::Undefined))
        .into()
}

fn map_context_scope() -> HostValue {
    PlainObject::new()
        .with("crosshair", PlainObject::new())
        .with("map", PlainObject::new())
        .into()
}

fn color(r: f64) -> PlainObject {
    PlainObject::new()
        .with("r", r)
        .with("g", 0.0)
        .with("b", 0.0)
        .with("a", 255.0)
}

#[test]
fn test_first_matching_write_fills_pixel_map_once() {
    wplace_probe::init_tracing();
    let registry = Arc::new(DiscoveryRegistry::new());
    let engine = Engine::new(EngineConfig::default(), registry.clone()).unwrap();
    engine
        .classifier()
        .register(Slot::PixelMap, |c: &Candidate<'_>| {
            if c.value.get("color").is_some() {
                Verdict::Match
            } else {
                Verdict::NoMatch
            }
        });

    let map = engine.layer().new_map();
    map.set(
        HostValue::from("k1"),
        PlainObject::new().with("color", HostValue::Undefined).into(),
    );
    assert!(registry.pixel_map().is_none());
    assert_eq!(engine.layer().state(ContainerKind::KeyedMap), HookState::Armed);

    map.set(
        HostValue::from("k2"),
        PlainObject::new().with("color", color(0.0)).into(),
    );
    let captured = registry.pixel_map().expect("pixel map captured");
    assert!(captured.ptr_eq(map.handle()));
    assert_eq!(engine.layer().state(ContainerKind::KeyedMap), HookState::Restored);

    // Later writes, to this or any other map, change nothing.
    let other = engine.layer().new_map();
    other.set(
        HostValue::from("k3"),
        PlainObject::new().with("color", color(1.0)).into(),
    );
    assert!(registry.pixel_map().unwrap().ptr_eq(map.handle()));
    assert!(!other.is_hooked());
    assert_eq!(map.len(), 2);
    assert_eq!(other.len(), 1);
}

#[test]
fn test_default_profile_ignores_non_pixel_keys() {
    let registry = Arc::new(DiscoveryRegistry::new());
    let engine = Engine::new(EngineConfig::default(), registry.clone()).unwrap();

    let map = engine.layer().new_map();
    map.set(
        HostValue::from("theme"),
        PlainObject::new().with("color", color(0.0)).into(),
    );
    assert!(registry.pixel_map().is_none());
    assert!(map.is_hooked());

    map.set(
        HostValue::from("t=(1611,875);p=(313,795);s=0"),
        PlainObject::new().with("color", color(0.0)).into(),
    );
    assert!(registry.pixel_map().is_some());
    assert!(!map.is_hooked());
}

#[test]
fn test_weak_map_insert_captures_both_scopes() {
    let registry = Arc::new(DiscoveryRegistry::new());
    let engine = Engine::new(EngineConfig::default(), registry.clone()).unwrap();
    let weak = engine.layer().new_weak_map();

    let user_key = effect_key(vec![HostValue::Undefined, user_scope()]);
    weak.set(&user_key, HostValue::Bool(true));
    assert!(registry.user().is_some());
    assert!(registry.map_context().is_none());
    assert_eq!(
        engine.layer().state(ContainerKind::WeakKeyedMap),
        HookState::Armed
    );

    let map_key = effect_key(vec![map_context_scope()]);
    weak.set(&map_key, HostValue::Bool(true));
    assert!(registry.map_context().is_some());
    assert_eq!(
        engine.layer().state(ContainerKind::WeakKeyedMap),
        HookState::Restored
    );

    let snapshot = registry.snapshot();
    assert!(snapshot.user && snapshot.map_context && !snapshot.pixel_map);
}

#[test]
fn test_one_scope_never_fills_two_slots() {
    let registry = Arc::new(DiscoveryRegistry::new());
    let engine = Engine::new(EngineConfig::default(), registry.clone()).unwrap();
    let weak = engine.layer().new_weak_map();

    let both: HostValue = PlainObject::new()
        .with("user", PlainObject::new())
        .with("channel", PlainObject::new())
        .with("crosshair", PlainObject::new())
        .with("map", PlainObject::new())
        .into();
    let key = effect_key(vec![both]);
    weak.set(&key, HostValue::Null);

    assert!(registry.user().is_some());
    assert!(registry.map_context().is_none());
}

#[test]
fn test_lookup_hook_point_observes_reads_only() {
    let registry = Arc::new(DiscoveryRegistry::new());
    let mut config = EngineConfig::default();
    config.intercept.weak_map_hook_points = vec![HookPoint::Lookup];
    let engine = Engine::new(config, registry.clone()).unwrap();
    let weak = engine.layer().new_weak_map();

    let key = effect_key(vec![user_scope(), map_context_scope()]);
    weak.set(&key, HostValue::Bool(true));
    assert!(registry.user().is_none());

    assert_eq!(weak.get(&key), Some(HostValue::Bool(true)));
    assert!(registry.user().is_some());
    assert!(registry.map_context().is_some());
    assert!(!weak.is_hooked());
}

#[test]
fn test_broken_paths_are_skipped() {
    let registry = Arc::new(DiscoveryRegistry::new());
    let engine = Engine::new(EngineConfig::default(), registry.clone()).unwrap();
    let weak = engine.layer().new_weak_map();

    let plain = PlainObject::new().with("current", 1.0).into_host();
    let empty = effect_key(Vec::new());
    let wrapper = effect_key(vec![PlainObject::new()
        .with("value", 1.0)
        .with("crosshair", PlainObject::new())
        .with("map", PlainObject::new())
        .into()]);
    for key in [&plain, &empty, &wrapper] {
        weak.set(key, HostValue::Null);
    }

    assert!(registry.map_context().is_none());
    assert!(weak.is_hooked());
    assert_eq!(weak.live_len(), 3);
    assert_eq!(engine.layer().observed(ContainerKind::WeakKeyedMap), 3);
}

#[test]
fn test_session_scope_is_never_taken_as_map_context() {
    let registry = Arc::new(DiscoveryRegistry::new());
    let engine = Engine::new(EngineConfig::default(), registry.clone()).unwrap();
    let weak = engine.layer().new_weak_map();

    let user_key = effect_key(vec![user_scope()]);
    weak.set(&user_key, HostValue::Null);
    assert!(registry.user().is_some());

    // With `user` already filled, a session scope that also carries map
    // fields must not land in the context slot.
    let session: HostValue = PlainObject::new()
        .with("user", PlainObject::new())
        .with("channel", PlainObject::new())
        .with("crosshair", PlainObject::new())
        .with("map", PlainObject::new())
        .into();
    let session_key = effect_key(vec![session]);
    weak.set(&session_key, HostValue::Null);

    assert!(registry.map_context().is_none());
    assert!(weak.is_hooked());

    let ctx_key = effect_key(vec![map_context_scope()]);
    weak.set(&ctx_key, HostValue::Null);
    assert!(registry.map_context().is_some());
    assert!(!weak.is_hooked());
}
