//! Tests for instrumented containers and single-shot hooks

use crate::intercept::{
    ContainerKind, ContainerRef, HookPoint, HookState, InterceptedWrite, InterceptionLayer,
    Observation, WriteObserver,
};
use crate::value::{HostValue, PlainObject};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Records every call and restores once it has seen `restore_after` calls.
struct Recorder {
    seen: Mutex<Vec<(HookPoint, HostValue)>>,
    restore_after: usize,
}

impl Recorder {
    fn new(restore_after: usize) -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            restore_after,
        })
    }

    fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl WriteObserver for Recorder {
    fn observe(&self, write: &InterceptedWrite<'_>) -> Observation {
        let mut seen = self.seen.lock().unwrap();
        seen.push((write.point, write.key.clone()));
        if seen.len() >= self.restore_after {
            Observation::Restore
        } else {
            Observation::Continue
        }
    }
}

#[test]
fn test_unarmed_layer_hands_out_plain_containers() {
    let layer = InterceptionLayer::new();
    let map = layer.new_map();

    assert_eq!(layer.state(ContainerKind::KeyedMap), HookState::Unarmed);
    assert!(!map.is_hooked());
    assert_eq!(map.set("a".into(), 1.0.into()), None);
    assert_eq!(map.get(&"a".into()), Some(HostValue::Number(1.0)));
}

#[test]
fn test_set_returns_what_the_plain_container_returns() {
    let layer = InterceptionLayer::new();
    let recorder = Recorder::new(usize::MAX);
    layer.install(ContainerKind::KeyedMap, &[HookPoint::Insert], recorder.clone());

    let hooked = layer.new_map();
    let mut plain: HashMap<HostValue, HostValue> = HashMap::new();

    for (k, v) in [("a", 1.0), ("b", 2.0), ("a", 3.0)] {
        let expected = plain.insert(k.into(), v.into());
        assert_eq!(hooked.set(k.into(), v.into()), expected);
    }
    assert_eq!(hooked.len(), plain.len());
    assert_eq!(hooked.get(&"a".into()), Some(HostValue::Number(3.0)));
    assert_eq!(recorder.count(), 3);
}

#[test]
fn test_restore_removes_the_hook_from_every_container_of_the_kind() {
    let layer = InterceptionLayer::new();
    let recorder = Recorder::new(2);
    layer.install(ContainerKind::KeyedMap, &[HookPoint::Insert], recorder.clone());

    let first = layer.new_map();
    let second = layer.new_map();
    assert!(first.is_hooked() && second.is_hooked());

    first.set("x".into(), 1.0.into());
    second.set("y".into(), 2.0.into());

    assert_eq!(layer.state(ContainerKind::KeyedMap), HookState::Restored);
    assert!(!first.is_hooked());
    assert!(!second.is_hooked());

    first.set("z".into(), 3.0.into());
    second.set("w".into(), 4.0.into());
    assert_eq!(recorder.count(), 2, "no calls observed after restore");
    assert_eq!(layer.observed(ContainerKind::KeyedMap), 2);

    // Containers created after the restore are never hooked.
    assert!(!layer.new_map().is_hooked());
}

#[test]
fn test_restored_kind_cannot_be_rearmed() {
    let layer = InterceptionLayer::new();
    layer.install(ContainerKind::KeyedMap, &[HookPoint::Insert], Recorder::new(1));
    layer.restore(ContainerKind::KeyedMap);

    assert!(!layer.install(ContainerKind::KeyedMap, &[HookPoint::Insert], Recorder::new(1)));
    assert_eq!(layer.state(ContainerKind::KeyedMap), HookState::Restored);
}

#[test]
fn test_panicking_observer_never_reaches_the_caller() {
    let layer = InterceptionLayer::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let observer = move |_: &InterceptedWrite<'_>| -> Observation {
        counter.fetch_add(1, Ordering::SeqCst);
        panic!("shape check blew up");
    };
    layer.install(ContainerKind::KeyedMap, &[HookPoint::Insert], Arc::new(observer));

    let map = layer.new_map();
    assert_eq!(map.set("k".into(), 1.0.into()), None);
    assert_eq!(map.set("k".into(), 2.0.into()), Some(HostValue::Number(1.0)));

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(map.is_hooked(), "a failing check is a miss, not a match");
}

#[test]
fn test_map_observer_sees_the_written_container() {
    let layer = InterceptionLayer::new();
    let matched = Arc::new(Mutex::new(None));
    let slot = matched.clone();
    let observer = move |write: &InterceptedWrite<'_>| -> Observation {
        if let ContainerRef::Map(handle) = write.container {
            *slot.lock().unwrap() = Some(handle.clone());
        }
        Observation::Restore
    };
    layer.install(ContainerKind::KeyedMap, &[HookPoint::Insert], Arc::new(observer));

    let map = layer.new_map();
    map.set("k".into(), 1.0.into());

    let handle = matched.lock().unwrap().clone().unwrap();
    assert!(handle.ptr_eq(map.handle()));
    assert_eq!(handle.get(&"k".into()), Some(HostValue::Number(1.0)));
}

#[test]
fn test_observer_may_touch_the_same_container() {
    let layer = Arc::new(InterceptionLayer::new());
    let observer = |write: &InterceptedWrite<'_>| -> Observation {
        if let ContainerRef::Map(handle) = write.container {
            let _ = handle.len();
        }
        Observation::Continue
    };
    layer.install(ContainerKind::KeyedMap, &[HookPoint::Insert], Arc::new(observer));
    let map = layer.new_map();
    map.set("a".into(), 1.0.into());
    assert_eq!(map.len(), 1);
}

#[test]
fn test_wrap_map_instruments_existing_entries() {
    let layer = InterceptionLayer::new();
    let recorder = Recorder::new(usize::MAX);
    layer.install(ContainerKind::KeyedMap, &[HookPoint::Insert], recorder.clone());

    let mut existing = HashMap::new();
    existing.insert(HostValue::from("seed"), HostValue::Bool(true));
    let map = layer.wrap_map(existing);

    assert!(map.has(&"seed".into()));
    map.set("next".into(), 1.0.into());
    assert_eq!(recorder.count(), 1);
}

#[test]
fn test_weak_map_observes_only_armed_points() {
    let layer = InterceptionLayer::new();
    let recorder = Recorder::new(usize::MAX);
    layer.install(ContainerKind::WeakKeyedMap, &[HookPoint::Lookup], recorder.clone());

    let weak = layer.new_weak_map();
    let key = PlainObject::new().into_host();
    weak.set(&key, 1.0.into());
    assert_eq!(recorder.count(), 0);

    assert_eq!(weak.get(&key), Some(HostValue::Number(1.0)));
    assert_eq!(recorder.count(), 1);
    assert_eq!(recorder.seen.lock().unwrap()[0].0, HookPoint::Lookup);
}

#[test]
fn test_weak_map_does_not_keep_keys_alive() {
    let layer = InterceptionLayer::new();
    let weak = layer.new_weak_map();

    let kept = PlainObject::new().into_host();
    weak.set(&kept, "kept".into());
    {
        let dropped = PlainObject::new().into_host();
        weak.set(&dropped, "dropped".into());
        assert_eq!(weak.live_len(), 2);
    }
    assert_eq!(weak.live_len(), 1);
    assert_eq!(weak.get(&kept), Some(HostValue::from("kept")));

    assert!(weak.delete(&kept));
    assert!(!weak.has(&kept));
}

#[test]
fn test_rearming_reaches_containers_created_earlier() {
    crate::init_tracing();
    let layer = InterceptionLayer::new();
    let replaced = Recorder::new(usize::MAX);
    layer.install(ContainerKind::KeyedMap, &[HookPoint::Insert], replaced.clone());
    let early = layer.new_map();
    early.set("before".into(), 1.0.into());

    let current = Recorder::new(1);
    assert!(layer.install(ContainerKind::KeyedMap, &[HookPoint::Insert], current.clone()));
    let late = layer.new_map();

    // The early container now reports to the current observer.
    early.set("a".into(), 1.0.into());
    assert_eq!(replaced.count(), 1);
    assert_eq!(current.count(), 1);

    assert_eq!(layer.state(ContainerKind::KeyedMap), HookState::Restored);
    assert!(!early.is_hooked());
    assert!(!late.is_hooked());

    early.set("b".into(), 2.0.into());
    late.set("c".into(), 3.0.into());
    assert_eq!(replaced.count(), 1);
    assert_eq!(current.count(), 1);
}

#[test]
fn test_explicit_restore_reaches_containers_of_a_rearmed_kind() {
    let layer = InterceptionLayer::new();
    let first = Recorder::new(usize::MAX);
    layer.install(ContainerKind::WeakKeyedMap, &[HookPoint::Insert], first.clone());
    let early = layer.new_weak_map();
    let second = Recorder::new(usize::MAX);
    layer.install(ContainerKind::WeakKeyedMap, &[HookPoint::Insert], second.clone());

    layer.restore(ContainerKind::WeakKeyedMap);

    let key = PlainObject::new().into_host();
    early.set(&key, 1.0.into());
    assert!(!early.is_hooked());
    assert_eq!(first.count() + second.count(), 0);
}

#[test]
fn test_containers_of_an_unarmed_kind_pick_up_a_later_install() {
    let layer = InterceptionLayer::new();
    let map = layer.new_map();
    assert!(!map.is_hooked());

    let recorder = Recorder::new(usize::MAX);
    layer.install(ContainerKind::KeyedMap, &[HookPoint::Insert], recorder.clone());
    map.set("k".into(), 1.0.into());

    assert!(map.is_hooked());
    assert_eq!(recorder.count(), 1);
}

#[test]
fn test_weak_map_sweeps_dead_keys_as_it_grows() {
    let layer = InterceptionLayer::new();
    let weak = layer.new_weak_map();

    for i in 0..500 {
        let transient = PlainObject::new().into_host();
        weak.set(&transient, HostValue::from(i as f64));
    }
    assert_eq!(weak.live_len(), 0);
    assert!(weak.stored_len() <= 65, "stored {}", weak.stored_len());

    let kept: Vec<_> = (0..200).map(|_| PlainObject::new().into_host()).collect();
    for (i, key) in kept.iter().enumerate() {
        weak.set(key, HostValue::from(i as f64));
    }
    assert_eq!(weak.live_len(), 200);
    assert!(kept
        .iter()
        .enumerate()
        .all(|(i, key)| weak.get(key) == Some(HostValue::from(i as f64))));
}

#[test]
fn test_weak_map_set_returns_previous_value_of_live_key() {
    let layer = InterceptionLayer::new();
    let weak = layer.new_weak_map();
    let key = PlainObject::new().into_host();

    assert_eq!(weak.set(&key, 1.0.into()), None);
    assert_eq!(weak.set(&key, 2.0.into()), Some(HostValue::Number(1.0)));
}
