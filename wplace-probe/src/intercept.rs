//! Interception layer over the host's generic associative containers
//!
//! Containers are instrumented per instance: an [`InterceptionLayer`] hands out
//! [`InstrumentedMap`] and [`InstrumentedWeakMap`] values (or wraps entries it is
//! given) and every observed call is shown to the installed [`WriteObserver`]
//! before the plain operation runs. Nothing shared process-wide is patched.
//!
//! Hooks are single-shot per [`ContainerKind`]: as soon as an observer reports
//! that it is satisfied, the kind is restored and every container of that kind
//! drops its reference to the hook on its next call.

use crate::value::{HostObject, HostValue, WeakHostObject};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, instrument, trace, warn};

/// The two container kinds the host routes its internal state through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    /// Key-unique associative container (host `Map`)
    KeyedMap,
    /// Weakly keyed associative container (host `WeakMap`)
    WeakKeyedMap,
}

impl ContainerKind {
    fn index(self) -> usize {
        match self {
            ContainerKind::KeyedMap => 0,
            ContainerKind::WeakKeyedMap => 1,
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::KeyedMap => f.write_str("keyed map"),
            ContainerKind::WeakKeyedMap => f.write_str("weak keyed map"),
        }
    }
}

/// Which container operation is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPoint {
    Insert,
    Lookup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookState {
    Unarmed,
    Armed,
    /// Terminal: the plain operation is back for good.
    Restored,
}

/// The container an intercepted call went to.
#[derive(Debug, Clone, Copy)]
pub enum ContainerRef<'a> {
    Map(&'a MapHandle),
    WeakMap,
}

/// A call seen by the hook, before it is delegated.
#[derive(Debug)]
pub struct InterceptedWrite<'a> {
    pub kind: ContainerKind,
    pub point: HookPoint,
    pub key: &'a HostValue,
    /// Value being written. `None` for lookups.
    pub value: Option<&'a HostValue>,
    pub container: ContainerRef<'a>,
}

/// What the observer wants after seeing a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Continue,
    /// Everything this kind feeds has been found; remove the hook.
    Restore,
}

pub trait WriteObserver: Send + Sync {
    fn observe(&self, write: &InterceptedWrite<'_>) -> Observation;
}

impl<F> WriteObserver for F
where
    F: Fn(&InterceptedWrite<'_>) -> Observation + Send + Sync,
{
    fn observe(&self, write: &InterceptedWrite<'_>) -> Observation {
        self(write)
    }
}

/// Hook shared by every container of one kind.
struct KindHook {
    kind: ContainerKind,
    points: Vec<HookPoint>,
    observer: Arc<dyn WriteObserver>,
    restored: AtomicBool,
    observed: AtomicU64,
}

impl KindHook {
    /// Shows the call to the observer. Returns whether the hook is still live.
    fn intercept(&self, write: &InterceptedWrite<'_>) -> bool {
        if self.restored.load(Ordering::Acquire) {
            return false;
        }
        if !self.points.contains(&write.point) {
            return true;
        }
        self.observed.fetch_add(1, Ordering::Relaxed);

        // An observer failure must never reach the caller of the container.
        match catch_unwind(AssertUnwindSafe(|| self.observer.observe(write))) {
            Ok(Observation::Continue) => true,
            Ok(Observation::Restore) => {
                self.restore();
                false
            }
            Err(_) => {
                debug!(kind = %self.kind, "observer panicked, treating call as a miss");
                true
            }
        }
    }

    fn restore(&self) {
        if !self.restored.swap(true, Ordering::AcqRel) {
            info!(
                kind = %self.kind,
                observed = self.observed.load(Ordering::Relaxed),
                "Original container behaviour restored"
            );
        }
    }

    fn is_restored(&self) -> bool {
        self.restored.load(Ordering::Acquire)
    }
}

/// The hook currently installed for one kind, shared by the layer and every
/// container of that kind so that re-arming reaches containers created earlier.
type KindCell = Arc<RwLock<Option<Arc<KindHook>>>>;

/// Per-container reference to its kind's hook cell. Cleared, not just bypassed,
/// once the kind is restored.
#[derive(Default)]
struct HookSlot {
    cell: Mutex<Option<KindCell>>,
}

impl HookSlot {
    fn new(cell: Option<KindCell>) -> Self {
        Self {
            cell: Mutex::new(cell),
        }
    }

    fn current(&self) -> Option<Arc<KindHook>> {
        let mut slot = self.cell.lock().unwrap_or_else(|e| e.into_inner());
        let hook = slot
            .as_ref()
            .and_then(|cell| cell.read().unwrap_or_else(|e| e.into_inner()).clone());
        if hook.as_ref().is_some_and(|h| h.is_restored()) {
            *slot = None;
            return None;
        }
        hook
    }

    /// The lock is released before the observer runs so that an observer may
    /// touch the same container again without deadlocking.
    fn run(&self, write: &InterceptedWrite<'_>) {
        let Some(hook) = self.current() else {
            return;
        };
        if !hook.intercept(write) {
            let mut slot = self.cell.lock().unwrap_or_else(|e| e.into_inner());
            *slot = None;
        }
    }

    fn is_hooked(&self) -> bool {
        self.current().is_some()
    }
}

type Entries = Arc<RwLock<HashMap<HostValue, HostValue>>>;

/// Plain, never-observed view of a keyed map's storage.
///
/// This is what gets captured: later readers see every entry the host writes
/// through the instrumented container, including writes made after capture.
#[derive(Clone, Default)]
pub struct MapHandle {
    entries: Entries,
}

impl MapHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: HashMap<HostValue, HostValue>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    pub fn get(&self, key: &HostValue) -> Option<HostValue> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    pub fn has(&self, key: &HostValue) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(key)
    }

    /// Plain insert. Returns the previous value under `key`.
    pub fn set(&self, key: HostValue, value: HostValue) -> Option<HostValue> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key, value)
    }

    pub fn delete(&self, key: &HostValue) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the current entries.
    pub fn entries(&self) -> Vec<(HostValue, HostValue)> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Whether both handles view the same storage.
    pub fn ptr_eq(&self, other: &MapHandle) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

impl fmt::Debug for MapHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapHandle")
            .field("len", &self.len())
            .finish()
    }
}

/// Key-unique associative container with an observed insert.
pub struct InstrumentedMap {
    handle: MapHandle,
    hook: HookSlot,
}

impl InstrumentedMap {
    /// Insert `value` under `key`. The return value is exactly what the plain
    /// container returns.
    pub fn set(&self, key: HostValue, value: HostValue) -> Option<HostValue> {
        self.hook.run(&InterceptedWrite {
            kind: ContainerKind::KeyedMap,
            point: HookPoint::Insert,
            key: &key,
            value: Some(&value),
            container: ContainerRef::Map(&self.handle),
        });
        self.handle.set(key, value)
    }

    pub fn get(&self, key: &HostValue) -> Option<HostValue> {
        self.handle.get(key)
    }

    pub fn has(&self, key: &HostValue) -> bool {
        self.handle.has(key)
    }

    pub fn delete(&self, key: &HostValue) -> bool {
        self.handle.delete(key)
    }

    pub fn len(&self) -> usize {
        self.handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handle.is_empty()
    }

    /// The unobserved view of this container's storage.
    pub fn handle(&self) -> &MapHandle {
        &self.handle
    }

    /// Whether calls still pass through the hook.
    pub fn is_hooked(&self) -> bool {
        self.hook.is_hooked()
    }
}

impl fmt::Debug for InstrumentedMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentedMap")
            .field("len", &self.len())
            .field("hooked", &self.is_hooked())
            .finish()
    }
}

/// Weakly keyed associative container with observed insert and lookup.
///
/// Keys are host objects held through [`WeakHostObject`]; an entry whose key has
/// been dropped is invisible at once and is pruned once the table has doubled
/// since the last sweep, so inserts stay amortised O(1).
pub struct InstrumentedWeakMap {
    table: RwLock<WeakTable>,
    hook: HookSlot,
}

/// Smallest table size that triggers a sweep of dead entries.
const PRUNE_FLOOR: usize = 64;

struct WeakTable {
    entries: HashMap<usize, (WeakHostObject, HostValue)>,
    prune_at: usize,
}

impl WeakTable {
    fn prune_if_grown(&mut self) {
        if self.entries.len() <= self.prune_at {
            return;
        }
        let before = self.entries.len();
        self.entries.retain(|_, (weak, _)| weak.is_alive());
        self.prune_at = (self.entries.len() * 2).max(PRUNE_FLOOR);
        trace!(before, after = self.entries.len(), "Pruned dead weak keys");
    }
}

impl InstrumentedWeakMap {
    fn new(cell: Option<KindCell>) -> Self {
        Self {
            table: RwLock::new(WeakTable {
                entries: HashMap::new(),
                prune_at: PRUNE_FLOOR,
            }),
            hook: HookSlot::new(cell),
        }
    }

    pub fn set(&self, key: &HostObject, value: HostValue) -> Option<HostValue> {
        let key_value = HostValue::Object(key.clone());
        self.hook.run(&InterceptedWrite {
            kind: ContainerKind::WeakKeyedMap,
            point: HookPoint::Insert,
            key: &key_value,
            value: Some(&value),
            container: ContainerRef::WeakMap,
        });

        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        let previous = table
            .entries
            .insert(key.object_id(), (key.downgrade(), value))
            .filter(|(weak, _)| weak.upgrade().is_some_and(|k| k.ptr_eq(key)))
            .map(|(_, previous)| previous);
        table.prune_if_grown();
        previous
    }

    pub fn get(&self, key: &HostObject) -> Option<HostValue> {
        let key_value = HostValue::Object(key.clone());
        self.hook.run(&InterceptedWrite {
            kind: ContainerKind::WeakKeyedMap,
            point: HookPoint::Lookup,
            key: &key_value,
            value: None,
            container: ContainerRef::WeakMap,
        });
        self.lookup(key)
    }

    pub fn has(&self, key: &HostObject) -> bool {
        self.lookup(key).is_some()
    }

    pub fn delete(&self, key: &HostObject) -> bool {
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        match table.entries.get(&key.object_id()) {
            Some((weak, _)) if weak.upgrade().is_some_and(|k| k.ptr_eq(key)) => {
                table.entries.remove(&key.object_id());
                true
            }
            _ => false,
        }
    }

    /// Number of entries whose key is still alive.
    pub fn live_len(&self) -> usize {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table.entries.values().filter(|(weak, _)| weak.is_alive()).count()
    }

    /// Entries held, dead keys included.
    #[cfg(test)]
    pub(crate) fn stored_len(&self) -> usize {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table.entries.len()
    }

    pub fn is_hooked(&self) -> bool {
        self.hook.is_hooked()
    }

    fn lookup(&self, key: &HostObject) -> Option<HostValue> {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table
            .entries
            .get(&key.object_id())
            .filter(|(weak, _)| weak.upgrade().is_some_and(|k| k.ptr_eq(key)))
            .map(|(_, v)| v.clone())
    }
}

impl fmt::Debug for InstrumentedWeakMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentedWeakMap")
            .field("live_len", &self.live_len())
            .field("hooked", &self.is_hooked())
            .finish()
    }
}

/// Factory for instrumented containers, owning one hook per container kind.
#[derive(Default)]
pub struct InterceptionLayer {
    hooks: [KindCell; 2],
}

impl InterceptionLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind`, observing the given operations.
    ///
    /// Hooks are single-shot: a kind that was already restored stays restored
    /// and this returns `false`. Re-arming an armed kind replaces its observer
    /// for every container of the kind, including those created earlier.
    #[instrument(level = "debug", skip(self, observer))]
    pub fn install(
        &self,
        kind: ContainerKind,
        points: &[HookPoint],
        observer: Arc<dyn WriteObserver>,
    ) -> bool {
        let mut slot = self.hooks[kind.index()]
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|h| h.is_restored()) {
            warn!(%kind, "Hook already restored, refusing to re-arm");
            return false;
        }
        *slot = Some(Arc::new(KindHook {
            kind,
            points: points.to_vec(),
            observer,
            restored: AtomicBool::new(false),
            observed: AtomicU64::new(0),
        }));
        debug!(%kind, ?points, "Hook armed");
        true
    }

    /// Restore the plain behaviour of `kind` without waiting for a match.
    pub fn restore(&self, kind: ContainerKind) {
        if let Some(hook) = self.hook_for(kind) {
            hook.restore();
        }
    }

    pub fn state(&self, kind: ContainerKind) -> HookState {
        match self.hook_for(kind) {
            None => HookState::Unarmed,
            Some(hook) if hook.is_restored() => HookState::Restored,
            Some(_) => HookState::Armed,
        }
    }

    /// Number of calls shown to the observer of `kind` so far.
    pub fn observed(&self, kind: ContainerKind) -> u64 {
        self.hook_for(kind)
            .map(|h| h.observed.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn new_map(&self) -> InstrumentedMap {
        self.wrap_map(HashMap::new())
    }

    /// Instrument existing entries.
    pub fn wrap_map(&self, entries: HashMap<HostValue, HostValue>) -> InstrumentedMap {
        trace!(len = entries.len(), "Instrumenting keyed map");
        InstrumentedMap {
            handle: MapHandle::from_entries(entries),
            hook: HookSlot::new(self.live_cell(ContainerKind::KeyedMap)),
        }
    }

    pub fn new_weak_map(&self) -> InstrumentedWeakMap {
        InstrumentedWeakMap::new(self.live_cell(ContainerKind::WeakKeyedMap))
    }

    fn hook_for(&self, kind: ContainerKind) -> Option<Arc<KindHook>> {
        self.hooks[kind.index()]
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The kind's cell, unless the kind is already restored. Containers of an
    /// unarmed kind keep the cell so that a later `install` reaches them.
    fn live_cell(&self, kind: ContainerKind) -> Option<KindCell> {
        if self.hook_for(kind).is_some_and(|h| h.is_restored()) {
            return None;
        }
        Some(self.hooks[kind.index()].clone())
    }
}

impl fmt::Debug for InterceptionLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptionLayer")
            .field("keyed_map", &self.state(ContainerKind::KeyedMap))
            .field("weak_keyed_map", &self.state(ContainerKind::WeakKeyedMap))
            .finish()
    }
}
