//! Structural recognition of host objects
//!
//! There is no schema for the host's internals, so each slot is recognised by the
//! smallest set of fields that tells it apart. Predicates lean strict: a capture
//! is first-write-wins and irreversible, so a loose predicate that grabs the
//! wrong object is worse than one that misses the right one.

use crate::registry::Slot;
use crate::value::HostValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::trace;

/// Key prefix of pixel-edit entries, e.g. `t=(1611,875);p=(313,795);s=0`.
pub const PIXEL_KEY_PREFIX: &str = "t=";

/// Outcome of a structural test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Match,
    NoMatch,
    /// The path to the distinguishing fields could not be followed.
    Indeterminate,
}

impl Verdict {
    pub fn is_match(self) -> bool {
        self == Verdict::Match
    }
}

/// A value offered for classification, with the key it was stored under when
/// there is one.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub key: Option<&'a HostValue>,
    pub value: &'a HostValue,
}

impl<'a> Candidate<'a> {
    pub fn new(key: Option<&'a HostValue>, value: &'a HostValue) -> Self {
        Self { key, value }
    }

    pub fn value(value: &'a HostValue) -> Self {
        Self { key: None, value }
    }
}

pub trait ShapePredicate: Send + Sync {
    fn test(&self, candidate: &Candidate<'_>) -> Verdict;
}

impl<F> ShapePredicate for F
where
    F: Fn(&Candidate<'_>) -> Verdict + Send + Sync,
{
    fn test(&self, candidate: &Candidate<'_>) -> Verdict {
        self(candidate)
    }
}

/// Versions of the predicate set. Bump when the host changes its internals and
/// keep the old fixtures passing against the old profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeProfile {
    #[default]
    V1,
}

/// Pixel-edit entry: string key starting with `t=`, value with a `color`.
pub fn pixel_edit_record(candidate: &Candidate<'_>) -> Verdict {
    let Some(key) = candidate.key.and_then(HostValue::as_str) else {
        return Verdict::NoMatch;
    };
    if !key.starts_with(PIXEL_KEY_PREFIX) {
        return Verdict::NoMatch;
    }
    match candidate.value {
        HostValue::Object(record) if record.get("color").is_some() => Verdict::Match,
        HostValue::Object(_) => Verdict::NoMatch,
        v if v.is_nullish() => Verdict::Indeterminate,
        _ => Verdict::NoMatch,
    }
}

/// User/session scope: carries a `user` object and either a broadcast
/// `channel` or a callable `refresh`.
pub fn user_scope(candidate: &Candidate<'_>) -> Verdict {
    let HostValue::Object(scope) = candidate.value else {
        return Verdict::Indeterminate;
    };
    // Reactive store wrappers expose `value`; the scopes themselves do not.
    if scope.get("value").is_some() {
        return Verdict::NoMatch;
    }
    if scope.get("user").and_then(|u| u.as_object().cloned()).is_none() {
        return Verdict::NoMatch;
    }
    let has_channel = scope.get("channel").is_some();
    let has_refresh = scope.get("refresh").is_some_and(|r| r.is_callable());
    if has_channel || has_refresh {
        Verdict::Match
    } else {
        Verdict::NoMatch
    }
}

/// Map/context scope: carries both `crosshair` and `map`. A scope with a `user`
/// is the session scope whatever else it carries.
pub fn map_context_scope(candidate: &Candidate<'_>) -> Verdict {
    let HostValue::Object(scope) = candidate.value else {
        return Verdict::Indeterminate;
    };
    if scope.get("value").is_some() || scope.get("user").is_some() {
        return Verdict::NoMatch;
    }
    if scope.get("crosshair").is_some() && scope.get("map").is_some() {
        Verdict::Match
    } else {
        Verdict::NoMatch
    }
}

/// Component scopes reachable from a weakly keyed entry's key.
///
/// The path is `key.current` (a map) → its first entry's key → `reactions` →
/// each reaction's `ctx.s`. Returns `None` when the path breaks before the
/// reactions list; reactions without a scope are skipped.
pub fn reactive_scopes(key: &HostValue) -> Option<Vec<HostValue>> {
    let current = key.get("current")?;
    let (first_key, _) = current.as_object()?.entries().into_iter().next()?;
    let reactions = first_key.get("reactions")?;
    let reactions = reactions.as_array()?;
    if reactions.is_empty() {
        return None;
    }
    Some(
        reactions
            .iter()
            .filter_map(|reaction| reaction.get("ctx")?.get("s"))
            .collect(),
    )
}

/// Applies the predicate registered for a slot.
pub struct ShapeClassifier {
    profile: ShapeProfile,
    predicates: RwLock<HashMap<Slot, Arc<dyn ShapePredicate>>>,
}

impl ShapeClassifier {
    pub fn new(profile: ShapeProfile) -> Self {
        let mut predicates: HashMap<Slot, Arc<dyn ShapePredicate>> = HashMap::new();
        match profile {
            ShapeProfile::V1 => {
                predicates.insert(Slot::PixelMap, Arc::new(pixel_edit_record));
                predicates.insert(Slot::User, Arc::new(user_scope));
                predicates.insert(Slot::MapContext, Arc::new(map_context_scope));
            }
        }
        Self {
            profile,
            predicates: RwLock::new(predicates),
        }
    }

    pub fn profile(&self) -> ShapeProfile {
        self.profile
    }

    /// Replace the predicate used for `slot`.
    pub fn register(&self, slot: Slot, predicate: impl ShapePredicate + 'static) {
        let mut predicates = self.predicates.write().unwrap_or_else(|e| e.into_inner());
        predicates.insert(slot, Arc::new(predicate));
    }

    pub fn classify(&self, slot: Slot, candidate: &Candidate<'_>) -> Verdict {
        let predicate = {
            let predicates = self.predicates.read().unwrap_or_else(|e| e.into_inner());
            predicates.get(&slot).cloned()
        };
        let verdict = predicate
            .map(|p| p.test(candidate))
            .unwrap_or(Verdict::NoMatch);
        trace!(%slot, ?verdict, "Classified candidate");
        verdict
    }
}

impl Default for ShapeClassifier {
    fn default() -> Self {
        Self::new(ShapeProfile::default())
    }
}

impl fmt::Debug for ShapeClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShapeClassifier")
            .field("profile", &self.profile)
            .finish()
    }
}
