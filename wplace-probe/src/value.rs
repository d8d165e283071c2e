//! Dynamic model of host application values
//!
//! The objects this crate hunts for live inside a third-party application and
//! have no Rust type. They are seen through [`HostValue`], a loosely typed value
//! with host semantics: primitives compare by value, objects and functions by
//! identity. Every accessor returns `Option` so that structural probing never
//! panics on a missing field.

use crate::errors::ProbeError;
use serde_json::Value as JsonValue;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock, Weak};

/// Maximum nesting followed when flattening a value to JSON. Host object graphs
/// are frequently cyclic.
const MAX_JSON_DEPTH: usize = 32;

const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Backing implementation of a host object.
///
/// Embeddings provide their own implementation over whatever handle the host
/// exposes; [`PlainObject`] is the in-crate one used for fixtures and replays.
pub trait HostObjectImpl: Send + Sync + fmt::Debug {
    /// Read a field. `None` means the field is absent (host `undefined`).
    fn get(&self, field: &str) -> Option<HostValue>;

    /// Own field names, in insertion order.
    fn keys(&self) -> Vec<String>;

    fn set(&self, field: &str, _value: HostValue) -> Result<(), ProbeError> {
        Err(ProbeError::Host(format!(
            "object is read-only, cannot assign `{field}`"
        )))
    }

    /// Map-like iteration, insertion-first entry first.
    fn entries(&self) -> Vec<(HostValue, HostValue)> {
        self.keys()
            .into_iter()
            .filter_map(|k| self.get(&k).map(|v| (HostValue::from(k), v)))
            .collect()
    }
}

/// Reference-counted handle to a host object. Equality is identity.
#[derive(Clone)]
pub struct HostObject {
    inner: Arc<dyn HostObjectImpl>,
}

impl HostObject {
    pub fn new(inner: impl HostObjectImpl + 'static) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn from_arc(inner: Arc<dyn HostObjectImpl>) -> Self {
        Self { inner }
    }

    /// Stable identity for the lifetime of the object.
    pub fn object_id(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    pub fn get(&self, field: &str) -> Option<HostValue> {
        self.inner.get(field).filter(|v| !v.is_undefined())
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }

    pub fn set(&self, field: &str, value: HostValue) -> Result<(), ProbeError> {
        self.inner.set(field, value)
    }

    pub fn entries(&self) -> Vec<(HostValue, HostValue)> {
        self.inner.entries()
    }

    pub fn downgrade(&self) -> WeakHostObject {
        WeakHostObject {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn ptr_eq(&self, other: &HostObject) -> bool {
        self.object_id() == other.object_id()
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostObject#{:x}", self.object_id())
    }
}

impl PartialEq for HostObject {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for HostObject {}

impl Hash for HostObject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.object_id().hash(state);
    }
}

/// Non-owning handle, used as the key of weakly keyed containers.
#[derive(Clone, Debug)]
pub struct WeakHostObject {
    inner: Weak<dyn HostObjectImpl>,
}

impl WeakHostObject {
    pub fn upgrade(&self) -> Option<HostObject> {
        self.inner.upgrade().map(HostObject::from_arc)
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

type NativeFn = dyn Fn(&[HostValue]) -> Result<HostValue, ProbeError> + Send + Sync;

/// A callable host value.
#[derive(Clone)]
pub struct HostFunction {
    name: Arc<str>,
    f: Arc<NativeFn>,
}

impl HostFunction {
    pub fn new<F>(name: &str, f: F) -> Self
    where
        F: Fn(&[HostValue]) -> Result<HostValue, ProbeError> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            f: Arc::new(f),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[HostValue]) -> Result<HostValue, ProbeError> {
        (self.f)(args)
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.f) as *const () as usize
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Function {}]", self.name)
    }
}

impl PartialEq for HostFunction {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

/// A value as seen by the host application.
#[derive(Clone, Debug, Default)]
pub enum HostValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Arc<Vec<HostValue>>),
    Object(HostObject),
    Function(HostFunction),
}

impl HostValue {
    pub fn array(items: Vec<HostValue>) -> Self {
        HostValue::Array(Arc::new(items))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, HostValue::Undefined)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, HostValue::Undefined | HostValue::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, HostValue::Function(_))
    }

    /// Field access. Absent fields and non-objects both read as `None`.
    pub fn get(&self, field: &str) -> Option<HostValue> {
        match self {
            HostValue::Object(obj) => obj.get(field),
            _ => None,
        }
    }

    /// Element access on arrays.
    pub fn at(&self, index: usize) -> Option<HostValue> {
        match self {
            HostValue::Array(items) => items.get(index).cloned(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[HostValue]> {
        match self {
            HostValue::Array(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HostObject> {
        match self {
            HostValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&HostFunction> {
        match self {
            HostValue::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Invoke a callable member, `value.name(...args)`.
    pub fn call_method(&self, name: &str, args: &[HostValue]) -> Result<HostValue, ProbeError> {
        match self.get(name) {
            Some(HostValue::Function(f)) => f.call(args),
            Some(_) => Err(ProbeError::ShapeMismatch(format!(
                "`{name}` is not callable"
            ))),
            None => Err(ProbeError::ShapeMismatch(format!("`{name}` is missing"))),
        }
    }

    /// Flatten to JSON. `undefined` and functions become `null` in arrays and
    /// are dropped from objects.
    pub fn to_json(&self) -> JsonValue {
        self.to_json_at(0)
    }

    fn to_json_at(&self, depth: usize) -> JsonValue {
        if depth > MAX_JSON_DEPTH {
            return JsonValue::Null;
        }
        match self {
            HostValue::Undefined | HostValue::Null | HostValue::Function(_) => JsonValue::Null,
            HostValue::Bool(b) => JsonValue::Bool(*b),
            // Integral numbers go out as integers so they deserialize into
            // integer fields.
            HostValue::Number(n) if n.fract() == 0.0 && n.abs() < MAX_SAFE_INTEGER => {
                JsonValue::from(*n as i64)
            }
            HostValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            HostValue::String(s) => JsonValue::String(s.clone()),
            HostValue::Array(items) => {
                JsonValue::Array(items.iter().map(|v| v.to_json_at(depth + 1)).collect())
            }
            HostValue::Object(obj) => {
                let mut map = serde_json::Map::new();
                for key in obj.keys() {
                    match obj.get(&key) {
                        Some(HostValue::Function(_)) | None => {}
                        Some(v) => {
                            map.insert(key, v.to_json_at(depth + 1));
                        }
                    }
                }
                JsonValue::Object(map)
            }
        }
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostValue::Undefined, HostValue::Undefined) => true,
            (HostValue::Null, HostValue::Null) => true,
            (HostValue::Bool(a), HostValue::Bool(b)) => a == b,
            // SameValueZero: NaN equals NaN, +0 equals -0
            (HostValue::Number(a), HostValue::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (HostValue::String(a), HostValue::String(b)) => a == b,
            (HostValue::Array(a), HostValue::Array(b)) => Arc::ptr_eq(a, b),
            (HostValue::Object(a), HostValue::Object(b)) => a == b,
            (HostValue::Function(a), HostValue::Function(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for HostValue {}

impl Hash for HostValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            HostValue::Undefined | HostValue::Null => {}
            HostValue::Bool(b) => b.hash(state),
            HostValue::Number(n) => {
                let bits = if *n == 0.0 {
                    0u64
                } else if n.is_nan() {
                    f64::NAN.to_bits()
                } else {
                    n.to_bits()
                };
                bits.hash(state);
            }
            HostValue::String(s) => s.hash(state),
            HostValue::Array(items) => (Arc::as_ptr(items) as usize).hash(state),
            HostValue::Object(obj) => obj.hash(state),
            HostValue::Function(f) => f.identity().hash(state),
        }
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        HostValue::Number(n)
    }
}

impl From<i64> for HostValue {
    fn from(n: i64) -> Self {
        HostValue::Number(n as f64)
    }
}

impl From<u32> for HostValue {
    fn from(n: u32) -> Self {
        HostValue::Number(f64::from(n))
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::String(s)
    }
}

impl From<Vec<HostValue>> for HostValue {
    fn from(items: Vec<HostValue>) -> Self {
        HostValue::array(items)
    }
}

impl From<HostObject> for HostValue {
    fn from(obj: HostObject) -> Self {
        HostValue::Object(obj)
    }
}

impl From<PlainObject> for HostValue {
    fn from(obj: PlainObject) -> Self {
        HostValue::Object(obj.into_host())
    }
}

impl From<HostFunction> for HostValue {
    fn from(f: HostFunction) -> Self {
        HostValue::Function(f)
    }
}

impl From<JsonValue> for HostValue {
    fn from(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => HostValue::Null,
            JsonValue::Bool(b) => HostValue::Bool(b),
            JsonValue::Number(n) => n.as_f64().map(HostValue::Number).unwrap_or(HostValue::Null),
            JsonValue::String(s) => HostValue::String(s),
            JsonValue::Array(items) => {
                HostValue::array(items.into_iter().map(HostValue::from).collect())
            }
            JsonValue::Object(map) => {
                let mut obj = PlainObject::new();
                for (k, v) in map {
                    obj = obj.with(&k, HostValue::from(v));
                }
                HostValue::Object(obj.into_host())
            }
        }
    }
}

/// Ordered, mutable object with optional callable members.
#[derive(Debug, Default)]
pub struct PlainObject {
    fields: RwLock<Vec<(String, HostValue)>>,
}

impl PlainObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field assignment.
    pub fn with(self, field: &str, value: impl Into<HostValue>) -> Self {
        self.assign(field, value.into());
        self
    }

    /// Builder-style callable member.
    pub fn method<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&[HostValue]) -> Result<HostValue, ProbeError> + Send + Sync + 'static,
    {
        self.with(name, HostFunction::new(name, f))
    }

    pub fn into_host(self) -> HostObject {
        HostObject::new(self)
    }

    fn assign(&self, field: &str, value: HostValue) {
        let mut fields = self.fields.write().unwrap_or_else(|e| e.into_inner());
        match fields.iter_mut().find(|(k, _)| k == field) {
            Some(slot) => slot.1 = value,
            None => fields.push((field.to_string(), value)),
        }
    }
}

impl HostObjectImpl for PlainObject {
    fn get(&self, field: &str) -> Option<HostValue> {
        let fields = self.fields.read().unwrap_or_else(|e| e.into_inner());
        fields
            .iter()
            .find(|(k, _)| k == field)
            .map(|(_, v)| v.clone())
    }

    fn keys(&self) -> Vec<String> {
        let fields = self.fields.read().unwrap_or_else(|e| e.into_inner());
        fields.iter().map(|(k, _)| k.clone()).collect()
    }

    fn set(&self, field: &str, value: HostValue) -> Result<(), ProbeError> {
        self.assign(field, value);
        Ok(())
    }
}
