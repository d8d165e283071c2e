//! Runtime object discovery and action sequencing for the wplace canvas
//!
//! The host page offers no API, so this crate finds what it needs by watching the
//! host's own generic containers: values written through instrumented maps are
//! tested against structural predicates and the first match per target shape is
//! kept in a process-wide registry. Separately, a timed sequence drives the
//! page's controls to place a pixel at the canvas corner and erase it again.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use wplace_probe::{DiscoveryRegistry, Engine, EngineConfig, HostValue, PlainObject};
//!
//! let registry = Arc::new(DiscoveryRegistry::new());
//! let engine = Engine::new(EngineConfig::default(), registry.clone())?;
//!
//! let pixels = engine.layer().new_map();
//! let record = PlainObject::new().with("color", PlainObject::new().with("r", 0.0));
//! pixels.set(HostValue::from("t=(1611,875);p=(313,795);s=0"), record.into());
//!
//! assert!(registry.pixel_map().is_some());
//! assert!(!pixels.is_hooked());
//! # Ok::<(), wplace_probe::ProbeError>(())
//! ```

pub mod config;
pub mod coords;
pub mod dom;
pub mod engine;
pub mod errors;
pub mod intercept;
pub mod navigation;
pub mod registry;
pub mod sequencer;
pub mod shape;
#[cfg(test)]
mod tests;
pub mod value;

pub use config::{EngineConfig, InterceptConfig, NavigationConfig, SequencerConfig};
pub use coords::{GlobalPixel, PixelCoord, PixelKey, PixelRecord, Rgba, TileCoord, TILE_SIZE};
pub use dom::{CssSelector, Document, DomElement, ElementImpl, MemoryDocument, MouseEventInit, Rect};
pub use engine::Engine;
pub use errors::ProbeError;
pub use intercept::{
    ContainerKind, HookPoint, HookState, InstrumentedMap, InstrumentedWeakMap, InterceptedWrite,
    InterceptionLayer, MapHandle, Observation, WriteObserver,
};
pub use navigation::{LatLng, Navigator};
pub use registry::{Capture, DiscoveryRegistry, RegistrySnapshot, Slot};
pub use sequencer::{
    AbortReason, ActionSequencer, ActionStep, Outcome, SequenceReport, SequenceState, Tick,
};
pub use shape::{Candidate, ShapeClassifier, ShapePredicate, ShapeProfile, Verdict};
pub use value::{HostFunction, HostObject, HostObjectImpl, HostValue, PlainObject};

/// Install a formatting subscriber filtered by `RUST_LOG` (default `info`).
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .try_init();
}
