//! Process-wide record of discovered host objects
//!
//! One slot per target shape. A slot is written at most once: the first capture
//! wins and later candidates, however plausible, are refused. Nothing clears it.

use crate::errors::ProbeError;
use crate::intercept::MapHandle;
use crate::value::HostObject;
use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

static GLOBAL_REGISTRY: Lazy<Arc<DiscoveryRegistry>> =
    Lazy::new(|| Arc::new(DiscoveryRegistry::new()));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    #[serde(rename = "pixelMap")]
    PixelMap,
    #[serde(rename = "user")]
    User,
    #[serde(rename = "mapContext")]
    MapContext,
}

impl Slot {
    pub const ALL: [Slot; 3] = [Slot::PixelMap, Slot::User, Slot::MapContext];

    pub fn name(self) -> &'static str {
        match self {
            Slot::PixelMap => "pixelMap",
            Slot::User => "user",
            Slot::MapContext => "mapContext",
        }
    }

    fn index(self) -> usize {
        match self {
            Slot::PixelMap => 0,
            Slot::User => 1,
            Slot::MapContext => 2,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A discovered reference.
#[derive(Debug, Clone)]
pub enum Capture {
    /// The pixel-edit container itself.
    PixelMap(MapHandle),
    Object(HostObject),
}

impl Capture {
    fn fits(&self, slot: Slot) -> bool {
        matches!(
            (self, slot),
            (Capture::PixelMap(_), Slot::PixelMap)
                | (Capture::Object(_), Slot::User | Slot::MapContext)
        )
    }
}

/// Which slots are filled, for display and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub pixel_map: bool,
    pub user: bool,
    pub map_context: bool,
}

#[derive(Default)]
pub struct DiscoveryRegistry {
    slots: [OnceCell<Capture>; 3],
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by the whole process.
    pub fn global() -> Arc<DiscoveryRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    /// Store `value` in `slot` if the slot is empty. Returns whether it was
    /// stored; an occupied slot is left untouched.
    #[instrument(level = "debug", skip(self, value))]
    pub fn try_capture(&self, slot: Slot, value: Capture) -> bool {
        if !value.fits(slot) {
            warn!(%slot, "Refusing capture of the wrong kind for slot");
            return false;
        }
        match self.slots[slot.index()].set(value) {
            Ok(()) => {
                info!(%slot, "Captured");
                true
            }
            Err(_) => {
                debug!(%slot, "Slot already captured, keeping the first value");
                false
            }
        }
    }

    pub fn get(&self, slot: Slot) -> Option<&Capture> {
        self.slots[slot.index()].get()
    }

    pub fn is_captured(&self, slot: Slot) -> bool {
        self.get(slot).is_some()
    }

    pub fn pixel_map(&self) -> Option<&MapHandle> {
        match self.get(Slot::PixelMap) {
            Some(Capture::PixelMap(handle)) => Some(handle),
            _ => None,
        }
    }

    pub fn user(&self) -> Option<&HostObject> {
        self.object(Slot::User)
    }

    pub fn map_context(&self) -> Option<&HostObject> {
        self.object(Slot::MapContext)
    }

    pub fn require_pixel_map(&self) -> Result<&MapHandle, ProbeError> {
        self.pixel_map().ok_or(ProbeError::NotReady(Slot::PixelMap))
    }

    pub fn require_user(&self) -> Result<&HostObject, ProbeError> {
        self.user().ok_or(ProbeError::NotReady(Slot::User))
    }

    pub fn require_map_context(&self) -> Result<&HostObject, ProbeError> {
        self.map_context().ok_or(ProbeError::NotReady(Slot::MapContext))
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            pixel_map: self.is_captured(Slot::PixelMap),
            user: self.is_captured(Slot::User),
            map_context: self.is_captured(Slot::MapContext),
        }
    }

    /// Poll until `slot` is captured, checking every `interval` at most
    /// `max_attempts` times.
    #[instrument(level = "debug", skip(self))]
    pub async fn wait_for(
        &self,
        slot: Slot,
        interval: Duration,
        max_attempts: u32,
    ) -> Result<Capture, ProbeError> {
        for attempt in 0..max_attempts {
            if let Some(capture) = self.get(slot) {
                debug!(%slot, attempt, "Slot ready");
                return Ok(capture.clone());
            }
            tokio::time::sleep(interval).await;
        }
        self.get(slot).cloned().ok_or_else(|| {
            ProbeError::Timeout(format!(
                "slot {slot} not captured after {max_attempts} polls of {interval:?}"
            ))
        })
    }

    fn object(&self, slot: Slot) -> Option<&HostObject> {
        match self.get(slot) {
            Some(Capture::Object(obj)) => Some(obj),
            _ => None,
        }
    }
}

impl fmt::Debug for DiscoveryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryRegistry")
            .field("slots", &self.snapshot())
            .finish()
    }
}
