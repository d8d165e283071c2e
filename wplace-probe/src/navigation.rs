//! Coordinate conversion and camera control through captured host objects
//!
//! Everything here reads the registry at call time. An empty slot is reported as
//! [`ProbeError::NotReady`]; callers are expected to retry later, for example
//! with [`DiscoveryRegistry::wait_for`].

use crate::config::NavigationConfig;
use crate::coords::GlobalPixel;
use crate::errors::ProbeError;
use crate::registry::DiscoveryRegistry;
use crate::value::{HostObject, HostValue, PlainObject};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone)]
pub struct Navigator {
    registry: Arc<DiscoveryRegistry>,
    config: NavigationConfig,
}

impl Navigator {
    pub fn new(registry: Arc<DiscoveryRegistry>, config: NavigationConfig) -> Self {
        Self { registry, config }
    }

    /// Convert a global pixel position with `crosshair.gm.pixelsToLatLon`.
    #[instrument(level = "debug", skip(self))]
    pub fn pixels_to_lat_lng(&self, pixel: GlobalPixel) -> Result<LatLng, ProbeError> {
        let ctx = self.registry.require_map_context()?;
        let projection = path(ctx, &["crosshair", "gm"])?;
        let result = projection.call_method(
            "pixelsToLatLon",
            &[
                HostValue::Number(pixel.x as f64),
                HostValue::Number(pixel.y as f64),
                HostValue::from(self.config.pixel_zoom),
            ],
        )?;
        match (
            result.at(0).and_then(|v| v.as_f64()),
            result.at(1).and_then(|v| v.as_f64()),
        ) {
            (Some(lat), Some(lng)) => Ok(LatLng { lat, lng }),
            _ => Err(ProbeError::ShapeMismatch(
                "pixelsToLatLon did not return a [lat, lng] pair".into(),
            )),
        }
    }

    /// Fly the camera to a global pixel position.
    #[instrument(level = "debug", skip(self))]
    pub fn move_to(&self, pixel: GlobalPixel) -> Result<LatLng, ProbeError> {
        let target = self.pixels_to_lat_lng(pixel)?;
        let map = path(self.registry.require_map_context()?, &["map"])?;
        let center = PlainObject::new()
            .with("lat", target.lat)
            .with("lng", target.lng);
        let options = PlainObject::new()
            .with("center", center)
            .with("zoom", self.config.fly_to_zoom);
        map.call_method("flyTo", &[options.into()])?;
        debug!(lat = target.lat, lng = target.lng, "Camera moved");
        Ok(target)
    }

    /// Toggle the host's tile boundary overlay.
    pub fn show_tile_boundaries(&self, show: bool) -> Result<(), ProbeError> {
        let map = path(self.registry.require_map_context()?, &["map"])?;
        let map = map
            .as_object()
            .ok_or_else(|| ProbeError::ShapeMismatch("map is not an object".into()))?;
        map.set("showTileBoundaries", HostValue::Bool(show))
    }

    /// Whole paint charges currently available to the session.
    pub fn charges(&self) -> Result<i64, ProbeError> {
        let user = self.registry.require_user()?;
        path(user, &["user", "charges"])?
            .as_f64()
            .map(|c| c.trunc() as i64)
            .ok_or_else(|| ProbeError::ShapeMismatch("user.charges is not a number".into()))
    }
}

fn path(root: &HostObject, fields: &[&str]) -> Result<HostValue, ProbeError> {
    let mut current = HostValue::Object(root.clone());
    for field in fields {
        current = current
            .get(field)
            .ok_or_else(|| ProbeError::ShapeMismatch(format!("missing `{}`", fields.join("."))))?;
    }
    Ok(current)
}
