//! Engine configuration
//!
//! Every section has working defaults taken from the live page, so an empty
//! JSON object is a valid configuration. Durations are in milliseconds.

use crate::dom::CssSelector;
use crate::errors::ProbeError;
use crate::intercept::HookPoint;
use crate::shape::ShapeProfile;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable naming a JSON configuration file.
pub const CONFIG_ENV_VAR: &str = "WPLACE_PROBE_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub intercept: InterceptConfig,
    pub sequencer: SequencerConfig,
    pub navigation: NavigationConfig,
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ProbeError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ProbeError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration");
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Load from the file named by `WPLACE_PROBE_CONFIG`, or fall back to
    /// defaults when the variable is unset or the file is unusable.
    pub fn load() -> Self {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) => Self::from_file(&path).unwrap_or_else(|e| {
                warn!(%path, error = %e, "Ignoring unusable configuration file");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ProbeError> {
        self.intercept.validate()?;
        self.sequencer.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptConfig {
    pub shape_profile: ShapeProfile,
    /// Operations of the weakly keyed container that are observed. Some host
    /// builds reach reactive state through lookups rather than inserts.
    pub weak_map_hook_points: Vec<HookPoint>,
}

impl Default for InterceptConfig {
    fn default() -> Self {
        Self {
            shape_profile: ShapeProfile::V1,
            weak_map_hook_points: vec![HookPoint::Insert],
        }
    }
}

impl InterceptConfig {
    fn validate(&self) -> Result<(), ProbeError> {
        if self.weak_map_hook_points.is_empty() {
            return Err(ProbeError::Config(
                "weak_map_hook_points must name at least one operation".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    pub canvas_selector: String,
    pub paint_button_selector: String,
    /// Container of the erase control
    pub erase_container_selector: String,
    /// Erase control, looked up inside the container
    pub erase_button_selector: String,
    pub poll_interval_ms: u64,
    /// `None` polls for the canvas forever.
    pub max_poll_attempts: Option<u32>,
    pub settle_after_canvas_ms: u64,
    pub after_paint_tool_ms: u64,
    pub after_place_ms: u64,
    pub after_erase_tool_ms: u64,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            canvas_selector: ".maplibregl-interactive".to_string(),
            paint_button_selector: "button.btn-lg.relative".to_string(),
            erase_container_selector: "div.tooltip.ml-auto".to_string(),
            erase_button_selector: "button".to_string(),
            poll_interval_ms: 100,
            max_poll_attempts: Some(600),
            settle_after_canvas_ms: 1000,
            after_paint_tool_ms: 500,
            after_place_ms: 300,
            after_erase_tool_ms: 200,
        }
    }
}

impl SequencerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_after_canvas(&self) -> Duration {
        Duration::from_millis(self.settle_after_canvas_ms)
    }

    pub fn after_paint_tool(&self) -> Duration {
        Duration::from_millis(self.after_paint_tool_ms)
    }

    pub fn after_place(&self) -> Duration {
        Duration::from_millis(self.after_place_ms)
    }

    pub fn after_erase_tool(&self) -> Duration {
        Duration::from_millis(self.after_erase_tool_ms)
    }

    /// Sum of the fixed delays of a full run, excluding canvas polling.
    pub fn total_fixed_delay(&self) -> Duration {
        self.settle_after_canvas()
            + self.after_paint_tool()
            + self.after_place()
            + self.after_erase_tool()
    }

    fn validate(&self) -> Result<(), ProbeError> {
        if self.poll_interval_ms == 0 {
            return Err(ProbeError::Config("poll_interval_ms must be positive".into()));
        }
        if self.max_poll_attempts == Some(0) {
            return Err(ProbeError::Config(
                "max_poll_attempts must be positive or null".into(),
            ));
        }
        for selector in [
            &self.canvas_selector,
            &self.paint_button_selector,
            &self.erase_container_selector,
            &self.erase_button_selector,
        ] {
            CssSelector::parse(selector)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    /// Zoom level at which global pixel coordinates are defined.
    pub pixel_zoom: u32,
    /// Camera zoom used by `move_to`.
    pub fly_to_zoom: u32,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            pixel_zoom: 11,
            fly_to_zoom: 14,
        }
    }
}
