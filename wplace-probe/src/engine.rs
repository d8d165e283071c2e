use crate::config::EngineConfig;
use crate::errors::ProbeError;
use crate::intercept::{
    ContainerKind, ContainerRef, HookPoint, InterceptedWrite, InterceptionLayer, Observation,
    WriteObserver,
};
use crate::navigation::Navigator;
use crate::registry::{Capture, DiscoveryRegistry, Slot};
use crate::sequencer::ActionSequencer;
use crate::shape::{reactive_scopes, Candidate, ShapeClassifier};
use std::sync::Arc;
use tracing::{info, instrument, trace};

/// Slots fed by the weakly keyed container.
const SCOPE_SLOTS: [Slot; 2] = [Slot::User, Slot::MapContext];

/// Captures the keyed map that pixel edits are written to.
struct PixelMapObserver {
    classifier: Arc<ShapeClassifier>,
    registry: Arc<DiscoveryRegistry>,
}

impl WriteObserver for PixelMapObserver {
    fn observe(&self, write: &InterceptedWrite<'_>) -> Observation {
        if self.registry.is_captured(Slot::PixelMap) {
            return Observation::Restore;
        }
        let (Some(value), ContainerRef::Map(handle)) = (write.value, write.container) else {
            return Observation::Continue;
        };
        let candidate = Candidate::new(Some(write.key), value);
        if !self.classifier.classify(Slot::PixelMap, &candidate).is_match() {
            return Observation::Continue;
        }
        if self
            .registry
            .try_capture(Slot::PixelMap, Capture::PixelMap(handle.clone()))
        {
            info!("Pixel map hooked");
        }
        Observation::Restore
    }
}

/// Captures the user and map-context component scopes reachable from weakly
/// keyed entries.
struct ScopeObserver {
    classifier: Arc<ShapeClassifier>,
    registry: Arc<DiscoveryRegistry>,
}

impl ScopeObserver {
    fn pending(&self) -> Vec<Slot> {
        SCOPE_SLOTS
            .into_iter()
            .filter(|slot| !self.registry.is_captured(*slot))
            .collect()
    }
}

impl WriteObserver for ScopeObserver {
    fn observe(&self, write: &InterceptedWrite<'_>) -> Observation {
        if self.pending().is_empty() {
            return Observation::Restore;
        }
        let Some(scopes) = reactive_scopes(write.key) else {
            trace!(point = ?write.point, "Key has no reactive scopes");
            return Observation::Continue;
        };
        for scope in &scopes {
            let Some(object) = scope.as_object() else {
                continue;
            };
            // A scope is at most one thing.
            for slot in self.pending() {
                if self
                    .classifier
                    .classify(slot, &Candidate::value(scope))
                    .is_match()
                {
                    if self.registry.try_capture(slot, Capture::Object(object.clone())) {
                        info!(%slot, "Scope hooked");
                    }
                    break;
                }
            }
        }
        if self.pending().is_empty() {
            Observation::Restore
        } else {
            Observation::Continue
        }
    }
}

/// Interception layer, classifier and registry wired together.
pub struct Engine {
    config: EngineConfig,
    layer: InterceptionLayer,
    classifier: Arc<ShapeClassifier>,
    registry: Arc<DiscoveryRegistry>,
}

impl Engine {
    #[instrument(skip_all)]
    pub fn new(config: EngineConfig, registry: Arc<DiscoveryRegistry>) -> Result<Self, ProbeError> {
        config.validate()?;
        let classifier = Arc::new(ShapeClassifier::new(config.intercept.shape_profile));
        let layer = InterceptionLayer::new();

        layer.install(
            ContainerKind::KeyedMap,
            &[HookPoint::Insert],
            Arc::new(PixelMapObserver {
                classifier: classifier.clone(),
                registry: registry.clone(),
            }),
        );
        layer.install(
            ContainerKind::WeakKeyedMap,
            &config.intercept.weak_map_hook_points,
            Arc::new(ScopeObserver {
                classifier: classifier.clone(),
                registry: registry.clone(),
            }),
        );
        info!(
            profile = ?config.intercept.shape_profile,
            weak_points = ?config.intercept.weak_map_hook_points,
            "Interception installed"
        );

        Ok(Self {
            config,
            layer,
            classifier,
            registry,
        })
    }

    /// Engine over the process-wide registry, configured from the environment.
    pub fn install_default() -> Result<Self, ProbeError> {
        Self::new(EngineConfig::load(), DiscoveryRegistry::global())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Factory for the instrumented containers handed to the host.
    pub fn layer(&self) -> &InterceptionLayer {
        &self.layer
    }

    pub fn classifier(&self) -> &ShapeClassifier {
        &self.classifier
    }

    pub fn registry(&self) -> &Arc<DiscoveryRegistry> {
        &self.registry
    }

    pub fn navigator(&self) -> Navigator {
        Navigator::new(self.registry.clone(), self.config.navigation.clone())
    }

    pub fn sequencer(&self) -> Result<ActionSequencer, ProbeError> {
        ActionSequencer::new(self.config.sequencer.clone())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("layer", &self.layer)
            .field("registry", &self.registry)
            .finish()
    }
}
