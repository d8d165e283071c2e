//! Timed place-then-erase interaction with the host canvas
//!
//! The sequence is a linear state machine. [`ActionSequencer::tick`] advances
//! exactly one state and says how long to wait before the next tick;
//! [`ActionSequencer::run`] drives the ticks on the tokio timer. Nothing blocks
//! between ticks, and a later step is only reached after the previous step's
//! delay has fully elapsed.
//!
//! ```text
//! Idle → WaitForCanvas → OpenPaintTool → PlaceClick → WaitRenderAfterPlace
//!      → OpenEraseTool → EraseClick → Done
//! ```
//!
//! `Aborted` is reachable from `WaitForCanvas` (poll budget spent), from
//! `OpenPaintTool` (control missing) and from any step whose host call fails.
//! A missing erase control ends the run successfully without erasing.

use crate::config::SequencerConfig;
use crate::dom::{CssSelector, Document, DomElement, MouseEventInit};
use crate::errors::ProbeError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceState {
    Idle,
    WaitForCanvas,
    OpenPaintTool,
    PlaceClick,
    WaitRenderAfterPlace,
    OpenEraseTool,
    EraseClick,
    Done,
    Aborted,
}

impl SequenceState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SequenceState::Done | SequenceState::Aborted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum AbortReason {
    CanvasNeverAppeared { attempts: u32 },
    PaintToolMissing { selector: String },
    HostError { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum Outcome {
    Completed,
    /// Placed, but the erase control was not there.
    CompletedWithoutErase,
    Aborted(AbortReason),
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// Tick again after this long.
    Wait(Duration),
    Finished(Outcome),
}

/// What a step acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepTarget {
    None,
    Selector(String),
    /// Selector of an element nested in a container
    Nested { container: String, element: String },
    /// Top-left corner of the canvas bounding box
    CanvasTopLeft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOperation {
    Start,
    Probe,
    Click,
    DispatchClick,
    Wait,
}

/// One entry of the fixed plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionStep {
    pub state: SequenceState,
    pub target: StepTarget,
    pub operation: StepOperation,
    /// Delay before the next step may run
    pub delay_after: Duration,
}

/// The fixed, linear plan for a configuration.
pub fn plan(config: &SequencerConfig) -> Vec<ActionStep> {
    vec![
        ActionStep {
            state: SequenceState::Idle,
            target: StepTarget::None,
            operation: StepOperation::Start,
            delay_after: Duration::ZERO,
        },
        ActionStep {
            state: SequenceState::WaitForCanvas,
            target: StepTarget::Selector(config.canvas_selector.clone()),
            operation: StepOperation::Probe,
            delay_after: config.settle_after_canvas(),
        },
        ActionStep {
            state: SequenceState::OpenPaintTool,
            target: StepTarget::Selector(config.paint_button_selector.clone()),
            operation: StepOperation::Click,
            delay_after: config.after_paint_tool(),
        },
        ActionStep {
            state: SequenceState::PlaceClick,
            target: StepTarget::CanvasTopLeft,
            operation: StepOperation::DispatchClick,
            delay_after: config.after_place(),
        },
        ActionStep {
            state: SequenceState::WaitRenderAfterPlace,
            target: StepTarget::None,
            operation: StepOperation::Wait,
            delay_after: Duration::ZERO,
        },
        ActionStep {
            state: SequenceState::OpenEraseTool,
            target: StepTarget::Nested {
                container: config.erase_container_selector.clone(),
                element: config.erase_button_selector.clone(),
            },
            operation: StepOperation::Click,
            delay_after: config.after_erase_tool(),
        },
        ActionStep {
            state: SequenceState::EraseClick,
            target: StepTarget::CanvasTopLeft,
            operation: StepOperation::DispatchClick,
            delay_after: Duration::ZERO,
        },
    ]
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceReport {
    pub run_id: Uuid,
    pub outcome: Outcome,
    /// Every state entered, in order, including the terminal one
    pub states: Vec<SequenceState>,
    /// Synthetic events dispatched at the canvas
    pub events: Vec<MouseEventInit>,
    pub poll_attempts: u32,
    pub elapsed_ms: u64,
}

struct Selectors {
    canvas: CssSelector,
    paint_button: CssSelector,
    erase_container: CssSelector,
    erase_button: CssSelector,
}

pub struct ActionSequencer {
    run_id: Uuid,
    config: SequencerConfig,
    selectors: Selectors,
    plan: Vec<ActionStep>,
    state: SequenceState,
    outcome: Option<Outcome>,
    canvas: Option<DomElement>,
    click: Option<MouseEventInit>,
    poll_attempts: u32,
    states: Vec<SequenceState>,
    events: Vec<MouseEventInit>,
}

impl ActionSequencer {
    pub fn new(config: SequencerConfig) -> Result<Self, ProbeError> {
        let selectors = Selectors {
            canvas: CssSelector::parse(&config.canvas_selector)?,
            paint_button: CssSelector::parse(&config.paint_button_selector)?,
            erase_container: CssSelector::parse(&config.erase_container_selector)?,
            erase_button: CssSelector::parse(&config.erase_button_selector)?,
        };
        if config.poll_interval_ms == 0 {
            return Err(ProbeError::Config("poll_interval_ms must be positive".into()));
        }
        Ok(Self {
            run_id: Uuid::new_v4(),
            plan: plan(&config),
            config,
            selectors,
            state: SequenceState::Idle,
            outcome: None,
            canvas: None,
            click: None,
            poll_attempts: 0,
            states: vec![SequenceState::Idle],
            events: Vec::new(),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    pub fn plan(&self) -> &[ActionStep] {
        &self.plan
    }

    pub fn poll_attempts(&self) -> u32 {
        self.poll_attempts
    }

    /// Perform the current state's work and move to the next state.
    pub fn tick(&mut self, document: &dyn Document) -> Tick {
        if let Some(outcome) = &self.outcome {
            return Tick::Finished(outcome.clone());
        }
        let result = match self.state {
            SequenceState::Idle => Ok(self.advance(SequenceState::WaitForCanvas, Duration::ZERO)),
            SequenceState::WaitForCanvas => Ok(self.wait_for_canvas(document)),
            SequenceState::OpenPaintTool => self.open_paint_tool(document),
            SequenceState::PlaceClick => self.place_click(document),
            SequenceState::WaitRenderAfterPlace => Ok(self.advance(
                SequenceState::OpenEraseTool,
                self.delay_after(SequenceState::WaitRenderAfterPlace),
            )),
            SequenceState::OpenEraseTool => self.open_erase_tool(document),
            SequenceState::EraseClick => self.erase_click(),
            SequenceState::Done | SequenceState::Aborted => {
                // Terminal states always carry an outcome.
                Ok(Tick::Finished(Outcome::Completed))
            }
        };
        result.unwrap_or_else(|e| {
            error!(state = ?self.state, error = %e, "Host call failed, aborting sequence");
            self.abort(AbortReason::HostError {
                message: e.to_string(),
            })
        })
    }

    /// Drive the sequence to completion on the tokio timer.
    #[instrument(level = "info", skip_all, fields(run_id = %self.run_id))]
    pub async fn run(mut self, document: &dyn Document) -> SequenceReport {
        let started = tokio::time::Instant::now();
        info!("Starting place/erase sequence");
        loop {
            match self.tick(document) {
                Tick::Wait(delay) => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Tick::Finished(outcome) => {
                    info!(?outcome, "Sequence finished");
                    break;
                }
            }
        }
        self.into_report(started.elapsed())
    }

    /// Run on a background task. There is no way to cancel it once started.
    pub fn spawn(self, document: Arc<dyn Document>) -> JoinHandle<SequenceReport> {
        tokio::spawn(async move { self.run(document.as_ref()).await })
    }

    fn into_report(self, elapsed: Duration) -> SequenceReport {
        SequenceReport {
            run_id: self.run_id,
            outcome: self
                .outcome
                .unwrap_or(Outcome::Aborted(AbortReason::HostError {
                    message: "sequence stopped before finishing".into(),
                })),
            states: self.states,
            events: self.events,
            poll_attempts: self.poll_attempts,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    fn wait_for_canvas(&mut self, document: &dyn Document) -> Tick {
        self.poll_attempts += 1;
        if let Some(canvas) = document.query_selector(&self.selectors.canvas) {
            info!(attempts = self.poll_attempts, "Canvas found");
            self.canvas = Some(canvas);
            return self.advance(
                SequenceState::OpenPaintTool,
                self.delay_after(SequenceState::WaitForCanvas),
            );
        }
        if let Some(max) = self.config.max_poll_attempts {
            if self.poll_attempts >= max {
                warn!(attempts = self.poll_attempts, selector = %self.selectors.canvas, "Canvas never appeared");
                return self.abort(AbortReason::CanvasNeverAppeared {
                    attempts: self.poll_attempts,
                });
            }
        }
        Tick::Wait(self.config.poll_interval())
    }

    fn open_paint_tool(&mut self, document: &dyn Document) -> Result<Tick, ProbeError> {
        let Some(button) = document.query_selector(&self.selectors.paint_button) else {
            error!(selector = %self.selectors.paint_button, "Paint button not found");
            return Ok(self.abort(AbortReason::PaintToolMissing {
                selector: self.selectors.paint_button.to_string(),
            }));
        };
        button.click()?;
        Ok(self.advance(
            SequenceState::PlaceClick,
            self.delay_after(SequenceState::OpenPaintTool),
        ))
    }

    fn place_click(&mut self, document: &dyn Document) -> Result<Tick, ProbeError> {
        let canvas = self.canvas()?;
        let rect = canvas.bounding_client_rect();
        let click = MouseEventInit::click_at_top_left(&rect, document.page_offset());
        canvas.dispatch_event(&click)?;
        self.events.push(click.clone());
        self.click = Some(click);
        Ok(self.advance(
            SequenceState::WaitRenderAfterPlace,
            self.delay_after(SequenceState::PlaceClick),
        ))
    }

    fn open_erase_tool(&mut self, document: &dyn Document) -> Result<Tick, ProbeError> {
        let button = document
            .query_selector(&self.selectors.erase_container)
            .and_then(|container| container.query_selector(&self.selectors.erase_button));
        let Some(button) = button else {
            info!("Erase control not present, leaving the placement in place");
            return Ok(self.finish(Outcome::CompletedWithoutErase));
        };
        button.click()?;
        Ok(self.advance(
            SequenceState::EraseClick,
            self.delay_after(SequenceState::OpenEraseTool),
        ))
    }

    fn erase_click(&mut self) -> Result<Tick, ProbeError> {
        let canvas = self.canvas()?;
        let click = self
            .click
            .clone()
            .ok_or_else(|| ProbeError::Host("no placement click to repeat".into()))?;
        canvas.dispatch_event(&click)?;
        self.events.push(click);
        Ok(self.finish(Outcome::Completed))
    }

    fn canvas(&self) -> Result<DomElement, ProbeError> {
        self.canvas
            .clone()
            .ok_or_else(|| ProbeError::ElementNotFound(self.selectors.canvas.to_string()))
    }

    fn delay_after(&self, state: SequenceState) -> Duration {
        self.plan
            .iter()
            .find(|step| step.state == state)
            .map(|step| step.delay_after)
            .unwrap_or(Duration::ZERO)
    }

    fn advance(&mut self, next: SequenceState, delay: Duration) -> Tick {
        debug!(from = ?self.state, to = ?next, ?delay, "Sequence transition");
        self.state = next;
        self.states.push(next);
        Tick::Wait(delay)
    }

    fn finish(&mut self, outcome: Outcome) -> Tick {
        self.state = SequenceState::Done;
        self.states.push(SequenceState::Done);
        self.outcome = Some(outcome.clone());
        Tick::Finished(outcome)
    }

    fn abort(&mut self, reason: AbortReason) -> Tick {
        self.state = SequenceState::Aborted;
        self.states.push(SequenceState::Aborted);
        let outcome = Outcome::Aborted(reason);
        self.outcome = Some(outcome.clone());
        Tick::Finished(outcome)
    }
}

impl std::fmt::Debug for ActionSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionSequencer")
            .field("run_id", &self.run_id)
            .field("state", &self.state)
            .field("poll_attempts", &self.poll_attempts)
            .finish()
    }
}
