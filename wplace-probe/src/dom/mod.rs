//! Host document seam
//!
//! The sequencer only needs a handful of document operations: find an element
//! by a class-based selector, read its bounding box, click it, and dispatch a
//! synthetic pointer event at it. Embeddings implement [`Document`] and
//! [`ElementImpl`] over the live page; [`memory::MemoryDocument`] is an
//! in-process tree used for replays and tests.

use crate::errors::ProbeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

pub mod memory;

pub use memory::{DomEvent, DomEventKind, MemoryDocument, MemoryNode};

/// Viewport-relative bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }
}

/// Initialisation record of a synthetic mouse event, field names as the host
/// expects them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MouseEventInit {
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event is bound to the page's window
    pub view: bool,
    pub bubbles: bool,
    pub cancelable: bool,
    pub client_x: f64,
    pub client_y: f64,
    pub screen_x: f64,
    pub screen_y: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub page_x: f64,
    pub page_y: f64,
    pub button: i16,
    pub buttons: u16,
    pub detail: i32,
}

impl MouseEventInit {
    /// Primary-button click addressed at the top-left corner of `rect`.
    pub fn click_at_top_left(rect: &Rect, page_offset: (f64, f64)) -> Self {
        Self {
            event_type: "click".to_string(),
            view: true,
            bubbles: true,
            cancelable: true,
            client_x: rect.left,
            client_y: rect.top,
            screen_x: rect.left,
            screen_y: rect.top,
            offset_x: 0.0,
            offset_y: 0.0,
            page_x: rect.left + page_offset.0,
            page_y: rect.top + page_offset.1,
            button: 0,
            buttons: 1,
            detail: 1,
        }
    }
}

/// One `tag.class.class` step of a selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Compound {
    pub tag: Option<String>,
    pub classes: Vec<String>,
}

impl Compound {
    pub fn matches(&self, tag: &str, classes: &[String]) -> bool {
        if let Some(expected) = &self.tag {
            if !expected.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        self.classes.iter().all(|c| classes.contains(c))
    }
}

/// Class-based CSS selector: compounds joined by descendant combinators.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CssSelector {
    source: String,
    compounds: Vec<Compound>,
}

impl CssSelector {
    pub fn parse(source: &str) -> Result<Self, ProbeError> {
        let compounds = source
            .split_whitespace()
            .map(Self::parse_compound)
            .collect::<Result<Vec<_>, _>>()?;
        if compounds.is_empty() {
            return Err(ProbeError::InvalidSelector("empty selector".into()));
        }
        Ok(Self {
            source: source.trim().to_string(),
            compounds,
        })
    }

    fn parse_compound(part: &str) -> Result<Compound, ProbeError> {
        let mut pieces = part.split('.');
        let tag = pieces.next().unwrap_or_default();
        let tag = if tag.is_empty() {
            None
        } else {
            Some(tag.to_ascii_lowercase())
        };
        let classes: Vec<String> = pieces.map(str::to_string).collect();

        let valid_ident = |s: &str| {
            !s.is_empty()
                && s
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        };
        if tag.as_deref().is_some_and(|t| !valid_ident(t))
            || !classes.iter().all(|c| valid_ident(c))
        {
            return Err(ProbeError::InvalidSelector(format!(
                "unsupported selector step `{part}`"
            )));
        }
        if tag.is_none() && classes.is_empty() {
            return Err(ProbeError::InvalidSelector(format!("empty step in `{part}`")));
        }
        Ok(Compound { tag, classes })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn compounds(&self) -> &[Compound] {
        &self.compounds
    }

    /// Whether the last element of `chain` (outermost first) matches, with the
    /// remaining compounds matched by its ancestors in order.
    pub fn matches_chain(&self, chain: &[(&str, &[String])]) -> bool {
        let Some(((tag, classes), ancestors)) = chain.split_last() else {
            return false;
        };
        let Some((last, outer)) = self.compounds.split_last() else {
            return false;
        };
        if !last.matches(tag, classes) {
            return false;
        }
        let mut remaining = outer.iter().rev().peekable();
        for (tag, classes) in ancestors.iter().rev() {
            match remaining.peek() {
                Some(compound) if compound.matches(tag, classes) => {
                    remaining.next();
                }
                Some(_) => {}
                None => break,
            }
        }
        remaining.peek().is_none()
    }
}

impl fmt::Display for CssSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Backing implementation of a document element.
pub trait ElementImpl: Send + Sync + fmt::Debug {
    fn tag_name(&self) -> String;
    fn bounding_client_rect(&self) -> Rect;
    /// Activate the element the way the host's own controls are activated.
    fn click(&self) -> Result<(), ProbeError>;
    /// Returns `false` when a handler cancelled the event.
    fn dispatch_event(&self, event: &MouseEventInit) -> Result<bool, ProbeError>;
    fn query_selector(&self, selector: &CssSelector) -> Option<DomElement>;
}

#[derive(Clone, Debug)]
pub struct DomElement {
    inner: Arc<dyn ElementImpl>,
}

impl DomElement {
    pub fn new(inner: impl ElementImpl + 'static) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn tag_name(&self) -> String {
        self.inner.tag_name()
    }

    pub fn bounding_client_rect(&self) -> Rect {
        self.inner.bounding_client_rect()
    }

    #[instrument(level = "debug", skip(self), fields(tag = %self.tag_name()))]
    pub fn click(&self) -> Result<(), ProbeError> {
        self.inner.click()
    }

    #[instrument(level = "debug", skip(self, event), fields(tag = %self.tag_name()))]
    pub fn dispatch_event(&self, event: &MouseEventInit) -> Result<bool, ProbeError> {
        debug!(
            x = event.client_x,
            y = event.client_y,
            "Dispatching synthetic {}",
            event.event_type
        );
        self.inner.dispatch_event(event)
    }

    pub fn query_selector(&self, selector: &CssSelector) -> Option<DomElement> {
        self.inner.query_selector(selector)
    }
}

pub trait Document: Send + Sync {
    /// First element in document order matching `selector`.
    fn query_selector(&self, selector: &CssSelector) -> Option<DomElement>;

    /// Current page scroll offset, added to client coordinates for `page{X,Y}`.
    fn page_offset(&self) -> (f64, f64) {
        (0.0, 0.0)
    }
}
