//! In-process document tree
//!
//! Records every native click and dispatched event in one shared, ordered log
//! so that a whole interaction can be checked after the fact.

use super::{CssSelector, Document, DomElement, ElementImpl, MouseEventInit, Rect};
use crate::errors::ProbeError;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use tracing::trace;

type EventLog = Arc<Mutex<Vec<DomEvent>>>;
type ClickHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum DomEventKind {
    NativeClick,
    Synthetic(MouseEventInit),
}

/// Something that happened to an element of a [`MemoryDocument`].
#[derive(Debug, Clone, PartialEq)]
pub struct DomEvent {
    /// `tag.class.class` of the target
    pub target: String,
    pub kind: DomEventKind,
}

pub struct MemoryNode {
    tag: String,
    classes: Vec<String>,
    rect: RwLock<Rect>,
    children: RwLock<Vec<Arc<MemoryNode>>>,
    on_click: RwLock<Option<ClickHandler>>,
    log: EventLog,
}

impl MemoryNode {
    fn new(tag: &str, classes: &[&str], rect: Rect, log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            tag: tag.to_ascii_lowercase(),
            classes: classes.iter().map(|c| c.to_string()).collect(),
            rect: RwLock::new(rect),
            children: RwLock::new(Vec::new()),
            on_click: RwLock::new(None),
            log,
        })
    }

    pub fn label(&self) -> String {
        std::iter::once(self.tag.as_str())
            .chain(self.classes.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn set_rect(&self, rect: Rect) {
        *self.rect.write().unwrap_or_else(|e| e.into_inner()) = rect;
    }

    /// Run `handler` after every native click on this node.
    pub fn on_click(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self.on_click.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(handler));
    }

    fn children(&self) -> Vec<Arc<MemoryNode>> {
        self.children
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record(&self, kind: DomEventKind) {
        trace!(element = %self.label(), ?kind, "Recording DOM event");
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(DomEvent {
                target: self.label(),
                kind,
            });
    }

    /// Depth-first, document-order search below `node`. `chain` holds the
    /// ancestors of `node`'s children, outermost first.
    fn find(
        node: &Arc<MemoryNode>,
        selector: &CssSelector,
        chain: &mut Vec<Arc<MemoryNode>>,
    ) -> Option<Arc<MemoryNode>> {
        for child in node.children() {
            chain.push(child.clone());
            let matched = {
                let view: Vec<(&str, &[String])> = chain
                    .iter()
                    .map(|n| (n.tag.as_str(), n.classes.as_slice()))
                    .collect();
                selector.matches_chain(&view)
            };
            if matched {
                chain.pop();
                return Some(child);
            }
            if let Some(found) = Self::find(&child, selector, chain) {
                chain.pop();
                return Some(found);
            }
            chain.pop();
        }
        None
    }

    fn contains(&self, target: &Arc<MemoryNode>) -> bool {
        self.children()
            .iter()
            .any(|c| Arc::ptr_eq(c, target) || c.contains(target))
    }
}

impl fmt::Debug for MemoryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryNode")
            .field("label", &self.label())
            .field("children", &self.children().len())
            .finish()
    }
}

#[derive(Debug)]
struct MemoryElement {
    node: Arc<MemoryNode>,
}

impl ElementImpl for MemoryElement {
    fn tag_name(&self) -> String {
        self.node.tag.to_ascii_uppercase()
    }

    fn bounding_client_rect(&self) -> Rect {
        *self.node.rect.read().unwrap_or_else(|e| e.into_inner())
    }

    fn click(&self) -> Result<(), ProbeError> {
        self.node.record(DomEventKind::NativeClick);
        let handler = self
            .node
            .on_click
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(handler) = handler {
            handler();
        }
        Ok(())
    }

    fn dispatch_event(&self, event: &MouseEventInit) -> Result<bool, ProbeError> {
        self.node.record(DomEventKind::Synthetic(event.clone()));
        Ok(true)
    }

    fn query_selector(&self, selector: &CssSelector) -> Option<DomElement> {
        let mut chain = vec![self.node.clone()];
        MemoryNode::find(&self.node, selector, &mut chain)
            .map(|node| DomElement::new(MemoryElement { node }))
    }
}

/// Mutable in-memory document.
pub struct MemoryDocument {
    root: Arc<MemoryNode>,
    page_offset: RwLock<(f64, f64)>,
    log: EventLog,
}

impl MemoryDocument {
    pub fn new() -> Self {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        Self {
            root: MemoryNode::new("body", &[], Rect::default(), log.clone()),
            page_offset: RwLock::new((0.0, 0.0)),
            log,
        }
    }

    /// Append an element under `parent` (the body when `None`).
    pub fn append(
        &self,
        parent: Option<&Arc<MemoryNode>>,
        tag: &str,
        classes: &[&str],
        rect: Rect,
    ) -> Arc<MemoryNode> {
        let node = MemoryNode::new(tag, classes, rect, self.log.clone());
        let parent = parent.unwrap_or(&self.root);
        parent
            .children
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(node.clone());
        node
    }

    /// Detach `node` from wherever it sits in the tree.
    pub fn remove(&self, node: &Arc<MemoryNode>) -> bool {
        fn detach(parent: &Arc<MemoryNode>, target: &Arc<MemoryNode>) -> bool {
            let mut children = parent.children.write().unwrap_or_else(|e| e.into_inner());
            if let Some(pos) = children.iter().position(|c| Arc::ptr_eq(c, target)) {
                children.remove(pos);
                return true;
            }
            let snapshot = children.clone();
            drop(children);
            snapshot.iter().any(|c| detach(c, target))
        }
        detach(&self.root, node)
    }

    pub fn contains(&self, node: &Arc<MemoryNode>) -> bool {
        self.root.contains(node)
    }

    pub fn set_page_offset(&self, x: f64, y: f64) {
        *self.page_offset.write().unwrap_or_else(|e| e.into_inner()) = (x, y);
    }

    /// Everything recorded so far, in order.
    pub fn events(&self) -> Vec<DomEvent> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn synthetic_events(&self) -> Vec<MouseEventInit> {
        self.events()
            .into_iter()
            .filter_map(|e| match e.kind {
                DomEventKind::Synthetic(init) => Some(init),
                DomEventKind::NativeClick => None,
            })
            .collect()
    }
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl Document for MemoryDocument {
    fn query_selector(&self, selector: &CssSelector) -> Option<DomElement> {
        let mut chain = Vec::new();
        MemoryNode::find(&self.root, selector, &mut chain)
            .map(|node| DomElement::new(MemoryElement { node }))
    }

    fn page_offset(&self) -> (f64, f64) {
        *self.page_offset.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for MemoryDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDocument")
            .field("root", &self.root)
            .finish()
    }
}
