//! The unified page tree and the rendered observation handed to the LM.

use std::collections::{BTreeMap, HashMap};

use openbrowser_core_types::Rect;
use serde::{Deserialize, Serialize};

/// Node kind in the unified tree.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Element,
    Text,
}

/// One node of the merged DOM/accessibility tree.
///
/// Nodes live in the [`PageTree`] arena and reference children and parent
/// by index, so the tree is acyclic by construction and parentage never
/// leaks into the public rendering API.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PageTreeNode {
    pub tag: String,
    pub node_type: NodeType,
    pub attributes: HashMap<String, String>,
    pub children: Vec<usize>,
    pub parent: Option<usize>,
    /// Text content for text nodes.
    pub text: Option<String>,
    pub rect: Option<Rect>,
    pub visible: bool,
    pub role: Option<String>,
    pub aria_label: Option<String>,
    pub expanded: Option<bool>,
    pub interactive: bool,
    pub clickable: bool,
    pub editable: bool,
    pub scrollable: bool,
    /// ElementRef assigned during rendering; only interactive survivors
    /// carry one.
    pub highlight_index: Option<u32>,
    pub backend_node_id: Option<i64>,
    pub css_selector: Option<String>,
    pub xpath: Option<String>,
    pub paint_order: Option<i64>,
}

impl PageTreeNode {
    pub fn element(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            node_type: NodeType::Element,
            attributes: HashMap::new(),
            children: Vec::new(),
            parent: None,
            text: None,
            rect: None,
            visible: false,
            role: None,
            aria_label: None,
            expanded: None,
            interactive: false,
            clickable: false,
            editable: false,
            scrollable: false,
            highlight_index: None,
            backend_node_id: None,
            css_selector: None,
            xpath: None,
            paint_order: None,
        }
    }

    pub fn text_node(content: impl Into<String>) -> Self {
        let mut node = Self::element("#text");
        node.node_type = NodeType::Text;
        node.text = Some(content.into());
        node
    }

    /// Stable identity used for the new-element baseline across snapshots.
    pub fn identity_key(&self) -> String {
        match self.backend_node_id {
            Some(id) => format!("b:{id}"),
            None => format!(
                "s:{}",
                self.css_selector.as_deref().unwrap_or(self.tag.as_str())
            ),
        }
    }
}

/// Arena-allocated tree rooted at the document element.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PageTree {
    pub nodes: Vec<PageTreeNode>,
    pub root: usize,
}

impl PageTree {
    pub fn node(&self, index: usize) -> &PageTreeNode {
        &self.nodes[index]
    }

    /// Depth-first pre-order walk from the root.
    pub fn walk(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(index) = stack.pop() {
            order.push(index);
            for child in self.nodes[index].children.iter().rev() {
                stack.push(*child);
            }
        }
        order
    }
}

/// Selector information backing one ElementRef.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectorEntry {
    pub css_selector: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_node_id: Option<i64>,
    pub tag_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Dense ElementRef -> selector mapping; keys are `0..n-1` by
/// construction.
pub type SelectorIndex = BTreeMap<u32, SelectorEntry>;

/// Interactive element that was culled for being outside the expanded
/// viewport, kept for the off-screen appendix.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OffscreenElement {
    pub tag_name: String,
    pub label: String,
    /// Negative is above the viewport, positive below, in pages.
    pub pages_away: f64,
}

/// The serializable observation handed to the LM; a value, produced
/// fresh per extract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RenderedPageState {
    pub tree: String,
    pub selector_map: SelectorIndex,
    pub element_count: u32,
    pub interactive_element_count: u32,
    pub scroll_position: (f64, f64),
    pub viewport_size: (f64, f64),
    pub document_size: (f64, f64),
    pub pixels_above: f64,
    pub pixels_below: f64,
}

impl RenderedPageState {
    /// Every ElementRef printed into `tree` must resolve in the map.
    pub fn selector_for(&self, index: u32) -> Option<&SelectorEntry> {
        self.selector_map.get(&index)
    }
}
