//! Snapshot builder: decodes the string-table-compressed
//! `DOMSnapshot.captureSnapshot` payload, merges accessibility attributes
//! onto it and produces the unified [`PageTree`].

use std::collections::HashMap;

use openbrowser_core_types::Rect;
use openbrowser_viewport::Browser;
use serde_json::Value;
use tracing::debug;

use crate::errors::PerceptionError;
use crate::model::{NodeType, PageTree, PageTreeNode};

const INTERACTIVE_TAGS: &[&str] = &[
    "a", "button", "input", "select", "textarea", "details", "summary", "label", "option",
];

const INTERACTIVE_ROLES: &[&str] = &[
    "button",
    "link",
    "checkbox",
    "radio",
    "textbox",
    "combobox",
    "listbox",
    "option",
    "menuitem",
    "menuitemcheckbox",
    "menuitemradio",
    "tab",
    "switch",
    "slider",
    "spinbutton",
    "searchbox",
    "gridcell",
    "treeitem",
];

#[derive(Clone, Debug)]
pub struct SnapshotBuilder {
    /// Bound on same-document iframes folded into the tree.
    pub max_iframes: usize,
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self { max_iframes: 5 }
    }
}

#[derive(Clone, Debug, Default)]
struct AxInfo {
    role: Option<String>,
    name: Option<String>,
    expanded: Option<bool>,
}

impl SnapshotBuilder {
    pub fn new(max_iframes: usize) -> Self {
        Self { max_iframes }
    }

    /// Issue the two CDP snapshots concurrently and build the tree.
    pub async fn capture(&self, browser: &dyn Browser) -> Result<PageTree, PerceptionError> {
        let (dom, ax) = tokio::join!(browser.dom_snapshot(), browser.ax_snapshot());
        self.build(&dom?, &ax?)
    }

    /// Pure decode of the raw CDP payloads.
    pub fn build(&self, dom: &Value, ax: &Value) -> Result<PageTree, PerceptionError> {
        let strings: Vec<String> = dom
            .get("strings")
            .and_then(Value::as_array)
            .ok_or_else(|| PerceptionError::malformed("missing strings table"))?
            .iter()
            .map(|v| v.as_str().unwrap_or_default().to_string())
            .collect();

        let documents = dom
            .get("documents")
            .and_then(Value::as_array)
            .ok_or_else(|| PerceptionError::malformed("missing documents"))?;
        if documents.is_empty() {
            return Err(PerceptionError::malformed("snapshot has no documents"));
        }

        let ax_index = build_ax_index(ax);

        let mut arena: Vec<PageTreeNode> = Vec::new();
        let mut iframe_budget = self.max_iframes;
        let root = self
            .build_document(&documents[0], documents, &strings, &ax_index, &mut arena, &mut iframe_budget)?
            .ok_or_else(|| PerceptionError::malformed("document has no root element"))?;

        let mut tree = PageTree { nodes: arena, root };
        assign_selectors(&mut tree);
        debug!(
            target: "perception-snapshot",
            nodes = tree.nodes.len(),
            "snapshot decoded"
        );
        Ok(tree)
    }

    fn build_document(
        &self,
        doc: &Value,
        documents: &[Value],
        strings: &[String],
        ax_index: &HashMap<i64, AxInfo>,
        arena: &mut Vec<PageTreeNode>,
        iframe_budget: &mut usize,
    ) -> Result<Option<usize>, PerceptionError> {
        let nodes = doc
            .get("nodes")
            .ok_or_else(|| PerceptionError::malformed("document missing nodes"))?;

        let parent_index = int_array(nodes.get("parentIndex"));
        let node_type = int_array(nodes.get("nodeType"));
        let node_name = int_array(nodes.get("nodeName"));
        let node_value = int_array(nodes.get("nodeValue"));
        let backend_ids = int_array(nodes.get("backendNodeId"));
        let attributes = nodes.get("attributes").and_then(Value::as_array);

        let count = node_name.len();
        if count == 0 {
            return Ok(None);
        }

        let clickable = rare_index_set(nodes.get("isClickable"));
        let content_documents = rare_index_map(nodes.get("contentDocumentIndex"));

        let layout = LayoutTable::decode(doc.get("layout"), strings);

        // First pass: materialize element and text nodes.
        let mut arena_of: Vec<Option<usize>> = vec![None; count];
        for i in 0..count {
            let kind = node_type.get(i).copied().unwrap_or(0);
            match kind {
                1 => {
                    let tag = lookup(strings, node_name.get(i).copied())
                        .unwrap_or_default()
                        .to_ascii_lowercase();
                    let mut node = PageTreeNode::element(tag);
                    node.backend_node_id = backend_ids.get(i).copied().filter(|id| *id >= 0);
                    node.attributes = decode_attributes(attributes, i, strings);
                    if let Some(entry) = layout.entries.get(&i) {
                        node.rect = Some(entry.rect);
                        node.paint_order = entry.paint_order;
                        node.visible = entry.is_visible();
                        node.scrollable = entry.is_scrollable();
                    }
                    if clickable.contains(&i) {
                        node.clickable = true;
                    }
                    if let Some(id) = node.backend_node_id {
                        if let Some(info) = ax_index.get(&id) {
                            node.role = info.role.clone();
                            node.aria_label = info.name.clone();
                            node.expanded = info.expanded;
                        }
                    }
                    classify(&mut node);
                    arena.push(node);
                    arena_of[i] = Some(arena.len() - 1);
                }
                3 => {
                    let raw = lookup(strings, node_value.get(i).copied()).unwrap_or_default();
                    let trimmed = raw.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    let mut node = PageTreeNode::text_node(trimmed.to_string());
                    // Text visibility follows layout presence.
                    if let Some(entry) = layout.entries.get(&i) {
                        node.rect = Some(entry.rect);
                        node.visible = entry.is_visible();
                    } else {
                        node.visible = true;
                    }
                    arena.push(node);
                    arena_of[i] = Some(arena.len() - 1);
                }
                // Documents, fragments, comments and doctypes are folded
                // away; shadow roots in particular become transparent so
                // their children read as children of the host.
                _ => {}
            }
        }

        // Second pass: wire parents through non-materialized ancestors.
        for i in 0..count {
            let Some(child_arena) = arena_of[i] else {
                continue;
            };
            let mut ancestor = parent_index.get(i).copied().unwrap_or(-1);
            let parent_arena = loop {
                if ancestor < 0 {
                    break None;
                }
                let idx = ancestor as usize;
                if let Some(found) = arena_of.get(idx).copied().flatten() {
                    break Some(found);
                }
                ancestor = parent_index.get(idx).copied().unwrap_or(-1);
            };
            if let Some(parent) = parent_arena {
                arena[child_arena].parent = Some(parent);
                arena[parent].children.push(child_arena);
            }
        }

        // Recurse into same-process iframe documents, bounded.
        for (snap_idx, doc_idx) in &content_documents {
            if *iframe_budget == 0 {
                break;
            }
            let Some(iframe_arena) = arena_of.get(*snap_idx).copied().flatten() else {
                continue;
            };
            let Some(child_doc) = documents.get(*doc_idx) else {
                continue;
            };
            *iframe_budget -= 1;
            if let Some(child_root) =
                self.build_document(child_doc, documents, strings, ax_index, arena, iframe_budget)?
            {
                arena[child_root].parent = Some(iframe_arena);
                arena[iframe_arena].children.push(child_root);
            }
        }

        // The document's root element is the first parentless element we
        // materialized (html for the main document).
        let root = (0..count).find_map(|i| {
            let arena_idx = arena_of[i]?;
            (arena[arena_idx].parent.is_none()
                && arena[arena_idx].node_type == NodeType::Element)
                .then_some(arena_idx)
        });
        Ok(root)
    }
}

/// Interactivity per the classification rule: interactive tag, interactive
/// ARIA role, an onclick handler, a focusable tabindex, or contenteditable.
fn classify(node: &mut PageTreeNode) {
    let tag_interactive = INTERACTIVE_TAGS.contains(&node.tag.as_str());
    let role_interactive = node
        .role
        .as_deref()
        .map(|role| INTERACTIVE_ROLES.contains(&role))
        .unwrap_or(false);
    let has_onclick = node.attributes.contains_key("onclick");
    let focusable_tabindex = node
        .attributes
        .get("tabindex")
        .map(|t| t.trim() != "-1")
        .unwrap_or(false);
    let content_editable = node
        .attributes
        .get("contenteditable")
        .map(|v| v.eq_ignore_ascii_case("true") || v.is_empty())
        .unwrap_or(false);

    node.interactive = tag_interactive
        || role_interactive
        || has_onclick
        || focusable_tabindex
        || content_editable;
    if node.interactive {
        node.clickable = true;
    }
    node.editable = matches!(node.tag.as_str(), "input" | "textarea" | "select")
        || content_editable;
}

struct LayoutEntry {
    rect: Rect,
    paint_order: Option<i64>,
    display: String,
    visibility: String,
    opacity: f64,
    overflow: String,
}

impl LayoutEntry {
    fn is_visible(&self) -> bool {
        self.display != "none"
            && self.visibility != "hidden"
            && self.opacity > 0.0
            && self.rect.area() > 0.0
    }

    fn is_scrollable(&self) -> bool {
        matches!(self.overflow.as_str(), "auto" | "scroll")
    }
}

struct LayoutTable {
    entries: HashMap<usize, LayoutEntry>,
}

impl LayoutTable {
    /// Styles arrive in the order they were requested in the capture:
    /// display, visibility, opacity, overflow.
    fn decode(layout: Option<&Value>, strings: &[String]) -> Self {
        let mut entries = HashMap::new();
        let Some(layout) = layout else {
            return Self { entries };
        };
        let node_index = int_array(layout.get("nodeIndex"));
        let bounds = layout.get("bounds").and_then(Value::as_array);
        let styles = layout.get("styles").and_then(Value::as_array);
        let paint_orders = int_array(layout.get("paintOrders"));

        for (pos, snap_idx) in node_index.iter().enumerate() {
            let Some(bound) = bounds.and_then(|b| b.get(pos)).and_then(Value::as_array) else {
                continue;
            };
            let coord = |i: usize| bound.get(i).and_then(Value::as_f64).unwrap_or(0.0);
            let rect = Rect::new(coord(0), coord(1), coord(2), coord(3));

            let style_values: Vec<String> = styles
                .and_then(|s| s.get(pos))
                .and_then(Value::as_array)
                .map(|indices| {
                    indices
                        .iter()
                        .map(|v| {
                            lookup(strings, v.as_i64()).unwrap_or_default()
                        })
                        .collect()
                })
                .unwrap_or_default();
            let style = |i: usize| style_values.get(i).cloned().unwrap_or_default();

            entries.insert(
                *snap_idx as usize,
                LayoutEntry {
                    rect,
                    paint_order: paint_orders.get(pos).copied(),
                    display: style(0),
                    visibility: style(1),
                    opacity: style_values
                        .get(2)
                        .and_then(|v| v.parse::<f64>().ok())
                        .unwrap_or(1.0),
                    overflow: style(3),
                },
            );
        }
        Self { entries }
    }
}

fn build_ax_index(ax: &Value) -> HashMap<i64, AxInfo> {
    let mut index = HashMap::new();
    let Some(nodes) = ax.get("nodes").and_then(Value::as_array) else {
        return index;
    };
    for node in nodes {
        let Some(backend_id) = node.get("backendDOMNodeId").and_then(Value::as_i64) else {
            continue;
        };
        let role = node
            .get("role")
            .and_then(|r| r.get("value"))
            .and_then(Value::as_str)
            .filter(|r| !matches!(*r, "generic" | "none" | "Ignored"))
            .map(str::to_string);
        let name = node
            .get("name")
            .and_then(|n| n.get("value"))
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        let expanded = node
            .get("properties")
            .and_then(Value::as_array)
            .and_then(|props| {
                props.iter().find_map(|p| {
                    (p.get("name").and_then(Value::as_str) == Some("expanded"))
                        .then(|| p.get("value")?.get("value")?.as_bool())
                        .flatten()
                })
            });
        index.insert(
            backend_id,
            AxInfo {
                role,
                name,
                expanded,
            },
        );
    }
    index
}

/// Derive css selectors and xpaths from the finished arena.
fn assign_selectors(tree: &mut PageTree) {
    let order = tree.walk();
    for index in order {
        if tree.nodes[index].node_type != NodeType::Element {
            continue;
        }
        let css = css_selector_for(tree, index);
        let xpath = xpath_for(tree, index);
        let node = &mut tree.nodes[index];
        node.css_selector = Some(css);
        node.xpath = Some(xpath);
    }
}

fn simple_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && !id.chars().next().unwrap_or('0').is_ascii_digit()
}

fn nth_of_type(tree: &PageTree, index: usize) -> usize {
    let Some(parent) = tree.nodes[index].parent else {
        return 1;
    };
    let tag = &tree.nodes[index].tag;
    let mut position = 0;
    for child in &tree.nodes[parent].children {
        if tree.nodes[*child].node_type == NodeType::Element && &tree.nodes[*child].tag == tag {
            position += 1;
            if *child == index {
                return position;
            }
        }
    }
    1
}

fn css_selector_for(tree: &PageTree, index: usize) -> String {
    if let Some(id) = tree.nodes[index].attributes.get("id") {
        if simple_id(id) {
            return format!("{}#{}", tree.nodes[index].tag, id);
        }
    }
    let mut segments = Vec::new();
    let mut cursor = Some(index);
    while let Some(current) = cursor {
        let node = &tree.nodes[current];
        if node.node_type == NodeType::Element {
            if let Some(id) = node.attributes.get("id").filter(|id| simple_id(id)) {
                segments.push(format!("{}#{}", node.tag, id));
                break;
            }
            segments.push(format!("{}:nth-of-type({})", node.tag, nth_of_type(tree, current)));
        }
        cursor = node.parent;
    }
    segments.reverse();
    segments.join(" > ")
}

fn xpath_for(tree: &PageTree, index: usize) -> String {
    let mut segments = Vec::new();
    let mut cursor = Some(index);
    while let Some(current) = cursor {
        let node = &tree.nodes[current];
        if node.node_type == NodeType::Element {
            segments.push(format!("{}[{}]", node.tag, nth_of_type(tree, current)));
        }
        cursor = node.parent;
    }
    segments.reverse();
    format!("/{}", segments.join("/"))
}

fn int_array(value: Option<&Value>) -> Vec<i64> {
    value
        .and_then(Value::as_array)
        .map(|arr| arr.iter().map(|v| v.as_i64().unwrap_or(-1)).collect())
        .unwrap_or_default()
}

fn lookup(strings: &[String], index: Option<i64>) -> Option<String> {
    let index = index?;
    if index < 0 {
        return None;
    }
    strings.get(index as usize).cloned()
}

/// RareBooleanData: `{ index: [...] }`.
fn rare_index_set(value: Option<&Value>) -> std::collections::HashSet<usize> {
    value
        .and_then(|v| v.get("index"))
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_i64)
                .map(|i| i as usize)
                .collect()
        })
        .unwrap_or_default()
}

/// RareIntegerData: `{ index: [...], value: [...] }`.
fn rare_index_map(value: Option<&Value>) -> Vec<(usize, usize)> {
    let indices = value
        .and_then(|v| v.get("index"))
        .and_then(Value::as_array);
    let values = value
        .and_then(|v| v.get("value"))
        .and_then(Value::as_array);
    match (indices, values) {
        (Some(indices), Some(values)) => indices
            .iter()
            .zip(values.iter())
            .filter_map(|(i, v)| Some((i.as_i64()? as usize, v.as_i64()? as usize)))
            .collect(),
        _ => Vec::new(),
    }
}

fn decode_attributes(
    attributes: Option<&Vec<Value>>,
    index: usize,
    strings: &[String],
) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Some(pairs) = attributes.and_then(|a| a.get(index)).and_then(Value::as_array) else {
        return map;
    };
    let mut iter = pairs.iter();
    while let (Some(name), Some(value)) = (iter.next(), iter.next()) {
        let Some(name) = lookup(strings, name.as_i64()) else {
            continue;
        };
        let value = lookup(strings, value.as_i64()).unwrap_or_default();
        map.insert(name.to_ascii_lowercase(), value);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Minimal captureSnapshot-shaped payload: html > body > (button, text).
    fn sample_dom() -> Value {
        json!({
            "strings": [
                "HTML", "BODY", "BUTTON", "#text", "Submit", "id", "main",
                "block", "visible", "1", "visible_overflow"
            ],
            "documents": [{
                "nodes": {
                    "parentIndex": [-1, 0, 1, 2, 3],
                    "nodeType": [9, 1, 1, 1, 3],
                    "nodeName": [0, 0, 1, 2, 3],
                    "nodeValue": [-1, -1, -1, -1, 4],
                    "backendNodeId": [1, 2, 3, 4, 5],
                    "attributes": [[], [], [], [5, 6], []],
                    "isClickable": { "index": [3] }
                },
                "layout": {
                    "nodeIndex": [1, 2, 3, 4],
                    "bounds": [[0,0,1280,900], [0,0,1280,900], [10,10,80,30], [12,12,60,20]],
                    "styles": [[7,8,9,10],[7,8,9,10],[7,8,9,10],[7,8,9,10]],
                    "paintOrders": [1, 2, 5, 6]
                }
            }]
        })
    }

    fn sample_ax() -> Value {
        json!({
            "nodes": [{
                "nodeId": "1",
                "backendDOMNodeId": 4,
                "role": { "value": "button" },
                "name": { "value": "Submit" }
            }]
        })
    }

    #[test]
    fn decodes_tree_shape() {
        let tree = SnapshotBuilder::default()
            .build(&sample_dom(), &sample_ax())
            .expect("build");
        let root = tree.node(tree.root);
        assert_eq!(root.tag, "html");
        assert_eq!(root.children.len(), 1);
        let body = tree.node(root.children[0]);
        assert_eq!(body.tag, "body");
        let button = tree.node(body.children[0]);
        assert_eq!(button.tag, "button");
        assert!(button.interactive);
        assert!(button.visible);
        assert_eq!(button.role.as_deref(), Some("button"));
        assert_eq!(button.aria_label.as_deref(), Some("Submit"));
        assert_eq!(button.attributes.get("id").map(String::as_str), Some("main"));
    }

    #[test]
    fn text_nodes_fold_under_elements() {
        let tree = SnapshotBuilder::default()
            .build(&sample_dom(), &sample_ax())
            .expect("build");
        let button_idx = tree
            .walk()
            .into_iter()
            .find(|i| tree.node(*i).tag == "button")
            .expect("button");
        let button = tree.node(button_idx);
        assert_eq!(button.children.len(), 1);
        let text = tree.node(button.children[0]);
        assert_eq!(text.node_type, NodeType::Text);
        assert_eq!(text.text.as_deref(), Some("Submit"));
    }

    #[test]
    fn selectors_prefer_ids() {
        let tree = SnapshotBuilder::default()
            .build(&sample_dom(), &sample_ax())
            .expect("build");
        let button_idx = tree
            .walk()
            .into_iter()
            .find(|i| tree.node(*i).tag == "button")
            .expect("button");
        assert_eq!(
            tree.node(button_idx).css_selector.as_deref(),
            Some("button#main")
        );
        assert_eq!(
            tree.node(button_idx).xpath.as_deref(),
            Some("/html[1]/body[1]/button[1]")
        );
    }

    #[test]
    fn missing_layout_means_invisible() {
        let mut dom = sample_dom();
        dom["documents"][0]["layout"] = json!({
            "nodeIndex": [], "bounds": [], "styles": [], "paintOrders": []
        });
        let tree = SnapshotBuilder::default()
            .build(&dom, &sample_ax())
            .expect("build");
        let button_idx = tree
            .walk()
            .into_iter()
            .find(|i| tree.node(*i).tag == "button")
            .expect("button");
        assert!(!tree.node(button_idx).visible);
        assert!(tree.node(button_idx).rect.is_none());
    }
}
