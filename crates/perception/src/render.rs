//! Tree renderer: selects interactive nodes, culls occluded and
//! off-screen ones, assigns dense ElementRef indices and serializes the
//! tree into the indexed text form the LM consumes.

use std::collections::{HashMap, HashSet};

use openbrowser_core_types::{PageMetrics, Rect};
use serde::{Deserialize, Serialize};

use crate::model::{
    NodeType, OffscreenElement, PageTree, RenderedPageState, SelectorEntry, SelectorIndex,
};

/// Grid cell size for the paint-order occlusion pass.
const PAINT_GRID_PX: f64 = 50.0;
/// Overlap fraction (of the smaller rect) that counts as occlusion.
const OCCLUSION_RATIO: f64 = 0.5;
/// Viewport-height estimate used when reporting distances in "pages".
const PAGE_ESTIMATE_PX: f64 = 900.0;
/// Cap on the off-screen appendix.
const OFFSCREEN_CAP: usize = 15;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Hard bound on element emissions in the serialized tree.
    pub max_elements_in_dom: usize,
    /// Extra margin (px) around the viewport before a node counts as
    /// off-screen.
    pub viewport_expansion: f64,
    /// Collapse `<svg>` subtrees to a single placeholder.
    pub collapse_svg: bool,
    /// Minimum run length for sibling collapsing.
    pub dedup_run_len: usize,
    /// Attribute containment ratio for "near-identical" siblings.
    pub dedup_containment: f64,
    /// Attributes copied into the serialization.
    pub captured_attributes: Vec<String>,
    /// Per-element text budget.
    pub max_text_length: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            max_elements_in_dom: 2000,
            viewport_expansion: 0.0,
            collapse_svg: true,
            dedup_run_len: 5,
            dedup_containment: 0.95,
            captured_attributes: [
                "title",
                "type",
                "name",
                "role",
                "tabindex",
                "aria-label",
                "placeholder",
                "value",
                "alt",
                "aria-expanded",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_text_length: 100,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TreeRenderer {
    pub options: RenderOptions,
}

impl TreeRenderer {
    pub fn new(options: RenderOptions) -> Self {
        Self { options }
    }

    /// Run the full §render pipeline. `baseline` carries the identity keys
    /// of elements present in the previous snapshot; survivors missing
    /// from it are marked as new.
    pub fn render(
        &self,
        tree: &mut PageTree,
        metrics: &PageMetrics,
        baseline: &HashSet<String>,
    ) -> RenderedPageState {
        let interactive = collect_interactive(tree);
        let after_paint = paint_order_cull(tree, interactive);
        let (survivors, offscreen) = self.offscreen_cull(tree, after_paint, metrics);

        // Dense ElementRef assignment in document order.
        let mut selector_map: SelectorIndex = SelectorIndex::new();
        for (position, node_index) in survivors.iter().enumerate() {
            let index = position as u32;
            let text = immediate_text(tree, *node_index, self.options.max_text_length);
            let node = &mut tree.nodes[*node_index];
            node.highlight_index = Some(index);
            selector_map.insert(
                index,
                SelectorEntry {
                    css_selector: node.css_selector.clone().unwrap_or_default(),
                    xpath: node.xpath.clone(),
                    backend_node_id: node.backend_node_id,
                    tag_name: node.tag.clone(),
                    role: node.role.clone(),
                    aria_label: node.aria_label.clone(),
                    text,
                },
            );
        }

        let serialized = self.serialize(tree, metrics, baseline, &offscreen);

        RenderedPageState {
            tree: serialized,
            interactive_element_count: selector_map.len() as u32,
            element_count: tree
                .nodes
                .iter()
                .filter(|n| n.node_type == NodeType::Element)
                .count() as u32,
            selector_map,
            scroll_position: (metrics.scroll_x, metrics.scroll_y),
            viewport_size: (metrics.viewport_width, metrics.viewport_height),
            document_size: (metrics.document_width, metrics.document_height),
            pixels_above: metrics.pixels_above(),
            pixels_below: metrics.pixels_below(),
        }
    }

    fn offscreen_cull(
        &self,
        tree: &PageTree,
        nodes: Vec<usize>,
        metrics: &PageMetrics,
    ) -> (Vec<usize>, Vec<OffscreenElement>) {
        let margin = self.options.viewport_expansion;
        let top = metrics.scroll_y - margin;
        let bottom = metrics.scroll_y + metrics.viewport_height + margin;
        // Hint horizon: anything farther than this is dropped silently.
        let horizon = (metrics.viewport_height * 10.0).max(metrics.document_height);

        let mut survivors = Vec::new();
        let mut offscreen = Vec::new();
        for index in nodes {
            let Some(rect) = tree.nodes[index].rect else {
                continue;
            };
            if rect.bottom() >= top && rect.y <= bottom {
                survivors.push(index);
                continue;
            }
            let distance = if rect.bottom() < top {
                rect.bottom() - top // negative: above
            } else {
                rect.y - bottom // positive: below
            };
            if distance.abs() > horizon || offscreen.len() >= OFFSCREEN_CAP {
                continue;
            }
            let node = &tree.nodes[index];
            offscreen.push(OffscreenElement {
                tag_name: node.tag.clone(),
                label: node
                    .aria_label
                    .clone()
                    .or_else(|| immediate_text(tree, index, 40))
                    .unwrap_or_default(),
                pages_away: distance / PAGE_ESTIMATE_PX,
            });
        }
        (survivors, offscreen)
    }

    fn serialize(
        &self,
        tree: &PageTree,
        metrics: &PageMetrics,
        baseline: &HashSet<String>,
        offscreen: &[OffscreenElement],
    ) -> String {
        let mut out = String::new();
        if metrics.pixels_above() <= 0.0 {
            out.push_str("[Start of page]\n");
        } else {
            out.push_str(&format!(
                "... {} pixels above - scroll up to see more ...\n",
                metrics.pixels_above() as i64
            ));
        }

        let mut emitted = 0usize;
        let mut truncated = false;
        self.serialize_node(
            tree,
            tree.root,
            0,
            baseline,
            &mut out,
            &mut emitted,
            &mut truncated,
        );
        if truncated {
            out.push_str(&format!(
                "[... DOM truncated at {} elements]\n",
                self.options.max_elements_in_dom
            ));
        }

        if metrics.pixels_below() <= 0.0 {
            out.push_str("[End of page]");
        } else {
            out.push_str(&format!(
                "... {} pixels below - scroll down to see more ...",
                metrics.pixels_below() as i64
            ));
        }

        if !offscreen.is_empty() {
            out.push_str("\n\nOff-screen interactive elements:");
            for element in offscreen {
                let direction = if element.pages_away < 0.0 {
                    "above"
                } else {
                    "below"
                };
                let label = if element.label.is_empty() {
                    element.tag_name.clone()
                } else {
                    format!("{} '{}'", element.tag_name, element.label)
                };
                out.push_str(&format!(
                    "\n- <{}> {:.1} pages {}",
                    label,
                    element.pages_away.abs(),
                    direction
                ));
            }
        }
        out
    }

    /// Emit a node if it carries an ElementRef or contains one below it.
    /// Returns whether anything was emitted for this subtree.
    #[allow(clippy::too_many_arguments)]
    fn serialize_node(
        &self,
        tree: &PageTree,
        index: usize,
        depth: usize,
        baseline: &HashSet<String>,
        out: &mut String,
        emitted: &mut usize,
        truncated: &mut bool,
    ) -> bool {
        if *truncated {
            return false;
        }
        let node = &tree.nodes[index];

        if node.node_type == NodeType::Text {
            if node.visible {
                let text = node.text.as_deref().unwrap_or_default();
                if !text.is_empty() {
                    push_line(out, depth, &truncate(text, self.options.max_text_length));
                    return true;
                }
            }
            return false;
        }

        if self.options.collapse_svg && node.tag == "svg" && node.highlight_index.is_none() {
            push_line(out, depth, "<svg/>");
            return true;
        }

        match node.highlight_index {
            Some(highlight) => {
                if *emitted >= self.options.max_elements_in_dom {
                    *truncated = true;
                    return false;
                }
                *emitted += 1;
                let marker = if baseline.is_empty() || baseline.contains(&node.identity_key()) {
                    ""
                } else {
                    "*"
                };
                let attrs = self.format_attributes(node.attributes.iter());
                let text = immediate_text(tree, index, self.options.max_text_length)
                    .unwrap_or_default();
                push_line(
                    out,
                    depth,
                    &format!(
                        "{marker}[{highlight}]<{tag}{attrs}>{text}</{tag}>",
                        tag = node.tag
                    ),
                );
                self.serialize_children(tree, index, depth + 1, baseline, out, emitted, truncated);
                true
            }
            None => {
                // Probe the subtree first; containers only appear when a
                // descendant will.
                let mut probe = String::new();
                let probe_emitted = self.serialize_children(
                    tree,
                    index,
                    depth + 1,
                    baseline,
                    &mut probe,
                    emitted,
                    truncated,
                );
                if !probe_emitted {
                    return false;
                }
                push_line(out, depth, &format!("<{}>", node.tag));
                out.push_str(&probe);
                true
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn serialize_children(
        &self,
        tree: &PageTree,
        index: usize,
        depth: usize,
        baseline: &HashSet<String>,
        out: &mut String,
        emitted: &mut usize,
        truncated: &mut bool,
    ) -> bool {
        let children = &tree.nodes[index].children;
        let runs = self.dedup_runs(tree, children);
        let mut any = false;
        let mut child_pos = 0usize;
        while child_pos < children.len() {
            if let Some(&run_len) = runs.get(&child_pos) {
                // Emit the first two of a near-identical run, collapse the
                // rest to a counter.
                let keep = 2usize.min(run_len);
                for offset in 0..keep {
                    any |= self.serialize_node(
                        tree,
                        children[child_pos + offset],
                        depth,
                        baseline,
                        out,
                        emitted,
                        truncated,
                    );
                }
                push_line(out, depth, &format!("({} more similar)", run_len - keep));
                child_pos += run_len;
                continue;
            }
            any |= self.serialize_node(
                tree,
                children[child_pos],
                depth,
                baseline,
                out,
                emitted,
                truncated,
            );
            child_pos += 1;
        }
        any
    }

    /// Find runs of near-identical interactive siblings, keyed by run
    /// start position in the child list.
    fn dedup_runs(&self, tree: &PageTree, children: &[usize]) -> HashMap<usize, usize> {
        let mut runs = HashMap::new();
        let mut start = 0usize;
        while start < children.len() {
            let anchor = children[start];
            let anchor_node = &tree.nodes[anchor];
            if anchor_node.node_type != NodeType::Element || anchor_node.highlight_index.is_none() {
                start += 1;
                continue;
            }
            let mut len = 1usize;
            while start + len < children.len() {
                let candidate = &tree.nodes[children[start + len]];
                if candidate.node_type != NodeType::Element
                    || candidate.highlight_index.is_none()
                    || candidate.tag != anchor_node.tag
                    || attribute_containment(&anchor_node.attributes, &candidate.attributes)
                        < self.options.dedup_containment
                {
                    break;
                }
                len += 1;
            }
            if len >= self.options.dedup_run_len {
                runs.insert(start, len);
            }
            start += len;
        }
        runs
    }

    fn format_attributes<'a, I>(&self, attributes: I) -> String
    where
        I: Iterator<Item = (&'a String, &'a String)>,
    {
        let filtered: HashMap<&String, &String> = attributes
            .filter(|(name, _)| self.options.captured_attributes.contains(name))
            .collect();
        let mut parts: Vec<String> = self
            .options
            .captured_attributes
            .iter()
            .filter_map(|name| {
                filtered
                    .get(name)
                    .map(|value| format!(" {}=\"{}\"", name, truncate(value, 60)))
            })
            .collect();
        parts.dedup();
        parts.join("")
    }
}

/// Depth-first gather of visible interactive nodes, in document order.
fn collect_interactive(tree: &PageTree) -> Vec<usize> {
    tree.walk()
        .into_iter()
        .filter(|&i| {
            let node = &tree.nodes[i];
            node.node_type == NodeType::Element && node.interactive && node.visible
        })
        .collect()
}

/// Bucket by 50-px grid cell; inside a cell, a node overlapped >= 50% (of
/// the smaller rect) by a higher paint-order node is covered and dropped.
/// Paint-order ties go to the later node in document order.
fn paint_order_cull(tree: &PageTree, nodes: Vec<usize>) -> Vec<usize> {
    let mut cells: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for &index in &nodes {
        if let Some(rect) = tree.nodes[index].rect {
            let (cx, cy) = rect.center();
            cells
                .entry(((cx / PAINT_GRID_PX) as i64, (cy / PAINT_GRID_PX) as i64))
                .or_default()
                .push(index);
        }
    }

    let mut covered: HashSet<usize> = HashSet::new();
    for bucket in cells.values() {
        for (i, &a) in bucket.iter().enumerate() {
            for &b in bucket.iter().skip(i + 1) {
                let (Some(rect_a), Some(rect_b)) = (tree.nodes[a].rect, tree.nodes[b].rect)
                else {
                    continue;
                };
                if rect_a.overlap_ratio(&rect_b) < OCCLUSION_RATIO {
                    continue;
                }
                let order_a = tree.nodes[a].paint_order.unwrap_or(0);
                let order_b = tree.nodes[b].paint_order.unwrap_or(0);
                // b is later in document order, so it wins ties.
                if order_a > order_b {
                    covered.insert(b);
                } else {
                    covered.insert(a);
                }
            }
        }
    }

    nodes.into_iter().filter(|i| !covered.contains(i)).collect()
}

/// Shared key=value pairs over the smaller attribute set.
fn attribute_containment(
    a: &HashMap<String, String>,
    b: &HashMap<String, String>,
) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let smaller = a.len().min(b.len()).max(1);
    let shared = a
        .iter()
        .filter(|(name, value)| b.get(*name) == Some(value))
        .count();
    shared as f64 / smaller as f64
}

/// Concatenated text of the node's direct text children.
fn immediate_text(tree: &PageTree, index: usize, budget: usize) -> Option<String> {
    let mut parts = Vec::new();
    for &child in &tree.nodes[index].children {
        let node = &tree.nodes[child];
        if node.node_type == NodeType::Text {
            if let Some(text) = &node.text {
                parts.push(text.clone());
            }
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(truncate(&parts.join(" "), budget))
}

fn truncate(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    let cut: String = text.chars().take(budget.saturating_sub(1)).collect();
    format!("{cut}…")
}

fn push_line(out: &mut String, depth: usize, line: &str) {
    for _ in 0..depth {
        out.push('\t');
    }
    out.push_str(line);
    out.push('\n');
}

/// Collect the identity keys of the current interactive survivors, used
/// as the next render's new-element baseline.
pub fn identity_baseline(tree: &PageTree) -> HashSet<String> {
    tree.nodes
        .iter()
        .filter(|n| n.highlight_index.is_some())
        .map(|n| n.identity_key())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PageTreeNode;

    fn metrics() -> PageMetrics {
        PageMetrics {
            scroll_x: 0.0,
            scroll_y: 0.0,
            viewport_width: 1280.0,
            viewport_height: 900.0,
            document_width: 1280.0,
            document_height: 900.0,
        }
    }

    /// body with `count` visible buttons at the given rects.
    fn tree_with_buttons(rects: &[Rect]) -> PageTree {
        let mut nodes = vec![PageTreeNode::element("body")];
        nodes[0].visible = true;
        for (i, rect) in rects.iter().enumerate() {
            let mut button = PageTreeNode::element("button");
            button.visible = true;
            button.interactive = true;
            button.rect = Some(*rect);
            button.parent = Some(0);
            button.backend_node_id = Some(100 + i as i64);
            button.css_selector = Some(format!("body > button:nth-of-type({})", i + 1));
            button.paint_order = Some(i as i64);
            nodes.push(button);
            let child = nodes.len() - 1;
            nodes[0].children.push(child);
        }
        PageTree { nodes, root: 0 }
    }

    #[test]
    fn assigns_dense_indices_in_document_order() {
        let mut tree = tree_with_buttons(&[
            Rect::new(0.0, 0.0, 100.0, 30.0),
            Rect::new(0.0, 100.0, 100.0, 30.0),
            Rect::new(0.0, 200.0, 100.0, 30.0),
        ]);
        let state = TreeRenderer::default().render(&mut tree, &metrics(), &HashSet::new());
        assert_eq!(state.interactive_element_count, 3);
        let keys: Vec<u32> = state.selector_map.keys().copied().collect();
        assert_eq!(keys, vec![0, 1, 2]);
        assert!(state.tree.contains("[0]<button"));
        assert!(state.tree.contains("[2]<button"));
    }

    #[test]
    fn every_ref_in_tree_resolves_in_map() {
        let mut tree = tree_with_buttons(&[
            Rect::new(0.0, 0.0, 100.0, 30.0),
            Rect::new(0.0, 100.0, 100.0, 30.0),
        ]);
        let state = TreeRenderer::default().render(&mut tree, &metrics(), &HashSet::new());
        for line in state.tree.lines() {
            let Some(start) = line.find('[') else { continue };
            let Some(end) = line.find(']') else { continue };
            if let Ok(index) = line[start + 1..end].parse::<u32>() {
                let entry = state.selector_map.get(&index).expect("ref must resolve");
                assert!(line.contains(&format!("<{}", entry.tag_name)));
            }
        }
    }

    #[test]
    fn occluded_element_is_culled() {
        // Two buttons on the same spot; higher paint order covers lower.
        let mut tree = tree_with_buttons(&[
            Rect::new(10.0, 10.0, 100.0, 30.0),
            Rect::new(12.0, 12.0, 100.0, 30.0),
        ]);
        tree.nodes[1].paint_order = Some(1);
        tree.nodes[2].paint_order = Some(9);
        let state = TreeRenderer::default().render(&mut tree, &metrics(), &HashSet::new());
        assert_eq!(state.interactive_element_count, 1);
        assert_eq!(
            state.selector_map.get(&0).unwrap().backend_node_id,
            Some(101)
        );
    }

    #[test]
    fn paint_cull_is_idempotent() {
        let tree = {
            let mut t = tree_with_buttons(&[
                Rect::new(10.0, 10.0, 100.0, 30.0),
                Rect::new(12.0, 12.0, 100.0, 30.0),
                Rect::new(500.0, 500.0, 50.0, 20.0),
            ]);
            t.nodes[1].paint_order = Some(1);
            t.nodes[2].paint_order = Some(9);
            t
        };
        let first = paint_order_cull(&tree, collect_interactive(&tree));
        let second = paint_order_cull(&tree, first.clone());
        assert_eq!(first, second);
    }

    #[test]
    fn offscreen_elements_move_to_appendix() {
        let mut tree = tree_with_buttons(&[
            Rect::new(0.0, 10.0, 100.0, 30.0),
            Rect::new(0.0, 2500.0, 100.0, 30.0),
        ]);
        let mut m = metrics();
        m.document_height = 3000.0;
        let state = TreeRenderer::default().render(&mut tree, &m, &HashSet::new());
        assert_eq!(state.interactive_element_count, 1);
        assert!(state.tree.contains("Off-screen interactive elements:"));
        assert!(state.tree.contains("pages below"));
    }

    #[test]
    fn start_and_end_markers_follow_scroll() {
        let mut tree = tree_with_buttons(&[Rect::new(0.0, 10.0, 100.0, 30.0)]);
        let state = TreeRenderer::default().render(&mut tree, &metrics(), &HashSet::new());
        assert!(state.tree.starts_with("[Start of page]"));
        assert!(state.tree.contains("[End of page]"));

        let mut scrolled = metrics();
        scrolled.scroll_y = 200.0;
        scrolled.document_height = 2000.0;
        let mut tree = tree_with_buttons(&[Rect::new(0.0, 210.0, 100.0, 30.0)]);
        let state = TreeRenderer::default().render(&mut tree, &scrolled, &HashSet::new());
        assert!(state.tree.contains("200 pixels above"));
        assert!(state.tree.contains("pixels below"));
    }

    #[test]
    fn new_elements_get_star_marker() {
        let mut tree = tree_with_buttons(&[
            Rect::new(0.0, 0.0, 100.0, 30.0),
            Rect::new(0.0, 100.0, 100.0, 30.0),
        ]);
        let mut baseline = HashSet::new();
        baseline.insert("b:100".to_string());
        let state = TreeRenderer::default().render(&mut tree, &metrics(), &baseline);
        assert!(state.tree.contains("[0]<button"));
        assert!(!state.tree.contains("*[0]"));
        assert!(state.tree.contains("*[1]<button"));
    }

    #[test]
    fn sibling_runs_collapse() {
        let rects: Vec<Rect> = (0..8)
            .map(|i| Rect::new(0.0, (i * 60) as f64, 100.0, 30.0))
            .collect();
        let mut tree = tree_with_buttons(&rects);
        let state = TreeRenderer::default().render(&mut tree, &metrics(), &HashSet::new());
        assert!(state.tree.contains("(6 more similar)"));
        // Dense map still covers all eight survivors.
        assert_eq!(state.interactive_element_count, 8);
    }

    #[test]
    fn truncation_appends_notice() {
        let rects: Vec<Rect> = (0..10)
            .map(|i| Rect::new((i * 200) as f64, 0.0, 100.0, 30.0))
            .collect();
        let mut tree = tree_with_buttons(&rects);
        let renderer = TreeRenderer::new(RenderOptions {
            max_elements_in_dom: 4,
            dedup_run_len: 100,
            ..Default::default()
        });
        let state = renderer.render(&mut tree, &metrics(), &HashSet::new());
        assert!(state.tree.contains("[... DOM truncated at 4 elements]"));
    }
}
