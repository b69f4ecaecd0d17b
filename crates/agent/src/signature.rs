//! Compact page fingerprints for stall detection.

use openbrowser_perception::RenderedPageState;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Fingerprint of one observation: identical consecutive signatures with
/// no progress mean the agent is looping.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PageSignature {
    pub url: String,
    pub dom_hash: u64,
    pub scroll_y: i64,
    pub interactive_count: u32,
}

impl PageSignature {
    /// The dom hash folds the ElementRef key set, the URL, the scroll
    /// position rounded to 100px and the interactive count.
    pub fn compute(url: &str, state: &RenderedPageState) -> Self {
        let scroll_y = (state.scroll_position.1 / 100.0).floor() as i64 * 100;

        let mut hash = Fnv1a::new();
        for key in state.selector_map.keys() {
            hash.write_u32(*key);
        }
        hash.write_bytes(url.as_bytes());
        hash.write_u64(scroll_y as u64);
        hash.write_u32(state.interactive_element_count);

        Self {
            url: url.to_string(),
            dom_hash: hash.finish(),
            scroll_y,
            interactive_count: state.interactive_element_count,
        }
    }
}

/// Ring of the last K signatures.
pub struct SignatureRing {
    entries: VecDeque<PageSignature>,
    capacity: usize,
}

impl SignatureRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(3),
        }
    }

    pub fn push(&mut self, signature: PageSignature) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(signature);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&PageSignature> {
        self.entries.back()
    }

    /// True when the last `window` signatures are identical.
    pub fn is_stalled(&self, window: usize) -> bool {
        if self.entries.len() < window {
            return false;
        }
        let mut tail = self.entries.iter().rev().take(window);
        let Some(first) = tail.next() else {
            return false;
        };
        tail.all(|sig| sig == first)
    }
}

/// FNV-1a, 64-bit.
struct Fnv1a(u64);

impl Fnv1a {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    fn new() -> Self {
        Self(Self::OFFSET)
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= u64::from(*byte);
            self.0 = self.0.wrapping_mul(Self::PRIME);
        }
    }

    fn write_u32(&mut self, value: u32) {
        self.write_bytes(&value.to_le_bytes());
    }

    fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_le_bytes());
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openbrowser_perception::RenderedPageState;

    fn state(scroll_y: f64, refs: u32) -> RenderedPageState {
        let mut selector_map = openbrowser_perception::SelectorIndex::new();
        for i in 0..refs {
            selector_map.insert(
                i,
                openbrowser_perception::SelectorEntry {
                    css_selector: format!("button:nth-of-type({i})"),
                    xpath: None,
                    backend_node_id: Some(i as i64),
                    tag_name: "button".to_string(),
                    role: None,
                    aria_label: None,
                    text: None,
                },
            );
        }
        RenderedPageState {
            tree: String::new(),
            selector_map,
            element_count: refs,
            interactive_element_count: refs,
            scroll_position: (0.0, scroll_y),
            viewport_size: (1280.0, 900.0),
            document_size: (1280.0, 2000.0),
            pixels_above: scroll_y,
            pixels_below: 0.0,
        }
    }

    #[test]
    fn identical_observations_have_identical_signatures() {
        let a = PageSignature::compute("https://x/", &state(120.0, 4));
        let b = PageSignature::compute("https://x/", &state(130.0, 4));
        // Both round to the same 100px scroll bucket.
        assert_eq!(a, b);
    }

    #[test]
    fn url_change_changes_signature() {
        let a = PageSignature::compute("https://x/", &state(0.0, 4));
        let b = PageSignature::compute("https://y/", &state(0.0, 4));
        assert_ne!(a.dom_hash, b.dom_hash);
    }

    #[test]
    fn stall_requires_three_identical() {
        let mut ring = SignatureRing::new(8);
        ring.push(PageSignature::compute("https://x/", &state(0.0, 4)));
        ring.push(PageSignature::compute("https://x/", &state(0.0, 4)));
        assert!(!ring.is_stalled(3));
        ring.push(PageSignature::compute("https://x/", &state(0.0, 4)));
        assert!(ring.is_stalled(3));
        ring.push(PageSignature::compute("https://x/", &state(600.0, 4)));
        assert!(!ring.is_stalled(3));
    }

    #[test]
    fn ring_is_bounded() {
        let mut ring = SignatureRing::new(3);
        for i in 0..10 {
            ring.push(PageSignature::compute(
                &format!("https://x/{i}"),
                &state(0.0, 1),
            ));
        }
        assert_eq!(ring.len(), 3);
    }
}
