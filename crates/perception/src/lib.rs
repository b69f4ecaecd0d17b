//! Page-state extraction for the agent.
//!
//! Pipeline: [`snapshot::SnapshotBuilder`] turns the raw CDP DOM snapshot
//! and accessibility tree into a unified [`model::PageTree`];
//! [`render::TreeRenderer`] culls and serializes it into the indexed
//! [`model::RenderedPageState`]; [`analyzer::PageAnalyzer`] orchestrates
//! both and resolves ElementRefs back into real clicks and keystrokes.

pub mod analyzer;
pub mod errors;
pub mod model;
pub mod render;
pub mod snapshot;

pub use analyzer::PageAnalyzer;
pub use errors::PerceptionError;
pub use model::{
    NodeType, PageTree, PageTreeNode, RenderedPageState, SelectorEntry, SelectorIndex,
};
pub use render::{RenderOptions, TreeRenderer};
pub use snapshot::SnapshotBuilder;
