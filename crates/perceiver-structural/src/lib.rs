//! Accessibility-tree acquisition and normalisation.
//!
//! [`AccessibilityTreeBuilder`] is pure and works on any flat node list;
//! [`StructuralPerceiver`] captures a live page's tree and enriches it.

pub mod builder;
pub mod capture;
pub mod errors;
pub mod model;
pub mod scripts;

pub use builder::{find_node, mark_scrollables, render_simplified, AccessibilityTreeBuilder};
pub use capture::{
    find_scrollable_backend_ids, tag_name_for_backend_node, xpath_for_backend_node,
    PerceiverOptions, StructuralPerceiver,
};
pub use errors::PerceiverError;
pub use model::{
    flatten_raw_nodes, AccessibilityNode, AxProperty, AxValue, RawAxNode, TreeResult,
    STRUCTURAL_ROLES,
};
