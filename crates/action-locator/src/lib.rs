//! Stable selector synthesis
//!
//! Given a viewport point or the focused element, this crate produces the most stable CSS or
//! XPath expression that uniquely identifies that element:
//! - Candidates are generated from a structural snapshot in nine priority tiers
//! - Generated ids and hashed class names are filtered out
//! - Each candidate is re-queried in the page and accepted only if it matches the target alone
//! - A wall-clock budget falls through to a `body`-rooted positional path

pub mod candidates;
pub mod errors;
pub mod heuristics;
pub mod probe;
pub mod synthesizer;
pub mod types;

pub use candidates::{generate_candidates, structural_path};
pub use errors::*;
pub use probe::{ScriptProbe, SelectorProbe};
pub use synthesizer::{LocatorConfig, SelectorSynthesizer};
pub use types::*;
