//! Action execution
//!
//! This crate turns agent decisions into page input:
//! - `AgentAction` computer-use steps and `MethodCall` element methods
//! - Platform-aware key normalization and chord handling
//! - New-tab folding so a session stays on one page
//! - Best-effort cursor feedback and screenshots
//! - An append-only recorder that persists replayable session files

mod cursor;
pub mod errors;
mod executor;
pub mod keys;
pub mod recorder;
pub mod scripts;
pub mod types;

pub use cursor::CursorOverlay;
pub use errors::*;
pub use executor::ActionExecutor;
pub use keys::{normalize_key, press_chord, split_chord, Platform};
pub use recorder::{ActionRecorder, RecordedAction, RecordedStep};
pub use types::*;
