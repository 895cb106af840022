use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::detect_chrome_executable;

/// Browser window size in CSS pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// How the driver reaches a browser: launch `executable`, or attach to
/// `websocket_url` when it is set.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CdpConfig {
    /// Empty means "let the launcher pick"; filled from [`detect_chrome_executable`].
    pub executable: PathBuf,
    /// Chrome profile directory; relative paths resolve against the working directory.
    #[serde(alias = "user_data_dir")]
    pub profile_dir: PathBuf,
    pub headless: bool,
    /// Needed in containers that run the browser as root.
    pub disable_sandbox: bool,
    /// Upper bound on a single protocol round-trip.
    pub command_timeout_ms: u64,
    pub websocket_url: Option<String>,
    pub viewport: Viewport,
    /// Appended to the launch command line after the built-in flags.
    pub extra_args: Vec<String>,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            executable: detect_chrome_executable().unwrap_or_default(),
            profile_dir: PathBuf::from(".waypoint-profile"),
            headless: true,
            disable_sandbox: false,
            command_timeout_ms: 30_000,
            websocket_url: None,
            viewport: Viewport::default(),
            extra_args: Vec::new(),
        }
    }
}

impl CdpConfig {
    /// Config that attaches to an already running browser.
    pub fn attach(websocket_url: impl Into<String>) -> Self {
        Self {
            websocket_url: Some(websocket_url.into()),
            ..Self::default()
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms.max(1))
    }

    pub fn resolved_profile_dir(&self) -> io::Result<PathBuf> {
        if self.profile_dir.is_absolute() {
            Ok(self.profile_dir.clone())
        } else {
            Ok(std::env::current_dir()?.join(&self.profile_dir))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: CdpConfig = serde_json::from_value(json!({
            "headless": false,
            "user_data_dir": "/tmp/profile",
            "viewport": { "width": 800, "height": 600 }
        }))
        .unwrap();
        assert!(!config.headless);
        assert_eq!(config.profile_dir, PathBuf::from("/tmp/profile"));
        assert_eq!(config.viewport, Viewport { width: 800, height: 600 });
        assert_eq!(config.command_timeout(), Duration::from_secs(30));
        assert!(config.websocket_url.is_none());
    }

    #[test]
    fn test_attach_and_profile_resolution() {
        let config = CdpConfig::attach("ws://127.0.0.1:9222/devtools/browser/x");
        assert_eq!(
            config.websocket_url.as_deref(),
            Some("ws://127.0.0.1:9222/devtools/browser/x")
        );
        let resolved = config.resolved_profile_dir().unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with(".waypoint-profile"));
    }
}
