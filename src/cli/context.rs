use std::path::Path;
use std::sync::Arc;

use waypoint_cli::{LoadedConfig, WaypointConfig};

use super::output::OutputFormat;

pub struct CliContext {
    config: Arc<WaypointConfig>,
    loaded: LoadedConfig,
    output: OutputFormat,
}

impl CliContext {
    pub fn new(loaded: LoadedConfig, output: OutputFormat) -> Self {
        Self {
            config: Arc::new(loaded.config.clone()),
            loaded,
            output,
        }
    }

    pub fn config(&self) -> &WaypointConfig {
        self.config.as_ref()
    }

    pub fn config_path(&self) -> &Path {
        &self.loaded.path
    }

    /// `true` when the config came from a file rather than defaults.
    pub fn config_from_file(&self) -> bool {
        self.loaded.from_file
    }

    pub fn output(&self) -> &OutputFormat {
        &self.output
    }
}
