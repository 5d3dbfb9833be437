//! Shell configuration.

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::intent::ComponentName;

/// Configuration file name below the user config directory.
const CONFIG_FILE: &str = "atrium.json";

/// Decor metrics and home resolution settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Status bar height in logical pixels.
    pub status_bar_height: i32,

    /// Navigation bar content height, used for insets.
    pub navigation_bar_height: i32,

    /// Navigation bar frame height; the extra area takes gestures only.
    pub navigation_bar_frame_height: i32,

    /// Whether the navigation bar moves to the side in landscape.
    pub navigation_bar_can_move: bool,

    /// How long panic-requested transient bars stay up.
    pub transient_bar_timeout_ms: u64,

    /// Home component used when package resolution fails.
    pub home_component: Option<ComponentName>,

    /// Dedicated fallback home for secondary displays.
    pub secondary_home_component: Option<ComponentName>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            status_bar_height: 24,
            navigation_bar_height: 48,
            navigation_bar_frame_height: 64,
            navigation_bar_can_move: true,
            transient_bar_timeout_ms: 30_000,
            home_component: None,
            secondary_home_component: None,
        }
    }
}

impl Config {
    /// Load the configuration, falling back to defaults without a file.
    pub fn load(path: Option<&Path>) -> Result<Self, Box<dyn Error>> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }
}

/// Default configuration file location.
fn default_path() -> Option<PathBuf> {
    let mut path = dirs::config_dir()?;
    path.push("atrium");
    path.push(CONFIG_FILE);
    Some(path)
}
