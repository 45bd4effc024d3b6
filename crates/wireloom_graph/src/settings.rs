// SPDX-License-Identifier: MIT OR Apache-2.0
//! Host-level engine settings and per-graph configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default ceiling on nodes per graph
pub const MAX_NUMBER_OF_NODES: usize = 10_000;

/// Settings supplied by the host application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    /// Hard ceiling on nodes per graph
    pub max_nodes: usize,
    /// Allow an EVENT output to keep several links
    pub allow_multi_output_for_events: bool,
    /// Create `onTrigger`/`onExecuted` slots automatically when needed
    pub do_add_trigger_slots: bool,
    /// Seconds added to the fixed clock on every step iteration
    pub fixed_time_lapse: f64,
    /// Grid used when `GraphConfig::align_to_grid` is on
    pub grid_size: f32,
    /// Triggers dispatched per drain before the queue is dropped
    pub max_trigger_dispatch: usize,
    /// Tick length used by hosts for frame-driven scheduling
    pub frame_interval_ms: u64,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            max_nodes: MAX_NUMBER_OF_NODES,
            allow_multi_output_for_events: true,
            do_add_trigger_slots: false,
            fixed_time_lapse: 0.01,
            grid_size: 10.0,
            max_trigger_dispatch: 10_000,
            frame_interval_ms: 16,
        }
    }
}

impl GraphSettings {
    /// Load settings from a RON file
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_ron(&content)
    }

    /// Parse settings from RON text
    pub fn from_ron(content: &str) -> Result<Self, SettingsError> {
        Ok(ron::from_str(content)?)
    }

    /// Save settings to a RON file
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let config = ron::ser::PrettyConfig::default().struct_names(true);
        let content = ron::ser::to_string_pretty(self, config)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Per-graph options, stored in the serialized `config` field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Snap node positions to the grid when added
    pub align_to_grid: bool,
    /// Draw links above nodes
    pub links_ontop: bool,
}

/// Error loading or saving settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// File access failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// RON text could not be parsed
    #[error("Parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// RON output could not be produced
    #[error("Write error: {0}")]
    Write(#[from] ron::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = GraphSettings::default();
        assert_eq!(settings.max_nodes, MAX_NUMBER_OF_NODES);
        assert!(settings.allow_multi_output_for_events);
        assert!(!settings.do_add_trigger_slots);
    }

    #[test]
    fn test_serialization() {
        let settings = GraphSettings {
            max_nodes: 12,
            ..GraphSettings::default()
        };
        let ron_str =
            ron::ser::to_string_pretty(&settings, ron::ser::PrettyConfig::default()).unwrap();
        let loaded = GraphSettings::from_ron(&ron_str).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_partial_settings_use_defaults() {
        let loaded = GraphSettings::from_ron("(do_add_trigger_slots: true)").unwrap();
        assert!(loaded.do_add_trigger_slots);
        assert_eq!(loaded.grid_size, 10.0);
    }

    #[test]
    fn test_save_and_load_file() {
        let settings = GraphSettings {
            do_add_trigger_slots: true,
            max_trigger_dispatch: 64,
            fixed_time_lapse: 0.25,
            ..GraphSettings::default()
        };
        let name = format!("wireloom-settings-{}.ron", uuid::Uuid::new_v4());
        let path = std::env::temp_dir().join(name);
        settings.save(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("GraphSettings("));
        assert_eq!(GraphSettings::load(&path).unwrap(), settings);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(GraphSettings::load(&path), Err(SettingsError::Io(_))));
    }
}
