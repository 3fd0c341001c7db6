use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Result, anyhow};
use log::{info, warn};

use crate::panel::Weighting;
use crate::utils::{DEFAULT_ALPHA, DEFAULT_ARTIFACT_THRESHOLD, DEFAULT_FREQ_END, DEFAULT_FREQ_START};

pub const DEFAULT_PRESET_NAME: &str = "default";

// All panel values a user can save and recall
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PanelPreset {
    pub weighting: Weighting,
    pub alpha: f32,
    pub artifact_threshold: f32,
    pub freq_start: i32,
    pub freq_end: i32,
    // 0-based channel indices
    pub group1: Vec<usize>,
    pub group2: Vec<usize>,
}

impl PanelPreset {
    /// Start-up values with `num_channels` split evenly between the groups.
    pub fn for_channels(num_channels: usize) -> Self {
        let half = num_channels / 2;
        Self {
            weighting: Weighting::Linear,
            alpha: DEFAULT_ALPHA,
            artifact_threshold: DEFAULT_ARTIFACT_THRESHOLD,
            freq_start: DEFAULT_FREQ_START,
            freq_end: DEFAULT_FREQ_END,
            group1: (0..half).collect(),
            group2: (half..num_channels).collect(),
        }
    }
}

// Loads, saves and holds named presets in a YAML file
pub struct PresetManager {
    presets: BTreeMap<String, PanelPreset>,
    file_path: PathBuf,
}

impl PresetManager {
    /// Opens the preset file at `file_path`, creating it with `default` under
    /// the name "default" when it does not exist yet.
    pub fn new(file_path: impl AsRef<Path>, default: PanelPreset) -> Result<Self> {
        let file_path = file_path.as_ref().to_path_buf();
        let mut presets = BTreeMap::new();
        if file_path.exists() {
            info!("Loading presets from {}", file_path.display());
            let yaml_str = fs::read_to_string(&file_path)?;
            presets = serde_yaml::from_str(&yaml_str)
                .map_err(|e| anyhow!("Failed to parse {}: {}", file_path.display(), e))?;
        } else {
            info!("No presets file found at {}. Creating with default preset.", file_path.display());
        }

        let mut manager = Self { presets, file_path };

        if !manager.presets.contains_key(DEFAULT_PRESET_NAME) {
            warn!("'{}' preset not found. Creating and saving it.", DEFAULT_PRESET_NAME);
            manager.presets.insert(DEFAULT_PRESET_NAME.to_string(), default);
        }

        manager.save()?;
        Ok(manager)
    }

    pub fn save(&self) -> Result<()> {
        let yaml_str = serde_yaml::to_string(&self.presets)?;
        fs::write(&self.file_path, yaml_str)?;
        info!("Presets saved to {}", self.file_path.display());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&PanelPreset> {
        self.presets.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    /// Stores `preset` under `name`, replacing any previous one, and writes
    /// the file.
    pub fn insert(&mut self, name: &str, preset: PanelPreset) -> Result<()> {
        if self.presets.insert(name.to_string(), preset).is_some() {
            info!("Overwrote preset '{}'", name);
        }
        self.save()
    }

    pub fn remove(&mut self, name: &str) -> Result<bool> {
        if name == DEFAULT_PRESET_NAME {
            return Err(anyhow!("The '{}' preset cannot be removed", DEFAULT_PRESET_NAME));
        }
        let removed = self.presets.remove(name).is_some();
        if removed {
            self.save()?;
        }
        Ok(removed)
    }
}
