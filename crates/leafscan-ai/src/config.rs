//! Model directory configuration.
//!
//! A model directory holds the CLIP vision encoder, the two classification
//! heads and, optionally, label files. An optional `leafscan.json` in the
//! directory overrides the default file names.

use std::path::{Path, PathBuf};

use anyhow::Context;
use leafscan_core::{LabelMap, LabelSpace};
use serde::{Deserialize, Serialize};

/// Name of the optional override file inside a model directory.
pub const CONFIG_FILE: &str = "leafscan.json";

/// Paths of the artifacts that make up one pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// CLIP ViT-B/32 vision tower exported to ONNX.
    pub encoder: PathBuf,
    /// Crop head: `.onnx`, or `.json` dense weights.
    pub crop_head: PathBuf,
    /// Disease head: `.onnx`, or `.json` dense weights.
    pub disease_head: PathBuf,
    /// Crop label file; the built-in map is used when absent.
    pub crop_labels: Option<PathBuf>,
    /// Disease label file; the built-in map is used when absent.
    pub disease_labels: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            encoder: PathBuf::from("clip-vit-b32-vision.onnx"),
            crop_head: PathBuf::from("crop_head.onnx"),
            disease_head: PathBuf::from("disease_head.onnx"),
            crop_labels: None,
            disease_labels: None,
        }
    }
}

impl ModelConfig {
    /// Read `dir/leafscan.json` if present, and resolve every path against `dir`.
    pub fn from_model_dir(dir: &Path) -> anyhow::Result<Self> {
        let path = dir.join(CONFIG_FILE);
        let config = if path.exists() {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };
        Ok(config.resolve(dir))
    }

    /// Make relative paths relative to `dir`. Absolute paths are kept.
    pub fn resolve(self, dir: &Path) -> Self {
        Self {
            encoder: dir.join(self.encoder),
            crop_head: dir.join(self.crop_head),
            disease_head: dir.join(self.disease_head),
            crop_labels: self.crop_labels.map(|p| dir.join(p)),
            disease_labels: self.disease_labels.map(|p| dir.join(p)),
        }
    }

    pub fn head_path(&self, space: LabelSpace) -> &Path {
        match space {
            LabelSpace::Crop => &self.crop_head,
            LabelSpace::Disease => &self.disease_head,
        }
    }

    /// Label map for `space`: the configured file, or the built-in map.
    pub fn label_map(&self, space: LabelSpace) -> anyhow::Result<LabelMap> {
        let path = match space {
            LabelSpace::Crop => self.crop_labels.as_deref(),
            LabelSpace::Disease => self.disease_labels.as_deref(),
        };
        match path {
            None => Ok(LabelMap::builtin(space)),
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {space} labels {}", path.display()))?;
                LabelMap::from_json(space, &json)
                    .with_context(|| format!("parsing {space} labels {}", path.display()))
            }
        }
    }
}
