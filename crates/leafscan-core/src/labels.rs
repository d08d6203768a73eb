//! Class index → name maps for the two label spaces.
//!
//! A map is stored as an ordered `Vec`, so its indices are always the
//! contiguous range `0..len` and each index appears once. Maps are built at
//! startup and never mutated.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{InferenceError, LabelMapError};

/// Crop species, in classifier output order.
pub const CROP_LABELS: &[&str] = &[
    "Apple Leaf",
    "Blueberry Leaf",
    "Cherry Leaf",
    "Corn Leaf",
    "Grape Leaf",
    "Orange Leaf",
    "Peach Leaf",
    "Pepper Leaf",
    "Potato Leaf",
    "Raspberry Leaf",
    "Soybean Leaf",
    "Squash Leaf",
    "Strawberry Leaf",
    "Tomato Leaf",
];

/// Disease conditions, in classifier output order.
pub const DISEASE_LABELS: &[&str] = &[
    "Healthy Leaf",
    "Apple Leaf with Scab",
    "Black Rot",
    "Cedar apple rust",
    "Powdery Mildew",
    "Cercospora leaf spot (Gray leaf spot)",
    "Common rust",
    "Northern Leaf Blight",
    "Esca (Black Measles)",
    "Leaf blight (Isariopsis Leaf Spot)",
    "Huanglongbing (Citrus Greening)",
    "Bacterial spot",
    "Early blight",
    "Late blight",
    "Leaf scorch",
    "Leaf Mold",
    "Septoria leaf spot",
    "Spider mites (Two-spotted spider mite)",
    "Target Spot",
    "Tomato Leaf with Yellow Leaf Curl Virus",
    "Tomato Leaf with Mosaic Virus",
];

/// One of the two independent classification problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelSpace {
    Crop,
    Disease,
}

impl LabelSpace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crop => "crop",
            Self::Disease => "disease",
        }
    }
}

impl fmt::Display for LabelSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered class index → name map for one label space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    space: LabelSpace,
    names: Vec<String>,
}

impl LabelMap {
    /// The compiled-in map for a label space.
    pub fn builtin(space: LabelSpace) -> Self {
        let names = match space {
            LabelSpace::Crop => CROP_LABELS,
            LabelSpace::Disease => DISEASE_LABELS,
        };
        Self {
            space,
            names: names.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn crop() -> Self {
        Self::builtin(LabelSpace::Crop)
    }

    pub fn disease() -> Self {
        Self::builtin(LabelSpace::Disease)
    }

    /// Build a map from names already in index order.
    pub fn from_names(space: LabelSpace, names: Vec<String>) -> Result<Self, LabelMapError> {
        if names.is_empty() {
            return Err(LabelMapError::Empty);
        }
        Ok(Self { space, names })
    }

    /// Parse a label file of the form `{"0": "Apple Leaf", "1": "Blueberry Leaf", ...}`.
    ///
    /// Keys must be integers covering exactly `0..n`.
    pub fn from_json(space: LabelSpace, json: &str) -> Result<Self, LabelMapError> {
        let raw: BTreeMap<String, String> = serde_json::from_str(json)?;

        let mut by_index = BTreeMap::new();
        for (key, name) in raw {
            let index: usize = key
                .trim()
                .parse()
                .map_err(|_| LabelMapError::BadKey(key.clone()))?;
            if by_index.insert(index, name).is_some() {
                return Err(LabelMapError::Duplicate(index));
            }
        }

        let len = by_index.len();
        // BTreeMap iterates in key order, so any gap shows up as a mismatch here.
        for (expected, &index) in by_index.keys().enumerate() {
            if index != expected {
                return Err(LabelMapError::Gap {
                    missing: expected,
                    len,
                });
            }
        }

        Self::from_names(space, by_index.into_values().collect())
    }

    pub fn space(&self) -> LabelSpace {
        self.space
    }

    /// Number of classes.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Look up a class name, treating an out-of-range index as a fault.
    pub fn name(&self, index: usize) -> Result<&str, InferenceError> {
        self.get(index).ok_or(InferenceError::UnknownLabel {
            index,
            len: self.len(),
        })
    }

    /// Iterate `(index, name)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names.iter().map(String::as_str).enumerate()
    }
}
