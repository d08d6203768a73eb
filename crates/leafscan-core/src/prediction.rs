//! Inference results returned to callers.

use serde::{Deserialize, Serialize};

/// Winning class in one label space.
///
/// Serialised as `{"class": 3, "name": "Corn Leaf"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(rename = "class")]
    pub index: usize,
    pub name: String,
}

impl Prediction {
    pub fn new(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }
}

/// Complete outcome for one image: one prediction per label space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub crop: Prediction,
    pub disease: Prediction,
}
