//! Value types passed between the pipeline stages.
//!
//! [`ImageTensor`] is what the normaliser hands to the encoder and
//! [`Embedding`] is what the encoder hands to the classifiers. Both check
//! their invariants on construction, so later stages can rely on them.

use crate::error::InferenceError;

/// Input edge length expected by the embedding model.
pub const IMAGE_SIZE: usize = 224;

/// Colour channels in a normalised tensor.
pub const CHANNELS: usize = 3;

/// Normalised image, shape `[1, 3, 224, 224]`, NCHW, `f32`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
}

impl ImageTensor {
    pub const SHAPE: [usize; 4] = [1, CHANNELS, IMAGE_SIZE, IMAGE_SIZE];
    pub const LEN: usize = CHANNELS * IMAGE_SIZE * IMAGE_SIZE;

    /// Wrap a flat NCHW buffer. Fails unless it holds exactly [`Self::LEN`] values.
    pub fn from_vec(data: Vec<f32>) -> Result<Self, InferenceError> {
        if data.len() != Self::LEN {
            return Err(InferenceError::InvalidImage(format!(
                "tensor has {} values, expected {}",
                data.len(),
                Self::LEN
            )));
        }
        Ok(Self { data })
    }

    pub fn shape(&self) -> [usize; 4] {
        Self::SHAPE
    }

    /// Shape as `i64`, the form ONNX Runtime takes.
    pub fn shape_i64(&self) -> [i64; 4] {
        Self::SHAPE.map(|d| d as i64)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Value at `(channel, y, x)` of the single batch entry.
    pub fn at(&self, channel: usize, y: usize, x: usize) -> f32 {
        self.data[(channel * IMAGE_SIZE + y) * IMAGE_SIZE + x]
    }

    /// One channel plane, `IMAGE_SIZE * IMAGE_SIZE` values in row-major order.
    pub fn channel(&self, channel: usize) -> &[f32] {
        let plane = IMAGE_SIZE * IMAGE_SIZE;
        &self.data[channel * plane..(channel + 1) * plane]
    }
}

/// Unit-length image embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    /// Normalise raw encoder output to unit L2 norm.
    ///
    /// Fails on empty, all-zero or non-finite input, where the norm is undefined.
    pub fn from_raw(mut values: Vec<f32>) -> Result<Self, InferenceError> {
        if values.is_empty() {
            return Err(InferenceError::Extraction("encoder returned no values".into()));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(InferenceError::Extraction(
                "encoder output contains non-finite values".into(),
            ));
        }
        // Scale by the largest magnitude first so the sum of squares stays finite.
        let scale = values.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        if scale == 0.0 {
            return Err(InferenceError::Extraction(
                "encoder output has zero norm".into(),
            ));
        }
        for v in &mut values {
            *v /= scale;
        }
        let norm = l2_norm(&values);
        for v in &mut values {
            *v /= norm;
        }
        Ok(Self { values })
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn norm(&self) -> f32 {
        l2_norm(&self.values)
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}
