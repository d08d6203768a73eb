//! Image embedding extraction.
//!
//! An [`ImageEncoder`] maps a normalised image tensor to raw features;
//! [`extract`] turns those into a unit-norm [`Embedding`]. The heads were
//! trained on unit-norm CLIP features, so skipping the normalisation would
//! silently shift every prediction.

use leafscan_core::{Embedding, ImageTensor, InferenceError};

/// Vision backbone producing one feature vector per image.
///
/// Implementations hold immutable weights and are shared across threads.
pub trait ImageEncoder: Send + Sync {
    /// Length of the vector returned by [`encode`](Self::encode) (512 for CLIP ViT-B/32).
    fn dim(&self) -> usize;

    /// Raw, un-normalised features for one image.
    fn encode(&self, tensor: &ImageTensor) -> Result<Vec<f32>, InferenceError>;
}

/// Encode `tensor` and L2-normalise the result.
pub fn extract(
    encoder: &dyn ImageEncoder,
    tensor: &ImageTensor,
) -> Result<Embedding, InferenceError> {
    let raw = encoder.encode(tensor)?;
    if raw.len() != encoder.dim() {
        return Err(InferenceError::Extraction(format!(
            "encoder returned {} values, expected {}",
            raw.len(),
            encoder.dim()
        )));
    }
    Embedding::from_raw(raw)
}
