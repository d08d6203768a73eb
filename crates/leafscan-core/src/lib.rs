pub mod error;
pub mod labels;
pub mod prediction;
pub mod tensor;

pub use error::{InferenceError, LabelMapError};
pub use labels::{LabelMap, LabelSpace};
pub use prediction::{Diagnosis, Prediction};
pub use tensor::{Embedding, ImageTensor};
