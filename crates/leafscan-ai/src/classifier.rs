//! Label classification: embedding → (class index, class name).
//!
//! A [`LabelClassifier`] pairs one [`ScoreHead`] with the [`LabelMap`] for its
//! label space. The crop and disease classifiers are two independent
//! instances that differ only in weights and class count.

use leafscan_core::{Embedding, InferenceError, LabelMap, LabelSpace, Prediction};
use tracing::info;

use crate::head::ScoreHead;

/// Classifier for one label space.
pub struct LabelClassifier {
    head: Box<dyn ScoreHead>,
    labels: LabelMap,
}

impl LabelClassifier {
    /// Pair a head with its label map. The head must score exactly one class
    /// per label.
    pub fn new(head: Box<dyn ScoreHead>, labels: LabelMap) -> anyhow::Result<Self> {
        anyhow::ensure!(
            head.num_classes() == labels.len(),
            "{} head scores {} classes but the label map has {}",
            labels.space(),
            head.num_classes(),
            labels.len()
        );
        info!(
            space = %labels.space(),
            input_dim = head.input_dim(),
            classes = labels.len(),
            "classifier ready"
        );
        Ok(Self { head, labels })
    }

    pub fn space(&self) -> LabelSpace {
        self.labels.space()
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    /// Embedding width this classifier accepts.
    pub fn input_dim(&self) -> usize {
        self.head.input_dim()
    }

    pub fn num_classes(&self) -> usize {
        self.head.num_classes()
    }

    /// Score the embedding and return the best class.
    pub fn classify(&self, embedding: &Embedding) -> Result<Prediction, InferenceError> {
        if embedding.dim() != self.input_dim() {
            return Err(InferenceError::DimensionMismatch {
                expected: self.input_dim(),
                actual: embedding.dim(),
            });
        }

        let scores = self.head.scores(embedding.as_slice())?;
        if scores.len() != self.num_classes() {
            return Err(InferenceError::Backend(format!(
                "{} head returned {} scores, expected {}",
                self.space(),
                scores.len(),
                self.num_classes()
            )));
        }

        select(&scores, &self.labels)
    }
}

/// Pick the best-scoring class and name it from `labels`.
pub fn select(scores: &[f32], labels: &LabelMap) -> Result<Prediction, InferenceError> {
    let index = argmax(scores)
        .ok_or_else(|| InferenceError::Backend("classifier produced no comparable scores".into()))?;
    let name = labels.name(index)?;
    Ok(Prediction::new(index, name))
}

/// Index of the highest score. Ties go to the lowest index; NaN never wins.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}
