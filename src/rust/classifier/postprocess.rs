use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::ClassifierError;

/// Raw, pre-softmax model scores in class index order.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreVector(Vec<f32>);

impl ScoreVector {
    pub fn new(scores: Vec<f32>) -> Self {
        Self(scores)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<f32>> for ScoreVector {
    fn from(scores: Vec<f32>) -> Self {
        Self(scores)
    }
}

/// Class names, index-aligned with the model's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable(Vec<String>);

impl LabelTable {
    /// Builds a table, rejecting an empty list and blank labels.
    pub fn new<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Result<Self, ClassifierError> {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(ClassifierError::ConfigError("Label table cannot be empty".into()));
        }
        if let Some(pos) = labels.iter().position(|l| l.trim().is_empty()) {
            return Err(ClassifierError::ConfigError(format!(
                "Label {} cannot be empty",
                pos + 1
            )));
        }
        Ok(Self(labels))
    }

    /// Reads one label per line; blank lines are skipped.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ClassifierError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            ClassifierError::ConfigError(format!("Failed to read labels from {}: {}", path.display(), e))
        })?;
        Self::new(text.lines().map(str::trim).filter(|l| !l.is_empty()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn labels(&self) -> &[String] {
        &self.0
    }
}

/// The winning class and its softmax probability as a percentage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: String,
    /// Probability of `label` in `[0, 100]`.
    pub confidence: f32,
    pub class_index: usize,
}

impl fmt::Display for ClassificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} : {:.2}%", self.label, self.confidence)
    }
}

/// Softmax with the maximum subtracted first, so large scores cannot overflow `exp`.
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|&s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the largest value. Ties go to the lowest index.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Turns raw scores into the top label and its confidence.
pub fn postprocess(
    scores: &ScoreVector,
    labels: &LabelTable,
) -> Result<ClassificationResult, ClassifierError> {
    if scores.is_empty() {
        return Err(ClassifierError::EmptyScoreVector);
    }
    if scores.len() != labels.len() {
        return Err(ClassifierError::ConfigError(format!(
            "Model produced {} scores but {} labels are configured",
            scores.len(),
            labels.len()
        )));
    }
    if let Some(pos) = scores.as_slice().iter().position(|s| !s.is_finite()) {
        return Err(ClassifierError::InferenceError(format!(
            "Score {} is not finite: {}",
            pos,
            scores.as_slice()[pos]
        )));
    }

    let probabilities = softmax(scores.as_slice());
    let winner = argmax(&probabilities).ok_or(ClassifierError::EmptyScoreVector)?;
    let label = labels
        .get(winner)
        .ok_or_else(|| ClassifierError::ConfigError(format!("No label for class {}", winner)))?;

    Ok(ClassificationResult {
        label: label.to_string(),
        confidence: (probabilities[winner] * 100.0).clamp(0.0, 100.0),
        class_index: winner,
    })
}
