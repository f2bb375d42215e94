use std::path::PathBuf;

use log::{error, info};

use super::backend::InferenceBackend;
use super::classifier::Classifier;
use super::config::{ClassifierConfig, ModelConfig, PreprocessConfig};
use super::error::ClassifierError;
use super::handle::ModelHandle;
use super::postprocess::LabelTable;
use crate::model_manager::ModelManager;
use crate::runtime::RuntimeConfig;

/// Where the builder gets its model from.
enum ModelSource {
    Path(PathBuf),
    Backend(Box<dyn InferenceBackend>),
}

impl std::fmt::Debug for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            ModelSource::Backend(_) => f.write_str("Backend(..)"),
        }
    }
}

/// A builder for constructing a Classifier with a fluent interface.
///
/// Nothing is loaded until [`build`](Self::build); a failed build leaves no
/// usable classifier behind.
#[derive(Debug, Default)]
pub struct ClassifierBuilder {
    source: Option<ModelSource>,
    labels: Option<LabelTable>,
    model_config: ModelConfig,
    preprocess_config: PreprocessConfig,
    runtime_config: RuntimeConfig,
    expected_sha256: Option<String>,
}

impl ClassifierBuilder {
    /// Creates a new empty ClassifierBuilder instance with default configuration
    ///
    /// # Example
    /// ```
    /// use asclepius::ClassifierBuilder;
    ///
    /// let builder = ClassifierBuilder::new();
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from a [`ClassifierConfig`], typically read from JSON.
    pub fn from_config(config: ClassifierConfig) -> Result<Self, ClassifierError> {
        let mut builder = Self::new()
            .with_model_config(config.model)
            .with_preprocess_config(config.preprocess)
            .with_labels(config.labels)?
            .with_model(config.model_path)?;
        builder.expected_sha256 = config.model_sha256.map(|hash| hash.to_lowercase());
        Ok(builder)
    }

    /// Sets the runtime configuration for ONNX model execution
    pub fn with_runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.runtime_config = config;
        self
    }

    /// Sets the tensor shapes and names the model must match.
    pub fn with_model_config(mut self, config: ModelConfig) -> Self {
        self.model_config = config;
        self
    }

    /// Sets channel order, layout and value normalization of the input tensor.
    pub fn with_preprocess_config(mut self, config: PreprocessConfig) -> Self {
        self.preprocess_config = config;
        self
    }

    /// Sets the class labels, index-aligned with the model output.
    ///
    /// # Example
    /// ```
    /// use asclepius::ClassifierBuilder;
    ///
    /// let builder = ClassifierBuilder::new()
    ///     .with_labels(["Non-Cancer", "Cancer"]);
    /// assert!(builder.is_ok());
    /// ```
    pub fn with_labels<S: Into<String>>(
        mut self,
        labels: impl IntoIterator<Item = S>,
    ) -> Result<Self, ClassifierError> {
        if self.labels.is_some() {
            return Err(ClassifierError::ConfigError("Labels already set".to_string()));
        }
        self.labels = Some(LabelTable::new(labels)?);
        Ok(self)
    }

    /// Sets an already-built label table.
    pub fn with_label_table(mut self, labels: LabelTable) -> Result<Self, ClassifierError> {
        if self.labels.is_some() {
            return Err(ClassifierError::ConfigError("Labels already set".to_string()));
        }
        self.labels = Some(labels);
        Ok(self)
    }

    /// Uses the ONNX model file at `model_path`. The file is opened by `build`.
    pub fn with_model(mut self, model_path: impl Into<PathBuf>) -> Result<Self, ClassifierError> {
        let model_path = model_path.into();
        if model_path.as_os_str().is_empty() {
            return Err(ClassifierError::ConfigError("Model path cannot be empty".to_string()));
        }
        if self.source.is_some() {
            return Err(ClassifierError::ConfigError("Model already set".to_string()));
        }
        self.source = Some(ModelSource::Path(model_path));
        Ok(self)
    }

    /// Uses a custom inference backend instead of an ONNX file.
    pub fn with_backend(mut self, backend: Box<dyn InferenceBackend>) -> Result<Self, ClassifierError> {
        if self.source.is_some() {
            return Err(ClassifierError::ConfigError("Model already set".to_string()));
        }
        self.source = Some(ModelSource::Backend(backend));
        Ok(self)
    }

    /// Requires the model file to hash to `sha256` (lowercase hex) before loading.
    pub fn with_expected_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.expected_sha256 = Some(sha256.into().to_lowercase());
        self
    }

    /// Validates the configuration, loads the model and returns the classifier.
    ///
    /// # Returns
    /// * `Result<Classifier, ClassifierError>` - The constructed Classifier if successful, or an error if:
    ///   - No model or labels were set
    ///   - The input shape does not describe a square 3-channel image
    ///   - The label count differs from the model's output size
    ///   - The model file is missing, corrupt, or has mismatching shapes
    pub fn build(self) -> Result<Classifier, ClassifierError> {
        let source = self.source
            .ok_or_else(|| ClassifierError::ConfigError("Model must be set".to_string()))?;
        let labels = self.labels
            .ok_or_else(|| ClassifierError::ConfigError("Labels must be set".to_string()))?;

        let target_size = self.model_config.target_size(self.preprocess_config.layout)?;
        if labels.len() != self.model_config.num_classes() {
            return Err(ClassifierError::ConfigError(format!(
                "{} labels configured but the model output {} holds {} classes",
                labels.len(),
                self.model_config.output_shape,
                self.model_config.num_classes()
            )));
        }
        self.preprocess_config.normalization.validate()?;

        let (handle, model_path) = match source {
            ModelSource::Path(path) => {
                if let Some(expected) = &self.expected_sha256 {
                    Self::verify_digest(&path, expected)?;
                }
                let handle = ModelHandle::open(&path, &self.model_config, &self.runtime_config)
                    .map_err(|e| {
                        error!("Classifier unavailable: {}", e);
                        e
                    })?;
                (handle, Some(path))
            }
            ModelSource::Backend(backend) => {
                (ModelHandle::from_backend(backend, &self.model_config)?, None)
            }
        };

        info!(
            "Classifier ready with {} classes at {}x{} input",
            labels.len(),
            target_size,
            target_size
        );
        Ok(Classifier::new(
            handle,
            labels,
            self.preprocess_config,
            target_size,
            model_path,
        ))
    }

    fn verify_digest(path: &std::path::Path, expected: &str) -> Result<(), ClassifierError> {
        let actual = ModelManager::sha256_file(path)
            .map_err(|e| ClassifierError::ModelLoadError(e.to_string()))?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(ClassifierError::ModelLoadError(format!(
                "Model hash mismatch for {}: expected {}, got {}",
                path.display(),
                expected,
                actual
            )));
        }
        info!("Model digest verified");
        Ok(())
    }
}
