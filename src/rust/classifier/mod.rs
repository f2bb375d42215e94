use std::path::PathBuf;

mod backend;
pub mod builder;
mod classifier;
pub mod config;
mod error;
mod handle;
pub mod postprocess;
pub mod preprocess;

pub use backend::{InferenceBackend, OrtBackend};
pub use builder::ClassifierBuilder;
pub use classifier::Classifier;
pub use config::{
    ChannelOrder, ClassifierConfig, ModelConfig, Normalization, PreprocessConfig, TensorLayout,
    TensorShape,
};
pub use error::ClassifierError;
pub use handle::ModelHandle;
pub use postprocess::{argmax, postprocess, softmax, ClassificationResult, LabelTable, ScoreVector};
pub use preprocess::{preprocess, InputTensor, RawImage};

/// Information about the current state and configuration of a classifier
#[derive(Debug, Clone)]
pub struct ClassifierInfo {
    /// Path to the ONNX model file, if loaded from disk
    pub model_path: Option<PathBuf>,
    /// Number of classes the model distinguishes
    pub num_classes: usize,
    /// Labels of the classes, in model output order
    pub class_labels: Vec<String>,
    pub input_shape: TensorShape,
    pub output_shape: TensorShape,
    pub preprocess: PreprocessConfig,
    /// Whether the model has been released
    pub is_closed: bool,
}
