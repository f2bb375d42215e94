//! A thread-safe image classifier running fixed-shape ONNX models.
//!
//! An image goes through three steps: it is resized and laid out as a
//! normalized float tensor, run through the model, and the raw scores are
//! turned into a label with a softmax confidence.
//!
//! # Basic Usage
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use asclepius::{Classifier, RawImage};
//!
//! let classifier = Classifier::builder()
//!     .with_model("cancer_classification.onnx")?
//!     .with_labels(["Non-Cancer", "Cancer"])?
//!     .build()?;
//!
//! let result = classifier.classify(&RawImage::from_path("lesion.jpg")?)?;
//! println!("Predicted class: {}", result);
//! # Ok(())
//! # }
//! ```
//!
//! # Input normalization
//!
//! By default pixel values are fed as raw `0..=255` floats. Models trained on
//! scaled input need [`Normalization::UnitRange`] or
//! [`Normalization::MeanStd`], set through [`PreprocessConfig`].
//!
//! # Thread Safety
//!
//! The classifier can be shared across threads using `Arc`. Inference on
//! the shared model is serialized by a mutex inside [`ModelHandle`]:
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use asclepius::{Classifier, RawImage};
//! use std::sync::Arc;
//! use std::thread;
//!
//! let classifier = Arc::new(Classifier::builder()
//!     .with_model("cancer_classification.onnx")?
//!     .with_labels(["Non-Cancer", "Cancer"])?
//!     .build()?);
//!
//! let mut handles = vec![];
//! for _ in 0..3 {
//!     let classifier = Arc::clone(&classifier);
//!     handles.push(thread::spawn(move || {
//!         let image = RawImage::new(64, 64, 3, vec![128; 64 * 64 * 3]);
//!         classifier.classify(&image).unwrap();
//!     }));
//! }
//!
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod history;
pub mod model_manager;
mod runtime;

pub use classifier::{
    ChannelOrder, ClassificationResult, Classifier, ClassifierBuilder, ClassifierConfig,
    ClassifierError, ClassifierInfo, InferenceBackend, InputTensor, LabelTable, ModelConfig,
    ModelHandle, Normalization, OrtBackend, PreprocessConfig, RawImage, ScoreVector, TensorLayout,
    TensorShape,
};
pub use history::{HistoryEntry, HistoryError, HistoryLog};
pub use model_manager::{ModelError, ModelManager};
pub use runtime::{create_session_builder, RuntimeConfig};

pub fn init_logger() {
    env_logger::init();
}
