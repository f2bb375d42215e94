use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};

use super::config::PreprocessConfig;
use super::error::ClassifierError;
use super::handle::ModelHandle;
use super::postprocess::{postprocess, ClassificationResult, LabelTable};
use super::preprocess::{preprocess, RawImage};

/// A thread-safe image classifier: preprocess, infer, postprocess.
///
/// # Thread Safety
///
/// `Classifier` is `Send + Sync` and can be shared through `Arc`. Inference
/// calls on the shared model are serialized by the [`ModelHandle`]; the
/// preprocessing and postprocessing around them run in parallel.
///
/// ```no_run
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use asclepius::{Classifier, RawImage};
///
/// let classifier = Classifier::builder()
///     .with_model("cancer_classification.onnx")?
///     .with_labels(["Non-Cancer", "Cancer"])?
///     .build()?;
///
/// let image = RawImage::from_path("lesion.jpg")?;
/// let result = classifier.classify(&image)?;
/// println!("{}", result);
/// classifier.shutdown()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Classifier {
    handle: ModelHandle,
    labels: LabelTable,
    preprocess: PreprocessConfig,
    target_size: u32,
    model_path: Option<PathBuf>,
}

// Compile-time verification of thread-safety
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn verify_thread_safety() {
        assert_send_sync::<Classifier>();
    }
};

impl Classifier {
    /// Creates a new ClassifierBuilder for fluent construction
    pub fn builder() -> super::builder::ClassifierBuilder {
        super::builder::ClassifierBuilder::new()
    }

    pub(crate) fn new(
        handle: ModelHandle,
        labels: LabelTable,
        preprocess: PreprocessConfig,
        target_size: u32,
        model_path: Option<PathBuf>,
    ) -> Self {
        Self { handle, labels, preprocess, target_size, model_path }
    }

    /// Returns information about the classifier's current state
    pub fn info(&self) -> super::ClassifierInfo {
        super::ClassifierInfo {
            model_path: self.model_path.clone(),
            num_classes: self.labels.len(),
            class_labels: self.labels.labels().to_vec(),
            input_shape: self.handle.input_shape().clone(),
            output_shape: self.handle.output_shape().clone(),
            preprocess: self.preprocess,
            is_closed: self.handle.is_closed(),
        }
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// Classifies one image.
    ///
    /// # Errors
    /// - `InvalidImageError` if the image cannot be preprocessed
    /// - `InferenceError` if the model run fails
    /// - `ClosedHandle` after [`shutdown`](Self::shutdown)
    pub fn classify(&self, image: &RawImage) -> Result<ClassificationResult, ClassifierError> {
        if self.handle.is_closed() {
            return Err(ClassifierError::ClosedHandle);
        }
        let start = Instant::now();

        let tensor = preprocess(image, self.target_size, &self.preprocess)?;
        let scores = self.handle.infer(&tensor)?;
        let result = postprocess(&scores, &self.labels)?;

        debug!(
            "Classified {}x{} image as {} in {:.2?}",
            image.width(),
            image.height(),
            result,
            start.elapsed()
        );
        Ok(result)
    }

    /// Decodes the image file at `path` and classifies it.
    pub fn classify_path<P: AsRef<Path>>(&self, path: P) -> Result<ClassificationResult, ClassifierError> {
        let image = RawImage::from_path(path)?;
        self.classify(&image)
    }

    /// Classifies on the blocking thread pool, waiting at most `timeout`.
    ///
    /// On timeout the caller gets `Timeout` immediately; the inference itself
    /// is not interrupted and completes in the background.
    pub async fn classify_async(
        self: Arc<Self>,
        image: RawImage,
        timeout: Option<Duration>,
    ) -> Result<ClassificationResult, ClassifierError> {
        let task = tokio::task::spawn_blocking(move || self.classify(&image));
        let joined = match timeout {
            Some(limit) => tokio::time::timeout(limit, task)
                .await
                .map_err(|_| ClassifierError::Timeout(limit))?,
            None => task.await,
        };
        joined.map_err(|e| ClassifierError::InferenceError(format!("Classification task failed: {}", e)))?
    }

    /// Releases the model. Every later `classify` fails with `ClosedHandle`.
    pub fn shutdown(&self) -> Result<(), ClassifierError> {
        info!("Shutting down classifier");
        self.handle.close()
    }

    pub fn is_shut_down(&self) -> bool {
        self.handle.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::backend::InferenceBackend;
    use crate::classifier::postprocess::ScoreVector;
    use crate::classifier::preprocess::InputTensor;

    struct ScriptedBackend(Vec<f32>);

    impl InferenceBackend for ScriptedBackend {
        fn declared_input_shape(&self) -> Option<Vec<i64>> {
            Some(vec![1, 224, 224, 3])
        }

        fn declared_output_shape(&self) -> Option<Vec<i64>> {
            Some(vec![1, 2])
        }

        fn run(&mut self, _input: &InputTensor) -> Result<ScoreVector, ClassifierError> {
            Ok(ScoreVector::new(self.0.clone()))
        }
    }

    fn scripted(scores: Vec<f32>) -> Classifier {
        Classifier::builder()
            .with_backend(Box::new(ScriptedBackend(scores)))
            .unwrap()
            .with_labels(["Non-Cancer", "Cancer"])
            .unwrap()
            .build()
            .expect("Failed to create classifier")
    }

    fn photo() -> RawImage {
        RawImage::new(320, 240, 3, vec![90; 320 * 240 * 3])
    }

    #[test]
    fn test_class_info() {
        let classifier = scripted(vec![2.0, 5.0]);
        let info = classifier.info();
        assert_eq!(info.num_classes, 2);
        assert_eq!(info.class_labels, vec!["Non-Cancer", "Cancer"]);
        assert_eq!(info.input_shape.dims(), &[1, 224, 224, 3]);
        assert!(info.model_path.is_none());
        assert!(!info.is_closed);
    }

    #[test]
    fn test_classify_scripted_scores() {
        let classifier = scripted(vec![2.0, 5.0]);
        let result = classifier.classify(&photo()).unwrap();
        assert_eq!(result.label, "Cancer");
        assert!((result.confidence - 95.2574).abs() < 1e-2);
    }

    #[test]
    fn test_invalid_image_is_recoverable() {
        let classifier = scripted(vec![2.0, 5.0]);
        let err = classifier.classify(&RawImage::new(0, 0, 3, vec![])).unwrap_err();
        assert!(matches!(err, ClassifierError::InvalidImageError(_)));
        assert!(err.is_recoverable());
        assert!(classifier.classify(&photo()).is_ok());
    }

    #[test]
    fn test_shutdown_then_classify() {
        let classifier = scripted(vec![2.0, 5.0]);
        classifier.shutdown().unwrap();
        assert!(classifier.is_shut_down());
        assert!(matches!(classifier.classify(&photo()), Err(ClassifierError::ClosedHandle)));
        assert!(matches!(classifier.shutdown(), Err(ClassifierError::ClosedHandle)));
    }

    #[tokio::test]
    async fn test_classify_async() {
        let classifier = Arc::new(scripted(vec![1.0, 0.0]));
        let result = Arc::clone(&classifier)
            .classify_async(photo(), Some(Duration::from_secs(30)))
            .await
            .unwrap();
        assert_eq!(result.label, "Non-Cancer");
    }

    #[test]
    fn test_classify_async_after_shutdown() {
        let classifier = Arc::new(scripted(vec![1.0, 0.0]));
        classifier.shutdown().unwrap();
        let result = tokio_test::block_on(Arc::clone(&classifier).classify_async(photo(), None));
        assert!(matches!(result, Err(ClassifierError::ClosedHandle)));
    }
}
