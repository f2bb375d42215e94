use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};

use super::backend::{InferenceBackend, OrtBackend};
use super::config::{ModelConfig, TensorShape};
use super::error::ClassifierError;
use super::postprocess::ScoreVector;
use super::preprocess::InputTensor;
use crate::runtime::RuntimeConfig;

/// A loaded, ready-to-run model.
///
/// The backend sits behind a mutex: concurrent [`infer`](Self::infer) calls
/// are serialized, and [`close`](Self::close) waits for an in-flight call to
/// finish before releasing the backend. After closing, every call fails with
/// [`ClassifierError::ClosedHandle`].
pub struct ModelHandle {
    backend: Mutex<Option<Box<dyn InferenceBackend>>>,
    config: ModelConfig,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ModelHandle {
    /// Opens an ONNX model file and checks its declared shapes against `config`.
    pub fn open<P: AsRef<Path>>(
        model_path: P,
        config: &ModelConfig,
        runtime: &RuntimeConfig,
    ) -> Result<Self, ClassifierError> {
        let model_path = model_path.as_ref();
        if !model_path.is_file() {
            return Err(ClassifierError::ModelLoadError(format!(
                "Model file not found: {}",
                model_path.display()
            )));
        }

        info!("Loading model from {}", model_path.display());
        let backend = OrtBackend::open(
            model_path,
            runtime,
            config.input_name.as_deref(),
            config.output_name.as_deref(),
        )?;
        Self::from_backend(Box::new(backend), config)
    }

    /// Wraps an already-loaded backend, applying the same shape validation as [`open`](Self::open).
    pub fn from_backend(
        backend: Box<dyn InferenceBackend>,
        config: &ModelConfig,
    ) -> Result<Self, ClassifierError> {
        if config.input_shape.num_elements() == 0 || config.output_shape.num_elements() == 0 {
            return Err(ClassifierError::ConfigError(format!(
                "Configured shapes must be non-empty, got input {} and output {}",
                config.input_shape, config.output_shape
            )));
        }
        Self::check_declared("input", backend.declared_input_shape(), &config.input_shape)?;
        Self::check_declared("output", backend.declared_output_shape(), &config.output_shape)?;

        info!(
            "Model ready: input {}, output {}",
            config.input_shape, config.output_shape
        );
        Ok(Self {
            backend: Mutex::new(Some(backend)),
            config: config.clone(),
        })
    }

    fn check_declared(
        kind: &str,
        declared: Option<Vec<i64>>,
        configured: &TensorShape,
    ) -> Result<(), ClassifierError> {
        match declared {
            Some(dims) if !configured.accepts_declared(&dims) => Err(ClassifierError::ModelLoadError(format!(
                "Model {} shape {:?} does not match configured {}",
                kind, dims, configured
            ))),
            Some(_) => Ok(()),
            None => {
                warn!("Model does not declare an {} shape, relying on runtime checks", kind);
                Ok(())
            }
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn input_shape(&self) -> &TensorShape {
        &self.config.input_shape
    }

    pub fn output_shape(&self) -> &TensorShape {
        &self.config.output_shape
    }

    /// Runs one inference. Blocks while another call holds the model.
    pub fn infer(&self, input: &InputTensor) -> Result<ScoreVector, ClassifierError> {
        let mut guard = self.lock()?;
        let backend = guard.as_mut().ok_or(ClassifierError::ClosedHandle)?;

        if input.shape() != self.config.input_shape.dims() {
            return Err(ClassifierError::InferenceError(format!(
                "Input tensor shape {:?} does not match model input {}",
                input.shape(),
                self.config.input_shape
            )));
        }

        let scores = backend.run(input)?;
        let expected = self.config.num_classes();
        if scores.len() != expected {
            return Err(ClassifierError::InferenceError(format!(
                "Model returned {} scores, expected {} for output {}",
                scores.len(),
                expected,
                self.config.output_shape
            )));
        }
        debug!("Raw scores: {:?}", scores.as_slice());
        Ok(scores)
    }

    /// Releases the model. Fails with `ClosedHandle` if already closed.
    ///
    /// A lock poisoned by a panicked inference is recovered so the backend is
    /// still released.
    pub fn close(&self) -> Result<(), ClassifierError> {
        let mut guard = self.backend.lock().unwrap_or_else(|poisoned| {
            warn!("Closing a model handle poisoned by a panicked inference");
            PoisonError::into_inner(poisoned)
        });
        match guard.take() {
            Some(backend) => {
                drop(backend);
                info!("Model handle closed");
                Ok(())
            }
            None => Err(ClassifierError::ClosedHandle),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self.backend.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Box<dyn InferenceBackend>>>, ClassifierError> {
        match self.backend.lock() {
            Ok(guard) => Ok(guard),
            Err(poisoned) if poisoned.get_ref().is_none() => Err(ClassifierError::ClosedHandle),
            Err(_) => Err(ClassifierError::InferenceError(
                "Model lock poisoned by a panicked inference".into(),
            )),
        }
    }
}

// Compile-time verification of thread-safety
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn verify_thread_safety() {
        assert_send_sync::<ModelHandle>();
    }
};

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedBackend {
        scores: Vec<f32>,
        declared_input: Option<Vec<i64>>,
        calls: Arc<AtomicUsize>,
    }

    impl InferenceBackend for FixedBackend {
        fn declared_input_shape(&self) -> Option<Vec<i64>> {
            self.declared_input.clone()
        }

        fn declared_output_shape(&self) -> Option<Vec<i64>> {
            Some(vec![1, 2])
        }

        fn run(&mut self, _input: &InputTensor) -> Result<ScoreVector, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ScoreVector::new(self.scores.clone()))
        }
    }

    fn handle_with(scores: Vec<f32>, declared_input: Option<Vec<i64>>) -> (ModelHandle, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = FixedBackend { scores, declared_input, calls: Arc::clone(&calls) };
        let handle = ModelHandle::from_backend(Box::new(backend), &ModelConfig::default()).unwrap();
        (handle, calls)
    }

    fn tensor(shape: &[usize]) -> InputTensor {
        InputTensor::from_array(ArrayD::zeros(IxDyn(shape)))
    }

    #[test]
    fn test_infer_returns_scores() {
        let (handle, calls) = handle_with(vec![2.0, 5.0], Some(vec![-1, 224, 224, 3]));
        let scores = handle.infer(&tensor(&[1, 224, 224, 3])).unwrap();
        assert_eq!(scores.as_slice(), &[2.0, 5.0]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shape_mismatch_never_reaches_backend() {
        let (handle, calls) = handle_with(vec![2.0, 5.0], None);
        let shapes: [&[usize]; 4] = [&[1, 224, 224, 1], &[1, 3, 224, 224], &[224, 224, 3], &[2, 224, 224, 3]];
        for shape in shapes {
            assert!(matches!(
                handle.infer(&tensor(shape)),
                Err(ClassifierError::InferenceError(_))
            ));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_wrong_output_length_is_inference_error() {
        let (handle, _) = handle_with(vec![1.0, 2.0, 3.0], None);
        assert!(matches!(
            handle.infer(&tensor(&[1, 224, 224, 3])),
            Err(ClassifierError::InferenceError(_))
        ));
    }

    #[test]
    fn test_declared_shape_mismatch_fails_load() {
        let backend = FixedBackend {
            scores: vec![0.0, 0.0],
            declared_input: Some(vec![1, 3, 224, 224]),
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let result = ModelHandle::from_backend(Box::new(backend), &ModelConfig::default());
        assert!(matches!(result, Err(ClassifierError::ModelLoadError(_))));
    }

    #[test]
    fn test_close_twice_and_infer_after_close() {
        let (handle, calls) = handle_with(vec![2.0, 5.0], None);
        assert!(!handle.is_closed());
        handle.close().unwrap();
        assert!(handle.is_closed());
        assert!(matches!(handle.close(), Err(ClassifierError::ClosedHandle)));
        assert!(matches!(
            handle.infer(&tensor(&[1, 224, 224, 3])),
            Err(ClassifierError::ClosedHandle)
        ));
        // closed is reported before shape problems
        assert!(matches!(handle.infer(&tensor(&[1])), Err(ClassifierError::ClosedHandle)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    struct PanickingBackend;

    impl InferenceBackend for PanickingBackend {
        fn declared_input_shape(&self) -> Option<Vec<i64>> {
            None
        }

        fn declared_output_shape(&self) -> Option<Vec<i64>> {
            None
        }

        fn run(&mut self, _input: &InputTensor) -> Result<ScoreVector, ClassifierError> {
            panic!("backend crashed");
        }
    }

    #[test]
    fn test_close_after_backend_panic() {
        let handle = ModelHandle::from_backend(Box::new(PanickingBackend), &ModelConfig::default()).unwrap();
        let input = tensor(&[1, 224, 224, 3]);

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handle.infer(&input)));
        assert!(outcome.is_err());

        // a poisoned handle refuses inference but can still be released
        assert!(matches!(handle.infer(&input), Err(ClassifierError::InferenceError(_))));
        handle.close().unwrap();
        assert!(handle.is_closed());
        assert!(matches!(handle.close(), Err(ClassifierError::ClosedHandle)));
        assert!(matches!(handle.infer(&input), Err(ClassifierError::ClosedHandle)));
    }

    #[test]
    fn test_missing_model_file() {
        let result = ModelHandle::open(
            "/nonexistent/cancer_classification.onnx",
            &ModelConfig::default(),
            &RuntimeConfig::default(),
        );
        assert!(matches!(result, Err(ClassifierError::ModelLoadError(_))));
    }
}
