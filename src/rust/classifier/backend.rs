use std::collections::HashMap;
use std::path::Path;

use log::{debug, info};
use ort::session::Session;
use ort::value::{Tensor, ValueType};

use super::error::ClassifierError;
use super::postprocess::ScoreVector;
use super::preprocess::InputTensor;
use crate::runtime::{create_session_builder, RuntimeConfig};

/// Executes one forward pass of a loaded model.
///
/// Implementations only run the graph. Shape checks, locking and lifecycle
/// live in [`ModelHandle`](super::handle::ModelHandle), which owns the
/// backend and calls it with exclusive access.
pub trait InferenceBackend: Send {
    /// Input shape as declared by the model. Negative entries are symbolic.
    fn declared_input_shape(&self) -> Option<Vec<i64>>;

    /// Output shape as declared by the model. Negative entries are symbolic.
    fn declared_output_shape(&self) -> Option<Vec<i64>>;

    /// Runs the model on `input` and returns the flattened output scores.
    fn run(&mut self, input: &InputTensor) -> Result<ScoreVector, ClassifierError>;
}

/// ONNX Runtime backend over a single session.
#[derive(Debug)]
pub struct OrtBackend {
    session: Session,
    input_name: String,
    output_name: String,
    input_dims: Option<Vec<i64>>,
    output_dims: Option<Vec<i64>>,
}

impl OrtBackend {
    /// Commits a session from `model_path` and resolves the tensor names.
    ///
    /// When a name is `None` the model's first input or output is used.
    pub fn open(
        model_path: &Path,
        runtime: &RuntimeConfig,
        input_name: Option<&str>,
        output_name: Option<&str>,
    ) -> Result<Self, ClassifierError> {
        let session = create_session_builder(runtime)?.commit_from_file(model_path)?;

        let input = match input_name {
            Some(name) => session.inputs.iter().find(|i| i.name == name),
            None => session.inputs.first(),
        }
        .ok_or_else(|| {
            ClassifierError::ModelLoadError(format!(
                "Model has no input {:?}, available: {:?}",
                input_name,
                session.inputs.iter().map(|i| i.name.as_str()).collect::<Vec<_>>()
            ))
        })?;
        let output = match output_name {
            Some(name) => session.outputs.iter().find(|o| o.name == name),
            None => session.outputs.first(),
        }
        .ok_or_else(|| {
            ClassifierError::ModelLoadError(format!(
                "Model has no output {:?}, available: {:?}",
                output_name,
                session.outputs.iter().map(|o| o.name.as_str()).collect::<Vec<_>>()
            ))
        })?;

        let input_name = input.name.clone();
        let output_name = output.name.clone();
        let input_dims = tensor_dims(&input.input_type);
        let output_dims = tensor_dims(&output.output_type);
        info!(
            "Model input '{}' {:?}, output '{}' {:?}",
            input_name, input_dims, output_name, output_dims
        );

        Ok(Self {
            session,
            input_name,
            output_name,
            input_dims,
            output_dims,
        })
    }
}

fn tensor_dims(value_type: &ValueType) -> Option<Vec<i64>> {
    match value_type {
        ValueType::Tensor { dimensions, .. } => Some(dimensions.clone()),
        _ => None,
    }
}

impl InferenceBackend for OrtBackend {
    fn declared_input_shape(&self) -> Option<Vec<i64>> {
        self.input_dims.clone()
    }

    fn declared_output_shape(&self) -> Option<Vec<i64>> {
        self.output_dims.clone()
    }

    fn run(&mut self, input: &InputTensor) -> Result<ScoreVector, ClassifierError> {
        let tensor = Tensor::from_array(input.data().to_owned())
            .map_err(|e| ClassifierError::InferenceError(format!("Failed to create input tensor: {}", e)))?;

        let mut input_tensors = HashMap::new();
        input_tensors.insert(self.input_name.as_str(), tensor);

        let outputs = self.session.run(input_tensors)
            .map_err(|e| ClassifierError::InferenceError(format!("Failed to run model: {}", e)))?;
        let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            ClassifierError::InferenceError(format!("Output '{}' missing from results", self.output_name))
        })?;
        let scores = output.try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceError(format!("Failed to extract output tensor: {}", e)))?;

        debug!("Output tensor shape: {:?}", scores.shape());
        Ok(ScoreVector::new(scores.iter().copied().collect()))
    }
}
