use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::ClassifierError;

/// A fixed tensor shape, outermost dimension first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TensorShape(Vec<usize>);

impl TensorShape {
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self(dims.into())
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements; an empty shape has none.
    pub fn num_elements(&self) -> usize {
        if self.0.is_empty() {
            0
        } else {
            self.0.iter().product()
        }
    }

    /// Checks a shape declared by a model artifact against this one.
    /// Negative declared dimensions are symbolic and accept any size.
    pub fn accepts_declared(&self, declared: &[i64]) -> bool {
        declared.len() == self.0.len()
            && declared
                .iter()
                .zip(&self.0)
                .all(|(&d, &c)| d < 0 || d as usize == c)
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", dims.join("x"))
    }
}

/// Order of the color channels inside the input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Memory layout of the input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `[batch, height, width, channels]`
    #[default]
    Nhwc,
    /// `[batch, channels, height, width]`
    Nchw,
}

/// How 8-bit pixel values are mapped to tensor values.
///
/// `Raw` feeds 0-255 floats unchanged. Models trained on scaled input need
/// one of the other variants; the choice has to match the training recipe.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Normalization {
    #[default]
    Raw,
    /// Divide by 255 into `[0, 1]`.
    UnitRange,
    /// Divide by 255, then `(x - mean[c]) / std[c]` per channel in RGB order.
    MeanStd { mean: [f32; 3], std: [f32; 3] },
}

impl Normalization {
    /// The ImageNet statistics most torchvision-exported models expect.
    pub fn imagenet() -> Self {
        Normalization::MeanStd {
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }

    #[inline]
    pub(crate) fn apply(&self, value: u8, rgb_channel: usize) -> f32 {
        let value = value as f32;
        match self {
            Normalization::Raw => value,
            Normalization::UnitRange => value / 255.0,
            Normalization::MeanStd { mean, std } => {
                (value / 255.0 - mean[rgb_channel]) / std[rgb_channel]
            }
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ClassifierError> {
        if let Normalization::MeanStd { std, .. } = self {
            if std.iter().any(|s| !s.is_finite() || *s == 0.0) {
                return Err(ClassifierError::ConfigError(format!(
                    "Normalization std must be finite and non-zero, got {:?}",
                    std
                )));
            }
        }
        Ok(())
    }
}

impl FromStr for Normalization {
    type Err = ClassifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(Normalization::Raw),
            "unit" | "unit_range" => Ok(Normalization::UnitRange),
            "imagenet" => Ok(Normalization::imagenet()),
            other => Err(ClassifierError::ConfigError(format!(
                "Unknown normalization '{}', expected raw, unit or imagenet",
                other
            ))),
        }
    }
}

/// Input handling applied before inference.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub channel_order: ChannelOrder,
    pub layout: TensorLayout,
    pub normalization: Normalization,
}

/// Shapes and tensor names the pipeline expects from the model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub input_shape: TensorShape,
    pub output_shape: TensorShape,
    /// Input tensor name; the model's first input when unset.
    pub input_name: Option<String>,
    /// Output tensor name; the model's first output when unset.
    pub output_name: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            input_shape: TensorShape::new([1, 224, 224, 3]),
            output_shape: TensorShape::new([1, 2]),
            input_name: None,
            output_name: None,
        }
    }
}

impl ModelConfig {
    /// Number of scores a single inference yields.
    pub fn num_classes(&self) -> usize {
        self.output_shape.num_elements()
    }

    /// Side length of the square image the input shape describes under `layout`.
    pub fn target_size(&self, layout: TensorLayout) -> Result<u32, ClassifierError> {
        let dims = self.input_shape.dims();
        if dims.len() != 4 || dims[0] != 1 {
            return Err(ClassifierError::ConfigError(format!(
                "Input shape must be [1, ., ., .] with rank 4, got {}",
                self.input_shape
            )));
        }
        let (height, width, channels) = match layout {
            TensorLayout::Nhwc => (dims[1], dims[2], dims[3]),
            TensorLayout::Nchw => (dims[2], dims[3], dims[1]),
        };
        if channels != 3 {
            return Err(ClassifierError::ConfigError(format!(
                "Input shape {} must carry 3 channels for {:?} layout",
                self.input_shape, layout
            )));
        }
        if height != width || height == 0 {
            return Err(ClassifierError::ConfigError(format!(
                "Input shape {} must describe a non-empty square image",
                self.input_shape
            )));
        }
        u32::try_from(height).map_err(|_| {
            ClassifierError::ConfigError(format!("Input size {} is too large", height))
        })
    }
}

/// Everything needed to assemble a classifier, loadable from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub model_path: PathBuf,
    pub labels: Vec<String>,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub preprocess: PreprocessConfig,
    /// Expected SHA-256 of the model artifact, lowercase hex.
    #[serde(default)]
    pub model_sha256: Option<String>,
}

impl ClassifierConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ClassifierError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            ClassifierError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            ClassifierError::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
        })
    }
}
