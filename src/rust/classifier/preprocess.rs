use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use log::debug;
use ndarray::{ArrayD, IxDyn};

use super::config::{ChannelOrder, PreprocessConfig, TensorLayout};
use super::error::ClassifierError;

/// An 8-bit, row-major, channel-interleaved pixel buffer.
///
/// Supported channel counts are 1 (gray), 3 (RGB) and 4 (RGBA).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    width: u32,
    height: u32,
    channels: u8,
    pixels: Vec<u8>,
}

impl RawImage {
    /// Wraps a pixel buffer. Dimensions are validated by [`preprocess`], so
    /// a degenerate image can still be constructed and rejected there.
    pub fn new(width: u32, height: u32, channels: u8, pixels: Vec<u8>) -> Self {
        Self { width, height, channels, pixels }
    }

    /// Decodes an image file (PNG, JPEG, BMP, WebP) into RGB.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ClassifierError> {
        let path = path.as_ref();
        let image = image::open(path).map_err(|e| {
            ClassifierError::InvalidImageError(format!("Failed to decode {}: {}", path.display(), e))
        })?;
        Ok(Self::from_dynamic(&image))
    }

    /// Decodes an in-memory encoded image into RGB.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ClassifierError> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| ClassifierError::InvalidImageError(format!("Failed to decode image: {}", e)))?;
        Ok(Self::from_dynamic(&image))
    }

    pub fn from_dynamic(image: &DynamicImage) -> Self {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self::new(width, height, 3, rgb.into_raw())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Crops the largest square centered in the image.
    pub fn center_square(&self) -> Result<Self, ClassifierError> {
        self.validate()?;
        let side = self.width.min(self.height);
        let left = ((self.width - side) / 2) as usize;
        let top = ((self.height - side) / 2) as usize;
        let channels = self.channels as usize;
        let stride = self.width as usize * channels;
        let row_len = side as usize * channels;

        let mut pixels = Vec::with_capacity(row_len * side as usize);
        for row in top..top + side as usize {
            let start = row * stride + left * channels;
            pixels.extend_from_slice(&self.pixels[start..start + row_len]);
        }
        Ok(Self::new(side, side, self.channels, pixels))
    }

    fn validate(&self) -> Result<(), ClassifierError> {
        if self.width == 0 || self.height == 0 {
            return Err(ClassifierError::InvalidImageError(format!(
                "Image has zero size: {}x{}",
                self.width, self.height
            )));
        }
        if !matches!(self.channels, 1 | 3 | 4) {
            return Err(ClassifierError::InvalidImageError(format!(
                "Unsupported channel count {}, expected 1, 3 or 4",
                self.channels
            )));
        }
        let expected = self.width as usize * self.height as usize * self.channels as usize;
        if self.pixels.len() != expected {
            return Err(ClassifierError::InvalidImageError(format!(
                "Pixel buffer holds {} bytes, {}x{}x{} needs {}",
                self.pixels.len(),
                self.width,
                self.height,
                self.channels,
                expected
            )));
        }
        Ok(())
    }

    fn to_rgb(&self) -> Result<RgbImage, ClassifierError> {
        let rgb: Vec<u8> = match self.channels {
            3 => self.pixels.clone(),
            1 => self.pixels.iter().flat_map(|&g| [g, g, g]).collect(),
            _ => self
                .pixels
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
        };
        RgbImage::from_raw(self.width, self.height, rgb).ok_or_else(|| {
            ClassifierError::InvalidImageError("Pixel buffer does not fit image dimensions".into())
        })
    }
}

/// A normalized float tensor ready to be fed to a model.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    data: ArrayD<f32>,
}

impl InputTensor {
    /// Wraps an existing array, for callers that build tensors themselves.
    pub fn from_array(data: ArrayD<f32>) -> Self {
        Self { data }
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    pub fn into_array(self) -> ArrayD<f32> {
        self.data
    }
}

/// Resizes `image` to `target_size x target_size` and lays it out as a
/// batch-of-one float tensor.
///
/// Resampling is bilinear and ignores the aspect ratio. An image already at
/// the target size is used as is. Gray input is replicated to three
/// channels and alpha is dropped.
pub fn preprocess(
    image: &RawImage,
    target_size: u32,
    config: &PreprocessConfig,
) -> Result<InputTensor, ClassifierError> {
    image.validate()?;
    if target_size == 0 {
        return Err(ClassifierError::ConfigError("Target size must be positive".into()));
    }
    config.normalization.validate()?;

    let rgb = image.to_rgb()?;
    let resized = if rgb.dimensions() == (target_size, target_size) {
        rgb
    } else {
        debug!(
            "Resizing {}x{} image to {}x{}",
            image.width, image.height, target_size, target_size
        );
        imageops::resize(&rgb, target_size, target_size, FilterType::Triangle)
    };

    let side = target_size as usize;
    let plane = side * side;
    let shape = match config.layout {
        TensorLayout::Nhwc => [1, side, side, 3],
        TensorLayout::Nchw => [1, 3, side, side],
    };
    let sources = channel_sources(config.channel_order);

    let mut values = vec![0.0f32; 3 * plane];
    for (i, pixel) in resized.pixels().enumerate() {
        for (slot, &source) in sources.iter().enumerate() {
            let value = config.normalization.apply(pixel[source], source);
            match config.layout {
                TensorLayout::Nhwc => values[i * 3 + slot] = value,
                TensorLayout::Nchw => values[slot * plane + i] = value,
            }
        }
    }

    let data = ArrayD::from_shape_vec(IxDyn(&shape), values)
        .map_err(|e| ClassifierError::InferenceError(format!("Failed to build input tensor: {}", e)))?;

    Ok(InputTensor { data })
}

/// For each tensor channel slot, the RGB channel it is read from.
fn channel_sources(order: ChannelOrder) -> [usize; 3] {
    match order {
        ChannelOrder::Rgb => [0, 1, 2],
        ChannelOrder::Bgr => [2, 1, 0],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::config::Normalization;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> RawImage {
        let pixels = (0..width * height).flat_map(|_| rgb).collect();
        RawImage::new(width, height, 3, pixels)
    }

    #[test]
    fn test_output_shape_matches_target() {
        let image = solid(640, 480, [10, 20, 30]);
        let tensor = preprocess(&image, 224, &PreprocessConfig::default()).unwrap();
        assert_eq!(tensor.shape(), &[1, 224, 224, 3]);
    }

    #[test]
    fn test_same_size_is_shape_idempotent() {
        let image = solid(224, 224, [1, 2, 3]);
        let tensor = preprocess(&image, 224, &PreprocessConfig::default()).unwrap();
        assert_eq!(tensor.shape(), &[1, 224, 224, 3]);
        assert_eq!(tensor.data()[[0, 100, 100, 2]], 3.0);
    }

    #[test]
    fn test_raw_values_are_unscaled() {
        let image = solid(8, 8, [255, 128, 0]);
        let tensor = preprocess(&image, 4, &PreprocessConfig::default()).unwrap();
        assert_eq!(tensor.data()[[0, 0, 0, 0]], 255.0);
        assert_eq!(tensor.data()[[0, 3, 3, 1]], 128.0);
        assert_eq!(tensor.data()[[0, 2, 1, 2]], 0.0);
    }

    #[test]
    fn test_unit_range_and_bgr_nchw() {
        let image = solid(2, 2, [255, 0, 51]);
        let config = PreprocessConfig {
            channel_order: ChannelOrder::Bgr,
            layout: TensorLayout::Nchw,
            normalization: Normalization::UnitRange,
        };
        let tensor = preprocess(&image, 2, &config).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 2, 2]);
        assert!((tensor.data()[[0, 0, 1, 1]] - 0.2).abs() < 1e-6);
        assert_eq!(tensor.data()[[0, 1, 0, 0]], 0.0);
        assert_eq!(tensor.data()[[0, 2, 0, 1]], 1.0);
    }

    #[test]
    fn test_gray_and_rgba_inputs() {
        let gray = RawImage::new(3, 3, 1, vec![7; 9]);
        let tensor = preprocess(&gray, 3, &PreprocessConfig::default()).unwrap();
        assert_eq!(tensor.data()[[0, 1, 1, 0]], 7.0);
        assert_eq!(tensor.data()[[0, 1, 1, 2]], 7.0);

        let rgba = RawImage::new(1, 1, 4, vec![1, 2, 3, 0]);
        let tensor = preprocess(&rgba, 1, &PreprocessConfig::default()).unwrap();
        assert_eq!(tensor.data().as_slice().unwrap(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_invalid_images_rejected() {
        let config = PreprocessConfig::default();
        let empty = RawImage::new(0, 10, 3, vec![]);
        assert!(matches!(
            preprocess(&empty, 224, &config),
            Err(ClassifierError::InvalidImageError(_))
        ));

        let two_channels = RawImage::new(2, 2, 2, vec![0; 8]);
        assert!(matches!(
            preprocess(&two_channels, 224, &config),
            Err(ClassifierError::InvalidImageError(_))
        ));

        let short = RawImage::new(4, 4, 3, vec![0; 10]);
        assert!(matches!(
            preprocess(&short, 224, &config),
            Err(ClassifierError::InvalidImageError(_))
        ));
    }

    #[test]
    fn test_center_square() {
        // 4x2 image, columns valued by x
        let pixels: Vec<u8> = (0..2).flat_map(|_| (0..4u8).flat_map(|x| [x, x, x])).collect();
        let image = RawImage::new(4, 2, 3, pixels);
        let square = image.center_square().unwrap();
        assert_eq!((square.width(), square.height()), (2, 2));
        assert_eq!(square.pixels()[0], 1);
        assert_eq!(square.pixels()[3], 2);
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(matches!(
            RawImage::from_bytes(b"not an image"),
            Err(ClassifierError::InvalidImageError(_))
        ));
    }
}
