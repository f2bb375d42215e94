use asclepius::{
    ChannelOrder, ClassifierBuilder, ClassifierConfig, ClassifierError, HistoryLog,
    InferenceBackend, InputTensor, Normalization, RawImage, ScoreVector, TensorLayout,
};
use env_logger::{Builder, Env};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

// Initialize test logger
fn init() {
    let _ = Builder::from_env(Env::default().default_filter_or("warn")).try_init();
}

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("asclepius-it-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

/// Scores the image by its mean value over all channels and keeps the last input shape.
struct BrightnessBackend {
    last_input: Arc<Mutex<Option<Vec<usize>>>>,
}

impl InferenceBackend for BrightnessBackend {
    fn declared_input_shape(&self) -> Option<Vec<i64>> {
        None
    }

    fn declared_output_shape(&self) -> Option<Vec<i64>> {
        None
    }

    fn run(&mut self, input: &InputTensor) -> Result<ScoreVector, ClassifierError> {
        *self.last_input.lock().unwrap() = Some(input.shape().to_vec());
        let mean = input.data().mean().unwrap_or(0.0);
        Ok(ScoreVector::new(vec![1.0 - mean, mean]))
    }
}

#[test]
fn test_classify_and_record_history() -> Result<(), Box<dyn std::error::Error>> {
    init();
    let last_input = Arc::new(Mutex::new(None));
    let classifier = ClassifierBuilder::new()
        .with_preprocess_config(asclepius::PreprocessConfig {
            normalization: Normalization::UnitRange,
            ..Default::default()
        })
        .with_backend(Box::new(BrightnessBackend { last_input: Arc::clone(&last_input) }))?
        .with_labels(["Non-Cancer", "Cancer"])?
        .build()?;

    let history_path = scratch("history.jsonl");
    let _ = fs::remove_file(&history_path);
    let history = HistoryLog::open(&history_path)?;

    let bright = RawImage::new(300, 200, 3, vec![255; 300 * 200 * 3]);
    let dark = RawImage::new(50, 80, 1, vec![0; 50 * 80]);

    let first = classifier.classify(&bright)?;
    history.append("file:///bright.png", &first)?;
    let second = classifier.classify(&dark)?;
    history.append("file:///dark.png", &second)?;

    assert_eq!(first.label, "Cancer");
    assert_eq!(second.label, "Non-Cancer");
    assert_eq!(*last_input.lock().unwrap(), Some(vec![1, 224, 224, 3]));

    let entries = history.entries()?;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].image_uri, "file:///dark.png");
    assert_eq!(entries[0].prediction, "Non-Cancer");
    assert_eq!(entries[1].confidence, first.confidence);
    Ok(())
}

#[test]
fn test_classify_encoded_file() -> Result<(), Box<dyn std::error::Error>> {
    init();
    let path = scratch("red.png");
    image::RgbImage::from_pixel(40, 30, image::Rgb([255, 0, 0])).save(&path)?;

    let classifier = ClassifierBuilder::new()
        .with_backend(Box::new(BrightnessBackend { last_input: Arc::new(Mutex::new(None)) }))?
        .with_labels(["Non-Cancer", "Cancer"])?
        .build()?;

    let result = classifier.classify_path(&path)?;
    assert_eq!(result.label, "Cancer");
    Ok(())
}

#[test]
fn test_json_config() -> Result<(), Box<dyn std::error::Error>> {
    init();
    let config_path = scratch("classifier.json");
    fs::write(
        &config_path,
        r#"{
            "model_path": "/nonexistent/cancer_classification.onnx",
            "labels": ["Non-Cancer", "Cancer"],
            "model": {
                "input_shape": [1, 3, 160, 160],
                "output_shape": [1, 2]
            },
            "preprocess": {
                "channel_order": "bgr",
                "layout": "nchw",
                "normalization": { "kind": "unit_range" }
            }
        }"#,
    )?;

    let config = ClassifierConfig::from_json_file(&config_path)?;
    assert_eq!(config.model.input_shape.dims(), &[1, 3, 160, 160]);
    assert_eq!(config.preprocess.channel_order, ChannelOrder::Bgr);
    assert_eq!(config.preprocess.layout, TensorLayout::Nchw);
    assert_eq!(config.preprocess.normalization, Normalization::UnitRange);
    assert!(config.model_sha256.is_none());

    // The model file does not exist, so building stops at load time.
    let result = ClassifierBuilder::from_config(config)?.build();
    assert!(matches!(result, Err(ClassifierError::ModelLoadError(_))));
    Ok(())
}

#[test]
fn test_malformed_json_config() {
    let config_path = scratch("broken.json");
    fs::write(&config_path, "{ \"labels\": ").unwrap();
    assert!(matches!(
        ClassifierConfig::from_json_file(&config_path),
        Err(ClassifierError::ConfigError(_))
    ));
}

#[test]
fn test_json_config_digest_is_case_insensitive() -> Result<(), Box<dyn std::error::Error>> {
    init();
    let model_path = scratch("digest-model.onnx");
    fs::write(&model_path, b"abc")?;
    let config_path = scratch("digest.json");
    let config = serde_json::json!({
        "model_path": model_path,
        "labels": ["Non-Cancer", "Cancer"],
        "model_sha256": "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD"
    });
    fs::write(&config_path, config.to_string())?;

    let config = ClassifierConfig::from_json_file(&config_path)?;
    match ClassifierBuilder::from_config(config)?.build() {
        // The digest matches; the three bytes then fail to load as a model.
        Err(ClassifierError::ModelLoadError(msg)) => assert!(!msg.contains("hash mismatch"), "{}", msg),
        other => panic!("expected a load error, got {:?}", other.map(|_| ())),
    }
    Ok(())
}
