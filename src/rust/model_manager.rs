use std::env;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use log;
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Hash mismatch for {name}: expected {expected}, got {actual}")]
    HashMismatch {
        name: String,
        expected: String,
        actual: String,
    },
}

/// Locates packaged model artifacts and checks their integrity.
#[derive(Debug, Clone)]
pub struct ModelManager {
    models_dir: PathBuf,
}

impl ModelManager {
    /// Creates a new ModelManager with the default models directory
    pub fn new_default() -> io::Result<Self> {
        Self::new(Self::get_default_models_dir())
    }

    /// Returns the default models directory path
    pub fn get_default_models_dir() -> PathBuf {
        // 1. Check environment variable
        if let Ok(path) = env::var("ASCLEPIUS_MODELS") {
            return PathBuf::from(path);
        }

        // 2. Use platform-specific data directory
        if let Some(data_dir) = dirs::data_dir() {
            return data_dir.join("asclepius").join("models");
        }

        // 3. Fallback to user's home directory
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(".local").join("share").join("asclepius").join("models");
        }

        // 4. If all else fails, use system temp directory (platform agnostic)
        env::temp_dir().join("asclepius").join("models")
    }

    pub fn new<P: AsRef<Path>>(models_dir: P) -> io::Result<Self> {
        let models_dir = models_dir.as_ref().to_path_buf();
        fs::create_dir_all(&models_dir)?;
        Ok(Self { models_dir })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Path of the artifact named `name`; `.onnx` is appended when missing.
    pub fn get_model_path(&self, name: &str) -> PathBuf {
        if Path::new(name).extension().is_some() {
            self.models_dir.join(name)
        } else {
            self.models_dir.join(format!("{}.onnx", name))
        }
    }

    /// Path of the label file shipped next to the model, one label per line.
    pub fn get_labels_path(&self, name: &str) -> PathBuf {
        let model_path = self.get_model_path(name);
        model_path.with_extension("labels")
    }

    pub fn is_model_present(&self, name: &str) -> bool {
        let model_path = self.get_model_path(name);
        log::info!("Model path: {:?} (exists: {})", model_path, model_path.exists());
        model_path.is_file()
    }

    /// Returns the model path if the file exists.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, ModelError> {
        let model_path = self.get_model_path(name);
        if model_path.is_file() {
            Ok(model_path)
        } else {
            Err(ModelError::NotFound(model_path.display().to_string()))
        }
    }

    /// Lowercase hex SHA-256 of a file, streamed in chunks.
    pub fn sha256_file(path: &Path) -> Result<String, ModelError> {
        log::info!("Hashing file: {:?}", path);
        let mut file = fs::File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 64 * 1024];
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Checks the named model against an expected digest.
    ///
    /// Returns `Ok(false)` when the file is absent, `Err(HashMismatch)` when
    /// it is present but differs.
    pub fn verify_model(&self, name: &str, expected_hash: &str) -> Result<bool, ModelError> {
        let model_path = self.get_model_path(name);
        if !model_path.exists() {
            log::info!("Model file does not exist: {:?}", model_path);
            return Ok(false);
        }

        let actual = Self::sha256_file(&model_path)?;
        log::info!("Calculated hash: {}", actual);
        log::info!("Expected hash:   {}", expected_hash);
        if !actual.eq_ignore_ascii_case(expected_hash) {
            log::error!("Model hash mismatch for {:?}", model_path);
            return Err(ModelError::HashMismatch {
                name: name.to_string(),
                expected: expected_hash.to_string(),
                actual,
            });
        }
        Ok(true)
    }
}
