use crate::core::embedding::FeatureVector;
use image::ImageReader;
use image_hasher::{HashAlg, HasherConfig};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ExtractorError {
    #[error("Feature model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Feature extraction failed for {locator}: {message}")]
    Extraction { locator: String, message: String },
}

impl ExtractorError {
    fn extraction(locator: &str, message: impl ToString) -> Self {
        ExtractorError::Extraction {
            locator: locator.to_string(),
            message: message.to_string(),
        }
    }
}

/// Turns a photo locator into a feature vector.
///
/// `embed` is called from blocking worker threads and may be slow; callers
/// bound it with a timeout.
pub trait FeatureExtractor: Send + Sync {
    fn initialize(&self) -> Result<(), ExtractorError> {
        Ok(())
    }

    fn embed(&self, locator: &str) -> Result<FeatureVector, ExtractorError>;
}

/// Gradient-hash embedding of the decoded image. Each hash bit becomes ±1, so
/// cosine similarity is a linear function of the hamming distance.
#[derive(Debug, Clone)]
pub struct PerceptualExtractor {
    hash_width: u32,
    hash_height: u32,
}

impl PerceptualExtractor {
    pub fn new() -> Self {
        Self::with_hash_size(16, 16)
    }

    pub fn with_hash_size(hash_width: u32, hash_height: u32) -> Self {
        Self {
            hash_width: hash_width.max(2),
            hash_height: hash_height.max(2),
        }
    }

    fn bit_count(&self) -> usize {
        (self.hash_width * self.hash_height) as usize
    }
}

impl Default for PerceptualExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor for PerceptualExtractor {
    fn embed(&self, locator: &str) -> Result<FeatureVector, ExtractorError> {
        let img = ImageReader::open(Path::new(locator))
            .map_err(|e| ExtractorError::extraction(locator, e))?
            .with_guessed_format()
            .map_err(|e| ExtractorError::extraction(locator, e))?
            .decode()
            .map_err(|e| ExtractorError::extraction(locator, e))?;

        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::Gradient)
            .hash_size(self.hash_width, self.hash_height)
            .to_hasher();
        let hash = hasher.hash_image(&img);

        Ok(FeatureVector::from_bits(hash.as_bytes(), self.bit_count()))
    }
}

/// Serves vectors computed elsewhere, keyed by locator.
#[derive(Debug, Default)]
pub struct PrecomputedExtractor {
    vectors: HashMap<String, Vec<f32>>,
    failures: HashMap<String, ExtractorError>,
}

impl PrecomputedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, locator: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(locator.to_string(), vector);
        self
    }

    pub fn failing(mut self, locator: &str, error: ExtractorError) -> Self {
        self.failures.insert(locator.to_string(), error);
        self
    }

    /// Load a JSON object mapping locators to vectors.
    pub fn from_json_file(path: &Path) -> Result<Self, ExtractorError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ExtractorError::ModelUnavailable(format!("{}: {}", path.display(), e)))?;
        let vectors: HashMap<String, Vec<f32>> = serde_json::from_str(&content)
            .map_err(|e| ExtractorError::ModelUnavailable(format!("{}: {}", path.display(), e)))?;
        Ok(Self {
            vectors,
            failures: HashMap::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

impl FeatureExtractor for PrecomputedExtractor {
    fn embed(&self, locator: &str) -> Result<FeatureVector, ExtractorError> {
        if let Some(error) = self.failures.get(locator) {
            return Err(error.clone());
        }
        self.vectors
            .get(locator)
            .map(|v| FeatureVector::new(v.clone()))
            .ok_or_else(|| ExtractorError::extraction(locator, "no precomputed vector"))
    }
}
