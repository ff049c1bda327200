use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_OPENAI_DIMENSIONS: usize = 1536;
pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Pipeline settings, loadable from TOML. Missing keys fall back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
}

impl PipelineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, IngestError> {
        let config: Self =
            toml::from_str(raw).map_err(|error| IngestError::InvalidConfig(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, IngestError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        self.chunking.validate()?;
        self.embedding.validate()?;
        self.retrieval.validate()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_200,
            chunk_overlap: 200,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidConfig(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Ngram,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub dimensions: usize,
    pub api_base: String,
    pub batch_size: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "batch_delay_ms")]
    pub batch_delay: Duration,
    pub max_retries: u32,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "timeout_secs")]
    pub timeout: Duration,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: DEFAULT_OPENAI_MODEL.to_string(),
            dimensions: DEFAULT_OPENAI_DIMENSIONS,
            api_base: DEFAULT_OPENAI_API_BASE.to_string(),
            batch_size: 3,
            batch_delay: Duration::from_millis(1_500),
            max_retries: 3,
            timeout: Duration::from_secs(30),
        }
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.batch_size == 0 {
            return Err(IngestError::InvalidConfig(
                "embedding batch_size must be positive".to_string(),
            ));
        }
        if self.dimensions == 0 {
            return Err(IngestError::InvalidConfig(
                "embedding dimensions must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidates scoring below this never enter the pool.
    pub similarity_floor: f32,
    pub candidate_pool: usize,
    /// Lower bound of the adaptive threshold.
    pub threshold_base: f32,
    /// Distance below the best score still accepted by the adaptive threshold.
    pub threshold_margin: f32,
    pub max_results: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_floor: 0.3,
            candidate_pool: 10,
            threshold_base: 0.5,
            threshold_margin: 0.1,
            max_results: 4,
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.candidate_pool == 0 || self.max_results == 0 {
            return Err(IngestError::InvalidConfig(
                "candidate_pool and max_results must be positive".to_string(),
            ));
        }
        if self.max_results > self.candidate_pool {
            return Err(IngestError::InvalidConfig(format!(
                "max_results {} exceeds candidate_pool {}",
                self.max_results, self.candidate_pool
            )));
        }
        Ok(())
    }
}
