pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod lifecycle;
pub mod models;
pub mod query;
pub mod retrieval;
pub mod stores;
pub mod traits;

pub use chunking::{normalize_text, Chunker, SectionDetector, TimestampDetector};
pub use config::{ChunkingConfig, EmbeddingConfig, PipelineConfig, ProviderKind, RetrievalConfig};
pub use embeddings::{
    cosine_similarity, create_provider, CharacterNgramEmbedder, EmbeddingClient,
    EmbeddingProvider, OpenAiEmbedder,
};
pub use error::{EmbeddingError, IngestError, PersistenceError, RetrievalError, StorageError};
pub use extractor::{concatenate_pages, LopdfExtractor, PdfExtractor};
pub use ingest::{
    digest_bytes, discover_pdf_files, IngestionPipeline, UploadRequest, PDF_CONTENT_TYPE,
};
pub use lifecycle::{UploadJob, UploadJobPatch, UploadStatus};
pub use models::{
    Chunk, ChunkDraft, ChunkMetadata, Document, DocumentSummary, DocumentType, NewDocument,
    PageText, RequestContext, ScoredChunk, SourceFile,
};
pub use query::QueryPreprocessor;
pub use retrieval::{adaptive_threshold, select_results, Retriever};
pub use stores::{LocalFileStorage, MemoryStore};
pub use traits::{DocumentStore, FileStorage};
