use crate::error::{PersistenceError, StorageError};
use crate::lifecycle::{UploadJob, UploadJobPatch};
use crate::models::{Chunk, Document, DocumentSummary, NewDocument, ScoredChunk};
use async_trait::async_trait;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert_document(&self, document: NewDocument) -> Result<Document, PersistenceError>;

    async fn get_document(&self, id: &str) -> Result<Document, PersistenceError>;

    /// Documents with their chunk counts, newest first.
    async fn list_documents(&self) -> Result<Vec<DocumentSummary>, PersistenceError>;

    /// Stores every chunk or none of them.
    async fn insert_chunks(&self, chunks: Vec<Chunk>) -> Result<usize, PersistenceError>;

    async fn count_chunks(&self, document_id: &str) -> Result<usize, PersistenceError>;

    /// Removes a document and its chunks in one step, detaching any upload
    /// jobs that point at it.
    async fn delete_document_cascade(&self, id: &str) -> Result<Document, PersistenceError>;

    async fn insert_upload_job(&self, job: UploadJob) -> Result<UploadJob, PersistenceError>;

    async fn get_upload_job(&self, id: &str) -> Result<UploadJob, PersistenceError>;

    /// Upload jobs, oldest first.
    async fn list_upload_jobs(&self) -> Result<Vec<UploadJob>, PersistenceError>;

    async fn update_upload_job(
        &self,
        id: &str,
        patch: UploadJobPatch,
    ) -> Result<UploadJob, PersistenceError>;

    /// Chunks scoring at least `floor` against `vector`, best first, at most `limit`.
    async fn cosine_similarity(
        &self,
        vector: &[f32],
        floor: f32,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, PersistenceError>;
}

#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Persists raw bytes and returns a reference they can be fetched by.
    async fn put(
        &self,
        bytes: &[u8],
        file_name: &str,
        content_type: &str,
    ) -> Result<String, StorageError>;

    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, StorageError>;
}
