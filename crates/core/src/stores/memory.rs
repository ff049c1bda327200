//! In-memory [`DocumentStore`] with optional JSON snapshots.
//!
//! All state sits behind one lock, so every trait operation (the cascade
//! delete included) is atomic. Similarity search is a brute-force cosine scan.

use crate::embeddings::cosine_similarity;
use crate::error::PersistenceError;
use crate::lifecycle::{UploadJob, UploadJobPatch};
use crate::models::{Chunk, Document, DocumentSummary, NewDocument, ScoredChunk};
use crate::traits::DocumentStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    /// Vector length shared by every stored chunk, fixed by the first insert.
    dimensions: Option<usize>,
    documents: HashMap<String, Document>,
    chunks: Vec<Chunk>,
    uploads: Vec<UploadJob>,
}

impl StoreState {
    fn check_dimensions(&self, actual: usize) -> Result<(), PersistenceError> {
        match self.dimensions {
            Some(expected) if expected != actual => {
                Err(PersistenceError::DimensionMismatch { expected, actual })
            }
            _ => Ok(()),
        }
    }

    fn upload_mut(&mut self, id: &str) -> Result<&mut UploadJob, PersistenceError> {
        self.uploads
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or_else(|| PersistenceError::not_found("upload job", id))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a snapshot written by [`MemoryStore::save`]; a missing file yields an empty store.
    pub async fn load(path: &Path) -> Result<Self, PersistenceError> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::new());
            }
            Err(error) => return Err(error.into()),
        };
        let state: StoreState = serde_json::from_slice(&raw)?;
        debug!(
            path = %path.display(),
            documents = state.documents.len(),
            chunks = state.chunks.len(),
            "loaded store snapshot"
        );
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    pub async fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        let encoded = {
            let state = self.state.read().await;
            serde_json::to_vec(&*state)?
        };

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = path.with_extension("tmp");
        tokio::fs::write(&staging, encoded).await?;
        tokio::fs::rename(&staging, path).await?;
        Ok(())
    }

    pub async fn dimensions(&self) -> Option<usize> {
        self.state.read().await.dimensions
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_document(&self, document: NewDocument) -> Result<Document, PersistenceError> {
        let document = document.into_document();
        let mut state = self.state.write().await;
        state
            .documents
            .insert(document.id.clone(), document.clone());
        Ok(document)
    }

    async fn get_document(&self, id: &str) -> Result<Document, PersistenceError> {
        let state = self.state.read().await;
        state
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| PersistenceError::not_found("document", id))
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>, PersistenceError> {
        let state = self.state.read().await;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for chunk in &state.chunks {
            *counts.entry(chunk.document_id.as_str()).or_default() += 1;
        }

        let mut summaries = state
            .documents
            .values()
            .map(|document| DocumentSummary {
                id: document.id.clone(),
                title: document.title.clone(),
                doc_type: document.doc_type.clone(),
                original_file_name: document.original_file_name.clone(),
                chunk_count: counts.get(document.id.as_str()).copied().unwrap_or(0),
                created_at: document.created_at,
                updated_at: document.updated_at,
            })
            .collect::<Vec<_>>();
        summaries.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        Ok(summaries)
    }

    async fn insert_chunks(&self, chunks: Vec<Chunk>) -> Result<usize, PersistenceError> {
        let Some(first) = chunks.first() else {
            return Ok(0);
        };

        let mut state = self.state.write().await;
        let dimensions = state.dimensions.unwrap_or(first.vector.len());
        for chunk in &chunks {
            if !state.documents.contains_key(&chunk.document_id) {
                return Err(PersistenceError::not_found("document", &chunk.document_id));
            }
            if chunk.vector.len() != dimensions {
                return Err(PersistenceError::DimensionMismatch {
                    expected: dimensions,
                    actual: chunk.vector.len(),
                });
            }
        }

        let inserted = chunks.len();
        state.dimensions = Some(dimensions);
        state.chunks.extend(chunks);
        Ok(inserted)
    }

    async fn count_chunks(&self, document_id: &str) -> Result<usize, PersistenceError> {
        let state = self.state.read().await;
        Ok(state
            .chunks
            .iter()
            .filter(|chunk| chunk.document_id == document_id)
            .count())
    }

    async fn delete_document_cascade(&self, id: &str) -> Result<Document, PersistenceError> {
        let mut state = self.state.write().await;
        let document = state
            .documents
            .remove(id)
            .ok_or_else(|| PersistenceError::not_found("document", id))?;

        let before = state.chunks.len();
        state.chunks.retain(|chunk| chunk.document_id != id);
        let removed_chunks = before - state.chunks.len();

        let mut detached = 0usize;
        for job in state
            .uploads
            .iter_mut()
            .filter(|job| job.document_id.as_deref() == Some(id))
        {
            job.detach_document();
            detached += 1;
        }

        debug!(document_id = id, removed_chunks, detached, "deleted document");
        Ok(document)
    }

    async fn insert_upload_job(&self, job: UploadJob) -> Result<UploadJob, PersistenceError> {
        let mut state = self.state.write().await;
        if state.uploads.iter().any(|existing| existing.id == job.id) {
            return Err(PersistenceError::Backend(format!(
                "upload job {} already exists",
                job.id
            )));
        }
        state.uploads.push(job.clone());
        Ok(job)
    }

    async fn get_upload_job(&self, id: &str) -> Result<UploadJob, PersistenceError> {
        let state = self.state.read().await;
        state
            .uploads
            .iter()
            .find(|job| job.id == id)
            .cloned()
            .ok_or_else(|| PersistenceError::not_found("upload job", id))
    }

    async fn list_upload_jobs(&self) -> Result<Vec<UploadJob>, PersistenceError> {
        let state = self.state.read().await;
        let mut jobs = state.uploads.clone();
        jobs.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        Ok(jobs)
    }

    async fn update_upload_job(
        &self,
        id: &str,
        patch: UploadJobPatch,
    ) -> Result<UploadJob, PersistenceError> {
        let mut state = self.state.write().await;
        let job = state.upload_mut(id)?;
        let mut updated = job.clone();
        updated.apply(patch)?;
        *job = updated.clone();
        Ok(updated)
    }

    async fn cosine_similarity(
        &self,
        vector: &[f32],
        floor: f32,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, PersistenceError> {
        let state = self.state.read().await;
        state.check_dimensions(vector.len())?;

        let mut scored = state
            .chunks
            .iter()
            .filter_map(|chunk| {
                let similarity = cosine_similarity(&chunk.vector, vector);
                if similarity < floor {
                    return None;
                }
                let document = state.documents.get(&chunk.document_id)?;
                Some(ScoredChunk {
                    chunk_id: chunk.id.clone(),
                    document_id: chunk.document_id.clone(),
                    content: chunk.content.clone(),
                    similarity,
                    document_title: document.title.clone(),
                    document_type: document.doc_type.clone(),
                    page_number: chunk.metadata.page_number,
                    section: chunk.metadata.section.clone(),
                })
            })
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| right.similarity.total_cmp(&left.similarity));
        scored.truncate(limit);
        Ok(scored)
    }
}
