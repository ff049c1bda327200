//! Ingestion orchestrator and upload job processing.
//!
//! `ingest` runs extract → store document → chunk → embed → store chunks,
//! each step depending on the previous one. The document row is written
//! before embedding so raw content survives a later failure; chunks are
//! written in one call only after every vector exists.

use crate::chunking::Chunker;
use crate::embeddings::{EmbeddingClient, EmbeddingProvider};
use crate::error::IngestError;
use crate::extractor::{concatenate_pages, PdfExtractor};
use crate::lifecycle::{
    UploadJob, UploadJobPatch, PROGRESS_DONE, PROGRESS_EMBEDDED, PROGRESS_EXTRACTED,
};
use crate::models::{Chunk, Document, DocumentType, NewDocument, RequestContext, SourceFile};
use crate::traits::{DocumentStore, FileStorage};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use walkdir::WalkDir;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

pub const META_TITLE: &str = "title";
pub const META_TYPE: &str = "type";
pub const META_CHECKSUM: &str = "checksum";
pub const META_CONTENT_TYPE: &str = "contentType";

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .map(|entry| entry.path().to_path_buf())
        .collect::<Vec<_>>();

    files.sort_unstable();
    files
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// A raw file accepted for ingestion.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file: SourceFile,
    pub content_type: String,
    pub title: String,
    pub doc_type: DocumentType,
    pub metadata: BTreeMap<String, String>,
}

pub struct IngestionPipeline<X, P, S, F> {
    extractor: X,
    chunker: Chunker,
    embeddings: Arc<EmbeddingClient<P>>,
    store: Arc<S>,
    storage: Arc<F>,
}

impl<X, P, S, F> IngestionPipeline<X, P, S, F>
where
    X: PdfExtractor,
    P: EmbeddingProvider,
    S: DocumentStore,
    F: FileStorage,
{
    pub fn new(
        extractor: X,
        chunker: Chunker,
        embeddings: Arc<EmbeddingClient<P>>,
        store: Arc<S>,
        storage: Arc<F>,
    ) -> Self {
        Self {
            extractor,
            chunker,
            embeddings,
            store,
            storage,
        }
    }

    /// Turns one file into a stored document with embedded chunks.
    ///
    /// Does not retry. On an embedding failure the document stays stored
    /// without chunks.
    pub async fn ingest(
        &self,
        ctx: &RequestContext,
        file: &SourceFile,
        title: &str,
        doc_type: DocumentType,
    ) -> Result<Document, IngestError> {
        let span = info_span!("ingest", request_id = %ctx.request_id, file = %file.file_name);
        self.run_ingest(file, title, doc_type, None)
            .instrument(span)
            .await
    }

    /// Stores the raw bytes and records a `Pending` upload job for them.
    pub async fn submit_upload(
        &self,
        ctx: &RequestContext,
        request: UploadRequest,
    ) -> Result<UploadJob, IngestError> {
        let reference = self
            .storage
            .put(&request.file.bytes, &request.file.file_name, &request.content_type)
            .await?;

        let mut metadata = request.metadata;
        metadata.insert(META_TITLE.to_string(), request.title);
        metadata.insert(META_TYPE.to_string(), request.doc_type.to_string());
        metadata.insert(META_CHECKSUM.to_string(), digest_bytes(&request.file.bytes));
        metadata.insert(META_CONTENT_TYPE.to_string(), request.content_type);
        if let Some(actor) = &ctx.actor {
            metadata.insert("submitted_by".to_string(), actor.clone());
        }

        let mut job = UploadJob::new_pending(
            request.file.file_name,
            request.file.bytes.len() as u64,
            reference,
            metadata,
        );
        job.upload_progress = PROGRESS_DONE;

        let job = self.store.insert_upload_job(job).await?;
        info!(
            request_id = %ctx.request_id,
            upload_id = %job.id,
            file = %job.original_file_name,
            size = job.file_size,
            "upload accepted"
        );
        Ok(job)
    }

    /// Drives a `Pending` job to `Completed` or `Failed`.
    ///
    /// Every failure after the job entered `Processing` is recorded on the job
    /// before the error is returned.
    pub async fn process_upload(
        &self,
        ctx: &RequestContext,
        job_id: &str,
    ) -> Result<UploadJob, IngestError> {
        let span = info_span!("process_upload", request_id = %ctx.request_id, upload_id = job_id);
        self.process(job_id).instrument(span).await
    }

    /// Queues a new `Pending` job for the same source as a failed one.
    pub async fn resubmit(
        &self,
        ctx: &RequestContext,
        job_id: &str,
    ) -> Result<UploadJob, IngestError> {
        let failed = self.store.get_upload_job(job_id).await?;
        let job = self.store.insert_upload_job(failed.resubmission()?).await?;
        info!(
            request_id = %ctx.request_id,
            upload_id = %job.id,
            resubmitted_from = job_id,
            "upload resubmitted"
        );
        Ok(job)
    }

    async fn process(&self, job_id: &str) -> Result<UploadJob, IngestError> {
        let job = self
            .store
            .update_upload_job(job_id, UploadJobPatch::start())
            .await?;
        info!(file = %job.original_file_name, "processing upload");

        let document = match self.ingest_job(&job).await {
            Ok(document) => document,
            Err(failure) => {
                self.record_failure(job_id, &failure).await;
                return Err(failure);
            }
        };

        match self
            .store
            .update_upload_job(job_id, UploadJobPatch::completed(&document.id))
            .await
        {
            Ok(completed) => {
                info!(document_id = %document.id, "upload completed");
                Ok(completed)
            }
            Err(failure) => {
                let failure = IngestError::from(failure);
                self.record_failure(job_id, &failure).await;
                Err(failure)
            }
        }
    }

    async fn ingest_job(&self, job: &UploadJob) -> Result<Document, IngestError> {
        let doc_type: DocumentType = job
            .metadata
            .get(META_TYPE)
            .ok_or_else(|| {
                IngestError::InvalidArgument(format!("upload {} has no document type", job.id))
            })?
            .parse()?;
        let title = job
            .metadata
            .get(META_TITLE)
            .cloned()
            .unwrap_or_else(|| job.original_file_name.clone());

        let bytes = self.storage.fetch(&job.source).await?;
        let file = SourceFile {
            file_name: job.original_file_name.clone(),
            bytes,
        };
        self.run_ingest(&file, &title, doc_type, Some(&job.id)).await
    }

    async fn run_ingest(
        &self,
        file: &SourceFile,
        title: &str,
        doc_type: DocumentType,
        job_id: Option<&str>,
    ) -> Result<Document, IngestError> {
        if doc_type.is_legacy() {
            debug!(doc_type = %doc_type, "ingesting legacy document type");
        }

        let pages = self.extractor.extract_pages(&file.bytes)?;
        let document = self
            .store
            .insert_document(NewDocument {
                title: title.to_string(),
                doc_type,
                raw_content: concatenate_pages(&pages),
                original_file_name: file.file_name.clone(),
            })
            .await?;
        info!(document_id = %document.id, pages = pages.len(), "document stored");
        self.checkpoint(job_id, PROGRESS_EXTRACTED).await;

        let drafts = self.chunker.chunk_pages(&pages)?;
        let texts = drafts
            .iter()
            .map(|draft| draft.content.clone())
            .collect::<Vec<_>>();

        let vectors = match self.embeddings.embed_batch(&texts).await {
            Ok(vectors) => vectors,
            Err(failure) => {
                warn!(document_id = %document.id, %failure, "embedding failed; document left without chunks");
                return Err(failure.into());
            }
        };
        self.checkpoint(job_id, PROGRESS_EMBEDDED).await;

        let chunks = drafts
            .into_iter()
            .zip(vectors)
            .map(|(draft, vector)| Chunk::from_draft(&document.id, draft, vector))
            .collect::<Vec<_>>();
        let stored = self.store.insert_chunks(chunks).await?;
        info!(document_id = %document.id, chunks = stored, "chunks stored");

        Ok(document)
    }

    async fn checkpoint(&self, job_id: Option<&str>, progress: u8) {
        let Some(job_id) = job_id else {
            return;
        };
        if let Err(failure) = self
            .store
            .update_upload_job(job_id, UploadJobPatch::progress(progress))
            .await
        {
            warn!(upload_id = job_id, progress, %failure, "could not record progress");
        }
    }

    async fn record_failure(&self, job_id: &str, failure: &IngestError) {
        warn!(upload_id = job_id, %failure, "upload failed");
        if let Err(update_error) = self
            .store
            .update_upload_job(job_id, UploadJobPatch::failed(failure.to_string()))
            .await
        {
            error!(upload_id = job_id, %update_error, "could not mark upload as failed");
        }
    }
}
