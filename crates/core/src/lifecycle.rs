//! Upload job state machine.
//!
//! A job starts `Pending` when the raw file is accepted, moves to `Processing`
//! when ingestion begins and ends in exactly one of `Completed` or `Failed`.
//! Terminal jobs are never mutated again; reprocessing creates a new job.

use crate::error::PersistenceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

pub const PROGRESS_STARTED: u8 = 10;
pub const PROGRESS_EXTRACTED: u8 = 30;
pub const PROGRESS_EMBEDDED: u8 = 80;
pub const PROGRESS_DONE: u8 = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(self, next: UploadStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadJob {
    pub id: String,
    pub document_id: Option<String>,
    pub status: UploadStatus,
    pub original_file_name: String,
    pub file_size: u64,
    /// Storage reference the raw bytes can be fetched from.
    pub source: String,
    pub upload_progress: u8,
    pub processing_progress: u8,
    pub error: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadJob {
    pub fn new_pending(
        original_file_name: impl Into<String>,
        file_size: u64,
        source: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            document_id: None,
            status: UploadStatus::Pending,
            original_file_name: original_file_name.into(),
            file_size,
            source: source.into(),
            upload_progress: 0,
            processing_progress: 0,
            error: None,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builds a fresh `Pending` job for the same source file as a failed one.
    pub fn resubmission(&self) -> Result<Self, PersistenceError> {
        if self.status != UploadStatus::Failed {
            return Err(PersistenceError::InvalidTransition(format!(
                "only failed uploads can be resubmitted; {} is {}",
                self.id, self.status
            )));
        }

        let mut job = Self::new_pending(
            self.original_file_name.clone(),
            self.file_size,
            self.source.clone(),
            self.metadata.clone(),
        );
        job.upload_progress = self.upload_progress;
        job.metadata
            .insert("resubmitted_from".to_string(), self.id.clone());
        Ok(job)
    }

    pub fn apply(&mut self, patch: UploadJobPatch) -> Result<(), PersistenceError> {
        if let Some(next) = patch.status {
            if !self.status.can_transition_to(next) {
                return Err(PersistenceError::InvalidTransition(format!(
                    "upload {} cannot move from {} to {}",
                    self.id, self.status, next
                )));
            }
            if next == UploadStatus::Completed
                && patch.document_id.is_none()
                && self.document_id.is_none()
            {
                return Err(PersistenceError::InvalidTransition(format!(
                    "upload {} cannot complete without a document",
                    self.id
                )));
            }
            self.status = next;
        } else if self.status.is_terminal() {
            return Err(PersistenceError::InvalidTransition(format!(
                "upload {} is {} and can no longer change",
                self.id, self.status
            )));
        } else if patch.processing_progress.is_some() && self.status != UploadStatus::Processing {
            return Err(PersistenceError::InvalidTransition(format!(
                "upload {} is {} and has no processing progress to record",
                self.id, self.status
            )));
        }

        if let Some(document_id) = patch.document_id {
            self.document_id = Some(document_id);
        }
        if let Some(progress) = patch.upload_progress {
            self.upload_progress = progress.min(PROGRESS_DONE);
        }
        if let Some(progress) = patch.processing_progress {
            self.processing_progress = progress.min(PROGRESS_DONE);
        }
        if let Some(error) = patch.error {
            self.error = Some(error);
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Clears the document link after the document was deleted.
    ///
    /// This is an administrative detach, allowed in any state.
    pub(crate) fn detach_document(&mut self) {
        self.document_id = None;
        self.updated_at = Utc::now();
    }
}

/// Partial update to an [`UploadJob`]; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadJobPatch {
    pub status: Option<UploadStatus>,
    pub document_id: Option<String>,
    pub upload_progress: Option<u8>,
    pub processing_progress: Option<u8>,
    pub error: Option<String>,
}

impl UploadJobPatch {
    /// Claims a `Pending` job for processing. Fails for a job already started.
    pub fn start() -> Self {
        Self {
            status: Some(UploadStatus::Processing),
            processing_progress: Some(PROGRESS_STARTED),
            ..Self::default()
        }
    }

    /// Checkpoint for a job that is already `Processing`.
    pub fn progress(progress: u8) -> Self {
        Self {
            processing_progress: Some(progress),
            ..Self::default()
        }
    }

    pub fn completed(document_id: impl Into<String>) -> Self {
        Self {
            status: Some(UploadStatus::Completed),
            document_id: Some(document_id.into()),
            processing_progress: Some(PROGRESS_DONE),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(UploadStatus::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> UploadJob {
        UploadJob::new_pending("rules.pdf", 42, "file:///tmp/rules.pdf", BTreeMap::new())
    }

    #[test]
    fn happy_path_reaches_completed_with_document() {
        let mut job = pending();
        job.apply(UploadJobPatch::start()).unwrap();
        assert_eq!(job.status, UploadStatus::Processing);
        assert_eq!(job.processing_progress, 10);

        job.apply(UploadJobPatch::progress(PROGRESS_EMBEDDED)).unwrap();
        job.apply(UploadJobPatch::completed("doc-1")).unwrap();
        assert_eq!(job.status, UploadStatus::Completed);
        assert_eq!(job.document_id.as_deref(), Some("doc-1"));
        assert_eq!(job.processing_progress, 100);
    }

    #[test]
    fn pending_cannot_skip_processing() {
        let mut job = pending();
        let result = job.apply(UploadJobPatch::completed("doc-1"));
        assert!(matches!(result, Err(PersistenceError::InvalidTransition(_))));
        assert_eq!(job.status, UploadStatus::Pending);
    }

    #[test]
    fn terminal_jobs_reject_further_changes() {
        let mut job = pending();
        job.apply(UploadJobPatch::start()).unwrap();
        job.apply(UploadJobPatch::failed("pdf parse error")).unwrap();

        assert!(job.apply(UploadJobPatch::start()).is_err());
        assert!(job.apply(UploadJobPatch::progress(50)).is_err());
        assert!(job
            .apply(UploadJobPatch {
                processing_progress: Some(50),
                ..UploadJobPatch::default()
            })
            .is_err());
        assert_eq!(job.error.as_deref(), Some("pdf parse error"));
    }

    #[test]
    fn started_job_cannot_be_started_again() {
        let mut job = pending();
        job.apply(UploadJobPatch::start()).unwrap();
        job.apply(UploadJobPatch::progress(PROGRESS_EMBEDDED)).unwrap();

        let again = job.apply(UploadJobPatch::start());
        assert!(matches!(again, Err(PersistenceError::InvalidTransition(_))));
        assert_eq!(job.processing_progress, PROGRESS_EMBEDDED);
    }

    #[test]
    fn pending_job_has_no_progress_checkpoint() {
        let mut job = pending();
        assert!(job.apply(UploadJobPatch::progress(PROGRESS_EXTRACTED)).is_err());
        assert_eq!(job.status, UploadStatus::Pending);
        assert_eq!(job.processing_progress, 0);
    }

    #[test]
    fn progress_is_clamped() {
        let mut job = pending();
        job.apply(UploadJobPatch::start()).unwrap();
        job.apply(UploadJobPatch::progress(250)).unwrap();
        assert_eq!(job.processing_progress, 100);
    }

    #[test]
    fn resubmission_requires_failed_job() {
        let mut job = pending();
        assert!(job.resubmission().is_err());

        job.apply(UploadJobPatch::start()).unwrap();
        job.apply(UploadJobPatch::failed("timeout")).unwrap();

        let retry = job.resubmission().unwrap();
        assert_ne!(retry.id, job.id);
        assert_eq!(retry.status, UploadStatus::Pending);
        assert_eq!(retry.source, job.source);
        assert_eq!(retry.metadata.get("resubmitted_from"), Some(&job.id));
        assert_eq!(job.status, UploadStatus::Failed);
    }
}
