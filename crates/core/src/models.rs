use crate::error::IngestError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const LEGACY_TYPE_LABELS: [&str; 7] = [
    "rules_policy",
    "citizen_services",
    "amendment",
    "rules_of_business",
    "estacode",
    "executive_handbook",
    "service_catalog",
];

/// Category of an ingested document.
///
/// Labels outside the known set are rejected when parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DocumentType {
    Policies,
    Services,
    Legacy(String),
}

impl DocumentType {
    pub fn as_label(&self) -> &str {
        match self {
            Self::Policies => "policies",
            Self::Services => "services",
            Self::Legacy(label) => label,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy(_))
    }
}

impl FromStr for DocumentType {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let label = value.trim().to_lowercase();
        match label.as_str() {
            "policies" => Ok(Self::Policies),
            "services" => Ok(Self::Services),
            legacy if LEGACY_TYPE_LABELS.contains(&legacy) => Ok(Self::Legacy(label)),
            _ => Err(IngestError::InvalidArgument(format!(
                "unknown document type: {value}"
            ))),
        }
    }
}

impl TryFrom<String> for DocumentType {
    type Error = IngestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DocumentType> for String {
    fn from(value: DocumentType) -> Self {
        value.as_label().to_string()
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub doc_type: DocumentType,
    pub raw_content: String,
    pub original_file_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub title: String,
    pub doc_type: DocumentType,
    pub raw_content: String,
    pub original_file_name: String,
}

impl NewDocument {
    pub fn into_document(self) -> Document {
        let now = Utc::now();
        Document {
            id: Uuid::new_v4().to_string(),
            title: self.title,
            doc_type: self.doc_type,
            raw_content: self.raw_content,
            original_file_name: self.original_file_name,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Document listing row with its stored chunk count.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub title: String,
    pub doc_type: DocumentType,
    pub original_file_name: String,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub page_number: u32,
    pub section: Option<String>,
    pub timestamp: Option<String>,
}

/// A chunk produced by the chunker, before it has a vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub index: usize,
    pub content: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn from_draft(document_id: &str, draft: ChunkDraft, vector: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            content: draft.content,
            vector,
            metadata: draft.metadata,
        }
    }
}

/// A ranked chunk handed to the answering layer.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub similarity: f32,
    pub document_title: String,
    pub document_type: DocumentType,
    pub page_number: u32,
    pub section: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// Raw bytes of an uploaded file together with its client-side name.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Per-request context threaded through every boundary call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub actor: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            actor: None,
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
