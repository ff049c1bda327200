use anyhow::{anyhow, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use govdocs_core::{
    create_provider, discover_pdf_files, Chunker, DocumentStore, DocumentType, EmbeddingClient,
    EmbeddingProvider, IngestionPipeline, LocalFileStorage, LopdfExtractor, MemoryStore,
    PipelineConfig, ProviderKind, QueryPreprocessor, RequestContext, Retriever, SourceFile,
    UploadJob, UploadRequest, PDF_CONTENT_TYPE,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Provider = Box<dyn EmbeddingProvider>;
type Pipeline = IngestionPipeline<LopdfExtractor, Provider, MemoryStore, LocalFileStorage>;

#[derive(Parser)]
#[command(name = "govdocs", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Pipeline settings file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// JSON snapshot holding documents, chunks and upload jobs
    #[arg(long, global = true, default_value = "govdocs-state.json")]
    state: PathBuf,

    /// Directory raw uploads are copied into
    #[arg(long, global = true, default_value = "govdocs-uploads")]
    storage_dir: PathBuf,

    /// API key for the OpenAI embedding provider
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Use the offline trigram embedder instead of the configured provider
    #[arg(long, global = true, default_value_t = false)]
    offline: bool,

    /// Recorded on upload jobs as the submitting user
    #[arg(long, global = true)]
    actor: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Upload one PDF and process it to completion.
    Upload {
        #[arg(long)]
        file: PathBuf,
        /// Document title; defaults to the file stem.
        #[arg(long)]
        title: Option<String>,
        /// Document type: policies, services or a legacy label.
        #[arg(long = "type", default_value = "policies")]
        doc_type: String,
    },
    /// Upload every PDF under a folder.
    IngestFolder {
        #[arg(long)]
        folder: PathBuf,
        #[arg(long = "type", default_value = "policies")]
        doc_type: String,
        /// Upload jobs processed at the same time.
        #[arg(long, default_value = "2")]
        concurrency: usize,
    },
    /// Rank stored chunks against a question.
    Query {
        #[arg(long)]
        text: String,
    },
    /// List stored documents with their chunk counts.
    Documents,
    /// List upload jobs and their status.
    Uploads,
    /// Delete a document together with its chunks.
    Delete {
        #[arg(long)]
        id: String,
    },
    /// Resubmit a failed upload job and process the new job.
    Retry {
        #[arg(long)]
        job: String,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_toml_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if cli.offline {
        config.embedding.provider = ProviderKind::Ngram;
    }
    Ok(config)
}

fn embedding_client(
    cli: &Cli,
    config: &PipelineConfig,
) -> anyhow::Result<Arc<EmbeddingClient<Provider>>> {
    let provider = create_provider(&config.embedding, cli.openai_api_key.clone())?;
    info!(
        model = provider.model_name(),
        dimensions = provider.dimensions(),
        "embedding provider ready"
    );
    Ok(Arc::new(EmbeddingClient::new(provider, &config.embedding)))
}

fn build_pipeline(
    cli: &Cli,
    config: &PipelineConfig,
    store: Arc<MemoryStore>,
) -> anyhow::Result<Pipeline> {
    Ok(IngestionPipeline::new(
        LopdfExtractor,
        Chunker::new(config.chunking)?,
        embedding_client(cli, config)?,
        store,
        Arc::new(LocalFileStorage::new(cli.storage_dir.clone())),
    ))
}

async fn read_upload(
    path: &Path,
    title: Option<String>,
    doc_type: DocumentType,
) -> anyhow::Result<UploadRequest> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("{} has no usable file name", path.display()))?
        .to_string();
    let title = title.unwrap_or_else(|| {
        path.file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&file_name)
            .to_string()
    });

    Ok(UploadRequest {
        file: SourceFile { file_name, bytes },
        content_type: PDF_CONTENT_TYPE.to_string(),
        title,
        doc_type,
        metadata: BTreeMap::new(),
    })
}

fn print_job(job: &UploadJob) {
    println!(
        "{} status={} upload={}% processing={}% file={} document_id={}",
        job.id,
        job.status,
        job.upload_progress,
        job.processing_progress,
        job.original_file_name,
        job.document_id.as_deref().unwrap_or("-")
    );
    if let Some(error) = &job.error {
        println!("  error: {error}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let store = Arc::new(
        MemoryStore::load(&cli.state)
            .await
            .with_context(|| format!("loading state from {}", cli.state.display()))?,
    );
    let ctx = match &cli.actor {
        Some(actor) => RequestContext::new().with_actor(actor.clone()),
        None => RequestContext::new(),
    };

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        request_id = %ctx.request_id,
        "govdocs boot"
    );

    match &cli.command {
        Command::Upload {
            file,
            title,
            doc_type,
        } => {
            let pipeline = build_pipeline(&cli, &config, store.clone())?;
            let request = read_upload(file, title.clone(), doc_type.parse()?).await?;
            let job = pipeline.submit_upload(&ctx, request).await?;
            let outcome = pipeline.process_upload(&ctx, &job.id).await;
            store.save(&cli.state).await?;

            let job = outcome.with_context(|| format!("upload {} failed", job.id))?;
            print_job(&job);
        }
        Command::IngestFolder {
            folder,
            doc_type,
            concurrency,
        } => {
            let doc_type: DocumentType = doc_type.parse()?;
            let pipeline = build_pipeline(&cli, &config, store.clone())?;
            let files = discover_pdf_files(folder);
            info!(folder = %folder.display(), files = files.len(), "discovered pdf files");

            let mut submitted = Vec::with_capacity(files.len());
            for path in &files {
                let request = match read_upload(path, None, doc_type.clone()).await {
                    Ok(request) => request,
                    Err(error) => {
                        warn!(path = %path.display(), %error, "skipped pdf");
                        continue;
                    }
                };
                submitted.push(pipeline.submit_upload(&ctx, request).await?);
            }

            let outcomes = stream::iter(submitted.iter())
                .map(|job| pipeline.process_upload(&ctx, &job.id))
                .buffer_unordered((*concurrency).max(1))
                .collect::<Vec<_>>()
                .await;
            store.save(&cli.state).await?;

            let completed = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
            for job in store.list_upload_jobs().await? {
                if submitted.iter().any(|candidate| candidate.id == job.id) {
                    print_job(&job);
                }
            }
            println!(
                "{completed} of {} uploads completed at {}",
                submitted.len(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Query { text } => {
            let retriever = Retriever::new(
                embedding_client(&cli, &config)?,
                store.clone(),
                QueryPreprocessor::new()?,
                config.retrieval,
            );
            let results = retriever.retrieve(&ctx, text).await?;

            if results.is_empty() {
                println!("no information available for this query in the uploaded documents");
            }
            for (rank, hit) in results.iter().enumerate() {
                println!(
                    "[{}] similarity={:.4} document={} ({}) page={}",
                    rank + 1,
                    hit.similarity,
                    hit.document_title,
                    hit.document_type,
                    hit.page_number
                );
                if let Some(section) = &hit.section {
                    println!("  section: {section}");
                }
                println!("{}\n", hit.content);
            }
        }
        Command::Documents => {
            let documents = store.list_documents().await?;
            if documents.is_empty() {
                println!("no documents stored");
            }
            for document in documents {
                println!(
                    "{} type={} chunks={} file={} created={} title={}",
                    document.id,
                    document.doc_type,
                    document.chunk_count,
                    document.original_file_name,
                    document.created_at.to_rfc3339(),
                    document.title
                );
            }
        }
        Command::Uploads => {
            for job in store.list_upload_jobs().await? {
                print_job(&job);
            }
        }
        Command::Delete { id } => {
            let document = store.delete_document_cascade(id).await?;
            store.save(&cli.state).await?;
            info!(request_id = %ctx.request_id, document_id = %document.id, "document deleted");
            println!("deleted {} ({})", document.id, document.title);
        }
        Command::Retry { job } => {
            let pipeline = build_pipeline(&cli, &config, store.clone())?;
            let retry = pipeline.resubmit(&ctx, job).await?;
            let outcome = pipeline.process_upload(&ctx, &retry.id).await;
            store.save(&cli.state).await?;

            let retry = outcome.with_context(|| format!("upload {} failed again", retry.id))?;
            print_job(&retry);
        }
    }

    Ok(())
}
