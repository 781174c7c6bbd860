//! Loads markdown and text documents into a vector collection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use carbonex_core::errors::CollaboratorError;

use crate::llm::LlmClient;
use crate::retrieval::{ChunkPayload, VectorPoint, VectorStore};

pub const DEFAULT_CHUNK_WORDS: usize = 500;
const INTRODUCTION_SECTION: &str = "Introduction";
const DEFAULT_CATEGORY: &str = "general";
const DOCUMENT_EXTENSIONS: &[&str] = &["md", "txt"];

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("cannot read `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub section: String,
    pub text: String,
}

/// Splits on `##` headings, then cuts long sections at line boundaries so
/// that every chunk stays under `max_words` words where the lines allow it.
pub fn chunk_document(text: &str, max_words: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut section = INTRODUCTION_SECTION.to_string();
    let mut lines: Vec<&str> = Vec::new();
    let mut words = 0;

    for line in text.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with("##") {
            flush(&mut chunks, &section, &mut lines);
            words = 0;
            let heading = trimmed.trim_start_matches('#').trim();
            if !heading.is_empty() {
                section = heading.to_string();
            }
            continue;
        }
        if trimmed.is_empty() && lines.is_empty() {
            continue;
        }

        let line_words = trimmed.split_whitespace().count();
        if words + line_words >= max_words && !lines.is_empty() {
            flush(&mut chunks, &section, &mut lines);
            words = 0;
        }
        lines.push(line);
        words += line_words;
    }
    flush(&mut chunks, &section, &mut lines);
    chunks
}

fn flush(chunks: &mut Vec<Chunk>, section: &str, lines: &mut Vec<&str>) {
    let text = lines.join("\n").trim().to_string();
    lines.clear();
    if !text.is_empty() {
        chunks.push(Chunk { section: section.to_string(), text });
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceDocument {
    pub path: PathBuf,
    /// Path relative to the ingested directory, with `/` separators.
    pub name: String,
    pub category: String,
}

/// Every `.md` and `.txt` file below `root`, sorted by name. The category of
/// a document is its top-level sub-directory.
pub async fn discover_documents(root: &Path) -> Result<Vec<SourceDocument>, IngestError> {
    let mut documents = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries =
            tokio::fs::read_dir(&dir).await.map_err(|source| io_error(&dir, source))?;
        while let Some(entry) =
            entries.next_entry().await.map_err(|source| io_error(&dir, source))?
        {
            let path = entry.path();
            let file_type = entry.file_type().await.map_err(|source| io_error(&path, source))?;
            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            let is_document = path
                .extension()
                .and_then(|extension| extension.to_str())
                .is_some_and(|extension| {
                    DOCUMENT_EXTENSIONS.iter().any(|known| extension.eq_ignore_ascii_case(known))
                });
            if !is_document {
                continue;
            }

            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let components: Vec<String> = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy().into_owned())
                .collect();
            let category = if components.len() > 1 {
                components[0].clone()
            } else {
                DEFAULT_CATEGORY.to_string()
            };
            documents.push(SourceDocument { name: components.join("/"), category, path });
        }
    }

    documents.sort_by(|left, right| left.name.cmp(&right.name));
    Ok(documents)
}

fn io_error(path: &Path, source: std::io::Error) -> IngestError {
    IngestError::Io { path: path.display().to_string(), source }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    pub skipped: usize,
}

pub struct Ingestor {
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn VectorStore>,
    vector_size: usize,
}

impl Ingestor {
    pub fn new(llm: Arc<dyn LlmClient>, store: Arc<dyn VectorStore>, vector_size: usize) -> Self {
        Self { llm, store, vector_size }
    }

    /// Indexes every document under `dir`. A document that cannot be read
    /// or embedded is skipped and counted; the rest of the batch continues.
    pub async fn ingest_dir(
        &self,
        dir: &Path,
        collection: &str,
    ) -> Result<IngestReport, IngestError> {
        self.store.ensure_collection(collection, self.vector_size).await?;
        let documents = discover_documents(dir).await?;

        let mut report = IngestReport::default();
        for document in &documents {
            match self.ingest_document(document, collection).await {
                Ok(chunks) => {
                    report.documents += 1;
                    report.chunks += chunks;
                    info!(
                        event_name = "agent.ingest.document_indexed",
                        collection,
                        document = %document.name,
                        chunks,
                        "document indexed"
                    );
                }
                Err(error) => {
                    report.skipped += 1;
                    warn!(
                        event_name = "agent.ingest.document_skipped",
                        collection,
                        document = %document.name,
                        error = %error,
                        "document skipped"
                    );
                }
            }
        }
        Ok(report)
    }

    async fn ingest_document(
        &self,
        document: &SourceDocument,
        collection: &str,
    ) -> Result<usize, IngestError> {
        let content = tokio::fs::read_to_string(&document.path)
            .await
            .map_err(|source| io_error(&document.path, source))?;
        let chunks = chunk_document(&content, DEFAULT_CHUNK_WORDS);

        let mut points = Vec::with_capacity(chunks.len());
        for (chunk_index, chunk) in chunks.into_iter().enumerate() {
            let vector = self.llm.embed(&chunk.text).await?;
            points.push(VectorPoint {
                id: point_id(&document.name, chunk_index),
                vector,
                payload: ChunkPayload {
                    text: chunk.text,
                    section: chunk.section,
                    source: document.name.clone(),
                    category: document.category.clone(),
                    chunk_index,
                },
            });
        }

        let count = points.len();
        self.store.upsert(collection, points).await?;
        Ok(count)
    }
}

/// Stable per chunk, so re-ingesting a document replaces its points.
fn point_id(source: &str, chunk_index: usize) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("carbonex:{source}#{chunk_index}").as_bytes())
        .to_string()
}
