//! Manual document ingestion.
//!
//! Turns the configured docx manuals into page-tagged overlapping chunks
//! and maintains a plain-text conversion artifact next to each source for
//! the citation links the QA pipeline hands out.

pub mod docx;
pub mod splitter;

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::config::AppConfig;
use crate::core::errors::ApiError;

use splitter::TextSplitter;

/// A bounded slice of manual text, the unit of retrieval.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    pub text: String,
    /// Originating document path as configured.
    pub source: String,
    /// 1-based page number within the document.
    pub page: u32,
}

/// Path of the cached plain-text conversion for a manual document.
pub fn artifact_path(source: &Path) -> PathBuf {
    source.with_extension("txt")
}

pub struct Ingestor {
    splitter: TextSplitter,
}

impl Ingestor {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            splitter: TextSplitter::new(config.rag.chunk_size, config.rag.chunk_overlap),
        }
    }

    /// Ingests every configured manual document.
    ///
    /// A missing file is skipped with a warning. A document that fails to
    /// convert contributes no chunks; the error is logged and the other
    /// documents still go through.
    pub fn ingest_all(&self, project_root: &Path, files: &[String]) -> Vec<DocumentChunk> {
        let mut chunks = Vec::new();

        for file in files {
            let path = project_root.join(file);
            if !path.exists() {
                tracing::warn!("マニュアルファイル '{}' が見つかりませんでした。スキップします。", file);
                continue;
            }

            match self.ingest_document(&path, file) {
                Ok(mut document_chunks) => {
                    tracing::info!(
                        "ingested {} ({} chunks)",
                        file,
                        document_chunks.len()
                    );
                    chunks.append(&mut document_chunks);
                }
                Err(err) => {
                    tracing::error!("{} の変換中に問題が発生しました: {}", file, err);
                }
            }
        }

        chunks
    }

    fn ingest_document(&self, path: &Path, source: &str) -> Result<Vec<DocumentChunk>, ApiError> {
        let pages = docx::extract_pages(path)?;
        refresh_artifact(path, &pages)?;

        let mut chunks = Vec::new();
        for (index, page_text) in pages.iter().enumerate() {
            let page = (index + 1) as u32;
            for text in self.splitter.split(page_text) {
                chunks.push(DocumentChunk {
                    text,
                    source: source.to_string(),
                    page,
                });
            }
        }

        Ok(chunks)
    }
}

/// Writes the viewer-friendly text artifact, but only when the source is
/// newer than the cached copy.
fn refresh_artifact(source: &Path, pages: &[String]) -> Result<PathBuf, ApiError> {
    let artifact = artifact_path(source);

    if artifact.exists() {
        let source_mtime = fs::metadata(source)
            .and_then(|m| m.modified())
            .map_err(ApiError::internal)?;
        let artifact_mtime = fs::metadata(&artifact)
            .and_then(|m| m.modified())
            .map_err(ApiError::internal)?;
        if artifact_mtime >= source_mtime {
            return Ok(artifact);
        }
    }

    let rendered = pages.join("\n\u{0C}\n");
    fs::write(&artifact, rendered)
        .map_err(|e| ApiError::Internal(format!("write {}: {}", artifact.display(), e)))?;
    tracing::info!("regenerated conversion artifact {}", artifact.display());

    Ok(artifact)
}
