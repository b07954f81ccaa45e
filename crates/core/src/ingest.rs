use crate::chunking::build_chunks;
use crate::error::IngestError;
use crate::extractor::extract_document;
use crate::index::VectorIndex;
use crate::models::{ExtractionMethod, IngestionOptions, SourceFile};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Outcome of ingesting one upload. Failures are values, not errors, so a
/// batch always reports every file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestStatus {
    Indexed {
        filename: String,
        chunk_count: usize,
        method: ExtractionMethod,
        table_count: usize,
        image_count: usize,
    },
    Duplicate {
        filename: String,
    },
    /// The PDF opened but yielded no pages or no text to chunk.
    NoText {
        filename: String,
    },
    Failed {
        filename: String,
        reason: String,
    },
}

impl IngestStatus {
    pub fn filename(&self) -> &str {
        match self {
            IngestStatus::Indexed { filename, .. }
            | IngestStatus::Duplicate { filename }
            | IngestStatus::NoText { filename }
            | IngestStatus::Failed { filename, .. } => filename,
        }
    }

    pub fn is_indexed(&self) -> bool {
        matches!(self, IngestStatus::Indexed { .. })
    }
}

impl fmt::Display for IngestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestStatus::Indexed {
                filename,
                chunk_count,
                method,
                table_count,
                image_count,
            } => {
                write!(f, "✅ '{filename}': {chunk_count}개 청크로 처리 완료 ({method}")?;
                if *table_count > 0 {
                    write!(f, ", 표 {table_count}개")?;
                }
                if *image_count > 0 {
                    write!(f, ", 이미지 {image_count}개")?;
                }
                f.write_str(")")
            }
            IngestStatus::Duplicate { filename } => {
                write!(f, "⚠️ '{filename}'은 이미 처리된 파일입니다.")
            }
            IngestStatus::NoText { filename } => {
                write!(f, "❌ '{filename}': PDF에서 텍스트를 추출할 수 없습니다.")
            }
            IngestStatus::Failed { filename, reason } => {
                write!(f, "❌ '{filename}': 처리 중 오류 발생 - {reason}")
            }
        }
    }
}

/// PDF files under `root`, recursively and sorted. A PDF file path yields itself.
pub fn discover_pdf_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).into_iter().filter_map(|item| item.ok()) {
        if entry.file_type().is_file() && is_pdf(entry.path()) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Expands files and folders into the PDFs to upload, keeping argument order.
pub fn expand_pdf_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, IngestError> {
    let mut files = Vec::new();

    for input in inputs {
        if input.is_dir() {
            files.extend(discover_pdf_files(input));
        } else if is_pdf(input) {
            files.push(input.clone());
        } else {
            warn!(path = %input.display(), "skipping non-pdf input");
        }
    }

    if files.is_empty() {
        let listed = inputs
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(IngestError::InvalidArgument(format!("no pdf files found in {listed}")));
    }
    Ok(files)
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Reads a file from disk as an upload named after its file name.
pub fn read_upload(path: &Path) -> Result<SourceFile, IngestError> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;
    let bytes = fs::read(path)?;
    Ok(SourceFile::new(filename, bytes))
}

/// Dedup check, extraction, chunking and indexing for one upload.
pub async fn ingest_source_file(
    index: &dyn VectorIndex,
    source: &SourceFile,
    options: &IngestionOptions,
) -> IngestStatus {
    match run_pipeline(index, source, options).await {
        Ok(status) => {
            info!(file = %source.filename, status = %status, "ingest finished");
            status
        }
        Err(error) => {
            warn!(file = %source.filename, %error, "ingest failed");
            failure_status(&source.filename, error)
        }
    }
}

fn failure_status(filename: &str, error: IngestError) -> IngestStatus {
    match error {
        IngestError::NoText(_) => IngestStatus::NoText {
            filename: filename.to_string(),
        },
        other => IngestStatus::Failed {
            filename: filename.to_string(),
            reason: other.to_string(),
        },
    }
}

async fn run_pipeline(
    index: &dyn VectorIndex,
    source: &SourceFile,
    options: &IngestionOptions,
) -> Result<IngestStatus, IngestError> {
    if source.filename.trim().is_empty() {
        return Err(IngestError::MissingFileName("upload has no file name".to_string()));
    }

    if already_indexed(index, source).await {
        return Ok(IngestStatus::Duplicate {
            filename: source.filename.clone(),
        });
    }

    let staged = stage_upload(&source.bytes)?;
    let staged_path = staged.path().to_path_buf();
    let extraction = tokio::task::spawn_blocking(move || extract_document(&staged_path))
        .await
        .map_err(|error| IngestError::PdfParse(format!("extraction task failed: {error}")))??;
    drop(staged);

    let chunks = build_chunks(source, &extraction.pages, extraction.method, options)?;
    if chunks.is_empty() {
        return Err(IngestError::NoText(source.filename.clone()));
    }

    index.add(&chunks).await?;

    Ok(IngestStatus::Indexed {
        filename: source.filename.clone(),
        chunk_count: chunks.len(),
        method: extraction.method,
        table_count: extraction.total_tables(),
        image_count: extraction.total_images(),
    })
}

/// A failed lookup counts as "not processed yet".
async fn already_indexed(index: &dyn VectorIndex, source: &SourceFile) -> bool {
    match index.contains_file(&source.filename, &source.content_hash).await {
        Ok(found) => found,
        Err(error) => {
            warn!(file = %source.filename, %error, "중복 확인 중 오류, treating file as new");
            false
        }
    }
}

/// Writes the upload to a temporary `.pdf` removed when the handle drops.
fn stage_upload(bytes: &[u8]) -> Result<tempfile::NamedTempFile, IngestError> {
    let mut staged = tempfile::Builder::new()
        .prefix("upload_")
        .suffix(".pdf")
        .tempfile()?;
    staged.write_all(bytes)?;
    staged.flush()?;
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::index::MemoryIndex;
    use crate::test_pdf::{text_line, write_pdf, write_sample_sop, FixturePage};
    use std::fs::File;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn memory_index() -> MemoryIndex {
        MemoryIndex::new(Arc::new(HashingEmbedder { dimensions: 64 }))
    }

    fn sample_upload(name: &str) -> Result<SourceFile, Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("source.pdf");
        write_sample_sop(&path);
        Ok(SourceFile::new(name, fs::read(&path)?))
    }

    #[test]
    fn discover_pdf_files_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(nested.join("b.PDF")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        fs::write(base.join("notes.txt"), b"ignored")?;

        let files = discover_pdf_files(base);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn inputs_without_pdfs_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let text = dir.path().join("readme.txt");
        fs::write(&text, b"x")?;

        let result = expand_pdf_inputs(&[dir.path().to_path_buf(), text]);
        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
        Ok(())
    }

    #[test]
    fn status_lines_match_user_facing_format() {
        let indexed = IngestStatus::Indexed {
            filename: "gmp.pdf".to_string(),
            chunk_count: 12,
            method: ExtractionMethod::Structural,
            table_count: 2,
            image_count: 0,
        };
        assert_eq!(
            indexed.to_string(),
            "✅ 'gmp.pdf': 12개 청크로 처리 완료 (고급 추출 (표, 이미지, 구조 포함), 표 2개)"
        );

        let plain = IngestStatus::Indexed {
            filename: "old.pdf".to_string(),
            chunk_count: 3,
            method: ExtractionMethod::PlainText,
            table_count: 0,
            image_count: 0,
        };
        assert_eq!(plain.to_string(), "✅ 'old.pdf': 3개 청크로 처리 완료 (기본 추출)");

        let duplicate = IngestStatus::Duplicate {
            filename: "gmp.pdf".to_string(),
        };
        assert_eq!(duplicate.to_string(), "⚠️ 'gmp.pdf'은 이미 처리된 파일입니다.");

        let failed = IngestStatus::Failed {
            filename: "bad.pdf".to_string(),
            reason: "boom".to_string(),
        };
        assert_eq!(failed.to_string(), "❌ 'bad.pdf': 처리 중 오류 발생 - boom");

        let empty = failure_status("scan.pdf", IngestError::NoText("scan.pdf".to_string()));
        assert_eq!(empty.to_string(), "❌ 'scan.pdf': PDF에서 텍스트를 추출할 수 없습니다.");
    }

    #[tokio::test]
    async fn table_flags_stay_on_their_page() -> Result<(), Box<dyn std::error::Error>> {
        let index = memory_index();
        let upload = sample_upload("sop.pdf")?;

        let status = ingest_source_file(&index, &upload, &IngestionOptions::default()).await;
        match &status {
            IngestStatus::Indexed {
                method,
                table_count,
                image_count,
                ..
            } => {
                assert_eq!(*method, ExtractionMethod::Structural);
                assert_eq!(*table_count, 1);
                assert_eq!(*image_count, 2);
            }
            other => panic!("unexpected status: {other}"),
        }

        let chunks = index.search("Temperature", 100).await?.into_hits();
        assert!(!chunks.is_empty());
        for hit in &chunks {
            let metadata = &hit.chunk.metadata;
            assert_eq!(metadata.has_tables, metadata.page == Some(2));
            assert_eq!(metadata.source, "sop.pdf");
            assert_eq!(metadata.file_hash, upload.content_hash);
        }
        Ok(())
    }

    #[tokio::test]
    async fn same_bytes_twice_are_indexed_once() -> Result<(), Box<dyn std::error::Error>> {
        let index = memory_index();
        let upload = sample_upload("sop.pdf")?;
        let options = IngestionOptions::default();

        assert!(ingest_source_file(&index, &upload, &options).await.is_indexed());
        let before = index.stats().await?;

        let again = ingest_source_file(&index, &upload, &options).await;
        assert_eq!(
            again,
            IngestStatus::Duplicate {
                filename: "sop.pdf".to_string()
            }
        );
        assert_eq!(index.stats().await?, before);
        Ok(())
    }

    #[tokio::test]
    async fn same_name_with_new_bytes_is_indexed_again() -> Result<(), Box<dyn std::error::Error>> {
        let index = memory_index();
        let options = IngestionOptions::default();
        let first = sample_upload("sop.pdf")?;

        let dir = tempdir()?;
        let path = dir.path().join("revised.pdf");
        write_pdf(
            &path,
            vec![FixturePage::new(text_line("F1", 10, 72, 700, "Revision 2 supersedes all."))],
        );
        let revised = SourceFile::new("sop.pdf", fs::read(&path)?);

        assert!(ingest_source_file(&index, &first, &options).await.is_indexed());
        assert!(ingest_source_file(&index, &revised, &options).await.is_indexed());

        let stats = index.stats().await?;
        let per_file = stats.chunks_per_file[0].1;
        assert_eq!(stats.chunks_per_file.len(), 1);
        assert_eq!(stats.total_chunks, per_file);
        assert!(index.contains_file("sop.pdf", &revised.content_hash).await?);
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_upload_becomes_a_failed_status() -> Result<(), Box<dyn std::error::Error>> {
        let index = memory_index();
        let upload = SourceFile::new("broken.pdf", b"%PDF-1.4\n%broken".to_vec());

        let status = ingest_source_file(&index, &upload, &IngestionOptions::default()).await;
        assert!(matches!(status, IngestStatus::Failed { .. }));
        assert!(status.to_string().starts_with("❌ 'broken.pdf': 처리 중 오류 발생 - "));
        assert_eq!(index.stats().await?.total_chunks, 0);
        Ok(())
    }

    #[tokio::test]
    async fn pdf_without_pages_reports_missing_text() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("empty.pdf");
        write_pdf(&path, Vec::new());
        let upload = SourceFile::new("empty.pdf", fs::read(&path)?);
        let index = memory_index();

        let status = ingest_source_file(&index, &upload, &IngestionOptions::default()).await;

        assert_eq!(
            status,
            IngestStatus::NoText {
                filename: "empty.pdf".to_string()
            }
        );
        assert!(!status.is_indexed());
        assert_eq!(index.stats().await?.total_chunks, 0);
        Ok(())
    }
}
