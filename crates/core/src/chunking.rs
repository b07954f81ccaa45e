use crate::error::IngestError;
use crate::models::{Chunk, ChunkMetadata, ExtractionMethod, IngestionOptions, PageUnit, SourceFile};
use std::collections::VecDeque;

/// Paragraph, line, sentence, word, then character boundaries.
pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
            overlap_chars: value.chunk_overlap_chars,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be > 0".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap_chars {} must be smaller than max_chars {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

/// Splits on the first separator present in the text, merging small pieces
/// back together up to `max_chars` and recursing into pieces that are still
/// too long with the remaining separators. Lengths are counted in chars.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    config: ChunkingConfig,
    separators: Vec<&'static str>,
}

impl RecursiveSplitter {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self {
            config,
            separators: DEFAULT_SEPARATORS.to_vec(),
        })
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[&'static str]) -> Vec<String> {
        let mut separator = separators.last().copied().unwrap_or("");
        let mut remaining: &[&'static str] = &[];

        for (position, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = candidate;
                break;
            }
            if text.contains(candidate) {
                separator = candidate;
                remaining = &separators[position + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.config.max_chars {
                fitting.push(piece);
                continue;
            }

            if !fitting.is_empty() {
                chunks.extend(self.merge_pieces(&fitting));
                fitting.clear();
            }

            if remaining.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_recursive(piece, remaining));
            }
        }

        if !fitting.is_empty() {
            chunks.extend(self.merge_pieces(&fitting));
        }

        chunks
    }

    fn merge_pieces(&self, pieces: &[&str]) -> Vec<String> {
        let ChunkingConfig {
            max_chars,
            overlap_chars,
        } = self.config;

        let mut merged = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);

            if total + len > max_chars && !window.is_empty() {
                if let Some(chunk) = join_window(&window) {
                    merged.push(chunk);
                }

                while total > overlap_chars || (total + len > max_chars && total > 0) {
                    match window.pop_front() {
                        Some(dropped) => total -= char_len(dropped),
                        None => break,
                    }
                }
            }

            window.push_back(piece);
            total += len;
        }

        if let Some(chunk) = join_window(&window) {
            merged.push(chunk);
        }

        merged
    }
}

/// Splits `text` before every occurrence of `separator`, so each separator
/// stays at the start of the piece that follows it. An empty separator splits
/// into characters.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(start, ch)| &text[start..start + ch.len_utf8()])
            .collect();
    }

    let mut boundaries = vec![0];
    boundaries.extend(text.match_indices(separator).map(|(index, _)| index));
    boundaries.push(text.len());

    boundaries
        .windows(2)
        .map(|pair| &text[pair[0]..pair[1]])
        .filter(|piece| !piece.is_empty())
        .collect()
}

fn join_window(window: &VecDeque<&str>) -> Option<String> {
    let joined = window.iter().copied().collect::<String>();
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Splits every page independently and numbers the resulting chunks across
/// the whole file, so each chunk keeps the page and flags it was drawn from.
pub fn build_chunks(
    source: &SourceFile,
    pages: &[PageUnit],
    method: ExtractionMethod,
    options: &IngestionOptions,
) -> Result<Vec<Chunk>, IngestError> {
    let splitter = RecursiveSplitter::new(ChunkingConfig::from(options))?;
    let mut chunks = Vec::new();

    for page in pages {
        for text in splitter.split_text(&page.content) {
            let sequence = chunks.len() + 1;
            chunks.push(Chunk {
                text,
                metadata: ChunkMetadata {
                    source: source.filename.clone(),
                    file_hash: source.content_hash.clone(),
                    upload_time: source.uploaded_at,
                    page: Some(page.metadata.page),
                    chunk_id: format!("{}_chunk_{sequence}", source.filename),
                    has_tables: page.metadata.has_tables,
                    table_count: page.metadata.table_count,
                    image_count: page.metadata.image_count,
                    extraction_method: method,
                },
            });
        }
    }

    Ok(chunks)
}
