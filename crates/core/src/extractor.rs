use crate::error::IngestError;
use crate::layout::{count_page_images, page_fonts, read_page_layout};
use crate::models::{ExtractionMethod, PageMetadata, PageUnit};
use crate::tables::{detect_tables, extract_rows, render_table};
use lopdf::{Document, ObjectId};
use std::path::Path;
use tracing::{debug, warn};

/// Spans larger than this (in points) are treated as headings.
pub const HEADING_FONT_SIZE: f32 = 14.0;

pub trait PdfExtractor {
    fn method(&self) -> ExtractionMethod;

    /// One [`PageUnit`] per page, in page order, empty pages included.
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageUnit>, IngestError>;
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub pages: Vec<PageUnit>,
    pub method: ExtractionMethod,
}

impl Extraction {
    pub fn total_tables(&self) -> usize {
        self.pages.iter().map(|page| page.metadata.table_count).sum()
    }

    pub fn total_images(&self) -> usize {
        self.pages.iter().map(|page| page.metadata.image_count).sum()
    }
}

/// Layout-aware extraction: tables, image counts and heading markers.
#[derive(Debug, Clone, Copy)]
pub struct StructuralExtractor {
    pub heading_font_size: f32,
}

impl Default for StructuralExtractor {
    fn default() -> Self {
        Self {
            heading_font_size: HEADING_FONT_SIZE,
        }
    }
}

impl PdfExtractor for StructuralExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Structural
    }

    fn extract_pages(&self, path: &Path) -> Result<Vec<PageUnit>, IngestError> {
        let document = load_document(path)?;
        let pages = document.get_pages();
        let total_pages = pages.len();

        pages
            .into_iter()
            .map(|(number, page_id)| self.extract_page(&document, number, page_id, total_pages))
            .collect()
    }
}

impl StructuralExtractor {
    fn extract_page(
        &self,
        document: &Document,
        number: u32,
        page_id: ObjectId,
        total_pages: usize,
    ) -> Result<PageUnit, IngestError> {
        let fonts = page_fonts(document, page_id);
        let layout = read_page_layout(document, page_id, &fonts)?;

        let raw_text = match document.extract_text(&[number]) {
            Ok(text) => text,
            Err(error) => {
                debug!(page = number, %error, "library text extraction failed, using layout text");
                layout.plain_text()
            }
        };

        let candidates = detect_tables(&layout.lines);
        let mut tables = Vec::new();
        let mut table_blocks = String::new();

        for (position, candidate) in candidates.iter().enumerate() {
            let index = position + 1;
            match extract_rows(candidate, number, index) {
                Ok(rows) => {
                    table_blocks.push_str(&render_table(&rows, index));
                    tables.push(rows);
                }
                Err(error) => {
                    warn!(page = number, table = index, %error, "표 추출 중 오류, skipping table");
                }
            }
        }

        let image_count = count_page_images(document, page_id) + layout.inline_images;
        let structured_text = layout.structured_text(self.heading_font_size);
        let content = compose_page_content(number, &raw_text, &table_blocks, image_count, &structured_text);

        Ok(PageUnit {
            raw_text,
            tables,
            structured_text,
            content,
            metadata: PageMetadata {
                page: number,
                has_tables: !candidates.is_empty(),
                table_count: candidates.len(),
                image_count,
                total_pages,
            },
        })
    }
}

/// Per-page text from the PDF library, without tables or structure.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl PdfExtractor for PlainTextExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::PlainText
    }

    fn extract_pages(&self, path: &Path) -> Result<Vec<PageUnit>, IngestError> {
        let document = load_document(path)?;
        let pages = document.get_pages();
        let total_pages = pages.len();

        let mut units = Vec::with_capacity(total_pages);
        for (number, _page_id) in pages {
            let text = document
                .extract_text(&[number])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            units.push(PageUnit {
                raw_text: text.clone(),
                tables: Vec::new(),
                structured_text: String::new(),
                content: text,
                metadata: PageMetadata {
                    page: number,
                    has_tables: false,
                    table_count: 0,
                    image_count: 0,
                    total_pages,
                },
            });
        }

        Ok(units)
    }
}

/// Tries each strategy in order; the first one that yields pages wins.
pub fn extract_with_fallback(
    path: &Path,
    strategies: &[&dyn PdfExtractor],
) -> Result<Extraction, IngestError> {
    let mut failures = Vec::new();

    for strategy in strategies {
        let method = strategy.method();
        match strategy.extract_pages(path) {
            Ok(pages) if !pages.is_empty() => return Ok(Extraction { pages, method }),
            Ok(_) => debug!(method = %method, path = %path.display(), "strategy produced no pages"),
            Err(error) => {
                warn!(method = %method, path = %path.display(), %error, "extraction strategy failed");
                failures.push(format!("{method}: {error}"));
            }
        }
    }

    if failures.is_empty() {
        Err(IngestError::NoText(path.display().to_string()))
    } else {
        Err(IngestError::PdfParse(failures.join("; ")))
    }
}

/// Structural extraction first, plain per-page text as the fallback.
pub fn extract_document(path: &Path) -> Result<Extraction, IngestError> {
    extract_with_fallback(path, &[&StructuralExtractor::default(), &PlainTextExtractor])
}

fn load_document(path: &Path) -> Result<Document, IngestError> {
    Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))
}

fn compose_page_content(
    number: u32,
    raw_text: &str,
    table_blocks: &str,
    image_count: usize,
    structured_text: &str,
) -> String {
    let image_note = if image_count > 0 {
        format!("\n\n[이 페이지에는 {image_count}개의 이미지가 포함되어 있습니다]\n")
    } else {
        String::new()
    };

    format!(
        "페이지 {number} 내용:\n\n{raw_text}\n\n{table_blocks}\n\n{image_note}\n\n구조화된 텍스트:\n{structured_text}"
    )
    .trim()
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_pdf::{text_line, write_pdf, write_sample_sop, FixturePage};
    use lopdf::content::Operation;
    use lopdf::{Object, StringFormat};
    use std::cell::Cell;
    use tempfile::tempdir;

    #[test]
    fn structural_extraction_yields_one_unit_per_page_in_order() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("sop.pdf");
        write_sample_sop(&path);

        let pages = StructuralExtractor::default().extract_pages(&path)?;

        assert_eq!(pages.len(), 3);
        let numbers = pages.iter().map(PageUnit::page_number).collect::<Vec<_>>();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(pages.iter().all(|page| page.metadata.total_pages == 3));
        Ok(())
    }

    #[test]
    fn structural_extraction_marks_tables_images_and_headings() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("sop.pdf");
        write_sample_sop(&path);

        let pages = StructuralExtractor::default().extract_pages(&path)?;

        assert!(pages[0].structured_text.contains("### Scope"));
        assert!(pages[0].content.starts_with("페이지 1 내용:"));
        assert!(!pages[0].metadata.has_tables);

        assert!(pages[1].metadata.has_tables);
        assert_eq!(pages[1].metadata.table_count, 1);
        assert!(pages[1].content.contains("[표 1]"));
        assert!(pages[1].content.contains("| Temperature | 25C |"));

        assert_eq!(pages[2].metadata.image_count, 2);
        assert!(pages[2].content.contains("[이 페이지에는 2개의 이미지가 포함되어 있습니다]"));
        assert!(pages[2].structured_text.contains("### Approval"));
        Ok(())
    }

    #[test]
    fn winansi_punctuation_survives_structured_text() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("duties.pdf");
        let operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 10.into()]),
            Operation::new("Td", vec![72.into(), 700.into()]),
            Operation::new(
                "Tj",
                vec![Object::String(
                    b"Operator\x92s duty \x96 QA".to_vec(),
                    StringFormat::Literal,
                )],
            ),
            Operation::new("ET", vec![]),
        ];
        write_pdf(&path, vec![FixturePage::new(operations)]);

        let pages = StructuralExtractor::default().extract_pages(&path)?;

        let expected = "Operator\u{2019}s duty \u{2013} QA";
        assert!(pages[0].raw_text.contains(expected));
        assert!(pages[0].structured_text.contains(expected));
        assert!(!pages[0].content.contains('\u{92}'));
        Ok(())
    }

    #[test]
    fn failing_table_is_skipped_but_still_counted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("limits.pdf");

        let mut operations = text_line("F1", 10, 72, 700, "Parameter");
        operations.extend(text_line("F1", 10, 300, 700, "Limit"));
        operations.extend(text_line("F1", 10, 72, 686, "Temperature"));
        operations.extend(text_line("F1", 10, 300, 686, "25C"));
        operations.extend(text_line("F1", 10, 72, 660, "Deviations are listed below."));
        operations.extend(text_line("F1", 10, 72, 630, "A"));
        operations.extend(text_line("F1", 10, 200, 630, "B"));
        operations.extend(text_line("F1", 10, 72, 616, "1"));
        operations.extend(text_line("F1", 10, 400, 616, "far away"));
        write_pdf(&path, vec![FixturePage::new(operations)]);

        let pages = StructuralExtractor::default().extract_pages(&path)?;
        let page = &pages[0];

        assert!(page.content.contains("[표 1]"));
        assert!(page.content.contains("| Temperature | 25C |"));
        assert!(!page.content.contains("[표 2]"));
        assert_eq!(page.tables.len(), 1);
        assert!(page.metadata.has_tables);
        assert_eq!(page.metadata.table_count, 2);
        assert!(page.content.contains("Deviations are listed below."));
        assert!(page.content.contains("far away"));
        Ok(())
    }

    struct FailingExtractor {
        calls: Cell<usize>,
    }

    impl PdfExtractor for FailingExtractor {
        fn method(&self) -> ExtractionMethod {
            ExtractionMethod::Structural
        }

        fn extract_pages(&self, _path: &Path) -> Result<Vec<PageUnit>, IngestError> {
            self.calls.set(self.calls.get() + 1);
            Err(IngestError::PdfParse("layout walk failed".to_string()))
        }
    }

    #[test]
    fn fallback_records_the_strategy_that_succeeded() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("sop.pdf");
        write_sample_sop(&path);

        let failing = FailingExtractor { calls: Cell::new(0) };
        let extraction = extract_with_fallback(&path, &[&failing, &PlainTextExtractor])?;

        assert_eq!(failing.calls.get(), 1);
        assert_eq!(extraction.method, ExtractionMethod::PlainText);
        assert_eq!(extraction.pages.len(), 3);
        assert!(extraction.pages.iter().all(|page| !page.metadata.has_tables));
        Ok(())
    }

    #[test]
    fn unreadable_pdf_fails_every_strategy() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4\n%broken")?;

        let error = extract_document(&path).expect_err("broken pdf must not extract");
        assert!(matches!(
            error,
            IngestError::PdfParse(_) | IngestError::NoText(_)
        ));
        Ok(())
    }

    #[test]
    fn page_content_skips_image_note_without_images() {
        let content = compose_page_content(4, "body", "", 0, "body");
        assert!(content.starts_with("페이지 4 내용:\n\nbody"));
        assert!(content.ends_with("구조화된 텍스트:\nbody"));
        assert!(!content.contains("이미지"));
    }
}
