//! Positioned text recovered from a page content stream.
//!
//! `lopdf` decodes the operators and font encodings; this module runs a small
//! text-state machine over them (`BT`/`ET`, `Tf`, `Td`/`TD`/`Tm`/`T*`,
//! `Tj`/`TJ`/`'`/`"`) and records every shown string as a [`TextSpan`] with
//! its font size, bold flag and baseline position. Spans sharing a baseline
//! are grouped into [`TextLine`]s, which feed heading detection and table
//! detection.
//!
//! Glyph widths are not read from the font programs; advances are estimated
//! at half an em per character, which is enough to tell adjacent words from
//! separate table cells.

use crate::error::IngestError;
use lopdf::content::Operation;
use lopdf::{Dictionary, Document, Object, ObjectId};
use regex::Regex;
use std::collections::BTreeMap;

const GLYPH_WIDTH_EM: f32 = 0.5;
const SAME_LINE_TOLERANCE: f32 = 2.0;
const CELL_GAP_EM: f32 = 1.5;
const WORD_GAP_EM: f32 = 0.15;
const TJ_SPACE_THRESHOLD: f32 = -200.0;
const FORCE_BOLD_FLAG: i64 = 1 << 18;

type Matrix = [f32; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub x: f32,
    pub end_x: f32,
    pub y: f32,
    pub text: String,
    pub font_size: f32,
    pub bold: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextCell {
    pub x: f32,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct TextLine {
    pub y: f32,
    pub spans: Vec<TextSpan>,
}

impl TextLine {
    /// Spans ordered left to right, merged into cells wherever the gap between
    /// them is narrower than a column gutter.
    pub fn cells(&self) -> Vec<TextCell> {
        let mut ordered = self.spans.iter().collect::<Vec<_>>();
        ordered.sort_by(|left, right| left.x.total_cmp(&right.x));

        let mut cells: Vec<TextCell> = Vec::new();
        let mut previous_end: Option<f32> = None;

        for span in ordered {
            let gap = previous_end.map(|end| span.x - end);
            let size = span.font_size.max(1.0);

            match (cells.last_mut(), gap) {
                (Some(cell), Some(gap)) if gap <= size * CELL_GAP_EM => {
                    if gap > size * WORD_GAP_EM && !cell.text.ends_with(' ') {
                        cell.text.push(' ');
                    }
                    cell.text.push_str(span.text.trim());
                }
                _ => cells.push(TextCell {
                    x: span.x,
                    text: span.text.trim().to_string(),
                }),
            }

            previous_end = Some(previous_end.map_or(span.end_x, |end| end.max(span.end_x)));
        }

        cells
    }

    pub fn text(&self) -> String {
        self.cells()
            .into_iter()
            .map(|cell| cell.text)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Default)]
pub struct PageLayout {
    pub lines: Vec<TextLine>,
    pub inline_images: usize,
}

impl PageLayout {
    pub fn plain_text(&self) -> String {
        self.lines
            .iter()
            .map(TextLine::text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Layout text with heading spans rendered as `### ` markers.
    pub fn structured_text(&self, heading_font_size: f32) -> String {
        self.lines
            .iter()
            .map(|line| {
                line.spans
                    .iter()
                    .map(|span| {
                        if span.font_size > heading_font_size || span.bold {
                            format!("\n### {}\n", span.text)
                        } else {
                            span.text.clone()
                        }
                    })
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

const IDENTITY_H: &str = "Identity-H";

/// What the text-state machine needs from a page font.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FontStyle {
    pub bold: bool,
    /// `/Encoding` name, `StandardEncoding` when the font has none.
    pub encoding: String,
}

impl FontStyle {
    /// Decodes a string operand shown with this font.
    pub fn decode(&self, bytes: &[u8]) -> String {
        decode_shown_text(Some(&self.encoding), bytes)
    }
}

pub type PageFonts = BTreeMap<Vec<u8>, FontStyle>;

pub fn read_page_layout(
    document: &Document,
    page_id: ObjectId,
    fonts: &PageFonts,
) -> Result<PageLayout, IngestError> {
    let content = document
        .get_and_decode_page_content(page_id)
        .map_err(|error| IngestError::PdfParse(error.to_string()))?;

    let mut state = TextState::new(fonts);
    for operation in &content.operations {
        state.apply(operation);
    }

    Ok(state.layout)
}

pub fn page_fonts(document: &Document, page_id: ObjectId) -> PageFonts {
    let bold_name = Regex::new(r"(?i)bold|black|heavy|demi|semibold").ok();

    document
        .get_page_fonts(page_id)
        .into_iter()
        .map(|(key, font)| {
            let style = FontStyle {
                bold: is_bold(document, font, bold_name.as_ref()),
                encoding: font.get_font_encoding().to_string(),
            };
            (key, style)
        })
        .collect()
}

/// Image XObjects in the page resources. Pages without an `XObject`
/// dictionary have none.
pub fn count_page_images(document: &Document, page_id: ObjectId) -> usize {
    document
        .get_page_images(page_id)
        .map_or(0, |images| images.len())
}

fn is_bold(document: &Document, font: &Dictionary, bold_name: Option<&Regex>) -> bool {
    let named_bold = match (font.get(b"BaseFont").and_then(Object::as_name_str), bold_name) {
        (Ok(name), Some(pattern)) => pattern.is_match(name),
        _ => false,
    };

    let flagged_bold = font
        .get_deref(b"FontDescriptor", document)
        .and_then(Object::as_dict)
        .and_then(|descriptor| descriptor.get(b"Flags"))
        .and_then(Object::as_i64)
        .is_ok_and(|flags| flags & FORCE_BOLD_FLAG != 0);

    named_bold || flagged_bold
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}

/// `lopdf` leaves `Identity-H` undecoded; those strings are read as UTF-16BE,
/// with or without a byte-order mark. Everything else goes through the
/// font's single-byte encoding table.
pub fn decode_shown_text(encoding: Option<&str>, bytes: &[u8]) -> String {
    if encoding != Some(IDENTITY_H) {
        return Document::decode_text(encoding, bytes);
    }

    let utf16 = bytes.strip_prefix(&[0xFE, 0xFF]).unwrap_or(bytes);
    let units = utf16
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect::<Vec<_>>();
    String::from_utf16_lossy(&units)
}

fn translate(matrix: &Matrix, tx: f32, ty: f32) -> Matrix {
    [
        matrix[0],
        matrix[1],
        matrix[2],
        matrix[3],
        tx * matrix[0] + ty * matrix[2] + matrix[4],
        tx * matrix[1] + ty * matrix[3] + matrix[5],
    ]
}

struct TextState<'a> {
    fonts: &'a PageFonts,
    font_key: Vec<u8>,
    font_size: f32,
    leading: f32,
    text_matrix: Matrix,
    line_matrix: Matrix,
    layout: PageLayout,
}

impl<'a> TextState<'a> {
    fn new(fonts: &'a PageFonts) -> Self {
        Self {
            fonts,
            font_key: Vec::new(),
            font_size: 12.0,
            leading: 0.0,
            text_matrix: IDENTITY,
            line_matrix: IDENTITY,
            layout: PageLayout::default(),
        }
    }

    fn apply(&mut self, operation: &Operation) {
        let operands = &operation.operands;
        let operand = |index: usize| operands.get(index).and_then(number);

        match operation.operator.as_str() {
            "BT" => {
                self.text_matrix = IDENTITY;
                self.line_matrix = IDENTITY;
            }
            "Tf" => {
                if let Some(Object::Name(name)) = operands.first() {
                    self.font_key = name.clone();
                }
                if let Some(size) = operand(1) {
                    self.font_size = size;
                }
            }
            "TL" => {
                if let Some(leading) = operand(0) {
                    self.leading = leading;
                }
            }
            "Td" => {
                if let (Some(tx), Some(ty)) = (operand(0), operand(1)) {
                    self.move_line(tx, ty);
                }
            }
            "TD" => {
                if let (Some(tx), Some(ty)) = (operand(0), operand(1)) {
                    self.leading = -ty;
                    self.move_line(tx, ty);
                }
            }
            "Tm" => {
                let values = (0..6).filter_map(operand).collect::<Vec<_>>();
                if let Ok(matrix) = <Matrix>::try_from(values.as_slice()) {
                    self.text_matrix = matrix;
                    self.line_matrix = matrix;
                }
            }
            "T*" => self.move_line(0.0, -self.leading),
            "Tj" => {
                if let Some(Object::String(bytes, _)) = operands.first() {
                    self.show(&[ShowItem::Text(self.decode(bytes))]);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    let items = items
                        .iter()
                        .filter_map(|item| match item {
                            Object::String(bytes, _) => Some(ShowItem::Text(self.decode(bytes))),
                            other => number(other).map(ShowItem::Adjust),
                        })
                        .collect::<Vec<_>>();
                    self.show(&items);
                }
            }
            "'" => {
                self.move_line(0.0, -self.leading);
                if let Some(Object::String(bytes, _)) = operands.first() {
                    self.show(&[ShowItem::Text(self.decode(bytes))]);
                }
            }
            "\"" => {
                self.move_line(0.0, -self.leading);
                if let Some(Object::String(bytes, _)) = operands.get(2) {
                    self.show(&[ShowItem::Text(self.decode(bytes))]);
                }
            }
            "BI" => self.layout.inline_images += 1,
            _ => {}
        }
    }

    fn decode(&self, bytes: &[u8]) -> String {
        match self.fonts.get(&self.font_key) {
            Some(font) => font.decode(bytes),
            None => decode_shown_text(None, bytes),
        }
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.line_matrix = translate(&self.line_matrix, tx, ty);
        self.text_matrix = self.line_matrix;
    }

    fn show(&mut self, items: &[ShowItem]) {
        let start_x = self.text_matrix[4];
        let baseline = self.text_matrix[5];
        let mut text = String::new();

        for item in items {
            match item {
                ShowItem::Text(piece) => {
                    let advance = piece.chars().count() as f32 * self.font_size * GLYPH_WIDTH_EM;
                    self.text_matrix = translate(&self.text_matrix, advance, 0.0);
                    text.push_str(piece);
                }
                ShowItem::Adjust(thousandths) => {
                    let shift = -thousandths / 1000.0 * self.font_size;
                    self.text_matrix = translate(&self.text_matrix, shift, 0.0);
                    if *thousandths < TJ_SPACE_THRESHOLD && !text.is_empty() && !text.ends_with(' ') {
                        text.push(' ');
                    }
                }
            }
        }

        if text.trim().is_empty() {
            return;
        }

        let span = TextSpan {
            x: start_x,
            end_x: self.text_matrix[4],
            y: baseline,
            text,
            font_size: self.effective_font_size(),
            bold: self
                .fonts
                .get(&self.font_key)
                .is_some_and(|style| style.bold),
        };

        match self.layout.lines.last_mut() {
            Some(line) if (line.y - span.y).abs() <= SAME_LINE_TOLERANCE => line.spans.push(span),
            _ => self.layout.lines.push(TextLine {
                y: span.y,
                spans: vec![span],
            }),
        }
    }

    fn effective_font_size(&self) -> f32 {
        let scale = (self.text_matrix[2].powi(2) + self.text_matrix[3].powi(2)).sqrt();
        if scale > f32::EPSILON {
            self.font_size * scale
        } else {
            self.font_size
        }
    }
}

enum ShowItem {
    Text(String),
    Adjust(f32),
}
