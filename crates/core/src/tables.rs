//! Table detection over positioned text lines.
//!
//! A table is a run of at least two consecutive lines that each split into two
//! or more cells. Column anchors come from the run's first row and every later
//! row is aligned to them; a row that cannot be aligned fails that table only.

use crate::error::TableError;
use crate::layout::{TextCell, TextLine};
use crate::models::TableRows;

const MIN_ROWS: usize = 2;
const MIN_COLUMNS: usize = 2;

#[derive(Debug, Clone)]
pub struct TableCandidate {
    rows: Vec<Vec<TextCell>>,
}

impl TableCandidate {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

pub fn detect_tables(lines: &[TextLine]) -> Vec<TableCandidate> {
    let mut tables = Vec::new();
    let mut run: Vec<Vec<TextCell>> = Vec::new();

    for line in lines {
        let cells = line.cells();
        if cells.len() >= MIN_COLUMNS {
            run.push(cells);
            continue;
        }
        flush_run(&mut run, &mut tables);
    }
    flush_run(&mut run, &mut tables);

    tables
}

fn flush_run(run: &mut Vec<Vec<TextCell>>, tables: &mut Vec<TableCandidate>) {
    if run.len() >= MIN_ROWS {
        tables.push(TableCandidate {
            rows: std::mem::take(run),
        });
    } else {
        run.clear();
    }
}

/// Aligns every row of `table` to the column anchors of its first row.
pub fn extract_rows(table: &TableCandidate, page: u32, index: usize) -> Result<TableRows, TableError> {
    let fail = |reason: String| TableError {
        page,
        table: index,
        reason,
    };

    let anchors = table
        .rows
        .first()
        .map(|header| header.iter().map(|cell| cell.x).collect::<Vec<_>>())
        .ok_or_else(|| fail("table has no rows".to_string()))?;

    let narrowest_gap = anchors
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .fold(f32::INFINITY, f32::min);
    let tolerance = (narrowest_gap / 2.0).max(1.0);

    let mut rows = Vec::with_capacity(table.rows.len());
    for cells in &table.rows {
        let mut row = vec![String::new(); anchors.len()];

        for cell in cells {
            let (column, distance) = anchors
                .iter()
                .enumerate()
                .map(|(column, anchor)| (column, (cell.x - anchor).abs()))
                .min_by(|left, right| left.1.total_cmp(&right.1))
                .ok_or_else(|| fail("table has no columns".to_string()))?;

            if distance > tolerance {
                return Err(fail(format!(
                    "cell '{}' at x={:.1} does not line up with any column",
                    cell.text, cell.x
                )));
            }

            let slot = &mut row[column];
            if !slot.is_empty() {
                slot.push(' ');
            }
            slot.push_str(&cell.text);
        }

        rows.push(row);
    }

    Ok(rows)
}

/// Pipe-delimited block labelled with the table's 1-based index on its page.
pub fn render_table(rows: &TableRows, index: usize) -> String {
    let mut rendered = format!("\n\n[표 {index}]\n");
    for row in rows {
        rendered.push_str("| ");
        rendered.push_str(&row.join(" | "));
        rendered.push_str(" |\n");
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::TextSpan;

    fn line(y: f32, cells: &[(f32, &str)]) -> TextLine {
        TextLine {
            y,
            spans: cells
                .iter()
                .map(|(x, text)| TextSpan {
                    x: *x,
                    end_x: x + text.chars().count() as f32 * 5.0,
                    y,
                    text: text.to_string(),
                    font_size: 10.0,
                    bold: false,
                })
                .collect(),
        }
    }

    #[test]
    fn aligned_rows_form_one_table() {
        let lines = vec![
            line(700.0, &[(72.0, "Intro paragraph")]),
            line(680.0, &[(72.0, "Step"), (200.0, "Owner")]),
            line(666.0, &[(72.0, "Weigh"), (200.0, "QA")]),
            line(652.0, &[(72.0, "Mix"), (200.0, "Production")]),
            line(630.0, &[(72.0, "Closing paragraph")]),
        ];

        let tables = detect_tables(&lines);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].row_count(), 3);

        let rows = extract_rows(&tables[0], 1, 1).expect("aligned table should extract");
        assert_eq!(rows[2], vec!["Mix".to_string(), "Production".to_string()]);
    }

    #[test]
    fn single_multi_cell_line_is_not_a_table() {
        let lines = vec![
            line(700.0, &[(72.0, "Left"), (300.0, "Right")]),
            line(680.0, &[(72.0, "plain text")]),
        ];
        assert!(detect_tables(&lines).is_empty());
    }

    #[test]
    fn misaligned_row_fails_only_that_table() {
        let lines = vec![
            line(700.0, &[(72.0, "A"), (200.0, "B")]),
            line(686.0, &[(72.0, "1"), (400.0, "far away")]),
        ];

        let tables = detect_tables(&lines);
        let error = extract_rows(&tables[0], 3, 1).expect_err("row should not align");
        assert_eq!(error.page, 3);
        assert_eq!(error.table, 1);
    }

    #[test]
    fn rendered_table_is_pipe_delimited() {
        let rows = vec![
            vec!["항목".to_string(), "기준".to_string()],
            vec!["pH".to_string(), String::new()],
        ];
        assert_eq!(
            render_table(&rows, 2),
            "\n\n[표 2]\n| 항목 | 기준 |\n| pH |  |\n"
        );
    }
}
