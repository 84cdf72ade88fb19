//! Header detection, row normalisation and quality warnings.
//!
//! Input is the raw grid from a parsing strategy; output is a header list plus rows whose
//! width always equals the header count.

use rayon::prelude::*;

use crate::error::{IngestionError, IngestionResult};
use crate::types::Cell;

/// Cleaned rows above this count trigger a "large dataset" warning.
pub const LARGE_DATASET_ROWS: usize = 10_000;

/// Grids with at least this many rows are normalised in parallel.
pub const PARALLEL_THRESHOLD_ROWS: usize = 4_096;

/// Output of [`clean_grid`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanedData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Turn a raw grid into headers plus width-normalised rows.
///
/// Rules:
///
/// - An empty grid is [`IngestionError::NoDataFound`].
/// - If the first row is mostly numeric and a second row exists, the first row is data and
///   headers are synthesised as `Column 1`, `Column 2`, ... (with a warning). Otherwise the
///   first row, trimmed, is the header row; blank header cells get positional names.
/// - Rows where every cell is blank are dropped; the rest are padded with `""` or truncated
///   to the header count.
/// - Zero remaining rows is [`IngestionError::NoValidData`].
/// - Warnings (never fatal): more than [`LARGE_DATASET_ROWS`] rows, duplicate header names,
///   and an aggregate count of rows whose original width differed from the header count.
pub fn clean_grid(grid: &[Vec<Cell>]) -> IngestionResult<CleanedData> {
    let first = grid.first().ok_or(IngestionError::NoDataFound)?;
    let mut warnings = Vec::new();

    let infer_headers = grid.len() > 1 && mostly_numeric(first);
    let (headers, data_rows) = if infer_headers {
        warnings.push(
            "First row looks like data; generated column headers (Column 1, Column 2, ...)".to_string(),
        );
        let headers: Vec<String> = (1..=first.len()).map(|i| format!("Column {i}")).collect();
        (headers, grid)
    } else {
        let headers = first
            .iter()
            .enumerate()
            .map(|(idx, cell)| {
                let name = cell.to_text().trim().to_string();
                if name.is_empty() { format!("Column {}", idx + 1) } else { name }
            })
            .collect::<Vec<_>>();
        (headers, &grid[1..])
    };

    let width = headers.len();
    let normalise = |row: &Vec<Cell>| -> Option<(Vec<String>, bool)> {
        if row.iter().all(Cell::is_blank) {
            return None;
        }
        let mismatched = row.len() != width;
        let mut out: Vec<String> = row.iter().take(width).map(Cell::to_text).collect();
        out.resize(width, String::new());
        Some((out, mismatched))
    };

    let cleaned: Vec<(Vec<String>, bool)> = if data_rows.len() >= PARALLEL_THRESHOLD_ROWS {
        data_rows.par_iter().filter_map(normalise).collect()
    } else {
        data_rows.iter().filter_map(normalise).collect()
    };

    if cleaned.is_empty() {
        return Err(IngestionError::NoValidData);
    }

    let mismatched = cleaned.iter().filter(|(_, m)| *m).count();
    let rows: Vec<Vec<String>> = cleaned.into_iter().map(|(row, _)| row).collect();

    if rows.len() > LARGE_DATASET_ROWS {
        warnings.push(format!(
            "Large dataset ({} rows); consider processing in batches",
            rows.len()
        ));
    }

    let duplicates = duplicate_headers(&headers);
    if !duplicates.is_empty() {
        warnings.push(format!("Duplicate column headers: {}", duplicates.join(", ")));
    }

    if mismatched > 0 {
        warnings.push(format!(
            "{mismatched} row(s) had a column count different from the {width} header(s) and were padded or truncated"
        ));
    }

    Ok(CleanedData {
        headers,
        rows,
        errors: Vec::new(),
        warnings,
    })
}

fn mostly_numeric(row: &[Cell]) -> bool {
    let filled: Vec<&Cell> = row.iter().filter(|c| !c.is_blank()).collect();
    if filled.is_empty() {
        return false;
    }
    let numeric = filled.iter().filter(|c| c.looks_numeric()).count();
    numeric * 2 > filled.len()
}

/// Non-empty header names that appear more than once, in first-seen order.
fn duplicate_headers(headers: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for (idx, h) in headers.iter().enumerate() {
        if h.is_empty() || out.contains(h) {
            continue;
        }
        if headers[idx + 1..].contains(h) {
            out.push(h.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&[&str]]) -> Vec<Vec<Cell>> {
        rows.iter()
            .map(|r| r.iter().map(|s| Cell::Text(s.to_string())).collect())
            .collect()
    }

    #[test]
    fn header_row_is_trimmed() {
        let out = clean_grid(&grid(&[&[" name ", "score"], &["Alice", "90"]])).unwrap();
        assert_eq!(out.headers, vec!["name", "score"]);
        assert_eq!(out.rows, vec![vec!["Alice", "90"]]);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn numeric_first_row_synthesises_headers() {
        let out = clean_grid(&grid(&[&["1", "2"], &["3", "4"]])).unwrap();
        assert_eq!(out.headers, vec!["Column 1", "Column 2"]);
        assert_eq!(out.rows.len(), 2);
        assert!(out.warnings.iter().any(|w| w.contains("generated column headers")));
    }

    #[test]
    fn single_numeric_row_is_still_a_header() {
        let err = clean_grid(&grid(&[&["1", "2"]])).unwrap_err();
        assert!(matches!(err, IngestionError::NoValidData));
    }

    #[test]
    fn typed_numeric_cells_count_as_numeric() {
        let g = vec![
            vec![Cell::Int(1), Cell::Float(2.5), Cell::Text("x".into())],
            vec![Cell::Int(3), Cell::Int(4), Cell::Text("y".into())],
        ];
        let out = clean_grid(&g).unwrap();
        assert_eq!(out.headers, vec!["Column 1", "Column 2", "Column 3"]);
        assert_eq!(out.rows[0], vec!["1", "2.5", "x"]);
    }

    #[test]
    fn blank_rows_are_dropped_and_widths_normalised() {
        let out = clean_grid(&grid(&[
            &["a", "b", "c"],
            &["1"],
            &["", "  ", ""],
            &["2", "3", "4", "5"],
            &["6", "7", "8"],
        ]))
        .unwrap();
        assert_eq!(
            out.rows,
            vec![vec!["1", "", ""], vec!["2", "3", "4"], vec!["6", "7", "8"]]
        );
        assert!(out.rows.iter().all(|r| r.len() == out.headers.len()));
        let mismatch: Vec<_> = out.warnings.iter().filter(|w| w.contains("column count")).collect();
        assert_eq!(mismatch.len(), 1);
        assert!(mismatch[0].starts_with("2 row(s)"));
    }

    #[test]
    fn null_cells_count_as_blank() {
        let g = vec![
            vec![Cell::Text("a".into()), Cell::Text("b".into())],
            vec![Cell::Null, Cell::Null],
            vec![Cell::Null, Cell::Int(1)],
        ];
        let out = clean_grid(&g).unwrap();
        assert_eq!(out.rows, vec![vec!["", "1"]]);
    }

    #[test]
    fn blank_header_cells_get_positional_names() {
        let out = clean_grid(&grid(&[&["name", "", "score"], &["x", "y", "z"]])).unwrap();
        assert_eq!(out.headers, vec!["name", "Column 2", "score"]);
    }

    #[test]
    fn duplicate_headers_are_named_once() {
        let out = clean_grid(&grid(&[&["a", "a", "b", "a"], &["1", "2", "3", "4"]])).unwrap();
        let dup: Vec<_> = out.warnings.iter().filter(|w| w.contains("Duplicate")).collect();
        assert_eq!(dup, vec!["Duplicate column headers: a"]);
    }

    #[test]
    fn empty_grid_is_no_data() {
        assert!(matches!(clean_grid(&[]).unwrap_err(), IngestionError::NoDataFound));
    }

    #[test]
    fn header_only_is_no_valid_data() {
        assert!(matches!(
            clean_grid(&grid(&[&["name", "score"]])).unwrap_err(),
            IngestionError::NoValidData
        ));
    }

    #[test]
    fn large_grids_warn_and_keep_order() {
        let mut g = grid(&[&["id", "v"]]);
        for i in 0..(LARGE_DATASET_ROWS + 1) {
            g.push(vec![Cell::Text(i.to_string()), Cell::Text("x".into())]);
        }
        let out = clean_grid(&g).unwrap();
        assert_eq!(out.rows.len(), LARGE_DATASET_ROWS + 1);
        assert_eq!(out.rows[0][0], "0");
        assert_eq!(out.rows[LARGE_DATASET_ROWS][0], LARGE_DATASET_ROWS.to_string());
        assert!(out.warnings.iter().any(|w| w.contains("Large dataset")));
    }

    #[test]
    fn exactly_the_threshold_does_not_warn() {
        let mut g = grid(&[&["id"]]);
        for i in 0..LARGE_DATASET_ROWS {
            g.push(vec![Cell::Text(i.to_string())]);
        }
        let out = clean_grid(&g).unwrap();
        assert!(!out.warnings.iter().any(|w| w.contains("Large dataset")));
    }
}
