//! Delimited-text strategy.

use crate::error::{IngestionError, IngestionResult};
use crate::types::{Cell, RawGrid};

/// Candidate delimiters, in tie-break priority order.
pub const CANDIDATE_DELIMITERS: [char; 4] = [',', '\t', ';', '|'];

/// Number of leading characters sampled for delimiter detection.
pub const DELIMITER_SAMPLE_CHARS: usize = 1024;

/// Default number of records between incremental progress reports.
pub const DEFAULT_CHUNK_SIZE: usize = 1_000;

/// Pick the most frequent candidate delimiter in the first [`DELIMITER_SAMPLE_CHARS`] chars.
///
/// Ties go to the earlier entry of [`CANDIDATE_DELIMITERS`]; text with none of them is
/// treated as comma separated.
pub fn detect_delimiter(text: &str) -> u8 {
    let mut counts = [0usize; CANDIDATE_DELIMITERS.len()];
    for ch in text.chars().take(DELIMITER_SAMPLE_CHARS) {
        if let Some(idx) = CANDIDATE_DELIMITERS.iter().position(|&d| d == ch) {
            counts[idx] += 1;
        }
    }

    let mut best = 0;
    for idx in 1..counts.len() {
        if counts[idx] > counts[best] {
            best = idx;
        }
    }
    CANDIDATE_DELIMITERS[best] as u8
}

/// Resolve a caller-supplied delimiter into the single byte the CSV reader needs.
///
/// Accepts `"\t"` spelled out as well as a literal tab.
pub fn resolve_delimiter(raw: &str) -> IngestionResult<u8> {
    if raw == "\\t" {
        return Ok(b'\t');
    }
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii() => Ok(c as u8),
        _ => Err(IngestionError::UnsupportedFormat {
            message: format!("delimiter must be a single ASCII character, got {raw:?}"),
        }),
    }
}

/// Parse decoded text into a row-major grid of text cells.
///
/// Records may have different widths; quoting follows RFC 4180. Every `chunk_size` records
/// `on_chunk(records_read, bytes_consumed)` is called so the caller can report progress
/// proportional to the reader's position.
pub fn parse_delimited(
    text: &str,
    delimiter: u8,
    chunk_size: usize,
    mut on_chunk: impl FnMut(usize, usize),
) -> IngestionResult<RawGrid> {
    let chunk_size = chunk_size.max(1);
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let mut rows: Vec<Vec<Cell>> = Vec::new();
    let mut total_columns = 0usize;
    let mut record = csv::StringRecord::new();
    while rdr.read_record(&mut record)? {
        total_columns = total_columns.max(record.len());
        rows.push(record.iter().map(|field| Cell::Text(field.to_string())).collect());
        if rows.len() % chunk_size == 0 {
            on_chunk(rows.len(), rdr.position().byte() as usize);
        }
    }

    Ok(RawGrid {
        total_rows: rows.len(),
        total_columns,
        rows,
        encoding: None,
        sheet_names: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(grid: &RawGrid) -> Vec<Vec<String>> {
        grid.rows
            .iter()
            .map(|r| r.iter().map(Cell::to_text).collect())
            .collect()
    }

    #[test]
    fn most_frequent_delimiter_wins() {
        let mut sample = String::new();
        sample.push_str(&",".repeat(50));
        sample.push_str(&";".repeat(10));
        sample.push_str(&"\t".repeat(5));
        assert_eq!(detect_delimiter(&sample), b',');

        assert_eq!(detect_delimiter("a;b;c\n1;2;3\n"), b';');
        assert_eq!(detect_delimiter("a\tb\n1\t2\n"), b'\t');
        assert_eq!(detect_delimiter("a|b|c"), b'|');
    }

    #[test]
    fn ties_prefer_comma_then_tab() {
        assert_eq!(detect_delimiter("a,b;c"), b',');
        assert_eq!(detect_delimiter("a\tb;c"), b'\t');
        assert_eq!(detect_delimiter("no delimiters here"), b',');
    }

    #[test]
    fn only_the_sample_window_counts() {
        let mut text = ",".repeat(10);
        text.push_str(&"x".repeat(DELIMITER_SAMPLE_CHARS));
        text.push_str(&";".repeat(500));
        assert_eq!(detect_delimiter(&text), b',');
    }

    #[test]
    fn caller_delimiters_are_validated() {
        assert_eq!(resolve_delimiter(";").unwrap(), b';');
        assert_eq!(resolve_delimiter("\\t").unwrap(), b'\t');
        assert_eq!(resolve_delimiter("\t").unwrap(), b'\t');
        assert!(resolve_delimiter("::").is_err());
        assert!(resolve_delimiter("").is_err());
        assert!(resolve_delimiter("¦").is_err());
    }

    #[test]
    fn ragged_rows_and_quotes_are_kept() {
        let grid = parse_delimited("a,b,c\n1,\"x, y\"\n2,3,4,5\n", b',', 100, |_, _| {}).unwrap();
        assert_eq!(
            texts(&grid),
            vec![
                vec!["a", "b", "c"],
                vec!["1", "x, y"],
                vec!["2", "3", "4", "5"],
            ]
        );
        assert_eq!(grid.total_rows, 3);
        assert_eq!(grid.total_columns, 4);
    }

    #[test]
    fn empty_text_yields_empty_grid() {
        let grid = parse_delimited("", b',', 100, |_, _| {}).unwrap();
        assert!(grid.rows.is_empty());
    }

    #[test]
    fn chunk_callback_reports_growing_positions() {
        let text: String = (0..10).map(|i| format!("{i},{i}\n")).collect();
        let mut seen = Vec::new();
        parse_delimited(&text, b',', 3, |rows, pos| seen.push((rows, pos))).unwrap();
        assert_eq!(seen.iter().map(|(r, _)| *r).collect::<Vec<_>>(), vec![3, 6, 9]);
        assert!(seen.windows(2).all(|w| w[0].1 < w[1].1));
    }
}
