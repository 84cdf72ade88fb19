#![cfg(feature = "excel")]

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};

use crate::error::{IngestionError, IngestionResult};
use crate::types::{Cell, RawGrid};

/// Load a workbook (`.xlsx`, `.xls`, ...) from memory and convert one sheet into a grid.
///
/// Behavior:
/// - Picks `sheet_name` if provided; otherwise uses the first sheet in the workbook
/// - Fails with [`IngestionError::SheetNotFound`] (listing every sheet) if the sheet is missing
/// - Keeps blank cells in place as [`Cell::Null`]; nothing is shifted left or collapsed
/// - Row/column counts come from the sheet's used range
pub fn parse_workbook(bytes: &[u8], sheet_name: Option<&str>) -> IngestionResult<RawGrid> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;

    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    let target = match sheet_name {
        Some(name) => {
            if !sheet_names.iter().any(|s| s == name) {
                return Err(IngestionError::SheetNotFound {
                    requested: name.to_string(),
                    available: sheet_names,
                });
            }
            name.to_string()
        }
        None => sheet_names
            .first()
            .cloned()
            .ok_or_else(|| IngestionError::UnsupportedFormat {
                message: "workbook has no sheets".to_string(),
            })?,
    };

    let range = workbook.worksheet_range(&target)?;
    let (total_rows, total_columns) = range.get_size();
    let rows = range
        .rows()
        .map(|row| row.iter().map(convert_cell).collect())
        .collect();

    Ok(RawGrid {
        rows,
        total_rows,
        total_columns,
        encoding: None,
        sheet_names: Some(sheet_names),
    })
}

fn convert_cell(c: &Data) -> Cell {
    match c {
        Data::Empty => Cell::Null,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Int(i) => Cell::Int(*i),
        Data::Float(f) => Cell::Float(*f),
        Data::Bool(b) => Cell::Bool(*b),
        Data::DateTime(dt) => Cell::Text(dt.to_string()),
        Data::DateTimeIso(s) => Cell::Text(s.clone()),
        Data::DurationIso(s) => Cell::Text(s.clone()),
        Data::Error(e) => Cell::Text(format!("{e:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::parse_workbook;

    #[test]
    fn garbage_bytes_are_a_workbook_error() {
        let err = parse_workbook(b"definitely not a zip archive", None).unwrap_err();
        assert!(err.to_string().contains("excel error"));
    }
}
