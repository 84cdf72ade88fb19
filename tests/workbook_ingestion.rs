#![cfg(feature = "excel_test_writer")]

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use ingest_pool::ingestion::run_parse;
use ingest_pool::types::{ParseOptions, ParseRequest};
use ingest_pool::{FileConfig, IngestionError, Pool, PoolOptions};

fn tmp_file(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("ingest-pool-{name}-{nanos}.xlsx"))
}

/// Two sheets: `People` (header row, a blank cell, a blank row) and `Numbers` (no header row).
fn people_workbook() -> Vec<u8> {
    use rust_xlsxwriter::Workbook;

    let mut wb = Workbook::new();

    let ws1 = wb.add_worksheet();
    ws1.set_name("People").unwrap();
    ws1.write_string(0, 0, "id").unwrap();
    ws1.write_string(0, 1, "name").unwrap();
    ws1.write_string(0, 2, "score").unwrap();
    ws1.write_string(0, 3, "active").unwrap();
    ws1.write_number(1, 0, 1).unwrap();
    ws1.write_string(1, 1, "Ada").unwrap();
    ws1.write_number(1, 2, 98.5).unwrap();
    ws1.write_boolean(1, 3, true).unwrap();
    // row 2 left empty
    ws1.write_number(3, 0, 2).unwrap();
    ws1.write_number(3, 2, 87.25).unwrap();
    ws1.write_boolean(3, 3, false).unwrap();

    let ws2 = wb.add_worksheet();
    ws2.set_name("Numbers").unwrap();
    ws2.write_number(0, 0, 1).unwrap();
    ws2.write_number(0, 1, 2).unwrap();
    ws2.write_number(1, 0, 3).unwrap();
    ws2.write_number(1, 1, 4).unwrap();

    wb.save_to_buffer().unwrap()
}

fn parse(options: ParseOptions) -> Result<ingest_pool::types::ParseResult, IngestionError> {
    let request = ParseRequest::new("people.xlsx", people_workbook(), options);
    run_parse(&request, &mut |_| {})
}

#[test]
fn first_sheet_is_used_by_default() {
    let result = parse(ParseOptions::default()).unwrap();
    assert_eq!(result.headers, vec!["id", "name", "score", "active"]);
    assert_eq!(
        result.rows,
        vec![vec!["1", "Ada", "98.5", "true"], vec!["2", "", "87.25", "false"]]
    );
    assert_eq!(
        result.metadata.sheet_names,
        Some(vec!["People".to_string(), "Numbers".to_string()])
    );
    assert_eq!(result.metadata.encoding, None);
    assert_eq!(result.metadata.total_rows, 2);
    assert_eq!(result.metadata.total_columns, 4);
}

#[test]
fn named_sheet_without_header_row_gets_generated_headers() {
    let result = parse(ParseOptions {
        sheet_name: Some("Numbers".to_string()),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(result.headers, vec!["Column 1", "Column 2"]);
    assert_eq!(result.rows, vec![vec!["1", "2"], vec!["3", "4"]]);
    assert!(result.warnings.iter().any(|w| w.contains("generated column headers")));
}

#[test]
fn missing_sheet_lists_available_sheets() {
    let err = parse(ParseOptions {
        sheet_name: Some("Nope".to_string()),
        ..Default::default()
    })
    .unwrap_err();
    match err {
        IngestionError::SheetNotFound { requested, available } => {
            assert_eq!(requested, "Nope");
            assert_eq!(available, vec!["People", "Numbers"]);
        }
        other => panic!("expected missing sheet, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn workbook_path_through_the_pool() {
    let path = tmp_file("people");
    std::fs::write(&path, people_workbook()).unwrap();

    let pool = Pool::new(PoolOptions {
        max_units: 1,
        ..Default::default()
    });
    let result = pool.process_file(FileConfig::new(path.clone())).await.unwrap();
    assert_eq!(result.row_count(), 2);
    assert_eq!(result.get(0, "name"), Some("Ada"));

    let err = pool
        .process_file(FileConfig::new(path.clone()).with_options(ParseOptions {
            sheet_name: Some("Nope".to_string()),
            ..Default::default()
        }))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("available sheets: People, Numbers"));

    pool.dispose();
    let _ = std::fs::remove_file(&path);
}
