//! Ingest of uploaded xlsx row lists.
//!
//! Reads the first worksheet, resolves shared strings, auto-detects the
//! header row among the first rows by known column-name variants, and
//! normalizes every (article, brand) pair below it.

use std::io::{Cursor, Read};

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::debug;
use zip::ZipArchive;

use super::WorkbookError;
use crate::jobs::types::InputRow;

/// Header cells recognized as the article column.
const ARTICLE_HEADERS: &[&str] = &[
    "article",
    "артикул",
    "арт",
    "sku",
    "номенклатура",
    "код товара",
];

/// Header cells recognized as the brand column.
const BRAND_HEADERS: &[&str] = &[
    "brand",
    "бренд",
    "производитель",
    "марка",
    "manufacturer",
    "торговая марка",
];

/// How many leading rows are searched for the header.
const HEADER_SCAN_ROWS: usize = 10;

/// Parse an uploaded workbook into normalized input rows, truncated silently
/// to `max_rows`.
pub fn read_input_rows(bytes: &[u8], max_rows: usize) -> Result<Vec<InputRow>, WorkbookError> {
    // Header scan window plus the cap bounds how much sheet is ever parsed.
    let parsed = parse_first_sheet(bytes, HEADER_SCAN_ROWS + max_rows + 1)?;

    let Some((header_idx, article_col, brand_col)) = detect_header(&parsed) else {
        return Err(WorkbookError::MissingColumns);
    };

    let rows: Vec<InputRow> = parsed[header_idx + 1..]
        .iter()
        .filter_map(|cells| {
            let article = cells.get(article_col).map(String::as_str).unwrap_or("");
            let brand = cells.get(brand_col).map(String::as_str).unwrap_or("");
            InputRow::from_cells(article, brand)
        })
        .take(max_rows)
        .collect();

    if rows.is_empty() {
        return Err(WorkbookError::NoRows);
    }
    debug!(rows = rows.len(), "parsed workbook input rows");
    Ok(rows)
}

/// Locate the header row and the two column indexes.
fn detect_header(rows: &[Vec<String>]) -> Option<(usize, usize, usize)> {
    for (idx, cells) in rows.iter().take(HEADER_SCAN_ROWS).enumerate() {
        let article_col = cells
            .iter()
            .position(|c| matches_header(c, ARTICLE_HEADERS));
        let brand_col = cells.iter().position(|c| matches_header(c, BRAND_HEADERS));
        if let (Some(article_col), Some(brand_col)) = (article_col, brand_col) {
            return Some((idx, article_col, brand_col));
        }
    }
    None
}

fn matches_header(cell: &str, variants: &[&str]) -> bool {
    let key = cell
        .trim()
        .trim_end_matches(|c| c == ':' || c == '.')
        .trim()
        .to_lowercase();
    variants.contains(&key.as_str())
}

/// Extract the first worksheet as rows of cell texts, shared strings
/// resolved, bounded to `row_limit` rows.
fn parse_first_sheet(bytes: &[u8], row_limit: usize) -> Result<Vec<Vec<String>>, WorkbookError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let shared = read_shared_strings(&mut archive)?;

    let sheet_name = first_sheet_name(&archive).ok_or(WorkbookError::MissingSheet)?;
    let mut sheet_xml = String::new();
    archive
        .by_name(&sheet_name)?
        .read_to_string(&mut sheet_xml)?;

    parse_sheet_xml(&sheet_xml, &shared, row_limit)
}

fn first_sheet_name<R: Read + std::io::Seek>(archive: &ZipArchive<R>) -> Option<String> {
    if archive.index_for_name("xl/worksheets/sheet1.xml").is_some() {
        return Some("xl/worksheets/sheet1.xml".to_string());
    }
    let mut names: Vec<&str> = archive
        .file_names()
        .filter(|name| name.starts_with("xl/worksheets/") && name.ends_with(".xml"))
        .collect();
    names.sort_unstable();
    names.first().map(|name| name.to_string())
}

/// Shared strings table, one concatenated string per `<si>` entry.
fn read_shared_strings<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<Vec<String>, WorkbookError> {
    let mut xml = String::new();
    match archive.by_name("xl/sharedStrings.xml") {
        Ok(mut file) => file.read_to_string(&mut xml)?,
        Err(zip::result::ZipError::FileNotFound) => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut reader = Reader::from_str(&xml);
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_text {
                    current.push_str(&e.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => strings.push(current.clone()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => return Err(err.into()),
            _ => {}
        }
    }

    Ok(strings)
}

fn parse_sheet_xml(
    xml: &str,
    shared: &[String],
    row_limit: usize,
) -> Result<Vec<Vec<String>>, WorkbookError> {
    let mut reader = Reader::from_str(xml);
    let mut rows: Vec<Vec<String>> = Vec::new();

    let mut current_row: Vec<String> = Vec::new();
    let mut cell_col: usize = 0;
    let mut cell_type = CellType::Number;
    let mut in_value = false;
    let mut value = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"row" => current_row.clear(),
                b"c" => {
                    cell_type = CellType::Number;
                    cell_col = current_row.len();
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"r" => {
                                let reference = String::from_utf8_lossy(&attr.value).to_string();
                                cell_col = column_index(&reference).unwrap_or(cell_col);
                            }
                            b"t" => {
                                cell_type = match attr.value.as_ref() {
                                    b"s" => CellType::Shared,
                                    b"inlineStr" => CellType::Inline,
                                    _ => CellType::Number,
                                };
                            }
                            _ => {}
                        }
                    }
                }
                b"v" | b"t" => {
                    in_value = true;
                    value.clear();
                }
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_value {
                    value.push_str(&e.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    let text = match cell_type {
                        CellType::Shared => value
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared.get(i).cloned())
                            .unwrap_or_default(),
                        _ => value.clone(),
                    };
                    set_cell(&mut current_row, cell_col, text);
                    value.clear();
                }
                b"row" => {
                    rows.push(std::mem::take(&mut current_row));
                    if rows.len() >= row_limit {
                        break;
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => return Err(err.into()),
            _ => {}
        }
    }

    Ok(rows)
}

fn set_cell(row: &mut Vec<String>, col: usize, text: String) {
    if row.len() <= col {
        row.resize(col + 1, String::new());
    }
    row[col] = text;
}

#[derive(Clone, Copy)]
enum CellType {
    Number,
    Shared,
    Inline,
}

/// Column index from an `A1`-style reference, zero-based.
fn column_index(reference: &str) -> Option<usize> {
    let letters: String = reference.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    if letters.is_empty() {
        return None;
    }
    let mut index = 0usize;
    for c in letters.chars() {
        index = index * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    Some(index - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::Cell;
    use crate::workbook::writer::write_workbook;

    fn workbook(rows: Vec<Vec<Cell>>) -> Vec<u8> {
        write_workbook("Данные", &rows).unwrap()
    }

    #[test]
    fn reads_rows_below_detected_header() {
        let bytes = workbook(vec![
            vec![Cell::text("Выгрузка поставщика")],
            vec![Cell::text("Артикул"), Cell::text("Бренд")],
            vec![Cell::text("ab-12"), Cell::text("Acme")],
            vec![Cell::text(""), Cell::text("NoArticle")],
            vec![Cell::text("cd-34"), Cell::text("Brandco")],
        ]);
        let rows = read_input_rows(&bytes, 500).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].article, "AB12");
        assert_eq!(rows[0].brand, "ACME");
        assert_eq!(rows[1].article, "CD34");
    }

    #[test]
    fn accepts_header_variants_in_any_column_order() {
        let bytes = workbook(vec![
            vec![Cell::text("Производитель"), Cell::text("SKU:")],
            vec![Cell::text("Acme"), Cell::text("x-1")],
        ]);
        let rows = read_input_rows(&bytes, 500).unwrap();
        assert_eq!(rows[0].article, "X1");
        assert_eq!(rows[0].brand, "ACME");
    }

    #[test]
    fn truncates_to_the_row_cap_silently() {
        let mut grid = vec![vec![Cell::text("Article"), Cell::text("Brand")]];
        for i in 0..10 {
            grid.push(vec![Cell::text(format!("a-{i}")), Cell::text("B")]);
        }
        let rows = read_input_rows(&workbook(grid), 3).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].article, "A2");
    }

    #[test]
    fn rejects_workbooks_without_the_columns() {
        let bytes = workbook(vec![
            vec![Cell::text("Товар"), Cell::text("Цена")],
            vec![Cell::text("x"), Cell::Number(5.0)],
        ]);
        assert!(matches!(
            read_input_rows(&bytes, 500),
            Err(WorkbookError::MissingColumns)
        ));
    }

    #[test]
    fn rejects_workbooks_with_no_usable_rows() {
        let bytes = workbook(vec![vec![Cell::text("Артикул"), Cell::text("Бренд")]]);
        assert!(matches!(
            read_input_rows(&bytes, 500),
            Err(WorkbookError::NoRows)
        ));
    }

    #[test]
    fn rejects_non_workbook_payloads() {
        assert!(matches!(
            read_input_rows(b"PK not really a zip", 500),
            Err(WorkbookError::Archive(_))
        ));
    }

    #[test]
    fn maps_a1_references_to_column_indexes() {
        assert_eq!(column_index("A1"), Some(0));
        assert_eq!(column_index("C7"), Some(2));
        assert_eq!(column_index("AA3"), Some(26));
        assert_eq!(column_index("7"), None);
    }
}
