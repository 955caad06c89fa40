//! Report workbook generation.
//!
//! Produces a minimal single-sheet xlsx: the OOXML container parts plus one
//! worksheet with inline strings, which every spreadsheet application opens
//! without a styles or shared-strings part.

use std::io::{Cursor, Write};

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use super::{Cell, WorkbookError};

const CONTENT_TYPES: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
    r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
    r#"<Default Extension="xml" ContentType="application/xml"/>"#,
    r#"<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
    r#"<Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
    r#"</Types>"#
);

const ROOT_RELS: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>"#,
    r#"</Relationships>"#
);

const WORKBOOK_RELS: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>"#,
    r#"</Relationships>"#
);

const SHEET_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const RELS_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// Serialize one sheet of cells into a complete xlsx container.
pub fn write_workbook(sheet_name: &str, rows: &[Vec<Cell>]) -> Result<Vec<u8>, WorkbookError> {
    let workbook_xml = workbook_part(sheet_name);
    let sheet_xml = sheet_part(rows)?;

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file("[Content_Types].xml", options)?;
    zip.write_all(CONTENT_TYPES.as_bytes())?;
    zip.start_file("_rels/.rels", options)?;
    zip.write_all(ROOT_RELS.as_bytes())?;
    zip.start_file("xl/workbook.xml", options)?;
    zip.write_all(workbook_xml.as_bytes())?;
    zip.start_file("xl/_rels/workbook.xml.rels", options)?;
    zip.write_all(WORKBOOK_RELS.as_bytes())?;
    zip.start_file("xl/worksheets/sheet1.xml", options)?;
    zip.write_all(&sheet_xml)?;

    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

fn workbook_part(sheet_name: &str) -> String {
    let name = quick_xml::escape::escape(sheet_name);
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<workbook xmlns="{ns}" xmlns:r="{rels}">"#,
            r#"<sheets><sheet name="{name}" sheetId="1" r:id="rId1"/></sheets>"#,
            r#"</workbook>"#
        ),
        ns = SHEET_NS,
        rels = RELS_NS,
        name = name,
    )
}

fn sheet_part(rows: &[Vec<Cell>]) -> Result<Vec<u8>, WorkbookError> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;

    let mut worksheet = BytesStart::new("worksheet");
    worksheet.push_attribute(("xmlns", SHEET_NS));
    writer.write_event(Event::Start(worksheet))?;
    writer.write_event(Event::Start(BytesStart::new("sheetData")))?;

    for (row_idx, cells) in rows.iter().enumerate() {
        let mut row = BytesStart::new("row");
        row.push_attribute(("r", (row_idx + 1).to_string().as_str()));
        writer.write_event(Event::Start(row))?;

        for (col_idx, cell) in cells.iter().enumerate() {
            let reference = cell_reference(row_idx, col_idx);
            match cell {
                Cell::Text(text) => {
                    let mut c = BytesStart::new("c");
                    c.push_attribute(("r", reference.as_str()));
                    c.push_attribute(("t", "inlineStr"));
                    writer.write_event(Event::Start(c))?;
                    writer.write_event(Event::Start(BytesStart::new("is")))?;
                    writer.write_event(Event::Start(BytesStart::new("t")))?;
                    writer.write_event(Event::Text(BytesText::new(text)))?;
                    writer.write_event(Event::End(BytesEnd::new("t")))?;
                    writer.write_event(Event::End(BytesEnd::new("is")))?;
                    writer.write_event(Event::End(BytesEnd::new("c")))?;
                }
                Cell::Number(value) => {
                    let mut c = BytesStart::new("c");
                    c.push_attribute(("r", reference.as_str()));
                    writer.write_event(Event::Start(c))?;
                    writer.write_event(Event::Start(BytesStart::new("v")))?;
                    writer.write_event(Event::Text(BytesText::new(&format_number(*value))))?;
                    writer.write_event(Event::End(BytesEnd::new("v")))?;
                    writer.write_event(Event::End(BytesEnd::new("c")))?;
                }
                Cell::Empty => {}
            }
        }

        writer.write_event(Event::End(BytesEnd::new("row")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("sheetData")))?;
    writer.write_event(Event::End(BytesEnd::new("worksheet")))?;
    Ok(writer.into_inner().into_inner())
}

fn cell_reference(row_idx: usize, col_idx: usize) -> String {
    format!("{}{}", column_letters(col_idx), row_idx + 1)
}

fn column_letters(mut col_idx: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (col_idx % 26) as u8);
        if col_idx < 26 {
            break;
        }
        col_idx = col_idx / 26 - 1;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// The native currency never carries fractions, so whole values are written
/// without a decimal tail.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}
