//! Native `.docx` text extraction: paragraphs, table cells, and
//! header/footer paragraphs from the OPC (ZIP) container's WordprocessingML
//! parts, plus best-effort extraction of embedded `word/media/*` images for
//! the image-OCR fallback.

use std::io::Read as _;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use zip::ZipArchive;

use crate::prelude::*;

const WORD_NS_LOCAL_PARAGRAPH: &str = "p";
const WORD_NS_LOCAL_TABLE: &str = "tbl";
const WORD_NS_LOCAL_TABLE_ROW: &str = "tr";
const WORD_NS_LOCAL_TABLE_CELL: &str = "tc";
const WORD_NS_LOCAL_TEXT: &str = "t";

/// Paragraph and table text pulled out of one WordprocessingML part. Body
/// paragraphs each become one line; table rows become one tab-joined line
/// per row (one field per cell), matching how a reader would read the table
/// back as plain text.
fn extract_part_text(xml: &[u8]) -> Result<Vec<String>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut lines = Vec::new();
    // Current paragraph's accumulated run text.
    let mut current = String::new();
    let mut in_text = false;
    // >0 while inside a <w:tbl>; paragraphs in this state belong to a cell,
    // not the body, and are folded into `cell_paragraphs` instead of `lines`.
    let mut table_depth: u32 = 0;
    // One entry per paragraph seen so far in the open cell; joined with "\n"
    // when the cell closes.
    let mut cell_paragraphs: Vec<String> = Vec::new();
    // One entry per cell seen so far in the open row; joined with "\t" when
    // the row closes.
    let mut row_cells: Vec<String> = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let local = local_name(e.name().as_ref());
                match local {
                    WORD_NS_LOCAL_TEXT => in_text = true,
                    WORD_NS_LOCAL_TABLE => table_depth += 1,
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                let local = local_name(e.name().as_ref());
                match local {
                    WORD_NS_LOCAL_TEXT => in_text = false,
                    WORD_NS_LOCAL_PARAGRAPH => {
                        if table_depth > 0 {
                            if !current.is_empty() {
                                cell_paragraphs.push(std::mem::take(&mut current));
                            }
                        } else if !current.is_empty() {
                            lines.push(std::mem::take(&mut current));
                        }
                    }
                    WORD_NS_LOCAL_TABLE_CELL => {
                        if !cell_paragraphs.is_empty() {
                            row_cells.push(cell_paragraphs.join("\n"));
                            cell_paragraphs.clear();
                        } else {
                            row_cells.push(String::new());
                        }
                    }
                    WORD_NS_LOCAL_TABLE_ROW => {
                        if !row_cells.is_empty() {
                            lines.push(row_cells.join("\t"));
                            row_cells.clear();
                        }
                    }
                    WORD_NS_LOCAL_TABLE => {
                        table_depth = table_depth.saturating_sub(1);
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) if in_text => {
                current.push_str(&e.unescape().unwrap_or_default());
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(anyhow!("malformed WordprocessingML: {err}")),
            _ => {}
        }
        buf.clear();
    }
    if !current.is_empty() {
        lines.push(current);
    }
    Ok(lines)
}

fn local_name(qname: &[u8]) -> &str {
    let s = std::str::from_utf8(qname).unwrap_or("");
    s.rsplit(':').next().unwrap_or(s)
}

/// The result of reading a `.docx` file's native text content.
pub struct DocxContent {
    /// Paragraph and table-cell text, document body then headers/footers,
    /// joined with `\n`.
    pub text: String,
    /// Raw bytes of each `word/media/*` entry, in archive order.
    pub media: Vec<(String, Vec<u8>)>,
}

/// Read `path` as an OPC (ZIP) container and pull out
/// `word/document.xml`, any `word/header*.xml`/`word/footer*.xml` parts,
/// and the contents of `word/media/*`.
pub fn read_docx(path: &Path) -> Result<DocxContent> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {path:?} as a DOCX container"))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("{path:?} is not a valid ZIP/OPC container"))?;

    let mut part_names: Vec<String> = (0..archive.len())
        .filter_map(|i| archive.by_index(i).ok().map(|f| f.name().to_owned()))
        .collect();
    part_names.sort();

    let mut lines = Vec::new();
    if part_names.iter().any(|n| n == "word/document.xml") {
        let mut entry = archive.by_name("word/document.xml")?;
        let mut xml = Vec::new();
        entry.read_to_end(&mut xml)?;
        lines.extend(extract_part_text(&xml)?);
    }
    for name in part_names
        .iter()
        .filter(|n| {
            let base = n.rsplit('/').next().unwrap_or(n.as_str());
            (base.starts_with("header") || base.starts_with("footer")) && base.ends_with(".xml")
        })
        .cloned()
        .collect::<Vec<_>>()
    {
        let mut entry = archive.by_name(&name)?;
        let mut xml = Vec::new();
        entry.read_to_end(&mut xml)?;
        lines.extend(extract_part_text(&xml)?);
    }

    let mut media = Vec::new();
    for name in part_names
        .iter()
        .filter(|n| n.starts_with("word/media/"))
        .cloned()
        .collect::<Vec<_>>()
    {
        let mut entry = archive.by_name(&name)?;
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;
        media.push((name, bytes));
    }

    Ok(DocxContent {
        text: lines.join("\n"),
        media,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_paragraph_and_cell_text() {
        let xml = br#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t> World</w:t></w:r></w:p>
    <w:tbl>
      <w:tr><w:tc><w:p><w:r><w:t>Cell A</w:t></w:r></w:p></w:tc></w:tr>
    </w:tbl>
  </w:body>
</w:document>"#;
        let lines = extract_part_text(xml).unwrap();
        assert_eq!(lines, vec!["Hello World".to_owned(), "Cell A".to_owned()]);
    }

    #[test]
    fn skips_empty_paragraphs() {
        let xml = br#"<w:document xmlns:w="ns"><w:body><w:p/><w:p><w:r><w:t>Text</w:t></w:r></w:p></w:body></w:document>"#;
        let lines = extract_part_text(xml).unwrap();
        assert_eq!(lines, vec!["Text".to_owned()]);
    }

    #[test]
    fn joins_row_cells_with_tabs() {
        let xml = br#"<w:document xmlns:w="ns">
  <w:body>
    <w:tbl>
      <w:tr>
        <w:tc><w:p><w:r><w:t>Name</w:t></w:r></w:p></w:tc>
        <w:tc><w:p><w:r><w:t>Qty</w:t></w:r></w:p></w:tc>
      </w:tr>
      <w:tr>
        <w:tc><w:p><w:r><w:t>Widget</w:t></w:r></w:p></w:tc>
        <w:tc><w:p><w:r><w:t>12</w:t></w:r></w:p></w:tc>
      </w:tr>
    </w:tbl>
  </w:body>
</w:document>"#;
        let lines = extract_part_text(xml).unwrap();
        assert_eq!(lines, vec!["Name\tQty".to_owned(), "Widget\t12".to_owned()]);
    }
}
