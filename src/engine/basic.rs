//! Built-in conversion engine for text-like inputs.
//!
//! Handles plain text, markdown, and CSV natively so the server runs
//! end-to-end without external models. Scanned documents, PDFs, and
//! office formats are the domain of a full engine plugged in behind
//! [`EngineFactory`](super::EngineFactory).

use std::fs;
use std::path::Path;
use std::sync::Arc;

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};

use super::document::{DocItem, EngineDocument, TableItem};
use super::options::PipelineOptions;
use super::{ConversionEngine, ConversionOutput, EngineError, EngineFactory, EngineResult};

/// Factory for the built-in engine
#[derive(Debug, Default)]
pub struct BasicEngineFactory;

impl EngineFactory for BasicEngineFactory {
    fn create(&self, options: &PipelineOptions) -> EngineResult<Arc<dyn ConversionEngine>> {
        Ok(Arc::new(BasicEngine {
            options: options.clone(),
        }))
    }
}

/// Built-in engine instance
pub struct BasicEngine {
    #[allow(dead_code)]
    options: PipelineOptions,
}

impl ConversionEngine for BasicEngine {
    fn convert(&self, input: &Path) -> EngineResult<ConversionOutput> {
        let extension = input
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        let name = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document")
            .to_string();

        let document = match extension.as_str() {
            "txt" | "text" => {
                let content = fs::read_to_string(input)?;
                parse_plain_text(&name, &content)
            }
            "md" | "markdown" => {
                let content = fs::read_to_string(input)?;
                parse_markdown(&name, &content)
            }
            "csv" => parse_csv(&name, input)?,
            other => return Err(EngineError::UnsupportedFormat(other.to_string())),
        };

        Ok(ConversionOutput::success(document))
    }
}

/// Plain text: paragraphs separated by blank lines
fn parse_plain_text(name: &str, content: &str) -> EngineDocument {
    let mut doc = EngineDocument::new(name);
    for block in content.split("\n\n") {
        let text = block.split_whitespace().collect::<Vec<_>>().join(" ");
        if !text.is_empty() {
            doc.items.push(DocItem::Paragraph {
                text,
                page: Some(1),
            });
        }
    }
    doc
}

/// Markdown via pulldown-cmark: headings, paragraphs, lists, code, tables
fn parse_markdown(name: &str, content: &str) -> EngineDocument {
    let mut doc = EngineDocument::new(name);

    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    let parser = Parser::new_ext(content, options);

    let mut text_buf = String::new();
    let mut heading_level: Option<u8> = None;
    let mut in_item = false;
    let mut in_code = false;
    let mut table_grid: Vec<Vec<String>> = Vec::new();
    let mut table_row: Vec<String> = Vec::new();
    let mut in_table = false;

    for event in parser {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                heading_level = Some(level as u8);
                text_buf.clear();
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some(level) = heading_level.take() {
                    doc.items.push(DocItem::Heading {
                        level,
                        text: std::mem::take(&mut text_buf),
                        page: Some(1),
                    });
                }
            }
            Event::Start(Tag::Paragraph) => {
                if !in_item && !in_table {
                    text_buf.clear();
                }
            }
            Event::End(TagEnd::Paragraph) => {
                if !in_item && !in_table && !text_buf.trim().is_empty() {
                    doc.items.push(DocItem::Paragraph {
                        text: std::mem::take(&mut text_buf),
                        page: Some(1),
                    });
                }
            }
            Event::Start(Tag::Item) => {
                in_item = true;
                text_buf.clear();
            }
            Event::End(TagEnd::Item) => {
                in_item = false;
                if !text_buf.trim().is_empty() {
                    doc.items.push(DocItem::ListItem {
                        text: std::mem::take(&mut text_buf),
                        page: Some(1),
                    });
                }
            }
            Event::Start(Tag::CodeBlock(_)) => {
                in_code = true;
                text_buf.clear();
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code = false;
                doc.items.push(DocItem::Code {
                    text: std::mem::take(&mut text_buf).trim_end().to_string(),
                    page: Some(1),
                });
            }
            Event::Start(Tag::Table(_)) => {
                in_table = true;
                table_grid.clear();
            }
            Event::End(TagEnd::Table) => {
                in_table = false;
                doc.tables.push(TableItem {
                    grid: std::mem::take(&mut table_grid),
                    ..Default::default()
                });
                doc.items.push(DocItem::Table {
                    index: doc.tables.len() - 1,
                });
            }
            Event::Start(Tag::TableHead) | Event::Start(Tag::TableRow) => {
                table_row.clear();
            }
            Event::End(TagEnd::TableHead) | Event::End(TagEnd::TableRow) => {
                table_grid.push(std::mem::take(&mut table_row));
            }
            Event::Start(Tag::TableCell) => {
                text_buf.clear();
            }
            Event::End(TagEnd::TableCell) => {
                table_row.push(std::mem::take(&mut text_buf));
            }
            Event::Text(text) | Event::Code(text) => {
                text_buf.push_str(&text);
            }
            Event::SoftBreak | Event::HardBreak => {
                if in_code {
                    text_buf.push('\n');
                } else {
                    text_buf.push(' ');
                }
            }
            _ => {}
        }
    }

    doc
}

/// CSV: the whole file becomes one table
fn parse_csv(name: &str, input: &Path) -> EngineResult<EngineDocument> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(input)
        .map_err(|e| EngineError::Pipeline(format!("CSV read failed: {}", e)))?;

    let mut grid = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| EngineError::Pipeline(format!("CSV parse failed: {}", e)))?;
        grid.push(record.iter().map(|cell| cell.to_string()).collect());
    }

    let mut doc = EngineDocument::new(name);
    doc.tables.push(TableItem {
        grid,
        ..Default::default()
    });
    doc.items.push(DocItem::Table { index: 0 });
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn convert_file(filename: &str, content: &str) -> ConversionOutput {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(filename);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();

        let engine = BasicEngineFactory
            .create(&PipelineOptions::default())
            .unwrap();
        engine.convert(&path).unwrap()
    }

    #[test]
    fn test_plain_text_paragraphs() {
        let result = convert_file("notes.txt", "First paragraph.\n\nSecond\nparagraph.");
        assert_eq!(result.document.items.len(), 2);
        let md = result.document.export_markdown();
        assert!(md.contains("Second paragraph."));
    }

    #[test]
    fn test_markdown_structure() {
        let result = convert_file(
            "doc.md",
            "# Title\n\nIntro text.\n\n- one\n- two\n\n```\nlet x = 1;\n```\n",
        );
        let items = &result.document.items;
        assert!(matches!(items[0], DocItem::Heading { level: 1, .. }));
        assert!(matches!(items[1], DocItem::Paragraph { .. }));
        assert!(matches!(items[2], DocItem::ListItem { .. }));
        assert!(matches!(items[4], DocItem::Code { .. }));
    }

    #[test]
    fn test_markdown_table() {
        let result = convert_file("t.md", "| a | b |\n|---|---|\n| 1 | 2 |\n");
        assert_eq!(result.document.tables.len(), 1);
        let grid = &result.document.tables[0].grid;
        assert_eq!(grid[0], vec!["a", "b"]);
        assert_eq!(grid[1], vec!["1", "2"]);
    }

    #[test]
    fn test_csv_becomes_table() {
        let result = convert_file("data.csv", "name,count\nwidget,3\n");
        assert_eq!(result.document.tables.len(), 1);
        assert_eq!(result.document.tables[0].grid.len(), 2);
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.tiff");
        fs::write(&path, b"binary").unwrap();

        let engine = BasicEngineFactory
            .create(&PipelineOptions::default())
            .unwrap();
        let err = engine.convert(&path).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedFormat(_)));
    }
}
