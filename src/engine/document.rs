//! The engine's document result model and its export formats.
//!
//! Engines produce an ordered item stream plus picture and table
//! payloads; the materializer walks this model to emit markdown, HTML,
//! JSON, plain text, doctags, and a document-token stream.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One content item in reading order. Tables and pictures are referenced
/// by index into the document's payload lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocItem {
    Heading {
        level: u8,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        page: Option<usize>,
    },
    Paragraph {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        page: Option<usize>,
    },
    ListItem {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        page: Option<usize>,
    },
    Code {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        page: Option<usize>,
    },
    Table {
        index: usize,
    },
    Picture {
        index: usize,
    },
}

/// An embedded picture with optional rendered payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PictureItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Rendered PNG bytes; not part of the JSON export
    #[serde(skip)]
    pub data: Option<Vec<u8>>,
}

/// An extracted table with its cell grid and optional rendered payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub grid: Vec<Vec<String>>,
    /// Rendered PNG bytes; not part of the JSON export
    #[serde(skip)]
    pub image: Option<Vec<u8>>,
}

/// Structured document produced by a conversion engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineDocument {
    pub name: String,
    pub items: Vec<DocItem>,
    pub pictures: Vec<PictureItem>,
    pub tables: Vec<TableItem>,
    pub page_count: usize,
}

impl EngineDocument {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            page_count: 1,
            ..Default::default()
        }
    }

    /// Export to markdown
    pub fn export_markdown(&self) -> String {
        let mut out = String::new();
        for item in &self.items {
            match item {
                DocItem::Heading { level, text, .. } => {
                    let hashes = "#".repeat((*level).clamp(1, 6) as usize);
                    out.push_str(&format!("{} {}\n\n", hashes, text));
                }
                DocItem::Paragraph { text, .. } => {
                    out.push_str(text);
                    out.push_str("\n\n");
                }
                DocItem::ListItem { text, .. } => {
                    out.push_str(&format!("- {}\n", text));
                }
                DocItem::Code { text, .. } => {
                    out.push_str(&format!("```\n{}\n```\n\n", text));
                }
                DocItem::Table { index } => {
                    if let Some(table) = self.tables.get(*index) {
                        out.push_str(&table_to_markdown(table));
                        out.push('\n');
                    }
                }
                DocItem::Picture { index } => {
                    if let Some(picture) = self.pictures.get(*index) {
                        out.push_str("<!-- image -->\n\n");
                        if let Some(caption) = &picture.caption {
                            out.push_str(&format!("*{}*\n\n", caption));
                        }
                    }
                }
            }
        }
        out.trim_end().to_string()
    }

    /// Export to a minimal standalone HTML document
    pub fn export_html(&self) -> String {
        let mut body = String::new();
        let mut in_list = false;
        for item in &self.items {
            if in_list && !matches!(item, DocItem::ListItem { .. }) {
                body.push_str("</ul>\n");
                in_list = false;
            }
            match item {
                DocItem::Heading { level, text, .. } => {
                    let level = (*level).clamp(1, 6);
                    body.push_str(&format!("<h{l}>{}</h{l}>\n", escape_html(text), l = level));
                }
                DocItem::Paragraph { text, .. } => {
                    body.push_str(&format!("<p>{}</p>\n", escape_html(text)));
                }
                DocItem::ListItem { text, .. } => {
                    if !in_list {
                        body.push_str("<ul>\n");
                        in_list = true;
                    }
                    body.push_str(&format!("<li>{}</li>\n", escape_html(text)));
                }
                DocItem::Code { text, .. } => {
                    body.push_str(&format!("<pre><code>{}</code></pre>\n", escape_html(text)));
                }
                DocItem::Table { index } => {
                    if let Some(table) = self.tables.get(*index) {
                        body.push_str(&table_to_html(table));
                    }
                }
                DocItem::Picture { index } => {
                    if let Some(picture) = self.pictures.get(*index) {
                        let caption = picture.caption.as_deref().unwrap_or("image");
                        body.push_str(&format!("<figure><figcaption>{}</figcaption></figure>\n", escape_html(caption)));
                    }
                }
            }
        }
        if in_list {
            body.push_str("</ul>\n");
        }
        format!(
            "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{}</title></head>\n<body>\n{}</body>\n</html>\n",
            escape_html(&self.name),
            body
        )
    }

    /// Export to plain text
    pub fn export_text(&self) -> String {
        let mut out = String::new();
        for item in &self.items {
            match item {
                DocItem::Heading { text, .. }
                | DocItem::Paragraph { text, .. }
                | DocItem::Code { text, .. } => {
                    out.push_str(text);
                    out.push_str("\n\n");
                }
                DocItem::ListItem { text, .. } => {
                    out.push_str(text);
                    out.push('\n');
                }
                DocItem::Table { index } => {
                    if let Some(table) = self.tables.get(*index) {
                        for row in &table.grid {
                            out.push_str(&row.join("\t"));
                            out.push('\n');
                        }
                        out.push('\n');
                    }
                }
                DocItem::Picture { .. } => {}
            }
        }
        out.trim_end().to_string()
    }

    /// Export to the tagged markup format
    pub fn export_doctags(&self) -> String {
        let mut out = String::from("<doctag>\n");
        for item in &self.items {
            match item {
                DocItem::Heading { level, text, .. } => {
                    out.push_str(&format!(
                        "<section_header_level_{}>{}</section_header_level_{}>\n",
                        level, text, level
                    ));
                }
                DocItem::Paragraph { text, .. } => {
                    out.push_str(&format!("<text>{}</text>\n", text));
                }
                DocItem::ListItem { text, .. } => {
                    out.push_str(&format!("<list_item>{}</list_item>\n", text));
                }
                DocItem::Code { text, .. } => {
                    out.push_str(&format!("<code>{}</code>\n", text));
                }
                DocItem::Table { index } => {
                    if let Some(table) = self.tables.get(*index) {
                        out.push_str("<otsl>\n");
                        for row in &table.grid {
                            for cell in row {
                                out.push_str(&format!("<fcel>{}", cell));
                            }
                            out.push_str("<nl>\n");
                        }
                        out.push_str("</otsl>\n");
                    }
                }
                DocItem::Picture { .. } => {
                    out.push_str("<picture/>\n");
                }
            }
        }
        out.push_str("</doctag>\n");
        out
    }

    /// Export as a flat document-token stream
    pub fn export_tokens(&self) -> Vec<Value> {
        let mut tokens = Vec::new();
        for item in &self.items {
            match item {
                DocItem::Heading { level, text, page } => {
                    tokens.push(json!({"token": "heading", "level": level, "text": text, "page": page}));
                }
                DocItem::Paragraph { text, page } => {
                    tokens.push(json!({"token": "text", "text": text, "page": page}));
                }
                DocItem::ListItem { text, page } => {
                    tokens.push(json!({"token": "list_item", "text": text, "page": page}));
                }
                DocItem::Code { text, page } => {
                    tokens.push(json!({"token": "code", "text": text, "page": page}));
                }
                DocItem::Table { index } => {
                    if let Some(table) = self.tables.get(*index) {
                        tokens.push(json!({
                            "token": "table",
                            "rows": table.grid.len(),
                            "cols": table.grid.first().map(|r| r.len()).unwrap_or(0),
                            "caption": table.caption,
                        }));
                    }
                }
                DocItem::Picture { index } => {
                    if let Some(picture) = self.pictures.get(*index) {
                        tokens.push(json!({
                            "token": "picture",
                            "caption": picture.caption,
                            "label": picture.label,
                        }));
                    }
                }
            }
        }
        tokens
    }
}

fn table_to_markdown(table: &TableItem) -> String {
    let mut out = String::new();
    if let Some(caption) = &table.caption {
        out.push_str(&format!("**{}**\n\n", caption));
    }
    let mut rows = table.grid.iter();
    if let Some(header) = rows.next() {
        out.push_str(&format!("| {} |\n", header.join(" | ")));
        out.push_str(&format!("|{}\n", "---|".repeat(header.len())));
        for row in rows {
            out.push_str(&format!("| {} |\n", row.join(" | ")));
        }
    }
    out
}

fn table_to_html(table: &TableItem) -> String {
    let mut out = String::from("<table>\n");
    for (i, row) in table.grid.iter().enumerate() {
        let tag = if i == 0 { "th" } else { "td" };
        out.push_str("<tr>");
        for cell in row {
            out.push_str(&format!("<{t}>{}</{t}>", escape_html(cell), t = tag));
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</table>\n");
    out
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> EngineDocument {
        let mut doc = EngineDocument::new("report");
        doc.items = vec![
            DocItem::Heading { level: 1, text: "Quarterly Report".into(), page: Some(1) },
            DocItem::Paragraph { text: "Revenue grew steadily.".into(), page: Some(1) },
            DocItem::ListItem { text: "North region".into(), page: Some(1) },
            DocItem::ListItem { text: "South region".into(), page: Some(1) },
            DocItem::Table { index: 0 },
        ];
        doc.tables = vec![TableItem {
            caption: Some("Revenue by region".into()),
            grid: vec![
                vec!["Region".into(), "Revenue".into()],
                vec!["North".into(), "120".into()],
            ],
            ..Default::default()
        }];
        doc
    }

    #[test]
    fn test_markdown_export() {
        let md = sample_document().export_markdown();
        assert!(md.starts_with("# Quarterly Report"));
        assert!(md.contains("- North region"));
        assert!(md.contains("| Region | Revenue |"));
        assert!(md.contains("| North | 120 |"));
    }

    #[test]
    fn test_html_export_groups_lists() {
        let html = sample_document().export_html();
        assert!(html.contains("<h1>Quarterly Report</h1>"));
        assert_eq!(html.matches("<ul>").count(), 1);
        assert_eq!(html.matches("</ul>").count(), 1);
        assert!(html.contains("<th>Region</th>"));
    }

    #[test]
    fn test_text_export_has_no_markup() {
        let text = sample_document().export_text();
        assert!(text.contains("Quarterly Report"));
        assert!(!text.contains('#'));
        assert!(!text.contains('|'));
    }

    #[test]
    fn test_doctags_export() {
        let tags = sample_document().export_doctags();
        assert!(tags.starts_with("<doctag>"));
        assert!(tags.contains("<section_header_level_1>Quarterly Report</section_header_level_1>"));
        assert!(tags.contains("<fcel>Region<fcel>Revenue<nl>"));
    }

    #[test]
    fn test_token_stream() {
        let tokens = sample_document().export_tokens();
        assert_eq!(tokens.len(), 5);
        assert_eq!(tokens[0]["token"], "heading");
        assert_eq!(tokens[4]["token"], "table");
        assert_eq!(tokens[4]["rows"], 2);
    }
}
