//! Token-bounded document chunking for RAG applications.
//!
//! Walks the engine document in reading order, keeps the active heading
//! trail as context, splits oversized passages at sentence boundaries,
//! and optionally merges small sibling passages that share the same
//! headings.

use unicode_segmentation::UnicodeSegmentation;

use crate::engine::{DocItem, EngineDocument};

use super::job::DocChunk;

/// Chunker over a converted document
pub struct DocumentChunker {
    max_tokens: usize,
    merge_peers: bool,
}

/// Intermediate passage before the size pass
struct Passage {
    text: String,
    headings: Vec<String>,
    page: Option<usize>,
}

impl DocumentChunker {
    pub fn new(max_tokens: usize, merge_peers: bool) -> Self {
        Self {
            max_tokens: max_tokens.max(1),
            merge_peers,
        }
    }

    /// Chunk a document into token-bounded pieces.
    pub fn chunk(&self, doc: &EngineDocument) -> Vec<DocChunk> {
        let passages = self.collect_passages(doc);
        let bounded = self.split_oversized(passages);
        let merged = if self.merge_peers {
            self.merge_small_peers(bounded)
        } else {
            bounded
        };

        merged
            .into_iter()
            .enumerate()
            .map(|(i, p)| DocChunk {
                id: i + 1,
                text: p.text,
                headings: p.headings,
                page: p.page,
            })
            .collect()
    }

    /// One passage per content item, tagged with the heading trail that
    /// is active at that point in the document.
    fn collect_passages(&self, doc: &EngineDocument) -> Vec<Passage> {
        let mut passages = Vec::new();
        let mut heading_trail: Vec<(u8, String)> = Vec::new();

        for item in &doc.items {
            match item {
                DocItem::Heading { level, text, .. } => {
                    heading_trail.retain(|(l, _)| l < level);
                    heading_trail.push((*level, text.clone()));
                }
                DocItem::Paragraph { text, page } | DocItem::ListItem { text, page } => {
                    if !text.trim().is_empty() {
                        passages.push(Passage {
                            text: text.clone(),
                            headings: trail_texts(&heading_trail),
                            page: *page,
                        });
                    }
                }
                DocItem::Code { text, page } => {
                    passages.push(Passage {
                        text: text.clone(),
                        headings: trail_texts(&heading_trail),
                        page: *page,
                    });
                }
                DocItem::Table { index } => {
                    if let Some(table) = doc.tables.get(*index) {
                        let text = table
                            .grid
                            .iter()
                            .map(|row| row.join(", "))
                            .collect::<Vec<_>>()
                            .join("\n");
                        if !text.is_empty() {
                            passages.push(Passage {
                                text,
                                headings: trail_texts(&heading_trail),
                                page: None,
                            });
                        }
                    }
                }
                DocItem::Picture { .. } => {}
            }
        }

        passages
    }

    /// Split passages above the token budget at sentence boundaries.
    fn split_oversized(&self, passages: Vec<Passage>) -> Vec<Passage> {
        let mut out = Vec::new();

        for passage in passages {
            if estimate_tokens(&passage.text) <= self.max_tokens {
                out.push(passage);
                continue;
            }

            let mut current = String::new();
            for sentence in passage.text.split_sentence_bounds() {
                let candidate_tokens = estimate_tokens(&current) + estimate_tokens(sentence);
                if !current.is_empty() && candidate_tokens > self.max_tokens {
                    out.push(Passage {
                        text: current.trim().to_string(),
                        headings: passage.headings.clone(),
                        page: passage.page,
                    });
                    current = String::new();
                }
                current.push_str(sentence);
            }
            if !current.trim().is_empty() {
                out.push(Passage {
                    text: current.trim().to_string(),
                    headings: passage.headings.clone(),
                    page: passage.page,
                });
            }
        }

        out
    }

    /// Merge consecutive passages that share a heading trail while the
    /// combined size stays within the token budget.
    fn merge_small_peers(&self, passages: Vec<Passage>) -> Vec<Passage> {
        let mut out: Vec<Passage> = Vec::new();

        for passage in passages {
            if let Some(last) = out.last_mut() {
                let combined =
                    estimate_tokens(&last.text) + estimate_tokens(&passage.text);
                if last.headings == passage.headings && combined <= self.max_tokens {
                    last.text.push_str("\n");
                    last.text.push_str(&passage.text);
                    continue;
                }
            }
            out.push(passage);
        }

        out
    }
}

fn trail_texts(trail: &[(u8, String)]) -> Vec<String> {
    trail.iter().map(|(_, t)| t.clone()).collect()
}

/// Word-count token estimate. Close enough for bounding chunk sizes
/// without pulling in a model tokenizer.
fn estimate_tokens(text: &str) -> usize {
    text.unicode_words().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with_items(items: Vec<DocItem>) -> EngineDocument {
        let mut doc = EngineDocument::new("chunked");
        doc.items = items;
        doc
    }

    #[test]
    fn test_headings_become_context_not_chunks() {
        let doc = doc_with_items(vec![
            DocItem::Heading { level: 1, text: "Intro".into(), page: Some(1) },
            DocItem::Paragraph { text: "First paragraph.".into(), page: Some(1) },
            DocItem::Heading { level: 2, text: "Details".into(), page: Some(1) },
            DocItem::Paragraph { text: "Second paragraph.".into(), page: Some(2) },
        ]);

        let chunks = DocumentChunker::new(512, false).chunk(&doc);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].headings, vec!["Intro"]);
        assert_eq!(chunks[1].headings, vec!["Intro", "Details"]);
        assert_eq!(chunks[1].page, Some(2));
    }

    #[test]
    fn test_heading_trail_pops_on_same_level() {
        let doc = doc_with_items(vec![
            DocItem::Heading { level: 1, text: "A".into(), page: None },
            DocItem::Heading { level: 2, text: "A.1".into(), page: None },
            DocItem::Heading { level: 2, text: "A.2".into(), page: None },
            DocItem::Paragraph { text: "Under A.2".into(), page: None },
        ]);

        let chunks = DocumentChunker::new(512, false).chunk(&doc);
        assert_eq!(chunks[0].headings, vec!["A", "A.2"]);
    }

    #[test]
    fn test_oversized_passage_is_split() {
        let long_text = (0..40)
            .map(|i| format!("Sentence number {} has exactly six words. ", i))
            .collect::<String>();
        let doc = doc_with_items(vec![DocItem::Paragraph {
            text: long_text,
            page: Some(1),
        }]);

        let chunks = DocumentChunker::new(50, false).chunk(&doc);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(estimate_tokens(&chunk.text) <= 50, "chunk over budget: {}", chunk.text);
        }
    }

    #[test]
    fn test_merge_peers_combines_small_siblings() {
        let doc = doc_with_items(vec![
            DocItem::Heading { level: 1, text: "List".into(), page: None },
            DocItem::ListItem { text: "alpha".into(), page: None },
            DocItem::ListItem { text: "beta".into(), page: None },
            DocItem::ListItem { text: "gamma".into(), page: None },
        ]);

        let merged = DocumentChunker::new(512, true).chunk(&doc);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].text.contains("alpha"));
        assert!(merged[0].text.contains("gamma"));

        let unmerged = DocumentChunker::new(512, false).chunk(&doc);
        assert_eq!(unmerged.len(), 3);
    }

    #[test]
    fn test_ids_are_one_based_and_sequential() {
        let doc = doc_with_items(vec![
            DocItem::Paragraph { text: "one".into(), page: None },
            DocItem::Heading { level: 1, text: "H".into(), page: None },
            DocItem::Paragraph { text: "two".into(), page: None },
        ]);

        let chunks = DocumentChunker::new(512, true).chunk(&doc);
        let ids: Vec<usize> = chunks.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_table_rows_are_chunkable() {
        let mut doc = EngineDocument::new("tabular");
        doc.tables = vec![crate::engine::TableItem {
            grid: vec![
                vec!["h1".into(), "h2".into()],
                vec!["a".into(), "b".into()],
            ],
            ..Default::default()
        }];
        doc.items = vec![DocItem::Table { index: 0 }];

        let chunks = DocumentChunker::new(512, true).chunk(&doc);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "h1, h2\na, b");
    }
}
