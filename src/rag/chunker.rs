//! Document decomposition into paragraphs, sentences and sentence-window chunks.
//!
//! Nothing here touches a store. [`SentenceWindowChunker::plan`] turns raw text
//! into a [`DocumentPlan`] that the document service then assigns ids to,
//! embeds and persists.

use std::collections::HashSet;
use std::ops::Range;

use super::analyzer::TextAnalyzer;

/// A paragraph with its sentences, before ids are known.
#[derive(Debug, Clone, PartialEq)]
pub struct ParagraphPlan {
    /// 1-based position inside the document
    pub paragraph_id: u32,
    pub content: String,
    pub keywords: Vec<String>,
    /// Document-wide sentence ids, contiguous
    pub sentence_ids: Range<u32>,
    pub sentences: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPlan {
    pub paragraph_id: u32,
    pub sentence_id_min: u32,
    pub sentence_id_max: u32,
    /// Sentences joined with single spaces
    pub content: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentPlan {
    pub paragraphs: Vec<ParagraphPlan>,
    pub chunks: Vec<ChunkPlan>,
}

impl DocumentPlan {
    pub fn paragraph_count(&self) -> u32 {
        self.paragraphs.len() as u32
    }

    pub fn sentence_count(&self) -> u32 {
        self.paragraphs.iter().map(|p| p.sentences.len() as u32).sum()
    }

    /// Union of paragraph keywords, in first-seen order
    pub fn keywords(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.paragraphs
            .iter()
            .flat_map(|p| p.keywords.iter())
            .filter(|k| seen.insert(k.as_str()))
            .cloned()
            .collect()
    }
}

/// Split text into paragraphs on blank lines. Lines inside a paragraph keep
/// their line breaks; empty paragraphs are dropped.
pub fn split_paragraphs(content: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n").trim().to_string());
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n").trim().to_string());
    }

    paragraphs.retain(|p| !p.is_empty());
    paragraphs
}

/// Sentence index ranges covered by each chunk of a paragraph.
///
/// Fewer than `window` sentences yield one chunk spanning all of them.
/// Otherwise windows start every `stride` sentences until one reaches the
/// last sentence; that final window may be shorter than `window`.
pub fn window_ranges(sentence_count: usize, window: usize, stride: usize) -> Vec<Range<usize>> {
    if sentence_count == 0 {
        return Vec::new();
    }
    if sentence_count < window {
        return vec![0..sentence_count];
    }

    let stride = stride.max(1);
    let mut ranges = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + window).min(sentence_count);
        ranges.push(start..end);
        if end >= sentence_count {
            break;
        }
        start += stride;
    }
    ranges
}

/// Sliding sentence-window chunker.
#[derive(Debug, Clone)]
pub struct SentenceWindowChunker {
    window_size: usize,
    stride: usize,
    keywords_top_n: usize,
}

impl Default for SentenceWindowChunker {
    fn default() -> Self {
        Self::new(3, 2, 5)
    }
}

impl SentenceWindowChunker {
    pub fn new(window_size: usize, stride: usize, keywords_top_n: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            stride: stride.max(1),
            keywords_top_n,
        }
    }

    /// Decompose `content` into paragraphs, sentences and chunks.
    pub fn plan(&self, content: &str, analyzer: &dyn TextAnalyzer) -> DocumentPlan {
        let mut plan = DocumentPlan::default();
        let mut next_sentence_id: u32 = 1;

        for (index, paragraph) in split_paragraphs(content).into_iter().enumerate() {
            let paragraph_id = index as u32 + 1;

            let mut sentences = analyzer.split_sentences(&paragraph);
            if sentences.is_empty() {
                sentences.push(paragraph.clone());
            }

            let first_id = next_sentence_id;
            next_sentence_id += sentences.len() as u32;

            for range in window_ranges(sentences.len(), self.window_size, self.stride) {
                let text = sentences[range.clone()].join(" ");
                plan.chunks.push(ChunkPlan {
                    paragraph_id,
                    sentence_id_min: first_id + range.start as u32,
                    sentence_id_max: first_id + range.end as u32 - 1,
                    keywords: analyzer.extract_keywords(&text, self.keywords_top_n),
                    content: text,
                });
            }

            plan.paragraphs.push(ParagraphPlan {
                paragraph_id,
                keywords: analyzer.extract_keywords(&paragraph, self.keywords_top_n),
                content: paragraph,
                sentence_ids: first_id..next_sentence_id,
                sentences,
            });
        }

        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::analyzer::SimpleAnalyzer;
    use rstest::rstest;

    #[rstest]
    #[case(1, vec![0..1])]
    #[case(2, vec![0..2])]
    #[case(3, vec![0..3])]
    #[case(4, vec![0..3, 2..4])]
    #[case(5, vec![0..3, 2..5])]
    #[case(6, vec![0..3, 2..5, 4..6])]
    #[case(7, vec![0..3, 2..5, 4..7])]
    fn test_window_ranges(#[case] sentences: usize, #[case] expected: Vec<Range<usize>>) {
        assert_eq!(window_ranges(sentences, 3, 2), expected);
    }

    #[test]
    fn test_window_ranges_empty() {
        assert!(window_ranges(0, 3, 2).is_empty());
    }

    #[test]
    fn test_split_paragraphs() {
        let content = "First line.\nStill first.\n\n  \n\nSecond.\n\n\n";
        assert_eq!(
            split_paragraphs(content),
            vec!["First line.\nStill first.", "Second."]
        );
        assert!(split_paragraphs("\n\n   \n").is_empty());
    }

    #[test]
    fn test_plan_two_paragraphs() {
        let content = "One. Two. Three. Four. Five.\n\nSix. Seven.";
        let plan = SentenceWindowChunker::default().plan(content, &SimpleAnalyzer::new());

        assert_eq!(plan.paragraph_count(), 2);
        assert_eq!(plan.sentence_count(), 7);
        assert_eq!(plan.chunks.len(), 3);

        assert_eq!(plan.paragraphs[0].sentence_ids, 1..6);
        assert_eq!(plan.paragraphs[1].sentence_ids, 6..8);

        let spans: Vec<(u32, u32, u32)> = plan
            .chunks
            .iter()
            .map(|c| (c.paragraph_id, c.sentence_id_min, c.sentence_id_max))
            .collect();
        assert_eq!(spans, vec![(1, 1, 3), (1, 3, 5), (2, 6, 7)]);

        assert_eq!(plan.chunks[1].content, "Three. Four. Five.");
        assert_eq!(plan.chunks[2].content, "Six. Seven.");
    }

    #[test]
    fn test_chunks_stay_inside_their_paragraph() {
        let content = "A b. C d. E f. G h.\n\nI j. K l. M n. O p. Q r. S t.";
        let plan = SentenceWindowChunker::default().plan(content, &SimpleAnalyzer::new());

        for chunk in &plan.chunks {
            let paragraph = &plan.paragraphs[chunk.paragraph_id as usize - 1];
            assert!(paragraph.sentence_ids.contains(&chunk.sentence_id_min));
            assert!(paragraph.sentence_ids.contains(&chunk.sentence_id_max));
        }
    }

    #[test]
    fn test_document_keywords_deduplicated() {
        let content = "Rust memory safety. Rust speed.\n\nRust tooling and memory.";
        let plan = SentenceWindowChunker::default().plan(content, &SimpleAnalyzer::new());
        let keywords = plan.keywords();

        let unique: HashSet<_> = keywords.iter().collect();
        assert_eq!(unique.len(), keywords.len());
        assert_eq!(keywords[0], "rust");
    }
}
