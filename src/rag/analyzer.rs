//! Sentence segmentation and keyword extraction.
//!
//! The pipeline only needs two pure functions from a tokenizer, so they sit
//! behind [`TextAnalyzer`] and can be swapped for a language-specific
//! implementation. [`SimpleAnalyzer`] uses Unicode text segmentation (UAX #29),
//! which covers Latin and CJK punctuation.

use std::collections::HashMap;
use unicode_segmentation::UnicodeSegmentation;

/// Tokenizer seam used by the document pipeline.
pub trait TextAnalyzer: Send + Sync {
    /// Split text into trimmed, non-empty sentences, in order
    fn split_sentences(&self, text: &str) -> Vec<String>;

    /// Up to `top_n` keywords, most significant first
    fn extract_keywords(&self, text: &str, top_n: usize) -> Vec<String>;
}

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has", "have", "he",
    "her", "his", "how", "if", "in", "into", "is", "it", "its", "just", "me", "more", "most", "my",
    "no", "not", "of", "on", "one", "or", "our", "out", "she", "so", "some", "than", "that", "the",
    "their", "them", "then", "there", "these", "they", "this", "to", "up", "us", "very", "was",
    "we", "were", "what", "when", "which", "who", "will", "with", "would", "you", "your",
];

/// Frequency-based keyword extractor with UAX #29 sentence splitting.
#[derive(Debug, Clone, Default)]
pub struct SimpleAnalyzer;

impl SimpleAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn is_candidate(word: &str) -> bool {
        let chars = word.chars().count();
        let ideographic = word.chars().all(|c| c.is_alphabetic() && !c.is_ascii());
        if chars < 2 && !ideographic {
            return false;
        }
        if word.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        !STOPWORDS.contains(&word)
    }
}

impl TextAnalyzer for SimpleAnalyzer {
    fn split_sentences(&self, text: &str) -> Vec<String> {
        text.split_sentence_bounds()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    fn extract_keywords(&self, text: &str, top_n: usize) -> Vec<String> {
        if top_n == 0 {
            return Vec::new();
        }

        // term -> (frequency, first position)
        let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
        for (position, word) in text.unicode_words().enumerate() {
            let word = word.to_lowercase();
            if !Self::is_candidate(&word) {
                continue;
            }
            counts.entry(word).or_insert((0, position)).0 += 1;
        }

        let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
        ranked.into_iter().take(top_n).map(|(w, _)| w).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sentences() {
        let analyzer = SimpleAnalyzer::new();
        let sentences = analyzer.split_sentences("Rust is fast. It is safe! Is it fun? Yes.");
        assert_eq!(
            sentences,
            vec!["Rust is fast.", "It is safe!", "Is it fun?", "Yes."]
        );
    }

    #[test]
    fn test_split_sentences_cjk() {
        let analyzer = SimpleAnalyzer::new();
        let sentences = analyzer.split_sentences("今天天气很好。我们去公园吧！");
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0], "今天天气很好。");
    }

    #[test]
    fn test_split_sentences_empty() {
        let analyzer = SimpleAnalyzer::new();
        assert!(analyzer.split_sentences("   \n ").is_empty());
    }

    #[test]
    fn test_keywords_ranked_by_frequency() {
        let analyzer = SimpleAnalyzer::new();
        let text = "Vector search uses vectors. Search ranks vector results by similarity.";
        let keywords = analyzer.extract_keywords(text, 3);

        assert_eq!(keywords[0], "vector");
        assert_eq!(keywords[1], "search");
        assert_eq!(keywords.len(), 3);
        assert!(!keywords.contains(&"by".to_string()));
    }

    #[test]
    fn test_keywords_skip_stopwords_and_numbers() {
        let analyzer = SimpleAnalyzer::new();
        let keywords = analyzer.extract_keywords("The 2024 report and the 2025 report", 5);
        assert_eq!(keywords, vec!["report"]);
        assert!(analyzer.extract_keywords("anything", 0).is_empty());
    }
}
