/// Sentence boundary detection
use regex::Regex;

/// Terminal punctuation (with trailing quotes/brackets) followed by whitespace,
/// or a blank-line paragraph break
pub const DEFAULT_SENTENCE_BOUNDARY: &str = r#"[.!?]+["'’”)\]]*\s+|\n\s*\n"#;

/// Splits text into sentences on a configurable boundary pattern
#[derive(Debug, Clone)]
pub struct SentenceSplitter {
    boundary: Regex,
}

impl SentenceSplitter {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            boundary: Regex::new(pattern)?,
        })
    }

    /// Split text into trimmed, non-empty sentences
    ///
    /// The boundary match stays with the sentence it closes, so terminal
    /// punctuation is preserved.
    pub fn split<'t>(&self, text: &'t str) -> Vec<&'t str> {
        let mut sentences = Vec::new();
        let mut start = 0;

        for boundary in self.boundary.find_iter(text) {
            let sentence = text[start..boundary.end()].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = boundary.end();
        }

        let tail = text[start..].trim();
        if !tail.is_empty() {
            sentences.push(tail);
        }

        sentences
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter() -> SentenceSplitter {
        SentenceSplitter::new(DEFAULT_SENTENCE_BOUNDARY).unwrap()
    }

    #[test]
    fn test_split_on_terminal_punctuation() {
        let splitter = splitter();
        let sentences =
            splitter.split("Photosynthesis converts light to energy. Mitochondria produce ATP.");
        assert_eq!(
            sentences,
            vec![
                "Photosynthesis converts light to energy.",
                "Mitochondria produce ATP."
            ]
        );
    }

    #[test]
    fn test_paragraph_break_is_boundary() {
        let splitter = splitter();
        let sentences = splitter.split("Chapter 3\n\nCells divide by mitosis");
        assert_eq!(sentences, vec!["Chapter 3", "Cells divide by mitosis"]);
    }

    #[test]
    fn test_quotes_stay_with_sentence() {
        let splitter = splitter();
        let sentences = splitter.split("He said \"stop.\" Then he left!");
        assert_eq!(sentences, vec!["He said \"stop.\"", "Then he left!"]);
    }

    #[test]
    fn test_decimal_numbers_not_split() {
        let splitter = splitter();
        let sentences = splitter.split("Pi is about 3.14 in value. Next.");
        assert_eq!(sentences, vec!["Pi is about 3.14 in value.", "Next."]);
    }

    #[test]
    fn test_whitespace_only() {
        let splitter = splitter();
        assert!(splitter.split("   \n\n  ").is_empty());
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(SentenceSplitter::new("([unclosed").is_err());
    }
}
