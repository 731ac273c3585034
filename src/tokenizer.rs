/// Pluggable tokenizer shared by chunking, the sparse index and query parsing
use tantivy::tokenizer::{LowerCaser, RemoveLongFilter, SimpleTokenizer, TextAnalyzer};

/// A normalized token with its byte span in the source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSpan {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Trait for tokenizers
///
/// Token counts drive chunk sizing, and token texts are the BM25 terms, so a
/// corpus must use one tokenizer for its whole lifetime.
pub trait Tokenizer: Send + Sync {
    /// Split text into normalized tokens, in order of appearance
    fn tokenize(&self, text: &str) -> Vec<TokenSpan>;

    /// Number of tokens in the text
    fn count(&self, text: &str) -> usize {
        self.tokenize(text).len()
    }

    /// Token texts only
    fn terms(&self, text: &str) -> Vec<String> {
        self.tokenize(text).into_iter().map(|t| t.text).collect()
    }
}

/// Tokenizer backed by a tantivy text analyzer
///
/// Splits on non-alphanumeric characters, drops tokens longer than 40 bytes
/// and lower-cases the rest.
#[derive(Clone)]
pub struct AnalyzerTokenizer {
    analyzer: TextAnalyzer,
}

impl AnalyzerTokenizer {
    pub fn new() -> Self {
        let analyzer = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(40))
            .filter(LowerCaser)
            .build();
        Self { analyzer }
    }
}

impl Default for AnalyzerTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer for AnalyzerTokenizer {
    fn tokenize(&self, text: &str) -> Vec<TokenSpan> {
        // token_stream needs &mut, analyzers are cheap to clone
        let mut analyzer = self.analyzer.clone();
        let mut stream = analyzer.token_stream(text);

        let mut tokens = Vec::new();
        while let Some(token) = stream.next() {
            tokens.push(TokenSpan {
                text: token.text.clone(),
                start: token.offset_from,
                end: token.offset_to,
            });
        }
        tokens
    }
}
