//! Sentence-window chunking
//!
//! Pages are split into sentences, sentences are measured in tokenizer tokens,
//! and consecutive sentences are packed into windows of roughly
//! `target_chunk_tokens`. The tail of each window (up to `overlap_tokens`) is
//! repeated at the head of the next so context survives the boundary. A final
//! fragment below `min_chunk_tokens` is folded into its predecessor.
//!
//! The output is a lazy [`ChunkStream`]: pages are only segmented when the
//! iterator reaches them, and cloning the stream (or calling
//! [`Chunker::chunks`] again) restarts from the same state.

mod sentences;

pub use sentences::{SentenceSplitter, DEFAULT_SENTENCE_BOUNDARY};

use crate::config::ChunkingConfig;
use crate::retrieval::RetrievalError;
use crate::tokenizer::Tokenizer;
use std::collections::VecDeque;
use std::sync::Arc;

/// A chunk before it is assigned an id and committed to a corpus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub text: String,
    pub position: usize,
    pub token_count: usize,
    /// 1-based page of the first sentence new to this chunk
    pub source_page: usize,
}

/// A sentence (or a token-bounded piece of one) with its size
#[derive(Debug, Clone)]
struct Segment {
    text: String,
    tokens: usize,
    page: usize,
}

/// Splits page text into chunk drafts
pub struct Chunker {
    config: ChunkingConfig,
    splitter: SentenceSplitter,
    tokenizer: Arc<dyn Tokenizer>,
}

impl Chunker {
    pub fn new(
        config: ChunkingConfig,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Result<Self, regex::Error> {
        let splitter = SentenceSplitter::new(&config.sentence_boundary)?;
        Ok(Self {
            config,
            splitter,
            tokenizer,
        })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Start a chunk stream over pages given in page order
    ///
    /// Fails with `EmptyDocument` when no page contains a single token.
    pub fn chunks<'a>(&'a self, pages: &'a [String]) -> Result<ChunkStream<'a>, RetrievalError> {
        let has_content = pages
            .iter()
            .any(|page| !page.trim().is_empty() && self.tokenizer.count(page) > 0);

        if !has_content {
            return Err(RetrievalError::EmptyDocument);
        }

        Ok(ChunkStream {
            chunker: self,
            pages,
            next_page: 0,
            queue: VecDeque::new(),
            carry: Vec::new(),
            pending: None,
            position: 0,
            done: false,
        })
    }

    /// Chunk pages eagerly
    pub fn chunk_all(&self, pages: &[String]) -> Result<Vec<ChunkDraft>, RetrievalError> {
        Ok(self.chunks(pages)?.collect())
    }

    /// Split one page into sized segments, dropping token-less sentences
    fn segment_page(&self, page: &str, page_number: usize) -> Vec<Segment> {
        let max = self.config.max_chunk_tokens;
        let mut segments = Vec::new();

        for sentence in self.splitter.split(page) {
            let spans = self.tokenizer.tokenize(sentence);
            if spans.is_empty() {
                continue;
            }

            if spans.len() <= max {
                segments.push(Segment {
                    text: sentence.to_string(),
                    tokens: spans.len(),
                    page: page_number,
                });
                continue;
            }

            // Oversized sentence: cut at token boundaries
            for piece in spans.chunks(max) {
                let (first, last) = (&piece[0], &piece[piece.len() - 1]);
                segments.push(Segment {
                    text: sentence[first.start..last.end].to_string(),
                    tokens: piece.len(),
                    page: page_number,
                });
            }
        }

        segments
    }
}

/// Lazy, restartable sequence of chunk drafts
#[derive(Clone)]
pub struct ChunkStream<'a> {
    chunker: &'a Chunker,
    pages: &'a [String],
    next_page: usize,
    queue: VecDeque<Segment>,
    carry: Vec<Segment>,
    /// Closed chunk held back until we know whether a small tail merges into it
    pending: Option<ChunkDraft>,
    position: usize,
    done: bool,
}

/// Segments of one chunk; `segments[new_from..]` were not carried over
struct Window {
    segments: Vec<Segment>,
    new_from: usize,
}

impl Window {
    fn new_tokens(&self) -> usize {
        self.segments[self.new_from..].iter().map(|s| s.tokens).sum()
    }

    fn into_draft(self, position: usize) -> ChunkDraft {
        let source_page = self.segments[self.new_from].page;
        let token_count = self.segments.iter().map(|s| s.tokens).sum();
        let text = join_segments(&self.segments);
        ChunkDraft {
            text,
            position,
            token_count,
            source_page,
        }
    }
}

fn join_segments(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

impl ChunkStream<'_> {
    /// Make sure the queue holds the next segment if any page still has one
    fn fill_queue(&mut self) {
        while self.queue.is_empty() && self.next_page < self.pages.len() {
            let page_number = self.next_page + 1;
            let segments = self
                .chunker
                .segment_page(&self.pages[self.next_page], page_number);
            self.queue.extend(segments);
            self.next_page += 1;
        }
    }

    fn exhausted(&mut self) -> bool {
        self.fill_queue();
        self.queue.is_empty()
    }

    fn next_window(&mut self) -> Option<Window> {
        self.fill_queue();
        let first_tokens = self.queue.front()?.tokens;

        let chunker = self.chunker;
        let config = &chunker.config;
        let target = config.target_chunk_tokens;

        // Drop carried sentences from the front until the first new one fits
        let mut segments = std::mem::take(&mut self.carry);
        let mut tokens: usize = segments.iter().map(|s| s.tokens).sum();
        while !segments.is_empty() && tokens + first_tokens > target {
            tokens -= segments.remove(0).tokens;
        }
        let new_from = segments.len();

        loop {
            self.fill_queue();
            let fits = match self.queue.front() {
                Some(next) => segments.len() == new_from || tokens + next.tokens <= target,
                None => false,
            };
            if !fits {
                break;
            }
            if let Some(segment) = self.queue.pop_front() {
                tokens += segment.tokens;
                segments.push(segment);
            }
        }

        self.carry = overlap_tail(&segments, config.overlap_tokens);

        Some(Window { segments, new_from })
    }
}

/// Trailing segments whose total stays within the overlap budget
fn overlap_tail(segments: &[Segment], overlap_tokens: usize) -> Vec<Segment> {
    let mut budget = overlap_tokens;
    let mut start = segments.len();
    while start > 0 && segments[start - 1].tokens <= budget {
        budget -= segments[start - 1].tokens;
        start -= 1;
    }
    segments[start..].to_vec()
}

impl Iterator for ChunkStream<'_> {
    type Item = ChunkDraft;

    fn next(&mut self) -> Option<ChunkDraft> {
        loop {
            if self.done {
                return self.pending.take();
            }

            let Some(window) = self.next_window() else {
                self.done = true;
                return self.pending.take();
            };

            let chunker = self.chunker;
            let config = &chunker.config;
            let is_tail = self.exhausted();
            let new_tokens = window.new_tokens();

            if is_tail && new_tokens < config.min_chunk_tokens {
                if let Some(prev) = self.pending.as_mut() {
                    if prev.token_count + new_tokens <= config.max_chunk_tokens {
                        let fragment = join_segments(&window.segments[window.new_from..]);
                        prev.text.push(' ');
                        prev.text.push_str(&fragment);
                        prev.token_count += new_tokens;
                        self.done = true;
                        return self.pending.take();
                    }
                }
            }

            let draft = window.into_draft(self.position);
            self.position += 1;

            if let Some(prev) = self.pending.replace(draft) {
                return Some(prev);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::AnalyzerTokenizer;

    fn chunker(target: usize, max: usize, overlap: usize, min: usize) -> Chunker {
        let config = ChunkingConfig {
            target_chunk_tokens: target,
            max_chunk_tokens: max,
            overlap_tokens: overlap,
            min_chunk_tokens: min,
            ..Default::default()
        };
        Chunker::new(config, Arc::new(AnalyzerTokenizer::new())).unwrap()
    }

    fn pages(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_two_sentences_two_chunks() {
        let chunker = chunker(5, 8, 0, 1);
        let pages = pages(&["Photosynthesis converts light to energy. Mitochondria produce ATP."]);

        let chunks = chunker.chunk_all(&pages).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "Photosynthesis converts light to energy.");
        assert_eq!(chunks[0].token_count, 5);
        assert_eq!(chunks[1].text, "Mitochondria produce ATP.");
        assert_eq!(chunks[1].position, 1);
    }

    #[test]
    fn test_small_document_single_chunk() {
        let chunker = chunker(384, 512, 48, 32);
        let pages = pages(&["Cells divide. Cells grow. Cells die."]);

        let chunks = chunker.chunk_all(&pages).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].token_count, 6);
        assert_eq!(chunks[0].source_page, 1);
    }

    #[test]
    fn test_overlap_carries_trailing_sentence() {
        // Each sentence is 3 tokens
        let chunker = chunker(6, 10, 3, 1);
        let pages = pages(&["One two three. Four five six. Seven eight nine. Ten eleven twelve."]);

        let chunks = chunker.chunk_all(&pages).unwrap();
        assert_eq!(chunks[0].text, "One two three. Four five six.");
        assert!(chunks[1].text.starts_with("Four five six."));
        assert!(chunks[1].text.contains("Seven eight nine."));
        assert!(chunks
            .last()
            .unwrap()
            .text
            .ends_with("Ten eleven twelve."));
    }

    #[test]
    fn test_trailing_fragment_merged() {
        let chunker = chunker(6, 10, 0, 3);
        let pages = pages(&["Alpha beta gamma delta epsilon zeta. Omega."]);

        let chunks = chunker.chunk_all(&pages).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Alpha beta gamma delta epsilon zeta. Omega.");
        assert_eq!(chunks[0].token_count, 7);
    }

    #[test]
    fn test_trailing_fragment_kept_when_merge_too_large() {
        let chunker = chunker(6, 6, 0, 3);
        let pages = pages(&["Alpha beta gamma delta epsilon zeta. Omega."]);

        let chunks = chunker.chunk_all(&pages).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].text, "Omega.");
    }

    #[test]
    fn test_long_sentence_split_at_max() {
        let chunker = chunker(4, 5, 0, 1);
        let words: Vec<String> = (0..12).map(|i| format!("word{}", i)).collect();
        let pages = vec![words.join(" ")];

        let chunks = chunker.chunk_all(&pages).unwrap();
        let tokenizer = AnalyzerTokenizer::new();
        for chunk in &chunks {
            assert!(chunk.token_count >= 1 && chunk.token_count <= 5);
            assert_eq!(tokenizer.count(&chunk.text), chunk.token_count);
        }
        let total: usize = chunks.iter().map(|c| c.token_count).sum();
        assert_eq!(total, 12);
    }

    #[test]
    fn test_source_page_tracks_first_new_sentence() {
        let chunker = chunker(3, 5, 0, 1);
        let pages = pages(&["Cells divide fast.", "", "Atoms bond tightly."]);

        let chunks = chunker.chunk_all(&pages).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].source_page, 1);
        assert_eq!(chunks[1].source_page, 3);
    }

    #[test]
    fn test_empty_document() {
        let chunker = chunker(5, 8, 0, 1);
        let blank = pages(&["   ", "\n\n"]);
        let result = chunker.chunks(&blank);
        assert!(matches!(result, Err(RetrievalError::EmptyDocument)));

        let punct = pages(&["... --- !!!"]);
        let result = chunker.chunks(&punct);
        assert!(matches!(result, Err(RetrievalError::EmptyDocument)));

        let result = chunker.chunks(&[]);
        assert!(matches!(result, Err(RetrievalError::EmptyDocument)));
    }

    #[test]
    fn test_stream_is_restartable() {
        let chunker = chunker(6, 10, 3, 2);
        let pages = pages(&[
            "One two three. Four five six. Seven eight nine.",
            "Ten eleven twelve. Thirteen.",
        ]);

        let stream = chunker.chunks(&pages).unwrap();
        let first: Vec<ChunkDraft> = stream.clone().collect();
        let second: Vec<ChunkDraft> = stream.collect();
        let third = chunker.chunk_all(&pages).unwrap();

        assert_eq!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn test_chunk_validity_over_mixed_text() {
        let chunker = chunker(20, 30, 5, 4);
        let tokenizer = AnalyzerTokenizer::new();
        let long_sentence = vec!["lorem"; 70].join(" ");
        let pages = pages(&[
            "Intro. A short one! Another, longer sentence with several more words in it.",
            &long_sentence,
            "...",
            "Final remark about the enzymes and their substrates.",
        ]);

        let chunks = chunker.chunk_all(&pages).unwrap();
        assert!(!chunks.is_empty());
        for (i, chunk) in chunks.iter().enumerate() {
            assert!(!chunk.text.trim().is_empty());
            assert!(chunk.token_count >= 1 && chunk.token_count <= 30);
            assert_eq!(tokenizer.count(&chunk.text), chunk.token_count);
            assert_eq!(chunk.position, i);
        }
    }
}
