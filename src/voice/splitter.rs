//! Bounded semantic text segmenter.
//!
//! Splits a full response into ordered chunks of at most `max_len`
//! characters.  Boundaries are chosen from sentence-ending punctuation
//! (`.!?…。！？`) and line breaks first, then clause punctuation, then
//! whitespace.  Adjacent pieces are merged greedily up to `max_len` so a
//! response is synthesized in as few chunks as possible.  A single word
//! longer than `max_len` is emitted on its own rather than cut.
//!
//! Chunks are slices of the input with surrounding whitespace trimmed, so
//! no non-whitespace character is ever dropped or reordered.

use std::ops::Range;

/// Default upper bound on chunk length, in characters.
pub const DEFAULT_MAX_CHUNK_LEN: usize = 600;

/// Punctuation that ends a sentence.
const SENTENCE_DELIMITERS: &[char] = &['.', '!', '?', '…', '。', '！', '？'];

/// Punctuation that ends a clause inside a sentence.
const CLAUSE_DELIMITERS: &[char] = &[',', ';', ':', '—', '–', '、', '，', '；', '：'];

/// Closing quotes and brackets that stay attached to the preceding delimiter.
const CLOSING_MARKS: &[char] = &['"', '\'', ')', ']', '}', '”', '’', '»', '」', '』'];

/// A chunk of text with its position in the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Zero-based sequence number.
    pub index: usize,
    /// The chunk text (trimmed, non-empty).
    pub text: String,
}

impl TextChunk {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }

    /// Length in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Sentence,
    Clause,
    Word,
}

impl Level {
    fn finer(self) -> Option<Level> {
        match self {
            Level::Sentence => Some(Level::Clause),
            Level::Clause => Some(Level::Word),
            Level::Word => None,
        }
    }

    fn delimiters(self) -> &'static [char] {
        match self {
            Level::Sentence => SENTENCE_DELIMITERS,
            Level::Clause => CLAUSE_DELIMITERS,
            Level::Word => &[],
        }
    }
}

/// Splits text into bounded, order-preserving chunks.
#[derive(Debug, Clone)]
pub struct TextSegmenter {
    /// Maximum chunk length in characters (at least 1).
    max_len: usize,
}

impl Default for TextSegmenter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNK_LEN)
    }
}

impl TextSegmenter {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len: max_len.max(1),
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Segment `text` into chunks numbered from zero.
    ///
    /// Empty or whitespace-only input yields no chunks.  The result depends
    /// only on `text` and `max_len`.
    pub fn segment(&self, text: &str) -> Vec<TextChunk> {
        let mut units = Vec::new();
        self.collect_units(text, 0..text.len(), Level::Sentence, &mut units);

        pack(text, &units, self.max_len)
            .into_iter()
            .enumerate()
            .map(|(index, range)| TextChunk::new(index, &text[range]))
            .collect()
    }

    /// Break `range` into pieces that fit `max_len`, descending to finer
    /// boundaries only for pieces that are still too long.
    fn collect_units(&self, text: &str, range: Range<usize>, level: Level, out: &mut Vec<Range<usize>>) {
        for piece in split_at_level(text, range, level) {
            if char_len(&text[piece.clone()]) <= self.max_len {
                out.push(piece);
                continue;
            }
            match level.finer() {
                Some(finer) => self.collect_units(text, piece, finer, out),
                // One indivisible word: emit as-is.
                None => out.push(piece),
            }
        }
    }
}

/// Convenience wrapper: segment with an explicit bound.
pub fn segment(text: &str, max_len: usize) -> Vec<TextChunk> {
    TextSegmenter::new(max_len).segment(text)
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Delimiters after which a boundary is allowed without trailing whitespace.
fn splits_without_space(c: char) -> bool {
    matches!(c, '。' | '！' | '？' | '、' | '，' | '；' | '：' | '—' | '–')
}

/// Shrink an absolute byte range to exclude surrounding whitespace.
fn trim_range(text: &str, range: Range<usize>) -> Option<Range<usize>> {
    let slice = &text[range.clone()];
    let trimmed_start = slice.trim_start();
    if trimmed_start.is_empty() {
        return None;
    }
    let start = range.start + (slice.len() - trimmed_start.len());
    let end = start + trimmed_start.trim_end().len();
    Some(start..end)
}

/// Split `range` at boundaries of the given level, returning trimmed,
/// non-empty sub-ranges in order.
fn split_at_level(text: &str, range: Range<usize>, level: Level) -> Vec<Range<usize>> {
    let base = range.start;
    let slice = &text[range.clone()];
    let mut pieces = Vec::new();

    if level == Level::Word {
        let mut start: Option<usize> = None;
        for (i, c) in slice.char_indices() {
            match (c.is_whitespace(), start) {
                (true, Some(s)) => {
                    pieces.push(base + s..base + i);
                    start = None;
                }
                (false, None) => start = Some(i),
                _ => {}
            }
        }
        if let Some(s) = start {
            pieces.push(base + s..range.end);
        }
        return pieces;
    }

    let delimiters = level.delimiters();
    let chars: Vec<(usize, char)> = slice.char_indices().collect();
    let mut start = 0usize;
    let mut k = 0usize;

    while k < chars.len() {
        let (i, c) = chars[k];

        if level == Level::Sentence && c == '\n' {
            if let Some(piece) = trim_range(text, base + start..base + i) {
                pieces.push(piece);
            }
            start = i + c.len_utf8();
            k += 1;
            continue;
        }

        if !delimiters.contains(&c) {
            k += 1;
            continue;
        }

        // Swallow runs like "?!", "..." and closing quotes after the delimiter.
        let mut last = k;
        while last + 1 < chars.len() {
            let next = chars[last + 1].1;
            if delimiters.contains(&next) || CLOSING_MARKS.contains(&next) {
                last += 1;
            } else {
                break;
            }
        }
        let end = chars[last].0 + chars[last].1.len_utf8();
        let at_end = last + 1 == chars.len();
        let followed_by_space = !at_end && chars[last + 1].1.is_whitespace();

        if at_end || followed_by_space || splits_without_space(c) {
            if let Some(piece) = trim_range(text, base + start..base + end) {
                pieces.push(piece);
            }
            start = end;
        }
        k = last + 1;
    }

    if let Some(piece) = trim_range(text, base + start..range.end) {
        pieces.push(piece);
    }
    pieces
}

/// Greedily merge consecutive units while the merged span fits `max_len`.
fn pack(text: &str, units: &[Range<usize>], max_len: usize) -> Vec<Range<usize>> {
    let mut chunks = Vec::new();
    let mut current: Option<Range<usize>> = None;

    for unit in units {
        current = match current.take() {
            None => Some(unit.clone()),
            Some(cur) => {
                let merged = cur.start..unit.end;
                if char_len(&text[merged.clone()]) <= max_len {
                    Some(merged)
                } else {
                    chunks.push(cur);
                    Some(unit.clone())
                }
            }
        };
    }

    if let Some(cur) = current {
        chunks.push(cur);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(chunks: &[TextChunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    fn non_whitespace(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    /// A sentence of `words` four-letter words, `5 * words` characters long.
    fn sentence(words: usize) -> String {
        let mut s = vec!["word"; words].join(" ");
        s.push('.');
        s
    }

    /// Deterministic pseudo-random text for property checks.
    fn generated_text(seed: u64, words: usize) -> String {
        let vocabulary = [
            "alpha", "be", "cat", "delta,", "echo.", "fox!", "go?", "hotel;", "i", "juliet:",
            "kilo\n", "lima—mike", "“november.”", "oscar…", "papa\n\n", "こんにちは。", "quebec",
        ];
        let mut state = seed;
        let mut out = String::new();
        for _ in 0..words {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let word = vocabulary[(state >> 33) as usize % vocabulary.len()];
            out.push_str(word);
            if (state >> 20) % 7 == 0 {
                out.push_str(&"x".repeat(((state >> 8) % 90) as usize));
            }
            out.push(' ');
        }
        out
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(segment("", 600).is_empty());
    }

    #[test]
    fn whitespace_only_yields_nothing() {
        assert!(segment("   \n\n\t  ", 600).is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = segment("  Hello there! How are you?  ", 600);
        assert_eq!(texts(&chunks), vec!["Hello there! How are you?"]);
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn splits_on_sentence_ends_when_merging_would_overflow() {
        let chunks = segment("Hello! How are you? Fine.", 12);
        assert_eq!(texts(&chunks), vec!["Hello!", "How are you?", "Fine."]);
    }

    #[test]
    fn merges_short_sentences_up_to_limit() {
        let chunks = segment("One. Two. Three. Four.", 10);
        assert_eq!(texts(&chunks), vec!["One. Two.", "Three.", "Four."]);
    }

    #[test]
    fn four_sentence_paragraph_splits_at_sentence_ends() {
        let sentences: Vec<String> = (0..4).map(|_| sentence(95)).collect();
        let paragraph = sentences.join(" ");
        assert!(paragraph.chars().count() >= 1900);

        let chunks = segment(&paragraph, 600);
        // Any two sentences together exceed 600, so four chunks is the minimum.
        assert_eq!(chunks.len(), 4);
        for (chunk, expected) in chunks.iter().zip(&sentences) {
            assert_eq!(&chunk.text, expected);
            assert!(chunk.text.ends_with('.'));
        }
    }

    #[test]
    fn pairs_of_sentences_share_a_chunk() {
        let paragraph = (0..4).map(|_| sentence(50)).collect::<Vec<_>>().join(" ");
        let chunks = segment(&paragraph, 600);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.char_len() == 501));
    }

    #[test]
    fn long_sentence_falls_back_to_clauses() {
        let clause = vec!["word"; 40].join(" ");
        let text = format!("{clause}, {clause}, {clause}.");
        let chunks = segment(&text, 250);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].text.ends_with(','));
        assert!(chunks[1].text.ends_with(','));
        assert!(chunks[2].text.ends_with('.'));
    }

    #[test]
    fn long_clause_falls_back_to_words() {
        let text = vec!["word"; 30].join(" ");
        let chunks = segment(&text, 50);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.char_len() <= 50));
        assert_eq!(non_whitespace(&text), non_whitespace(&texts(&chunks).concat()));
    }

    #[test]
    fn oversized_word_is_kept_whole() {
        let long_word = "a".repeat(700);
        let text = format!("hi {long_word} there");
        let chunks = segment(&text, 600);
        assert_eq!(texts(&chunks), vec!["hi", long_word.as_str(), "there"]);
    }

    #[test]
    fn cjk_punctuation_splits_without_spaces() {
        let chunks = segment("こんにちは。元気ですか？", 6);
        assert_eq!(texts(&chunks), vec!["こんにちは。", "元気ですか？"]);
    }

    #[test]
    fn closing_quotes_stay_with_sentence() {
        let chunks = segment("He said \"stop!\" Then he left.", 16);
        assert_eq!(texts(&chunks), vec!["He said \"stop!\"", "Then he left."]);
    }

    #[test]
    fn decimal_points_are_not_boundaries() {
        let chunks = segment("Pi is 3.14 roughly. Yes.", 19);
        assert_eq!(texts(&chunks), vec!["Pi is 3.14 roughly.", "Yes."]);
    }

    #[test]
    fn line_breaks_are_boundaries() {
        let chunks = segment("first line\nsecond line", 12);
        assert_eq!(texts(&chunks), vec!["first line", "second line"]);
    }

    #[test]
    fn indices_are_sequential() {
        let text = (0..10).map(|_| sentence(30)).collect::<Vec<_>>().join(" ");
        let chunks = segment(&text, 200);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
    }

    #[test]
    fn zero_max_len_is_treated_as_one() {
        let segmenter = TextSegmenter::new(0);
        assert_eq!(segmenter.max_len(), 1);
        assert_eq!(texts(&segmenter.segment("a b")), vec!["a", "b"]);
    }

    #[test]
    fn bounded_and_lossless_on_generated_inputs() {
        for seed in 0..64u64 {
            let text = generated_text(seed, 250);
            for max_len in [1usize, 17, 80, 600] {
                let chunks = segment(&text, max_len);
                for chunk in &chunks {
                    assert!(!chunk.text.is_empty());
                    assert_eq!(chunk.text, chunk.text.trim());
                    if chunk.char_len() > max_len {
                        assert!(
                            !chunk.text.contains(char::is_whitespace),
                            "oversized chunk must be a single word: {:?}",
                            chunk.text
                        );
                    }
                }
                assert_eq!(
                    non_whitespace(&text),
                    non_whitespace(&texts(&chunks).concat()),
                    "seed {seed} max_len {max_len}"
                );
            }
        }
    }

    #[test]
    fn deterministic() {
        let text = generated_text(42, 400);
        assert_eq!(segment(&text, 120), segment(&text, 120));
    }
}
