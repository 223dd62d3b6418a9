//! Sentence segmentation over a token stream
//!
//! Boundary rules:
//! - a run of `.`, `!` or `?` (plus any closing quotes or brackets) ends a
//!   sentence when followed by whitespace or the end of the buffer
//! - a single `.` is not a boundary after an abbreviation: a lone letter
//!   other than `I`, dotted initials (`U.S`, `e.g`), a common title (`Dr`),
//!   or a number when the `.` is the last buffered character (the next chunk
//!   may continue a decimal)
//! - a short all-caps token (`ETA`, `NASA`) is an abbreviation when the next
//!   word starts lowercase, and is held while the next word is not buffered
//! - a candidate with no letters or digits is not emitted on its own
//!
//! Whitespace between sentences is dropped; everything else is kept.

use std::collections::VecDeque;
use std::pin::Pin;

use futures::{Stream, StreamExt};

use super::{Segment, SequenceAllocator};
use crate::Result;

/// Titles that take a period mid-sentence
const TITLES: &[&str] = &["Mr", "Mrs", "Ms", "Dr", "St", "Jr", "Sr", "Prof", "vs"];

const fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

const fn is_closer(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '\u{201d}' | '\u{2019}')
}

/// Whether `token` is a short all-caps abbreviation
fn is_acronym(token: &str) -> bool {
    (2..=4).contains(&token.len()) && token.chars().all(|c| c.is_ascii_uppercase())
}

/// Whether a `.` after `token` is part of the token rather than a sentence end
///
/// `next` is the first non-space character after the `.`, if buffered.
fn is_abbreviation(token: &str, at_buffer_end: bool, next: Option<char>) -> bool {
    let token = token.trim_start_matches(|c: char| !c.is_alphanumeric());
    if token.is_empty() {
        return false;
    }

    let mut chars = token.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_uppercase() && c != 'I' {
            return true;
        }
    }

    if token.contains('.')
        && token
            .split('.')
            .all(|part| part.chars().count() == 1 && part.chars().all(char::is_alphabetic))
    {
        return true;
    }

    if TITLES.contains(&token) {
        return true;
    }

    if is_acronym(token) {
        return next.is_none_or(char::is_lowercase);
    }

    at_buffer_end && token.ends_with(|c: char| c.is_ascii_digit())
}

/// Accumulates streamed text and cuts it into sentences
pub struct SentenceSegmenter {
    buffer: String,
    sequence: SequenceAllocator,
}

impl SentenceSegmenter {
    /// Create a segmenter stamping segments from `sequence`
    #[must_use]
    pub fn new(sequence: SequenceAllocator) -> Self {
        Self {
            buffer: String::new(),
            sequence,
        }
    }

    /// Append a chunk and return every sentence it completes
    pub fn push(&mut self, chunk: &str) -> Vec<Segment> {
        self.buffer.push_str(chunk);

        let mut out = Vec::new();
        while let Some(end) = self.next_boundary() {
            let sentence = self.buffer[..end].trim().to_string();
            let rest = self.buffer[end..].trim_start().to_string();
            self.buffer = rest;
            out.push(Segment {
                sequence_number: self.sequence.allocate(),
                text: sentence,
                is_final: false,
            });
        }
        out
    }

    /// Flush whatever remains as the final segment
    pub fn finish(&mut self) -> Option<Segment> {
        let rest = std::mem::take(&mut self.buffer);
        let text = rest.trim();
        if text.is_empty() {
            return None;
        }
        Some(Segment {
            sequence_number: self.sequence.allocate(),
            text: text.to_string(),
            is_final: true,
        })
    }

    /// Text not yet emitted
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Byte offset just past the first sentence boundary in the buffer
    fn next_boundary(&self) -> Option<usize> {
        let chars: Vec<(usize, char)> = self.buffer.char_indices().collect();
        let mut i = 0;

        while i < chars.len() {
            let (pos, c) = chars[i];
            if !is_terminator(c) {
                i += 1;
                continue;
            }

            let mut last_term = i;
            while last_term + 1 < chars.len() && is_terminator(chars[last_term + 1].1) {
                last_term += 1;
            }
            let mut j = last_term;
            while j + 1 < chars.len() && is_closer(chars[j + 1].1) {
                j += 1;
            }

            let at_end = j + 1 == chars.len();
            let followed_by_space = !at_end && chars[j + 1].1.is_whitespace();
            if !at_end && !followed_by_space {
                i = j + 1;
                continue;
            }

            if c == '.' && last_term == i {
                let token = self.buffer[..pos]
                    .rsplit(char::is_whitespace)
                    .next()
                    .unwrap_or("");
                let next = chars[j + 1..]
                    .iter()
                    .map(|&(_, c)| c)
                    .find(|c| !c.is_whitespace());
                if is_abbreviation(token, at_end, next) {
                    i = j + 1;
                    continue;
                }
            }

            let end = chars[j].0 + chars[j].1.len_utf8();
            if self.buffer[..end].chars().any(char::is_alphanumeric) {
                return Some(end);
            }
            i = j + 1;
        }

        None
    }

    /// Segment a token stream lazily
    ///
    /// The returned stream ends when `tokens` ends, flushing the remainder
    /// as a final segment. A token error is yielded and ends the stream.
    pub fn segments<S>(self, tokens: S) -> impl Stream<Item = Result<Segment>> + Send + 'static
    where
        S: Stream<Item = Result<String>> + Send + 'static,
    {
        struct State<S> {
            tokens: Pin<Box<S>>,
            segmenter: SentenceSegmenter,
            ready: VecDeque<Segment>,
            done: bool,
        }

        let state = State {
            tokens: Box::pin(tokens),
            segmenter: self,
            ready: VecDeque::new(),
            done: false,
        };

        futures::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(segment) = st.ready.pop_front() {
                    return Some((Ok(segment), st));
                }
                if st.done {
                    return None;
                }

                match st.tokens.next().await {
                    Some(Ok(chunk)) => {
                        let segments = st.segmenter.push(&chunk);
                        st.ready.extend(segments);
                    }
                    Some(Err(e)) => {
                        st.done = true;
                        return Some((Err(e), st));
                    }
                    None => {
                        st.done = true;
                        st.ready.extend(st.segmenter.finish());
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment_all(chunks: &[&str]) -> Vec<Segment> {
        let mut segmenter = SentenceSegmenter::new(SequenceAllocator::new());
        let mut out: Vec<Segment> = chunks.iter().flat_map(|c| segmenter.push(c)).collect();
        out.extend(segmenter.finish());
        out
    }

    fn texts(segments: &[Segment]) -> Vec<&str> {
        segments.iter().map(|s| s.text.as_str()).collect()
    }

    #[test]
    fn decimal_is_not_a_boundary() {
        let segments = segment_all(&["It costs $3.5 million."]);
        assert_eq!(texts(&segments), vec!["It costs $3.5 million."]);
    }

    #[test]
    fn decimal_split_across_chunks() {
        let segments = segment_all(&["It costs $3.", "5 million. Cheap!"]);
        assert_eq!(texts(&segments), vec!["It costs $3.5 million.", "Cheap!"]);
    }

    #[test]
    fn number_then_space_ends_sentence() {
        let segments = segment_all(&["I counted to 3. Then I stopped."]);
        assert_eq!(texts(&segments), vec!["I counted to 3.", "Then I stopped."]);
    }

    #[test]
    fn several_sentences_in_one_chunk() {
        let segments = segment_all(&["Hi there! How are you? Fine."]);
        assert_eq!(texts(&segments), vec!["Hi there!", "How are you?", "Fine."]);
        let seqs: Vec<u64> = segments.iter().map(|s| s.sequence_number).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert!(!segments[1].is_final);
    }

    #[test]
    fn initials_and_titles_do_not_split() {
        let segments = segment_all(&["Ask Dr. Smith about J. R. Tolkien in the U.S. today. Okay."]);
        assert_eq!(
            texts(&segments),
            vec!["Ask Dr. Smith about J. R. Tolkien in the U.S. today.", "Okay."]
        );
    }

    #[test]
    fn acronym_mid_sentence_does_not_split() {
        let segments = segment_all(&["The NASA. launch has an ETA. of noon. Great."]);
        assert_eq!(
            texts(&segments),
            vec!["The NASA. launch has an ETA. of noon.", "Great."]
        );
    }

    #[test]
    fn acronym_before_capital_ends_sentence() {
        let segments = segment_all(&["I work at NASA. ", "It is fun."]);
        assert_eq!(texts(&segments), vec!["I work at NASA.", "It is fun."]);
    }

    #[test]
    fn acronym_waits_for_next_word() {
        let mut segmenter = SentenceSegmenter::new(SequenceAllocator::new());
        assert!(segmenter.push("Check the ETA. ").is_empty());
        let segments = segmenter.push("then leave.");
        assert_eq!(texts(&segments), vec!["Check the ETA. then leave."]);
    }

    #[test]
    fn pronoun_i_ends_sentence() {
        let segments = segment_all(&["So did I. Really."]);
        assert_eq!(texts(&segments), vec!["So did I.", "Really."]);
    }

    #[test]
    fn closing_quote_stays_with_sentence() {
        let segments = segment_all(&["He said \"wait...\" and left. Bye"]);
        assert_eq!(
            texts(&segments),
            vec!["He said \"wait...\"", "and left.", "Bye"]
        );
        assert!(segments[2].is_final);
    }

    #[test]
    fn trailing_text_flushed_as_final() {
        let mut segmenter = SentenceSegmenter::new(SequenceAllocator::new());
        assert!(segmenter.push("no terminator here").is_empty());
        let last = segmenter.finish().unwrap();
        assert_eq!(last.text, "no terminator here");
        assert!(last.is_final);
    }

    #[test]
    fn empty_remainder_emits_nothing() {
        let mut segmenter = SentenceSegmenter::new(SequenceAllocator::new());
        assert_eq!(segmenter.push("Done.  ").len(), 1);
        assert!(segmenter.finish().is_none());
    }

    #[test]
    fn punctuation_only_run_waits_for_text() {
        let segments = segment_all(&["Well.", "..", " so"]);
        assert_eq!(texts(&segments), vec!["Well.", ".. so"]);
    }

    #[tokio::test]
    async fn stream_yields_sentences_as_they_complete() {
        let tokens = futures::stream::iter(
            ["Why", " did", " the", " programmer", "..."]
                .into_iter()
                .map(|t| Ok(t.to_string())),
        );
        let segments: Vec<Segment> = SentenceSegmenter::new(SequenceAllocator::new())
            .segments(tokens)
            .map(|s| s.unwrap())
            .collect()
            .await;

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "Why did the programmer...");
    }

    #[tokio::test]
    async fn stream_flushes_remainder_as_final() {
        let tokens = futures::stream::iter(
            ["Sure.", " One moment"].into_iter().map(|t| Ok(t.to_string())),
        );
        let segments: Vec<Segment> = SentenceSegmenter::new(SequenceAllocator::new())
            .segments(tokens)
            .map(|s| s.unwrap())
            .collect()
            .await;

        assert_eq!(texts(&segments), vec!["Sure.", "One moment"]);
        assert!(!segments[0].is_final);
        assert!(segments[1].is_final);
    }
}
