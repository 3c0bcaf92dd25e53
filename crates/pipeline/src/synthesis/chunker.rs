//! Text chunker for streamed synthesis
//!
//! Flushes at sentence boundaries as soon as they are confirmed by the
//! following whitespace. Without one, a chunk is cut once the buffer
//! reaches the current threshold of the length schedule, at the last
//! clause break, else the last word break.

use unicode_segmentation::UnicodeSegmentation;

const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', '…', '。', '！', '？'];
const CLOSING_CHARS: &[char] = &['"', '\'', '”', '’', ')', ']'];
const CLAUSE_BREAKS: &[char] = &[',', ';', ':', '—', '–'];

#[derive(Debug, Clone)]
pub struct TextChunker {
    buffer: String,
    /// Grapheme thresholds per chunk index; the last one repeats
    schedule: Vec<usize>,
    emitted: usize,
}

impl TextChunker {
    pub fn new(schedule: Vec<usize>) -> Self {
        let schedule: Vec<usize> = schedule.into_iter().filter(|&n| n > 0).collect();
        let schedule = if schedule.is_empty() {
            voice_loop_config::constants::synthesis::CHUNK_LENGTH_SCHEDULE.to_vec()
        } else {
            schedule
        };

        Self {
            buffer: String::new(),
            schedule,
            emitted: 0,
        }
    }

    /// Add a fragment, returning any chunks that are ready
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.buffer.push_str(fragment);
        let mut ready = Vec::new();

        loop {
            if let Some(end) = sentence_end(&self.buffer) {
                self.emit(end, &mut ready);
                continue;
            }

            let threshold = self.current_threshold();
            let mut graphemes = self.buffer.grapheme_indices(true);
            let limit = match graphemes.nth(threshold) {
                Some((idx, _)) => idx,
                None if self.buffer.graphemes(true).count() >= threshold => self.buffer.len(),
                None => break,
            };

            let head = &self.buffer[..limit];
            let cut = clause_end(head).or_else(|| word_end(head)).unwrap_or(limit);
            self.emit(cut, &mut ready);
        }

        ready
    }

    /// Flush whatever is left at end of input
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            self.emitted += 1;
            Some(rest.to_string())
        }
    }

    /// Buffered text not yet emitted
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn current_threshold(&self) -> usize {
        let idx = self.emitted.min(self.schedule.len() - 1);
        self.schedule[idx]
    }

    fn emit(&mut self, end: usize, ready: &mut Vec<String>) {
        let rest = self.buffer.split_off(end);
        let chunk = std::mem::replace(&mut self.buffer, rest.trim_start().to_string());
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            ready.push(chunk.to_string());
            self.emitted += 1;
        }
    }
}

/// Byte offset just past the first confirmed sentence end
fn sentence_end(text: &str) -> Option<usize> {
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !SENTENCE_TERMINATORS.contains(&c) {
            continue;
        }

        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if SENTENCE_TERMINATORS.contains(&next) || CLOSING_CHARS.contains(&next) {
                end = j + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }

        // "3.5" or a terminator at the end of the buffer is not a boundary yet
        if matches!(chars.peek(), Some(&(_, next)) if next.is_whitespace()) {
            return Some(end);
        }
    }

    None
}

/// Byte offset just past the last clause break followed by whitespace
fn clause_end(text: &str) -> Option<usize> {
    let mut found = None;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if CLAUSE_BREAKS.contains(&c) && matches!(chars.peek(), Some(&(_, n)) if n.is_whitespace()) {
            found = Some(i + c.len_utf8());
        }
    }

    found
}

fn word_end(text: &str) -> Option<usize> {
    text.rfind(char::is_whitespace).filter(|&i| i > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(chunker: &mut TextChunker, fragments: &[&str]) -> Vec<String> {
        let mut out: Vec<String> = fragments.iter().flat_map(|f| chunker.push(f)).collect();
        out.extend(chunker.finish());
        out
    }

    #[test]
    fn test_sentence_boundaries_across_fragments() {
        let mut chunker = TextChunker::new(vec![80]);
        assert!(chunker.push("Hello th").is_empty());
        assert!(chunker.push("ere.").is_empty());
        assert_eq!(chunker.push(" How are"), vec!["Hello there."]);
        assert_eq!(chunker.pending(), "How are");
        assert_eq!(chunker.finish().as_deref(), Some("How are"));
        assert!(chunker.finish().is_none());
    }

    #[test]
    fn test_decimals_and_quotes() {
        let mut chunker = TextChunker::new(vec![200]);
        let chunks = feed(
            &mut chunker,
            &["It is 3.5 degrees. ", "He said \"stop!\" Then ", "left"],
        );
        assert_eq!(chunks, vec!["It is 3.5 degrees.", "He said \"stop!\"", "Then left"]);
    }

    #[test]
    fn test_threshold_cuts_at_word_boundary() {
        let mut chunker = TextChunker::new(vec![10, 20]);
        let chunks = chunker.push("one two three four five six");
        assert_eq!(chunks, vec!["one two"]);
        assert_eq!(chunker.pending(), "three four five six");
        assert_eq!(chunker.finish().as_deref(), Some("three four five six"));
    }

    #[test]
    fn test_threshold_prefers_clause_break() {
        let mut chunker = TextChunker::new(vec![24]);
        let chunks = chunker.push("Well, I think we could go later today");
        assert_eq!(chunks, vec!["Well,", "I think we could go"]);
        assert_eq!(chunker.pending(), "later today");
    }

    #[test]
    fn test_schedule_last_threshold_repeats() {
        let mut chunker = TextChunker::new(vec![5]);
        let chunks = feed(&mut chunker, &["aaaa bbbb cccc dddd"]);
        assert_eq!(chunks, vec!["aaaa", "bbbb", "cccc", "dddd"]);
    }

    #[test]
    fn test_unbroken_text_is_cut_at_threshold() {
        let mut chunker = TextChunker::new(vec![4]);
        assert_eq!(chunker.push("abcdefghij"), vec!["abcd", "efgh"]);
        assert_eq!(chunker.finish().as_deref(), Some("ij"));
    }

    #[test]
    fn test_empty_schedule_falls_back_to_default() {
        let mut chunker = TextChunker::new(vec![]);
        assert!(chunker.push(&"word ".repeat(15)).is_empty());
        assert_eq!(chunker.push("word word").len(), 1);
    }
}
