//! Transcript aggregation.
//!
//! The stream delivers transcript text in arbitrary fragments
//! (`"Hel"`, `"lo."`, `" How"`, …).  [`TranscriptBuffer`] glues fragments
//! onto the current segment until that segment ends a sentence, so the
//! caller sees whole, progressively revealed sentences instead of one line
//! per fragment.

/// Characters that close a sentence.
const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', '…', '。', '！', '？'];

// ---------------------------------------------------------------------------
// TranscriptBuffer
// ---------------------------------------------------------------------------

/// Ordered sentence segments built from transcript fragments.
///
/// ```rust
/// use live_voice::session::TranscriptBuffer;
///
/// let mut transcript = TranscriptBuffer::new();
/// transcript.push("Hel");
/// transcript.push("lo.");
/// assert_eq!(transcript.segments(), ["Hello."]);
///
/// transcript.push("How");
/// assert_eq!(transcript.segments(), ["Hello.", "How"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptBuffer {
    segments: Vec<String>,
}

impl TranscriptBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `fragment` to the open segment, or start a new segment when the
    /// last one already ends a sentence.  Empty fragments are ignored.
    pub fn push(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }

        match self.segments.last_mut() {
            Some(last) if !ends_sentence(last) => last.push_str(fragment),
            _ => {
                let trimmed = fragment.trim_start();
                if !trimmed.is_empty() {
                    self.segments.push(trimmed.to_string());
                }
            }
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

fn ends_sentence(segment: &str) -> bool {
    segment
        .trim_end()
        .chars()
        .last()
        .is_some_and(|c| SENTENCE_TERMINATORS.contains(&c))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_coalesce_into_sentences() {
        let mut t = TranscriptBuffer::new();
        t.push("Hel");
        t.push("lo.");
        assert_eq!(t.segments(), ["Hello."]);

        t.push("How");
        assert_eq!(t.segments(), ["Hello.", "How"]);
    }

    #[test]
    fn unterminated_segment_keeps_growing() {
        let mut t = TranscriptBuffer::new();
        t.push("How");
        t.push(" are");
        t.push(" you?");
        assert_eq!(t.segments(), ["How are you?"]);
        t.push("Fine");
        assert_eq!(t.segments(), ["How are you?", "Fine"]);
    }

    #[test]
    fn every_terminator_closes_a_segment() {
        for term in ["!", "?", "…", "。", "！", "？"] {
            let mut t = TranscriptBuffer::new();
            t.push(&format!("Done{term}"));
            t.push("Next");
            assert_eq!(t.len(), 2, "terminator {term:?}");
        }
    }

    #[test]
    fn trailing_whitespace_after_terminator_still_closes() {
        let mut t = TranscriptBuffer::new();
        t.push("Hi. ");
        t.push(" There");
        assert_eq!(t.segments(), ["Hi. ", "There"]);
    }

    #[test]
    fn empty_fragments_are_ignored() {
        let mut t = TranscriptBuffer::new();
        t.push("");
        t.push("   ");
        assert!(t.is_empty());
    }

    #[test]
    fn each_sentence_is_its_own_segment() {
        let mut t = TranscriptBuffer::new();
        t.push("One.");
        t.push("Two.");
        assert_eq!(t.segments(), ["One.", "Two."]);
        assert_eq!(t.len(), 2);
    }
}
