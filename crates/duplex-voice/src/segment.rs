/// Incremental sentence segmentation for streamed model output.
///
/// Deltas accumulate in a buffer. Whenever the buffer holds terminal
/// punctuation (`.`, `!`, `?`) followed by whitespace, everything up to the
/// *last* such boundary is flushed as one segment and the remainder is kept.
/// A boundary always requires trailing whitespace, so a segment never ends
/// mid-word or inside a decimal like `3.5`.
#[derive(Debug, Default, Clone)]
pub struct SentenceSegmenter {
    buffer: String,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a delta and returns the completed text, if any.
    pub fn push(&mut self, delta: &str) -> Option<String> {
        self.buffer.push_str(delta);
        let end = last_boundary(&self.buffer)?;
        let rest = self.buffer.split_off(end);
        let flushed = std::mem::replace(&mut self.buffer, rest.trim_start().to_string());
        let flushed = flushed.trim();
        if flushed.is_empty() {
            None
        } else {
            Some(flushed.to_string())
        }
    }

    /// Flushes whatever is left once the model stream ends.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }

    /// Text received but not yet flushed.
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}

/// Byte offset just past the whitespace that follows the last terminal
/// punctuation mark.
fn last_boundary(text: &str) -> Option<usize> {
    let mut boundary = None;
    let mut chars = text.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(ws_at, next)) = chars.peek() {
                if next.is_whitespace() {
                    boundary = Some(ws_at + next.len_utf8());
                }
            }
        }
    }
    boundary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(deltas: &[&str]) -> Vec<String> {
        let mut segmenter = SentenceSegmenter::new();
        let mut out: Vec<String> = deltas.iter().filter_map(|d| segmenter.push(d)).collect();
        out.extend(segmenter.finish());
        out
    }

    #[test]
    fn flushes_sentences_in_order() {
        assert_eq!(
            run(&["Hello ", "world. ", "How are you?"]),
            vec!["Hello world.".to_string(), "How are you?".to_string()]
        );
    }

    #[test]
    fn flushes_up_to_last_boundary() {
        let mut segmenter = SentenceSegmenter::new();
        assert_eq!(
            segmenter.push("One. Two! Three"),
            Some("One. Two!".to_string())
        );
        assert_eq!(segmenter.pending(), "Three");
    }

    #[test]
    fn waits_for_whitespace_after_punctuation() {
        let mut segmenter = SentenceSegmenter::new();
        assert_eq!(segmenter.push("It costs 3."), None);
        assert_eq!(segmenter.push("5 dollars. "), Some("It costs 3.5 dollars.".to_string()));
        assert_eq!(segmenter.finish(), None);
    }

    #[test]
    fn streamed_greeting_flushes_at_exclamation() {
        assert_eq!(
            run(&["Hi there!", " How", " can I", " help?"]),
            vec!["Hi there!".to_string(), "How can I help?".to_string()]
        );
    }

    #[test]
    fn whitespace_only_input_flushes_nothing() {
        assert!(run(&["   ", "\n"]).is_empty());
    }

    #[test]
    fn handles_multibyte_text() {
        assert_eq!(
            run(&["Ça va? ", "Très bien."]),
            vec!["Ça va?".to_string(), "Très bien.".to_string()]
        );
    }
}
