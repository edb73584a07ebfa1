//! Sentence segmentation for synthesis.
//!
//! Completions arrive token by token; speech must leave in whole sentences.
//! The splitter buffers text and releases a sentence at every terminator
//! followed by whitespace (or end of buffer), or when the buffer outgrows
//! the overflow length, splitting at the last word boundary.

const TERMINATORS: &[char] = &['.', '?', '!', ';', '。', '？', '！', '；'];

/// Incremental sentence splitter.
#[derive(Debug)]
pub struct SentenceSplitter {
    buffer: String,
    max_chars: usize,
}

impl SentenceSplitter {
    pub fn new(max_chars: usize) -> Self {
        Self {
            buffer: String::new(),
            max_chars,
        }
    }

    /// Feed a text fragment; returns the sentences it completed.
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.buffer.push_str(fragment);
        let mut sentences = Vec::new();
        loop {
            match self.take_one() {
                Some(sentence) => sentences.push(sentence),
                None => break,
            }
        }
        sentences
    }

    /// Flush whatever remains; used when the stream ends mid-sentence.
    pub fn flush(&mut self) -> Option<String> {
        let rest = self.buffer.trim().to_string();
        self.buffer.clear();
        if rest.is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    /// Pending (incomplete) text.
    pub fn pending(&self) -> &str {
        self.buffer.trim_start()
    }

    fn take_one(&mut self) -> Option<String> {
        let chars: Vec<char> = self.buffer.chars().collect();

        // Terminator followed by whitespace (end of buffer does not count:
        // the next token may continue an abbreviation or a number)
        for i in 0..chars.len() {
            if TERMINATORS.contains(&chars[i]) {
                let next = chars.get(i + 1);
                // CJK terminators need no following space; ASCII ones at the
                // buffer end wait for more tokens (abbreviations, decimals)
                let is_boundary = match next {
                    Some(c) => c.is_whitespace() || !chars[i].is_ascii(),
                    None => !chars[i].is_ascii(),
                };
                if is_boundary {
                    return Some(self.split_off_at(i + 1));
                }
            }
        }

        // Overflow: cut at the last word boundary before the limit
        if chars.len() > self.max_chars {
            let cut = chars[..self.max_chars]
                .iter()
                .rposition(|c| c.is_whitespace())
                .unwrap_or(self.max_chars);
            return Some(self.split_off_at(cut));
        }

        None
    }

    fn split_off_at(&mut self, char_index: usize) -> String {
        let byte_index = self
            .buffer
            .char_indices()
            .nth(char_index)
            .map(|(i, _)| i)
            .unwrap_or(self.buffer.len());
        let rest = self.buffer.split_off(byte_index);
        let sentence = self.buffer.trim().to_string();
        self.buffer = rest;
        sentence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_all(fragments: &[&str]) -> Vec<String> {
        let mut splitter = SentenceSplitter::new(120);
        let mut sentences = Vec::new();
        for fragment in fragments {
            sentences.extend(splitter.push(fragment));
        }
        if let Some(rest) = splitter.flush() {
            sentences.push(rest);
        }
        sentences
    }

    #[test]
    fn test_splits_on_terminators() {
        let sentences = split_all(&["Hello there. How can I help you? "]);
        assert_eq!(sentences, vec!["Hello there.", "How can I help you?"]);
    }

    #[test]
    fn test_incremental_tokens() {
        let sentences = split_all(&["Bonj", "our madame. Je vous ", "écoute. "]);
        assert_eq!(sentences, vec!["Bonjour madame.", "Je vous écoute."]);
    }

    #[test]
    fn test_terminator_at_stream_end_needs_flush() {
        let mut splitter = SentenceSplitter::new(120);
        assert!(splitter.push("Merci beaucoup.").is_empty());
        assert_eq!(splitter.flush().as_deref(), Some("Merci beaucoup."));
    }

    #[test]
    fn test_decimal_not_split() {
        let sentences = split_all(&["Le montant est 3.5 euros. Voilà. "]);
        assert_eq!(sentences, vec!["Le montant est 3.5 euros.", "Voilà."]);
    }

    #[test]
    fn test_semicolon_boundary() {
        let sentences = split_all(&["First part; second part. "]);
        assert_eq!(sentences, vec!["First part;", "second part."]);
    }

    #[test]
    fn test_cjk_terminators() {
        let sentences = split_all(&["你好。很高兴认识你。"]);
        assert_eq!(sentences, vec!["你好。", "很高兴认识你。"]);
    }

    #[test]
    fn test_overflow_splits_at_word_boundary() {
        let long = "word ".repeat(40); // 200 chars, no terminator
        let mut splitter = SentenceSplitter::new(120);
        let sentences = splitter.push(&long);
        assert!(!sentences.is_empty());
        for sentence in &sentences {
            assert!(sentence.chars().count() <= 120);
            assert!(sentence.ends_with("word"));
        }
    }

    #[test]
    fn test_sentence_order_preserved() {
        let sentences = split_all(&["One. Two. Three. Four. "]);
        assert_eq!(sentences, vec!["One.", "Two.", "Three.", "Four."]);
    }
}
