use std::str::CharIndices;

/// Iterator over the words of a text, where a word is a maximal run of
/// Unicode letters and digits. Yields borrowed subslices in input order
/// and never normalizes case.
pub struct Tokens<'a> {
    text: &'a str,
    chars: CharIndices<'a>,
    max_len: Option<usize>,
}

/// Tokenize `text` with no length limit.
pub fn tokenize(text: &str) -> Tokens<'_> {
    Tokens {
        text,
        chars: text.char_indices(),
        max_len: None,
    }
}

/// Tokenize `text`, silently dropping tokens longer than `max_len`
/// code points.
pub fn tokenize_bounded(text: &str, max_len: usize) -> Tokens<'_> {
    Tokens {
        text,
        chars: text.char_indices(),
        max_len: Some(max_len),
    }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        while let Some((start, ch)) = self.chars.next() {
            if !ch.is_alphanumeric() {
                continue;
            }
            // Code-point count, not byte length
            let mut count = 1usize;
            let mut end = self.text.len();
            for (pos, c) in self.chars.by_ref() {
                if c.is_alphanumeric() {
                    count += 1;
                } else {
                    end = pos;
                    break;
                }
            }
            if self.max_len.map_or(true, |max| count <= max) {
                return Some(&self.text[start..end]);
            }
        }
        None
    }
}
