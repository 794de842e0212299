/// Trailing marker a client shows after the accumulation while fragments are
/// still arriving. Dropped once the stream ends.
pub const CURSOR: char = '▌';

/// Appends one fragment. Not idempotent: every call grows the text.
pub fn append(mut current: String, fragment: &str) -> String {
    current.push_str(fragment);
    current
}

/// Growing concatenation of every fragment seen so far, in arrival order.
#[derive(Debug, Default, Clone)]
pub struct DisplayAccumulator {
    text: String,
}

impl DisplayAccumulator {
    pub fn push(&mut self, fragment: &str) {
        self.text = append(std::mem::take(&mut self.text), fragment);
    }

    pub fn text_len(&self) -> usize {
        self.text.len()
    }

    /// Final value once the stream has ended; no cursor.
    pub fn finish(self) -> String {
        self.text
    }
}
