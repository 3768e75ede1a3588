/// Running display buffer for one generation.
///
/// The model streams either a JSON payload or a short plain-text line. JSON
/// fragments accumulate; the first plain-text fragment becomes the status line
/// and later plain-text fragments are dropped so the two never interleave.
#[derive(Debug, Default, Clone)]
pub struct StreamAggregator {
    buffer: String,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Feeds one fragment. Returns whether the buffer changed.
    pub fn push(&mut self, fragment: &str) -> bool {
        if fragment.trim_start().starts_with('{') || self.buffer.trim_start().starts_with('{') {
            self.buffer.push_str(fragment);
            return !fragment.is_empty();
        }
        if self.buffer.trim().is_empty() {
            self.buffer.clear();
            self.buffer.push_str(fragment);
            return true;
        }
        false
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }
}
