use chunkforge_common::{AppError, Result};

/// Sliding character window. Deterministic, no awareness of text structure.
#[derive(Debug, Clone)]
pub struct FixedWidthChunker {
    window: usize,
    overlap: usize,
}

impl FixedWidthChunker {
    pub fn new(window: usize, overlap: usize) -> Result<Self> {
        if window == 0 || overlap >= window {
            return Err(AppError::configuration(format!(
                "char-split overlap ({}) must be smaller than its window ({})",
                overlap, window
            )));
        }
        Ok(Self { window, overlap })
    }

    /// Windows of `window` chars, each starting `window - overlap` after the
    /// previous one. Yields `ceil((L - O) / (W - O))` spans for `L > O`; the
    /// last may be short.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let total_len = chars.len();
        let step = self.window - self.overlap;

        let mut chunks = Vec::with_capacity(total_len.saturating_sub(self.overlap).div_ceil(step));
        let mut start = 0;
        loop {
            let end = (start + self.window).min(total_len);
            chunks.push(chars[start..end].iter().collect());
            if end == total_len {
                break;
            }
            start += step;
        }
        chunks
    }
}
