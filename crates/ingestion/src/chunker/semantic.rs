use chunkforge_common::{AppError, Embedder, Result};
use regex_lite::Regex;
use std::sync::Arc;

/// Groups sentences into chunks, starting a new chunk wherever the embedding
/// distance between neighbouring sentences jumps above a percentile of all
/// neighbour distances in the document.
pub struct SemanticChunker {
    embedder: Arc<Embedder>,
    buffer_size: usize,
    breakpoint_percentile: f64,
    sentence_end: Regex,
}

impl SemanticChunker {
    pub fn new(embedder: Arc<Embedder>, buffer_size: usize, breakpoint_percentile: f64) -> Result<Self> {
        if !(0.0..=100.0).contains(&breakpoint_percentile) {
            return Err(AppError::configuration(format!(
                "semantic breakpoint percentile must be within 0..=100, got {}",
                breakpoint_percentile
            )));
        }
        let sentence_end = Regex::new(r"[.?!]\s+")
            .map_err(|e| AppError::configuration(format!("invalid sentence pattern: {}", e)))?;
        Ok(Self {
            embedder,
            buffer_size,
            breakpoint_percentile,
            sentence_end,
        })
    }

    fn sentences<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut sentences = Vec::new();
        let mut start = 0;
        for m in self.sentence_end.find_iter(text) {
            sentences.push(&text[start..m.start() + 1]);
            start = m.end();
        }
        sentences.push(&text[start..]);
        sentences
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Each sentence joined with `buffer_size` neighbours on either side
    fn windows(&self, sentences: &[&str]) -> Vec<String> {
        (0..sentences.len())
            .map(|i| {
                let lo = i.saturating_sub(self.buffer_size);
                let hi = (i + self.buffer_size + 1).min(sentences.len());
                sentences[lo..hi].join(" ")
            })
            .collect()
    }

    pub async fn split(&self, text: &str) -> Result<Vec<String>> {
        let sentences = self.sentences(text);
        if sentences.len() <= 1 {
            return Ok(sentences.into_iter().map(str::to_string).collect());
        }

        let embeddings = self.embedder.embed_batch(&self.windows(&sentences)).await?;
        let distances: Vec<f64> = embeddings
            .windows(2)
            .map(|pair| cosine_distance(&pair[0], &pair[1]))
            .collect();
        let threshold = percentile(&distances, self.breakpoint_percentile);

        let mut chunks = Vec::new();
        let mut start = 0;
        for (index, distance) in distances.iter().enumerate() {
            if *distance > threshold {
                chunks.push(sentences[start..=index].join(" "));
                start = index + 1;
            }
        }
        if start < sentences.len() {
            chunks.push(sentences[start..].join(" "));
        }

        tracing::debug!(
            sentences = sentences.len(),
            chunks = chunks.len(),
            threshold,
            "Semantic boundaries placed"
        );
        Ok(chunks)
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norm_a = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

/// Percentile with linear interpolation between closest ranks
fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}
