use sha2::{Digest, Sha256};

pub const EMBEDDING_MODEL: &str = "sha256-embedding";
pub const DEFAULT_DIMENSIONS: usize = 16;

/// Deterministic, L2-normalised pseudo-embedding of `text`.
///
/// Components are drawn from a SHA-256 counter stream seeded by the text, so
/// equal inputs always map to equal vectors of any requested length.
pub fn embed(text: &str, dimensions: usize) -> Vec<f32> {
    let mut values = Vec::with_capacity(dimensions);
    let mut counter: u32 = 0;

    while values.len() < dimensions {
        let mut hasher = Sha256::new();
        hasher.update(counter.to_le_bytes());
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();

        for pair in digest.chunks_exact(2) {
            if values.len() == dimensions {
                break;
            }
            let raw = u16::from_le_bytes([pair[0], pair[1]]);
            // map to [-1, 1]
            values.push(raw as f32 / u16::MAX as f32 * 2.0 - 1.0);
        }
        counter += 1;
    }

    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|v| *v /= norm);
    }
    values
}
