//! Vector similarity utilities.
//!
//! Pure-Rust implementations of:
//! - Cosine similarity
//! - Ranked similarity search over fragments
//! - Centroids of merged embeddings

use mnemo_core::Fragment;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length, empty, or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Rank fragments by cosine similarity to a query embedding.
///
/// Returns `(similarity, fragment)` pairs sorted by descending similarity,
/// ties broken by fragment id. Fragments without embeddings or below
/// `min_score` are skipped.
pub fn vector_search(
    fragments: &[Fragment],
    query_embedding: &[f32],
    limit: usize,
    min_score: f32,
) -> Vec<(f32, Fragment)> {
    let mut scored: Vec<(f32, Fragment)> = fragments
        .iter()
        .filter_map(|fragment| {
            let emb = fragment.embedding.as_ref()?;
            let sim = cosine_similarity(emb, query_embedding);
            (sim >= min_score).then(|| (sim, fragment.clone()))
        })
        .collect();

    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
    scored.truncate(limit);
    scored
}

/// Mean of equally sized vectors. `None` when empty or lengths differ.
pub fn centroid<'a>(vectors: impl IntoIterator<Item = &'a [f32]>) -> Option<Vec<f32>> {
    let mut sum: Vec<f64> = Vec::new();
    let mut count = 0usize;
    for v in vectors {
        if count == 0 {
            sum = vec![0.0; v.len()];
        } else if v.len() != sum.len() {
            return None;
        }
        for (s, x) in sum.iter_mut().zip(v) {
            *s += *x as f64;
        }
        count += 1;
    }
    if count == 0 || sum.is_empty() {
        return None;
    }
    Some(sum.into_iter().map(|s| (s / count as f64) as f32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(id: &str, embedding: Option<Vec<f32>>) -> Fragment {
        let f = Fragment::new(format!("Content for {id}")).with_id(id);
        match embedding {
            Some(e) => f.with_embedding(e),
            None => f,
        }
    }

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite_vectors() {
        let sim = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((sim - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0, 0.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn cosine_known_value() {
        // [1,1] · [1,0] = 1, |[1,1]| = sqrt(2), |[1,0]| = 1
        let sim = cosine_similarity(&[1.0, 1.0], &[1.0, 0.0]);
        assert!((sim - 0.7071).abs() < 0.001);
    }

    #[test]
    fn vector_search_ranks_by_similarity() {
        let query = vec![1.0, 0.0, 0.0];
        let fragments = vec![
            fragment("a", Some(vec![0.0, 1.0, 0.0])), // orthogonal = 0
            fragment("b", Some(vec![1.0, 0.0, 0.0])), // identical = 1
            fragment("c", Some(vec![0.5, 0.5, 0.0])), // partial = ~0.707
            fragment("d", None),
        ];

        let results = vector_search(&fragments, &query, 10, 0.0);
        let ids: Vec<&str> = results.iter().map(|(_, f)| f.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn vector_search_respects_min_score_and_limit() {
        let query = vec![1.0, 0.0];
        let fragments: Vec<_> = (0..10)
            .map(|i| fragment(&format!("e{i}"), Some(vec![1.0, i as f32 * 0.1])))
            .collect();

        assert_eq!(vector_search(&fragments, &query, 3, 0.0).len(), 3);
        let strict = vector_search(&fragments, &query, 10, 0.999);
        assert!(strict.iter().all(|(s, _)| *s >= 0.999));
        assert_eq!(strict[0].1.id, "e0");
    }

    #[test]
    fn centroid_averages() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        assert_eq!(centroid([&a[..], &b[..]]), Some(vec![0.5, 0.5]));
        assert_eq!(centroid(Vec::<&[f32]>::new()), None);
        assert_eq!(centroid([&a[..], &[1.0f32][..]]), None);
    }
}
