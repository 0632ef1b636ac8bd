//! Near-duplicate removal by embedding similarity.
//!
//! Articles are embedded from their title and body, then compared against
//! every vector admitted so far in the run. A candidate whose best cosine
//! similarity exceeds the threshold is dropped; the article admitted first
//! always survives. Comparison is a linear scan, which is fine for run sizes
//! bounded by provider result limits.
//!
//! An embedding failure never aborts the run: the article is kept without a
//! vector, so it can neither be flagged nor flag later articles.

use crate::embedding::{Embedder, Embedding};
use crate::error::EmbeddingError;
use crate::models::Article;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Cosine similarity of two vectors.
///
/// Returns 0.0 when either vector has zero norm or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    let denom = norm_a * norm_b;
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// Vectors of the articles admitted so far in one run.
///
/// Each entry points at the admitted article it was computed from. The
/// first vector inserted fixes the dimension for the rest of the run.
#[derive(Debug, Default)]
pub struct SimilarityIndex {
    entries: Vec<(usize, Embedding)>,
    dimension: Option<usize>,
}

impl SimilarityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.dimension = None;
    }

    pub fn check_dimension(&self, vector: &[f32]) -> Result<(), EmbeddingError> {
        match self.dimension {
            Some(expected) if expected != vector.len() => Err(EmbeddingError::Dimension {
                expected,
                actual: vector.len(),
            }),
            _ => Ok(()),
        }
    }

    pub fn insert(&mut self, article_idx: usize, vector: Embedding) {
        self.dimension.get_or_insert(vector.len());
        self.entries.push((article_idx, vector));
    }

    /// Best match for `vector`: the article index and its similarity.
    ///
    /// Ties go to the earlier entry.
    pub fn nearest(&self, vector: &[f32]) -> Option<(usize, f32)> {
        self.entries
            .iter()
            .map(|(idx, v)| (*idx, cosine_similarity(vector, v)))
            .fold(None, |best, (idx, sim)| match best {
                Some((_, best_sim)) if best_sim >= sim => best,
                _ => Some((idx, sim)),
            })
    }
}

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Admitted,
    /// Kept without a similarity check because it could not be embedded.
    AdmittedUnchecked(EmbeddingError),
    Duplicate { of: usize, similarity: f32 },
}

/// A dropped article and the admitted one it duplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateRecord {
    pub provider: String,
    pub title: String,
    pub duplicate_of_provider: String,
    pub duplicate_of_title: String,
    pub similarity: f32,
}

/// Result of deduplicating one run's articles.
#[derive(Debug, Default)]
pub struct DedupReport {
    /// Survivors, in admission order.
    pub admitted: Vec<Article>,
    pub duplicates: Vec<DuplicateRecord>,
    /// Survivors that skipped the similarity check.
    pub unchecked: usize,
}

/// First-seen-wins duplicate filter for one run.
///
/// Build a fresh engine per run; [`DedupEngine::reset`] exists for callers
/// that reuse one.
pub struct DedupEngine {
    embedder: Arc<dyn Embedder>,
    threshold: f32,
    index: SimilarityIndex,
    admitted: Vec<Article>,
}

impl std::fmt::Debug for DedupEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupEngine")
            .field("embedder", &self.embedder.id())
            .field("threshold", &self.threshold)
            .field("indexed", &self.index.len())
            .field("admitted", &self.admitted.len())
            .finish()
    }
}

impl DedupEngine {
    /// Create an empty engine.
    ///
    /// # Arguments
    ///
    /// * `embedder` - Backend that turns an article's title and body into a
    ///   vector
    /// * `threshold` - Cosine similarity strictly above which a candidate is a
    ///   duplicate; `1.0` therefore keeps even exact copies
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let engine = DedupEngine::new(Arc::new(HashEmbedder::new(384)), 0.95);
    /// let report = engine.deduplicate(merged).await;
    /// ```
    pub fn new(embedder: Arc<dyn Embedder>, threshold: f32) -> Self {
        Self {
            embedder,
            threshold,
            index: SimilarityIndex::new(),
            admitted: Vec::new(),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Forget everything admitted so far.
    pub fn reset(&mut self) {
        self.index.clear();
        self.admitted.clear();
    }

    pub fn admitted(&self) -> &[Article] {
        &self.admitted
    }

    async fn vector_for(&self, article: &Article) -> Result<Embedding, EmbeddingError> {
        let vector = self.embedder.embed(&article.embedding_text()).await?;
        self.index.check_dimension(&vector)?;
        Ok(vector)
    }

    fn duplicate_of(&self, vector: &[f32]) -> Option<(usize, f32)> {
        self.index
            .nearest(vector)
            .filter(|(_, similarity)| *similarity > self.threshold)
    }

    /// Whether `article` duplicates something already admitted.
    ///
    /// Does not modify the index.
    pub async fn is_duplicate(&self, article: &Article) -> Result<bool, EmbeddingError> {
        let vector = self.vector_for(article).await?;
        Ok(self.duplicate_of(&vector).is_some())
    }

    /// Embed `article` and keep it unless it duplicates an admitted article.
    ///
    /// The candidate is compared against every article admitted so far and
    /// the closest one decides. A candidate that cannot be embedded, or whose
    /// vector has the wrong dimension, is kept without a check.
    ///
    /// # Arguments
    ///
    /// * `article` - The next candidate, in merge order
    ///
    /// # Returns
    ///
    /// What happened to the candidate. For [`Admission::Duplicate`], `of`
    /// indexes [`DedupEngine::admitted`].
    pub async fn admit(&mut self, article: Article) -> Admission {
        let vector = match self.vector_for(&article).await {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    provider = %article.provider,
                    title = %article.title,
                    error = %e,
                    "Embedding failed; admitting without dedup check"
                );
                self.admitted.push(article);
                return Admission::AdmittedUnchecked(e);
            }
        };

        if let Some((of, similarity)) = self.duplicate_of(&vector) {
            debug!(
                provider = %article.provider,
                title = %article.title,
                duplicate_of = %self.admitted[of].title,
                similarity,
                "Dropping near-duplicate"
            );
            return Admission::Duplicate { of, similarity };
        }

        let idx = self.admitted.len();
        self.admitted.push(article);
        self.index.insert(idx, vector);
        Admission::Admitted
    }

    /// Run every article through [`DedupEngine::admit`] in order.
    #[instrument(level = "info", skip_all, fields(candidates = articles.len(), threshold = self.threshold))]
    pub async fn deduplicate(mut self, articles: Vec<Article>) -> DedupReport {
        let mut duplicates = Vec::new();
        let mut unchecked = 0;

        for article in articles {
            let provider = article.provider.clone();
            let title = article.title.clone();
            match self.admit(article).await {
                Admission::Admitted => {}
                Admission::AdmittedUnchecked(_) => unchecked += 1,
                Admission::Duplicate { of, similarity } => {
                    let original = &self.admitted[of];
                    duplicates.push(DuplicateRecord {
                        provider,
                        title,
                        duplicate_of_provider: original.provider.clone(),
                        duplicate_of_title: original.title.clone(),
                        similarity,
                    });
                }
            }
        }

        info!(
            admitted = self.admitted.len(),
            duplicates = duplicates.len(),
            unchecked,
            "Deduplication finished"
        );
        DedupReport {
            admitted: self.admitted,
            duplicates,
            unchecked,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::TableEmbedder;
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::models::ArticleDraft;
    use itertools::Itertools;
    use serde_json::json;

    fn article(provider: &str, title: &str) -> Article {
        ArticleDraft {
            title: Some(title.to_string()),
            published: Some("2025-05-06T00:00:00Z".to_string()),
            ..ArticleDraft::new(provider, json!({}))
        }
        .finish()
        .unwrap()
    }

    fn clustered() -> TableEmbedder {
        TableEmbedder::new(&[
            ("a1", vec![1.0, 0.0, 0.0]),
            ("a2", vec![0.99, 0.01, 0.0]),
            ("b1", vec![0.0, 1.0, 0.0]),
            ("c1", vec![0.0, 0.0, 1.0]),
            ("c2", vec![0.0, 0.02, 1.0]),
            ("c3", vec![0.01, 0.0, 0.98]),
        ])
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_nearest_prefers_earlier_on_tie() {
        let mut index = SimilarityIndex::new();
        index.insert(0, vec![1.0, 0.0]);
        index.insert(1, vec![1.0, 0.0]);
        assert_eq!(index.nearest(&[1.0, 0.0]).map(|(i, _)| i), Some(0));
        assert!(SimilarityIndex::new().nearest(&[1.0]).is_none());
    }

    #[tokio::test]
    async fn test_first_seen_wins() {
        let mut engine = DedupEngine::new(Arc::new(clustered()), 0.95);
        assert_eq!(engine.admit(article("A", "a1")).await, Admission::Admitted);
        let second = engine.admit(article("B", "a2")).await;
        assert!(matches!(second, Admission::Duplicate { of: 0, similarity } if similarity > 0.95));
        assert_eq!(engine.admitted().len(), 1);
        assert_eq!(engine.admitted()[0].provider, "A");
    }

    #[tokio::test]
    async fn test_is_duplicate_does_not_mutate() {
        let mut engine = DedupEngine::new(Arc::new(clustered()), 0.95);
        engine.admit(article("A", "a1")).await;
        assert!(engine.is_duplicate(&article("B", "a2")).await.unwrap());
        assert!(!engine.is_duplicate(&article("B", "b1")).await.unwrap());
        assert_eq!(engine.admitted().len(), 1);
    }

    #[tokio::test]
    async fn test_embedding_failure_admits_unchecked() {
        let mut engine = DedupEngine::new(Arc::new(clustered()), 0.95);
        engine.admit(article("A", "a1")).await;
        let outcome = engine.admit(article("A", "unknown")).await;
        assert!(matches!(outcome, Admission::AdmittedUnchecked(EmbeddingError::Unavailable(_))));
        assert_eq!(engine.admitted().len(), 2);
        // the unchecked article is not in the index
        let outcome = engine.admit(article("B", "a2")).await;
        assert!(matches!(outcome, Admission::Duplicate { of: 0, .. }));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_admits_unchecked() {
        let embedder = TableEmbedder::new(&[("x", vec![1.0, 0.0]), ("y", vec![1.0, 0.0, 0.0])]);
        let mut engine = DedupEngine::new(Arc::new(embedder), 0.95);
        engine.admit(article("A", "x")).await;
        let outcome = engine.admit(article("A", "y")).await;
        assert_eq!(
            outcome,
            Admission::AdmittedUnchecked(EmbeddingError::Dimension { expected: 2, actual: 3 })
        );
    }

    #[tokio::test]
    async fn test_deduplicate_report() {
        let engine = DedupEngine::new(Arc::new(clustered()), 0.95);
        let report = engine
            .deduplicate(vec![
                article("A", "a1"),
                article("A", "b1"),
                article("B", "a2"),
                article("B", "missing"),
            ])
            .await;
        assert_eq!(report.admitted.len(), 3);
        assert_eq!(report.unchecked, 1);
        assert_eq!(report.duplicates.len(), 1);
        assert_eq!(report.duplicates[0].provider, "B");
        assert_eq!(report.duplicates[0].duplicate_of_title, "a1");
    }

    #[tokio::test]
    async fn test_admitted_count_is_order_independent() {
        let titles = ["a1", "a2", "b1", "c1", "c2", "c3"];
        let embedder: Arc<dyn Embedder> = Arc::new(clustered());
        for order in titles.iter().permutations(titles.len()) {
            let engine = DedupEngine::new(embedder.clone(), 0.95);
            let report = engine
                .deduplicate(order.iter().map(|t| article("P", t)).collect())
                .await;
            assert_eq!(report.admitted.len(), 3, "order {order:?}");
        }
    }

    #[tokio::test]
    async fn test_reset_clears_index() {
        let mut engine = DedupEngine::new(Arc::new(clustered()), 0.95);
        engine.admit(article("A", "a1")).await;
        engine.reset();
        assert_eq!(engine.admit(article("B", "a2")).await, Admission::Admitted);
    }

    #[tokio::test]
    async fn test_hash_embedder_catches_reworded_headline() {
        let engine = DedupEngine::new(Arc::new(HashEmbedder::new(384)), 0.8);
        let report = engine
            .deduplicate(vec![
                article("gnews", "Central bank holds interest rates steady amid inflation worries"),
                article("newsapi", "Central bank holds interest rates steady amid inflation concerns"),
                article("newsapi", "Local team wins championship after dramatic overtime"),
            ])
            .await;
        assert_eq!(report.admitted.len(), 2);
        assert_eq!(report.duplicates[0].provider, "newsapi");
    }
}
