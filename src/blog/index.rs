//! Immutable article indexes, built once per refresh.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::cms::types::Article;

/// Publication year -> articles of that year, newest first.
pub type YearIndex = BTreeMap<i32, Vec<Article>>;

/// Articles by id together with the derived year index.
///
/// Both maps are built in one go and never mutated afterwards, so they always
/// hold the same set of articles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleIndex {
  by_id: BTreeMap<String, Article>,
  by_year: YearIndex,
}

impl ArticleIndex {
  pub fn new(articles: impl IntoIterator<Item = Article>) -> Self {
    let by_id: BTreeMap<String, Article> = articles
      .into_iter()
      .map(|article| (article.id.clone(), article))
      .collect();

    let mut by_year = YearIndex::new();
    for article in by_id.values() {
      by_year.entry(article.year()).or_default().push(article.clone());
    }
    for bucket in by_year.values_mut() {
      bucket.sort_by(|a, b| {
        b.published
          .cmp(&a.published)
          .then_with(|| a.id.cmp(&b.id))
      });
    }

    Self { by_id, by_year }
  }

  pub fn len(&self) -> usize {
    self.by_id.len()
  }

  pub fn is_empty(&self) -> bool {
    self.by_id.is_empty()
  }

  pub fn get(&self, id: &str) -> Option<&Article> {
    self.by_id.get(id)
  }

  pub fn by_year(&self) -> &YearIndex {
    &self.by_year
  }

  /// Up to `n` articles, most recently published first.
  pub fn latest(&self, n: usize) -> Vec<Article> {
    self
      .by_year
      .values()
      .rev()
      .flat_map(|bucket| bucket.iter())
      .take(n)
      .cloned()
      .collect()
  }

  /// Stable hex digest of the indexed articles.
  pub fn fingerprint(&self) -> String {
    let mut hasher = Sha256::new();
    for article in self.by_id.values() {
      // Serializing plain strings and timestamps cannot fail
      if let Ok(bytes) = serde_json::to_vec(article) {
        hasher.update(&bytes);
      }
      hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
  }
}
