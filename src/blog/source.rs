//! Collaborator traits the cache pulls from.

use color_eyre::Result;
use std::future::Future;

use crate::cms::types::{Article, ArticleContent};

/// Remote source of published articles.
pub trait ArticleSource: Send + Sync {
  /// One page of articles carrying `tag`, newest first, starting at `offset`.
  /// An empty page marks the end of the listing.
  fn list_articles(
    &self,
    tag: &str,
    offset: usize,
  ) -> impl Future<Output = Result<Vec<Article>>> + Send;

  /// Latest content of an article in the given language.
  fn get_content(
    &self,
    id: &str,
    language_id: &str,
  ) -> impl Future<Output = Result<ArticleContent>> + Send;
}

/// Downloads attachment bodies referenced from article markup.
pub trait AttachmentFetcher: Send + Sync {
  fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;
}
